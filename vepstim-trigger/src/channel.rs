use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, trace, warn};
use vepstim_timing::TimeSource;

use crate::error::TriggerError;

/// Output to an external recording device.
///
/// `send` is fire-and-forget and must return well within one frame. `close`
/// may be called any number of times; only the first call releases the port.
pub trait TriggerChannel {
    fn send(&mut self, code: u8) -> Result<(), TriggerError>;
    fn close(&mut self);
    fn is_closed(&self) -> bool;
}

impl<T: TriggerChannel + ?Sized> TriggerChannel for Box<T> {
    fn send(&mut self, code: u8) -> Result<(), TriggerError> {
        (**self).send(code)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}

/// Serial trigger box, addressed through its device node
/// (e.g. `/dev/ttyACM0`, `/dev/cu.usbmodem101`).
#[derive(Debug)]
pub struct SerialTrigger {
    device: String,
    port: Option<File>,
}

impl SerialTrigger {
    pub fn open(device: &str, baud: u32) -> Result<Self, TriggerError> {
        let unavailable = |source| TriggerError::DeviceUnavailable {
            device: device.to_string(),
            source,
        };

        let mut options = OpenOptions::new();
        options.write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_NOCTTY);
        }
        let port = options.open(device).map_err(unavailable)?;

        #[cfg(unix)]
        {
            if let Err(e) = configure_raw(&port, baud) {
                // Not a tty (pipe, plain file): bytes still go through unchanged.
                debug!(device, error = %e, "could not configure serial line");
            }
        }
        #[cfg(not(unix))]
        let _ = baud;

        info!(device, baud, "trigger port opened");
        Ok(Self {
            device: device.to_string(),
            port: Some(port),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl TriggerChannel for SerialTrigger {
    fn send(&mut self, code: u8) -> Result<(), TriggerError> {
        let port = self.port.as_mut().ok_or(TriggerError::Closed)?;
        port.write_all(&[code])
            .map_err(|source| TriggerError::Write { code, source })?;
        trace!(code, "trigger sent");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(port) = self.port.take() {
            if let Err(e) = port.sync_all() {
                debug!(device = %self.device, error = %e, "sync on close failed");
            }
            info!(device = %self.device, "trigger port closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.port.is_none()
    }
}

impl Drop for SerialTrigger {
    fn drop(&mut self) {
        if self.port.is_some() {
            warn!(device = %self.device, "trigger port dropped without close");
            self.close();
        }
    }
}

#[cfg(unix)]
fn configure_raw(port: &File, baud: u32) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    let fd = port.as_raw_fd();
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        match baud_constant(baud) {
            Some(speed) => {
                libc::cfsetispeed(&mut tio, speed);
                libc::cfsetospeed(&mut tio, speed);
            }
            None => warn!(baud, "unsupported baud rate, keeping line speed"),
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(unix)]
fn baud_constant(baud: u32) -> Option<libc::speed_t> {
    Some(match baud {
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        _ => return None,
    })
}

/// Stand-in used when no trigger hardware is attached.
#[derive(Debug, Default)]
pub struct NullTrigger {
    closed: bool,
}

impl TriggerChannel for NullTrigger {
    fn send(&mut self, code: u8) -> Result<(), TriggerError> {
        if self.closed {
            return Err(TriggerError::Closed);
        }
        trace!(code, "trigger discarded (no device)");
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentCode {
    pub code: u8,
    pub at: f64,
}

#[derive(Debug, Default)]
struct LogInner {
    sent: Vec<SentCode>,
    close_calls: usize,
}

/// Shared view of everything a [`RecordingTrigger`] saw.
#[derive(Debug, Clone, Default)]
pub struct TriggerLog {
    inner: Arc<Mutex<LogInner>>,
}

impl TriggerLog {
    pub fn sent(&self) -> Vec<SentCode> {
        self.inner.lock().map(|l| l.sent.clone()).unwrap_or_default()
    }

    pub fn codes(&self) -> Vec<u8> {
        self.sent().into_iter().map(|s| s.code).collect()
    }

    pub fn close_calls(&self) -> usize {
        self.inner.lock().map(|l| l.close_calls).unwrap_or_default()
    }
}

/// Trigger channel that timestamps every code on a [`TimeSource`] instead of
/// writing it anywhere.
#[derive(Debug)]
pub struct RecordingTrigger<S: TimeSource> {
    source: S,
    log: TriggerLog,
    closed: bool,
}

impl<S: TimeSource> RecordingTrigger<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            log: TriggerLog::default(),
            closed: false,
        }
    }

    pub fn log(&self) -> TriggerLog {
        self.log.clone()
    }
}

impl<S: TimeSource> TriggerChannel for RecordingTrigger<S> {
    fn send(&mut self, code: u8) -> Result<(), TriggerError> {
        if self.closed {
            return Err(TriggerError::Closed);
        }
        let at = self.source.now();
        if let Ok(mut log) = self.log.inner.lock() {
            log.sent.push(SentCode { code, at });
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Ok(mut log) = self.log.inner.lock() {
            log.close_calls += 1;
        }
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vepstim_timing::ManualSource;

    #[test]
    fn serial_writes_raw_bytes() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let mut trig = SerialTrigger::open(&path, 9600).unwrap();
        trig.send(1).unwrap();
        trig.send(b'0').unwrap();
        trig.close();
        assert_eq!(std::fs::read(file.path()).unwrap(), vec![1, b'0']);
    }

    #[test]
    fn missing_device_is_unavailable() {
        let err = SerialTrigger::open("/nonexistent/vepstim-trigger", 9600).unwrap_err();
        assert!(matches!(err, TriggerError::DeviceUnavailable { .. }));
    }

    #[test]
    fn close_is_idempotent() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut trig = SerialTrigger::open(file.path().to_str().unwrap(), 9600).unwrap();
        trig.close();
        trig.close();
        assert!(trig.is_closed());
        assert!(matches!(trig.send(1), Err(TriggerError::Closed)));
    }

    #[test]
    fn recording_trigger_timestamps_sends() {
        let src = ManualSource::new();
        let mut trig = RecordingTrigger::new(src.clone());
        let log = trig.log();
        trig.send(1).unwrap();
        src.advance(Duration::from_millis(500));
        trig.send(48).unwrap();
        trig.close();
        let sent = log.sent();
        assert_eq!(log.codes(), vec![1, 48]);
        assert!((sent[1].at - 0.5).abs() < 1e-9);
        assert_eq!(log.close_calls(), 1);
    }

    #[test]
    fn boxed_channels_forward() {
        let mut trig: Box<dyn TriggerChannel> = Box::new(NullTrigger::default());
        trig.send(3).unwrap();
        trig.close();
        assert!(trig.is_closed());
    }
}
