use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A monotonic time base, in seconds since the source's epoch.
///
/// Every clock, display and trigger in a session must read the same source so
/// that timestamps taken by different components are comparable.
pub trait TimeSource: Clone + Send + Sync {
    fn now(&self) -> f64;
    fn sleep(&self, d: Duration);
}

/// Wall-clock source backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicSource {
    epoch: Instant,
}

impl MonotonicSource {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Converts an [`Instant`] taken elsewhere into this source's timeline.
    pub fn instant_to_secs(&self, at: Instant) -> f64 {
        at.saturating_duration_since(self.epoch).as_secs_f64()
    }

    /// High precision sleep (platform specific)
    pub fn high_precision_sleep(&self, duration: Duration) {
        #[cfg(target_os = "linux")]
        self.linux_sleep(duration);
        #[cfg(target_os = "macos")]
        self.macos_sleep(duration);
        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        std::thread::sleep(duration);
    }

    #[cfg(target_os = "linux")]
    fn linux_sleep(&self, duration: Duration) {
        use libc::{clock_nanosleep, timespec, CLOCK_MONOTONIC};

        let req = timespec {
            tv_sec: duration.as_secs() as libc::time_t,
            tv_nsec: duration.subsec_nanos() as libc::c_long,
        };

        unsafe {
            clock_nanosleep(CLOCK_MONOTONIC, 0, &req, std::ptr::null_mut());
        }
    }

    #[cfg(target_os = "macos")]
    fn macos_sleep(&self, duration: Duration) {
        use mach2::mach_time::{mach_absolute_time, mach_timebase_info, mach_timebase_info_data_t};

        // Short waits spin on the mach clock, the scheduler is too coarse for them.
        if duration.as_nanos() < 100_000 {
            unsafe {
                let start = mach_absolute_time();
                let mut timebase = mach_timebase_info_data_t { numer: 0, denom: 0 };
                mach_timebase_info(&mut timebase);

                let target_ticks =
                    duration.as_nanos() as u64 * timebase.denom as u64 / timebase.numer as u64;

                while mach_absolute_time() - start < target_ticks {
                    std::hint::spin_loop();
                }
            }
        } else {
            std::thread::sleep(duration);
        }
    }
}

impl Default for MonotonicSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicSource {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn sleep(&self, d: Duration) {
        self.high_precision_sleep(d)
    }
}

/// Virtual time that only moves when told to.
///
/// Clones share the same counter, so a simulated display can advance the time
/// every clock in the session observes.
#[derive(Debug, Clone, Default)]
pub struct ManualSource {
    nanos: Arc<AtomicU64>,
}

impl ManualSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(secs: f64) -> Self {
        let source = Self::new();
        source.set(secs);
        source
    }

    pub fn advance(&self, d: Duration) {
        self.nanos.fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Moves time forward to `secs`. Never moves it backwards.
    pub fn set(&self, secs: f64) {
        let target = (secs.max(0.0) * 1e9).round() as u64;
        self.nanos.fetch_max(target, Ordering::SeqCst);
    }

    pub fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

impl TimeSource for ManualSource {
    fn now(&self) -> f64 {
        self.now_nanos() as f64 / 1e9
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}
