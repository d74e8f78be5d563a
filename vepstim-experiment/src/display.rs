use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use vepstim_core::{StimulusId, StimulusKind};

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("display cannot predict its next refresh")]
pub struct RefreshPredictionUnavailable;

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("cannot prepare stimulus {name}: {reason}")]
    Stimulus { name: String, reason: String },

    #[error("presenting frame failed: {0}")]
    Present(String),
}

/// The window the routines draw into.
///
/// All timestamps are seconds on the session's [`vepstim_timing::TimeSource`].
/// Draw requests take effect on the next [`DisplaySurface::flip`].
pub trait DisplaySurface {
    fn register(&mut self, name: &str, kind: &StimulusKind) -> Result<StimulusId, DisplayError>;

    /// When the next flip will reach the screen.
    fn predict_next_refresh(&self) -> Result<f64, RefreshPredictionUnavailable>;

    fn request_draw_enable(&mut self, id: StimulusId);
    fn request_draw_disable(&mut self, id: StimulusId);

    /// Blocks until the frame is on screen and returns when that happened.
    fn flip(&mut self) -> Result<f64, DisplayError>;
}

/// Polled once per frame tick.
pub trait CancellationSource {
    fn poll_escape_requested(&mut self) -> bool;
}

/// Cancellation delivered through one atomic flag, so it may be raised from
/// an input thread or a window event handler.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl CancellationSource for CancelFlag {
    fn poll_escape_requested(&mut self) -> bool {
        self.is_requested()
    }
}
