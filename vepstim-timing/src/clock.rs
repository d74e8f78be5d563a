use crate::source::TimeSource;

/// Resettable clock over a shared [`TimeSource`].
///
/// `elapsed() = now - origin + offset`. [`Clock::add_offset`] shifts the reading
/// without touching the origin, which is how non-slip routines carry their
/// overshoot into the next routine. [`Clock::reset`] throws both away.
#[derive(Debug, Clone)]
pub struct Clock<S: TimeSource> {
    source: S,
    origin: f64,
    offset: f64,
}

impl<S: TimeSource> Clock<S> {
    pub fn new(source: S) -> Self {
        let origin = source.now();
        Self {
            source,
            origin,
            offset: 0.0,
        }
    }

    pub fn elapsed(&self) -> f64 {
        self.at(self.source.now())
    }

    /// Reading this clock would show at absolute source time `t`.
    pub fn at(&self, t: f64) -> f64 {
        t - self.origin + self.offset
    }

    pub fn add_offset(&mut self, delta: f64) {
        self.offset += delta;
    }

    pub fn reset(&mut self) {
        self.origin = self.source.now();
        self.offset = 0.0;
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}
