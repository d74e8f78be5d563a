use std::collections::BTreeSet;

use tracing::trace;
use vepstim_core::{StimulusId, StimulusKind};
use vepstim_timing::{ManualSource, TimeSource};

use crate::display::{DisplayError, DisplaySurface, RefreshPredictionUnavailable};

#[derive(Debug, Clone, PartialEq)]
pub struct FlipRecord {
    pub at: f64,
    pub drawn: Vec<StimulusId>,
}

/// Display stand-in on virtual time: refreshes happen on a fixed grid, each
/// optionally displaced by a repeating jitter pattern, and a flip moves the
/// shared [`ManualSource`] to the next refresh.
#[derive(Debug)]
pub struct SimulatedDisplay {
    source: ManualSource,
    period: f64,
    jitter: Vec<f64>,
    origin: f64,
    next_refresh: u64,
    predictable: bool,
    fail_after: Option<usize>,
    stimuli: Vec<(String, StimulusKind)>,
    drawn: BTreeSet<StimulusId>,
    flips: Vec<FlipRecord>,
}

impl SimulatedDisplay {
    pub fn new(source: ManualSource, refresh_rate: f64) -> Self {
        let origin = source.now();
        Self {
            source,
            period: 1.0 / refresh_rate,
            jitter: Vec::new(),
            origin,
            next_refresh: 1,
            predictable: true,
            fail_after: None,
            stimuli: Vec::new(),
            drawn: BTreeSet::new(),
            flips: Vec::new(),
        }
    }

    /// Displaces refresh `n` by `pattern[n % len]` seconds. Each entry is
    /// clamped to under half a period so refreshes stay ordered.
    pub fn with_jitter(mut self, pattern: Vec<f64>) -> Self {
        let limit = self.period * 0.49;
        self.jitter = pattern.into_iter().map(|j| j.clamp(-limit, limit)).collect();
        self
    }

    /// Makes [`DisplaySurface::predict_next_refresh`] fail.
    pub fn without_prediction(mut self) -> Self {
        self.predictable = false;
        self
    }

    /// Every flip after the first `flips` ones fails.
    pub fn failing_after(mut self, flips: usize) -> Self {
        self.fail_after = Some(flips);
        self
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn flips(&self) -> &[FlipRecord] {
        &self.flips
    }

    pub fn flip_count(&self) -> usize {
        self.flips.len()
    }

    pub fn is_drawn(&self, id: StimulusId) -> bool {
        self.drawn.contains(&id)
    }

    pub fn stimulus_name(&self, id: StimulusId) -> Option<&str> {
        self.stimuli.get(id.0).map(|(name, _)| name.as_str())
    }

    fn refresh_time(&self, n: u64) -> f64 {
        let jitter = if self.jitter.is_empty() {
            0.0
        } else {
            self.jitter[(n % self.jitter.len() as u64) as usize]
        };
        self.origin + n as f64 * self.period + jitter
    }

    fn upcoming(&self) -> u64 {
        let now = self.source.now();
        let mut n = self.next_refresh;
        while self.refresh_time(n) <= now {
            n += 1;
        }
        n
    }
}

impl DisplaySurface for SimulatedDisplay {
    fn register(&mut self, name: &str, kind: &StimulusKind) -> Result<StimulusId, DisplayError> {
        self.stimuli.push((name.to_string(), kind.clone()));
        Ok(StimulusId(self.stimuli.len() - 1))
    }

    fn predict_next_refresh(&self) -> Result<f64, RefreshPredictionUnavailable> {
        if !self.predictable {
            return Err(RefreshPredictionUnavailable);
        }
        Ok(self.refresh_time(self.upcoming()))
    }

    fn request_draw_enable(&mut self, id: StimulusId) {
        self.drawn.insert(id);
    }

    fn request_draw_disable(&mut self, id: StimulusId) {
        self.drawn.remove(&id);
    }

    fn flip(&mut self) -> Result<f64, DisplayError> {
        if self.fail_after.is_some_and(|limit| self.flips.len() >= limit) {
            return Err(DisplayError::Present("simulated display lost".into()));
        }
        let n = self.upcoming();
        let at = self.refresh_time(n);
        self.source.set(at);
        self.next_refresh = n + 1;
        self.flips.push(FlipRecord {
            at,
            drawn: self.drawn.iter().copied().collect(),
        });
        trace!(refresh = n, at, "simulated flip");
        Ok(at)
    }
}
