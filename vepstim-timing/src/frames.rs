use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub struct FrameStats {
    pub average_frame_time: f64,
    pub jitter: f64,
    pub min_frame_time: f64,
    pub max_frame_time: f64,
    pub effective_fps: f64,
    pub samples: usize,
}

/// Rolling window of intervals between consecutive flips, in seconds.
#[derive(Debug, Clone)]
pub struct FrameIntervals {
    intervals: VecDeque<f64>,
    last_flip: Option<f64>,
    max_samples: usize,
}

impl FrameIntervals {
    pub fn new(max_samples: usize) -> Self {
        Self {
            intervals: VecDeque::with_capacity(max_samples),
            last_flip: None,
            max_samples: max_samples.max(1),
        }
    }

    pub fn record_flip(&mut self, t: f64) {
        if let Some(last) = self.last_flip {
            if self.intervals.len() >= self.max_samples {
                self.intervals.pop_front();
            }
            self.intervals.push_back((t - last).max(0.0));
        }
        self.last_flip = Some(t);
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
        self.last_flip = None;
    }

    pub fn stats(&self) -> FrameStats {
        if self.intervals.is_empty() {
            return FrameStats {
                average_frame_time: 0.0,
                jitter: 0.0,
                min_frame_time: 0.0,
                max_frame_time: 0.0,
                effective_fps: 0.0,
                samples: 0,
            };
        }
        let n = self.intervals.len() as f64;
        let avg = self.intervals.iter().sum::<f64>() / n;
        let var = self.intervals.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / n;
        let min = self.intervals.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self
            .intervals
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        FrameStats {
            average_frame_time: avg,
            jitter: var.sqrt(),
            min_frame_time: min,
            max_frame_time: max,
            effective_fps: if avg > 0.0 { 1.0 / avg } else { 0.0 },
            samples: self.intervals.len(),
        }
    }

    /// Frame rate in Hz, or `None` when the jitter exceeds `max_jitter_pct`
    /// percent of the mean interval (the measurement is not trustworthy).
    pub fn measured_rate(&self, max_jitter_pct: f64) -> Option<f64> {
        let stats = self.stats();
        if stats.samples == 0 || stats.average_frame_time <= 0.0 {
            return None;
        }
        let jitter_pct = stats.jitter / stats.average_frame_time * 100.0;
        if jitter_pct > max_jitter_pct {
            tracing::warn!(
                jitter_pct,
                samples = stats.samples,
                "frame rate measurement too noisy"
            );
            return None;
        }
        Some(stats.effective_fps)
    }
}

impl Default for FrameIntervals {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_flips_give_rate() {
        let mut f = FrameIntervals::new(100);
        for i in 0..61 {
            f.record_flip(i as f64 / 60.0);
        }
        let rate = f.measured_rate(1.0).unwrap();
        assert!((rate - 60.0).abs() < 1e-6);
        assert_eq!(f.stats().samples, 60);
    }

    #[test]
    fn noisy_flips_are_rejected() {
        let mut f = FrameIntervals::new(100);
        let mut t = 0.0;
        for i in 0..40 {
            t += if i % 2 == 0 { 0.010 } else { 0.030 };
            f.record_flip(t);
        }
        assert!(f.measured_rate(1.0).is_none());
    }

    #[test]
    fn window_is_bounded() {
        let mut f = FrameIntervals::new(5);
        for i in 0..20 {
            f.record_flip(i as f64);
        }
        assert_eq!(f.len(), 5);
    }

    #[test]
    fn empty_stats_are_zero() {
        let f = FrameIntervals::default();
        assert_eq!(f.stats().effective_fps, 0.0);
        assert!(f.measured_rate(1.0).is_none());
    }

    #[test]
    fn clear_forgets_last_flip() {
        let mut f = FrameIntervals::new(10);
        f.record_flip(0.0);
        f.record_flip(0.01);
        f.clear();
        f.record_flip(5.0);
        assert!(f.is_empty());
    }
}
