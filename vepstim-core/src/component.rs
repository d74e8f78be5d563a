use serde::{Deserialize, Serialize};

use crate::stimulus::{Schedulable, Status, StimulusId, StimulusKind};

/// Static description of a component inside a routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    pub stimulus: StimulusKind,
    /// Seconds after routine start at which the stimulus appears.
    #[serde(default)]
    pub onset: f64,
    /// Seconds the stimulus stays on once it has appeared.
    pub duration: f64,
    /// Finishing this component ends the routine early.
    #[serde(default)]
    pub ends_routine: bool,
}

/// Times of the flip the current tick is preparing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTime {
    pub frame: u64,
    /// Routine clock reading when the tick began.
    pub t: f64,
    /// Predicted refresh on the routine clock.
    pub t_flip: f64,
    /// Predicted refresh on the session clock.
    pub t_flip_global: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    Finished,
}

/// Onset/active/offset state of one stimulus within one routine run.
#[derive(Debug, Clone)]
pub struct StimulusComponent {
    name: String,
    stimulus: StimulusId,
    onset: f64,
    duration: f64,
    ends_routine: bool,

    status: Status,
    draw_enabled: bool,

    pub frame_start: Option<u64>,
    pub t_start: Option<f64>,
    pub t_start_refresh: Option<f64>,
    pub frame_stop: Option<u64>,
    pub t_stop: Option<f64>,
}

impl StimulusComponent {
    pub fn new(spec: &ComponentSpec, stimulus: StimulusId) -> Self {
        Self {
            name: spec.name.clone(),
            stimulus,
            onset: spec.onset,
            duration: spec.duration,
            ends_routine: spec.ends_routine,
            status: Status::NotStarted,
            draw_enabled: false,
            frame_start: None,
            t_start: None,
            t_start_refresh: None,
            frame_stop: None,
            t_stop: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stimulus(&self) -> StimulusId {
        self.stimulus
    }

    pub fn ends_routine(&self) -> bool {
        self.ends_routine
    }

    pub fn reset(&mut self) {
        self.status = Status::NotStarted;
        self.draw_enabled = false;
        self.frame_start = None;
        self.t_start = None;
        self.t_start_refresh = None;
        self.frame_stop = None;
        self.t_stop = None;
    }

    /// Advances the state machine for the flip described by `at`.
    ///
    /// At most one transition happens per call. Onset is judged on the routine
    /// clock, offset on the session clock against the refresh the stimulus
    /// first appeared on.
    pub fn update(&mut self, at: &FrameTime, tolerance: f64) -> Option<Transition> {
        match self.status {
            Status::NotStarted if at.t_flip >= self.onset - tolerance => {
                self.status = Status::Started;
                self.frame_start = Some(at.frame);
                self.t_start = Some(at.t);
                self.t_start_refresh = Some(at.t_flip_global);
                self.set_draw_enabled(true);
                Some(Transition::Started)
            }
            Status::Started => {
                let started = self.t_start_refresh.unwrap_or(at.t_flip_global);
                if at.t_flip_global > started + self.duration - tolerance {
                    self.stop(at.frame, at.t);
                    Some(Transition::Finished)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Finishes a component the routine is leaving behind. Returns whether the
    /// component was still drawn or pending.
    pub fn force_finish(&mut self, frame: u64, t: f64) -> bool {
        if self.status == Status::Finished {
            return false;
        }
        let was_started = self.status == Status::Started;
        self.stop(frame, t);
        was_started
    }

    fn stop(&mut self, frame: u64, t: f64) {
        self.status = Status::Finished;
        self.frame_stop = Some(frame);
        self.t_stop = Some(t);
        self.set_draw_enabled(false);
    }
}

impl Schedulable for StimulusComponent {
    fn status(&self) -> Status {
        self.status
    }

    fn set_draw_enabled(&mut self, enabled: bool) {
        self.draw_enabled = enabled;
    }

    fn is_draw_enabled(&self) -> bool {
        self.draw_enabled
    }
}
