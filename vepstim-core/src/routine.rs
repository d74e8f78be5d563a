use serde::{Deserialize, Serialize};

use crate::component::{ComponentSpec, StimulusComponent};
use crate::stimulus::{Schedulable, Status, StimulusId};

/// One timed phase of presentation, as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineSpec {
    pub name: String,
    /// Nominal length in seconds.
    pub duration: f64,
    /// Code sent when the first component of the routine appears.
    #[serde(default = "default_trigger_code")]
    pub trigger_code: u8,
    /// Code sent when the routine ends.
    #[serde(default = "default_stop_code")]
    pub stop_code: u8,
    pub components: Vec<ComponentSpec>,
}

fn default_trigger_code() -> u8 {
    1
}

fn default_stop_code() -> u8 {
    b'0'
}

/// Runtime state of a routine: its components plus the force-end flag.
///
/// Built once per session and [`Routine::reset`] before every repetition.
#[derive(Debug, Clone)]
pub struct Routine {
    name: String,
    target_duration: f64,
    trigger_code: u8,
    stop_code: u8,
    components: Vec<StimulusComponent>,
    force_ended: bool,
}

impl Routine {
    /// `ids[i]` is the display handle for `spec.components[i]`.
    pub fn new(spec: &RoutineSpec, ids: &[StimulusId]) -> Self {
        let components = spec
            .components
            .iter()
            .zip(ids)
            .map(|(c, id)| StimulusComponent::new(c, *id))
            .collect();
        Self {
            name: spec.name.clone(),
            target_duration: spec.duration,
            trigger_code: spec.trigger_code,
            stop_code: spec.stop_code,
            components,
            force_ended: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_duration(&self) -> f64 {
        self.target_duration
    }

    pub fn trigger_code(&self) -> u8 {
        self.trigger_code
    }

    pub fn stop_code(&self) -> u8 {
        self.stop_code
    }

    pub fn components(&self) -> &[StimulusComponent] {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut [StimulusComponent] {
        &mut self.components
    }

    pub fn force_end(&mut self) {
        self.force_ended = true;
    }

    pub fn is_force_ended(&self) -> bool {
        self.force_ended
    }

    pub fn reset(&mut self) {
        self.force_ended = false;
        for c in &mut self.components {
            c.reset();
        }
    }

    pub fn all_finished(&self) -> bool {
        self.components
            .iter()
            .all(|c| c.status() == Status::Finished)
    }

    pub fn any_started(&self) -> bool {
        self.components
            .iter()
            .any(|c| c.status() != Status::NotStarted)
    }
}
