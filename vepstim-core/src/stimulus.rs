use serde::{Deserialize, Serialize};

/// Lifecycle of anything drawn on a schedule within a routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Status {
    #[default]
    NotStarted,
    Started,
    Finished,
}

/// Capability shared by every scheduled stimulus type.
pub trait Schedulable {
    fn status(&self) -> Status;
    fn set_draw_enabled(&mut self, enabled: bool);
    fn is_draw_enabled(&self) -> bool;
}

/// Handle for a stimulus registered with a display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StimulusId(pub usize);

/// What a stimulus looks like. Sizes and positions are in height units
/// (1.0 = window height), centered on the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StimulusKind {
    /// Sinusoidal luminance grating. `phase` is a fraction of one cycle.
    Grating {
        size: (f32, f32),
        spatial_freq: f32,
        #[serde(default)]
        phase: f32,
        #[serde(default)]
        orientation: f32,
        #[serde(default = "full_contrast")]
        contrast: f32,
    },
    Fixation {
        size: f32,
        #[serde(default = "red")]
        color: [u8; 4],
    },
}

fn full_contrast() -> f32 {
    1.0
}

fn red() -> [u8; 4] {
    [255, 0, 0, 255]
}

impl StimulusKind {
    pub fn grating(phase: f32) -> Self {
        StimulusKind::Grating {
            size: (1.5, 1.0),
            spatial_freq: 10.0,
            phase,
            orientation: 0.0,
            contrast: 1.0,
        }
    }

    pub fn fixation() -> Self {
        StimulusKind::Fixation {
            size: 0.01,
            color: red(),
        }
    }
}
