use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vepstim_core::{ComponentSpec, Conditions, RoutineSpec, StimulusKind};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialOrder {
    Sequential,
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Serial device node. `None` runs without trigger hardware.
    pub device: Option<String>,
    pub baud: u32,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            device: Some("/dev/cu.usbmodem101".into()),
            baud: 9600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    pub background: [u8; 4],
    pub title: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            fullscreen: true,
            background: [128, 128, 128, 255],
            title: "vepstim".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub exp_name: String,
    pub repetitions: usize,
    pub order: TrialOrder,
    /// Seed for randomized trial order; drawn once per session when absent.
    pub seed: Option<u64>,
    /// Seconds of slack when comparing predicted refresh times to onsets.
    pub frame_tolerance: f64,
    /// Assumed refresh rate when the display cannot be measured.
    pub nominal_frame_rate: f64,
    /// Flips used to measure the real refresh rate at startup. 0 disables.
    pub measure_frames: usize,
    pub data_dir: PathBuf,
    pub trigger: TriggerConfig,
    pub display: DisplayConfig,
    pub conditions: Vec<Conditions>,
    pub routines: Vec<RoutineSpec>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            exp_name: "simple VEP".into(),
            repetitions: 75,
            order: TrialOrder::Random,
            seed: None,
            frame_tolerance: 0.001,
            nominal_frame_rate: 60.0,
            measure_frames: 60,
            data_dir: PathBuf::from("data"),
            trigger: TriggerConfig::default(),
            display: DisplayConfig::default(),
            conditions: Vec::new(),
            routines: vec![
                phase_routine("phase1", "grating1", "fixation", 0.0),
                phase_routine("phase2", "grating1_2", "fixation_2", 0.5),
            ],
        }
    }
}

/// Grating plus fixation dot, both on for the whole 0.5 s phase.
fn phase_routine(name: &str, grating: &str, fixation: &str, phase: f32) -> RoutineSpec {
    RoutineSpec {
        name: name.into(),
        duration: 0.5,
        trigger_code: 1,
        stop_code: b'0',
        components: vec![
            ComponentSpec {
                name: grating.into(),
                stimulus: StimulusKind::grating(phase),
                onset: 0.0,
                duration: 0.5,
                ends_routine: false,
            },
            ComponentSpec {
                name: fixation.into(),
                stimulus: StimulusKind::fixation(),
                onset: 0.0,
                duration: 0.5,
                ends_routine: false,
            },
        ],
    }
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: ExperimentConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.routines.is_empty() {
            return invalid("at least one routine is required".into());
        }
        if !(self.nominal_frame_rate > 0.0) {
            return invalid(format!(
                "nominal_frame_rate must be positive, got {}",
                self.nominal_frame_rate
            ));
        }
        if !(self.frame_tolerance >= 0.0) {
            return invalid(format!(
                "frame_tolerance must not be negative, got {}",
                self.frame_tolerance
            ));
        }

        let mut names = HashSet::new();
        for routine in &self.routines {
            if !(routine.duration > 0.0) {
                return invalid(format!("routine {} needs a positive duration", routine.name));
            }
            // routine and component names share the data column namespace
            if !names.insert(routine.name.as_str()) {
                return invalid(format!("duplicate name {}", routine.name));
            }
            if routine.components.is_empty() {
                return invalid(format!("routine {} has no components", routine.name));
            }
            for c in &routine.components {
                if !names.insert(c.name.as_str()) {
                    return invalid(format!("duplicate name {}", c.name));
                }
                if !(c.duration >= 0.0) || !(c.onset >= 0.0) {
                    return invalid(format!(
                        "component {} needs non-negative onset and duration",
                        c.name
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn nominal_frame_duration(&self) -> f64 {
        1.0 / self.nominal_frame_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_two_phase_vep() {
        let c = ExperimentConfig::default();
        c.validate().unwrap();
        assert_eq!(c.repetitions, 75);
        assert_eq!(c.routines.len(), 2);
        assert_eq!(c.routines[1].stop_code, 48);
        assert!((c.nominal_frame_duration() - 1.0 / 60.0).abs() < 1e-12);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = ExperimentConfig::from_toml(
            r#"
            exp_name = "short"
            repetitions = 3
            order = "sequential"

            [trigger]
            device = "/dev/ttyACM0"
            "#,
        )
        .unwrap();
        assert_eq!(c.exp_name, "short");
        assert_eq!(c.order, TrialOrder::Sequential);
        assert_eq!(c.trigger.baud, 9600);
        assert_eq!(c.routines.len(), 2);
    }

    #[test]
    fn routines_from_toml() {
        let c = ExperimentConfig::from_toml(
            r#"
            [[routines]]
            name = "flash"
            duration = 0.25
            trigger_code = 7

            [[routines.components]]
            name = "dot"
            duration = 0.1
            stimulus = { kind = "fixation", size = 0.02 }

            [[conditions]]
            contrast = 0.5

            [[conditions]]
            contrast = 1.0
            "#,
        )
        .unwrap();
        assert_eq!(c.routines.len(), 1);
        assert_eq!(c.routines[0].trigger_code, 7);
        assert_eq!(c.routines[0].stop_code, b'0');
        assert_eq!(c.conditions.len(), 2);
    }

    #[test]
    fn rejects_duplicate_component_names() {
        let mut c = ExperimentConfig::default();
        c.routines[1].components[0].name = "grating1".into();
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_bad_frame_rate() {
        let mut c = ExperimentConfig::default();
        c.nominal_frame_rate = 0.0;
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ExperimentConfig::load(Path::new("/nonexistent/vep.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/vep.toml"));
    }
}
