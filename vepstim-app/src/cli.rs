use std::path::PathBuf;

use clap::Parser;
use vepstim_experiment::ExperimentConfig;

/// Frame-locked VEP stimulus presentation with serial event triggers
#[derive(Parser, Debug)]
#[command(name = "vepstim", version, about, long_about = None)]
pub struct Cli {
    /// Experiment definition (TOML); built-in two-phase VEP when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Participant id; a random 6-digit id when omitted
    #[arg(short, long)]
    pub participant: Option<String>,

    /// Session label
    #[arg(short, long)]
    pub session: Option<String>,

    /// Directory for data and log files
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Serial device of the trigger box
    #[arg(long, conflicts_with = "no_trigger")]
    pub device: Option<String>,

    /// Run without trigger hardware
    #[arg(long)]
    pub no_trigger: bool,

    /// Dry run on a simulated display in virtual time
    #[arg(long)]
    pub headless: bool,

    /// Override the number of repetitions
    #[arg(short, long)]
    pub repetitions: Option<usize>,

    /// Seed for the randomized trial order
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Cli {
    /// Command line flags win over the config file.
    pub fn apply(&self, config: &mut ExperimentConfig) {
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(device) = &self.device {
            config.trigger.device = Some(device.clone());
        }
        if self.no_trigger {
            config.trigger.device = None;
        }
        if let Some(reps) = self.repetitions {
            config.repetitions = reps;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
    }
}
