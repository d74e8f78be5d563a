use std::path::PathBuf;

use tracing::info;
use vepstim_experiment::{ExperimentData, SessionShutdown};

use crate::info::with_suffix;

/// Writes `<stem>.csv` and `<stem>.json` when the session ends.
#[derive(Debug)]
pub struct FilePersistence {
    stem: PathBuf,
}

impl FilePersistence {
    pub fn new(stem: PathBuf) -> Self {
        Self { stem }
    }

    pub fn csv_path(&self) -> PathBuf {
        with_suffix(&self.stem, "csv")
    }

    pub fn json_path(&self) -> PathBuf {
        with_suffix(&self.stem, "json")
    }
}

impl SessionShutdown for FilePersistence {
    fn persist_and_exit(&mut self, data: &ExperimentData) -> std::io::Result<()> {
        if let Some(dir) = self.stem.parent() {
            std::fs::create_dir_all(dir)?;
        }
        data.save_csv(&self.csv_path())?;
        data.save_json(&self.json_path())?;
        info!(stem = %self.stem.display(), rows = data.entries().len(), "session data persisted");
        Ok(())
    }
}
