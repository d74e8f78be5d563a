use std::ffi::OsString;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use rand::Rng;
use serde_json::Value;
use vepstim_experiment::ExperimentData;

const DATE_FORMAT: &str = "%Y-%m-%d_%Hh%M.%S.%3f";

/// Session metadata copied onto every data row.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpInfo {
    pub participant: String,
    pub session: String,
    pub date: String,
    pub exp_name: String,
}

impl ExpInfo {
    pub fn new<Tz, R>(
        exp_name: &str,
        participant: Option<String>,
        session: Option<String>,
        now: &DateTime<Tz>,
        rng: &mut R,
    ) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: Display,
        R: Rng,
    {
        Self {
            participant: participant
                .unwrap_or_else(|| format!("{:06}", rng.random_range(0..1_000_000u32))),
            session: session.unwrap_or_else(|| "001".to_string()),
            date: now.format(DATE_FORMAT).to_string(),
            exp_name: exp_name.to_string(),
        }
    }

    /// `<data_dir>/<participant>_<expName>_<date>`, without extension.
    pub fn file_stem(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(format!("{}_{}_{}", self.participant, self.exp_name, self.date))
    }

    pub fn apply(&self, data: &mut ExperimentData) {
        data.set_extra_info("participant", Value::from(self.participant.as_str()));
        data.set_extra_info("session", Value::from(self.session.as_str()));
        data.set_extra_info("date", Value::from(self.date.as_str()));
        data.set_extra_info("expName", Value::from(self.exp_name.as_str()));
        data.set_extra_info("vepstimVersion", Value::from(env!("CARGO_PKG_VERSION")));
    }
}

/// Appends `.ext` to `stem`. The stem's date already contains dots, so
/// `Path::with_extension` would cut it.
pub fn with_suffix(stem: &Path, ext: &str) -> PathBuf {
    let mut s = OsString::from(stem.as_os_str());
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}
