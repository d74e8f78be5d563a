use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

/// Sink for per-trial data written by the frame loop.
pub trait DataRecorder {
    /// Records `label` against the timestamp of the next flip, not the time
    /// of this call.
    fn timestamp_on_flip(&mut self, label: &str);
    fn add_data(&mut self, key: &str, value: Value);
    /// Called by the frame loop with each actual flip time.
    fn on_flip(&mut self, t: f64);
    /// Closes the current trial row.
    fn next_entry(&mut self);
}

/// Row-per-trial store with session metadata repeated on every row.
#[derive(Debug, Default, Serialize)]
pub struct ExperimentData {
    extra_info: BTreeMap<String, Value>,
    entries: Vec<BTreeMap<String, Value>>,
    #[serde(skip)]
    current: BTreeMap<String, Value>,
    /// Column order: first time each key was seen.
    #[serde(skip)]
    columns: Vec<String>,
    /// (row index, label) waiting for the next flip.
    #[serde(skip)]
    pending: Vec<(usize, String)>,
}

impl ExperimentData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_extra_info(&mut self, key: &str, value: Value) {
        self.extra_info.insert(key.to_string(), value);
    }

    pub fn extra_info(&self) -> &BTreeMap<String, Value> {
        &self.extra_info
    }

    pub fn entries(&self) -> &[BTreeMap<String, Value>] {
        &self.entries
    }

    pub fn current(&self) -> &BTreeMap<String, Value> {
        &self.current
    }

    pub fn pending_flip_labels(&self) -> usize {
        self.pending.len()
    }

    fn insert(&mut self, row: usize, key: String, value: Value) {
        if !self.columns.iter().any(|c| *c == key) {
            self.columns.push(key.clone());
        }
        if row == self.entries.len() {
            self.current.insert(key, value);
        } else if let Some(entry) = self.entries.get_mut(row) {
            entry.insert(key, value);
        }
    }

    /// Keeps a row that is still open; used before saving so an aborted trial
    /// is not lost.
    pub fn close_open_entry(&mut self) {
        if !self.current.is_empty() {
            self.next_entry();
        }
    }

    pub fn save_json(&self, path: &Path) -> std::io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut out, self)?;
        out.flush()?;
        info!(path = %path.display(), rows = self.entries.len(), "data saved");
        Ok(())
    }

    /// Wide CSV: one row per trial, trial columns first then session metadata.
    pub fn save_csv(&self, path: &Path) -> std::io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        let header: Vec<&str> = self
            .columns
            .iter()
            .map(String::as_str)
            .chain(self.extra_info.keys().map(String::as_str))
            .collect();
        writeln!(
            out,
            "{}",
            header.iter().map(|h| csv_field(h)).collect::<Vec<_>>().join(",")
        )?;
        for entry in &self.entries {
            let row: Vec<String> = self
                .columns
                .iter()
                .map(|c| entry.get(c).map(cell).unwrap_or_default())
                .chain(self.extra_info.values().map(cell))
                .collect();
            writeln!(out, "{}", row.join(","))?;
        }
        out.flush()?;
        info!(path = %path.display(), rows = self.entries.len(), "data saved");
        Ok(())
    }
}

impl DataRecorder for ExperimentData {
    fn timestamp_on_flip(&mut self, label: &str) {
        self.pending.push((self.entries.len(), label.to_string()));
    }

    fn add_data(&mut self, key: &str, value: Value) {
        let row = self.entries.len();
        self.insert(row, key.to_string(), value);
    }

    fn on_flip(&mut self, t: f64) {
        if self.pending.is_empty() {
            return;
        }
        for (row, label) in std::mem::take(&mut self.pending) {
            debug!(label = %label, t, "flip timestamp");
            self.insert(row, label, Value::from(t));
        }
    }

    fn next_entry(&mut self) {
        let entry = std::mem::take(&mut self.current);
        self.entries.push(entry);
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => csv_field(s),
        other => csv_field(&other.to_string()),
    }
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
