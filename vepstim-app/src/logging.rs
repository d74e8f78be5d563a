//! Console plus per-session log file.
//!
//! The console only shows warnings and errors so nothing competes with the
//! stimulus window; the file next to the data gets everything `RUST_LOG`
//! allows, `info` by default.

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub fn init(log_path: &Path) -> Result<()> {
    let file = File::create(log_path)
        .with_context(|| format!("cannot create log file {}", log_path.display()))?;

    let file_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_span_events(FmtSpan::NONE)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("logging already initialized")?;

    tracing::info!(log_file = %log_path.display(), "logging initialized");
    Ok(())
}
