use anyhow::{Context, Result};
use chrono::Local;
use tracing::{info, warn};
use vepstim_experiment::{
    open_trigger, CancelFlag, CancellationSource, DisplaySurface, ExperimentConfig, Order, Session,
    SessionOutcome, SimulatedDisplay,
};
use vepstim_render::WindowDisplay;
use vepstim_timing::{ManualSource, MonotonicSource, TimeSource};
use vepstim_trigger::TriggerChannel;

use crate::cli::Cli;
use crate::info::{with_suffix, ExpInfo};
use crate::persist::FilePersistence;

pub fn run(cli: Cli) -> Result<SessionOutcome> {
    let mut config = match &cli.config {
        Some(path) => ExperimentConfig::load(path)?,
        None => ExperimentConfig::default(),
    };
    cli.apply(&mut config);
    config.validate()?;

    let info = ExpInfo::new(
        &config.exp_name,
        cli.participant.clone(),
        cli.session.clone(),
        &Local::now(),
        &mut rand::rng(),
    );
    let stem = info.file_stem(&config.data_dir);
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("cannot create data directory {}", config.data_dir.display()))?;
    crate::logging::init(&with_suffix(&stem, "log"))?;

    info!(
        exp_name = %info.exp_name,
        participant = %info.participant,
        session = %info.session,
        platform = std::env::consts::OS,
        headless = cli.headless,
        "starting experiment"
    );

    let order = Order::resolve(config.order, config.seed);
    // no stimulus is shown unless the trigger port is open
    let trigger = open_trigger(&config.trigger).context("trigger device unavailable")?;
    let cancel = CancelFlag::new();
    let mut shutdown = FilePersistence::new(stem);

    let outcome = if cli.headless {
        let source = ManualSource::new();
        let display = SimulatedDisplay::new(source.clone(), config.nominal_frame_rate);
        run_session(&config, order, source, display, trigger, cancel, &info, &mut shutdown)?
    } else {
        let source = MonotonicSource::new();
        let display = WindowDisplay::open(&config.display, source, cancel.clone())
            .context("cannot open stimulus window")?;
        run_session(&config, order, source, display, trigger, cancel, &info, &mut shutdown)?
    };

    match outcome {
        SessionOutcome::Completed { trials } => info!(trials, "experiment completed"),
        SessionOutcome::Cancelled { trials_completed } => {
            warn!(trials_completed, "experiment aborted by escape")
        }
    }
    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
fn run_session<S, D, T, C>(
    config: &ExperimentConfig,
    order: Order,
    source: S,
    display: D,
    trigger: T,
    cancel: C,
    info: &ExpInfo,
    shutdown: &mut FilePersistence,
) -> Result<SessionOutcome>
where
    S: TimeSource,
    D: DisplaySurface,
    T: TriggerChannel,
    C: CancellationSource,
{
    let mut session = Session::new(config, order, source, display, trigger, cancel)?;
    info.apply(session.data_mut());
    Ok(session.run(shutdown)?)
}
