use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, info_span, warn};
use vepstim_core::{Routine, StimulusId};
use vepstim_timing::{Clock, TimeSource};
use vepstim_trigger::{NullTrigger, SerialTrigger, TriggerChannel, TriggerError};

use crate::config::{ExperimentConfig, TriggerConfig};
use crate::display::{CancellationSource, DisplayError, DisplaySurface};
use crate::driver::{FrameLoopDriver, RoutineOutcome, Stage};
use crate::recorder::{DataRecorder, ExperimentData};
use crate::trials::{Order, TrialIterator};

/// Frame rate measurements noisier than this (stdev as % of mean interval)
/// are discarded.
const MAX_MEASURE_JITTER_PCT: f64 = 1.0;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error(transparent)]
    Display(#[from] DisplayError),

    #[error("failed to save experiment data: {0}")]
    Persist(#[source] std::io::Error),

    #[error("session has already run")]
    AlreadyRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed { trials: usize },
    Cancelled { trials_completed: usize },
}

/// Called exactly once when a session ends, however it ends.
pub trait SessionShutdown {
    fn persist_and_exit(&mut self, data: &ExperimentData) -> std::io::Result<()>;
}

/// Opens the configured trigger device; no device means a [`NullTrigger`].
pub fn open_trigger(config: &TriggerConfig) -> Result<Box<dyn TriggerChannel>, SessionError> {
    match &config.device {
        Some(device) => Ok(Box::new(SerialTrigger::open(device, config.baud)?)),
        None => {
            info!("no trigger device configured");
            Ok(Box::new(NullTrigger::default()))
        }
    }
}

/// One participant's run: owns the display, the trigger port and the clocks,
/// and walks every trial through every routine.
pub struct Session<S, D, T, C>
where
    S: TimeSource,
    D: DisplaySurface,
    T: TriggerChannel,
    C: CancellationSource,
{
    display: D,
    trigger: T,
    cancel: C,
    data: ExperimentData,
    global_clock: Clock<S>,
    routine_clock: Clock<S>,
    driver: FrameLoopDriver,
    routines: Vec<Routine>,
    trials: TrialIterator,
    measure_frames: usize,
    finished: bool,
}

impl<S, D, T, C> Session<S, D, T, C>
where
    S: TimeSource,
    D: DisplaySurface,
    T: TriggerChannel,
    C: CancellationSource,
{
    /// Registers every component's stimulus with `display`. Nothing is drawn
    /// and no code is sent until [`Session::run`].
    pub fn new(
        config: &ExperimentConfig,
        order: Order,
        source: S,
        mut display: D,
        trigger: T,
        cancel: C,
    ) -> Result<Self, SessionError> {
        let mut routines = Vec::with_capacity(config.routines.len());
        for spec in &config.routines {
            let ids = spec
                .components
                .iter()
                .map(|c| display.register(&c.name, &c.stimulus))
                .collect::<Result<Vec<StimulusId>, _>>()?;
            routines.push(Routine::new(spec, &ids));
        }

        let mut data = ExperimentData::new();
        data.set_extra_info("expName", Value::from(config.exp_name.as_str()));

        Ok(Self {
            display,
            trigger,
            cancel,
            data,
            global_clock: Clock::new(source.clone()),
            routine_clock: Clock::new(source),
            driver: FrameLoopDriver::new(config.frame_tolerance, config.nominal_frame_duration()),
            routines,
            trials: TrialIterator::new(config.repetitions, config.conditions.clone(), order),
            measure_frames: config.measure_frames,
            finished: false,
        })
    }

    pub fn data(&self) -> &ExperimentData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ExperimentData {
        &mut self.data
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn trigger(&self) -> &T {
        &self.trigger
    }

    pub fn frame_duration(&self) -> f64 {
        self.driver.nominal_frame()
    }

    /// Flips `measure_frames` blank frames and derives the frame duration
    /// from their spacing. Keeps the nominal duration when the measurement
    /// is missing or too noisy.
    pub fn measure_frame_rate(&mut self) -> Result<Option<f64>, SessionError> {
        if self.measure_frames == 0 {
            self.data.set_extra_info("frameRate", Value::Null);
            return Ok(None);
        }
        self.driver.clear_intervals();
        for _ in 0..self.measure_frames {
            self.driver.flip(&mut self.display, &mut self.data, &self.global_clock)?;
        }
        let rate = self.driver.intervals().measured_rate(MAX_MEASURE_JITTER_PCT);
        match rate {
            Some(rate) if rate.round() > 0.0 => {
                self.driver.set_nominal_frame(1.0 / rate.round());
                self.data.set_extra_info("frameRate", Value::from(rate));
                info!(rate, frame_duration = self.driver.nominal_frame(), "measured frame rate");
            }
            _ => {
                self.data.set_extra_info("frameRate", Value::Null);
                warn!(
                    frame_duration = self.driver.nominal_frame(),
                    "could not measure frame rate, using nominal"
                );
            }
        }
        Ok(rate)
    }

    /// Runs all trials, then closes the trigger and hands the data to
    /// `shutdown`. Both happen exactly once, on completion, on escape, and
    /// on a display failure.
    pub fn run<P: SessionShutdown>(&mut self, shutdown: &mut P) -> Result<SessionOutcome, SessionError> {
        if self.finished {
            return Err(SessionError::AlreadyRun);
        }
        self.finished = true;

        let span = info_span!("session", trials = self.trials.total());
        let _enter = span.enter();

        let result = self.measure_frame_rate().and_then(|_| self.run_trials());

        if let Ok(SessionOutcome::Completed { .. }) = result {
            // resolves the stop timestamps of the last routine
            if let Err(e) = self.driver.flip(&mut self.display, &mut self.data, &self.global_clock) {
                warn!(error = %e, "final flip failed");
            }
        }
        for routine in &self.routines {
            for c in routine.components() {
                self.display.request_draw_disable(c.stimulus());
            }
        }
        self.trigger.close();
        self.data.close_open_entry();

        match &result {
            Ok(outcome) => info!(?outcome, "session ended"),
            Err(e) => error!(error = %e, "session failed"),
        }
        shutdown
            .persist_and_exit(&self.data)
            .map_err(SessionError::Persist)?;
        result
    }

    fn run_trials(&mut self) -> Result<SessionOutcome, SessionError> {
        self.routine_clock.reset();
        let mut completed = 0;

        while let Some(trial) = self.trials.next() {
            let span = info_span!("trial", n = trial.n, rep = trial.rep);
            let _enter = span.enter();

            self.data.add_data("trials.thisRepN", Value::from(trial.rep));
            self.data.add_data("trials.thisTrialN", Value::from(trial.trial_in_rep));
            self.data.add_data("trials.thisN", Value::from(trial.n));
            self.data.add_data("trials.thisIndex", Value::from(trial.index));
            for (name, value) in &trial.conditions {
                let value = serde_json::to_value(value).unwrap_or(Value::Null);
                self.data.add_data(name, value);
            }

            for routine in &mut self.routines {
                let mut stage = Stage {
                    display: &mut self.display,
                    trigger: &mut self.trigger,
                    cancel: &mut self.cancel,
                    recorder: &mut self.data,
                    routine_clock: &mut self.routine_clock,
                    global_clock: &self.global_clock,
                };
                if let RoutineOutcome::Cancelled { frame } = self.driver.run(routine, &mut stage)? {
                    warn!(routine = routine.name(), frame, completed, "session cancelled");
                    return Ok(SessionOutcome::Cancelled {
                        trials_completed: completed,
                    });
                }
            }

            self.data.next_entry();
            completed += 1;
        }
        Ok(SessionOutcome::Completed { trials: completed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::CancelFlag;
    use crate::simulated::SimulatedDisplay;
    use vepstim_timing::ManualSource;
    use vepstim_trigger::RecordingTrigger;

    #[derive(Default)]
    struct Counting {
        calls: usize,
        rows: usize,
    }

    impl SessionShutdown for Counting {
        fn persist_and_exit(&mut self, data: &ExperimentData) -> std::io::Result<()> {
            self.calls += 1;
            self.rows = data.entries().len();
            Ok(())
        }
    }

    fn config(reps: usize) -> ExperimentConfig {
        ExperimentConfig {
            repetitions: reps,
            measure_frames: 0,
            ..ExperimentConfig::default()
        }
    }

    type TestSession = Session<ManualSource, SimulatedDisplay, RecordingTrigger<ManualSource>, CancelFlag>;

    fn session(config: &ExperimentConfig, src: &ManualSource) -> TestSession {
        Session::new(
            config,
            Order::Sequential,
            src.clone(),
            SimulatedDisplay::new(src.clone(), 60.0),
            RecordingTrigger::new(src.clone()),
            CancelFlag::new(),
        )
        .unwrap()
    }

    #[test]
    fn completed_session_persists_every_trial() {
        let src = ManualSource::new();
        let mut s = session(&config(2), &src);
        let mut shutdown = Counting::default();
        let out = s.run(&mut shutdown).unwrap();
        assert_eq!(out, SessionOutcome::Completed { trials: 2 });
        assert_eq!(shutdown.calls, 1);
        assert_eq!(shutdown.rows, 2);
        assert!(s.trigger().is_closed());
        assert_eq!(s.data().pending_flip_labels(), 0);
        let row = &s.data().entries()[1];
        assert_eq!(row["trials.thisN"], 1);
        assert!(row.contains_key("grating1.stopped"));
        assert!(row.contains_key("phase2.started"));
    }

    #[test]
    fn second_run_is_rejected() {
        let src = ManualSource::new();
        let mut s = session(&config(1), &src);
        let mut shutdown = Counting::default();
        s.run(&mut shutdown).unwrap();
        assert!(matches!(s.run(&mut shutdown), Err(SessionError::AlreadyRun)));
        assert_eq!(shutdown.calls, 1);
    }

    #[test]
    fn measured_rate_sets_frame_duration() {
        let src = ManualSource::new();
        let cfg = ExperimentConfig {
            measure_frames: 30,
            ..config(1)
        };
        let mut s = Session::new(
            &cfg,
            Order::Sequential,
            src.clone(),
            SimulatedDisplay::new(src.clone(), 100.0),
            NullTrigger::default(),
            CancelFlag::new(),
        )
        .unwrap();
        let rate = s.measure_frame_rate().unwrap().unwrap();
        assert!((rate - 100.0).abs() < 1e-6);
        assert!((s.frame_duration() - 0.01).abs() < 1e-12);
        assert_eq!(s.display().flip_count(), 30);
    }

    #[test]
    fn noisy_measurement_keeps_nominal() {
        let src = ManualSource::new();
        let cfg = ExperimentConfig {
            measure_frames: 30,
            ..config(1)
        };
        let display = SimulatedDisplay::new(src.clone(), 60.0).with_jitter(vec![0.0, 0.006]);
        let mut s = Session::new(
            &cfg,
            Order::Sequential,
            src,
            display,
            NullTrigger::default(),
            CancelFlag::new(),
        )
        .unwrap();
        assert_eq!(s.measure_frame_rate().unwrap(), None);
        assert!((s.frame_duration() - 1.0 / 60.0).abs() < 1e-12);
        assert_eq!(s.data().extra_info()["frameRate"], Value::Null);
    }

    #[test]
    fn no_device_opens_null_trigger() {
        let cfg = TriggerConfig {
            device: None,
            baud: 9600,
        };
        let mut t = open_trigger(&cfg).unwrap();
        t.send(1).unwrap();
    }

    #[test]
    fn missing_device_is_unavailable() {
        let cfg = TriggerConfig {
            device: Some("/nonexistent/tty.vep".into()),
            baud: 9600,
        };
        assert!(matches!(
            open_trigger(&cfg),
            Err(SessionError::Trigger(TriggerError::DeviceUnavailable { .. }))
        ));
    }

    #[test]
    fn remeasuring_ignores_earlier_flips() {
        let src = ManualSource::new();
        let cfg = ExperimentConfig {
            measure_frames: 20,
            ..config(1)
        };
        let mut s = Session::new(
            &cfg,
            Order::Sequential,
            src.clone(),
            SimulatedDisplay::new(src.clone(), 100.0),
            NullTrigger::default(),
            CancelFlag::new(),
        )
        .unwrap();
        s.measure_frame_rate().unwrap();
        src.advance(std::time::Duration::from_secs(1));
        let rate = s.measure_frame_rate().unwrap().unwrap();
        assert!((rate - 100.0).abs() < 1e-6);
    }

    #[test]
    fn component_times_share_routine_time_base() {
        let src = ManualSource::new();
        src.advance(std::time::Duration::from_millis(300));
        let mut s = session(&config(1), &src);
        s.run(&mut Counting::default()).unwrap();
        let row = &s.data().entries()[0];
        let phase = row["phase1.started"].as_f64().unwrap();
        let grating = row["grating1.started"].as_f64().unwrap();
        assert!((grating - phase).abs() < 0.05, "phase1 {phase} grating1 {grating}");
        let stopped = row["grating1.stopped"].as_f64().unwrap();
        assert!((stopped - grating - 0.5).abs() < 0.05, "grating1.stopped {stopped}");
    }

    #[test]
    fn display_failure_still_closes_and_persists() {
        let src = ManualSource::new();
        let display = SimulatedDisplay::new(src.clone(), 60.0).failing_after(10);
        let mut s = Session::new(
            &config(2),
            Order::Sequential,
            src.clone(),
            display,
            RecordingTrigger::new(src.clone()),
            CancelFlag::new(),
        )
        .unwrap();
        let log = s.trigger().log();
        let mut shutdown = Counting::default();

        let err = s.run(&mut shutdown).unwrap_err();

        assert!(matches!(err, SessionError::Display(DisplayError::Present(_))));
        assert_eq!(s.display().flip_count(), 10);
        assert_eq!(log.close_calls(), 1);
        assert_eq!(shutdown.calls, 1);
        assert_eq!(shutdown.rows, 1);
    }
}
