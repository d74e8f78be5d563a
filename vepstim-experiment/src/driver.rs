use serde_json::Value;
use tracing::{debug, info, info_span, warn};
use vepstim_core::{FrameTime, Routine, Schedulable, Status, Transition};
use vepstim_timing::{Clock, FrameIntervals, TimeSource};
use vepstim_trigger::TriggerChannel;

use crate::display::{CancellationSource, DisplayError, DisplaySurface};
use crate::recorder::DataRecorder;

/// How a routine's frame loop ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoutineOutcome {
    Completed {
        frames: u64,
        force_ended: bool,
        /// Routine clock when the loop exited, before the non-slip adjustment.
        elapsed: f64,
    },
    /// Escape was seen while preparing `frame`. The session must shut down.
    Cancelled { frame: u64 },
}

/// Everything a routine borrows from its session while it runs.
pub struct Stage<'a, S, D, T, C, R>
where
    S: TimeSource,
    D: DisplaySurface,
    T: TriggerChannel,
    C: CancellationSource,
    R: DataRecorder,
{
    pub display: &'a mut D,
    pub trigger: &'a mut T,
    pub cancel: &'a mut C,
    pub recorder: &'a mut R,
    pub routine_clock: &'a mut Clock<S>,
    pub global_clock: &'a Clock<S>,
}

/// Runs one routine at a time, one display refresh per tick.
#[derive(Debug)]
pub struct FrameLoopDriver {
    frame_tolerance: f64,
    nominal_frame: f64,
    last_flip: Option<f64>,
    prediction_warned: bool,
    intervals: FrameIntervals,
    started: Vec<usize>,
    finished: Vec<usize>,
}

impl FrameLoopDriver {
    pub fn new(frame_tolerance: f64, nominal_frame: f64) -> Self {
        Self {
            frame_tolerance,
            nominal_frame,
            last_flip: None,
            prediction_warned: false,
            intervals: FrameIntervals::default(),
            started: Vec::new(),
            finished: Vec::new(),
        }
    }

    pub fn set_nominal_frame(&mut self, nominal_frame: f64) {
        self.nominal_frame = nominal_frame;
    }

    pub fn nominal_frame(&self) -> f64 {
        self.nominal_frame
    }

    pub fn intervals(&self) -> &FrameIntervals {
        &self.intervals
    }

    /// Drops the flip intervals seen so far, e.g. before a fresh frame rate
    /// measurement.
    pub fn clear_intervals(&mut self) {
        self.intervals.clear();
    }

    /// Absolute time of the next refresh, falling back to the nominal frame
    /// duration when the display cannot tell.
    pub fn predict<D: DisplaySurface>(&mut self, display: &D, now: f64) -> f64 {
        match display.predict_next_refresh() {
            Ok(t) => t,
            Err(e) => {
                if !self.prediction_warned {
                    warn!(
                        error = %e,
                        nominal_frame = self.nominal_frame,
                        "using nominal frame duration"
                    );
                    self.prediction_warned = true;
                }
                match self.last_flip {
                    Some(last) => (last + self.nominal_frame).max(now),
                    None => now + self.nominal_frame,
                }
            }
        }
    }

    /// Flips outside of any routine, e.g. for warm-up or to resolve pending
    /// flip timestamps before saving. Returns the source time of the flip;
    /// the recorder gets it on `global_clock`.
    pub fn flip<S, D, R>(
        &mut self,
        display: &mut D,
        recorder: &mut R,
        global_clock: &Clock<S>,
    ) -> Result<f64, DisplayError>
    where
        S: TimeSource,
        D: DisplaySurface,
        R: DataRecorder,
    {
        let shown = display.flip()?;
        self.intervals.record_flip(shown);
        self.last_flip = Some(shown);
        recorder.on_flip(global_clock.at(shown));
        Ok(shown)
    }

    /// Runs `routine` for its full target duration (or until a component
    /// force-ends it), then applies non-slip timing to the routine clock.
    pub fn run<S, D, T, C, R>(
        &mut self,
        routine: &mut Routine,
        stage: &mut Stage<'_, S, D, T, C, R>,
    ) -> Result<RoutineOutcome, DisplayError>
    where
        S: TimeSource,
        D: DisplaySurface,
        T: TriggerChannel,
        C: CancellationSource,
        R: DataRecorder,
    {
        let span = info_span!("routine", name = routine.name());
        let _enter = span.enter();

        routine.reset();
        let source = stage.routine_clock.source().clone();
        let target = routine.target_duration();
        let now = source.now();
        let time_to_first_frame = self.predict(&*stage.display, now) - now;

        let t0 = stage.routine_clock.elapsed();
        stage
            .recorder
            .add_data(&format!("{}.started", routine.name()), Value::from(stage.global_clock.at(now)));
        info!(t0, target, time_to_first_frame, "routine started");

        let mut frame: u64 = 0;
        let mut onset_sent = false;
        let mut t = t0;

        while t < target {
            let predicted = self.predict(&*stage.display, source.now());
            let at = FrameTime {
                frame,
                t,
                t_flip: stage.routine_clock.at(predicted),
                t_flip_global: stage.global_clock.at(predicted),
            };

            self.started.clear();
            self.finished.clear();
            for (i, c) in routine.components_mut().iter_mut().enumerate() {
                match c.update(&at, self.frame_tolerance) {
                    Some(Transition::Started) => self.started.push(i),
                    Some(Transition::Finished) => self.finished.push(i),
                    None => {}
                }
            }

            if stage.cancel.poll_escape_requested() {
                // nothing of this tick reaches the trigger or the screen
                warn!(frame, "escape pressed, aborting session");
                for c in routine.components_mut() {
                    if c.is_draw_enabled() {
                        c.set_draw_enabled(false);
                        stage.display.request_draw_disable(c.stimulus());
                    }
                }
                return Ok(RoutineOutcome::Cancelled { frame });
            }

            // The onset code must leave before the stimulus is queued for this flip.
            if !onset_sent && !self.started.is_empty() {
                send_code(stage.trigger, routine.trigger_code(), routine.name());
                onset_sent = true;
            }
            let mut force_end = false;
            for &i in &self.started {
                let c = &routine.components()[i];
                debug!(component = c.name(), frame, t_flip = at.t_flip, "component started");
                stage
                    .recorder
                    .timestamp_on_flip(&format!("{}.started", c.name()));
                stage.display.request_draw_enable(c.stimulus());
            }
            for &i in &self.finished {
                let c = &routine.components()[i];
                debug!(component = c.name(), frame, t_flip = at.t_flip, "component finished");
                stage
                    .recorder
                    .timestamp_on_flip(&format!("{}.stopped", c.name()));
                stage.display.request_draw_disable(c.stimulus());
                force_end |= c.ends_routine();
            }

            if force_end {
                routine.force_end();
                break;
            }

            self.flip(stage.display, stage.recorder, stage.global_clock)?;
            frame += 1;
            t = stage.routine_clock.elapsed();
        }

        let elapsed = stage.routine_clock.elapsed();
        let last_frame = frame;
        for c in routine.components_mut() {
            if c.status() == Status::Finished {
                continue;
            }
            if c.force_finish(last_frame, elapsed) {
                stage
                    .recorder
                    .timestamp_on_flip(&format!("{}.stopped", c.name()));
                stage.display.request_draw_disable(c.stimulus());
            }
        }
        send_code(stage.trigger, routine.stop_code(), routine.name());

        let force_ended = routine.is_force_ended();
        if force_ended {
            stage.routine_clock.reset();
        } else {
            stage.routine_clock.add_offset(-target);
        }
        info!(frames = frame, elapsed, force_ended, "routine ended");
        Ok(RoutineOutcome::Completed {
            frames: frame,
            force_ended,
            elapsed,
        })
    }
}

fn send_code<T: TriggerChannel>(trigger: &mut T, code: u8, routine: &str) {
    if let Err(e) = trigger.send(code) {
        warn!(routine, code, error = %e, "trigger send failed");
    }
}
