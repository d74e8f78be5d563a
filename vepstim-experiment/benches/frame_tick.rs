use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use pprof::criterion::{Output, PProfProfiler};
use std::time::Duration;

use vepstim_core::{ComponentSpec, FrameTime, Routine, RoutineSpec, StimulusComponent, StimulusId, StimulusKind};
use vepstim_experiment::{
    CancelFlag, DisplaySurface, ExperimentData, FrameLoopDriver, SimulatedDisplay, Stage,
};
use vepstim_timing::{Clock, ManualSource};
use vepstim_trigger::NullTrigger;

/// Routine with `n` overlapping components, registered on `display`.
fn prepare_routine(display: &mut SimulatedDisplay, n: usize) -> Routine {
    let spec = RoutineSpec {
        name: "phase".into(),
        duration: 0.5,
        trigger_code: 1,
        stop_code: b'0',
        components: (0..n)
            .map(|i| ComponentSpec {
                name: format!("stim{i}"),
                stimulus: if i % 2 == 0 {
                    StimulusKind::grating(0.0)
                } else {
                    StimulusKind::fixation()
                },
                onset: 0.01 * i as f64,
                duration: 0.3,
                ends_routine: false,
            })
            .collect(),
    };
    let ids: Vec<StimulusId> = spec
        .components
        .iter()
        .map(|c| display.register(&c.name, &c.stimulus).unwrap())
        .collect();
    Routine::new(&spec, &ids)
}

/// One state machine step, no display involved.
pub fn bench_component_update(c: &mut Criterion) {
    let spec = ComponentSpec {
        name: "grating1".into(),
        stimulus: StimulusKind::grating(0.0),
        onset: 0.0,
        duration: 0.5,
        ends_routine: false,
    };
    c.bench_function("component_update", |b| {
        let mut comp = StimulusComponent::new(&spec, StimulusId(0));
        let mut frame = 0u64;
        b.iter(|| {
            let t = frame as f64 / 60.0;
            let at = FrameTime {
                frame,
                t,
                t_flip: t + 1.0 / 60.0,
                t_flip_global: t + 1.0 / 60.0,
            };
            black_box(comp.update(black_box(&at), 0.001));
            frame += 1;
            if frame == 40 {
                comp.reset();
                frame = 0;
            }
        });
    });
}

/// Whole 0.5 s routine on the simulated display: ~30 ticks per iteration.
pub fn bench_routine(c: &mut Criterion) {
    let mut group = c.benchmark_group("routine_run");
    group
        .sample_size(50)
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(2));

    for n in [2usize, 8, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || {
                    let src = ManualSource::new();
                    let mut display = SimulatedDisplay::new(src.clone(), 60.0);
                    let routine = prepare_routine(&mut display, n);
                    (src, display, routine)
                },
                |(src, mut display, mut routine)| {
                    let mut trigger = NullTrigger::default();
                    let mut data = ExperimentData::new();
                    let mut cancel = CancelFlag::new();
                    let mut routine_clock = Clock::new(src.clone());
                    let global_clock = Clock::new(src);
                    let mut driver = FrameLoopDriver::new(0.001, 1.0 / 60.0);
                    let mut stage = Stage {
                        display: &mut display,
                        trigger: &mut trigger,
                        cancel: &mut cancel,
                        recorder: &mut data,
                        routine_clock: &mut routine_clock,
                        global_clock: &global_clock,
                    };
                    black_box(driver.run(&mut routine, &mut stage).unwrap());
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .with_profiler(PProfProfiler::new(100, Output::Flamegraph(None)))
        .confidence_level(0.95)
        .noise_threshold(0.02)
        .significance_level(0.05);
    targets = bench_component_update, bench_routine
}

criterion_main!(benches);
