use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use ixa_sti::classifier::Classifier;
use ixa_sti::infection::ContextInfectionExt;
use ixa_sti::parameters::{Fields, TrajectorySettings};
use ixa_sti::people::{ContextPeopleExt, Site};
use ixa_sti::strain::StrainMask;
use ixa_sti::trajectory::{EventSchedule, Trajectory};

static POPULATION: usize = 10_000;
static SEED: u64 = 123;
static DAYS: u32 = 30;

fn fields() -> Arc<Fields> {
    Arc::new(Fields {
        population_size: POPULATION,
        trajectory: TrajectorySettings {
            burn_in_days: 0,
            windows: 1,
            window_length: DAYS,
            cumulative: false,
        },
        ..Fields::default()
    })
}

/// A population with partnerships under way and 5% of people infected.
fn seeded_trajectory() -> Trajectory {
    let mut trajectory = Trajectory::new(SEED);
    trajectory.configure(fields()).expect("default fields are valid");
    trajectory.initialise().expect("fields are configured");
    let context = trajectory.context_mut();
    for person_id in context.person_ids().step_by(20).collect::<Vec<_>>() {
        context.infect_site(person_id, Site::A, StrainMask::single(0), None);
    }
    for _ in 0..DAYS {
        trajectory.advance_day();
    }
    trajectory
}

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("daily step", |bencher| {
        bencher.iter_batched_ref(
            seeded_trajectory,
            |trajectory| black_box(trajectory.advance_day()),
            BatchSize::LargeInput,
        );
    });

    let mut schedule = EventSchedule::new();
    schedule.schedule_infection_introduction(
        0,
        Site::A,
        Classifier::Everyone,
        POPULATION / 20,
        None,
        Vec::new(),
    );
    c.bench_function("30 day window", |bencher| {
        bencher.iter_batched(
            || {
                let mut trajectory = Trajectory::new(SEED);
                trajectory.configure(fields()).expect("default fields are valid");
                trajectory.initialise().expect("fields are configured");
                trajectory
            },
            |mut trajectory| black_box(trajectory.run(&schedule)),
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(sti_benches, criterion_benchmark);
criterion_main!(sti_benches);
