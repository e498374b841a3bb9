//! Parallel execution of many trajectories.
//!
//! Trajectories are independent: each owns its population and random
//! streams and shares only the read-only field bundle and event schedule.
//! They run on a bounded `rayon` pool in batches of `threads`; the stop flag is
//! checked between batches, so a dispatched batch always runs to completion or
//! times out. Seeds are drawn in trajectory order from the master seed, making
//! every trajectory reproducible whatever the scheduling.
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::StiError;
use crate::execution_stats::{log_execution_statistics, ExecutionProfilingCollector};
use crate::parameters::Fields;
use crate::state::PopulationState;
use crate::trajectory::{EventSchedule, Trajectory, TrajectoryOutcome};
use crate::Day;

/// Two days.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(2 * 24 * 60 * 60);

#[derive(Clone, Debug)]
pub struct BatchOptions {
    pub trajectories: usize,
    pub threads: usize,
    pub master_seed: u64,
    /// Keep every snapshot of every trajectory in the result.
    pub keep_snapshots: bool,
    /// Time allowed for one batch of `threads` trajectories.
    pub timeout: Duration,
    /// Directory receiving one snapshot CSV per trajectory.
    pub output_dir: Option<PathBuf>,
    /// A state every trajectory starts from instead of running burn-in.
    pub initial_state: Option<Arc<PopulationState>>,
    pub stop: Arc<AtomicBool>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            trajectories: 1,
            threads: 1,
            master_seed: 0,
            keep_snapshots: false,
            timeout: DEFAULT_BATCH_TIMEOUT,
            output_dir: None,
            initial_state: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl BatchOptions {
    /// Asks the batch to stop before dispatching its next batch.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Per-site targets a calibration compares end-of-run results against.
/// Prevalence is the infected proportion; incidence is new infections in the
/// last window as a proportion of the population.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Targets {
    pub prevalence: [Option<f64>; 3],
    pub incidence: [Option<f64>; 3],
}

#[derive(Debug, Default)]
pub struct BatchResult {
    /// Completed trajectories, in trajectory order.
    pub outcomes: Vec<TrajectoryOutcome>,
    /// Trajectories that failed, each a `StiError::TrajectoryError`.
    pub failures: Vec<StiError>,
    /// Trajectories whose batch timed out before they reported.
    pub timed_out: Vec<usize>,
    /// Trajectories never dispatched because a stop was requested.
    pub skipped: Vec<usize>,
}

impl BatchResult {
    /// Infected individuals per site at the end of each completed trajectory.
    #[must_use]
    pub fn end_counts(&self) -> Vec<[u64; 3]> {
        self.outcomes.iter().map(|outcome| outcome.end_infected).collect()
    }

    #[must_use]
    pub fn extinction_days(&self) -> Vec<Option<Day>> {
        self.outcomes
            .iter()
            .map(|outcome| outcome.extinction_day)
            .collect()
    }

    /// Sum of squared differences from `targets`, per completed trajectory.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn residuals(&self, targets: &Targets) -> Vec<f64> {
        self.outcomes
            .iter()
            .map(|outcome| {
                let prevalence = outcome.end_prevalence();
                let size = outcome.population_size.max(1) as f64;
                let mut residual = 0.0;
                for site in 0..3 {
                    if let Some(target) = targets.prevalence[site] {
                        residual += (prevalence[site] - target).powi(2);
                    }
                    if let Some(target) = targets.incidence[site] {
                        residual += (outcome.end_incidence[site] as f64 / size - target).powi(2);
                    }
                }
                residual
            })
            .collect()
    }
}

/// Per-trajectory seeds drawn in order from `master_seed`.
#[must_use]
pub fn trajectory_seeds(master_seed: u64, count: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(master_seed);
    (0..count).map(|_| rng.next_u64()).collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "trajectory panicked".to_string()
    }
}

struct Job {
    fields: Arc<Fields>,
    schedule: Arc<EventSchedule>,
    initial_state: Option<Arc<PopulationState>>,
    output_dir: Option<PathBuf>,
    keep_snapshots: bool,
}

/// Runs trajectory `id`, turning errors and panics into a
/// `StiError::TrajectoryError` carrying the simulated day.
fn run_trajectory(id: usize, seed: u64, job: &Job) -> Result<TrajectoryOutcome, StiError> {
    let mut trajectory = Trajectory::with_id(id, seed);
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        trajectory.configure(Arc::clone(&job.fields))?;
        match &job.initial_state {
            Some(state) => trajectory.import_state(state)?,
            None => trajectory.initialise()?,
        }
        if let Some(dir) = &job.output_dir {
            trajectory.add_report(&dir.join(format!("trajectory_{id}.csv")))?;
        }
        trajectory.run(&job.schedule)
    }));
    let message = match result {
        Ok(Ok(mut outcome)) => {
            if !job.keep_snapshots {
                outcome.snapshots.clear();
            }
            return Ok(outcome);
        }
        Ok(Err(error)) => error.to_string(),
        Err(payload) => panic_message(payload.as_ref()),
    };
    let day = trajectory.context().get_current_day();
    error!("trajectory {id} (seed {seed}) failed at day {day}: {message}");
    Err(StiError::TrajectoryError {
        trajectory: id,
        day,
        message,
    })
}

/// Runs `options.trajectories` trajectories of `fields` with `schedule`.
///
/// # Errors
///
/// Returns an error if the fields or schedule do not validate or the thread
/// pool cannot be built. Failures of individual trajectories are collected
/// in the result instead.
pub fn run_batch(
    fields: Arc<Fields>,
    schedule: &EventSchedule,
    options: &BatchOptions,
) -> Result<BatchResult, StiError> {
    fields.validate()?;
    schedule.validate(&fields)?;
    let threads = options.threads.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|index| format!("trajectory-worker-{index}"))
        .build()
        .map_err(|error| StiError::PoolError(error.to_string()))?;

    let job = Arc::new(Job {
        fields: Arc::clone(&fields),
        schedule: Arc::new(schedule.clone()),
        initial_state: options.initial_state.clone(),
        output_dir: options.output_dir.clone(),
        keep_snapshots: options.keep_snapshots,
    });
    let seeds = trajectory_seeds(options.master_seed, options.trajectories);
    info!(
        "running {} trajectories on {threads} threads from master seed {}",
        options.trajectories, options.master_seed
    );

    let mut collector = ExecutionProfilingCollector::new();
    let mut result = BatchResult::default();
    let ids: Vec<usize> = (0..seeds.len()).collect();
    for batch in ids.chunks(threads) {
        if options.stop.load(Ordering::SeqCst) {
            warn!("stop requested; skipping {} trajectories", seeds.len() - batch[0]);
            result.skipped.extend(batch[0]..seeds.len());
            break;
        }
        let (sender, receiver) = mpsc::channel();
        for &id in batch {
            let sender = sender.clone();
            let job = Arc::clone(&job);
            let seed = seeds[id];
            pool.spawn(move || {
                let outcome = run_trajectory(id, seed, &job);
                // The receiver is gone if the batch timed out.
                let _ = sender.send((id, outcome));
            });
        }
        drop(sender);

        let deadline = Instant::now() + options.timeout;
        let mut pending: Vec<usize> = batch.to_vec();
        while !pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(remaining) {
                Ok((id, outcome)) => {
                    pending.retain(|pending_id| *pending_id != id);
                    match outcome {
                        Ok(outcome) => result.outcomes.push(outcome),
                        Err(failure) => result.failures.push(failure),
                    }
                }
                Err(_) => {
                    error!(
                        "batch of trajectories {:?} timed out after {}",
                        pending,
                        humantime::format_duration(options.timeout)
                    );
                    result.timed_out.append(&mut pending);
                }
            }
        }
        collector.refresh();
    }
    result.outcomes.sort_by_key(|outcome| outcome.trajectory);

    let person_days = result
        .outcomes
        .iter()
        .map(|outcome| {
            let days = u64::from(outcome.snapshots.last().map_or(0, |snapshot| snapshot.day));
            outcome.population_size as u64 * days
        })
        .sum();
    log_execution_statistics(&collector.compute_final_statistics(result.outcomes.len(), person_days));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use crate::parameters::TrajectorySettings;
    use crate::people::Site;

    fn small_fields() -> Arc<Fields> {
        Arc::new(Fields {
            population_size: 200,
            trajectory: TrajectorySettings {
                burn_in_days: 0,
                windows: 3,
                window_length: 10,
                cumulative: false,
            },
            ..Fields::default()
        })
    }

    fn schedule() -> EventSchedule {
        let mut schedule = EventSchedule::new();
        schedule.schedule_infection_introduction(
            0,
            Site::A,
            Classifier::Everyone,
            20,
            None,
            Vec::new(),
        );
        schedule
    }

    #[test]
    fn seeds_depend_only_on_master_seed() {
        assert_eq!(trajectory_seeds(7, 5), trajectory_seeds(7, 5));
        assert_eq!(trajectory_seeds(7, 5)[..3], trajectory_seeds(7, 3)[..]);
        assert_ne!(trajectory_seeds(7, 2), trajectory_seeds(8, 2));
    }

    #[test]
    fn results_do_not_depend_on_thread_count() {
        let options = BatchOptions {
            trajectories: 4,
            threads: 1,
            master_seed: 99,
            keep_snapshots: true,
            ..BatchOptions::default()
        };
        let serial = run_batch(small_fields(), &schedule(), &options).unwrap();
        let parallel = run_batch(
            small_fields(),
            &schedule(),
            &BatchOptions {
                threads: 3,
                ..options
            },
        )
        .unwrap();
        assert_eq!(serial.outcomes.len(), 4);
        assert_eq!(serial.outcomes, parallel.outcomes);
        assert!(serial.failures.is_empty());
    }

    #[test]
    fn snapshots_are_dropped_unless_kept() {
        let options = BatchOptions {
            trajectories: 2,
            ..BatchOptions::default()
        };
        let result = run_batch(small_fields(), &schedule(), &options).unwrap();
        assert!(result.outcomes.iter().all(|outcome| outcome.snapshots.is_empty()));
        assert_eq!(result.end_counts().len(), 2);
        assert_eq!(result.extinction_days().len(), 2);
    }

    #[test]
    fn stop_flag_skips_remaining_batches() {
        let options = BatchOptions {
            trajectories: 3,
            ..BatchOptions::default()
        };
        options.request_stop();
        let result = run_batch(small_fields(), &schedule(), &options).unwrap();
        assert!(result.outcomes.is_empty());
        assert_eq!(result.skipped, vec![0, 1, 2]);
    }

    #[test]
    fn failing_trajectory_is_reported() {
        use crate::state::export_state;

        // A state of the wrong size makes every import fail.
        let mut trajectory = Trajectory::new(1);
        trajectory
            .configure(Arc::new(Fields {
                population_size: 10,
                ..Fields::default()
            }))
            .unwrap();
        trajectory.initialise().unwrap();
        let state = export_state(trajectory.context());

        let options = BatchOptions {
            trajectories: 2,
            initial_state: Some(Arc::new(state)),
            ..BatchOptions::default()
        };
        let result = run_batch(small_fields(), &schedule(), &options).unwrap();
        assert!(result.outcomes.is_empty());
        assert_eq!(result.failures.len(), 2);
        assert!(matches!(
            result.failures[0],
            StiError::TrajectoryError { trajectory: 0, .. }
        ));
    }

    #[test]
    fn residuals_measure_distance_from_targets() {
        let outcome = TrajectoryOutcome {
            trajectory: 0,
            seed: 0,
            state: crate::trajectory::TrajectoryState::Complete,
            population_size: 100,
            end_infected: [10, 0, 5],
            end_incidence: [2, 0, 0],
            extinction_day: None,
            snapshots: Vec::new(),
        };
        let result = BatchResult {
            outcomes: vec![outcome],
            ..BatchResult::default()
        };
        let targets = Targets {
            prevalence: [Some(0.1), None, Some(0.0)],
            incidence: [Some(0.0), None, None],
        };
        let residuals = result.residuals(&targets);
        assert_eq!(residuals.len(), 1);
        assert!((residuals[0] - (0.05f64.powi(2) + 0.02f64.powi(2))).abs() < 1e-12);
    }
}
