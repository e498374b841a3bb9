use std::fs::{self, create_dir_all};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Command, FromArgMatches as _};
use log::{info, LevelFilter};

use crate::batch::{run_batch, BatchOptions, BatchResult, DEFAULT_BATCH_TIMEOUT};
use crate::error::StiError;
use crate::log::set_log_level;
use crate::parameters::{load_fields_from_json, Fields};
use crate::state::{read_state, write_state};
use crate::trajectory::{EventSchedule, Trajectory};

/// Default cli arguments for the ixa-sti runner
#[derive(Args, Debug, Clone)]
pub struct BaseArgs {
    /// Master random seed from which the trajectory seeds are drawn
    #[arg(short, long, default_value = "0")]
    pub random_seed: u64,

    /// Optional path for a JSON field bundle; defaults are used otherwise
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Optional path for a JSON event schedule
    #[arg(short, long)]
    pub schedule: Option<PathBuf>,

    /// Optional directory for snapshot reports and the outcome summary
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Number of trajectories to run
    #[arg(short = 'n', long, default_value = "1")]
    pub trajectories: usize,

    /// Number of trajectories run concurrently
    #[arg(short, long, default_value = "1")]
    pub threads: usize,

    /// Start every trajectory from a saved population state instead of burn-in
    #[arg(long)]
    pub import_state: Option<PathBuf>,

    /// Burn in one population with the master seed and save its state;
    /// trajectories then start from it
    #[arg(long)]
    pub export_state: Option<PathBuf>,

    /// Keep every snapshot in the outcome summary
    #[arg(long)]
    pub keep_snapshots: bool,

    /// Hours allowed for each batch of trajectories
    #[arg(long)]
    pub timeout_hours: Option<u64>,

    /// Enable logging at the given level (error, warn, info, debug, trace)
    #[arg(long, default_value = "off")]
    pub log_level: String,
}

impl Default for BaseArgs {
    fn default() -> Self {
        BaseArgs {
            random_seed: 0,
            config: None,
            schedule: None,
            output_dir: None,
            trajectories: 1,
            threads: 1,
            import_state: None,
            export_state: None,
            keep_snapshots: false,
            timeout_hours: None,
            log_level: "off".to_string(),
        }
    }
}

#[derive(Args)]
pub struct PlaceholderCustom {}

fn create_cli() -> Command {
    let cli = Command::new("ixa-sti");
    BaseArgs::augment_args(cli)
}

/// Runs a batch with custom cli arguments.
///
/// `setup_fn` receives the loaded fields and schedule along with the custom
/// arguments and may adjust both before the batch starts.
///
/// # Errors
/// Returns an error if argument parsing, the setup function or the batch fails
pub fn run_with_custom_args<A, F>(setup_fn: F) -> Result<BatchResult, Box<dyn std::error::Error>>
where
    A: Args,
    F: Fn(&mut Fields, &mut EventSchedule, Option<A>) -> Result<(), StiError>,
{
    let mut cli = create_cli();
    cli = A::augment_args(cli);
    let matches = cli.get_matches();

    let base_args = BaseArgs::from_arg_matches(&matches)?;
    let custom_args = A::from_arg_matches(&matches)?;
    Ok(run_with_args_internal(base_args, Some(custom_args), setup_fn)?)
}

/// Runs a batch with the default cli arguments.
///
/// # Errors
/// Returns an error if argument parsing, the setup function or the batch fails
pub fn run_with_args<F>(setup_fn: F) -> Result<BatchResult, Box<dyn std::error::Error>>
where
    F: Fn(&mut Fields, &mut EventSchedule, Option<PlaceholderCustom>) -> Result<(), StiError>,
{
    let matches = create_cli().get_matches();
    let base_args = BaseArgs::from_arg_matches(&matches)?;
    Ok(run_with_args_internal(base_args, None, setup_fn)?)
}

/// Runs a batch described by `args`.
///
/// # Errors
/// Returns an error if an input file cannot be read, the configuration does
/// not validate, or an output cannot be written.
pub fn run_with_args_internal<A, F>(
    args: BaseArgs,
    custom_args: Option<A>,
    setup_fn: F,
) -> Result<BatchResult, StiError>
where
    F: Fn(&mut Fields, &mut EventSchedule, Option<A>) -> Result<(), StiError>,
{
    let level = args
        .log_level
        .parse::<LevelFilter>()
        .map_err(|_| StiError::ConfigError(format!("unknown log level {}", args.log_level)))?;
    set_log_level(level);

    let mut fields = match &args.config {
        Some(path) => {
            info!("Loading fields from: {}", path.display());
            load_fields_from_json(path)?
        }
        None => Fields::default(),
    };
    let mut schedule = match &args.schedule {
        Some(path) => serde_json::from_slice(&fs::read(path)?)?,
        None => EventSchedule::new(),
    };
    setup_fn(&mut fields, &mut schedule, custom_args)?;
    let fields = Arc::new(fields);

    let mut initial_state = match &args.import_state {
        Some(path) => Some(Arc::new(read_state(path)?)),
        None => None,
    };
    if let Some(path) = &args.export_state {
        let mut trajectory = Trajectory::new(args.random_seed);
        trajectory.configure(Arc::clone(&fields))?;
        match &initial_state {
            Some(state) => trajectory.import_state(state)?,
            None => trajectory.initialise()?,
        }
        trajectory.burn_in();
        let state = trajectory.export_state();
        write_state(path, &state)?;
        info!("Wrote population state to: {}", path.display());
        initial_state = Some(Arc::new(state));
    }

    if let Some(dir) = &args.output_dir {
        create_dir_all(dir)?;
    }
    let options = BatchOptions {
        trajectories: args.trajectories,
        threads: args.threads,
        master_seed: args.random_seed,
        keep_snapshots: args.keep_snapshots,
        timeout: args.timeout_hours.map_or(DEFAULT_BATCH_TIMEOUT, |hours| {
            std::time::Duration::from_secs(hours * 60 * 60)
        }),
        output_dir: args.output_dir.clone(),
        initial_state,
        ..BatchOptions::default()
    };
    let result = run_batch(fields, &schedule, &options)?;

    if let Some(dir) = &args.output_dir {
        let path = dir.join("outcomes.json");
        fs::write(&path, serde_json::to_vec_pretty(&result.outcomes)?)?;
        info!("Wrote {} outcomes to: {}", result.outcomes.len(), path.display());
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::parameters::TrajectorySettings;
    use crate::state::read_state;
    use crate::trajectory::TrajectoryOutcome;

    fn small(fields: &mut Fields, _: &mut EventSchedule, _: Option<()>) -> Result<(), StiError> {
        fields.population_size = 50;
        fields.trajectory = TrajectorySettings {
            burn_in_days: 3,
            windows: 2,
            window_length: 5,
            cumulative: false,
        };
        Ok(())
    }

    #[test]
    fn run_with_defaults() {
        let result = run_with_args_internal(BaseArgs::default(), None, small).unwrap();
        assert_eq!(result.outcomes.len(), 1);
    }

    #[test]
    fn bad_log_level_is_rejected() {
        let args = BaseArgs {
            log_level: "loud".to_string(),
            ..BaseArgs::default()
        };
        assert!(matches!(
            run_with_args_internal(args, None, small),
            Err(StiError::ConfigError(_))
        ));
    }

    #[test]
    fn custom_args_reach_setup() {
        let result = run_with_args_internal(BaseArgs::default(), Some(7usize), |fields, schedule, custom| {
            small(fields, schedule, None)?;
            fields.population_size = custom.unwrap_or(0) * 10;
            Ok(())
        })
        .unwrap();
        assert_eq!(result.outcomes[0].population_size, 70);
    }

    #[test]
    fn outputs_are_written() {
        let temp_dir = tempdir().unwrap();
        let output_dir = temp_dir.path().join("out");
        let state_path = temp_dir.path().join("state.bin");
        let args = BaseArgs {
            random_seed: 42,
            output_dir: Some(output_dir.clone()),
            trajectories: 2,
            export_state: Some(state_path.clone()),
            ..BaseArgs::default()
        };
        run_with_args_internal(args, None, small).unwrap();

        assert_eq!(read_state(&state_path).unwrap().day, 3);
        assert!(output_dir.join("trajectory_0.csv").exists());
        assert!(output_dir.join("trajectory_1.csv").exists());
        let outcomes: Vec<TrajectoryOutcome> =
            serde_json::from_slice(&fs::read(output_dir.join("outcomes.json")).unwrap()).unwrap();
        assert_eq!(outcomes.len(), 2);
    }
}
