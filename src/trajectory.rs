//! One simulated trajectory.
//!
//! A [`Trajectory`] owns the [`Context`] of a single run and drives it through
//! `Uninitialised -> BurnIn -> Stepping -> Extinct | Complete`. After burn-in
//! the run is divided into snapshot windows of equal length; scheduled
//! introductions fire at the start of their window and a [`Snapshot`] is taken
//! at its end. A run whose infections have all cleared, with no introduction
//! left to fire, stops early and back-fills the remaining windows.
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use crate::classifier::Classifier;
use crate::error::StiError;
use crate::infection::{ContextInfectionExt, IncidenceCounts, InfectionStatus};
use crate::parameters::{ContextParametersExt, Fields, HasMultiStrain};
use crate::partnership::{ContextPartnershipExt, PartnershipKind};
use crate::people::{ContextPeopleExt, PersonId, Site};
use crate::random::{sample_multiple_from_known_length, ContextRandomExt};
use crate::report::{ContextReportExt, SnapshotRecord};
use crate::screening::ContextScreeningExt;
use crate::state::{self, PopulationState};
use crate::strain::StrainMask;
use crate::transmission::{ActReport, ContextTransmissionExt};
use crate::treatment::ContextTreatmentExt;
use crate::vaccination::ContextVaccinationExt;
use crate::{define_rng, Context, Day};

define_rng!(IntroductionRng);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrajectoryState {
    Uninitialised,
    BurnIn,
    Stepping,
    Extinct,
    Complete,
}

impl fmt::Display for TrajectoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The strains an introduced infection carries, chosen by a cumulative draw.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StrainShare {
    pub strains: StrainMask,
    pub cumulative_probability: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntroductionKind {
    /// Infects susceptible sites. `pre_exposure_days` fixes the exposed stage
    /// (zero makes the infection infectious at once); otherwise it is drawn
    /// from the incubation model.
    Infection {
        pre_exposure_days: Option<u32>,
        strain_decomposition: Vec<StrainShare>,
    },
    /// Exposes the site to `strain` whatever its current state, so that
    /// infected sites take it up through the strain dynamics.
    Strain { strain: u8 },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Introduction {
    pub site: Site,
    pub classifier: Classifier,
    /// Number of individuals to infect, capped at the number eligible.
    pub amount: usize,
    pub kind: IntroductionKind,
}

/// Introductions keyed by the snapshot window at whose start they fire.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EventSchedule {
    introductions: BTreeMap<usize, Vec<Introduction>>,
}

impl EventSchedule {
    #[must_use]
    pub fn new() -> Self {
        EventSchedule::default()
    }

    pub fn schedule_infection_introduction(
        &mut self,
        window: usize,
        site: Site,
        classifier: Classifier,
        amount: usize,
        pre_exposure_days: Option<u32>,
        strain_decomposition: Vec<StrainShare>,
    ) {
        self.add(
            window,
            Introduction {
                site,
                classifier,
                amount,
                kind: IntroductionKind::Infection {
                    pre_exposure_days,
                    strain_decomposition,
                },
            },
        );
    }

    pub fn schedule_strain_introduction(
        &mut self,
        window: usize,
        site: Site,
        classifier: Classifier,
        amount: usize,
        strain: u8,
    ) {
        self.add(
            window,
            Introduction {
                site,
                classifier,
                amount,
                kind: IntroductionKind::Strain { strain },
            },
        );
    }

    pub fn add(&mut self, window: usize, introduction: Introduction) {
        self.introductions
            .entry(window)
            .or_default()
            .push(introduction);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.introductions.is_empty()
    }

    /// Introductions in window order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Introduction)> {
        self.introductions
            .iter()
            .flat_map(|(window, list)| list.iter().map(move |introduction| (*window, introduction)))
    }

    /// Checks windows and strains against the fields.
    ///
    /// # Errors
    ///
    /// Returns `StiError::ConfigError` for an introduction outside the
    /// configured windows or strains.
    pub fn validate(&self, fields: &Fields) -> Result<(), StiError> {
        let count = fields.strain_count();
        for (window, introduction) in self.iter() {
            if window >= fields.trajectory.windows {
                return Err(StiError::ConfigError(format!(
                    "introduction scheduled for window {window} of {}",
                    fields.trajectory.windows
                )));
            }
            let strains: Vec<StrainMask> = match &introduction.kind {
                IntroductionKind::Infection {
                    strain_decomposition,
                    ..
                } => {
                    let mut previous = 0.0;
                    for share in strain_decomposition {
                        if share.cumulative_probability < previous
                            || share.cumulative_probability > 1.0
                        {
                            return Err(StiError::ConfigError(format!(
                                "strain decomposition of window {window} is not a cumulative table"
                            )));
                        }
                        previous = share.cumulative_probability;
                    }
                    strain_decomposition.iter().map(|share| share.strains).collect()
                }
                IntroductionKind::Strain { strain } => {
                    if *strain >= count {
                        return Err(StiError::ConfigError(format!(
                            "strain {strain} introduced in window {window} but only {count} configured"
                        )));
                    }
                    Vec::new()
                }
            };
            if let Some(mask) = strains
                .iter()
                .find(|mask| mask.is_empty() || mask.strains().any(|strain| strain >= count))
            {
                return Err(StiError::ConfigError(format!(
                    "strain mask {mask} introduced in window {window} does not fit {count} strains"
                )));
            }
        }
        Ok(())
    }
}

/// Infects individuals drawn from those eligible for `introduction`.
/// Returns the number of sites that changed.
fn introduce(context: &mut Context, introduction: &Introduction) -> usize {
    let site = introduction.site;
    let eligible: Vec<PersonId> = context
        .people_matching(&introduction.classifier)
        .into_iter()
        .filter(|person_id| match introduction.kind {
            IntroductionKind::Infection { .. } => {
                context.get_person(*person_id).site(site).status == InfectionStatus::Susceptible
            }
            IntroductionKind::Strain { .. } => true,
        })
        .collect();
    let chosen = context.sample(IntroductionRng, |rng| {
        sample_multiple_from_known_length(rng, eligible, introduction.amount)
    });

    let mut infected = 0;
    for person_id in chosen {
        let (strains, exposed_days) = match &introduction.kind {
            IntroductionKind::Infection {
                pre_exposure_days,
                strain_decomposition,
            } => {
                let strains = if strain_decomposition.is_empty() {
                    StrainMask::single(0)
                } else {
                    let cumulative: Vec<f64> = strain_decomposition
                        .iter()
                        .map(|share| share.cumulative_probability)
                        .collect();
                    strain_decomposition[context.sample_cumulative(IntroductionRng, &cumulative)]
                        .strains
                };
                (strains, *pre_exposure_days)
            }
            IntroductionKind::Strain { strain } => (StrainMask::single(*strain), None),
        };
        if context.infect_site(person_id, site, strains, exposed_days) {
            infected += 1;
        }
    }
    infected
}

/// Counts taken at the end of a snapshot window.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub window: usize,
    /// Last day of the window.
    pub day: Day,
    /// Individuals matching each snapshot classifier, in configuration order.
    pub counts: Vec<u64>,
    /// New infections per site, over the window or since stepping began.
    pub incidence: [u64; 3],
    pub strain_incidence: Vec<u64>,
    pub treatments: u64,
}

impl Snapshot {
    fn records(&self, trajectory: usize, classifiers: &[Classifier]) -> Vec<SnapshotRecord> {
        let record = |measure: String, value: u64| SnapshotRecord {
            trajectory,
            window: self.window,
            day: self.day,
            measure,
            value,
        };
        let mut records: Vec<SnapshotRecord> = classifiers
            .iter()
            .zip(&self.counts)
            .map(|(classifier, count)| record(classifier.to_string(), *count))
            .collect();
        for site in Site::ALL {
            records.push(record(
                format!("incidence_{site}"),
                self.incidence[site.index()],
            ));
        }
        for (strain, count) in self.strain_incidence.iter().enumerate() {
            records.push(record(format!("incidence_strain{strain}"), *count));
        }
        records.push(record("treatments".to_string(), self.treatments));
        records
    }
}

/// What happened during one simulated day.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DayReport {
    pub day: Day,
    pub dissolved: usize,
    pub formed: usize,
    pub acts: ActReport,
    pub infections: usize,
    pub treated: usize,
    pub screened: usize,
    pub detected: usize,
    pub boosters: usize,
    pub replaced: usize,
}

/// The result of a run, as handed to batch callers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrajectoryOutcome {
    pub trajectory: usize,
    pub seed: u64,
    pub state: TrajectoryState,
    pub population_size: usize,
    /// Infected individuals per site at the end of the run.
    pub end_infected: [u64; 3],
    /// Per-site incidence of the last snapshot.
    pub end_incidence: [u64; 3],
    pub extinction_day: Option<Day>,
    pub snapshots: Vec<Snapshot>,
}

impl TrajectoryOutcome {
    /// Infected proportion per site at the end of the run.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn end_prevalence(&self) -> [f64; 3] {
        let size = self.population_size.max(1) as f64;
        self.end_infected.map(|count| count as f64 / size)
    }
}

pub struct Trajectory {
    id: usize,
    seed: u64,
    context: Context,
    state: TrajectoryState,
    imported: bool,
    snapshots: Vec<Snapshot>,
    extinction_day: Option<Day>,
}

impl Trajectory {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Trajectory::with_id(0, seed)
    }

    /// A trajectory identified as `id` in logs, reports and errors.
    #[must_use]
    pub fn with_id(id: usize, seed: u64) -> Self {
        Trajectory {
            id,
            seed,
            context: Context::new(),
            state: TrajectoryState::Uninitialised,
            imported: false,
            snapshots: Vec::new(),
            extinction_day: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn state(&self) -> TrajectoryState {
        self.state
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    #[must_use]
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Installs the configuration bundle.
    ///
    /// # Errors
    ///
    /// Returns `StiError::ConfigError` if the fields do not validate.
    pub fn configure(&mut self, fields: Arc<Fields>) -> Result<(), StiError> {
        self.context.set_fields(fields)
    }

    /// Seeds the random streams and builds the population, its partnership
    /// graphs and every model component.
    ///
    /// # Errors
    ///
    /// Returns `StiError::ConfigError` if no fields were configured.
    pub fn initialise(&mut self) -> Result<(), StiError> {
        if !self.context.has_fields() {
            return Err(StiError::ConfigError(
                "fields must be configured before initialisation".to_string(),
            ));
        }
        let fields = self.context.get_fields();
        let context = &mut self.context;
        context.init_random(self.seed);
        context.init_population();
        context.init_partnerships();
        context.init_transmission();
        context.init_infection();
        context.init_treatment();
        context.init_vaccination();
        info!(
            "trajectory {}: seed {}, population {}, burn-in {} days, {} windows of {} days",
            self.id,
            self.seed,
            fields.population_size,
            fields.trajectory.burn_in_days,
            fields.trajectory.windows,
            fields.trajectory.window_length
        );
        self.state = TrajectoryState::BurnIn;
        Ok(())
    }

    /// Initialises the trajectory and then replaces its population with
    /// `state`, so that the run skips burn-in.
    ///
    /// # Errors
    ///
    /// Returns an error if the trajectory cannot be initialised or the state
    /// does not fit the configured fields.
    pub fn import_state(&mut self, population: &PopulationState) -> Result<(), StiError> {
        self.initialise()?;
        state::import_state(&mut self.context, population)?;
        self.imported = true;
        info!(
            "trajectory {}: imported population state at day {}",
            self.id,
            self.context.get_current_day()
        );
        Ok(())
    }

    #[must_use]
    pub fn export_state(&self) -> PopulationState {
        state::export_state(&self.context)
    }

    /// Writes every snapshot of the run to `path` as CSV.
    ///
    /// # Errors
    ///
    /// Returns an error if the report file cannot be created.
    pub fn add_report(&mut self, path: &Path) -> Result<(), StiError> {
        self.context.add_report::<SnapshotRecord>(path)
    }

    /// Advances the population by one day.
    ///
    /// # Panics
    ///
    /// Panics if the trajectory has not been initialised.
    pub fn advance_day(&mut self) -> DayReport {
        assert!(
            self.state != TrajectoryState::Uninitialised,
            "trajectory {} has not been initialised",
            self.id
        );
        step_day(&mut self.context)
    }

    /// Runs burn-in unless it already ran or the population was imported.
    pub fn burn_in(&mut self) {
        if self.state != TrajectoryState::BurnIn {
            return;
        }
        if !self.imported {
            let days = self.context.get_fields().trajectory.burn_in_days;
            for _ in 0..days {
                self.advance_day();
            }
            info!("trajectory {}: burn-in complete after {days} days", self.id);
        }
        self.state = TrajectoryState::Stepping;
    }

    /// Runs the trajectory to completion: burn-in, then every snapshot
    /// window with `schedule`'s introductions.
    ///
    /// # Errors
    ///
    /// Returns an error if the trajectory was not initialised or has already
    /// run, if the schedule does not fit the fields, or if a snapshot cannot
    /// be written to the report.
    pub fn run(&mut self, schedule: &EventSchedule) -> Result<TrajectoryOutcome, StiError> {
        match self.state {
            TrajectoryState::Uninitialised => {
                return Err(StiError::ConfigError(format!(
                    "trajectory {} has not been initialised",
                    self.id
                )))
            }
            TrajectoryState::Extinct | TrajectoryState::Complete => {
                return Err(StiError::StateError(format!(
                    "trajectory {} has already run",
                    self.id
                )))
            }
            TrajectoryState::BurnIn | TrajectoryState::Stepping => {}
        }
        let fields = self.context.get_fields();
        schedule.validate(&fields)?;
        self.burn_in();

        let settings = fields.trajectory;
        let start = self.context.get_current_day();
        for (window, introduction) in schedule.iter() {
            let day = start + u32::try_from(window).unwrap_or(u32::MAX) * settings.window_length;
            let introduction = introduction.clone();
            self.context.add_plan(day, move |context| {
                let infected = introduce(context, &introduction);
                debug!(
                    "day {}: introduced {infected} infections at site {}",
                    context.get_current_day(),
                    introduction.site
                );
            });
        }

        let mut previous = self.context.get_incidence().clone();
        let baseline = previous.clone();
        for window in 0..settings.windows {
            for _ in 0..settings.window_length {
                self.advance_day();
            }
            let current = self.context.get_incidence().clone();
            let since = if settings.cumulative {
                &baseline
            } else {
                &previous
            };
            let snapshot = self.take_snapshot(window, since, &current);
            previous = current;
            debug!(
                "trajectory {}: window {window} ending day {} counts {:?}",
                self.id, snapshot.day, snapshot.counts
            );
            self.record(snapshot)?;

            if self.is_extinct() {
                self.extinction_day = Some(self.context.get_current_day());
                self.state = TrajectoryState::Extinct;
                info!(
                    "trajectory {}: extinct at day {} (window {window})",
                    self.id,
                    self.context.get_current_day()
                );
                self.back_fill(settings.windows, settings.window_length, settings.cumulative)?;
                break;
            }
            if self.context.is_shutdown_requested() {
                info!("trajectory {}: stopped after window {window}", self.id);
                break;
            }
        }
        if self.state != TrajectoryState::Extinct {
            self.state = TrajectoryState::Complete;
        }
        Ok(self.outcome())
    }

    /// No site of anyone is infected and no introduction is pending.
    fn is_extinct(&self) -> bool {
        self.context.pending_plan_count() == 0
            && self
                .context
                .count_matching(&Classifier::Infected { site: None })
                == 0
    }

    #[allow(clippy::cast_possible_truncation)]
    fn take_snapshot(
        &self,
        window: usize,
        since: &IncidenceCounts,
        current: &IncidenceCounts,
    ) -> Snapshot {
        let fields = self.context.get_fields();
        let strain_count = usize::from(fields.strain_count());
        Snapshot {
            window,
            day: self.context.get_current_day().saturating_sub(1),
            counts: fields
                .snapshot_classifiers
                .iter()
                .map(|classifier| self.context.count_matching(classifier) as u64)
                .collect(),
            incidence: std::array::from_fn(|site| current.sites[site] - since.sites[site]),
            strain_incidence: (0..strain_count)
                .map(|strain| current.strains[strain] - since.strains[strain])
                .collect(),
            treatments: current.treatments - since.treatments,
        }
    }

    fn record(&mut self, snapshot: Snapshot) -> Result<(), StiError> {
        if self.context.has_report::<SnapshotRecord>() {
            let fields = self.context.get_fields();
            for record in snapshot.records(self.id, &fields.snapshot_classifiers) {
                self.context.send_report(record)?;
            }
        }
        self.snapshots.push(snapshot);
        Ok(())
    }

    /// Fills the windows after extinction: counts and cumulative incidence
    /// carry forward, per-window incidence is zero.
    fn back_fill(&mut self, windows: usize, window_length: u32, cumulative: bool) -> Result<(), StiError> {
        let Some(last) = self.snapshots.last().cloned() else {
            return Ok(());
        };
        for window in last.window + 1..windows {
            let mut snapshot = last.clone();
            snapshot.window = window;
            snapshot.day = last.day
                + u32::try_from(window - last.window).unwrap_or(u32::MAX) * window_length;
            if !cumulative {
                snapshot.incidence = [0; 3];
                snapshot.strain_incidence.fill(0);
                snapshot.treatments = 0;
            }
            trace!("trajectory {}: back-filled window {window}", self.id);
            self.record(snapshot)?;
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn outcome(&self) -> TrajectoryOutcome {
        TrajectoryOutcome {
            trajectory: self.id,
            seed: self.seed,
            state: self.state,
            population_size: self.context.population_size(),
            end_infected: Site::ALL.map(|site| {
                self.context
                    .count_matching(&Classifier::Infected { site: Some(site) })
                    as u64
            }),
            end_incidence: self
                .snapshots
                .last()
                .map_or([0; 3], |snapshot| snapshot.incidence),
            extinction_day: self.extinction_day,
            snapshots: self.snapshots.clone(),
        }
    }
}

/// Runs one day in a fixed order: due introductions, infection progression,
/// partnership expiry and matching, acts and exposures, interventions, aging.
fn step_day(context: &mut Context) -> DayReport {
    let fields = context.get_fields();
    let mut report = DayReport {
        day: context.get_current_day(),
        ..DayReport::default()
    };

    context.execute_due_plans();

    let progress = context.progress_infections();

    report.dissolved = context.tick_partnerships();
    for kind in PartnershipKind::ALL {
        report.formed += context.match_partnerships(kind);
    }

    let (acts, exposures) = context.perform_acts();
    report.infections = context.apply_exposures(&exposures);
    report.acts = acts;

    if fields.treat_symptomatic {
        report.treated = context.treat_symptomatic(&progress.seeking_treatment);
    }
    let screening = context.run_screening();
    report.screened = screening.screened;
    report.detected = screening.detected;
    report.boosters = context.administer_boosters();

    let replaced = context.age_population();
    for person_id in &replaced {
        context.remove_all_partnerships(*person_id);
    }
    context.vaccinate_entrants(&replaced);
    report.replaced = replaced.len();

    trace!(
        "day {}: {} formed, {} dissolved, {} infections, {} treated, {} replaced",
        report.day,
        report.formed,
        report.dissolved,
        report.infections,
        report.treated,
        report.replaced
    );
    context.advance_day();
    report
}
