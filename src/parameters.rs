//! The configuration bundle ("fields") of a population.
//!
//! A [`Fields`] record carries every behavioural and epidemiological parameter
//! shared by the trajectories of a batch. Population variants add optional
//! extension records ([`VaccinationSettings`], [`StrainSettings`]) that are
//! discovered through the [`HasVaccination`] and [`HasMultiStrain`]
//! capability traits. Every field has a default, so a JSON file only needs to
//! list what differs from it.
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::classifier::Classifier;
use crate::error::StiError;
use crate::partnership::{MatchingPolicy, PartnershipKind};
use crate::people::Site;
use crate::strain::MAX_STRAINS;
use crate::transmission::ActType;
use crate::{define_data_plugin, Context, Day};

/// A mean and standard deviation pair, in days.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MeanSd {
    pub mean: f64,
    pub sd: f64,
}

impl MeanSd {
    #[must_use]
    pub const fn new(mean: f64, sd: f64) -> Self {
        MeanSd { mean, sd }
    }

    #[must_use]
    pub const fn zero() -> Self {
        MeanSd { mean: 0.0, sd: 0.0 }
    }
}

/// Stage durations and presentation of an infection at one site.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct SiteInfectionParams {
    /// Exposed stage. A zero mean enters the infectious stage directly.
    pub incubation: MeanSd,
    pub asymptomatic: MeanSd,
    /// Time from symptom onset to treatment seeking or clearance.
    pub symptomatic: MeanSd,
    pub symptomatic_probability: f64,
    /// Post-clearance immune period. A zero mean skips the immune stage.
    pub immunity: MeanSd,
}

impl Default for SiteInfectionParams {
    fn default() -> Self {
        SiteInfectionParams {
            incubation: MeanSd::new(4.0, 1.0),
            asymptomatic: MeanSd::new(90.0, 30.0),
            symptomatic: MeanSd::new(7.0, 3.0),
            symptomatic_probability: 0.0,
            immunity: MeanSd::zero(),
        }
    }
}

/// Probability that an individual is born immune at a site when the site
/// acts in the given role.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(default)]
pub struct RoleImmunity {
    pub insertive: f64,
    pub receptive: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct BehaviourProportions {
    pub regular_only: f64,
    pub casual_only: f64,
    pub both: f64,
}

impl Default for BehaviourProportions {
    fn default() -> Self {
        BehaviourProportions {
            regular_only: 0.3,
            casual_only: 0.2,
            both: 0.5,
        }
    }
}

/// One bin of the annual casual partner-count distribution.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PartnerCountBin {
    pub min: u32,
    pub max: u32,
    pub cumulative_probability: f64,
}

/// A `[min, max]` range of daily act probabilities selected with the given
/// cumulative probability.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct WeightedRange {
    pub min: f64,
    pub max: f64,
    pub cumulative_probability: f64,
}

/// A frequency table that applies from `min_partners` recent casual partners.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PartnerCountTable {
    pub min_partners: usize,
    pub table: FrequencyTable,
}

/// How the daily probability of an act is drawn when a partnership forms.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrequencyTable {
    #[default]
    Never,
    /// Uniform on `[min, max]`.
    Range { min: f64, max: f64 },
    /// One of several ranges chosen by a cumulative-probability draw.
    Weighted { options: Vec<WeightedRange> },
    /// Alternative tables conditioned on the recent casual partner count of
    /// the more active partner. Entries are ordered by `min_partners`.
    ByPartnerCount { tables: Vec<PartnerCountTable> },
}

/// One value per act type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default, bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct ActMap<T> {
    pub anal: T,
    pub oral: T,
    pub rimming: T,
    pub kissing: T,
    pub genital: T,
    pub genital_anal: T,
}

impl<T> ActMap<T> {
    #[must_use]
    pub fn get(&self, act: ActType) -> &T {
        match act {
            ActType::Anal => &self.anal,
            ActType::Oral => &self.oral,
            ActType::Rimming => &self.rimming,
            ActType::Kissing => &self.kissing,
            ActType::Genital => &self.genital,
            ActType::GenitalAnal => &self.genital_anal,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActType, &T)> {
        ActType::ALL.into_iter().map(move |act| (act, self.get(act)))
    }
}

/// One value per act type and partnership kind.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default, bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct ActTables<T> {
    pub regular: ActMap<T>,
    pub casual: ActMap<T>,
}

impl<T> ActTables<T> {
    #[must_use]
    pub fn get(&self, kind: PartnershipKind, act: ActType) -> &T {
        match kind {
            PartnershipKind::Regular => self.regular.get(act),
            PartnershipKind::Casual => self.casual.get(act),
        }
    }
}

/// A change to act frequencies or condom use active over a range of days.
///
/// A non-negative value multiplies the configured probability; a negative
/// value `-p` replaces it with `p`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimedAdjustment {
    pub from_day: Day,
    #[serde(default)]
    pub until_day: Option<Day>,
    /// `None` applies to both partnership kinds.
    #[serde(default)]
    pub kind: Option<PartnershipKind>,
    /// `None` applies to every act type.
    #[serde(default)]
    pub act: Option<ActType>,
    #[serde(default)]
    pub frequency: Option<f64>,
    #[serde(default)]
    pub condom_use: Option<f64>,
}

impl TimedAdjustment {
    #[must_use]
    pub fn applies(&self, day: Day, kind: PartnershipKind, act: ActType) -> bool {
        day >= self.from_day
            && self.until_day.is_none_or(|until| day < until)
            && self.kind.is_none_or(|k| k == kind)
            && self.act.is_none_or(|a| a == act)
    }
}

/// Applies a signed adjustment to `probability` and clamps the result.
#[must_use]
pub fn apply_adjustment(probability: f64, adjustment: f64) -> f64 {
    let adjusted = if adjustment < 0.0 {
        -adjustment
    } else {
        probability * adjustment
    };
    adjusted.clamp(0.0, 1.0)
}

/// The site set and probability used by one class of targeted screening.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TargetClass {
    pub cumulative_probability: f64,
    pub sites: Vec<Site>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScreeningPolicy {
    #[default]
    None,
    /// Every `interval_days`, a random `proportion` of the population is screened at `sites`.
    Periodic {
        interval_days: u32,
        proportion: f64,
        sites: Vec<Site>,
    },
    /// Individuals matching `classifier` are screened with `daily_probability`.
    /// `classes` split the screened individuals across site sets by a
    /// cumulative draw; no classes screens every site.
    Targeted {
        classifier: Classifier,
        daily_probability: f64,
        #[serde(default)]
        classes: Vec<TargetClass>,
    },
    /// Each individual carries their own next screening age, drawn with the
    /// given mean interval.
    Scheduled { mean_interval_days: f64, sites: Vec<Site> },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TopologyKind {
    #[default]
    Msm,
    Heterosexual,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentKind {
    #[default]
    Clearance,
    Conversion,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrainDynamicsKind {
    /// Concurrent strains are OR-combined and resolved by priority.
    #[default]
    MultiStrain,
    /// One strain at a time; a different incoming strain may replace it.
    StrainSwitching,
}

/// A mixing outcome: when `incoming` meets `current`, the site carries
/// `result` with the given probability instead of `current | incoming`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MixingRule {
    pub current: u8,
    pub incoming: u8,
    pub result: u8,
    pub probability: f64,
}

/// Treatment of a site carrying exactly `from` converts it to `to` with the
/// given probability instead of clearing it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ConversionRule {
    pub site: Site,
    pub from: u8,
    pub to: u8,
    pub probability: f64,
}

/// Extension record for multi-strain populations.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StrainSettings {
    pub count: u8,
    pub dynamics: StrainDynamicsKind,
    /// Strain bits in decreasing dominance. Unlisted strains follow in bit order.
    pub priority: Vec<u8>,
    pub mixing: Vec<MixingRule>,
    pub switch_probability: f64,
    /// Per-strain site models; an empty list uses the base models for every strain.
    pub site_models: Vec<[SiteInfectionParams; 3]>,
    /// Per-strain treatment efficacy; missing entries are fully effective.
    pub treatment_efficacy: Vec<f64>,
    pub conversion: Vec<ConversionRule>,
}

impl Default for StrainSettings {
    fn default() -> Self {
        StrainSettings {
            count: 2,
            dynamics: StrainDynamicsKind::MultiStrain,
            priority: Vec::new(),
            mixing: Vec::new(),
            switch_probability: 1.0,
            site_models: Vec::new(),
            treatment_efficacy: Vec::new(),
            conversion: Vec::new(),
        }
    }
}

impl StrainSettings {
    /// The full dominance order: configured priorities first, then the
    /// remaining strains in bit order.
    #[must_use]
    pub fn dominance_order(&self) -> Vec<u8> {
        let mut order = self.priority.clone();
        for strain in 0..self.count {
            if !order.contains(&strain) {
                order.push(strain);
            }
        }
        order
    }
}

/// Extension record for vaccinating populations.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct VaccinationSettings {
    pub coverage: f64,
    pub at_screening: bool,
    pub at_entry: bool,
    /// `None` protects for life.
    pub duration_days: Option<u32>,
    pub susceptibility_efficacy: [f64; 3],
    pub transmissibility_efficacy: [f64; 3],
    /// Fraction of the remaining infection duration removed on vaccination.
    pub duration_reduction: [f64; 3],
    pub clears_symptoms: bool,
    pub booster_interval_days: Option<u32>,
    pub booster_uptake: f64,
}

impl Default for VaccinationSettings {
    fn default() -> Self {
        VaccinationSettings {
            coverage: 0.0,
            at_screening: true,
            at_entry: false,
            duration_days: None,
            susceptibility_efficacy: [0.0; 3],
            transmissibility_efficacy: [0.0; 3],
            duration_reduction: [0.0; 3],
            clears_symptoms: false,
            booster_interval_days: None,
            booster_uptake: 1.0,
        }
    }
}

/// Burn-in and snapshot windows of a trajectory.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct TrajectorySettings {
    pub burn_in_days: u32,
    pub windows: usize,
    pub window_length: u32,
    /// Incidence and treatment counts accumulate across windows instead of
    /// resetting at each snapshot.
    pub cumulative: bool,
}

impl Default for TrajectorySettings {
    fn default() -> Self {
        TrajectorySettings {
            burn_in_days: 0,
            windows: 10,
            window_length: 30,
            cumulative: false,
        }
    }
}

/// The base configuration record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Fields {
    pub population_size: usize,
    /// Age in days at which individuals enter the population.
    pub min_age: u32,
    /// Age in days at which individuals are replaced.
    pub max_age: u32,
    pub behaviour_proportions: BehaviourProportions,
    pub casual_partner_distribution: Vec<PartnerCountBin>,
    pub regular_duration_mean: f64,
    pub regular_gap_mean: f64,
    pub casual_duration_mean: f64,
    /// Days of casual partner history kept for classification.
    pub casual_lookback_days: u32,
    pub matching_policy: MatchingPolicy,
    pub topology: TopologyKind,
    pub act_frequencies: ActTables<FrequencyTable>,
    pub condom_use: ActTables<f64>,
    pub adjustments: Vec<TimedAdjustment>,
    /// Per-act transmission probability indexed by `[source site][target site]`.
    pub transmissibility: [[f64; 3]; 3],
    pub susceptibility: [f64; 3],
    pub infection: [SiteInfectionParams; 3],
    /// Probability that symptom onset at another site truncates an
    /// asymptomatic infection at this site.
    pub coinfection_truncation: [f64; 3],
    /// Role-restricted immunity drawn once per individual and inherited on replacement.
    pub site_immunity: [RoleImmunity; 3],
    pub treat_symptomatic: bool,
    pub treatment: TreatmentKind,
    pub screening: ScreeningPolicy,
    pub trajectory: TrajectorySettings,
    pub snapshot_classifiers: Vec<Classifier>,
    pub vaccination: Option<VaccinationSettings>,
    pub strains: Option<StrainSettings>,
}

impl Default for Fields {
    fn default() -> Self {
        let range = |min, max| FrequencyTable::Range { min, max };
        Fields {
            population_size: 10_000,
            min_age: 16 * 365,
            max_age: 35 * 365,
            behaviour_proportions: BehaviourProportions::default(),
            casual_partner_distribution: vec![
                PartnerCountBin {
                    min: 0,
                    max: 0,
                    cumulative_probability: 0.25,
                },
                PartnerCountBin {
                    min: 1,
                    max: 5,
                    cumulative_probability: 0.65,
                },
                PartnerCountBin {
                    min: 6,
                    max: 20,
                    cumulative_probability: 0.9,
                },
                PartnerCountBin {
                    min: 21,
                    max: 50,
                    cumulative_probability: 1.0,
                },
            ],
            regular_duration_mean: 730.0,
            regular_gap_mean: 180.0,
            casual_duration_mean: 1.0,
            casual_lookback_days: 182,
            matching_policy: MatchingPolicy::Random,
            topology: TopologyKind::Msm,
            act_frequencies: ActTables {
                regular: ActMap {
                    anal: range(0.2, 0.4),
                    oral: range(0.3, 0.5),
                    rimming: range(0.05, 0.1),
                    kissing: range(0.8, 1.0),
                    genital: FrequencyTable::Never,
                    genital_anal: FrequencyTable::Never,
                },
                casual: ActMap {
                    anal: range(0.5, 0.7),
                    oral: range(0.7, 0.9),
                    rimming: range(0.1, 0.3),
                    kissing: range(0.9, 1.0),
                    genital: FrequencyTable::Never,
                    genital_anal: FrequencyTable::Never,
                },
            },
            condom_use: ActTables {
                regular: ActMap {
                    anal: 0.2,
                    ..ActMap::default()
                },
                casual: ActMap {
                    anal: 0.5,
                    ..ActMap::default()
                },
            },
            adjustments: Vec::new(),
            transmissibility: [[0.5, 0.84, 0.63], [0.03, 0.0, 0.02], [0.05, 0.02, 0.03]],
            susceptibility: [1.0; 3],
            infection: [
                SiteInfectionParams {
                    symptomatic_probability: 0.9,
                    asymptomatic: MeanSd::new(60.0, 20.0),
                    ..SiteInfectionParams::default()
                },
                SiteInfectionParams {
                    symptomatic_probability: 0.15,
                    asymptomatic: MeanSd::new(180.0, 60.0),
                    ..SiteInfectionParams::default()
                },
                SiteInfectionParams {
                    asymptomatic: MeanSd::new(84.0, 28.0),
                    ..SiteInfectionParams::default()
                },
            ],
            coinfection_truncation: [0.0; 3],
            site_immunity: [RoleImmunity::default(); 3],
            treat_symptomatic: true,
            treatment: TreatmentKind::Clearance,
            screening: ScreeningPolicy::None,
            trajectory: TrajectorySettings::default(),
            snapshot_classifiers: vec![
                Classifier::Infected { site: Some(Site::G) },
                Classifier::Infected { site: Some(Site::A) },
                Classifier::Infected { site: Some(Site::R) },
                Classifier::Infected { site: None },
            ],
            vaccination: None,
            strains: None,
        }
    }
}

/// Populations that vaccinate.
pub trait HasVaccination {
    fn vaccination(&self) -> Option<&VaccinationSettings>;
}

/// Populations that carry more than one strain.
pub trait HasMultiStrain {
    fn strains(&self) -> Option<&StrainSettings>;

    /// Number of strains tracked, one for single-strain populations.
    fn strain_count(&self) -> u8 {
        self.strains().map_or(1, |settings| settings.count)
    }
}

impl HasVaccination for Fields {
    fn vaccination(&self) -> Option<&VaccinationSettings> {
        self.vaccination.as_ref()
    }
}

impl HasMultiStrain for Fields {
    fn strains(&self) -> Option<&StrainSettings> {
        self.strains.as_ref()
    }
}

fn check_probability(name: &str, value: f64) -> Result<(), StiError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(StiError::ConfigError(format!(
            "{name} must be in [0, 1], found {value}"
        )))
    }
}

fn check_cumulative(name: &str, values: impl Iterator<Item = f64>) -> Result<(), StiError> {
    let mut previous = 0.0;
    let mut last = None;
    for value in values {
        check_probability(name, value)?;
        if value < previous {
            return Err(StiError::ConfigError(format!(
                "{name} must be non-decreasing, found {value} after {previous}"
            )));
        }
        previous = value;
        last = Some(value);
    }
    match last {
        Some(last) if (last - 1.0).abs() > 1e-9 => Err(StiError::ConfigError(format!(
            "{name} must end at 1, found {last}"
        ))),
        _ => Ok(()),
    }
}

fn check_mean_sd(name: &str, value: &MeanSd) -> Result<(), StiError> {
    if !(value.mean.is_finite() && value.mean >= 0.0 && value.sd.is_finite() && value.sd >= 0.0) {
        return Err(StiError::ConfigError(format!(
            "{name} must have a non-negative finite mean and sd, found {value:?}"
        )));
    }
    Ok(())
}

fn check_site_params(name: &str, params: &SiteInfectionParams) -> Result<(), StiError> {
    check_mean_sd(&format!("{name}.incubation"), &params.incubation)?;
    check_mean_sd(&format!("{name}.asymptomatic"), &params.asymptomatic)?;
    check_mean_sd(&format!("{name}.symptomatic"), &params.symptomatic)?;
    check_mean_sd(&format!("{name}.immunity"), &params.immunity)?;
    check_probability(
        &format!("{name}.symptomatic_probability"),
        params.symptomatic_probability,
    )?;
    if params.asymptomatic.mean <= 0.0 || params.symptomatic.mean <= 0.0 {
        return Err(StiError::ConfigError(format!(
            "{name} infectious durations must have a positive mean"
        )));
    }
    Ok(())
}

fn check_frequency_table(name: &str, table: &FrequencyTable) -> Result<(), StiError> {
    match table {
        FrequencyTable::Never => Ok(()),
        FrequencyTable::Range { min, max } => {
            check_probability(&format!("{name}.min"), *min)?;
            check_probability(&format!("{name}.max"), *max)?;
            if min > max {
                return Err(StiError::ConfigError(format!(
                    "{name} has min {min} greater than max {max}"
                )));
            }
            Ok(())
        }
        FrequencyTable::Weighted { options } => {
            if options.is_empty() {
                return Err(StiError::ConfigError(format!("{name} has no options")));
            }
            for (index, option) in options.iter().enumerate() {
                check_frequency_table(
                    &format!("{name}.options[{index}]"),
                    &FrequencyTable::Range {
                        min: option.min,
                        max: option.max,
                    },
                )?;
            }
            check_cumulative(
                &format!("{name}.options.cumulative_probability"),
                options.iter().map(|option| option.cumulative_probability),
            )
        }
        FrequencyTable::ByPartnerCount { tables } => {
            if tables.is_empty() {
                return Err(StiError::ConfigError(format!("{name} has no tables")));
            }
            if tables
                .windows(2)
                .any(|pair| pair[0].min_partners >= pair[1].min_partners)
            {
                return Err(StiError::ConfigError(format!(
                    "{name} tables must be ordered by increasing min_partners"
                )));
            }
            for (index, entry) in tables.iter().enumerate() {
                check_frequency_table(&format!("{name}.tables[{index}]"), &entry.table)?;
            }
            Ok(())
        }
    }
}

fn check_strain_mask(name: &str, mask: u8, count: u8) -> Result<(), StiError> {
    if count < 8 && mask >> count != 0 {
        return Err(StiError::ConfigError(format!(
            "{name} uses strain bits beyond the {count} configured strains"
        )));
    }
    Ok(())
}

impl Fields {
    /// Checks every field and returns a descriptive error for the first
    /// malformed entry.
    ///
    /// # Errors
    ///
    /// Returns `StiError::ConfigError` naming the offending field.
    #[allow(clippy::too_many_lines)]
    pub fn validate(&self) -> Result<(), StiError> {
        if self.population_size == 0 {
            return Err(StiError::ConfigError(
                "population_size must be positive".into(),
            ));
        }
        if self.min_age >= self.max_age {
            return Err(StiError::ConfigError(format!(
                "min_age ({}) must be less than max_age ({})",
                self.min_age, self.max_age
            )));
        }
        let proportions = &self.behaviour_proportions;
        for (name, value) in [
            ("behaviour_proportions.regular_only", proportions.regular_only),
            ("behaviour_proportions.casual_only", proportions.casual_only),
            ("behaviour_proportions.both", proportions.both),
        ] {
            check_probability(name, value)?;
        }
        let total = proportions.regular_only + proportions.casual_only + proportions.both;
        if (total - 1.0).abs() > 1e-6 {
            return Err(StiError::ConfigError(format!(
                "behaviour_proportions must sum to 1, found {total}"
            )));
        }
        if self.casual_partner_distribution.is_empty() {
            return Err(StiError::ConfigError(
                "casual_partner_distribution must not be empty".into(),
            ));
        }
        for bin in &self.casual_partner_distribution {
            if bin.min > bin.max {
                return Err(StiError::ConfigError(format!(
                    "casual_partner_distribution bin has min {} greater than max {}",
                    bin.min, bin.max
                )));
            }
        }
        check_cumulative(
            "casual_partner_distribution.cumulative_probability",
            self.casual_partner_distribution
                .iter()
                .map(|bin| bin.cumulative_probability),
        )?;
        for (name, value) in [
            ("regular_duration_mean", self.regular_duration_mean),
            ("regular_gap_mean", self.regular_gap_mean),
            ("casual_duration_mean", self.casual_duration_mean),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(StiError::ConfigError(format!(
                    "{name} must be positive, found {value}"
                )));
            }
        }

        for kind in [PartnershipKind::Regular, PartnershipKind::Casual] {
            for act in ActType::ALL {
                let name = format!("act_frequencies.{kind}.{act}");
                check_frequency_table(&name, self.act_frequencies.get(kind, act))?;
                let name = format!("condom_use.{kind}.{act}");
                check_probability(&name, *self.condom_use.get(kind, act))?;
            }
        }
        for adjustment in &self.adjustments {
            if adjustment
                .until_day
                .is_some_and(|until| until <= adjustment.from_day)
            {
                return Err(StiError::ConfigError(format!(
                    "adjustment starting on day {} ends before it starts",
                    adjustment.from_day
                )));
            }
            for value in [adjustment.frequency, adjustment.condom_use]
                .into_iter()
                .flatten()
            {
                if !value.is_finite() || value < -1.0 {
                    return Err(StiError::ConfigError(format!(
                        "adjustment starting on day {} has invalid value {value}",
                        adjustment.from_day
                    )));
                }
            }
        }

        for source in Site::ALL {
            for target in Site::ALL {
                check_probability(
                    &format!("transmissibility[{source}][{target}]"),
                    self.transmissibility[source.index()][target.index()],
                )?;
            }
            let index = source.index();
            check_probability(&format!("susceptibility[{source}]"), self.susceptibility[index])?;
            check_probability(
                &format!("coinfection_truncation[{source}]"),
                self.coinfection_truncation[index],
            )?;
            check_site_params(&format!("infection[{source}]"), &self.infection[index])?;
            check_probability(
                &format!("site_immunity[{source}].insertive"),
                self.site_immunity[index].insertive,
            )?;
            check_probability(
                &format!("site_immunity[{source}].receptive"),
                self.site_immunity[index].receptive,
            )?;
        }

        self.validate_screening()?;
        self.validate_trajectory()?;
        self.validate_vaccination()?;
        self.validate_strains()?;
        Ok(())
    }

    fn validate_screening(&self) -> Result<(), StiError> {
        match &self.screening {
            ScreeningPolicy::None => Ok(()),
            ScreeningPolicy::Periodic {
                interval_days,
                proportion,
                sites,
            } => {
                if *interval_days == 0 {
                    return Err(StiError::ConfigError(
                        "screening.interval_days must be positive".into(),
                    ));
                }
                if sites.is_empty() {
                    return Err(StiError::ConfigError("screening.sites is empty".into()));
                }
                check_probability("screening.proportion", *proportion)
            }
            ScreeningPolicy::Targeted {
                daily_probability,
                classes,
                ..
            } => {
                check_probability("screening.daily_probability", *daily_probability)?;
                check_cumulative(
                    "screening.classes.cumulative_probability",
                    classes.iter().map(|class| class.cumulative_probability),
                )
            }
            ScreeningPolicy::Scheduled {
                mean_interval_days,
                sites,
            } => {
                if !(mean_interval_days.is_finite() && *mean_interval_days > 0.0) {
                    return Err(StiError::ConfigError(
                        "screening.mean_interval_days must be positive".into(),
                    ));
                }
                if sites.is_empty() {
                    return Err(StiError::ConfigError("screening.sites is empty".into()));
                }
                Ok(())
            }
        }
    }

    fn validate_trajectory(&self) -> Result<(), StiError> {
        if self.trajectory.window_length == 0 {
            return Err(StiError::ConfigError(
                "trajectory.window_length must be positive".into(),
            ));
        }
        let days = u64::from(self.trajectory.burn_in_days)
            + self.trajectory.windows as u64 * u64::from(self.trajectory.window_length);
        if days > u64::from(Day::MAX) {
            return Err(StiError::ConfigError(format!(
                "trajectory spans {days} days, more than the simulated clock supports"
            )));
        }
        Ok(())
    }

    fn validate_vaccination(&self) -> Result<(), StiError> {
        let Some(vaccination) = self.vaccination() else {
            return Ok(());
        };
        check_probability("vaccination.coverage", vaccination.coverage)?;
        check_probability("vaccination.booster_uptake", vaccination.booster_uptake)?;
        for site in Site::ALL {
            let index = site.index();
            check_probability(
                &format!("vaccination.susceptibility_efficacy[{site}]"),
                vaccination.susceptibility_efficacy[index],
            )?;
            check_probability(
                &format!("vaccination.transmissibility_efficacy[{site}]"),
                vaccination.transmissibility_efficacy[index],
            )?;
            check_probability(
                &format!("vaccination.duration_reduction[{site}]"),
                vaccination.duration_reduction[index],
            )?;
        }
        if vaccination.duration_days == Some(0) || vaccination.booster_interval_days == Some(0) {
            return Err(StiError::ConfigError(
                "vaccination durations must be positive".into(),
            ));
        }
        Ok(())
    }

    fn validate_strains(&self) -> Result<(), StiError> {
        let Some(strains) = self.strains() else {
            if self.treatment == TreatmentKind::Conversion {
                return Err(StiError::ConfigError(
                    "conversion treatment requires strain settings".into(),
                ));
            }
            return Ok(());
        };
        let count = strains.count;
        if count == 0 || usize::from(count) > MAX_STRAINS {
            return Err(StiError::ConfigError(format!(
                "strains.count must be between 1 and {MAX_STRAINS}, found {count}"
            )));
        }
        for strain in &strains.priority {
            if *strain >= count {
                return Err(StiError::ConfigError(format!(
                    "strains.priority names strain {strain} of only {count}"
                )));
            }
        }
        check_probability("strains.switch_probability", strains.switch_probability)?;
        for rule in &strains.mixing {
            check_strain_mask("strains.mixing.current", rule.current, count)?;
            check_strain_mask("strains.mixing.incoming", rule.incoming, count)?;
            check_strain_mask("strains.mixing.result", rule.result, count)?;
            check_probability("strains.mixing.probability", rule.probability)?;
        }
        for rule in &strains.conversion {
            check_strain_mask("strains.conversion.from", rule.from, count)?;
            check_strain_mask("strains.conversion.to", rule.to, count)?;
            check_probability("strains.conversion.probability", rule.probability)?;
        }
        if self.treatment == TreatmentKind::Conversion && strains.conversion.is_empty() {
            return Err(StiError::ConfigError(
                "conversion treatment requires strains.conversion rules".into(),
            ));
        }
        for (strain, efficacy) in strains.treatment_efficacy.iter().enumerate() {
            if !(efficacy.is_finite() && *efficacy >= 0.0) {
                return Err(StiError::ConfigError(format!(
                    "strains.treatment_efficacy[{strain}] must be non-negative"
                )));
            }
        }
        if !strains.site_models.is_empty() && strains.site_models.len() != usize::from(count) {
            return Err(StiError::ConfigError(format!(
                "strains.site_models has {} entries for {count} strains",
                strains.site_models.len()
            )));
        }
        for (strain, models) in strains.site_models.iter().enumerate() {
            for site in Site::ALL {
                check_site_params(
                    &format!("strains.site_models[{strain}][{site}]"),
                    &models[site.index()],
                )?;
            }
        }
        Ok(())
    }
}

/// Reads a `Fields` bundle from a JSON file. Missing entries take their defaults.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid JSON for `Fields`.
pub fn load_fields_from_json(file_path: &Path) -> Result<Fields, StiError> {
    info!("Loading fields from: {}", file_path.display());
    let reader = BufReader::new(File::open(file_path)?);
    let fields = serde_json::from_reader(reader)?;
    Ok(fields)
}

struct ParametersData {
    fields: Option<Arc<Fields>>,
}

define_data_plugin!(
    ParametersPlugin,
    ParametersData,
    ParametersData { fields: None }
);

pub trait ContextParametersExt {
    /// Validates and installs the configuration bundle for this trajectory.
    ///
    /// # Errors
    ///
    /// Returns `StiError::ConfigError` if `Fields::validate` fails.
    fn set_fields(&mut self, fields: Arc<Fields>) -> Result<(), StiError>;

    /// A shared handle to the configuration bundle.
    ///
    /// # Panics
    ///
    /// Panics if no fields have been set.
    fn get_fields(&self) -> Arc<Fields>;

    fn has_fields(&self) -> bool;
}

impl ContextParametersExt for Context {
    fn set_fields(&mut self, fields: Arc<Fields>) -> Result<(), StiError> {
        fields.validate()?;
        self.get_data_mut(ParametersPlugin).fields = Some(fields);
        Ok(())
    }

    fn get_fields(&self) -> Arc<Fields> {
        let data = self
            .try_get_data::<ParametersPlugin>()
            .and_then(|data| data.fields.as_ref())
            .expect("Fields have not been configured");
        Arc::clone(data)
    }

    fn has_fields(&self) -> bool {
        self.try_get_data::<ParametersPlugin>()
            .is_some_and(|data| data.fields.is_some())
    }
}
