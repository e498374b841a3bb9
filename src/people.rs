//! The fixed-size arena of individuals.
//!
//! Individuals live in slots indexed by [`PersonId`]. The population never
//! grows or shrinks after initialisation: an individual who ages out is
//! replaced in place by a freshly generated one, so a `PersonId` always names
//! a live individual while the `uid` tells successive occupants of a slot
//! apart.
use std::collections::VecDeque;
use std::fmt::{self, Display};

use log::{debug, trace};
use rand_distr::Exp;
use serde::{Deserialize, Serialize};

use crate::classifier::Classifier;
use crate::parameters::{ContextParametersExt, Fields, ScreeningPolicy};
use crate::random::ContextRandomExt;
use crate::strain::{StrainMask, MAX_STRAINS};
use crate::{define_data_plugin, define_rng, Context, Day, DAYS_PER_YEAR};

define_rng!(PeopleRng);

/// The slot of an individual in the population arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(usize);

impl PersonId {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        PersonId(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anatomical sites: genital/urethral, anal/rectal and oral/pharyngeal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Site {
    G,
    A,
    R,
}

impl Site {
    pub const ALL: [Site; 3] = [Site::G, Site::A, Site::R];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Site::G => 0,
            Site::A => 1,
            Site::R => 2,
        }
    }
}

impl Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behaviour {
    RegularOnly,
    CasualOnly,
    Both,
}

impl Behaviour {
    #[must_use]
    pub const fn seeks_regular(self) -> bool {
        matches!(self, Behaviour::RegularOnly | Behaviour::Both)
    }

    #[must_use]
    pub const fn seeks_casual(self) -> bool {
        matches!(self, Behaviour::CasualOnly | Behaviour::Both)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfectionStatus {
    #[default]
    Susceptible,
    Exposed,
    Asymptomatic,
    Symptomatic,
    Immune,
}

impl InfectionStatus {
    /// Carrying an infection, infectious or not.
    #[must_use]
    pub const fn is_infected(self) -> bool {
        matches!(
            self,
            InfectionStatus::Exposed | InfectionStatus::Asymptomatic | InfectionStatus::Symptomatic
        )
    }

    #[must_use]
    pub const fn is_infectious(self) -> bool {
        matches!(
            self,
            InfectionStatus::Asymptomatic | InfectionStatus::Symptomatic
        )
    }
}

/// The role a site plays in an act.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SiteRole {
    Insertive,
    Receptive,
}

/// Role-restricted immunity of a site.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImmunityMask(u8);

impl ImmunityMask {
    pub const NONE: ImmunityMask = ImmunityMask(0);
    pub const INSERTIVE: ImmunityMask = ImmunityMask(1);
    pub const RECEPTIVE: ImmunityMask = ImmunityMask(2);

    #[must_use]
    pub const fn with(self, other: ImmunityMask) -> ImmunityMask {
        ImmunityMask(self.0 | other.0)
    }

    #[must_use]
    pub const fn protects(self, role: SiteRole) -> bool {
        let bit = match role {
            SiteRole::Insertive => Self::INSERTIVE.0,
            SiteRole::Receptive => Self::RECEPTIVE.0,
        };
        self.0 & bit != 0
    }
}

/// Infection state of one site of one individual.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct SiteState {
    pub status: InfectionStatus,
    pub strains: StrainMask,
    /// Days left in the current stage.
    pub clock: u32,
    /// Set when the site was infectious during the last act it took part in.
    pub last_act_infectious: bool,
    pub immunity: ImmunityMask,
    /// Age in days at which each carried strain clears on its own; zero for
    /// strains not carried.
    pub clearance_ages: [u32; MAX_STRAINS],
}

impl SiteState {
    /// Drops the infection and any immune stage, keeping role immunity.
    pub fn reset(&mut self) {
        *self = SiteState {
            immunity: self.immunity,
            ..SiteState::default()
        };
    }
}

/// Active vaccine-derived protection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaccineProtection {
    pub vaccinated_day: Day,
    /// `None` for lifelong protection.
    pub expires_day: Option<Day>,
    pub doses: u32,
}

impl VaccineProtection {
    #[must_use]
    pub fn is_active(&self, day: Day) -> bool {
        self.expires_day.is_none_or(|expires| day < expires)
    }
}

/// A casual partner met on `day`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasualContact {
    pub day: Day,
    pub partner_uid: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub uid: u64,
    /// Age in days.
    pub age: u32,
    pub behaviour: Behaviour,
    pub sites: [SiteState; 3],
    pub casual_history: VecDeque<CasualContact>,
    /// Days on which casual partnerships began within the last year.
    pub casual_year: VecDeque<Day>,
    /// Annual casual-partner budget.
    pub max_casual_partners: u32,
    pub next_screening_age: Option<u32>,
    pub vaccine: Option<VaccineProtection>,
    pub treatments: u32,
}

impl Individual {
    #[must_use]
    pub fn site(&self, site: Site) -> &SiteState {
        &self.sites[site.index()]
    }

    pub fn site_mut(&mut self, site: Site) -> &mut SiteState {
        &mut self.sites[site.index()]
    }

    #[must_use]
    pub fn is_infected(&self) -> bool {
        self.sites.iter().any(|site| site.status.is_infected())
    }

    #[must_use]
    pub fn is_symptomatic(&self) -> bool {
        self.sites
            .iter()
            .any(|site| site.status == InfectionStatus::Symptomatic)
    }

    /// Union of the strains carried at every site.
    #[must_use]
    pub fn strains(&self) -> StrainMask {
        self.sites
            .iter()
            .fold(StrainMask::NONE, |mask, site| mask | site.strains)
    }

    #[must_use]
    pub fn recent_casual_partners(&self) -> usize {
        self.casual_history.len()
    }

    /// Casual partners still allowed before the annual budget runs out.
    #[must_use]
    pub fn remaining_casual_budget(&self) -> u32 {
        let used = u32::try_from(self.casual_year.len()).unwrap_or(u32::MAX);
        self.max_casual_partners.saturating_sub(used)
    }

    pub fn record_casual_partner(&mut self, day: Day, partner_uid: u64) {
        self.casual_history.push_back(CasualContact { day, partner_uid });
        self.casual_year.push_back(day);
    }

    /// Forgets casual partners met `lookback` or more days before `day`, and
    /// returns to the budget those begun a year or more ago.
    pub fn prune_casual_history(&mut self, day: Day, lookback: u32) {
        while self
            .casual_history
            .front()
            .is_some_and(|contact| contact.day + lookback <= day)
        {
            self.casual_history.pop_front();
        }
        while self
            .casual_year
            .front()
            .is_some_and(|started| started + DAYS_PER_YEAR <= day)
        {
            self.casual_year.pop_front();
        }
    }

    #[must_use]
    pub fn is_vaccinated(&self, day: Day) -> bool {
        self.vaccine.is_some_and(|vaccine| vaccine.is_active(day))
    }
}

#[derive(Default)]
pub(crate) struct PeopleData {
    pub(crate) individuals: Vec<Individual>,
    pub(crate) next_uid: u64,
}

define_data_plugin!(PeoplePlugin, PeopleData, PeopleData::default());

/// A copy of the arena and the next uid to hand out.
pub(crate) fn snapshot_people(context: &Context) -> (Vec<Individual>, u64) {
    context
        .try_get_data::<PeoplePlugin>()
        .map_or_else(Default::default, |data| {
            (data.individuals.clone(), data.next_uid)
        })
}

/// Replaces the arena wholesale, used when importing a saved state.
pub(crate) fn restore_people(context: &mut Context, individuals: Vec<Individual>, next_uid: u64) {
    let data = context.get_data_mut(PeoplePlugin);
    data.individuals = individuals;
    data.next_uid = next_uid;
}

fn sample_behaviour(context: &Context, fields: &Fields) -> Behaviour {
    let proportions = &fields.behaviour_proportions;
    let cumulative = [
        proportions.regular_only,
        proportions.regular_only + proportions.casual_only,
        1.0,
    ];
    match context.sample_cumulative(PeopleRng, &cumulative) {
        0 => Behaviour::RegularOnly,
        1 => Behaviour::CasualOnly,
        _ => Behaviour::Both,
    }
}

fn sample_casual_budget(context: &Context, fields: &Fields, behaviour: Behaviour) -> u32 {
    if !behaviour.seeks_casual() {
        return 0;
    }
    let cumulative: Vec<f64> = fields
        .casual_partner_distribution
        .iter()
        .map(|bin| bin.cumulative_probability)
        .collect();
    let bin = &fields.casual_partner_distribution[context.sample_cumulative(PeopleRng, &cumulative)];
    context.sample_range(PeopleRng, bin.min..=bin.max)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn sample_screening_age(context: &Context, fields: &Fields, age: u32) -> Option<u32> {
    let ScreeningPolicy::Scheduled {
        mean_interval_days, ..
    } = &fields.screening
    else {
        return None;
    };
    let interval = context.sample_distr(PeopleRng, Exp::new(1.0 / mean_interval_days).ok()?);
    Some(age + (interval.ceil() as u32).max(1))
}

pub trait ContextPeopleExt {
    /// Fills the arena with `population_size` freshly generated individuals
    /// of uniformly distributed ages.
    fn init_population(&mut self);

    /// Draws a new individual. Entrants start at the minimum age; others are
    /// spread uniformly over the age range.
    fn generate_person(&mut self, at_entry: bool) -> Individual;

    fn add_person(&mut self, individual: Individual) -> PersonId;

    /// Replaces the occupant of `person_id` with an entrant who keeps the
    /// behaviour, casual budget and site immunity of the slot but none of
    /// its infection state.
    fn replace_person(&mut self, person_id: PersonId);

    /// Ages everyone one day and replaces those who reach the maximum age.
    /// Returns the replaced slots.
    fn age_population(&mut self) -> Vec<PersonId>;

    fn population_size(&self) -> usize;

    fn get_person(&self, person_id: PersonId) -> &Individual;

    fn get_person_mut(&mut self, person_id: PersonId) -> &mut Individual;

    fn person_ids(&self) -> impl Iterator<Item = PersonId>;

    fn people_matching(&self, classifier: &Classifier) -> Vec<PersonId>;

    fn count_matching(&self, classifier: &Classifier) -> usize;
}

impl ContextPeopleExt for Context {
    fn init_population(&mut self) {
        let size = self.get_fields().population_size;
        let data = self.get_data_mut(PeoplePlugin);
        data.individuals.clear();
        data.individuals.reserve(size);
        for _ in 0..size {
            let individual = self.generate_person(false);
            self.add_person(individual);
        }
        debug!("initialised population of {size}");
    }

    fn generate_person(&mut self, at_entry: bool) -> Individual {
        let fields = self.get_fields();
        let age = if at_entry {
            fields.min_age
        } else {
            self.sample_range(PeopleRng, fields.min_age..fields.max_age)
        };
        let behaviour = sample_behaviour(self, &fields);
        let max_casual_partners = sample_casual_budget(self, &fields, behaviour);
        let mut sites: [SiteState; 3] = Default::default();
        for (site, immunity) in sites.iter_mut().zip(&fields.site_immunity) {
            if self.sample_bool(PeopleRng, immunity.insertive) {
                site.immunity = site.immunity.with(ImmunityMask::INSERTIVE);
            }
            if self.sample_bool(PeopleRng, immunity.receptive) {
                site.immunity = site.immunity.with(ImmunityMask::RECEPTIVE);
            }
        }
        let next_screening_age = sample_screening_age(self, &fields, age);

        let data = self.get_data_mut(PeoplePlugin);
        let uid = data.next_uid;
        data.next_uid += 1;
        Individual {
            uid,
            age,
            behaviour,
            sites,
            casual_history: VecDeque::new(),
            casual_year: VecDeque::new(),
            max_casual_partners,
            next_screening_age,
            vaccine: None,
            treatments: 0,
        }
    }

    fn add_person(&mut self, individual: Individual) -> PersonId {
        let data = self.get_data_mut(PeoplePlugin);
        let person_id = PersonId(data.individuals.len());
        data.individuals.push(individual);
        person_id
    }

    fn replace_person(&mut self, person_id: PersonId) {
        let mut entrant = self.generate_person(true);
        let previous = self.get_person(person_id);
        trace!(
            "replacing {} (uid {}) with uid {}",
            person_id,
            previous.uid,
            entrant.uid
        );
        entrant.behaviour = previous.behaviour;
        entrant.max_casual_partners = previous.max_casual_partners;
        for (site, old) in entrant.sites.iter_mut().zip(&previous.sites) {
            site.immunity = old.immunity;
        }
        *self.get_person_mut(person_id) = entrant;
    }

    fn age_population(&mut self) -> Vec<PersonId> {
        let fields = self.get_fields();
        let day = self.get_current_day();
        let mut aged_out = Vec::new();
        for (index, individual) in self
            .get_data_mut(PeoplePlugin)
            .individuals
            .iter_mut()
            .enumerate()
        {
            individual.age += 1;
            individual.prune_casual_history(day, fields.casual_lookback_days);
            if individual.age >= fields.max_age {
                aged_out.push(PersonId(index));
            }
        }
        for person_id in &aged_out {
            self.replace_person(*person_id);
        }
        aged_out
    }

    fn population_size(&self) -> usize {
        self.try_get_data::<PeoplePlugin>()
            .map_or(0, |data| data.individuals.len())
    }

    fn get_person(&self, person_id: PersonId) -> &Individual {
        &self.get_data(PeoplePlugin).individuals[person_id.0]
    }

    fn get_person_mut(&mut self, person_id: PersonId) -> &mut Individual {
        &mut self.get_data_mut(PeoplePlugin).individuals[person_id.0]
    }

    fn person_ids(&self) -> impl Iterator<Item = PersonId> {
        (0..self.population_size()).map(PersonId)
    }

    fn people_matching(&self, classifier: &Classifier) -> Vec<PersonId> {
        let day = self.get_current_day();
        self.try_get_data::<PeoplePlugin>()
            .map(|data| {
                data.individuals
                    .iter()
                    .enumerate()
                    .filter(|(_, individual)| classifier.matches(individual, day))
                    .map(|(index, _)| PersonId(index))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn count_matching(&self, classifier: &Classifier) -> usize {
        let day = self.get_current_day();
        self.try_get_data::<PeoplePlugin>().map_or(0, |data| {
            data.individuals
                .iter()
                .filter(|individual| classifier.matches(individual, day))
                .count()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::parameters::{BehaviourProportions, RoleImmunity};

    fn context_with(fields: Fields) -> Context {
        let mut context = Context::new();
        context.init_random(42);
        context.set_fields(Arc::new(fields)).unwrap();
        context
    }

    fn small_fields() -> Fields {
        Fields {
            population_size: 200,
            ..Fields::default()
        }
    }

    #[test]
    fn population_is_initialised_with_ages_in_range() {
        let mut context = context_with(small_fields());
        context.init_population();
        assert_eq!(context.population_size(), 200);
        let fields = context.get_fields();
        for person_id in context.person_ids() {
            let person = context.get_person(person_id);
            assert!(person.age >= fields.min_age && person.age < fields.max_age);
            assert!(!person.is_infected());
        }
    }

    #[test]
    fn uids_are_unique() {
        let mut context = context_with(small_fields());
        context.init_population();
        let mut uids: Vec<u64> = context.person_ids().map(|id| context.get_person(id).uid).collect();
        uids.sort_unstable();
        uids.dedup();
        assert_eq!(uids.len(), 200);
    }

    #[test]
    fn casual_budget_only_for_casual_seekers() {
        let mut context = context_with(Fields {
            behaviour_proportions: BehaviourProportions {
                regular_only: 1.0,
                casual_only: 0.0,
                both: 0.0,
            },
            ..small_fields()
        });
        context.init_population();
        for person_id in context.person_ids() {
            let person = context.get_person(person_id);
            assert_eq!(person.behaviour, Behaviour::RegularOnly);
            assert_eq!(person.max_casual_partners, 0);
        }
    }

    #[test]
    fn replacement_keeps_slot_behaviour_and_immunity() {
        let mut fields = small_fields();
        fields.site_immunity[Site::A.index()] = RoleImmunity {
            insertive: 0.0,
            receptive: 1.0,
        };
        let mut context = context_with(fields);
        context.init_population();
        let person_id = PersonId::new(3);
        {
            let person = context.get_person_mut(person_id);
            person.site_mut(Site::G).status = InfectionStatus::Symptomatic;
            person.site_mut(Site::G).strains = StrainMask::single(0);
        }
        let old = context.get_person(person_id).clone();
        context.replace_person(person_id);

        let new = context.get_person(person_id);
        assert_ne!(new.uid, old.uid);
        assert_eq!(new.behaviour, old.behaviour);
        assert_eq!(new.age, context.get_fields().min_age);
        assert!(!new.is_infected());
        assert!(new.site(Site::A).immunity.protects(SiteRole::Receptive));
        assert!(!new.site(Site::A).immunity.protects(SiteRole::Insertive));
        assert_eq!(context.population_size(), 200);
    }

    #[test]
    fn aging_replaces_at_max_age() {
        let mut context = context_with(small_fields());
        context.init_population();
        let max_age = context.get_fields().max_age;
        context.get_person_mut(PersonId::new(0)).age = max_age - 1;
        context.get_person_mut(PersonId::new(1)).age = max_age - 3;
        let replaced = context.age_population();
        assert!(replaced.contains(&PersonId::new(0)));
        assert!(!replaced.contains(&PersonId::new(1)));
        assert_eq!(context.population_size(), 200);
    }

    #[test]
    fn casual_history_is_pruned() {
        let mut person = {
            let mut context = context_with(small_fields());
            context.generate_person(true)
        };
        person.record_casual_partner(0, 10);
        person.record_casual_partner(5, 11);
        person.record_casual_partner(9, 12);
        person.prune_casual_history(9, 5);
        assert_eq!(person.recent_casual_partners(), 2);
        person.prune_casual_history(10, 5);
        assert_eq!(person.recent_casual_partners(), 1);
    }

    #[test]
    fn casual_budget_renews_after_a_year() {
        let mut person = {
            let mut context = context_with(small_fields());
            context.generate_person(true)
        };
        person.max_casual_partners = 2;
        person.record_casual_partner(0, 10);
        person.record_casual_partner(100, 11);
        assert_eq!(person.remaining_casual_budget(), 0);
        person.prune_casual_history(364, 182);
        assert_eq!(person.recent_casual_partners(), 0);
        assert_eq!(person.remaining_casual_budget(), 0);
        person.prune_casual_history(365, 182);
        assert_eq!(person.remaining_casual_budget(), 1);
    }

    #[test]
    fn scheduled_screening_ages() {
        let mut context = context_with(Fields {
            screening: ScreeningPolicy::Scheduled {
                mean_interval_days: 90.0,
                sites: vec![Site::G],
            },
            ..small_fields()
        });
        let person = context.generate_person(true);
        assert!(person.next_screening_age.unwrap() > person.age);
    }

    #[test]
    fn vaccine_expiry() {
        let protection = VaccineProtection {
            vaccinated_day: 0,
            expires_day: Some(10),
            doses: 1,
        };
        assert!(protection.is_active(9));
        assert!(!protection.is_active(10));
    }
}
