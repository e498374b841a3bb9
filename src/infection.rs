//! Per-site infection progression and strain bookkeeping.
//!
//! Each site moves through `Susceptible -> Exposed -> Asymptomatic |
//! Symptomatic -> Susceptible | Immune`, with the duration of every stage drawn
//! once on entry from the model of the site's dominant strain. Non-dominant
//! strains carry their own clearance age and re-emerge when the dominant strain
//! clears before them.
use std::rc::Rc;

use log::trace;
use rand_distr::Gamma;
use serde::{Deserialize, Serialize};

use crate::parameters::{ContextParametersExt, HasMultiStrain, MeanSd, SiteInfectionParams};
use crate::people::{ContextPeopleExt, PersonId, Site, SiteState};
use crate::random::ContextRandomExt;
use crate::strain::{strain_dynamics_for, StrainDynamics, StrainMask, MAX_STRAINS};
use crate::transmission::ExposureEvent;
use crate::{define_data_plugin, define_rng, Context};

pub use crate::people::InfectionStatus;

define_rng!(InfectionRng);

/// Draws a stage duration in whole days. A zero mean skips the stage, a zero
/// SD gives the mean, anything else is Gamma distributed with the given mean
/// and SD. Non-skipped stages last at least a day.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn sample_stage_days(context: &Context, stage: MeanSd) -> u32 {
    if stage.mean <= 0.0 {
        return 0;
    }
    let days = if stage.sd <= 0.0 {
        stage.mean
    } else {
        let shape = (stage.mean / stage.sd).powi(2);
        let scale = stage.sd * stage.sd / stage.mean;
        match Gamma::new(shape, scale) {
            Ok(gamma) => context.sample_distr(InfectionRng, gamma),
            Err(_) => stage.mean,
        }
    };
    (days.ceil() as u32).max(1)
}

/// Cumulative counters of new infections.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidenceCounts {
    /// New infections of a susceptible site, per site.
    pub sites: [u64; 3],
    /// New acquisitions of each strain, including by already-infected sites.
    pub strains: [u64; MAX_STRAINS],
    /// Treatment courses given.
    pub treatments: u64,
}

/// What happened while advancing the infection clocks by a day.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgressReport {
    /// Individuals whose symptomatic stage ended and who now seek treatment.
    pub seeking_treatment: Vec<PersonId>,
    /// Sites that cleared their last strain.
    pub cleared: u32,
}

struct InfectionData {
    /// Site models per strain.
    models: Vec<[SiteInfectionParams; 3]>,
    dynamics: Option<Rc<dyn StrainDynamics>>,
    incidence: IncidenceCounts,
}

define_data_plugin!(
    InfectionPlugin,
    InfectionData,
    InfectionData {
        models: Vec::new(),
        dynamics: None,
        incidence: IncidenceCounts::default(),
    }
);

/// Removes `removed` from the site along with any masked strain whose own
/// clearance age has passed. If the dominant strain survives, the stage and
/// clock are untouched. Otherwise the next strain in `order` takes over: an
/// exposed site keeps incubating, an infectious one continues asymptomatic
/// for the rest of that strain's course. Returns whether the site is still
/// infected; an empty site is left susceptible.
fn drop_strains(site: &mut SiteState, removed: StrainMask, age: u32, order: &[u8]) -> bool {
    let survivor = site
        .strains
        .dominant(order)
        .filter(|dominant| !removed.contains(*dominant));
    let mut remaining = site.strains.without(removed);
    for strain in remaining.strains() {
        if Some(strain) != survivor && site.clearance_ages[usize::from(strain)] <= age {
            remaining = remaining.without(StrainMask::single(strain));
        }
    }
    for strain in site.strains.without(remaining).strains() {
        site.clearance_ages[usize::from(strain)] = 0;
    }
    site.strains = remaining;
    if survivor.is_some() {
        return true;
    }
    match remaining.dominant(order) {
        Some(_) if site.status == InfectionStatus::Exposed => true,
        Some(dominant) => {
            site.status = InfectionStatus::Asymptomatic;
            site.clock = site.clearance_ages[usize::from(dominant)]
                .saturating_sub(age)
                .max(1);
            true
        }
        None => {
            site.reset();
            false
        }
    }
}

pub trait ContextInfectionExt {
    /// Builds the per-strain site models and strain-dynamics strategy from
    /// the fields.
    fn init_infection(&mut self);

    fn get_strain_dynamics(&self) -> Rc<dyn StrainDynamics>;

    /// Parameters of `site` for `strain`.
    fn get_site_model(&self, strain: u8, site: Site) -> SiteInfectionParams;

    fn get_incidence(&self) -> &IncidenceCounts;

    /// Infects `site` of `person_id` with `strains`. A susceptible site
    /// enters the exposed stage for `exposed_days` (drawn from the incubation
    /// model when `None`); an infected site takes the strains up through the
    /// strain dynamics. Returns whether the site changed.
    fn infect_site(
        &mut self,
        person_id: PersonId,
        site: Site,
        strains: StrainMask,
        exposed_days: Option<u32>,
    ) -> bool;

    /// Applies the day's exposure events in order. Each event is re-checked
    /// against the target's current state, so a site exposed twice is only
    /// infected once.
    fn apply_exposures(&mut self, events: &[ExposureEvent]) -> usize;

    /// Advances every site clock by a day and moves sites whose stage ended.
    fn progress_infections(&mut self) -> ProgressReport;

    /// Removes `strains` from `site`. Remaining strains re-emerge; an empty
    /// site becomes susceptible.
    fn clear_strains(&mut self, person_id: PersonId, site: Site, strains: StrainMask);

    /// Replaces the strains at an infected `site` with `strains`, keeping the
    /// current stage. Newly carried strains share the remaining course.
    fn convert_strains(&mut self, person_id: PersonId, site: Site, strains: StrainMask);

    /// Counts a treatment course.
    fn record_treatment(&mut self);

    /// Replaces the incidence counters, used when importing a saved state.
    fn set_incidence(&mut self, incidence: IncidenceCounts);
}

trait InfectionStages {
    fn begin_infectious(&mut self, person_id: PersonId, site: Site);
    fn end_infectious(&mut self, person_id: PersonId, site: Site) -> bool;
    fn truncate_coinfections(&mut self, person_id: PersonId, site: Site, clock: u32);
}

impl InfectionStages for Context {
    fn begin_infectious(&mut self, person_id: PersonId, site: Site) {
        let dynamics = self.get_strain_dynamics();
        let (age, strains) = {
            let person = self.get_person(person_id);
            (person.age, person.site(site).strains)
        };
        let Some(dominant) = dynamics.dominant(strains) else {
            self.get_person_mut(person_id).site_mut(site).reset();
            return;
        };
        let model = self.get_site_model(dominant, site);
        let symptomatic = self.sample_bool(InfectionRng, model.symptomatic_probability);
        let (status, clock) = if symptomatic {
            (
                InfectionStatus::Symptomatic,
                sample_stage_days(self, model.symptomatic),
            )
        } else {
            (
                InfectionStatus::Asymptomatic,
                sample_stage_days(self, model.asymptomatic),
            )
        };
        let state = self.get_person_mut(person_id).site_mut(site);
        state.status = status;
        state.clock = clock;
        state.clearance_ages[usize::from(dominant)] = age + clock;
        trace!("{person_id}:{site} became {status:?} for {clock} days");
        if symptomatic {
            self.truncate_coinfections(person_id, site, clock);
        }
    }

    /// Natural clearance of the dominant strain. Returns whether the site
    /// cleared completely.
    fn end_infectious(&mut self, person_id: PersonId, site: Site) -> bool {
        let dynamics = self.get_strain_dynamics();
        let (age, strains) = {
            let person = self.get_person(person_id);
            (person.age, person.site(site).strains)
        };
        let Some(dominant) = dynamics.dominant(strains) else {
            self.get_person_mut(person_id).site_mut(site).reset();
            return true;
        };
        let immunity = self.get_site_model(dominant, site).immunity;
        let state = self.get_person_mut(person_id).site_mut(site);
        if drop_strains(state, StrainMask::single(dominant), age, dynamics.dominance_order()) {
            trace!("{person_id}:{site} strain {} re-emerged", state.strains);
            return false;
        }
        let immune_days = sample_stage_days(self, immunity);
        if immune_days > 0 {
            let state = self.get_person_mut(person_id).site_mut(site);
            state.status = InfectionStatus::Immune;
            state.clock = immune_days;
        }
        true
    }

    /// Symptom onset at `site` shortens asymptomatic infections at the
    /// person's other sites to `clock`, each with its own probability.
    fn truncate_coinfections(&mut self, person_id: PersonId, site: Site, clock: u32) {
        let fields = self.get_fields();
        for other in Site::ALL {
            if other == site {
                continue;
            }
            let state = self.get_person(person_id).site(other);
            if state.status != InfectionStatus::Asymptomatic || state.clock <= clock {
                continue;
            }
            if self.sample_bool(InfectionRng, fields.coinfection_truncation[other.index()]) {
                self.get_person_mut(person_id).site_mut(other).clock = clock;
            }
        }
    }
}

impl ContextInfectionExt for Context {
    fn init_infection(&mut self) {
        let fields = self.get_fields();
        let models = match fields.strains() {
            Some(settings) if !settings.site_models.is_empty() => settings.site_models.clone(),
            _ => vec![fields.infection; usize::from(fields.strain_count())],
        };
        let data = self.get_data_mut(InfectionPlugin);
        data.models = models;
        data.dynamics = Some(strain_dynamics_for(&fields));
        data.incidence = IncidenceCounts::default();
    }

    fn get_strain_dynamics(&self) -> Rc<dyn StrainDynamics> {
        let dynamics = self
            .get_data(InfectionPlugin)
            .dynamics
            .as_ref()
            .expect("Infection model has not been initialised");
        Rc::clone(dynamics)
    }

    fn get_site_model(&self, strain: u8, site: Site) -> SiteInfectionParams {
        let models = &self.get_data(InfectionPlugin).models;
        models
            .get(usize::from(strain))
            .or_else(|| models.first())
            .map_or_else(SiteInfectionParams::default, |models| {
                models[site.index()]
            })
    }

    fn get_incidence(&self) -> &IncidenceCounts {
        &self.get_data(InfectionPlugin).incidence
    }

    fn infect_site(
        &mut self,
        person_id: PersonId,
        site: Site,
        strains: StrainMask,
        exposed_days: Option<u32>,
    ) -> bool {
        let dynamics = self.get_strain_dynamics();
        let (age, state) = {
            let person = self.get_person(person_id);
            (person.age, person.site(site).clone())
        };
        if !dynamics.can_acquire(&state, strains) {
            return false;
        }

        if state.status == InfectionStatus::Susceptible {
            let Some(dominant) = dynamics.dominant(strains) else {
                return false;
            };
            let model = self.get_site_model(dominant, site);
            let incubation =
                exposed_days.unwrap_or_else(|| sample_stage_days(self, model.incubation));
            // Strains other than the dominant one run their own course.
            let mut clearance_ages = [0; MAX_STRAINS];
            for strain in strains.strains().filter(|strain| *strain != dominant) {
                let course = sample_stage_days(self, self.get_site_model(strain, site).asymptomatic);
                clearance_ages[usize::from(strain)] = age + incubation + course;
            }
            {
                let state = self.get_person_mut(person_id).site_mut(site);
                state.status = InfectionStatus::Exposed;
                state.strains = strains;
                state.clock = incubation;
                state.clearance_ages = clearance_ages;
            }
            let incidence = &mut self.get_data_mut(InfectionPlugin).incidence;
            incidence.sites[site.index()] += 1;
            for strain in strains.strains() {
                incidence.strains[usize::from(strain)] += 1;
            }
            trace!("{person_id}:{site} exposed to {strains} for {incubation} days");
            if incubation == 0 {
                self.begin_infectious(person_id, site);
            }
            return true;
        }

        let combined = dynamics.acquire(self, state.strains, strains);
        if combined == state.strains {
            return false;
        }
        let added = combined.without(state.strains);
        let mut clearance_ages = state.clearance_ages;
        for strain in state.strains.without(combined).strains() {
            clearance_ages[usize::from(strain)] = 0;
        }
        for strain in added.strains() {
            let course = sample_stage_days(self, self.get_site_model(strain, site).asymptomatic);
            clearance_ages[usize::from(strain)] = age + state.clock + course;
        }
        let previous = dynamics.dominant(state.strains);
        let dominant = dynamics.dominant(combined);
        let mut clock = state.clock;
        if previous != dominant {
            // The displaced strain is masked from now on and needs a course of
            // its own; an infectious site already has one.
            if let Some(displaced) = previous.filter(|strain| combined.contains(*strain)) {
                if state.status == InfectionStatus::Exposed {
                    let course =
                        sample_stage_days(self, self.get_site_model(displaced, site).asymptomatic);
                    clearance_ages[usize::from(displaced)] = age + state.clock + course;
                }
            }
            // The new dominant strain governs the rest of the infectious stage.
            if let Some(dominant) = dominant.filter(|_| state.status.is_infectious()) {
                clock = clearance_ages[usize::from(dominant)]
                    .saturating_sub(age)
                    .max(1);
            }
        }
        {
            let state = self.get_person_mut(person_id).site_mut(site);
            state.strains = combined;
            state.clearance_ages = clearance_ages;
            state.clock = clock;
        }
        let incidence = &mut self.get_data_mut(InfectionPlugin).incidence;
        for strain in added.strains() {
            incidence.strains[usize::from(strain)] += 1;
        }
        trace!("{person_id}:{site} strains {} -> {combined}", state.strains);
        true
    }

    fn apply_exposures(&mut self, events: &[ExposureEvent]) -> usize {
        for person_id in self.person_ids().collect::<Vec<_>>() {
            for site in Site::ALL {
                self.get_person_mut(person_id)
                    .site_mut(site)
                    .last_act_infectious = false;
            }
        }
        let mut applied = 0;
        for event in events {
            self.get_person_mut(event.target)
                .site_mut(event.site)
                .last_act_infectious = true;
            if self.infect_site(event.target, event.site, event.strains, None) {
                applied += 1;
            }
        }
        applied
    }

    fn progress_infections(&mut self) -> ProgressReport {
        let fields = self.get_fields();
        let dynamics = self.get_strain_dynamics();
        let mut report = ProgressReport::default();

        for person_id in self.person_ids().collect::<Vec<_>>() {
            let mut seeks_treatment = false;
            for site in Site::ALL {
                let (status, clock, age) = {
                    let person = self.get_person_mut(person_id);
                    let age = person.age;
                    let state = person.site_mut(site);
                    if state.status == InfectionStatus::Susceptible {
                        continue;
                    }
                    state.clock = state.clock.saturating_sub(1);
                    (state.status, state.clock, age)
                };

                // Masked strains past their own clearance age drop out.
                if status.is_infected() {
                    let state = self.get_person_mut(person_id).site_mut(site);
                    if let Some(dominant) = dynamics.dominant(state.strains) {
                        for strain in state.strains.strains() {
                            if strain != dominant
                                && state.clearance_ages[usize::from(strain)] <= age
                            {
                                state.strains = state.strains.without(StrainMask::single(strain));
                                state.clearance_ages[usize::from(strain)] = 0;
                            }
                        }
                    }
                }

                if clock > 0 {
                    continue;
                }
                match status {
                    InfectionStatus::Exposed => self.begin_infectious(person_id, site),
                    InfectionStatus::Asymptomatic => {
                        if self.end_infectious(person_id, site) {
                            report.cleared += 1;
                        }
                    }
                    InfectionStatus::Symptomatic if fields.treat_symptomatic => {
                        seeks_treatment = true;
                    }
                    InfectionStatus::Symptomatic => {
                        if self.end_infectious(person_id, site) {
                            report.cleared += 1;
                        }
                    }
                    InfectionStatus::Immune => {
                        self.get_person_mut(person_id).site_mut(site).reset();
                    }
                    InfectionStatus::Susceptible => {}
                }
            }
            if seeks_treatment {
                report.seeking_treatment.push(person_id);
            }
        }
        report
    }

    fn clear_strains(&mut self, person_id: PersonId, site: Site, strains: StrainMask) {
        let dynamics = self.get_strain_dynamics();
        let person = self.get_person_mut(person_id);
        let age = person.age;
        let state = person.site_mut(site);
        if !state.status.is_infected() {
            return;
        }
        drop_strains(state, strains, age, dynamics.dominance_order());
    }

    fn convert_strains(&mut self, person_id: PersonId, site: Site, strains: StrainMask) {
        if strains.is_empty() {
            self.get_person_mut(person_id).site_mut(site).reset();
            return;
        }
        let person = self.get_person_mut(person_id);
        let age = person.age;
        let state = person.site_mut(site);
        if !state.status.is_infected() {
            return;
        }
        let added = strains.without(state.strains);
        for strain in state.strains.without(strains).strains() {
            state.clearance_ages[usize::from(strain)] = 0;
        }
        for strain in added.strains() {
            state.clearance_ages[usize::from(strain)] = age + state.clock.max(1);
        }
        trace!("{person_id}:{site} converted {} -> {strains}", state.strains);
        state.strains = strains;
        let incidence = &mut self.get_data_mut(InfectionPlugin).incidence;
        for strain in added.strains() {
            incidence.strains[usize::from(strain)] += 1;
        }
    }

    fn record_treatment(&mut self) {
        self.get_data_mut(InfectionPlugin).incidence.treatments += 1;
    }

    fn set_incidence(&mut self, incidence: IncidenceCounts) {
        self.get_data_mut(InfectionPlugin).incidence = incidence;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::parameters::{Fields, MixingRule, StrainSettings};

    fn context_with(fields: Fields) -> Context {
        let mut context = Context::new();
        context.init_random(23);
        context.set_fields(Arc::new(fields)).unwrap();
        context.init_population();
        context.init_infection();
        context
    }

    fn fixed(mean: f64) -> MeanSd {
        MeanSd::new(mean, 0.0)
    }

    fn deterministic_fields() -> Fields {
        let mut fields = Fields {
            population_size: 5,
            ..Fields::default()
        };
        for params in &mut fields.infection {
            params.incubation = fixed(2.0);
            params.asymptomatic = fixed(5.0);
            params.symptomatic = fixed(3.0);
            params.symptomatic_probability = 0.0;
        }
        fields
    }

    #[test]
    fn stage_durations() {
        let mut context = Context::new();
        context.init_random(1);
        assert_eq!(sample_stage_days(&context, MeanSd::zero()), 0);
        assert_eq!(sample_stage_days(&context, fixed(4.2)), 5);
        assert_eq!(sample_stage_days(&context, fixed(0.1)), 1);
        let n = 4000;
        let mean = (0..n)
            .map(|_| f64::from(sample_stage_days(&context, MeanSd::new(30.0, 10.0))))
            .sum::<f64>()
            / f64::from(n);
        // Ceiling adds about half a day.
        assert!((mean - 30.5).abs() < 1.0);
    }

    #[test]
    fn site_goes_through_stages() {
        let mut context = context_with(deterministic_fields());
        let person = PersonId::new(0);
        assert!(context.infect_site(person, Site::G, StrainMask::single(0), None));
        assert_eq!(context.get_incidence().sites, [1, 0, 0]);
        assert_eq!(
            context.get_person(person).site(Site::G).status,
            InfectionStatus::Exposed
        );
        for _ in 0..2 {
            context.progress_infections();
        }
        assert_eq!(
            context.get_person(person).site(Site::G).status,
            InfectionStatus::Asymptomatic
        );
        let mut cleared = 0;
        for _ in 0..5 {
            cleared += context.progress_infections().cleared;
        }
        assert_eq!(cleared, 1);
        assert_eq!(
            context.get_person(person).site(Site::G).status,
            InfectionStatus::Susceptible
        );
    }

    #[test]
    fn zero_incubation_is_immediately_infectious() {
        let mut fields = deterministic_fields();
        fields.infection[Site::A.index()].incubation = MeanSd::zero();
        let mut context = context_with(fields);
        context.infect_site(PersonId::new(1), Site::A, StrainMask::single(0), None);
        assert!(context
            .get_person(PersonId::new(1))
            .site(Site::A)
            .status
            .is_infectious());
    }

    #[test]
    fn symptomatic_stage_end_seeks_treatment() {
        let mut fields = deterministic_fields();
        fields.infection[Site::G.index()].symptomatic_probability = 1.0;
        let mut context = context_with(fields);
        let person = PersonId::new(2);
        context.infect_site(person, Site::G, StrainMask::single(0), Some(1));
        context.progress_infections();
        assert_eq!(
            context.get_person(person).site(Site::G).status,
            InfectionStatus::Symptomatic
        );
        let mut seeking = Vec::new();
        for _ in 0..3 {
            seeking.extend(context.progress_infections().seeking_treatment);
        }
        assert_eq!(seeking, vec![person]);
    }

    #[test]
    fn immunity_stage_wanes() {
        let mut fields = deterministic_fields();
        fields.infection[Site::R.index()].immunity = fixed(4.0);
        let mut context = context_with(fields);
        let person = PersonId::new(3);
        context.infect_site(person, Site::R, StrainMask::single(0), Some(1));
        for _ in 0..6 {
            context.progress_infections();
        }
        assert_eq!(
            context.get_person(person).site(Site::R).status,
            InfectionStatus::Immune
        );
        assert!(!context.infect_site(person, Site::R, StrainMask::single(0), None));
        for _ in 0..4 {
            context.progress_infections();
        }
        assert_eq!(
            context.get_person(person).site(Site::R).status,
            InfectionStatus::Susceptible
        );
    }

    #[test]
    fn symptom_onset_truncates_coinfection() {
        let mut fields = deterministic_fields();
        fields.infection[Site::A.index()].asymptomatic = fixed(50.0);
        fields.infection[Site::G.index()].symptomatic_probability = 1.0;
        fields.coinfection_truncation[Site::A.index()] = 1.0;
        let mut context = context_with(fields);
        let person = PersonId::new(4);
        context.infect_site(person, Site::A, StrainMask::single(0), Some(1));
        context.progress_infections();
        assert_eq!(context.get_person(person).site(Site::A).clock, 50);
        context.infect_site(person, Site::G, StrainMask::single(0), Some(1));
        context.progress_infections();
        // Cut to the 3-day symptomatic stage, then counted down with the day.
        assert_eq!(context.get_person(person).site(Site::A).clock, 2);
    }

    #[test]
    fn masked_strain_re_emerges() {
        let mut fields = deterministic_fields();
        fields.strains = Some(StrainSettings {
            count: 2,
            priority: vec![0, 1],
            ..StrainSettings::default()
        });
        fields.infection[Site::G.index()].asymptomatic = fixed(5.0);
        let mut context = context_with(fields);
        let person = PersonId::new(0);
        context.infect_site(person, Site::G, StrainMask::single(0), Some(1));
        context.progress_infections();
        // Strain 1 arrives while strain 0 is dominant and runs a longer course.
        context.infect_site(person, Site::G, StrainMask::single(1), None);
        let state = context.get_person(person).site(Site::G).clone();
        assert_eq!(state.strains, StrainMask::from_bits(0b11));
        assert!(state.clearance_ages[1] > state.clearance_ages[0]);

        for _ in 0..5 {
            context.progress_infections();
        }
        let state = context.get_person(person).site(Site::G);
        assert_eq!(state.strains, StrainMask::single(1));
        assert_eq!(state.status, InfectionStatus::Asymptomatic);
        assert!(state.clock > 0);
        assert_eq!(context.get_incidence().strains[1], 1);
    }

    #[test]
    fn new_dominant_strain_takes_over_the_clock() {
        let mut fields = deterministic_fields();
        let short = fields.infection;
        let mut long = short;
        for params in &mut long {
            params.asymptomatic = fixed(50.0);
        }
        fields.strains = Some(StrainSettings {
            count: 2,
            priority: vec![1, 0],
            site_models: vec![short, long],
            ..StrainSettings::default()
        });
        let mut context = context_with(fields);
        let person = PersonId::new(0);
        let step = |context: &mut Context| {
            context.progress_infections();
            context.get_person_mut(person).age += 1;
        };
        context.infect_site(person, Site::G, StrainMask::single(0), Some(1));
        step(&mut context);
        step(&mut context);
        assert_eq!(context.get_person(person).site(Site::G).clock, 4);

        // Strain 1 outranks strain 0 and runs a 50 day course after it.
        assert!(context.infect_site(person, Site::G, StrainMask::single(1), None));
        assert_eq!(context.get_person(person).site(Site::G).clock, 54);

        for _ in 0..6 {
            step(&mut context);
        }
        let state = context.get_person(person).site(Site::G);
        assert_eq!(state.strains, StrainMask::single(1));
        assert_eq!(state.status, InfectionStatus::Asymptomatic);
        assert_eq!(state.clock, 48);
    }

    #[test]
    fn mixing_table_applies_on_superinfection() {
        let mut fields = deterministic_fields();
        fields.strains = Some(StrainSettings {
            count: 2,
            mixing: vec![MixingRule {
                current: 0b01,
                incoming: 0b10,
                result: 0b10,
                probability: 1.0,
            }],
            ..StrainSettings::default()
        });
        let mut context = context_with(fields);
        let person = PersonId::new(1);
        context.infect_site(person, Site::A, StrainMask::single(0), None);
        assert!(context.infect_site(person, Site::A, StrainMask::single(1), None));
        let state = context.get_person(person).site(Site::A);
        assert_eq!(state.strains, StrainMask::single(1));
        assert_eq!(state.clearance_ages[0], 0);
    }

    #[test]
    fn clearing_all_strains_returns_to_susceptible() {
        let mut context = context_with(deterministic_fields());
        let person = PersonId::new(0);
        context.infect_site(person, Site::G, StrainMask::single(0), Some(1));
        context.progress_infections();
        context.clear_strains(person, Site::G, StrainMask::single(0));
        assert_eq!(
            context.get_person(person).site(Site::G).status,
            InfectionStatus::Susceptible
        );
    }

    #[test]
    fn exposures_set_last_act_flag() {
        let mut context = context_with(deterministic_fields());
        let event = ExposureEvent {
            day: 0,
            target: PersonId::new(2),
            site: Site::R,
            source: PersonId::new(3),
            source_site: Site::G,
            strains: StrainMask::single(0),
        };
        assert_eq!(context.apply_exposures(&[event.clone(), event]), 1);
        assert!(context.get_person(PersonId::new(2)).site(Site::R).last_act_infectious);
        context.apply_exposures(&[]);
        assert!(!context.get_person(PersonId::new(2)).site(Site::R).last_act_infectious);
    }
}
