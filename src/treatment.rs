//! Treatment of infected individuals.
//!
//! A [`TreatmentStrategy`] decides, site by site, which strains a course
//! clears and whether the site is converted to another strain instead.
use std::rc::Rc;

use log::trace;

use crate::define_data_plugin;
use crate::define_rng;
use crate::infection::{sample_stage_days, ContextInfectionExt, InfectionStatus};
use crate::parameters::{ContextParametersExt, ConversionRule, Fields, HasMultiStrain, TreatmentKind};
use crate::people::{ContextPeopleExt, PersonId, Site};
use crate::random::ContextRandomExt;
use crate::strain::StrainMask;
use crate::Context;

define_rng!(TreatmentRng);

/// The effect of a treatment course on one site.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SiteTreatment {
    /// The listed strains are cleared; the others stay.
    Cleared(StrainMask),
    /// The site now carries the given strains instead.
    Converted(StrainMask),
}

pub trait TreatmentStrategy {
    fn treat_site(&self, context: &Context, site: Site, current: StrainMask) -> SiteTreatment;
}

/// Each strain is cleared with its own efficacy.
pub struct Clearance {
    efficacy: Vec<f64>,
}

impl Clearance {
    #[must_use]
    pub fn new(efficacy: Vec<f64>) -> Self {
        Clearance { efficacy }
    }

    fn efficacy(&self, strain: u8) -> f64 {
        self.efficacy.get(usize::from(strain)).copied().unwrap_or(1.0)
    }
}

impl TreatmentStrategy for Clearance {
    fn treat_site(&self, context: &Context, _site: Site, current: StrainMask) -> SiteTreatment {
        let cleared = current
            .strains()
            .filter(|strain| context.sample_bool(TreatmentRng, self.efficacy(*strain)))
            .fold(StrainMask::NONE, |mask, strain| mask | StrainMask::single(strain));
        SiteTreatment::Cleared(cleared)
    }
}

/// A matching conversion rule turns the site into another strain mask, as
/// when treatment selects for a resistant strain. Sites no rule converts are
/// treated by clearance.
pub struct Conversion {
    clearance: Clearance,
    rules: Vec<ConversionRule>,
}

impl Conversion {
    #[must_use]
    pub fn new(clearance: Clearance, rules: Vec<ConversionRule>) -> Self {
        Conversion { clearance, rules }
    }
}

impl TreatmentStrategy for Conversion {
    fn treat_site(&self, context: &Context, site: Site, current: StrainMask) -> SiteTreatment {
        for rule in self
            .rules
            .iter()
            .filter(|rule| rule.site == site && rule.from == current.bits())
        {
            if context.sample_bool(TreatmentRng, rule.probability) {
                return SiteTreatment::Converted(StrainMask::from_bits(rule.to));
            }
        }
        self.clearance.treat_site(context, site, current)
    }
}

#[must_use]
pub fn treatment_strategy_for(fields: &Fields) -> Rc<dyn TreatmentStrategy> {
    let (efficacy, rules) = fields.strains().map_or_else(
        || (Vec::new(), Vec::new()),
        |settings| {
            (
                settings.treatment_efficacy.clone(),
                settings.conversion.clone(),
            )
        },
    );
    let clearance = Clearance::new(efficacy);
    match fields.treatment {
        TreatmentKind::Clearance => Rc::new(clearance),
        TreatmentKind::Conversion => Rc::new(Conversion::new(clearance, rules)),
    }
}

struct TreatmentData {
    strategy: Option<Rc<dyn TreatmentStrategy>>,
}

define_data_plugin!(
    TreatmentPlugin,
    TreatmentData,
    TreatmentData { strategy: None }
);

pub trait ContextTreatmentExt {
    fn init_treatment(&mut self);

    /// Gives `person_id` a treatment course acting on every infected site.
    /// Returns `false` without counting a course if nothing was infected.
    fn treat_person(&mut self, person_id: PersonId) -> bool;
}

impl ContextTreatmentExt for Context {
    fn init_treatment(&mut self) {
        let strategy = treatment_strategy_for(&self.get_fields());
        self.get_data_mut(TreatmentPlugin).strategy = Some(strategy);
    }

    fn treat_person(&mut self, person_id: PersonId) -> bool {
        if !self.get_person(person_id).is_infected() {
            return false;
        }
        let strategy = self
            .get_data(TreatmentPlugin)
            .strategy
            .clone()
            .unwrap_or_else(|| treatment_strategy_for(&self.get_fields()));

        for site in Site::ALL {
            let state = self.get_person(person_id).site(site);
            if !state.status.is_infected() {
                continue;
            }
            let current = state.strains;
            match strategy.treat_site(self, site, current) {
                SiteTreatment::Cleared(cleared) => {
                    if !cleared.is_empty() {
                        self.clear_strains(person_id, site, cleared);
                    }
                }
                SiteTreatment::Converted(strains) => {
                    self.convert_strains(person_id, site, strains);
                }
            }

            // A failed course leaves the person ill for another spell.
            let state = self.get_person(person_id).site(site);
            if state.status == InfectionStatus::Symptomatic && state.clock == 0 {
                let dominant = self.get_strain_dynamics().dominant(state.strains).unwrap_or(0);
                let spell = sample_stage_days(self, self.get_site_model(dominant, site).symptomatic);
                self.get_person_mut(person_id).site_mut(site).clock = spell.max(1);
            }
        }
        self.get_person_mut(person_id).treatments += 1;
        self.record_treatment();
        trace!("treated {person_id}");
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::parameters::{MeanSd, StrainSettings};

    fn context_with(fields: Fields) -> Context {
        let mut context = Context::new();
        context.init_random(31);
        context.set_fields(Arc::new(fields)).unwrap();
        context.init_population();
        context.init_infection();
        context.init_treatment();
        context
    }

    fn two_strains(efficacy: Vec<f64>, conversion: Vec<ConversionRule>) -> Fields {
        Fields {
            population_size: 3,
            treatment: if conversion.is_empty() {
                TreatmentKind::Clearance
            } else {
                TreatmentKind::Conversion
            },
            strains: Some(StrainSettings {
                count: 2,
                treatment_efficacy: efficacy,
                conversion,
                ..StrainSettings::default()
            }),
            ..Fields::default()
        }
    }

    #[test]
    fn treatment_clears_to_susceptible() {
        let mut context = context_with(Fields {
            population_size: 3,
            ..Fields::default()
        });
        let person = PersonId::new(0);
        context.infect_site(person, Site::A, StrainMask::single(0), Some(3));
        assert!(context.treat_person(person));
        assert_eq!(
            context.get_person(person).site(Site::A).status,
            InfectionStatus::Susceptible
        );
        assert_eq!(context.get_incidence().treatments, 1);
        assert_eq!(context.get_person(person).treatments, 1);
    }

    #[test]
    fn uninfected_person_is_not_treated() {
        let mut context = context_with(Fields {
            population_size: 3,
            ..Fields::default()
        });
        assert!(!context.treat_person(PersonId::new(1)));
        assert_eq!(context.get_incidence().treatments, 0);
    }

    #[test]
    fn resistant_strain_survives_treatment() {
        let mut context = context_with(two_strains(vec![1.0, 0.0], Vec::new()));
        let person = PersonId::new(0);
        context.infect_site(
            person,
            Site::G,
            StrainMask::single(0) | StrainMask::single(1),
            Some(3),
        );
        context.treat_person(person);
        let state = context.get_person(person).site(Site::G);
        assert_eq!(state.strains, StrainMask::single(1));
        assert!(state.status.is_infected());
    }

    #[test]
    fn exposed_site_keeps_incubating_after_partial_clearance() {
        for (efficacy, survivor) in [(vec![0.0, 1.0], 0), (vec![1.0, 0.0], 1)] {
            let mut fields = two_strains(efficacy, Vec::new());
            if let Some(settings) = fields.strains.as_mut() {
                settings.priority = vec![0, 1];
            }
            let mut context = context_with(fields);
            let person = PersonId::new(0);
            context.infect_site(person, Site::G, StrainMask::from_bits(0b11), Some(3));
            assert!(context.treat_person(person));
            let state = context.get_person(person).site(Site::G);
            assert_eq!(state.status, InfectionStatus::Exposed);
            assert_eq!(state.strains, StrainMask::single(survivor));
            assert_eq!(state.clock, 3);
        }
    }

    #[test]
    fn conversion_replaces_strain() {
        let mut context = context_with(two_strains(
            vec![1.0, 1.0],
            vec![ConversionRule {
                site: Site::R,
                from: 0b01,
                to: 0b10,
                probability: 1.0,
            }],
        ));
        let person = PersonId::new(2);
        context.infect_site(person, Site::R, StrainMask::single(0), Some(3));
        context.infect_site(person, Site::G, StrainMask::single(0), Some(3));
        context.treat_person(person);
        let person = context.get_person(person);
        assert_eq!(person.site(Site::R).strains, StrainMask::single(1));
        // No rule for the genital site.
        assert_eq!(person.site(Site::G).status, InfectionStatus::Susceptible);
    }

    #[test]
    fn failed_treatment_extends_symptoms() {
        let mut fields = two_strains(vec![0.0, 0.0], Vec::new());
        fields.infection[Site::G.index()].symptomatic_probability = 1.0;
        fields.infection[Site::G.index()].symptomatic = MeanSd::new(4.0, 0.0);
        let mut context = context_with(fields);
        let person = PersonId::new(1);
        context.infect_site(person, Site::G, StrainMask::single(0), Some(1));
        for _ in 0..5 {
            context.progress_infections();
        }
        assert_eq!(context.get_person(person).site(Site::G).clock, 0);
        context.treat_person(person);
        let state = context.get_person(person).site(Site::G);
        assert_eq!(state.status, InfectionStatus::Symptomatic);
        assert_eq!(state.clock, 4);
    }
}
