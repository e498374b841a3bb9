//! Sexual acts and the exposure events they produce.
//!
//! Every day each active relationship draws which of its act types occur and
//! whether each is condom-protected. The site pathways of every unprotected act
//! are unioned, so each ordered (source site, target site) pair of a
//! relationship gets a single infection opportunity per day even when several
//! acts couple the same sites. Successful transmissions are returned as
//! [`ExposureEvent`]s for the infection model to apply.
use std::fmt::{self, Display};
use std::rc::Rc;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::infection::ContextInfectionExt;
use crate::parameters::{apply_adjustment, ContextParametersExt, Fields, HasVaccination, TopologyKind};
use crate::partnership::{ContextPartnershipExt, PartnershipKind, Relationship};
use crate::people::{ContextPeopleExt, Individual, PersonId, Site, SiteRole};
use crate::random::ContextRandomExt;
use crate::strain::StrainMask;
use crate::{define_data_plugin, define_rng, Context, Day};

define_rng!(TransmissionRng);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActType {
    Anal,
    Oral,
    Rimming,
    Kissing,
    /// Genital-only intercourse.
    Genital,
    /// Intercourse that may be genital or anal within the same act.
    GenitalAnal,
}

impl ActType {
    pub const COUNT: usize = 6;
    pub const ALL: [ActType; ActType::COUNT] = [
        ActType::Anal,
        ActType::Oral,
        ActType::Rimming,
        ActType::Kissing,
        ActType::Genital,
        ActType::GenitalAnal,
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            ActType::Anal => 0,
            ActType::Oral => 1,
            ActType::Rimming => 2,
            ActType::Kissing => 3,
            ActType::Genital => 4,
            ActType::GenitalAnal => 5,
        }
    }
}

impl Display for ActType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActType::Anal => "anal",
            ActType::Oral => "oral",
            ActType::Rimming => "rimming",
            ActType::Kissing => "kissing",
            ActType::Genital => "genital",
            ActType::GenitalAnal => "genital_anal",
        };
        write!(f, "{name}")
    }
}

/// Maps act types to the sites they bring into contact.
pub trait TransmissionTopology {
    /// Act types performed by this population.
    fn acts(&self) -> &'static [ActType];

    /// Site pairs `(insertive partner's site, receptive partner's site)`
    /// coupled by `act`. Each pair transmits in both directions.
    fn couplings(&self, act: ActType) -> &'static [(Site, Site)];
}

/// Men who have sex with men: anal, oral, rimming and kissing.
pub struct MsmTopology;

impl TransmissionTopology for MsmTopology {
    fn acts(&self) -> &'static [ActType] {
        &[ActType::Anal, ActType::Oral, ActType::Rimming, ActType::Kissing]
    }

    fn couplings(&self, act: ActType) -> &'static [(Site, Site)] {
        match act {
            ActType::Anal => &[(Site::G, Site::A)],
            ActType::Oral => &[(Site::G, Site::R)],
            ActType::Rimming => &[(Site::R, Site::A)],
            ActType::Kissing => &[(Site::R, Site::R)],
            ActType::Genital | ActType::GenitalAnal => &[],
        }
    }
}

/// Heterosexual partnerships: genital and combined genital/anal intercourse
/// take the place of anal intercourse.
pub struct HeterosexualTopology;

impl TransmissionTopology for HeterosexualTopology {
    fn acts(&self) -> &'static [ActType] {
        &[
            ActType::Genital,
            ActType::GenitalAnal,
            ActType::Oral,
            ActType::Rimming,
            ActType::Kissing,
        ]
    }

    fn couplings(&self, act: ActType) -> &'static [(Site, Site)] {
        match act {
            ActType::Genital => &[(Site::G, Site::G)],
            ActType::GenitalAnal => &[(Site::G, Site::G), (Site::G, Site::A)],
            ActType::Oral => &[(Site::G, Site::R)],
            ActType::Rimming => &[(Site::R, Site::A)],
            ActType::Kissing => &[(Site::R, Site::R)],
            ActType::Anal => &[],
        }
    }
}

#[must_use]
pub fn topology_for(kind: TopologyKind) -> Rc<dyn TransmissionTopology> {
    match kind {
        TopologyKind::Msm => Rc::new(MsmTopology),
        TopologyKind::Heterosexual => Rc::new(HeterosexualTopology),
    }
}

/// One directed infection opportunity between two partners.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Pathway {
    pub source: PersonId,
    pub source_site: Site,
    pub target: PersonId,
    pub target_site: Site,
}

/// The role the target site plays when exposed from `source_site`.
#[must_use]
pub fn target_role(source_site: Site, target_site: Site) -> SiteRole {
    match (target_site, source_site) {
        (Site::G, _) | (Site::R, Site::A) => SiteRole::Insertive,
        (Site::A, _) | (Site::R, Site::G | Site::R) => SiteRole::Receptive,
    }
}

/// A successful transmission to be applied by the infection model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExposureEvent {
    pub day: Day,
    pub target: PersonId,
    pub site: Site,
    pub source: PersonId,
    pub source_site: Site,
    pub strains: StrainMask,
}

/// What happened during a day's acts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActReport {
    pub occurred: [u32; ActType::COUNT],
    pub protected: [u32; ActType::COUNT],
    /// Individuals who received an unprotected infectious exposure, in id order.
    pub exposed: Vec<PersonId>,
}

impl ActReport {
    #[must_use]
    pub fn occurred(&self, act: ActType) -> u32 {
        self.occurred[act.index()]
    }

    #[must_use]
    pub fn protected(&self, act: ActType) -> u32 {
        self.protected[act.index()]
    }
}

/// Per-act transmission probability from `source_site` of `source` to
/// `target_site` of `target`, clamped into `[0, 1]`.
#[must_use]
pub fn transmission_probability(
    fields: &Fields,
    source: &Individual,
    source_site: Site,
    target: &Individual,
    target_site: Site,
    day: Day,
) -> f64 {
    if target
        .site(target_site)
        .immunity
        .protects(target_role(source_site, target_site))
    {
        return 0.0;
    }
    let mut probability = fields.transmissibility[source_site.index()][target_site.index()]
        * fields.susceptibility[target_site.index()];
    if let Some(vaccination) = fields.vaccination() {
        if source.is_vaccinated(day) {
            probability *= 1.0 - vaccination.transmissibility_efficacy[source_site.index()];
        }
        if target.is_vaccinated(day) {
            probability *= 1.0 - vaccination.susceptibility_efficacy[target_site.index()];
        }
    }
    probability.clamp(0.0, 1.0)
}

/// Condom-use probability for `act` on `day`, after any active adjustments.
#[must_use]
pub fn condom_probability(fields: &Fields, kind: PartnershipKind, act: ActType, day: Day) -> f64 {
    fields
        .adjustments
        .iter()
        .filter(|adjustment| adjustment.applies(day, kind, act))
        .filter_map(|adjustment| adjustment.condom_use)
        .fold(*fields.condom_use.get(kind, act), apply_adjustment)
        .clamp(0.0, 1.0)
}

struct TransmissionData {
    topology: Option<Rc<dyn TransmissionTopology>>,
}

define_data_plugin!(
    TransmissionPlugin,
    TransmissionData,
    TransmissionData { topology: None }
);

pub trait ContextTransmissionExt {
    /// Selects the transmission topology configured in the fields.
    fn init_transmission(&mut self);

    /// Draws the acts of one relationship for today and returns the pathways
    /// opened by unprotected acts, each ordered site pair once.
    fn draw_acts(&self, relationship: &Relationship, report: &mut ActReport) -> Vec<Pathway>;

    /// Performs today's acts in every relationship and evaluates the
    /// resulting pathways. Nothing is mutated; the exposures are returned
    /// for `apply_exposures`.
    fn perform_acts(&self) -> (ActReport, Vec<ExposureEvent>);
}

impl ContextTransmissionExt for Context {
    fn init_transmission(&mut self) {
        let topology = topology_for(self.get_fields().topology);
        self.get_data_mut(TransmissionPlugin).topology = Some(topology);
    }

    fn draw_acts(&self, relationship: &Relationship, report: &mut ActReport) -> Vec<Pathway> {
        let fields = self.get_fields();
        let topology = self
            .get_data(TransmissionPlugin)
            .topology
            .clone()
            .unwrap_or_else(|| topology_for(fields.topology));
        let day = self.get_current_day();
        let mut pathways: Vec<Pathway> = Vec::new();
        let mut open = |pathway: Pathway| {
            if !pathways.contains(&pathway) {
                pathways.push(pathway);
            }
        };

        for act in topology.acts() {
            if !self.sample_bool(TransmissionRng, relationship.act_probability(*act)) {
                continue;
            }
            report.occurred[act.index()] += 1;
            let condom = condom_probability(&fields, relationship.kind, *act, day);
            if self.sample_bool(TransmissionRng, condom) {
                report.protected[act.index()] += 1;
                continue;
            }
            // Either partner may take either site of a coupling, so each
            // coupling opens both directions in both orientations.
            let partners = [
                (relationship.first, relationship.second),
                (relationship.second, relationship.first),
            ];
            for (first_site, second_site) in topology.couplings(*act) {
                for (source, target) in partners {
                    open(Pathway {
                        source,
                        source_site: *first_site,
                        target,
                        target_site: *second_site,
                    });
                    open(Pathway {
                        source,
                        source_site: *second_site,
                        target,
                        target_site: *first_site,
                    });
                }
            }
        }
        pathways
    }

    fn perform_acts(&self) -> (ActReport, Vec<ExposureEvent>) {
        let fields = self.get_fields();
        let dynamics = self.get_strain_dynamics();
        let day = self.get_current_day();
        let mut report = ActReport::default();
        let mut exposures = Vec::new();

        for relationship in self.active_relationships() {
            for pathway in self.draw_acts(&relationship, &mut report) {
                let source = self.get_person(pathway.source);
                let source_state = source.site(pathway.source_site);
                if !source_state.status.is_infectious() {
                    continue;
                }
                let target = self.get_person(pathway.target);
                if !dynamics.can_acquire(target.site(pathway.target_site), source_state.strains) {
                    continue;
                }
                let probability = transmission_probability(
                    &fields,
                    source,
                    pathway.source_site,
                    target,
                    pathway.target_site,
                    day,
                );
                if self.sample_bool(TransmissionRng, probability) {
                    trace!(
                        "day {day}: {}:{} infected {}:{} via {} partnership",
                        pathway.source,
                        pathway.source_site,
                        pathway.target,
                        pathway.target_site,
                        relationship.kind
                    );
                    report.exposed.push(pathway.target);
                    exposures.push(ExposureEvent {
                        day,
                        target: pathway.target,
                        site: pathway.target_site,
                        source: pathway.source,
                        source_site: pathway.source_site,
                        strains: source_state.strains,
                    });
                }
            }
        }
        report.exposed.sort_unstable();
        report.exposed.dedup();
        (report, exposures)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::parameters::{FrequencyTable, VaccinationSettings};
    use crate::people::{ImmunityMask, InfectionStatus, VaccineProtection};

    fn relationship(probabilities: &[(ActType, f64)]) -> Relationship {
        let mut act_probabilities = [0.0; ActType::COUNT];
        for (act, p) in probabilities {
            act_probabilities[act.index()] = *p;
        }
        Relationship {
            kind: PartnershipKind::Regular,
            first: PersonId::new(0),
            second: PersonId::new(1),
            formed_day: 0,
            remaining_days: 100,
            act_probabilities,
        }
    }

    fn context_with(fields: Fields) -> Context {
        let mut context = Context::new();
        context.init_random(17);
        context.set_fields(Arc::new(fields)).unwrap();
        context.init_population();
        context.init_partnerships();
        context.init_infection();
        context.init_transmission();
        context
    }

    fn two_people() -> Fields {
        Fields {
            population_size: 2,
            ..Fields::default()
        }
    }

    #[test]
    fn target_roles() {
        assert_eq!(target_role(Site::A, Site::G), SiteRole::Insertive);
        assert_eq!(target_role(Site::G, Site::A), SiteRole::Receptive);
        assert_eq!(target_role(Site::G, Site::R), SiteRole::Receptive);
        assert_eq!(target_role(Site::R, Site::R), SiteRole::Receptive);
        assert_eq!(target_role(Site::A, Site::R), SiteRole::Insertive);
    }

    #[test]
    fn probability_is_clamped_and_respects_immunity() {
        let mut context = context_with(Fields {
            transmissibility: [[1.0; 3]; 3],
            susceptibility: [1.0; 3],
            ..two_people()
        });
        let fields = context.get_fields();
        let source = context.get_person(PersonId::new(0)).clone();
        let target = context.get_person(PersonId::new(1)).clone();
        let p = transmission_probability(&fields, &source, Site::G, &target, Site::A, 0);
        assert!((0.0..=1.0).contains(&p));
        assert_eq!(p, 1.0);

        context.get_person_mut(PersonId::new(1)).site_mut(Site::A).immunity =
            ImmunityMask::RECEPTIVE;
        let target = context.get_person(PersonId::new(1));
        assert_eq!(
            transmission_probability(&fields, &source, Site::G, target, Site::A, 0),
            0.0
        );
    }

    #[test]
    fn vaccine_efficacy_scales_probability() {
        let mut context = context_with(Fields {
            transmissibility: [[0.8; 3]; 3],
            vaccination: Some(VaccinationSettings {
                susceptibility_efficacy: [0.5; 3],
                transmissibility_efficacy: [0.25; 3],
                ..VaccinationSettings::default()
            }),
            ..two_people()
        });
        for id in [0, 1] {
            context.get_person_mut(PersonId::new(id)).vaccine = Some(VaccineProtection {
                vaccinated_day: 0,
                expires_day: None,
                doses: 1,
            });
        }
        let fields = context.get_fields();
        let source = context.get_person(PersonId::new(0));
        let target = context.get_person(PersonId::new(1));
        let p = transmission_probability(&fields, source, Site::G, target, Site::A, 0);
        assert!((p - 0.8 * 0.75 * 0.5).abs() < 1e-12);
    }

    #[test]
    fn condom_adjustments() {
        let mut fields = two_people();
        fields.condom_use.casual.anal = 0.4;
        fields.adjustments.push(crate::parameters::TimedAdjustment {
            from_day: 10,
            until_day: None,
            kind: None,
            act: Some(ActType::Anal),
            frequency: None,
            condom_use: Some(3.0),
        });
        assert!((condom_probability(&fields, PartnershipKind::Casual, ActType::Anal, 5) - 0.4).abs() < 1e-12);
        assert_eq!(condom_probability(&fields, PartnershipKind::Casual, ActType::Anal, 10), 1.0);
    }

    #[test]
    fn combined_genital_acts_open_each_pathway_once() {
        let context = context_with(Fields {
            topology: TopologyKind::Heterosexual,
            ..two_people()
        });
        let relationship = relationship(&[(ActType::Genital, 1.0), (ActType::GenitalAnal, 1.0)]);
        let mut report = ActReport::default();
        let pathways = context.draw_acts(&relationship, &mut report);
        assert_eq!(report.occurred(ActType::Genital), 1);
        assert_eq!(report.occurred(ActType::GenitalAnal), 1);
        let genital_to_genital = pathways
            .iter()
            .filter(|p| p.source_site == Site::G && p.target_site == Site::G)
            .count();
        assert_eq!(genital_to_genital, 2);
        for pathway in &pathways {
            assert_eq!(pathways.iter().filter(|p| *p == pathway).count(), 1);
        }
    }

    #[test]
    fn protected_acts_open_no_pathways() {
        let mut fields = two_people();
        fields.condom_use.regular.anal = 1.0;
        let context = context_with(fields);
        let mut report = ActReport::default();
        let pathways = context.draw_acts(&relationship(&[(ActType::Anal, 1.0)]), &mut report);
        assert!(pathways.is_empty());
        assert_eq!(report.protected(ActType::Anal), 1);
    }

    #[test]
    fn certain_transmission_produces_exposure() {
        let mut fields = two_people();
        fields.act_frequencies.regular = Default::default();
        fields.act_frequencies.regular.anal = FrequencyTable::Range { min: 1.0, max: 1.0 };
        fields.condom_use.regular.anal = 0.0;
        fields.transmissibility[Site::G.index()][Site::A.index()] = 1.0;
        fields.transmissibility[Site::A.index()][Site::G.index()] = 1.0;
        let mut context = context_with(fields);
        let (a, b) = (PersonId::new(0), PersonId::new(1));
        {
            let person = context.get_person_mut(a);
            person.site_mut(Site::G).status = InfectionStatus::Asymptomatic;
            person.site_mut(Site::G).strains = StrainMask::single(0);
        }
        assert!(context.form_partnership(PartnershipKind::Regular, a, b));
        let (report, exposures) = context.perform_acts();
        assert_eq!(report.exposed, vec![b]);
        assert_eq!(exposures.len(), 1);
        assert_eq!(exposures[0].target, b);
        assert_eq!(exposures[0].site, Site::A);
        assert_eq!(exposures[0].strains, StrainMask::single(0));
    }
}
