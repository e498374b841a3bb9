//! Screening policies.
//!
//! Screening tests an individual at a set of sites; a detected infection is
//! treated, and populations that vaccinate at screening offer a dose whatever
//! the result.
use log::debug;
use rand_distr::Exp;

use crate::parameters::{ContextParametersExt, HasVaccination, ScreeningPolicy};
use crate::people::{ContextPeopleExt, PersonId, Site};
use crate::random::{sample_multiple_from_known_length, ContextRandomExt};
use crate::treatment::ContextTreatmentExt;
use crate::vaccination::ContextVaccinationExt;
use crate::{define_rng, Context};

define_rng!(ScreeningRng);

/// Totals of one day's screening.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScreeningReport {
    pub screened: usize,
    pub detected: usize,
}

pub trait ContextScreeningExt {
    /// Screens `person_id` at `sites`, treating a detected infection.
    /// Returns whether an infection was detected.
    fn screen_person(&mut self, person_id: PersonId, sites: &[Site]) -> bool;

    /// Runs today's screening under the configured policy.
    fn run_screening(&mut self) -> ScreeningReport;

    /// Treats individuals seeking care for symptoms. Returns the number treated.
    fn treat_symptomatic(&mut self, seeking: &[PersonId]) -> usize;
}

impl ContextScreeningExt for Context {
    fn screen_person(&mut self, person_id: PersonId, sites: &[Site]) -> bool {
        let detected = sites
            .iter()
            .any(|site| self.get_person(person_id).site(*site).status.is_infected());
        if detected {
            self.treat_person(person_id);
        }
        let fields = self.get_fields();
        if fields
            .vaccination()
            .is_some_and(|settings| settings.at_screening)
        {
            self.offer_vaccination(person_id);
        }
        detected
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn run_screening(&mut self) -> ScreeningReport {
        let fields = self.get_fields();
        let day = self.get_current_day();
        let mut report = ScreeningReport::default();
        let mut screen = |context: &mut Context, person_id: PersonId, sites: &[Site]| {
            report.screened += 1;
            if context.screen_person(person_id, sites) {
                report.detected += 1;
            }
        };

        match &fields.screening {
            ScreeningPolicy::None => {}
            ScreeningPolicy::Periodic {
                interval_days,
                proportion,
                sites,
            } => {
                if day % interval_days != 0 {
                    return report;
                }
                let requested = (proportion * self.population_size() as f64).round() as usize;
                let ids = self.person_ids().collect::<Vec<_>>();
                let selected = self.sample(ScreeningRng, |rng| {
                    sample_multiple_from_known_length(rng, ids, requested)
                });
                for person_id in selected {
                    screen(self, person_id, sites);
                }
            }
            ScreeningPolicy::Targeted {
                classifier,
                daily_probability,
                classes,
            } => {
                let cumulative: Vec<f64> = classes
                    .iter()
                    .map(|class| class.cumulative_probability)
                    .collect();
                for person_id in self.people_matching(classifier) {
                    if !self.sample_bool(ScreeningRng, *daily_probability) {
                        continue;
                    }
                    if classes.is_empty() {
                        screen(self, person_id, &Site::ALL);
                    } else {
                        let class = &classes[self.sample_cumulative(ScreeningRng, &cumulative)];
                        screen(self, person_id, &class.sites);
                    }
                }
            }
            ScreeningPolicy::Scheduled {
                mean_interval_days,
                sites,
            } => {
                let Ok(interval) = Exp::new(1.0 / mean_interval_days) else {
                    return report;
                };
                for person_id in self.person_ids().collect::<Vec<_>>() {
                    let person = self.get_person(person_id);
                    let age = person.age;
                    if person.next_screening_age.is_none_or(|due| due > age) {
                        continue;
                    }
                    screen(self, person_id, sites);
                    let wait = (self.sample_distr(ScreeningRng, interval).ceil() as u32).max(1);
                    self.get_person_mut(person_id).next_screening_age = Some(age + wait);
                }
            }
        }
        if report.screened > 0 {
            debug!(
                "day {day}: screened {}, detected {}",
                report.screened, report.detected
            );
        }
        report
    }

    fn treat_symptomatic(&mut self, seeking: &[PersonId]) -> usize {
        seeking
            .iter()
            .filter(|person_id| self.treat_person(**person_id))
            .count()
    }
}
