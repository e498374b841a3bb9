//! Vaccination and boosters.
//!
//! Populations configured with [`VaccinationSettings`] vaccinate individuals
//! at screening and/or on entry, subject to coverage. Protection may be finite
//! or lifelong; pending boosters are kept in a day-ordered schedule.
use std::collections::BTreeMap;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::infection::InfectionStatus;
use crate::parameters::{ContextParametersExt, HasVaccination, VaccinationSettings};
use crate::people::{ContextPeopleExt, PersonId, VaccineProtection};
use crate::random::ContextRandomExt;
use crate::{define_data_plugin, define_rng, Context, Day};

define_rng!(VaccinationRng);

/// A booster owed to the occupant of `person_id` whose uid is `uid`. The
/// booster lapses if the slot has been given to someone else meanwhile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoosterDue {
    pub person_id: PersonId,
    pub uid: u64,
}

pub type BoosterSchedule = BTreeMap<Day, Vec<BoosterDue>>;

#[derive(Default)]
struct VaccinationData {
    boosters: BoosterSchedule,
    doses: u64,
}

define_data_plugin!(VaccinationPlugin, VaccinationData, VaccinationData::default());

/// Shortens a stage clock by `reduction`, keeping at least a day.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn shorten(clock: u32, reduction: f64) -> u32 {
    if clock == 0 {
        return 0;
    }
    ((f64::from(clock) * (1.0 - reduction)).ceil() as u32).max(1)
}

pub trait ContextVaccinationExt {
    /// Clears the booster schedule and dose count.
    fn init_vaccination(&mut self);

    /// Offers vaccination to `person_id`: vaccinates with the configured
    /// coverage unless already protected. Returns whether a dose was given.
    fn offer_vaccination(&mut self, person_id: PersonId) -> bool;

    /// Gives a dose: installs or renews protection, shortens active
    /// infections, optionally clears symptoms and schedules the next booster.
    fn vaccinate(&mut self, person_id: PersonId, settings: &VaccinationSettings);

    /// Offers vaccination to new entrants when configured.
    fn vaccinate_entrants(&mut self, entrants: &[PersonId]) -> usize;

    /// Gives the boosters due today or earlier. Returns the number given.
    fn administer_boosters(&mut self) -> usize;

    fn get_booster_schedule(&self) -> &BoosterSchedule;

    /// Replaces the booster schedule, used when importing a saved state.
    fn set_booster_schedule(&mut self, boosters: BoosterSchedule);

    fn get_doses_given(&self) -> u64;
}

impl ContextVaccinationExt for Context {
    fn init_vaccination(&mut self) {
        *self.get_data_mut(VaccinationPlugin) = VaccinationData::default();
    }

    fn offer_vaccination(&mut self, person_id: PersonId) -> bool {
        let fields = self.get_fields();
        let Some(settings) = fields.vaccination() else {
            return false;
        };
        if self.get_person(person_id).is_vaccinated(self.get_current_day()) {
            return false;
        }
        if !self.sample_bool(VaccinationRng, settings.coverage) {
            return false;
        }
        self.vaccinate(person_id, settings);
        true
    }

    fn vaccinate(&mut self, person_id: PersonId, settings: &VaccinationSettings) {
        let day = self.get_current_day();
        let person = self.get_person_mut(person_id);
        let doses = person.vaccine.map_or(0, |vaccine| vaccine.doses) + 1;
        person.vaccine = Some(VaccineProtection {
            vaccinated_day: day,
            expires_day: settings.duration_days.map(|duration| day + duration),
            doses,
        });
        for (index, state) in person.sites.iter_mut().enumerate() {
            if !state.status.is_infected() {
                continue;
            }
            state.clock = shorten(state.clock, settings.duration_reduction[index]);
            if settings.clears_symptoms && state.status == InfectionStatus::Symptomatic {
                state.status = InfectionStatus::Asymptomatic;
            }
        }
        let uid = person.uid;
        trace!("vaccinated {person_id} (dose {doses})");

        let data = self.get_data_mut(VaccinationPlugin);
        data.doses += 1;
        if let Some(interval) = settings.booster_interval_days {
            data.boosters
                .entry(day + interval)
                .or_default()
                .push(BoosterDue { person_id, uid });
        }
    }

    fn vaccinate_entrants(&mut self, entrants: &[PersonId]) -> usize {
        let fields = self.get_fields();
        if !fields.vaccination().is_some_and(|settings| settings.at_entry) {
            return 0;
        }
        entrants
            .iter()
            .filter(|person_id| self.offer_vaccination(**person_id))
            .count()
    }

    fn administer_boosters(&mut self) -> usize {
        let fields = self.get_fields();
        let Some(settings) = fields.vaccination() else {
            return 0;
        };
        let day = self.get_current_day();
        let data = self.get_data_mut(VaccinationPlugin);
        let later = data.boosters.split_off(&(day + 1));
        let due: Vec<BoosterDue> = std::mem::replace(&mut data.boosters, later)
            .into_values()
            .flatten()
            .collect();

        let mut given = 0;
        for booster in due {
            if self.get_person(booster.person_id).uid != booster.uid {
                continue;
            }
            if self.sample_bool(VaccinationRng, settings.booster_uptake) {
                self.vaccinate(booster.person_id, settings);
                given += 1;
            }
        }
        if given > 0 {
            debug!("day {day}: gave {given} boosters");
        }
        given
    }

    fn get_booster_schedule(&self) -> &BoosterSchedule {
        &self.get_data(VaccinationPlugin).boosters
    }

    fn set_booster_schedule(&mut self, boosters: BoosterSchedule) {
        self.get_data_mut(VaccinationPlugin).boosters = boosters;
    }

    fn get_doses_given(&self) -> u64 {
        self.try_get_data::<VaccinationPlugin>()
            .map_or(0, |data| data.doses)
    }
}
