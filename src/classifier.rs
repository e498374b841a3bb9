//! Predicates over individuals, used to select screening targets and
//! introduction recipients and to label snapshot counts.
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::people::{Behaviour, Individual, InfectionStatus, Site};
use crate::Day;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classifier {
    Everyone,
    /// Infected at `site`, or at any site when `site` is `None`.
    Infected { site: Option<Site> },
    Status { site: Site, status: InfectionStatus },
    /// Carrying `strain` at `site`, or at any site when `site` is `None`.
    Strain { site: Option<Site>, strain: u8 },
    Behaviour { behaviour: Behaviour },
    /// At least `count` casual partners within the lookback window.
    CasualPartnersAtLeast { count: usize },
    Symptomatic,
    Vaccinated,
    All { classifiers: Vec<Classifier> },
}

impl Classifier {
    #[must_use]
    pub fn matches(&self, person: &Individual, day: Day) -> bool {
        match self {
            Classifier::Everyone => true,
            Classifier::Infected { site: Some(site) } => person.site(*site).status.is_infected(),
            Classifier::Infected { site: None } => person.is_infected(),
            Classifier::Status { site, status } => person.site(*site).status == *status,
            Classifier::Strain {
                site: Some(site),
                strain,
            } => person.site(*site).strains.contains(*strain),
            Classifier::Strain { site: None, strain } => person.strains().contains(*strain),
            Classifier::Behaviour { behaviour } => person.behaviour == *behaviour,
            Classifier::CasualPartnersAtLeast { count } => person.recent_casual_partners() >= *count,
            Classifier::Symptomatic => person.is_symptomatic(),
            Classifier::Vaccinated => person.is_vaccinated(day),
            Classifier::All { classifiers } => classifiers
                .iter()
                .all(|classifier| classifier.matches(person, day)),
        }
    }
}

impl Display for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classifier::Everyone => write!(f, "everyone"),
            Classifier::Infected { site: Some(site) } => write!(f, "infected_{site}"),
            Classifier::Infected { site: None } => write!(f, "infected_any"),
            Classifier::Status { site, status } => write!(f, "{status:?}_{site}"),
            Classifier::Strain {
                site: Some(site),
                strain,
            } => write!(f, "strain{strain}_{site}"),
            Classifier::Strain { site: None, strain } => write!(f, "strain{strain}_any"),
            Classifier::Behaviour { behaviour } => write!(f, "{behaviour:?}"),
            Classifier::CasualPartnersAtLeast { count } => write!(f, "casual_partners_ge_{count}"),
            Classifier::Symptomatic => write!(f, "symptomatic"),
            Classifier::Vaccinated => write!(f, "vaccinated"),
            Classifier::All { classifiers } => {
                let labels: Vec<String> = classifiers.iter().map(ToString::to_string).collect();
                write!(f, "{}", labels.join("&"))
            }
        }
    }
}
