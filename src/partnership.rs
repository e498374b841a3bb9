//! Regular and casual partnership graphs and the daily matcher.
//!
//! Each [`PartnershipKind`] has its own [`PartnershipGraph`]: an adjacency
//! vector holding at most one partner per individual plus the relationship
//! records keyed by their ordered endpoints. Individuals who are free in a
//! graph, want that kind of partnership and have no remaining delay are
//! *available* and get paired by the configured [`MatchingPolicy`].
use std::collections::BTreeMap;
use std::fmt::{self, Display};

use log::{debug, trace};
use rand_distr::Exp;
use serde::{Deserialize, Serialize};

use crate::parameters::{apply_adjustment, ContextParametersExt, Fields, FrequencyTable};
use crate::people::{ContextPeopleExt, PersonId};
use crate::random::ContextRandomExt;
use crate::transmission::ActType;
use crate::{define_data_plugin, define_rng, Context, Day, DAYS_PER_YEAR};

define_rng!(PartnershipRng);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnershipKind {
    Regular,
    Casual,
}

impl PartnershipKind {
    pub const ALL: [PartnershipKind; 2] = [PartnershipKind::Regular, PartnershipKind::Casual];

    const fn index(self) -> usize {
        match self {
            PartnershipKind::Regular => 0,
            PartnershipKind::Casual => 1,
        }
    }
}

impl Display for PartnershipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartnershipKind::Regular => write!(f, "regular"),
            PartnershipKind::Casual => write!(f, "casual"),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingPolicy {
    /// Shuffle everyone available and pair consecutively.
    #[default]
    Random,
    /// Split by id parity, shuffle each side and pair across the sides.
    Bipartite,
}

/// An edge of a partnership graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub kind: PartnershipKind,
    pub first: PersonId,
    pub second: PersonId,
    pub formed_day: Day,
    pub remaining_days: u32,
    /// Daily probability of each act type, indexed by `ActType::index`.
    pub act_probabilities: [f64; ActType::COUNT],
}

impl Relationship {
    #[must_use]
    pub fn act_probability(&self, act: ActType) -> f64 {
        self.act_probabilities[act.index()]
    }

    #[must_use]
    pub fn partner_of(&self, person_id: PersonId) -> PersonId {
        if self.first == person_id {
            self.second
        } else {
            self.first
        }
    }

    /// The lower endpoint, which identifies the edge while degrees are at most one.
    fn key(&self) -> PersonId {
        self.first.min(self.second)
    }
}

/// A partnership graph of vertex degree at most one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PartnershipGraph {
    partners: Vec<Option<PersonId>>,
    /// Keyed by the lower endpoint.
    relationships: BTreeMap<PersonId, Relationship>,
    /// Days until each individual is available again.
    delays: Vec<u32>,
}

impl PartnershipGraph {
    #[must_use]
    pub fn new(population_size: usize) -> Self {
        PartnershipGraph {
            partners: vec![None; population_size],
            relationships: BTreeMap::new(),
            delays: vec![0; population_size],
        }
    }

    #[must_use]
    pub fn population_size(&self) -> usize {
        self.partners.len()
    }

    #[must_use]
    pub fn partner_of(&self, person_id: PersonId) -> Option<PersonId> {
        self.partners[person_id.index()]
    }

    #[must_use]
    pub fn degree(&self, person_id: PersonId) -> usize {
        usize::from(self.partners[person_id.index()].is_some())
    }

    #[must_use]
    pub fn contains_edge(&self, a: PersonId, b: PersonId) -> bool {
        self.partner_of(a) == Some(b)
    }

    #[must_use]
    pub fn relationship_of(&self, person_id: PersonId) -> Option<&Relationship> {
        let partner = self.partner_of(person_id)?;
        self.relationships.get(&person_id.min(partner))
    }

    /// Relationships in endpoint order.
    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }

    #[must_use]
    pub fn delay(&self, person_id: PersonId) -> u32 {
        self.delays[person_id.index()]
    }

    pub fn set_delay(&mut self, person_id: PersonId, days: u32) {
        self.delays[person_id.index()] = days;
    }

    /// Adds `relationship` unless an endpoint already has a partner.
    /// Returns whether the edge was added.
    pub fn insert(&mut self, relationship: Relationship) -> bool {
        let (first, second) = (relationship.first, relationship.second);
        if first == second || self.partner_of(first).is_some() || self.partner_of(second).is_some()
        {
            return false;
        }
        self.partners[first.index()] = Some(second);
        self.partners[second.index()] = Some(first);
        self.relationships.insert(relationship.key(), relationship);
        true
    }

    /// Removes the relationship of `person_id`, if any.
    pub fn remove(&mut self, person_id: PersonId) -> Option<Relationship> {
        let partner = self.partners[person_id.index()].take()?;
        self.partners[partner.index()] = None;
        self.relationships.remove(&person_id.min(partner))
    }

    /// Counts every relationship down one day and removes those that end.
    fn expire(&mut self) -> Vec<Relationship> {
        for delay in &mut self.delays {
            *delay = delay.saturating_sub(1);
        }
        let mut ended = Vec::new();
        for relationship in self.relationships.values_mut() {
            relationship.remaining_days = relationship.remaining_days.saturating_sub(1);
            if relationship.remaining_days == 0 {
                ended.push(relationship.key());
            }
        }
        ended
            .into_iter()
            .filter_map(|key| self.remove(key))
            .collect()
    }
}

struct PartnershipData {
    graphs: [PartnershipGraph; 2],
}

define_data_plugin!(
    PartnershipPlugin,
    PartnershipData,
    PartnershipData {
        graphs: [PartnershipGraph::default(), PartnershipGraph::default()],
    }
);

/// Draws a daily act probability from `table`. `partner_count` selects among
/// partner-count-conditioned alternatives.
pub fn sample_act_probability(context: &Context, table: &FrequencyTable, partner_count: usize) -> f64 {
    match table {
        FrequencyTable::Never => 0.0,
        FrequencyTable::Range { min, max } => sample_between(context, *min, *max),
        FrequencyTable::Weighted { options } => {
            let cumulative: Vec<f64> = options
                .iter()
                .map(|option| option.cumulative_probability)
                .collect();
            let option = &options[context.sample_cumulative(PartnershipRng, &cumulative)];
            sample_between(context, option.min, option.max)
        }
        FrequencyTable::ByPartnerCount { tables } => tables
            .iter()
            .rev()
            .find(|entry| partner_count >= entry.min_partners)
            .or_else(|| tables.first())
            .map_or(0.0, |entry| {
                sample_act_probability(context, &entry.table, partner_count)
            }),
    }
}

fn sample_between(context: &Context, min: f64, max: f64) -> f64 {
    if min >= max {
        return min;
    }
    context.sample_range(PartnershipRng, min..=max)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn sample_days(context: &Context, mean: f64) -> u32 {
    match Exp::new(1.0 / mean) {
        Ok(exp) => context.sample_distr(PartnershipRng, exp).ceil() as u32,
        Err(_) => 0,
    }
}

/// Longest casual partnership that still leaves room for the rest of the
/// annual budget.
fn casual_cap(budget: u32) -> u32 {
    (DAYS_PER_YEAR / budget.max(1)).max(1)
}

fn sample_duration(context: &Context, fields: &Fields, kind: PartnershipKind, budget: u32) -> u32 {
    match kind {
        PartnershipKind::Regular => sample_days(context, fields.regular_duration_mean).max(1),
        PartnershipKind::Casual => sample_days(context, fields.casual_duration_mean)
            .clamp(1, casual_cap(budget)),
    }
}

/// Days an individual waits after a partnership of `kind` ends.
fn sample_delay(context: &Context, fields: &Fields, kind: PartnershipKind, budget: u32, duration: u32) -> u32 {
    match kind {
        PartnershipKind::Regular => sample_days(context, fields.regular_gap_mean),
        PartnershipKind::Casual => {
            if budget == 0 {
                return 0;
            }
            let mean = f64::from(DAYS_PER_YEAR) / f64::from(budget);
            sample_days(context, mean).saturating_sub(duration)
        }
    }
}

pub trait ContextPartnershipExt {
    /// Creates empty graphs sized to the current population.
    fn init_partnerships(&mut self);

    fn get_partnership_graph(&self, kind: PartnershipKind) -> &PartnershipGraph;

    fn get_partner(&self, kind: PartnershipKind, person_id: PersonId) -> Option<PersonId>;

    /// Individuals who want a partnership of `kind`, have no partner in its
    /// graph and no remaining delay, in id order. Casual seekers must also
    /// have casual budget left for the year.
    fn available_people(&self, kind: PartnershipKind) -> Vec<PersonId>;

    /// Forms a partnership between `a` and `b`, sampling its duration and act
    /// schedule. Returns `false` without side effects if either already has a
    /// partner of this kind, `a == b`, or a casual partnership would exceed
    /// either annual budget.
    fn form_partnership(&mut self, kind: PartnershipKind, a: PersonId, b: PersonId) -> bool;

    /// Ends the partnership of `person_id`, starting both partners' delays.
    fn dissolve_partnership(&mut self, kind: PartnershipKind, person_id: PersonId) -> Option<Relationship>;

    /// Ends every partnership of `person_id` and clears their delays. Used when
    /// a slot receives a new individual.
    fn remove_all_partnerships(&mut self, person_id: PersonId);

    /// Counts relationships down a day and dissolves those that end.
    /// Returns the number dissolved.
    fn tick_partnerships(&mut self) -> usize;

    /// Pairs the available individuals of `kind` under the configured
    /// policy. Returns the number of partnerships formed.
    fn match_partnerships(&mut self, kind: PartnershipKind) -> usize;

    /// All current relationships, regular first, each in endpoint order.
    fn active_relationships(&self) -> Vec<Relationship>;
}

impl ContextPartnershipExt for Context {
    fn init_partnerships(&mut self) {
        let size = self.population_size();
        self.get_data_mut(PartnershipPlugin).graphs =
            [PartnershipGraph::new(size), PartnershipGraph::new(size)];
    }

    fn get_partnership_graph(&self, kind: PartnershipKind) -> &PartnershipGraph {
        &self.get_data(PartnershipPlugin).graphs[kind.index()]
    }

    fn get_partner(&self, kind: PartnershipKind, person_id: PersonId) -> Option<PersonId> {
        self.get_partnership_graph(kind).partner_of(person_id)
    }

    fn available_people(&self, kind: PartnershipKind) -> Vec<PersonId> {
        let graph = self.get_partnership_graph(kind);
        self.person_ids()
            .filter(|person_id| {
                let person = self.get_person(*person_id);
                let seeks = match kind {
                    PartnershipKind::Regular => person.behaviour.seeks_regular(),
                    PartnershipKind::Casual => {
                        person.behaviour.seeks_casual() && person.remaining_casual_budget() > 0
                    }
                };
                seeks && graph.partner_of(*person_id).is_none() && graph.delay(*person_id) == 0
            })
            .collect()
    }

    fn form_partnership(&mut self, kind: PartnershipKind, a: PersonId, b: PersonId) -> bool {
        {
            let graph = self.get_partnership_graph(kind);
            if a == b || graph.partner_of(a).is_some() || graph.partner_of(b).is_some() {
                trace!("{kind} partnership {a}-{b} not formed: endpoint already partnered");
                return false;
            }
        }
        let fields = self.get_fields();
        let day = self.get_current_day();
        let person_a = self.get_person(a);
        let person_b = self.get_person(b);
        let partner_count = person_a
            .recent_casual_partners()
            .max(person_b.recent_casual_partners());
        let remaining = [person_a.remaining_casual_budget(), person_b.remaining_casual_budget()];
        let (uid_a, uid_b) = (person_a.uid, person_b.uid);
        if kind == PartnershipKind::Casual && remaining.contains(&0) {
            trace!("casual partnership {a}-{b} not formed: annual budget spent");
            return false;
        }
        let budget = remaining[0].max(remaining[1]);

        let remaining_days = sample_duration(self, &fields, kind, budget);
        let mut act_probabilities = [0.0; ActType::COUNT];
        for act in ActType::ALL {
            let table = fields.act_frequencies.get(kind, act);
            let mut probability = sample_act_probability(self, table, partner_count);
            for adjustment in &fields.adjustments {
                if let Some(value) = adjustment.frequency {
                    if adjustment.applies(day, kind, act) {
                        probability = apply_adjustment(probability, value);
                    }
                }
            }
            act_probabilities[act.index()] = probability.clamp(0.0, 1.0);
        }

        let relationship = Relationship {
            kind,
            first: a,
            second: b,
            formed_day: day,
            remaining_days,
            act_probabilities,
        };
        let inserted = self.get_data_mut(PartnershipPlugin).graphs[kind.index()].insert(relationship);
        if inserted && kind == PartnershipKind::Casual {
            self.get_person_mut(a).record_casual_partner(day, uid_b);
            self.get_person_mut(b).record_casual_partner(day, uid_a);
        }
        trace!("formed {kind} partnership {a}-{b} for {remaining_days} days");
        inserted
    }

    fn dissolve_partnership(&mut self, kind: PartnershipKind, person_id: PersonId) -> Option<Relationship> {
        let relationship = self.get_data_mut(PartnershipPlugin).graphs[kind.index()].remove(person_id)?;
        start_delays(self, &relationship);
        Some(relationship)
    }

    fn remove_all_partnerships(&mut self, person_id: PersonId) {
        for kind in PartnershipKind::ALL {
            if let Some(relationship) = self.dissolve_partnership(kind, person_id) {
                trace!(
                    "{kind} partnership {}-{} ended by replacement",
                    relationship.first,
                    relationship.second
                );
            }
            self.get_data_mut(PartnershipPlugin).graphs[kind.index()].set_delay(person_id, 0);
        }
    }

    fn tick_partnerships(&mut self) -> usize {
        let mut dissolved = 0;
        for kind in PartnershipKind::ALL {
            let ended = self.get_data_mut(PartnershipPlugin).graphs[kind.index()].expire();
            dissolved += ended.len();
            for relationship in &ended {
                start_delays(self, relationship);
            }
        }
        dissolved
    }

    fn match_partnerships(&mut self, kind: PartnershipKind) -> usize {
        let mut available = self.available_people(kind);
        let pairs: Vec<(PersonId, PersonId)> = match self.get_fields().matching_policy {
            MatchingPolicy::Random => {
                self.shuffle(PartnershipRng, &mut available);
                available
                    .chunks_exact(2)
                    .map(|pair| (pair[0], pair[1]))
                    .collect()
            }
            MatchingPolicy::Bipartite => {
                let (mut even, mut odd): (Vec<PersonId>, Vec<PersonId>) = available
                    .into_iter()
                    .partition(|person_id| person_id.index() % 2 == 0);
                self.shuffle(PartnershipRng, &mut even);
                self.shuffle(PartnershipRng, &mut odd);
                even.into_iter().zip(odd).collect()
            }
        };
        let formed = pairs
            .into_iter()
            .filter(|(a, b)| self.form_partnership(kind, *a, *b))
            .count();
        debug!("day {}: formed {formed} {kind} partnerships", self.get_current_day());
        formed
    }

    fn active_relationships(&self) -> Vec<Relationship> {
        PartnershipKind::ALL
            .into_iter()
            .flat_map(|kind| self.get_partnership_graph(kind).relationships().cloned())
            .collect()
    }
}

fn start_delays(context: &mut Context, relationship: &Relationship) {
    let fields = context.get_fields();
    let duration = context.get_current_day().saturating_sub(relationship.formed_day);
    for person_id in [relationship.first, relationship.second] {
        let budget = context.get_person(person_id).max_casual_partners;
        let delay = sample_delay(context, &fields, relationship.kind, budget, duration);
        context.get_data_mut(PartnershipPlugin).graphs[relationship.kind.index()]
            .set_delay(person_id, delay);
    }
}

/// Replaces the graphs wholesale, used when importing a saved state.
pub(crate) fn restore_graphs(context: &mut Context, regular: PartnershipGraph, casual: PartnershipGraph) {
    context.get_data_mut(PartnershipPlugin).graphs = [regular, casual];
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::parameters::{BehaviourProportions, PartnerCountTable, WeightedRange};
    use crate::people::Behaviour;

    fn context_with(fields: Fields) -> Context {
        let mut context = Context::new();
        context.init_random(11);
        context.set_fields(Arc::new(fields)).unwrap();
        context.init_population();
        context.init_partnerships();
        // Fixed budgets so hand-formed casual partnerships are never refused.
        for person_id in context.person_ids().collect::<Vec<_>>() {
            context.get_person_mut(person_id).max_casual_partners = 12;
        }
        context
    }

    fn everyone_both(size: usize) -> Fields {
        Fields {
            population_size: size,
            behaviour_proportions: BehaviourProportions {
                regular_only: 0.0,
                casual_only: 0.0,
                both: 1.0,
            },
            ..Fields::default()
        }
    }

    fn assert_degree_invariant(context: &Context) {
        for kind in PartnershipKind::ALL {
            let graph = context.get_partnership_graph(kind);
            let mut seen = vec![0usize; graph.population_size()];
            for relationship in graph.relationships() {
                seen[relationship.first.index()] += 1;
                seen[relationship.second.index()] += 1;
            }
            assert!(seen.iter().all(|degree| *degree <= 1));
        }
    }

    #[test]
    fn forming_on_partnered_individual_is_a_no_op() {
        let mut context = context_with(everyone_both(4));
        let (a, b, c) = (PersonId::new(0), PersonId::new(1), PersonId::new(2));
        assert!(context.form_partnership(PartnershipKind::Regular, a, b));
        assert!(!context.form_partnership(PartnershipKind::Regular, a, c));
        assert!(!context.form_partnership(PartnershipKind::Regular, c, c));
        assert_eq!(context.get_partnership_graph(PartnershipKind::Regular).len(), 1);
        assert_eq!(context.get_partner(PartnershipKind::Regular, c), None);
        // The casual graph is independent.
        assert!(context.form_partnership(PartnershipKind::Casual, a, c));
        assert_degree_invariant(&context);
    }

    #[test]
    fn casual_partnership_updates_history() {
        let mut context = context_with(everyone_both(2));
        let (a, b) = (PersonId::new(0), PersonId::new(1));
        context.get_person_mut(a).max_casual_partners = 5;
        assert!(context.form_partnership(PartnershipKind::Casual, a, b));
        assert_eq!(context.get_person(a).recent_casual_partners(), 1);
        assert_eq!(
            context.get_person(a).casual_history[0].partner_uid,
            context.get_person(b).uid
        );
    }

    #[test]
    fn casual_budget_limits_partners_per_year() {
        let mut context = context_with(everyone_both(6));
        let person = PersonId::new(0);
        context.get_person_mut(person).max_casual_partners = 1;
        let mut formed = 0;
        for day in 0..DAYS_PER_YEAR {
            context.set_current_day(day);
            context.tick_partnerships();
            // Waiting periods alone would keep the person out of the pool.
            context
                .get_data_mut(PartnershipPlugin)
                .graphs[PartnershipKind::Casual.index()]
                .set_delay(person, 0);
            let single = context.get_partner(PartnershipKind::Casual, person).is_none();
            context.match_partnerships(PartnershipKind::Casual);
            if single && context.get_partner(PartnershipKind::Casual, person).is_some() {
                formed += 1;
            }
        }
        assert_eq!(formed, 1);
        assert!(!context
            .available_people(PartnershipKind::Casual)
            .contains(&person));

        context.remove_all_partnerships(person);
        let other = PersonId::new(1);
        context.remove_all_partnerships(other);
        assert!(!context.form_partnership(PartnershipKind::Casual, person, other));
    }

    #[test]
    fn random_matching_keeps_degree_at_most_one() {
        let mut context = context_with(everyone_both(101));
        for _ in 0..20 {
            context.tick_partnerships();
            context.match_partnerships(PartnershipKind::Regular);
            context.match_partnerships(PartnershipKind::Casual);
            assert_degree_invariant(&context);
            context.advance_day();
        }
        // An odd population always leaves someone unmatched on the first day.
        assert!(context.get_partnership_graph(PartnershipKind::Regular).len() <= 50);
    }

    #[test]
    fn bipartite_matching_pairs_across_parity() {
        let mut context = context_with(Fields {
            matching_policy: MatchingPolicy::Bipartite,
            ..everyone_both(10)
        });
        // Only three odd ids are available.
        for id in [1, 3] {
            context
                .get_data_mut(PartnershipPlugin)
                .graphs[PartnershipKind::Regular.index()]
                .set_delay(PersonId::new(id), 5);
        }
        let formed = context.match_partnerships(PartnershipKind::Regular);
        assert_eq!(formed, 3);
        for relationship in context.get_partnership_graph(PartnershipKind::Regular).relationships() {
            assert_ne!(relationship.first.index() % 2, relationship.second.index() % 2);
        }
    }

    #[test]
    fn only_seekers_are_available() {
        let mut context = context_with(everyone_both(6));
        context.get_person_mut(PersonId::new(0)).behaviour = Behaviour::CasualOnly;
        context.get_person_mut(PersonId::new(1)).behaviour = Behaviour::RegularOnly;
        let regular = context.available_people(PartnershipKind::Regular);
        assert!(!regular.contains(&PersonId::new(0)));
        assert!(regular.contains(&PersonId::new(1)));
        let casual = context.available_people(PartnershipKind::Casual);
        assert!(!casual.contains(&PersonId::new(1)));
    }

    #[test]
    fn partnerships_expire_and_start_delays() {
        let mut context = context_with(Fields {
            casual_duration_mean: 1.0,
            ..everyone_both(2)
        });
        let (a, b) = (PersonId::new(0), PersonId::new(1));
        context.get_person_mut(a).max_casual_partners = 1;
        context.get_person_mut(b).max_casual_partners = 1;
        assert!(context.form_partnership(PartnershipKind::Casual, a, b));
        let remaining = context
            .get_partnership_graph(PartnershipKind::Casual)
            .relationship_of(a)
            .unwrap()
            .remaining_days;
        assert!((1..=365).contains(&remaining));
        let mut dissolved = 0;
        for _ in 0..remaining {
            context.advance_day();
            dissolved += context.tick_partnerships();
        }
        assert_eq!(dissolved, 1);
        assert_eq!(context.get_partner(PartnershipKind::Casual, a), None);
    }

    #[test]
    fn removal_clears_both_graphs() {
        let mut context = context_with(everyone_both(4));
        let (a, b, c) = (PersonId::new(0), PersonId::new(1), PersonId::new(2));
        context.form_partnership(PartnershipKind::Regular, a, b);
        context.form_partnership(PartnershipKind::Casual, a, c);
        context.remove_all_partnerships(a);
        assert_eq!(context.get_partner(PartnershipKind::Regular, b), None);
        assert_eq!(context.get_partner(PartnershipKind::Casual, c), None);
        assert_eq!(
            context
                .get_partnership_graph(PartnershipKind::Regular)
                .delay(a),
            0
        );
    }

    #[test]
    fn frequency_tables() {
        let mut context = Context::new();
        context.init_random(5);
        assert_eq!(sample_act_probability(&context, &FrequencyTable::Never, 0), 0.0);
        let fixed = FrequencyTable::Range { min: 0.4, max: 0.4 };
        assert_eq!(sample_act_probability(&context, &fixed, 0), 0.4);

        let weighted = FrequencyTable::Weighted {
            options: vec![
                WeightedRange {
                    min: 0.1,
                    max: 0.2,
                    cumulative_probability: 0.5,
                },
                WeightedRange {
                    min: 0.8,
                    max: 0.9,
                    cumulative_probability: 1.0,
                },
            ],
        };
        for _ in 0..50 {
            let p = sample_act_probability(&context, &weighted, 0);
            assert!((0.1..=0.2).contains(&p) || (0.8..=0.9).contains(&p));
        }

        let by_count = FrequencyTable::ByPartnerCount {
            tables: vec![
                PartnerCountTable {
                    min_partners: 0,
                    table: FrequencyTable::Range { min: 0.1, max: 0.1 },
                },
                PartnerCountTable {
                    min_partners: 10,
                    table: FrequencyTable::Range { min: 0.7, max: 0.7 },
                },
            ],
        };
        assert_eq!(sample_act_probability(&context, &by_count, 3), 0.1);
        assert_eq!(sample_act_probability(&context, &by_count, 12), 0.7);
    }

    #[test]
    fn frequency_adjustment_applies_at_formation() {
        let mut fields = everyone_both(2);
        fields.act_frequencies.regular.anal = FrequencyTable::Range { min: 0.5, max: 0.5 };
        fields.adjustments.push(crate::parameters::TimedAdjustment {
            from_day: 0,
            until_day: None,
            kind: Some(PartnershipKind::Regular),
            act: Some(ActType::Anal),
            frequency: Some(-0.9),
            condom_use: None,
        });
        let mut context = context_with(fields);
        let (a, b) = (PersonId::new(0), PersonId::new(1));
        context.form_partnership(PartnershipKind::Regular, a, b);
        let relationship = context
            .get_partnership_graph(PartnershipKind::Regular)
            .relationship_of(a)
            .unwrap();
        assert!((relationship.act_probability(ActType::Anal) - 0.9).abs() < 1e-12);
    }
}
