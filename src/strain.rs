//! Strain bitmasks and the strain-dynamics strategies.
//!
//! A site carries a [`StrainMask`] with bit *k* set while strain *k* is present.
//! How an already-infected site reacts to a further exposure is decided by the
//! population's [`StrainDynamics`] strategy, selected from the configuration
//! with [`strain_dynamics_for`].
use std::fmt::{self, Display};
use std::ops::BitOr;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::define_rng;
use crate::parameters::{Fields, HasMultiStrain, MixingRule, StrainDynamicsKind};
use crate::people::{InfectionStatus, SiteState};
use crate::random::ContextRandomExt;
use crate::Context;

/// Maximum number of strains a mask can carry.
pub const MAX_STRAINS: usize = 8;

define_rng!(StrainRng);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrainMask(u8);

impl StrainMask {
    pub const NONE: StrainMask = StrainMask(0);

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        StrainMask(bits)
    }

    /// The mask carrying only `strain`.
    ///
    /// # Panics
    ///
    /// Panics if `strain` is not below [`MAX_STRAINS`].
    #[must_use]
    pub fn single(strain: u8) -> Self {
        assert!(usize::from(strain) < MAX_STRAINS, "Invalid strain {strain}");
        StrainMask(1 << strain)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn contains(self, strain: u8) -> bool {
        usize::from(strain) < MAX_STRAINS && self.0 & (1 << strain) != 0
    }

    #[must_use]
    pub const fn contains_all(self, other: StrainMask) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn without(self, other: StrainMask) -> StrainMask {
        StrainMask(self.0 & !other.0)
    }

    #[must_use]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// The strains present, in bit order.
    pub fn strains(self) -> impl Iterator<Item = u8> {
        (0..MAX_STRAINS as u8).filter(move |strain| self.contains(*strain))
    }

    /// The first strain of `order` present in the mask, falling back to the
    /// lowest set bit for strains missing from `order`.
    #[must_use]
    pub fn dominant(self, order: &[u8]) -> Option<u8> {
        order
            .iter()
            .copied()
            .find(|strain| self.contains(*strain))
            .or_else(|| self.strains().next())
    }
}

impl BitOr for StrainMask {
    type Output = StrainMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        StrainMask(self.0 | rhs.0)
    }
}

impl Display for StrainMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010b}", self.0)
    }
}

/// Decides how strains combine when an infected site is exposed again.
pub trait StrainDynamics {
    /// Whether an exposure carrying `incoming` can change `site` at all.
    /// Pathways that cannot change the target are not evaluated.
    fn can_acquire(&self, site: &SiteState, incoming: StrainMask) -> bool {
        match site.status {
            InfectionStatus::Susceptible => !incoming.is_empty(),
            InfectionStatus::Immune => false,
            _ => self.can_superinfect(site.strains, incoming),
        }
    }

    /// Whether an infected site carrying `current` can take up `incoming`.
    fn can_superinfect(&self, current: StrainMask, incoming: StrainMask) -> bool;

    /// The mask an infected site carries after acquiring `incoming`.
    fn acquire(&self, context: &Context, current: StrainMask, incoming: StrainMask) -> StrainMask;

    /// Strain bits in decreasing dominance.
    fn dominance_order(&self) -> &[u8];

    fn dominant(&self, mask: StrainMask) -> Option<u8> {
        mask.dominant(self.dominance_order())
    }
}

/// One strain; an infected site ignores further exposures.
pub struct SingleStrain;

impl StrainDynamics for SingleStrain {
    fn can_superinfect(&self, _current: StrainMask, _incoming: StrainMask) -> bool {
        false
    }

    fn acquire(&self, _context: &Context, current: StrainMask, _incoming: StrainMask) -> StrainMask {
        current
    }

    fn dominance_order(&self) -> &[u8] {
        &[0]
    }
}

/// Concurrent strains. Masks are OR-combined unless a mixing rule for the
/// exact `(current, incoming)` pair fires first.
pub struct MultiStrain {
    order: Vec<u8>,
    mixing: Vec<MixingRule>,
}

impl MultiStrain {
    #[must_use]
    pub fn new(order: Vec<u8>, mixing: Vec<MixingRule>) -> Self {
        MultiStrain { order, mixing }
    }

    fn rules_for(
        &self,
        current: StrainMask,
        incoming: StrainMask,
    ) -> impl Iterator<Item = &MixingRule> {
        self.mixing.iter().filter(move |rule| {
            rule.current == current.bits() && rule.incoming == incoming.bits()
        })
    }
}

impl StrainDynamics for MultiStrain {
    fn can_superinfect(&self, current: StrainMask, incoming: StrainMask) -> bool {
        !current.contains_all(incoming) || self.rules_for(current, incoming).next().is_some()
    }

    fn acquire(&self, context: &Context, current: StrainMask, incoming: StrainMask) -> StrainMask {
        for rule in self.rules_for(current, incoming) {
            if context.sample_bool(StrainRng, rule.probability) {
                return StrainMask::from_bits(rule.result);
            }
        }
        current | incoming
    }

    fn dominance_order(&self) -> &[u8] {
        &self.order
    }
}

/// One strain at a time; an exposure with a different strain replaces the
/// current one with `switch_probability`.
pub struct StrainSwitching {
    order: Vec<u8>,
    switch_probability: f64,
}

impl StrainSwitching {
    #[must_use]
    pub fn new(order: Vec<u8>, switch_probability: f64) -> Self {
        StrainSwitching {
            order,
            switch_probability,
        }
    }
}

impl StrainDynamics for StrainSwitching {
    fn can_superinfect(&self, current: StrainMask, incoming: StrainMask) -> bool {
        !incoming.is_empty() && incoming != current
    }

    fn acquire(&self, context: &Context, current: StrainMask, incoming: StrainMask) -> StrainMask {
        if !context.sample_bool(StrainRng, self.switch_probability) {
            return current;
        }
        // A co-infected source passes on its dominant strain only.
        self.dominant(incoming)
            .map_or(current, StrainMask::single)
    }

    fn dominance_order(&self) -> &[u8] {
        &self.order
    }
}

/// Builds the strategy configured by `fields`.
#[must_use]
pub fn strain_dynamics_for(fields: &Fields) -> Rc<dyn StrainDynamics> {
    match fields.strains() {
        None => Rc::new(SingleStrain),
        Some(settings) => match settings.dynamics {
            StrainDynamicsKind::MultiStrain => Rc::new(MultiStrain::new(
                settings.dominance_order(),
                settings.mixing.clone(),
            )),
            StrainDynamicsKind::StrainSwitching => Rc::new(StrainSwitching::new(
                settings.dominance_order(),
                settings.switch_probability,
            )),
        },
    }
}
