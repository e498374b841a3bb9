//! An individual-based model of sexually transmitted infections
//!
//! `ixa-sti` simulates the transmission of a multi-site, multi-strain
//! sexually transmitted infection through a dynamic network of regular and
//! casual partnerships. Each simulated trajectory is driven a day at a time and
//! produces prevalence, incidence and strain-composition snapshots used for
//! calibration and intervention analysis.
//!
//! The central object of a trajectory is the [`Context`], which owns the
//! simulated clock, the scheduled plans and a set of data plugins. Each
//! component of the model keeps its state in a data plugin and exposes its
//! operations as an extension trait on `Context`:
//! * [`people`] holds the fixed-size arena of individuals and handles aging
//!   and in-place replacement.
//! * [`partnership`] maintains the regular and casual partnership graphs and
//!   pairs available individuals every day.
//! * [`transmission`] executes the sexual acts scheduled for each partnership
//!   and turns unprotected acts into exposure events.
//! * [`infection`] advances the per-site infection stages and resolves strain
//!   mixing and dominance.
//! * [`screening`], [`treatment`] and [`vaccination`] apply the clinical
//!   interventions.
//! * [`trajectory`] composes all of the above into one simulated run and
//!   [`batch`] runs many trajectories in parallel.
pub mod batch;
pub mod classifier;
pub mod context;
pub mod error;
pub mod execution_stats;
pub mod hashing;
pub mod infection;
pub mod log;
pub mod parameters;
pub mod partnership;
pub mod people;
pub mod plan;
pub mod random;
pub mod report;
pub mod runner;
pub mod screening;
pub mod state;
pub mod strain;
pub mod trajectory;
pub mod transmission;
pub mod treatment;
pub mod vaccination;

pub use context::{Context, DataPlugin, ExecutionPhase};
pub use error::StiError;
pub use hashing::{HashMap, HashMapExt, HashSet, HashSetExt};
pub use people::{ContextPeopleExt, PersonId};
pub use random::{ContextRandomExt, RngId};

// Re-exports used by the exported macros.
pub use paste;
pub use rand;

/// A simulated day. Day zero is the first simulated day, burn-in included.
pub type Day = u32;

/// Days in a simulated year, used to convert annual rates.
pub const DAYS_PER_YEAR: u32 = 365;

pub mod prelude {
    pub use crate::classifier::Classifier;
    pub use crate::context::{Context, ExecutionPhase};
    pub use crate::define_data_plugin;
    pub use crate::define_rng;
    pub use crate::error::StiError;
    pub use crate::infection::{ContextInfectionExt, InfectionStatus};
    pub use crate::parameters::{ContextParametersExt, Fields};
    pub use crate::partnership::{ContextPartnershipExt, PartnershipKind};
    pub use crate::people::{Behaviour, ContextPeopleExt, PersonId, Site};
    pub use crate::random::ContextRandomExt;
    pub use crate::strain::StrainMask;
    pub use crate::trajectory::{EventSchedule, Snapshot, Trajectory};
    pub use crate::Day;
}
