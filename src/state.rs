//! Export and import of a population state.
//!
//! A [`PopulationState`] captures everything a trajectory needs to resume
//! where it left off, typically right after burn-in, so that later runs can
//! skip burn-in. States are written as JSON or, more compactly, with
//! `bincode`; the field bundle is embedded as JSON text in both cases because
//! its tagged enums need a self-describing format.
use std::fs;
use std::path::Path;

use bincode::config;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::StiError;
use crate::infection::{ContextInfectionExt, IncidenceCounts};
use crate::parameters::{ContextParametersExt, Fields};
use crate::partnership::{restore_graphs, ContextPartnershipExt, PartnershipGraph, PartnershipKind};
use crate::people::{restore_people, snapshot_people, Individual};
use crate::vaccination::{BoosterSchedule, ContextVaccinationExt};
use crate::{Context, Day};

/// Bumped whenever the layout of [`PopulationState`] changes.
pub const STATE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PopulationState {
    pub version: u32,
    pub day: Day,
    /// The field bundle the state was produced with, as JSON.
    pub fields: String,
    pub individuals: Vec<Individual>,
    pub next_uid: u64,
    pub regular: PartnershipGraph,
    pub casual: PartnershipGraph,
    pub incidence: IncidenceCounts,
    pub boosters: BoosterSchedule,
}

impl PopulationState {
    /// The field bundle the state was produced with.
    ///
    /// # Errors
    ///
    /// Returns `StiError::JsonError` if the embedded fields cannot be parsed.
    pub fn fields(&self) -> Result<Fields, StiError> {
        Ok(serde_json::from_str(&self.fields)?)
    }
}

/// Captures the population of `context`.
///
/// # Panics
///
/// Panics if the context has not been configured and initialised.
#[must_use]
pub fn export_state(context: &Context) -> PopulationState {
    let (individuals, next_uid) = snapshot_people(context);
    let fields = serde_json::to_string(&*context.get_fields())
        .unwrap_or_else(|_| String::from("{}"));
    PopulationState {
        version: STATE_VERSION,
        day: context.get_current_day(),
        fields,
        individuals,
        next_uid,
        regular: context
            .get_partnership_graph(PartnershipKind::Regular)
            .clone(),
        casual: context.get_partnership_graph(PartnershipKind::Casual).clone(),
        incidence: context.get_incidence().clone(),
        boosters: context.get_booster_schedule().clone(),
    }
}

/// Replaces the population of an initialised `context` with `state`.
///
/// # Errors
///
/// Returns `StiError::StateError` if the state has another format version
/// or its population does not match the configured population size.
pub fn import_state(context: &mut Context, state: &PopulationState) -> Result<(), StiError> {
    if state.version != STATE_VERSION {
        return Err(StiError::StateError(format!(
            "state version {} cannot be imported (expected {STATE_VERSION})",
            state.version
        )));
    }
    let size = context.get_fields().population_size;
    if state.individuals.len() != size {
        return Err(StiError::StateError(format!(
            "state holds {} individuals but the population size is {size}",
            state.individuals.len()
        )));
    }
    for (kind, graph) in [
        (PartnershipKind::Regular, &state.regular),
        (PartnershipKind::Casual, &state.casual),
    ] {
        if graph.population_size() != size {
            return Err(StiError::StateError(format!(
                "{kind} graph covers {} individuals but the population size is {size}",
                graph.population_size()
            )));
        }
    }

    restore_people(context, state.individuals.clone(), state.next_uid);
    restore_graphs(context, state.regular.clone(), state.casual.clone());
    context.set_incidence(state.incidence.clone());
    context.set_booster_schedule(state.boosters.clone());
    context.set_current_day(state.day);
    debug!("imported {size} individuals at day {}", state.day);
    Ok(())
}

/// # Errors
///
/// Returns `StiError::EncodeError` if the state cannot be encoded.
pub fn encode_state(state: &PopulationState) -> Result<Vec<u8>, StiError> {
    Ok(bincode::serde::encode_to_vec(state, config::standard())?)
}

/// # Errors
///
/// Returns `StiError::DecodeError` if `bytes` is not an encoded state.
pub fn decode_state(bytes: &[u8]) -> Result<PopulationState, StiError> {
    let (state, _) = bincode::serde::decode_from_slice(bytes, config::standard())?;
    Ok(state)
}

/// Writes `state` to `path`, as JSON if the extension is `json` and with
/// `bincode` otherwise.
///
/// # Errors
///
/// Returns an error if the state cannot be encoded or written.
pub fn write_state(path: &Path, state: &PopulationState) -> Result<(), StiError> {
    let bytes = if is_json(path) {
        serde_json::to_vec(state)?
    } else {
        encode_state(state)?
    };
    fs::write(path, bytes)?;
    Ok(())
}

/// Reads a state written by [`write_state`].
///
/// # Errors
///
/// Returns an error if the file cannot be read or decoded.
pub fn read_state(path: &Path) -> Result<PopulationState, StiError> {
    let bytes = fs::read(path)?;
    if is_json(path) {
        Ok(serde_json::from_slice(&bytes)?)
    } else {
        decode_state(&bytes)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|extension| extension == "json")
}
