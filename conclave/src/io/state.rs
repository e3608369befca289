//! Run checkpoint storage (`state.json`).
//!
//! The checkpoint is the single source of truth for resumption. It is
//! written atomically after every externally observable transition, before
//! any control-flow decision that could be interrupted; a crash therefore
//! resumes at the last committed step. Fields unused by a mode keep their
//! defaults.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::model::{Adjudication, Critique};
use crate::io::store::{load_json_or, write_json_atomic};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunState {
    /// Run is paused waiting for HITL answers.
    pub awaiting_human: bool,
    /// Current iteration, 1-indexed (workflow modes).
    pub iteration: u32,
    /// Index of the next workflow step to execute.
    pub step_index: usize,
    /// Current turn, 0-indexed (conversation mode).
    pub turn: u32,
    /// Current artifact content.
    pub artifact: Option<String>,
    /// Relative path (within the run dir) of the current artifact file.
    pub artifact_path: Option<String>,
    /// Critiques collected per named critique step, this iteration.
    pub critiques_by_step: BTreeMap<String, Vec<Critique>>,
    /// Critiques not yet consumed by an adjudicate step.
    pub unadjudicated: Vec<Critique>,
    /// The active adjudication (sole input to the next refinement).
    pub last_adjudication: Option<Adjudication>,
    /// Pursuing issue ids from the previous adjudication, for thrash overlap.
    pub last_pursuing: BTreeSet<String>,
    /// Per-issue thrash counters.
    pub issue_thrash_counts: BTreeMap<String, u32>,
    /// Consecutive refinement-validation failures.
    pub validation_retries: u32,
    /// Agents that declared done in the current cycle.
    pub done_agents: BTreeSet<String>,
    /// Cycle the done set belongs to; reset on a new cycle, not per turn.
    pub done_cycle: i64,
    /// Expert order picked by the routing collaborator (conversation mode);
    /// selected once per run.
    pub experts: Vec<String>,
}

impl RunState {
    pub fn initial() -> Self {
        Self {
            iteration: 1,
            done_cycle: -1,
            ..Self::default()
        }
    }
}

/// Load the checkpoint, defaulting for a fresh run.
pub fn load_state(path: &Path) -> RunState {
    let state = load_json_or(path, RunState::initial());
    debug!(iteration = state.iteration, step_index = state.step_index, turn = state.turn,
           awaiting_human = state.awaiting_human, "run state loaded");
    state
}

/// Commit the checkpoint atomically.
pub fn write_state(path: &Path, state: &RunState) -> Result<()> {
    debug!(iteration = state.iteration, step_index = state.step_index, turn = state.turn,
           "writing run state");
    write_json_atomic(path, state)
}
