//! Per-query trajectory records.

use serde::Serialize;

use crate::calltree::{CallTree, SubCall};

/// One controller iteration: what the model reasoned, the code that ran, and
/// the bounded output fed back into the next prompt.
#[derive(Debug, Clone, Serialize)]
pub struct TrajectoryStep {
    pub iteration: u32,
    pub depth: u32,
    pub reasoning: String,
    pub code: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_calls: Option<Vec<SubCall>>,
}

/// Final product of `Engine::run_query`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineOutcome {
    pub answer: String,
    pub trajectory: Vec<TrajectoryStep>,
    pub call_tree: CallTree,
}
