//! Test-only helpers for constructing runs and node snapshots.

use std::path::PathBuf;

use crate::core::node_id::root_node_id;
use crate::core::types::{
    Checkpoint, Decision, Node, NodeBudgets, NodeStatus, Run, RunConfig, RunMode, RunProgress,
    RunStatus, ScopeRef, ScopeType,
};

const TEST_TIMESTAMP: &str = "2026-01-01T00:00:00+00:00";

/// Create a deterministic queued node with generous budgets.
pub fn node(run_id: &str, node_id: &str, depth: u32) -> Node {
    Node {
        run_id: run_id.to_string(),
        node_id: node_id.to_string(),
        parent_id: None,
        depth,
        scope_type: ScopeType::Dir,
        scope_ref: ScopeRef::default(),
        objective: "test objective".to_string(),
        domain: None,
        status: NodeStatus::Queued,
        decision: Decision::Undecided,
        decision_reason: None,
        child_ids: Vec::new(),
        confidence: None,
        budgets: NodeBudgets {
            max_depth: 4,
            remaining_llm_calls: 100,
            remaining_tokens: 100_000,
            deadline_epoch_ms: i64::MAX,
        },
        metrics: None,
        errors: Vec::new(),
        created_at: TEST_TIMESTAMP.to_string(),
        updated_at: TEST_TIMESTAMP.to_string(),
    }
}

/// Node with an explicit scope over filesystem paths.
pub fn node_with_scope(run_id: &str, node_id: &str, depth: u32, paths: &[PathBuf]) -> Node {
    let mut n = node(run_id, node_id, depth);
    n.scope_ref = ScopeRef {
        paths: paths.iter().map(|p| p.to_string_lossy().to_string()).collect(),
    };
    n
}

/// Create a deterministic running run document.
pub fn run(run_id: &str) -> Run {
    Run {
        run_id: run_id.to_string(),
        objective: "test objective".to_string(),
        mode: RunMode::Generic,
        status: RunStatus::Running,
        root_node_id: root_node_id(run_id),
        config: RunConfig::default(),
        progress: RunProgress::default(),
        output_index: Vec::new(),
        checkpoint: Checkpoint {
            last_event_offset: 0,
            updated_at: TEST_TIMESTAMP.to_string(),
        },
        created_at: TEST_TIMESTAMP.to_string(),
        updated_at: TEST_TIMESTAMP.to_string(),
        completed_at: None,
    }
}
