//! Orchestration for starting a new run.
//!
//! A run is created with a root node spanning the requested scope paths. The
//! root starts queued; the scheduler does everything else.

use std::path::PathBuf;

use anyhow::Result;
use rand::{Rng, distributions::Alphanumeric};
use tracing::info;

use crate::core::node_id::root_node_id;
use crate::core::types::{
    Checkpoint, Decision, Domain, Node, NodeBudgets, NodeStatus, QueueEvent, QueueEventKind, Run,
    RunConfig, RunMode, RunProgress, RunStatus, ScopeRef, ScopeType,
};
use crate::io::store::{RunStore, now_epoch_ms, now_iso};

/// Inputs for `repo_rlm_start`.
#[derive(Debug, Clone)]
pub struct StartParams {
    pub objective: String,
    pub mode: RunMode,
    pub domain: Option<Domain>,
    pub config: RunConfig,
    pub root_scope_paths: Vec<PathBuf>,
}

/// Create the run directory, the root node, and the initial run document.
pub fn start_run(store: &RunStore, params: &StartParams) -> Result<Run> {
    let created_at = now_iso();
    let now_ms = now_epoch_ms();
    let run_id = generate_run_id(now_ms);
    let root_id = root_node_id(&run_id);
    info!(run_id = %run_id, mode = ?params.mode, "starting run");

    store.init_run_dir(&run_id)?;

    let root = Node {
        run_id: run_id.clone(),
        node_id: root_id.clone(),
        parent_id: None,
        depth: 0,
        scope_type: ScopeType::Repo,
        scope_ref: ScopeRef {
            paths: params
                .root_scope_paths
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect(),
        },
        objective: params.objective.clone(),
        domain: params.domain,
        status: NodeStatus::Queued,
        decision: Decision::Undecided,
        decision_reason: None,
        child_ids: Vec::new(),
        confidence: None,
        budgets: NodeBudgets {
            max_depth: params.config.max_depth,
            remaining_llm_calls: params.config.max_llm_calls,
            remaining_tokens: params.config.max_tokens,
            deadline_epoch_ms: now_ms + params.config.max_wall_clock_ms,
        },
        metrics: None,
        errors: Vec::new(),
        created_at: created_at.clone(),
        updated_at: created_at.clone(),
    };
    store.append_node(&root)?;
    store.append_event(&QueueEvent {
        run_id: run_id.clone(),
        event: QueueEventKind::NodeEnqueued,
        node_id: Some(root_id.clone()),
        timestamp: created_at.clone(),
        details: None,
    })?;

    let run = Run {
        run_id: run_id.clone(),
        objective: params.objective.clone(),
        mode: params.mode,
        status: RunStatus::Running,
        root_node_id: root_id,
        config: params.config.clone(),
        progress: RunProgress {
            nodes_total: 1,
            nodes_completed: 0,
            nodes_failed: 0,
            active_nodes: 1,
            max_depth_seen: 0,
        },
        output_index: Vec::new(),
        checkpoint: Checkpoint {
            last_event_offset: 1,
            updated_at: created_at.clone(),
        },
        created_at: created_at.clone(),
        updated_at: created_at,
        completed_at: None,
    };
    store.set_run(&run)?;
    Ok(run)
}

/// Monotonic-ish unique id: epoch millis plus a short random suffix.
fn generate_run_id(now_ms: i64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect::<String>()
        .to_ascii_lowercase();
    format!("run-{now_ms}-{suffix}")
}
