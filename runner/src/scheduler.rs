//! Recursive scheduling over the event log.
//!
//! `execute_step` is single-threaded and cooperative: it processes at most
//! `max_nodes` nodes, aggregating ready split parents before each selection.
//! Every mutation is an append to the run's logs followed by a run-document
//! refresh derived from the latest snapshots. Node-level failures are
//! captured into the node record and never propagate.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::core::decision::decide;
use crate::core::types::{
    ArtifactRef, Decision, DecisionReason, Finding, Node, NodeError, NodeResult, NodeStatus,
    QueueEvent, QueueEventKind, ResultStatus, Run, RunStatus, SchedulerKind,
};
use crate::io::store::{RunStore, now_epoch_ms, now_iso};
use crate::io::walker::walk_scope;
use crate::leaf::execute_leaf;
use crate::split::plan_children;

/// File cap for the sizing walk that feeds the decision engine. Must exceed
/// every split threshold so `scope_too_large` can fire.
const DECISION_SAMPLE_FILES: usize = 256;

/// Illegal run lifecycle transition (cancel of a terminal run, resume of a
/// completed run). Recoverable via `err.downcast_ref::<LifecycleError>()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleError {
    pub run_id: String,
    pub status: RunStatus,
    pub action: &'static str,
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot {} run {} from status {:?}",
            self.action, self.run_id, self.status
        )
    }
}

impl std::error::Error for LifecycleError {}

/// Outcome of a step batch (also the shape returned by `run_until`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct StepReport {
    pub run: Run,
    pub processed_nodes: u32,
    pub aggregated_nodes: u32,
    pub notes: Vec<String>,
}

/// Pick the next queued node. `dfs` prefers maximum depth, `bfs`/`hybrid`
/// minimum depth; ties break on earliest `created_at`, then node id.
pub fn select_next(nodes: &[Node], kind: SchedulerKind) -> Option<&Node> {
    let queued = nodes.iter().filter(|n| n.status == NodeStatus::Queued);
    match kind {
        SchedulerKind::Dfs => queued.max_by(|a, b| {
            a.depth
                .cmp(&b.depth)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| b.node_id.cmp(&a.node_id))
        }),
        SchedulerKind::Bfs | SchedulerKind::Hybrid => queued.min_by(|a, b| {
            a.depth
                .cmp(&b.depth)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.node_id.cmp(&b.node_id))
        }),
    }
}

/// Process up to `max_nodes` queued nodes, then refresh the run document.
#[instrument(skip_all, fields(run_id = %run_id, max_nodes))]
pub fn execute_step(store: &RunStore, run_id: &str, max_nodes: u32) -> Result<StepReport> {
    let mut run = store.get_run(run_id)?;
    let mut notes = Vec::new();
    if run.status.is_terminal() {
        notes.push(format!("run is already {:?}", run.status).to_lowercase());
        return Ok(StepReport {
            run,
            processed_nodes: 0,
            aggregated_nodes: 0,
            notes,
        });
    }

    let mut processed = 0u32;
    let mut aggregated = 0u32;
    for _ in 0..max_nodes {
        aggregated += aggregate_ready_parents(store, &run, &mut notes)?;

        let nodes = store.load_nodes(run_id)?;
        let Some(selected) = select_next(&nodes, run.config.scheduler) else {
            break;
        };
        let mut node = selected.clone();
        transition_running(store, &mut node)?;

        // A requeued split parent keeps its children; terminalization is
        // aggregation's job, never a re-split.
        if node.decision == Decision::Split && !node.child_ids.is_empty() {
            notes.push(format!("requeued split parent {} awaits children", node.node_id));
            processed += 1;
            continue;
        }

        let scope_paths: Vec<PathBuf> =
            node.scope_ref.paths.iter().map(PathBuf::from).collect();
        let stats = walk_scope(&scope_paths, DECISION_SAMPLE_FILES);
        let outcome = decide(
            &run.config,
            run.mode,
            node.depth,
            &node.budgets,
            now_epoch_ms(),
            stats.file_count,
            stats.total_bytes,
        );
        debug!(node_id = %node.node_id, decision = ?outcome.decision, reason = outcome.reason.as_str(), "decided");

        if outcome.decision == Decision::Split {
            let children = plan_children(&node, &now_iso());
            if children.is_empty() {
                notes.push(format!("{}: no children, fell back to leaf", node.node_id));
                run_leaf(
                    store,
                    &run,
                    &mut node,
                    DecisionReason::SplitNoChildrenFallbackLeaf,
                    0.75,
                )?;
            } else {
                for child in &children {
                    store.append_node(child)?;
                    emit(store, run_id, QueueEventKind::NodeEnqueued, Some(&child.node_id))?;
                }
                node.decision = Decision::Split;
                node.decision_reason = Some(outcome.reason);
                node.child_ids = children.iter().map(|c| c.node_id.clone()).collect();
                node.metrics = Some(outcome.metrics);
                node.updated_at = now_iso();
                store.append_node(&node)?;
                emit(store, run_id, QueueEventKind::NodeSplit, Some(&node.node_id))?;
            }
        } else {
            run_leaf(store, &run, &mut node, outcome.reason, 0.8)?;
        }
        processed += 1;
    }

    aggregated += aggregate_ready_parents(store, &run, &mut notes)?;
    refresh_run(store, &mut run, None)?;

    Ok(StepReport {
        run,
        processed_nodes: processed,
        aggregated_nodes: aggregated,
        notes,
    })
}

/// Drive `execute_step` until the run terminalizes, a step goes idle, or
/// `max_nodes` nodes have been processed in total.
pub fn run_until(store: &RunStore, run_id: &str, max_nodes: u32) -> Result<StepReport> {
    let mut processed = 0u32;
    let mut aggregated = 0u32;
    let mut notes = Vec::new();
    loop {
        let remaining = max_nodes.saturating_sub(processed);
        if remaining == 0 {
            break;
        }
        let report = execute_step(store, run_id, remaining)?;
        processed += report.processed_nodes;
        aggregated += report.aggregated_nodes;
        notes.extend(report.notes);
        if report.run.status.is_terminal() {
            return Ok(StepReport {
                run: report.run,
                processed_nodes: processed,
                aggregated_nodes: aggregated,
                notes,
            });
        }
        if report.processed_nodes == 0 && report.aggregated_nodes == 0 {
            break;
        }
    }
    Ok(StepReport {
        run: store.get_run(run_id)?,
        processed_nodes: processed,
        aggregated_nodes: aggregated,
        notes,
    })
}

/// Cancel a non-terminal run: every queued/running node terminalizes to
/// cancelled.
pub fn cancel_run(store: &RunStore, run_id: &str) -> Result<Run> {
    let mut run = store.get_run(run_id)?;
    if run.status.is_terminal() {
        return Err(LifecycleError {
            run_id: run_id.to_string(),
            status: run.status,
            action: "cancel",
        }
        .into());
    }
    for node in store.load_nodes(run_id)? {
        if matches!(node.status, NodeStatus::Queued | NodeStatus::Running) {
            let mut node = node;
            node.status = NodeStatus::Cancelled;
            node.updated_at = now_iso();
            store.append_node(&node)?;
        }
    }
    emit(store, run_id, QueueEventKind::RunCancelled, None)?;
    refresh_run(store, &mut run, Some(RunStatus::Cancelled))?;
    Ok(run)
}

/// Resume a cancelled or failed run. Resuming a running run is a no-op;
/// resuming a completed run is a lifecycle error.
pub fn resume_run(store: &RunStore, run_id: &str) -> Result<Run> {
    let mut run = store.get_run(run_id)?;
    match run.status {
        RunStatus::Running => return Ok(run),
        RunStatus::Cancelled | RunStatus::Failed => {}
        RunStatus::Completed => {
            return Err(LifecycleError {
                run_id: run_id.to_string(),
                status: run.status,
                action: "resume",
            }
            .into());
        }
    }

    let have_result: HashSet<String> = store
        .load_results(run_id)?
        .into_iter()
        .map(|r| r.node_id)
        .collect();
    for node in store.load_nodes(run_id)? {
        if node.status == NodeStatus::Cancelled && !have_result.contains(&node.node_id) {
            let mut node = node;
            node.status = NodeStatus::Queued;
            node.updated_at = now_iso();
            store.append_node(&node)?;
            emit(store, run_id, QueueEventKind::NodeRequeued, Some(&node.node_id))?;
        }
    }
    emit(store, run_id, QueueEventKind::RunResumed, None)?;
    refresh_run(store, &mut run, Some(RunStatus::Running))?;
    Ok(run)
}

fn transition_running(store: &RunStore, node: &mut Node) -> Result<()> {
    node.status = NodeStatus::Running;
    node.updated_at = now_iso();
    store.append_node(node)?;
    emit(store, &node.run_id, QueueEventKind::NodeDequeued, Some(&node.node_id))?;
    emit(store, &node.run_id, QueueEventKind::NodeStarted, Some(&node.node_id))?;
    Ok(())
}

/// Execute a node as a leaf and terminalize it. Exceptions are captured into
/// the node record; the node fails, the step does not.
fn run_leaf(
    store: &RunStore,
    run: &Run,
    node: &mut Node,
    reason: DecisionReason,
    confidence: f64,
) -> Result<()> {
    node.decision = Decision::Leaf;
    node.decision_reason = Some(reason);
    match execute_leaf(store, run.mode, node) {
        Ok(outcome) => {
            store.append_result(&outcome.result)?;
            node.status = NodeStatus::Completed;
            node.confidence = Some(confidence);
            node.metrics = Some(outcome.metrics);
            node.updated_at = now_iso();
            store.append_node(node)?;
            emit(store, &node.run_id, QueueEventKind::NodeCompleted, Some(&node.node_id))?;
        }
        Err(err) => {
            warn!(node_id = %node.node_id, %err, "leaf execution failed");
            let message = format!("{err:#}");
            store.append_result(&NodeResult {
                run_id: node.run_id.clone(),
                node_id: node.node_id.clone(),
                status: ResultStatus::Failed,
                summary: format!("node execution error: {message}"),
                findings: Vec::new(),
                artifacts: Vec::new(),
                aggregation_notes: None,
                created_at: now_iso(),
            })?;
            node.status = NodeStatus::Failed;
            node.errors = vec![NodeError {
                code: "node_execution_error".to_string(),
                message,
                retryable: false,
            }];
            node.updated_at = now_iso();
            store.append_node(node)?;
            emit(store, &node.run_id, QueueEventKind::NodeFailed, Some(&node.node_id))?;
        }
    }
    Ok(())
}

/// Emit an aggregated result for every split parent whose children are all
/// terminal and which has no result yet.
fn aggregate_ready_parents(store: &RunStore, run: &Run, notes: &mut Vec<String>) -> Result<u32> {
    let nodes = store.load_nodes(&run.run_id)?;
    let results = store.load_results(&run.run_id)?;
    let by_id: HashMap<&str, &Node> = nodes.iter().map(|n| (n.node_id.as_str(), n)).collect();
    let result_by_id: HashMap<&str, &NodeResult> =
        results.iter().map(|r| (r.node_id.as_str(), r)).collect();

    let mut count = 0u32;
    for parent in &nodes {
        if parent.decision != Decision::Split
            || parent.child_ids.is_empty()
            || result_by_id.contains_key(parent.node_id.as_str())
        {
            continue;
        }
        let children: Vec<&Node> = parent
            .child_ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).copied())
            .collect();
        if children.len() != parent.child_ids.len()
            || !children.iter().all(|c| c.status.is_terminal())
        {
            continue;
        }

        aggregate_parent(store, parent, &children, &result_by_id)?;
        notes.push(format!("aggregated {}", parent.node_id));
        count += 1;
    }
    Ok(count)
}

fn aggregate_parent(
    store: &RunStore,
    parent: &Node,
    children: &[&Node],
    result_by_id: &HashMap<&str, &NodeResult>,
) -> Result<()> {
    let mut summaries = Vec::new();
    let mut findings: Vec<Finding> = Vec::new();
    let mut artifacts: Vec<ArtifactRef> = Vec::new();
    let mut completed = 0usize;
    let mut failed = 0usize;
    let mut cancelled = 0usize;

    for child in children {
        match child.status {
            NodeStatus::Completed => completed += 1,
            NodeStatus::Failed => failed += 1,
            NodeStatus::Cancelled => cancelled += 1,
            NodeStatus::Queued | NodeStatus::Running => {}
        }
        match result_by_id.get(child.node_id.as_str()) {
            Some(result) => {
                summaries.push(format!("[{}] {}", child.node_id, result.summary));
                findings.extend(result.findings.iter().cloned());
                artifacts.extend(result.artifacts.iter().cloned());
            }
            None => summaries.push(format!("[{}] no result ({:?})", child.node_id, child.status)),
        }
    }

    let status = if completed == 0 {
        ResultStatus::Failed
    } else if failed + cancelled > 0 {
        ResultStatus::Partial
    } else {
        ResultStatus::Completed
    };
    let aggregation_notes = (status != ResultStatus::Completed).then(|| {
        format!(
            "{completed}/{} children succeeded; {failed} failed; {cancelled} cancelled",
            children.len()
        )
    });

    store.append_result(&NodeResult {
        run_id: parent.run_id.clone(),
        node_id: parent.node_id.clone(),
        status,
        summary: summaries.join("\n"),
        findings,
        artifacts,
        aggregation_notes,
        created_at: now_iso(),
    })?;

    let mut parent = parent.clone();
    parent.status = if status == ResultStatus::Failed {
        NodeStatus::Failed
    } else {
        NodeStatus::Completed
    };
    parent.confidence = match status {
        ResultStatus::Completed => Some(0.8),
        ResultStatus::Partial => Some(0.6),
        ResultStatus::Failed => None,
    };
    parent.updated_at = now_iso();
    store.append_node(&parent)?;
    emit(store, &parent.run_id, QueueEventKind::NodeAggregated, Some(&parent.node_id))?;
    Ok(())
}

/// Recompute progress, the output index, the checkpoint, and the terminal
/// run state from the latest snapshots. `force_status` pins the status for
/// cancel/resume instead of deriving it from the root.
fn refresh_run(store: &RunStore, run: &mut Run, force_status: Option<RunStatus>) -> Result<()> {
    let nodes = store.load_nodes(&run.run_id)?;
    let results = store.load_results(&run.run_id)?;
    let events = store.load_events(&run.run_id)?;

    run.progress.nodes_total = nodes.len() as u64;
    run.progress.nodes_completed = nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Completed)
        .count() as u64;
    run.progress.nodes_failed = nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Failed)
        .count() as u64;
    run.progress.active_nodes = nodes
        .iter()
        .filter(|n| matches!(n.status, NodeStatus::Queued | NodeStatus::Running))
        .count() as u64;
    run.progress.max_depth_seen = nodes.iter().map(|n| n.depth).max().unwrap_or(0);

    let mut index = std::mem::take(&mut run.output_index);
    index.extend(results.iter().flat_map(|r| r.artifacts.iter().cloned()));
    run.output_index = dedupe_artifacts(index);

    run.checkpoint.last_event_offset = events.len() as u64;
    run.checkpoint.updated_at = now_iso();

    match force_status {
        Some(status) => {
            run.status = status;
            if status.is_terminal() {
                run.completed_at = Some(now_iso());
            } else {
                run.completed_at = None;
            }
        }
        None => {
            let root = nodes.iter().find(|n| n.node_id == run.root_node_id);
            let terminal = match root.map(|r| r.status) {
                Some(NodeStatus::Completed) => Some(RunStatus::Completed),
                Some(NodeStatus::Failed) => Some(RunStatus::Failed),
                Some(NodeStatus::Cancelled) => Some(RunStatus::Cancelled),
                _ if run.progress.active_nodes == 0 => Some(RunStatus::Failed),
                _ => None,
            };
            if let Some(status) = terminal {
                run.status = status;
                if run.completed_at.is_none() {
                    run.completed_at = Some(now_iso());
                }
            }
        }
    }

    run.updated_at = now_iso();
    store.set_run(run)
}

/// Dedupe on (kind, path), keeping the first entry, sorted by path.
pub fn dedupe_artifacts(artifacts: Vec<ArtifactRef>) -> Vec<ArtifactRef> {
    let mut seen = HashSet::new();
    let mut out: Vec<ArtifactRef> = artifacts
        .into_iter()
        .filter(|a| seen.insert((a.kind.clone(), a.path.clone())))
        .collect();
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

fn emit(
    store: &RunStore,
    run_id: &str,
    event: QueueEventKind,
    node_id: Option<&str>,
) -> Result<()> {
    store.append_event(&QueueEvent {
        run_id: run_id.to_string(),
        event,
        node_id: node_id.map(str::to_string),
        timestamp: now_iso(),
        details: None,
    })
}
