//! Run status reporting for the tool surface.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

use crate::core::types::{Decision, Node, NodeStatus, QueueEvent, Run};
use crate::io::store::RunStore;

/// One entry of the active branch preview.
#[derive(Debug, Clone, Serialize)]
pub struct BranchPreview {
    pub node_id: String,
    pub depth: u32,
    pub status: NodeStatus,
    pub decision: Decision,
}

/// Everything `repo_rlm_status` returns.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub run: Run,
    pub nodes: Vec<Node>,
    pub queue_events: Vec<QueueEvent>,
    pub result_count: usize,
    pub depth_histogram: BTreeMap<String, u64>,
    pub active_branches: Vec<BranchPreview>,
}

/// Count latest node snapshots per depth, keyed by the depth rendered as a
/// string so the histogram serializes as a JSON object.
pub fn depth_histogram(nodes: &[Node]) -> BTreeMap<String, u64> {
    let mut histogram = BTreeMap::new();
    for node in nodes {
        *histogram.entry(node.depth.to_string()).or_insert(0) += 1;
    }
    histogram
}

/// Build the status report from the latest snapshots.
pub fn run_status(store: &RunStore, run_id: &str) -> Result<StatusReport> {
    let run = store.get_run(run_id)?;
    let nodes = store.load_nodes(run_id)?;
    let queue_events = store.load_events(run_id)?;
    let result_count = store.load_results(run_id)?.len();
    let histogram = depth_histogram(&nodes);

    let mut active: Vec<&Node> = nodes
        .iter()
        .filter(|n| matches!(n.status, NodeStatus::Queued | NodeStatus::Running))
        .collect();
    active.sort_by(|a, b| {
        b.depth
            .cmp(&a.depth)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    let active_branches = active
        .into_iter()
        .take(8)
        .map(|n| BranchPreview {
            node_id: n.node_id.clone(),
            depth: n.depth,
            status: n.status,
            decision: n.decision,
        })
        .collect();

    Ok(StatusReport {
        run,
        nodes,
        queue_events,
        result_count,
        depth_histogram: histogram,
        active_branches,
    })
}
