//! Persisted state types for the recursive runner.
//!
//! These types are the on-disk contract: runs, nodes, results, findings, and
//! queue events. They must remain deterministic across runs; no field may
//! depend on in-memory ordering or platform behavior.

use serde::{Deserialize, Serialize};

/// Synthesis flavor of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Generic,
    Wiki,
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Node selection order. `hybrid` is behaviorally identical to `bfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    Bfs,
    Dfs,
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub max_depth: u32,
    pub max_llm_calls: i64,
    pub max_tokens: i64,
    pub max_wall_clock_ms: i64,
    pub scheduler: SchedulerKind,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            max_llm_calls: 300,
            max_tokens: 500_000,
            max_wall_clock_ms: 1_800_000,
            scheduler: SchedulerKind::Bfs,
        }
    }
}

/// Derived counters, recomputed from the latest node snapshots after every
/// step batch. Never authoritative on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub nodes_total: u64,
    pub nodes_completed: u64,
    pub nodes_failed: u64,
    pub active_nodes: u64,
    pub max_depth_seen: u32,
}

/// A synthesized or per-node artifact, path relative to the run directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Count of queue events observed when the run document was last written.
    pub last_event_offset: u64,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub objective: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub root_node_id: String,
    pub config: RunConfig,
    pub progress: RunProgress,
    /// Deduped on (kind, path), sorted lexicographically by path.
    pub output_index: Vec<ArtifactRef>,
    pub checkpoint: Checkpoint,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Repo,
    Dir,
    Module,
    FileGroup,
    FileSlice,
}

impl ScopeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeType::Repo => "repo",
            ScopeType::Dir => "dir",
            ScopeType::Module => "module",
            ScopeType::FileGroup => "file_group",
            ScopeType::FileSlice => "file_slice",
        }
    }
}

/// Paths owned by a node. Child scopes produced by a split never overlap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRef {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Undecided,
    Leaf,
    Split,
}

/// Why a node was resolved as leaf or split. Persisted for debuggability;
/// the variants short-circuit in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    DeadlineExceeded,
    MaxDepthReached,
    LlmBudgetExhausted,
    TokenBudgetExhausted,
    ScopeTooLarge,
    ScopeSmallEnough,
    SplitNoChildrenFallbackLeaf,
}

impl DecisionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionReason::DeadlineExceeded => "deadline_exceeded",
            DecisionReason::MaxDepthReached => "max_depth_reached",
            DecisionReason::LlmBudgetExhausted => "llm_budget_exhausted",
            DecisionReason::TokenBudgetExhausted => "token_budget_exhausted",
            DecisionReason::ScopeTooLarge => "scope_too_large",
            DecisionReason::ScopeSmallEnough => "scope_small_enough",
            DecisionReason::SplitNoChildrenFallbackLeaf => "split_no_children_fallback_leaf",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Security,
    Quality,
    Performance,
    Docs,
    Architecture,
}

impl Domain {
    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Security => "security",
            Domain::Quality => "quality",
            Domain::Performance => "performance",
            Domain::Docs => "docs",
            Domain::Architecture => "architecture",
        }
    }
}

/// Budgets flow from parent to child at split time; the deadline is
/// inherited verbatim, call/token budgets are divided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBudgets {
    pub max_depth: u32,
    pub remaining_llm_calls: i64,
    pub remaining_tokens: i64,
    pub deadline_epoch_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub file_count: u64,
    pub total_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub findings_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// One snapshot line in `nodes.jsonl`. The newest line per `node_id` wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub run_id: String,
    pub node_id: String,
    pub parent_id: Option<String>,
    pub depth: u32,
    pub scope_type: ScopeType,
    pub scope_ref: ScopeRef,
    pub objective: String,
    pub domain: Option<Domain>,
    pub status: NodeStatus,
    pub decision: Decision,
    pub decision_reason: Option<DecisionReason>,
    pub child_ids: Vec<String>,
    pub confidence: Option<f64>,
    pub budgets: NodeBudgets,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<NodeMetrics>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<NodeError>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Completed,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Numeric rank used for sorting and risk scoring: critical=5 .. info=1.
    pub fn rank(self) -> u32 {
        match self {
            Severity::Critical => 5,
            Severity::High => 4,
            Severity::Medium => 3,
            Severity::Low => 2,
            Severity::Info => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

/// A `(path, line range)` region proving a finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub path: String,
    pub line_start: u32,
    pub line_end: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
}

/// A reviewable observation. Any severity above `info` must carry at least
/// one evidence pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub domain: Domain,
    pub severity: Severity,
    pub confidence: f64,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
    pub evidence: Vec<Evidence>,
}

/// One snapshot line in `results.jsonl`. The newest line per `node_id` wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub run_id: String,
    pub node_id: String,
    pub status: ResultStatus,
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation_notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventKind {
    NodeEnqueued,
    NodeDequeued,
    NodeStarted,
    NodeSplit,
    NodeAggregated,
    NodeCompleted,
    NodeFailed,
    NodeRequeued,
    RunCancelled,
    RunResumed,
}

/// One line in `queue.jsonl`. Append-only; never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEvent {
    pub run_id: String,
    pub event: QueueEventKind,
    pub node_id: Option<String>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
