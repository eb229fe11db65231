//! Deterministic leaf/split decision.
//!
//! The decision is a pure function of the node's depth and budgets, the run
//! configuration, the clock, and the collected scope metrics. Reasons
//! short-circuit in a fixed order so a node's persisted `decision_reason`
//! always names the first rule that fired.

use crate::core::types::{Decision, DecisionReason, NodeBudgets, NodeMetrics, RunConfig, RunMode};

/// Scope size thresholds above which a node is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitThresholds {
    pub max_files: u64,
    pub max_bytes: u64,
}

impl SplitThresholds {
    pub fn for_mode(mode: RunMode) -> Self {
        match mode {
            RunMode::Review => Self {
                max_files: 12,
                max_bytes: 2_000_000,
            },
            RunMode::Generic | RunMode::Wiki => Self {
                max_files: 16,
                max_bytes: 3_000_000,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionOutcome {
    pub decision: Decision,
    pub reason: DecisionReason,
    pub metrics: NodeMetrics,
}

/// Decide whether a node is analyzed in place or decomposed.
pub fn decide(
    config: &RunConfig,
    mode: RunMode,
    depth: u32,
    budgets: &NodeBudgets,
    now_epoch_ms: i64,
    file_count: u64,
    total_bytes: u64,
) -> DecisionOutcome {
    let metrics = NodeMetrics {
        file_count,
        total_bytes,
        duration_ms: None,
        findings_count: None,
    };
    let leaf = |reason| DecisionOutcome {
        decision: Decision::Leaf,
        reason,
        metrics: metrics.clone(),
    };

    if now_epoch_ms > budgets.deadline_epoch_ms {
        return leaf(DecisionReason::DeadlineExceeded);
    }
    if depth >= config.max_depth {
        return leaf(DecisionReason::MaxDepthReached);
    }
    if budgets.remaining_llm_calls <= 0 {
        return leaf(DecisionReason::LlmBudgetExhausted);
    }
    if budgets.remaining_tokens <= 0 {
        return leaf(DecisionReason::TokenBudgetExhausted);
    }

    let thresholds = SplitThresholds::for_mode(mode);
    if file_count > thresholds.max_files || total_bytes > thresholds.max_bytes {
        return DecisionOutcome {
            decision: Decision::Split,
            reason: DecisionReason::ScopeTooLarge,
            metrics,
        };
    }

    leaf(DecisionReason::ScopeSmallEnough)
}
