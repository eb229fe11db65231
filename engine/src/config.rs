//! Engine configuration.

use std::time::Duration;

/// Bounds for one interactive query and every child controller it spawns.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum controller iterations before the fallback summarization call.
    pub max_iterations: u32,
    /// Shared sub-call budget across the whole engine tree.
    pub max_llm_calls: u32,
    /// Truncation bound for recorded step output.
    pub max_output_chars: usize,
    /// Recursion bound: at `depth >= max_depth`, `rlm_query` degrades to
    /// `llm_query`.
    pub max_depth: u32,
    /// Consecutive failed executions tolerated before aborting the loop.
    pub max_errors: u32,
    /// Per-execute interpreter timeout.
    pub exec_timeout: Duration,
    /// Interpreter startup timeout (await of the ready sentinel).
    pub ready_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_llm_calls: 50,
            max_output_chars: 10_000,
            max_depth: 1,
            max_errors: 3,
            exec_timeout: Duration::from_secs(120),
            ready_timeout: Duration::from_secs(30),
        }
    }
}
