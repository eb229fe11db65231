//! Tool surface consumed by the external agent host.
//!
//! Thin facade over the store, scheduler, and synthesis modules: each tool
//! takes explicit parameters with the documented defaults and returns a
//! serializable report.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::core::types::{ArtifactRef, Domain, Run, RunConfig, RunMode, SchedulerKind};
use crate::io::store::RunStore;
use crate::scheduler::{self, StepReport};
use crate::start::{StartParams, start_run};
use crate::status::{StatusReport, run_status};
use crate::synthesis::export::{ExportFormat, export_run};
use crate::synthesis::{SynthesisTarget, synthesize_run};

/// Optional overrides for `repo_rlm_start`; unset fields use the documented
/// defaults (mode=generic, max_depth=4, max_llm_calls=300,
/// max_tokens=500000, max_wall_clock_ms=1800000, scheduler=bfs).
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub mode: Option<RunMode>,
    pub domain: Option<Domain>,
    pub max_depth: Option<u32>,
    pub max_llm_calls: Option<i64>,
    pub max_tokens: Option<i64>,
    pub max_wall_clock_ms: Option<i64>,
    pub scheduler: Option<SchedulerKind>,
}

/// The repo-scale tool set, bound to one store.
#[derive(Debug, Clone)]
pub struct RepoTools {
    store: RunStore,
}

impl RepoTools {
    pub fn new(store: RunStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// `repo_rlm_start`
    pub fn start(
        &self,
        objective: &str,
        root_scope_paths: Vec<PathBuf>,
        options: &StartOptions,
    ) -> Result<Run> {
        let defaults = RunConfig::default();
        let params = StartParams {
            objective: objective.to_string(),
            mode: options.mode.unwrap_or(RunMode::Generic),
            domain: options.domain,
            config: RunConfig {
                max_depth: options.max_depth.unwrap_or(defaults.max_depth),
                max_llm_calls: options.max_llm_calls.unwrap_or(defaults.max_llm_calls),
                max_tokens: options.max_tokens.unwrap_or(defaults.max_tokens),
                max_wall_clock_ms: options
                    .max_wall_clock_ms
                    .unwrap_or(defaults.max_wall_clock_ms),
                scheduler: options.scheduler.unwrap_or(defaults.scheduler),
            },
            root_scope_paths,
        };
        start_run(&self.store, &params)
    }

    /// `repo_rlm_step` (default max_nodes=1)
    pub fn step(&self, run_id: &str, max_nodes: Option<u32>) -> Result<StepReport> {
        scheduler::execute_step(&self.store, run_id, max_nodes.unwrap_or(1))
    }

    /// `repo_rlm_run` (default max_nodes=200)
    pub fn run(&self, run_id: &str, max_nodes: Option<u32>) -> Result<StepReport> {
        scheduler::run_until(&self.store, run_id, max_nodes.unwrap_or(200))
    }

    /// `repo_rlm_status`
    pub fn status(&self, run_id: &str) -> Result<StatusReport> {
        run_status(&self.store, run_id)
    }

    /// `repo_rlm_cancel`
    pub fn cancel(&self, run_id: &str) -> Result<Run> {
        scheduler::cancel_run(&self.store, run_id)
    }

    /// `repo_rlm_resume`
    pub fn resume(&self, run_id: &str) -> Result<Run> {
        scheduler::resume_run(&self.store, run_id)
    }

    /// `repo_rlm_synthesize` (default target=auto)
    pub fn synthesize(
        &self,
        run_id: &str,
        target: Option<SynthesisTarget>,
    ) -> Result<crate::synthesis::SynthesisOutcome> {
        synthesize_run(&self.store, run_id, target.unwrap_or(SynthesisTarget::Auto))
    }

    /// `repo_rlm_export`
    pub fn export(&self, run_id: &str, format: ExportFormat) -> Result<ArtifactRef> {
        export_run(&self.store, run_id, format)
    }
}

/// Options for the interactive `rlm` tool.
#[derive(Debug, Clone, Default)]
pub struct RlmOptions {
    pub max_iterations: Option<u32>,
    pub max_llm_calls: Option<u32>,
    pub max_depth: Option<u32>,
}

/// Interactive `rlm(query, context, ...)`: context is either a raw string or
/// `file:` followed by an absolute path read as UTF-8.
pub fn rlm(
    query: &str,
    context: &str,
    options: &RlmOptions,
    model: Arc<dyn rlm_engine::ModelClient>,
    spawner: Arc<dyn rlm_engine::InterpreterSpawner>,
) -> Result<rlm_engine::EngineOutcome> {
    let resolved = rlm_engine::resolve_context(context)?;
    let defaults = rlm_engine::EngineConfig::default();
    let config = rlm_engine::EngineConfig {
        max_iterations: options.max_iterations.unwrap_or(defaults.max_iterations),
        max_llm_calls: options.max_llm_calls.unwrap_or(defaults.max_llm_calls),
        max_depth: options.max_depth.unwrap_or(defaults.max_depth),
        ..defaults
    };
    let engine = rlm_engine::Engine::new(config, model, spawner);
    engine.run_query(query, &resolved, &rlm_engine::CancelSignal::new())
}
