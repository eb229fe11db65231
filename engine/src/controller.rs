//! Per-query controller: the bounded iteration loop between the root model
//! and the interpreter.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument, warn};

use crate::calltree::SharedState;
use crate::config::EngineConfig;
use crate::interpreter::{ExecOutcome, InterpreterSpawner, SpawnRequest};
use crate::model::{CompletionRequest, ModelClient};
use crate::parse::parse_response;
use crate::prompt::{SYSTEM_PROMPT, build_fallback_prompt, build_iteration_prompt};
use crate::server::{RouterState, start_loopback};
use crate::trajectory::{EngineOutcome, TrajectoryStep};

/// External cancellation signal, checked at the top of every iteration and
/// before the fallback call. Cloneable; all clones observe one flag.
#[derive(Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Resolve the `context` tool argument: raw text, or `file:` followed by an
/// absolute path read as UTF-8.
pub fn resolve_context(raw: &str) -> Result<String> {
    match raw.strip_prefix("file:") {
        Some(path) => fs::read_to_string(path).with_context(|| format!("read context file {path}")),
        None => Ok(raw.to_string()),
    }
}

/// A controller at one depth of the engine tree. The root owns the shared
/// state; children hold a reference to the root's.
pub struct Engine {
    config: EngineConfig,
    depth: u32,
    model: Arc<dyn ModelClient>,
    spawner: Arc<dyn InterpreterSpawner>,
    shared: Option<Arc<SharedState>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        model: Arc<dyn ModelClient>,
        spawner: Arc<dyn InterpreterSpawner>,
    ) -> Self {
        Self {
            config,
            depth: 0,
            model,
            spawner,
            shared: None,
        }
    }

    /// Child controller sharing the parent's budgets and call tree.
    pub(crate) fn child(
        config: EngineConfig,
        model: Arc<dyn ModelClient>,
        spawner: Arc<dyn InterpreterSpawner>,
        shared: Arc<SharedState>,
        depth: u32,
    ) -> Self {
        Self {
            config,
            depth,
            model,
            spawner,
            shared: Some(shared),
        }
    }

    /// Run the iteration loop until the model signals a final answer or the
    /// budgets are exhausted.
    #[instrument(skip_all, fields(depth = self.depth))]
    pub fn run_query(
        &self,
        query: &str,
        context_text: &str,
        cancel: &CancelSignal,
    ) -> Result<EngineOutcome> {
        let shared = self
            .shared
            .clone()
            .unwrap_or_else(|| SharedState::new(query, self.config.max_llm_calls));
        shared.record_depth(self.depth);

        let state = Arc::new(RouterState {
            config: self.config.clone(),
            depth: self.depth,
            context: Arc::new(context_text.to_string()),
            shared: Arc::clone(&shared),
            model: Arc::clone(&self.model),
            spawner: Arc::clone(&self.spawner),
            cancel: cancel.clone(),
        });
        let server = start_loopback(state)?;
        let mut interpreter = self.spawner.spawn(&SpawnRequest {
            context_text,
            callback_port: server.port,
            ready_timeout: self.config.ready_timeout,
            exec_timeout: self.config.exec_timeout,
        })?;

        let mut trajectory: Vec<TrajectoryStep> = Vec::new();
        let mut consecutive_errors = 0u32;

        for iteration in 1..=self.config.max_iterations {
            if cancel.is_cancelled() {
                bail!("query cancelled");
            }
            shared.record_iteration();

            let prompt = build_iteration_prompt(query, context_text, &trajectory, iteration);
            let response = self.model.complete(&CompletionRequest {
                model: None,
                system: Some(SYSTEM_PROMPT.to_string()),
                prompt,
            })?;
            let parsed = parse_response(&response);

            if parsed.code.is_empty() {
                debug!(iteration, "response carried no code block");
                trajectory.push(TrajectoryStep {
                    iteration,
                    depth: self.depth,
                    reasoning: parsed.reasoning,
                    code: String::new(),
                    output: "No code block found in response.".to_string(),
                    sub_calls: None,
                });
                continue;
            }

            let calls_before = shared.completed_count();
            match interpreter.execute(&parsed.code) {
                Ok(outcome) => {
                    let sub_calls = shared.completed_since(calls_before);
                    let sub_calls = (!sub_calls.is_empty()).then_some(sub_calls);
                    if let Some(answer) = outcome.final_answer.clone() {
                        trajectory.push(TrajectoryStep {
                            iteration,
                            depth: self.depth,
                            reasoning: parsed.reasoning,
                            code: parsed.code,
                            output: format_step_output(&outcome, self.config.max_output_chars),
                            sub_calls,
                        });
                        info!(iteration, "final answer surfaced");
                        return Ok(EngineOutcome {
                            answer,
                            trajectory,
                            call_tree: shared.snapshot(),
                        });
                    }

                    let is_error = outcome.error.is_some();
                    trajectory.push(TrajectoryStep {
                        iteration,
                        depth: self.depth,
                        reasoning: parsed.reasoning,
                        code: parsed.code,
                        output: format_step_output(&outcome, self.config.max_output_chars),
                        sub_calls,
                    });
                    if is_error {
                        consecutive_errors += 1;
                    } else {
                        consecutive_errors = 0;
                    }
                }
                Err(err) => {
                    warn!(iteration, %err, "interpreter execution failed");
                    trajectory.push(TrajectoryStep {
                        iteration,
                        depth: self.depth,
                        reasoning: parsed.reasoning,
                        code: parsed.code,
                        output: truncate_output(
                            &format!("[stderr] {err:#}"),
                            self.config.max_output_chars,
                        ),
                        sub_calls: None,
                    });
                    consecutive_errors += 1;
                }
            }

            if consecutive_errors >= self.config.max_errors {
                warn!(consecutive_errors, "aborting after consecutive errors");
                break;
            }
        }

        if cancel.is_cancelled() {
            bail!("query cancelled");
        }
        debug!("falling back to trajectory summarization");
        let answer = self.model.complete(&CompletionRequest {
            model: None,
            system: Some(SYSTEM_PROMPT.to_string()),
            prompt: build_fallback_prompt(query, &trajectory),
        })?;
        Ok(EngineOutcome {
            answer,
            trajectory,
            call_tree: shared.snapshot(),
        })
    }
}

/// Render one execution's feedback for the next prompt: stdout, then an
/// optional variable dump, then stderr with a `[stderr]` prefix, bounded by
/// `max_chars` with a truncation note.
fn format_step_output(outcome: &ExecOutcome, max_chars: usize) -> String {
    let mut output = outcome.stdout.clone();
    if let Some(vars) = &outcome.show_vars {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&format!("[vars] {vars}"));
    }
    if !outcome.stderr.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&format!("[stderr] {}", outcome.stderr.trim_end()));
    }
    if output.is_empty() {
        output.push_str("(no output)");
    }
    truncate_output(&output, max_chars)
}

fn truncate_output(output: &str, max_chars: usize) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_string();
    }
    let kept: String = output.chars().take(max_chars).collect();
    format!("{kept}\n[output truncated, {} chars dropped]", total - max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_context_passes_raw_text_through() {
        let resolved = resolve_context("plain context").expect("resolve");
        assert_eq!(resolved, "plain context");
    }

    #[test]
    fn resolve_context_reads_file_prefix() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ctx.txt");
        fs::write(&path, "from disk").expect("write");
        let resolved = resolve_context(&format!("file:{}", path.display())).expect("resolve");
        assert_eq!(resolved, "from disk");
    }

    #[test]
    fn resolve_context_errors_on_missing_file() {
        assert!(resolve_context("file:/definitely/not/here.txt").is_err());
    }

    #[test]
    fn step_output_combines_streams_with_stderr_prefix() {
        let outcome = ExecOutcome {
            stdout: "value: 3\n".to_string(),
            stderr: "warning: deprecated\n".to_string(),
            final_answer: None,
            show_vars: None,
            error: None,
        };
        let output = format_step_output(&outcome, 10_000);
        assert_eq!(output, "value: 3\n[stderr] warning: deprecated");
    }

    #[test]
    fn step_output_is_truncated_with_a_note() {
        let outcome = ExecOutcome {
            stdout: "x".repeat(50),
            ..ExecOutcome::default()
        };
        let output = format_step_output(&outcome, 10);
        assert!(output.starts_with(&"x".repeat(10)));
        assert!(output.contains("[output truncated, 40 chars dropped]"));
    }

    #[test]
    fn cancel_signal_is_shared_across_clones() {
        let signal = CancelSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_cancelled());
        signal.cancel();
        assert!(clone.is_cancelled());
    }
}
