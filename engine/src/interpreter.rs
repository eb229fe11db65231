//! Interpreter host: a long-lived Python child holding the context and the
//! injected helper surface.
//!
//! Protocol: the child prints `__REPL_READY__` on startup; each request is
//! `JSON({code}) + "\n__REPL_EXEC__\n"` on stdin; each response ends with a
//! JSON block between `__REPL_RESULT_START__` and `__REPL_RESULT_END__`.
//! Helper bindings are restored by the driver after every execution, so user
//! code cannot poison later iterations.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use tempfile::TempDir;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

const DRIVER_TEMPLATE: &str = include_str!("driver.py");

const READY_SENTINEL: &str = "__REPL_READY__";
const RESULT_START: &str = "__REPL_RESULT_START__";
const RESULT_END: &str = "__REPL_RESULT_END__";
const EXEC_SENTINEL: &str = "__REPL_EXEC__";

const STDERR_TAIL_LINES: usize = 40;

/// One execution's outcome. `error` is set for in-band Python errors; infra
/// failures (timeout, dead child) surface as `Err` from `execute`.
#[derive(Debug, Clone, Default)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    /// From `FINAL` / `FINAL_VAR` / `SUBMIT`, whichever fired.
    pub final_answer: Option<String>,
    pub show_vars: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Abstraction over interpreter backends. Tests script this.
pub trait Interpreter: Send {
    fn execute(&mut self, code: &str) -> Result<ExecOutcome>;
}

/// Parameters for spawning one interpreter child.
#[derive(Debug)]
pub struct SpawnRequest<'a> {
    pub context_text: &'a str,
    /// Loopback port for `llm_query` / `rlm_query` callbacks.
    pub callback_port: u16,
    pub ready_timeout: Duration,
    pub exec_timeout: Duration,
}

/// Abstraction over interpreter process creation, so controllers (and the
/// sub-call router spawning child controllers) stay testable.
pub trait InterpreterSpawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest<'_>) -> Result<Box<dyn Interpreter>>;
}

/// Production spawner running `python3`.
#[derive(Debug, Clone)]
pub struct PythonSpawner {
    pub python: String,
}

impl Default for PythonSpawner {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
        }
    }
}

impl InterpreterSpawner for PythonSpawner {
    fn spawn(&self, request: &SpawnRequest<'_>) -> Result<Box<dyn Interpreter>> {
        Ok(Box::new(PythonInterpreter::spawn(&self.python, request)?))
    }
}

#[derive(Debug, Deserialize)]
struct ResultPayload {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    final_answer: Option<String>,
    final_var: Option<String>,
    submitted: Option<String>,
    error: Option<String>,
    show_vars: Option<serde_json::Value>,
}

/// A live Python child plus its staging directory.
pub struct PythonInterpreter {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    exec_timeout: Duration,
    dead: bool,
    _workdir: TempDir,
}

impl PythonInterpreter {
    fn spawn(python: &str, request: &SpawnRequest<'_>) -> Result<Self> {
        let workdir = tempfile::Builder::new()
            .prefix("rlm-repl-")
            .tempdir()
            .context("create interpreter workdir")?;

        let context_path = workdir.path().join("context.txt");
        std::fs::write(&context_path, request.context_text)
            .with_context(|| format!("write context {}", context_path.display()))?;

        let driver_path = workdir.path().join("driver.py");
        let driver = DRIVER_TEMPLATE
            .replace(
                "__RLM_CONTEXT_PATH__",
                &serde_json::to_string(&context_path.to_string_lossy())?,
            )
            .replace("__RLM_PORT__", &request.callback_port.to_string());
        std::fs::write(&driver_path, driver)
            .with_context(|| format!("write driver {}", driver_path.display()))?;

        let mut child = Command::new(python)
            .arg(&driver_path)
            .current_dir(workdir.path())
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn interpreter '{python}'"))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("interpreter stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("interpreter stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("interpreter stderr was not piped"))?;

        let (tx, lines) = channel();
        thread::spawn(move || forward_lines(stdout, tx));

        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));
        let tail = Arc::clone(&stderr_tail);
        thread::spawn(move || collect_stderr(stderr, tail));

        let mut interpreter = Self {
            child,
            stdin,
            lines,
            stderr_tail,
            exec_timeout: request.exec_timeout,
            dead: false,
            _workdir: workdir,
        };
        interpreter.await_ready(request.ready_timeout)?;
        Ok(interpreter)
    }

    fn await_ready(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.teardown();
                bail!("interpreter did not signal ready within {timeout:?}");
            }
            match self.lines.recv_timeout(remaining) {
                Ok(line) if line.contains(READY_SENTINEL) => {
                    debug!("interpreter ready");
                    return Ok(());
                }
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => {
                    self.teardown();
                    bail!("interpreter did not signal ready within {timeout:?}");
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.teardown();
                    bail!(
                        "interpreter exited before signalling ready: {}",
                        self.stderr_excerpt()
                    );
                }
            }
        }
    }

    fn stderr_excerpt(&self) -> String {
        let tail = self
            .stderr_tail
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tail.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    fn teardown(&mut self) {
        if self.dead {
            return;
        }
        self.dead = true;
        if self.child.kill().is_ok() {
            match self.child.wait_timeout(Duration::from_secs(2)) {
                Ok(Some(_)) => {}
                _ => {
                    warn!("interpreter child did not exit after kill");
                    let _ = self.child.wait();
                }
            }
        }
    }
}

impl Interpreter for PythonInterpreter {
    fn execute(&mut self, code: &str) -> Result<ExecOutcome> {
        if self.dead {
            bail!("interpreter process is not running");
        }

        let request = format!(
            "{}\n{EXEC_SENTINEL}\n",
            serde_json::json!({ "code": code })
        );
        if let Err(err) = self.stdin.write_all(request.as_bytes()).and_then(|_| self.stdin.flush()) {
            self.teardown();
            bail!("interpreter stdin closed: {err}");
        }

        let deadline = Instant::now() + self.exec_timeout;
        let mut collected: Vec<String> = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.teardown();
                bail!("execution timed out after {:?}", self.exec_timeout);
            }
            match self.lines.recv_timeout(remaining) {
                Ok(line) => {
                    // Substring match: user stdout without a trailing newline
                    // glues onto the marker line.
                    let done = line.contains(RESULT_END);
                    collected.push(line);
                    if done {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.teardown();
                    bail!("execution timed out after {:?}", self.exec_timeout);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.teardown();
                    bail!(
                        "interpreter exited during execution: {}",
                        self.stderr_excerpt()
                    );
                }
            }
        }

        parse_result_block(&collected)
    }
}

impl Drop for PythonInterpreter {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Extract and decode the JSON payload between the result markers. Stream
/// lines before the markers are duplicates of the payload's `stdout` and are
/// ignored.
fn parse_result_block(lines: &[String]) -> Result<ExecOutcome> {
    let start = lines
        .iter()
        .rposition(|l| l.contains(RESULT_START))
        .ok_or_else(|| anyhow!("interpreter response missing result block"))?;
    let end = lines[start..]
        .iter()
        .position(|l| l.contains(RESULT_END))
        .map(|offset| start + offset)
        .ok_or_else(|| anyhow!("interpreter response missing result terminator"))?;
    let payload_text = lines[start + 1..end].join("\n");
    let payload: ResultPayload = serde_json::from_str(payload_text.trim())
        .with_context(|| "parse interpreter result payload")?;

    Ok(ExecOutcome {
        stdout: payload.stdout,
        stderr: payload.stderr,
        final_answer: payload
            .final_answer
            .or(payload.final_var)
            .or(payload.submitted),
        show_vars: payload.show_vars.filter(|v| !v.is_null()),
        error: payload.error,
    })
}

fn forward_lines(stdout: std::process::ChildStdout, tx: Sender<String>) {
    let reader = BufReader::new(stdout);
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if tx.send(line).is_err() {
                    return;
                }
            }
            Err(_) => return,
        }
    }
}

fn collect_stderr(stderr: std::process::ChildStderr, tail: Arc<Mutex<VecDeque<String>>>) {
    let reader = BufReader::new(stderr);
    for line in reader.lines().map_while(|l| l.ok()) {
        let mut tail = tail.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if tail.len() >= STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_block_parsing_prefers_the_last_start_marker() {
        let lines = vec![
            "user output".to_string(),
            RESULT_START.to_string(),
            r#"{"stdout": "user output\n", "stderr": "", "final_answer": null, "final_var": null, "submitted": null, "error": null, "show_vars": null}"#.to_string(),
            RESULT_END.to_string(),
        ];
        let outcome = parse_result_block(&lines).expect("parse");
        assert_eq!(outcome.stdout, "user output\n");
        assert!(outcome.final_answer.is_none());
        assert!(outcome.show_vars.is_none());
    }

    #[test]
    fn final_var_and_submit_feed_the_final_answer() {
        let lines = vec![
            RESULT_START.to_string(),
            r#"{"stdout": "", "stderr": "", "final_answer": null, "final_var": "from var", "submitted": null, "error": null, "show_vars": null}"#.to_string(),
            RESULT_END.to_string(),
        ];
        let outcome = parse_result_block(&lines).expect("parse");
        assert_eq!(outcome.final_answer.as_deref(), Some("from var"));
    }

    #[test]
    fn missing_markers_are_an_error() {
        let lines = vec!["just noise".to_string()];
        assert!(parse_result_block(&lines).is_err());
    }
}
