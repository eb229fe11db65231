//! Test-only scripted implementations of the model and interpreter seams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};

use crate::interpreter::{ExecOutcome, Interpreter, InterpreterSpawner, SpawnRequest};
use crate::model::{CompletionRequest, ModelClient};

/// Model returning canned responses in order; out-of-script calls return a
/// marker so tests can detect unexpected extra calls.
pub struct ScriptedModel {
    responses: Vec<String>,
    cursor: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(responses: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            responses: responses.into_iter().map(str::to_string).collect(),
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn calls_made(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

impl ModelClient for ScriptedModel {
    fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .responses
            .get(index)
            .cloned()
            .unwrap_or_else(|| "SCRIPT-EXHAUSTED".to_string()))
    }
}

/// One scripted execution outcome: in-band result or infra failure.
pub enum ScriptedExec {
    Ok(ExecOutcome),
    Err(String),
}

pub fn final_outcome(answer: &str) -> ScriptedExec {
    ScriptedExec::Ok(ExecOutcome {
        final_answer: Some(answer.to_string()),
        ..ExecOutcome::default()
    })
}

pub fn stdout_outcome(stdout: &str) -> ScriptedExec {
    ScriptedExec::Ok(ExecOutcome {
        stdout: stdout.to_string(),
        ..ExecOutcome::default()
    })
}

pub fn error_outcome(message: &str) -> ScriptedExec {
    ScriptedExec::Ok(ExecOutcome {
        stderr: format!("Traceback: {message}\n"),
        error: Some(message.to_string()),
        ..ExecOutcome::default()
    })
}

/// Spawner handing out interpreters that drain one shared outcome script.
pub struct ScriptedSpawner {
    outcomes: Arc<Mutex<VecDeque<ScriptedExec>>>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSpawner {
    pub fn new(outcomes: Vec<ScriptedExec>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Arc::new(Mutex::new(outcomes.into())),
            executed: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Every code string any spawned interpreter has executed, in order.
    pub fn executed_code(&self) -> Vec<String> {
        self.executed.lock().expect("lock").clone()
    }
}

struct ScriptedInterpreter {
    outcomes: Arc<Mutex<VecDeque<ScriptedExec>>>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl Interpreter for ScriptedInterpreter {
    fn execute(&mut self, code: &str) -> Result<ExecOutcome> {
        self.executed.lock().expect("lock").push(code.to_string());
        match self.outcomes.lock().expect("lock").pop_front() {
            Some(ScriptedExec::Ok(outcome)) => Ok(outcome),
            Some(ScriptedExec::Err(message)) => bail!(message),
            None => Ok(ExecOutcome::default()),
        }
    }
}

impl InterpreterSpawner for ScriptedSpawner {
    fn spawn(&self, _request: &SpawnRequest<'_>) -> Result<Box<dyn Interpreter>> {
        Ok(Box::new(ScriptedInterpreter {
            outcomes: Arc::clone(&self.outcomes),
            executed: Arc::clone(&self.executed),
        }))
    }
}
