//! Live call tree and shared budgets for an engine tree.
//!
//! The root controller owns one [`SharedState`]; child controllers hold a
//! reference. The llm-call counter is atomic, the call tree sits behind a
//! mutex, and observers are invoked outside the lock so a slow observer
//! never blocks the controller.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

const PROMPT_PREVIEW_CHARS: usize = 200;
const RESULT_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubCallKind {
    Llm,
    Rlm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubCallStatus {
    Running,
    Completed,
    Failed,
}

/// One model or child-controller invocation initiated by interpreter code.
#[derive(Debug, Clone, Serialize)]
pub struct SubCall {
    pub id: u64,
    pub kind: SubCallKind,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub status: SubCallStatus,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot of the engine tree's activity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallTree {
    pub root_query: String,
    pub iterations: u32,
    pub total_llm_calls: u32,
    pub total_rlm_calls: u32,
    pub max_depth: u32,
    pub active_calls: Vec<SubCall>,
    pub completed_calls: Vec<SubCall>,
}

/// Observer of sub-call lifecycle events. Must return promptly; panics are
/// caught and logged.
pub trait CallObserver: Send {
    fn on_sub_call_start(&self, call: &SubCall);
    fn on_sub_call_complete(&self, call: &SubCall);
}

/// Budget counters and the live call tree, shared across an engine tree.
pub struct SharedState {
    max_llm_calls: u32,
    llm_calls_used: AtomicU32,
    next_call_id: AtomicU64,
    tree: Mutex<CallTree>,
    observers: Mutex<Vec<Box<dyn CallObserver>>>,
}

impl SharedState {
    pub fn new(root_query: &str, max_llm_calls: u32) -> Arc<Self> {
        Arc::new(Self {
            max_llm_calls,
            llm_calls_used: AtomicU32::new(0),
            next_call_id: AtomicU64::new(1),
            tree: Mutex::new(CallTree {
                root_query: root_query.to_string(),
                ..CallTree::default()
            }),
            observers: Mutex::new(Vec::new()),
        })
    }

    pub fn add_observer(&self, observer: Box<dyn CallObserver>) {
        self.lock_observers().push(observer);
    }

    /// Atomically charge one llm call against the shared budget.
    pub fn try_charge_llm_call(&self) -> Result<(), String> {
        let charged = self
            .llm_calls_used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.max_llm_calls).then_some(used + 1)
            });
        match charged {
            Ok(_) => Ok(()),
            Err(_) => Err(format!(
                "LLM call budget exhausted ({} calls)",
                self.max_llm_calls
            )),
        }
    }

    pub fn llm_calls_used(&self) -> u32 {
        self.llm_calls_used.load(Ordering::SeqCst)
    }

    pub fn record_iteration(&self) {
        self.lock_tree().iterations += 1;
    }

    pub fn record_depth(&self, depth: u32) {
        let mut tree = self.lock_tree();
        tree.max_depth = tree.max_depth.max(depth);
    }

    /// Register a sub-call as active and notify observers.
    pub fn begin_call(&self, kind: SubCallKind, prompt: &str, model: Option<String>) -> u64 {
        let call = SubCall {
            id: self.next_call_id.fetch_add(1, Ordering::SeqCst),
            kind,
            prompt: truncate(prompt, PROMPT_PREVIEW_CHARS),
            model,
            status: SubCallStatus::Running,
            started_at: Utc::now().to_rfc3339(),
            duration_ms: None,
            result: None,
            error: None,
        };
        let id = call.id;
        {
            let mut tree = self.lock_tree();
            match kind {
                SubCallKind::Llm => tree.total_llm_calls += 1,
                SubCallKind::Rlm => tree.total_rlm_calls += 1,
            }
            tree.active_calls.push(call.clone());
        }
        self.notify(|observer| observer.on_sub_call_start(&call));
        id
    }

    /// Move an active sub-call to completed and notify observers.
    pub fn complete_call(&self, id: u64, duration_ms: u64, outcome: Result<&str, &str>) {
        let finished = {
            let mut tree = self.lock_tree();
            let Some(position) = tree.active_calls.iter().position(|c| c.id == id) else {
                return;
            };
            let mut call = tree.active_calls.remove(position);
            call.duration_ms = Some(duration_ms);
            match outcome {
                Ok(result) => {
                    call.status = SubCallStatus::Completed;
                    call.result = Some(truncate(result, RESULT_PREVIEW_CHARS));
                }
                Err(error) => {
                    call.status = SubCallStatus::Failed;
                    call.error = Some(error.to_string());
                }
            }
            tree.completed_calls.push(call.clone());
            call
        };
        self.notify(|observer| observer.on_sub_call_complete(&finished));
    }

    /// Completed sub-calls past `offset`, for per-step attribution.
    pub fn completed_since(&self, offset: usize) -> Vec<SubCall> {
        self.lock_tree()
            .completed_calls
            .get(offset..)
            .map(|s| s.to_vec())
            .unwrap_or_default()
    }

    pub fn completed_count(&self) -> usize {
        self.lock_tree().completed_calls.len()
    }

    pub fn snapshot(&self) -> CallTree {
        self.lock_tree().clone()
    }

    fn notify(&self, call: impl Fn(&dyn CallObserver)) {
        let observers = self.lock_observers();
        for observer in observers.iter() {
            if let Err(panic) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| call(observer.as_ref())))
            {
                warn!(?panic, "call observer panicked");
            }
        }
    }

    fn lock_tree(&self) -> std::sync::MutexGuard<'_, CallTree> {
        self.tree.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_observers(&self) -> std::sync::MutexGuard<'_, Vec<Box<dyn CallObserver>>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The shared budget admits exactly `max_llm_calls` charges, including
    /// under contention from multiple threads.
    #[test]
    fn budget_is_shared_and_exact() {
        let shared = SharedState::new("q", 10);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let shared = Arc::clone(&shared);
            handles.push(std::thread::spawn(move || {
                let mut granted = 0;
                for _ in 0..10 {
                    if shared.try_charge_llm_call().is_ok() {
                        granted += 1;
                    }
                }
                granted
            }));
        }
        let total: u32 = handles.into_iter().map(|h| h.join().expect("join")).sum();
        assert_eq!(total, 10);
        assert_eq!(shared.llm_calls_used(), 10);
        assert!(shared.try_charge_llm_call().is_err());
    }

    #[test]
    fn calls_move_from_active_to_completed() {
        let shared = SharedState::new("q", 10);
        let id = shared.begin_call(SubCallKind::Llm, "what is up", None);
        {
            let tree = shared.snapshot();
            assert_eq!(tree.active_calls.len(), 1);
            assert_eq!(tree.total_llm_calls, 1);
        }
        shared.complete_call(id, 12, Ok("fine"));
        let tree = shared.snapshot();
        assert!(tree.active_calls.is_empty());
        assert_eq!(tree.completed_calls.len(), 1);
        assert_eq!(tree.completed_calls[0].status, SubCallStatus::Completed);
        assert_eq!(tree.completed_calls[0].duration_ms, Some(12));
    }

    #[test]
    fn prompt_previews_are_bounded() {
        let shared = SharedState::new("q", 10);
        let long = "x".repeat(500);
        shared.begin_call(SubCallKind::Rlm, &long, None);
        let tree = shared.snapshot();
        assert_eq!(tree.active_calls[0].prompt.len(), 200);
        assert_eq!(tree.total_rlm_calls, 1);
    }

    #[test]
    fn a_panicking_observer_does_not_block_progress() {
        struct Panicker;
        impl CallObserver for Panicker {
            fn on_sub_call_start(&self, _call: &SubCall) {
                panic!("observer bug");
            }
            fn on_sub_call_complete(&self, _call: &SubCall) {}
        }
        let shared = SharedState::new("q", 10);
        shared.add_observer(Box::new(Panicker));
        let id = shared.begin_call(SubCallKind::Llm, "p", None);
        shared.complete_call(id, 1, Ok("r"));
        assert_eq!(shared.completed_count(), 1);
    }
}
