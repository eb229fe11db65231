//! Loopback router tests: budget enforcement, depth degradation, and child
//! controller spawning over real HTTP.

use std::sync::Arc;

use rlm_engine::server::{RouterState, start_loopback};
use rlm_engine::test_support::{ScriptedModel, ScriptedSpawner, final_outcome};
use rlm_engine::{CancelSignal, EngineConfig, SharedState};

fn post(port: u16, endpoint: &str, prompt: &str) -> serde_json::Value {
    let client = reqwest::blocking::Client::new();
    client
        .post(format!("http://127.0.0.1:{port}/{endpoint}"))
        .json(&serde_json::json!({ "prompt": prompt }))
        .send()
        .expect("send request")
        .json()
        .expect("parse response")
}

fn state(
    config: EngineConfig,
    depth: u32,
    shared: Arc<SharedState>,
    model: Arc<ScriptedModel>,
    spawner: Arc<ScriptedSpawner>,
) -> Arc<RouterState> {
    Arc::new(RouterState {
        config,
        depth,
        context: Arc::new("the shared context".to_string()),
        shared,
        model,
        spawner,
        cancel: CancelSignal::new(),
    })
}

/// `/llm_query` charges the shared budget and rejects calls past it with an
/// error body rather than an HTTP failure.
#[test]
fn llm_query_enforces_the_shared_budget() {
    let shared = SharedState::new("q", 2);
    let model = ScriptedModel::new(vec!["first answer", "second answer"]);
    let spawner = ScriptedSpawner::new(vec![]);
    let server = start_loopback(state(
        EngineConfig::default(),
        0,
        Arc::clone(&shared),
        model,
        spawner,
    ))
    .expect("server");

    let first = post(server.port, "llm_query", "one");
    assert_eq!(first["result"], "first answer");
    let second = post(server.port, "llm_query", "two");
    assert_eq!(second["result"], "second answer");

    let third = post(server.port, "llm_query", "three");
    let error = third["error"].as_str().expect("error body");
    assert!(error.contains("budget exhausted"));

    assert_eq!(shared.llm_calls_used(), 2);
    let tree = shared.snapshot();
    assert_eq!(tree.total_llm_calls, 2);
    assert_eq!(tree.completed_calls.len(), 2);
    assert!(tree.active_calls.is_empty());
}

/// A cancelled run short-circuits `/llm_query` before any budget charge or
/// completion call reaches the model.
#[test]
fn llm_query_honors_the_cancellation_signal() {
    let shared = SharedState::new("q", 10);
    let model = ScriptedModel::new(vec!["never returned"]);
    let spawner = ScriptedSpawner::new(vec![]);
    let cancel = CancelSignal::new();
    cancel.cancel();
    let server = start_loopback(Arc::new(RouterState {
        config: EngineConfig::default(),
        depth: 0,
        context: Arc::new("the shared context".to_string()),
        shared: Arc::clone(&shared),
        model: model.clone(),
        spawner,
        cancel,
    }))
    .expect("server");

    let reply = post(server.port, "llm_query", "one");
    let error = reply["error"].as_str().expect("error body");
    assert!(error.contains("cancelled"));

    assert_eq!(shared.llm_calls_used(), 0);
    assert_eq!(model.calls_made(), 0);
    let tree = shared.snapshot();
    assert_eq!(tree.total_llm_calls, 0);
    assert!(tree.completed_calls.is_empty());
}

/// At the depth bound `/rlm_query` degrades to a single `llm_query`: it
/// charges the budget and spawns no child controller.
#[test]
fn rlm_query_degrades_at_the_depth_bound() {
    let shared = SharedState::new("q", 10);
    let model = ScriptedModel::new(vec!["degraded answer"]);
    let spawner = ScriptedSpawner::new(vec![]);
    let config = EngineConfig {
        max_depth: 1,
        ..EngineConfig::default()
    };
    let server = start_loopback(state(
        config,
        1,
        Arc::clone(&shared),
        model,
        Arc::clone(&spawner),
    ))
    .expect("server");

    let reply = post(server.port, "rlm_query", "go deeper");
    assert_eq!(reply["result"], "degraded answer");

    let tree = shared.snapshot();
    assert_eq!(tree.total_llm_calls, 1);
    assert_eq!(tree.total_rlm_calls, 0);
    assert!(spawner.executed_code().is_empty());
    assert_eq!(shared.llm_calls_used(), 1);
}

/// Below the bound `/rlm_query` runs a full child controller that shares the
/// call tree; its answer comes back as the result.
#[test]
fn rlm_query_spawns_a_child_controller() {
    let shared = SharedState::new("root question", 10);
    // The child controller's single iteration emits FINAL via the scripted
    // interpreter.
    let model = ScriptedModel::new(vec!["```python\nFINAL('child conclusion')\n```"]);
    let spawner = ScriptedSpawner::new(vec![final_outcome("child conclusion")]);
    let config = EngineConfig {
        max_depth: 1,
        ..EngineConfig::default()
    };
    let server = start_loopback(state(
        config,
        0,
        Arc::clone(&shared),
        model,
        Arc::clone(&spawner),
    ))
    .expect("server");

    let reply = post(server.port, "rlm_query", "dig into the details");
    assert_eq!(reply["result"], "child conclusion");

    let tree = shared.snapshot();
    assert_eq!(tree.total_rlm_calls, 1);
    assert_eq!(tree.max_depth, 1);
    assert_eq!(tree.completed_calls.len(), 1);
    // The child actually executed code through its own interpreter.
    assert_eq!(spawner.executed_code().len(), 1);
    // Child root-model iterations are not charged to the sub-call budget.
    assert_eq!(shared.llm_calls_used(), 0);
}
