//! Loopback HTTP server routing interpreter callbacks.
//!
//! Two endpoints: `POST /llm_query` performs a single budget-charged
//! completion; `POST /rlm_query` instantiates a child controller sharing the
//! caller's context and budgets, or degrades to `/llm_query` at the depth
//! bound. The server runs on its own tokio runtime thread so the blocking
//! controller can keep driving the interpreter while callbacks are serviced
//! concurrently.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::calltree::{SharedState, SubCallKind};
use crate::config::EngineConfig;
use crate::controller::{CancelSignal, Engine};
use crate::interpreter::InterpreterSpawner;
use crate::model::{CompletionRequest, ModelClient};

/// Everything a callback handler needs.
pub struct RouterState {
    pub config: EngineConfig,
    pub depth: u32,
    pub context: Arc<String>,
    pub shared: Arc<SharedState>,
    pub model: Arc<dyn ModelClient>,
    pub spawner: Arc<dyn InterpreterSpawner>,
    pub cancel: CancelSignal,
}

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// Handle to the running loopback server; dropping it shuts the server down.
pub struct LoopbackServer {
    pub port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Drop for LoopbackServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Bind an ephemeral loopback port and serve the callback router on a
/// background runtime thread.
pub fn start_loopback(state: Arc<RouterState>) -> Result<LoopbackServer> {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").context("bind loopback listener")?;
    listener
        .set_nonblocking(true)
        .context("configure loopback listener")?;
    let port = listener.local_addr().context("loopback listener address")?.port();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("build loopback runtime")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let thread = thread::spawn(move || {
        runtime.block_on(async move {
            let listener = match tokio::net::TcpListener::from_std(listener) {
                Ok(listener) => listener,
                Err(err) => {
                    error!(%err, "loopback listener registration failed");
                    return;
                }
            };
            let app = Router::new()
                .route("/llm_query", post(handle_llm_query))
                .route("/rlm_query", post(handle_rlm_query))
                .with_state(state);
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = serve.await {
                error!(%err, "loopback server error");
            }
        });
    });

    debug!(port, "loopback server started");
    Ok(LoopbackServer {
        port,
        shutdown: Some(shutdown_tx),
        thread: Some(thread),
    })
}

async fn handle_llm_query(
    State(state): State<Arc<RouterState>>,
    Json(body): Json<QueryBody>,
) -> Json<Value> {
    Json(run_llm_query(state, body).await)
}

/// Single completion behind the shared budget. Returns `{result}` or
/// `{error}`; errors never carry an HTTP failure status so the interpreter
/// always gets a JSON body.
async fn run_llm_query(state: Arc<RouterState>, body: QueryBody) -> Value {
    if state.cancel.is_cancelled() {
        return json!({ "error": "query cancelled" });
    }
    if let Err(message) = state.shared.try_charge_llm_call() {
        return json!({ "error": message });
    }
    let call_id = state
        .shared
        .begin_call(SubCallKind::Llm, &body.prompt, body.model.clone());
    let started = Instant::now();

    let model = Arc::clone(&state.model);
    let request = CompletionRequest {
        model: body.model,
        system: None,
        prompt: body.prompt,
    };
    let joined = tokio::task::spawn_blocking(move || model.complete(&request)).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match joined {
        Ok(Ok(text)) => {
            state.shared.complete_call(call_id, duration_ms, Ok(&text));
            json!({ "result": text })
        }
        Ok(Err(err)) => {
            let message = format!("{err:#}");
            state.shared.complete_call(call_id, duration_ms, Err(&message));
            json!({ "error": message })
        }
        Err(join_err) => {
            let message = format!("completion task failed: {join_err}");
            state.shared.complete_call(call_id, duration_ms, Err(&message));
            json!({ "error": message })
        }
    }
}

async fn handle_rlm_query(
    State(state): State<Arc<RouterState>>,
    Json(body): Json<QueryBody>,
) -> Json<Value> {
    if state.depth >= state.config.max_depth {
        debug!(depth = state.depth, "rlm_query at depth bound, degrading to llm_query");
        return Json(run_llm_query(state, body).await);
    }

    let call_id = state
        .shared
        .begin_call(SubCallKind::Rlm, &body.prompt, body.model.clone());
    let started = Instant::now();

    let child = Engine::child(
        state.config.clone(),
        Arc::clone(&state.model),
        Arc::clone(&state.spawner),
        state.shared.clone(),
        state.depth + 1,
    );
    let prompt = body.prompt;
    let context = Arc::clone(&state.context);
    let cancel = state.cancel.clone();
    let joined =
        tokio::task::spawn_blocking(move || child.run_query(&prompt, &context, &cancel)).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let response = match joined {
        Ok(Ok(outcome)) => {
            state
                .shared
                .complete_call(call_id, duration_ms, Ok(&outcome.answer));
            json!({ "result": outcome.answer })
        }
        Ok(Err(err)) => {
            let message = format!("{err:#}");
            state.shared.complete_call(call_id, duration_ms, Err(&message));
            json!({ "error": message })
        }
        Err(join_err) => {
            let message = format!("child controller task failed: {join_err}");
            state.shared.complete_call(call_id, duration_ms, Err(&message));
            json!({ "error": message })
        }
    };
    Json(response)
}
