//! Interactive recursive language model engine.
//!
//! A controller drives a root model against a persistent code interpreter
//! holding the full context; interpreter code calls back over a loopback
//! HTTP server for sub-model completions and recursively spawned child
//! controllers, all sharing one budget and call tree.

pub mod calltree;
pub mod config;
pub mod controller;
pub mod interpreter;
pub mod model;
pub mod parse;
pub mod prompt;
pub mod server;
pub mod test_support;
pub mod trajectory;

pub use calltree::{CallObserver, CallTree, SharedState, SubCall, SubCallKind, SubCallStatus};
pub use config::EngineConfig;
pub use controller::{CancelSignal, Engine, resolve_context};
pub use interpreter::{
    ExecOutcome, Interpreter, InterpreterSpawner, PythonSpawner, SpawnRequest,
};
pub use model::{
    CompletionRequest, EnvKeyRegistry, HttpModelClient, KeyRegistry, ModelClient,
};
pub use trajectory::{EngineOutcome, TrajectoryStep};
