//! Round-trip tests against a real `python3` driver process.
//!
//! Skipped (with a notice) when `python3` is not on PATH.

use std::process::Command;
use std::time::Duration;

use rlm_engine::{Interpreter, InterpreterSpawner, PythonSpawner, SpawnRequest};

fn python_available() -> bool {
    Command::new("python3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn spawn(context: &str) -> Box<dyn Interpreter> {
    // Port 1 is never contacted: these tests make no llm/rlm calls.
    PythonSpawner::default()
        .spawn(&SpawnRequest {
            context_text: context,
            callback_port: 1,
            ready_timeout: Duration::from_secs(30),
            exec_timeout: Duration::from_secs(30),
        })
        .expect("spawn interpreter")
}

macro_rules! require_python {
    () => {
        if !python_available() {
            eprintln!("skipping: python3 not available");
            return;
        }
    };
}

#[test]
fn executes_code_and_reads_the_context() {
    require_python!();
    let mut repl = spawn("needle-42 in a small haystack");

    let outcome = repl.execute("print(2 + 2)").expect("execute");
    assert_eq!(outcome.stdout.trim(), "4");
    assert!(outcome.error.is_none());

    let outcome = repl.execute("print('needle-42' in context)").expect("execute");
    assert_eq!(outcome.stdout.trim(), "True");
}

#[test]
fn namespace_persists_across_executions_and_errors() {
    require_python!();
    let mut repl = spawn("ctx");

    repl.execute("my_var = 21").expect("execute");
    let outcome = repl.execute("print(my_var * 2)").expect("execute");
    assert_eq!(outcome.stdout.trim(), "42");

    let outcome = repl.execute("x = 1 / 0").expect("execute");
    assert!(outcome.error.is_some());
    assert!(outcome.stderr.contains("ZeroDivisionError"));

    // State survives the failed execution.
    let outcome = repl.execute("print(my_var)").expect("execute");
    assert_eq!(outcome.stdout.trim(), "21");
}

#[test]
fn final_and_submit_surface_answers() {
    require_python!();
    let mut repl = spawn("ctx");

    let outcome = repl.execute("FINAL('the answer is 42')").expect("execute");
    assert_eq!(outcome.final_answer.as_deref(), Some("the answer is 42"));

    let outcome = repl.execute("SUBMIT('submitted value')").expect("execute");
    assert_eq!(outcome.final_answer.as_deref(), Some("submitted value"));

    repl.execute("answer = 'computed result'").expect("execute");
    let outcome = repl.execute("FINAL_VAR('answer')").expect("execute");
    assert_eq!(outcome.final_answer.as_deref(), Some("computed result"));

    // A plain execution after FINAL carries no stale answer.
    let outcome = repl.execute("print('more work')").expect("execute");
    assert!(outcome.final_answer.is_none());
}

#[test]
fn helpers_are_rebound_after_user_overwrites() {
    require_python!();
    let mut repl = spawn("ctx with needle");

    repl.execute("context = 'corrupted'").expect("execute");
    let outcome = repl.execute("print('needle' in context)").expect("execute");
    assert_eq!(outcome.stdout.trim(), "True");

    repl.execute("FINAL = 'overwritten'").expect("execute");
    let outcome = repl.execute("FINAL('still works')").expect("execute");
    assert_eq!(outcome.final_answer.as_deref(), Some("still works"));
}

#[test]
fn strip_fences_and_show_vars_are_injected() {
    require_python!();
    let mut repl = spawn("ctx");

    let outcome = repl
        .execute("print(strip_fences('```python\\ncode here\\n```'))")
        .expect("execute");
    assert_eq!(outcome.stdout.trim(), "code here");

    repl.execute("result_data = [1, 2, 3]").expect("execute");
    let outcome = repl.execute("SHOW_VARS()").expect("execute");
    let vars = outcome.show_vars.expect("show_vars payload");
    assert!(vars.get("result_data").is_some());
    assert!(vars.get("context").is_none());
}

#[test]
fn timeout_kills_the_child_and_fails_structurally() {
    require_python!();
    let mut repl = PythonSpawner::default()
        .spawn(&SpawnRequest {
            context_text: "ctx",
            callback_port: 1,
            ready_timeout: Duration::from_secs(30),
            exec_timeout: Duration::from_secs(1),
        })
        .expect("spawn interpreter");

    let err = repl
        .execute("import time\ntime.sleep(30)")
        .expect_err("timeout");
    assert!(err.to_string().contains("timed out"));

    // The interpreter is torn down after a timeout.
    let err = repl.execute("print(1)").expect_err("dead interpreter");
    assert!(err.to_string().contains("not running"));
}
