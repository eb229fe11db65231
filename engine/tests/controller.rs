//! Controller loop tests against scripted model and interpreter seams.

use rlm_engine::test_support::{
    ScriptedModel, ScriptedSpawner, error_outcome, final_outcome, stdout_outcome,
};
use rlm_engine::{CancelSignal, Engine, EngineConfig};

/// A `FINAL(...)` execution terminates the loop and returns the literal
/// answer; solving by code alone never touches the sub-call budget.
#[test]
fn final_answer_terminates_the_loop() {
    let model = ScriptedModel::new(vec![
        "Summing the column.\n```python\ntotal = sum(int(l.split(',')[1]) for l in context.splitlines()[1:])\nFINAL(total)\n```",
    ]);
    let spawner = ScriptedSpawner::new(vec![final_outcome("12345")]);
    let engine = Engine::new(EngineConfig::default(), model.clone(), spawner.clone());

    let outcome = engine
        .run_query(
            "sum of the 'value' column",
            "id,value\n1,12345\n",
            &CancelSignal::new(),
        )
        .expect("run");

    assert_eq!(outcome.answer, "12345");
    assert_eq!(outcome.trajectory.len(), 1);
    assert_eq!(outcome.trajectory[0].reasoning, "Summing the column.");
    assert_eq!(outcome.call_tree.total_llm_calls, 0);
    assert_eq!(outcome.call_tree.iterations, 1);
    assert_eq!(model.calls_made(), 1);
}

/// A code-free response records the documented placeholder output and the
/// loop continues.
#[test]
fn missing_code_block_is_recorded_and_loop_continues() {
    let model = ScriptedModel::new(vec![
        "I will just think about it first.",
        "```python\nFINAL('done')\n```",
    ]);
    let spawner = ScriptedSpawner::new(vec![final_outcome("done")]);
    let engine = Engine::new(EngineConfig::default(), model, spawner.clone());

    let outcome = engine
        .run_query("anything", "ctx", &CancelSignal::new())
        .expect("run");

    assert_eq!(outcome.answer, "done");
    assert_eq!(outcome.trajectory.len(), 2);
    assert_eq!(
        outcome.trajectory[0].output,
        "No code block found in response."
    );
    // Only the second response reached the interpreter.
    assert_eq!(spawner.executed_code().len(), 1);
}

/// Consecutive in-band execution errors abort the loop into the fallback
/// summarization call.
#[test]
fn consecutive_errors_abort_into_fallback() {
    let model = ScriptedModel::new(vec![
        "```python\nbroken(\n```",
        "```python\nstill_broken(\n```",
        "the best guess from the trajectory",
    ]);
    let spawner = ScriptedSpawner::new(vec![
        error_outcome("SyntaxError"),
        error_outcome("SyntaxError"),
    ]);
    let config = EngineConfig {
        max_errors: 2,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config, model.clone(), spawner);

    let outcome = engine
        .run_query("q", "ctx", &CancelSignal::new())
        .expect("run");

    assert_eq!(outcome.answer, "the best guess from the trajectory");
    assert_eq!(outcome.trajectory.len(), 2);
    assert!(outcome.trajectory[1].output.contains("[stderr]"));
    // Two iteration calls plus the fallback call.
    assert_eq!(model.calls_made(), 3);
}

/// A successful execution resets the consecutive-error counter.
#[test]
fn successful_execution_resets_the_error_counter() {
    let model = ScriptedModel::new(vec![
        "```python\nbroken(\n```",
        "```python\nprint('ok')\n```",
        "```python\nbroken_again(\n```",
        "```python\nFINAL('recovered')\n```",
    ]);
    let spawner = ScriptedSpawner::new(vec![
        error_outcome("boom"),
        stdout_outcome("ok\n"),
        error_outcome("boom"),
        final_outcome("recovered"),
    ]);
    let config = EngineConfig {
        max_errors: 2,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config, model, spawner);

    let outcome = engine
        .run_query("q", "ctx", &CancelSignal::new())
        .expect("run");
    assert_eq!(outcome.answer, "recovered");
    assert_eq!(outcome.trajectory.len(), 4);
}

/// Exhausted iterations produce a single fallback call whose text becomes
/// the answer.
#[test]
fn iteration_exhaustion_falls_back_to_summarization() {
    let model = ScriptedModel::new(vec![
        "```python\nprint(len(context))\n```",
        "```python\nprint('still looking')\n```",
        "fallback synthesis of what was seen",
    ]);
    let spawner = ScriptedSpawner::new(vec![
        stdout_outcome("3\n"),
        stdout_outcome("still looking\n"),
    ]);
    let config = EngineConfig {
        max_iterations: 2,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config, model.clone(), spawner);

    let outcome = engine
        .run_query("q", "ctx", &CancelSignal::new())
        .expect("run");
    assert_eq!(outcome.answer, "fallback synthesis of what was seen");
    assert_eq!(outcome.trajectory.len(), 2);
    assert_eq!(model.calls_made(), 3);
}

#[test]
fn cancellation_stops_the_query() {
    let model = ScriptedModel::new(vec!["```python\nprint(1)\n```"]);
    let spawner = ScriptedSpawner::new(vec![stdout_outcome("1\n")]);
    let engine = Engine::new(EngineConfig::default(), model, spawner);

    let cancel = CancelSignal::new();
    cancel.cancel();
    let err = engine.run_query("q", "ctx", &cancel).expect_err("cancelled");
    assert!(err.to_string().contains("cancelled"));
}

/// Step output from the interpreter is truncated to `max_output_chars` with
/// a truncation note before it enters the trajectory.
#[test]
fn long_output_is_truncated_in_the_trajectory() {
    let model = ScriptedModel::new(vec![
        "```python\nprint('x' * 500)\n```",
        "```python\nFINAL('ok')\n```",
    ]);
    let spawner = ScriptedSpawner::new(vec![
        stdout_outcome(&"x".repeat(500)),
        final_outcome("ok"),
    ]);
    let config = EngineConfig {
        max_output_chars: 100,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config, model, spawner);

    let outcome = engine
        .run_query("q", "ctx", &CancelSignal::new())
        .expect("run");
    assert!(outcome.trajectory[0].output.contains("[output truncated"));
    assert!(outcome.trajectory[0].output.len() < 200);
}
