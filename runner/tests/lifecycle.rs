//! End-to-end lifecycle scenarios against a temp store.

use std::fs;
use std::path::{Path, PathBuf};

use rlm_runner::core::types::{Decision, DecisionReason, NodeStatus, RunMode, RunStatus};
use rlm_runner::io::store::RunStore;
use rlm_runner::synthesis::SynthesisTarget;
use rlm_runner::synthesis::export::ExportFormat;
use rlm_runner::tools::{RepoTools, StartOptions};

fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create dirs");
    }
    fs::write(path, contents).expect("write");
}

fn tools(base: &Path) -> RepoTools {
    RepoTools::new(RunStore::new(base.join("runs")))
}

/// Three small files resolve as a single leaf: one node, one result, reason
/// `scope_small_enough`, and an export histogram of `{"0": 1}`.
#[test]
fn tiny_repo_completes_as_single_leaf() {
    let temp = tempfile::tempdir().expect("tempdir");
    let scope = temp.path().join("repo");
    write(&scope.join("a.txt"), &"a".repeat(700));
    write(&scope.join("b.txt"), &"b".repeat(700));
    write(&scope.join("c.txt"), &"c".repeat(648));

    let tools = tools(temp.path());
    let run = tools
        .start("describe the repo", vec![scope], &StartOptions::default())
        .expect("start");

    let report = tools.run(&run.run_id, Some(50)).expect("run");
    assert_eq!(report.run.status, RunStatus::Completed);
    assert_eq!(report.run.progress.nodes_total, 1);
    assert_eq!(report.processed_nodes, 1);

    let status = tools.status(&run.run_id).expect("status");
    let root = status
        .nodes
        .iter()
        .find(|n| n.node_id == run.root_node_id)
        .expect("root node");
    assert_eq!(root.decision, Decision::Leaf);
    assert_eq!(root.decision_reason, Some(DecisionReason::ScopeSmallEnough));
    assert_eq!(status.result_count, 1);

    let export = tools
        .export(&run.run_id, ExportFormat::Json)
        .expect("export");
    let contents = fs::read_to_string(
        tools.store().run_dir(&run.run_id).join(&export.path),
    )
    .expect("read export");
    let document: serde_json::Value = serde_json::from_str(&contents).expect("parse export");
    assert_eq!(document["depth_histogram"], serde_json::json!({"0": 1}));
}

fn split_repo(base: &Path) -> PathBuf {
    let scope = base.join("repo");
    for dir in ["alpha", "beta"] {
        for i in 0..20 {
            write(
                &scope.join(dir).join(format!("f{i:02}.ts")),
                &format!("export const x{i} = {i};\n"),
            );
        }
    }
    scope
}

/// A two-directory scope in review mode splits at the root, processes both
/// subtrees, and aggregates the root result from the children's summaries.
#[test]
fn split_then_aggregate_to_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    let scope = split_repo(temp.path());

    let tools = tools(temp.path());
    let run = tools
        .start(
            "review the repo",
            vec![scope],
            &StartOptions {
                mode: Some(RunMode::Review),
                ..StartOptions::default()
            },
        )
        .expect("start");

    let first = tools.step(&run.run_id, Some(1)).expect("step");
    assert_eq!(first.processed_nodes, 1);
    let status = tools.status(&run.run_id).expect("status");
    let root = status
        .nodes
        .iter()
        .find(|n| n.node_id == run.root_node_id)
        .expect("root");
    assert_eq!(root.decision, Decision::Split);
    assert_eq!(root.decision_reason, Some(DecisionReason::ScopeTooLarge));
    assert_eq!(root.child_ids.len(), 2);
    assert_eq!(root.status, NodeStatus::Running);

    let report = tools.run(&run.run_id, Some(1000)).expect("run");
    assert_eq!(report.run.status, RunStatus::Completed);

    let results = tools
        .store()
        .load_results(&run.run_id)
        .expect("results");
    let root_result = results
        .iter()
        .find(|r| r.node_id == run.root_node_id)
        .expect("aggregated root result");
    for child_id in &root.child_ids {
        assert!(
            root_result.summary.contains(child_id),
            "root summary should reference child {child_id}"
        );
    }

    tools
        .synthesize(&run.run_id, Some(SynthesisTarget::Auto))
        .expect("synthesize");
    let ranked = tools
        .store()
        .run_dir(&run.run_id)
        .join("artifacts/review/findings-ranked.json");
    assert!(ranked.exists(), "findings-ranked.json missing");
}

/// Cancel terminalizes every queued node; resume requeues them and the run
/// still completes.
#[test]
fn cancel_then_resume_completes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let scope = split_repo(temp.path());

    let tools = tools(temp.path());
    let run = tools
        .start(
            "review the repo",
            vec![scope],
            &StartOptions {
                mode: Some(RunMode::Review),
                ..StartOptions::default()
            },
        )
        .expect("start");

    tools.step(&run.run_id, Some(1)).expect("step");
    let cancelled = tools.cancel(&run.run_id).expect("cancel");
    assert_eq!(cancelled.status, RunStatus::Cancelled);
    let status = tools.status(&run.run_id).expect("status");
    assert!(
        status
            .nodes
            .iter()
            .all(|n| n.status == NodeStatus::Cancelled),
        "all nodes should be cancelled"
    );

    // Cancel from a terminal state is a typed lifecycle failure.
    let err = tools.cancel(&run.run_id).expect_err("second cancel");
    assert!(
        err.downcast_ref::<rlm_runner::scheduler::LifecycleError>()
            .is_some()
    );

    let resumed = tools.resume(&run.run_id).expect("resume");
    assert_eq!(resumed.status, RunStatus::Running);

    let report = tools.run(&run.run_id, Some(1000)).expect("run");
    assert_eq!(report.run.status, RunStatus::Completed);
    let status = tools.status(&run.run_id).expect("status");
    assert!(
        status.nodes.iter().all(|n| n.status.is_terminal()),
        "every node should terminalize after resume"
    );
}

/// Resuming a running run is a no-op; resuming a completed run is an error.
#[test]
fn resume_lifecycle_rules() {
    let temp = tempfile::tempdir().expect("tempdir");
    let scope = temp.path().join("repo");
    write(&scope.join("a.txt"), "alpha");

    let tools = tools(temp.path());
    let run = tools
        .start("inspect", vec![scope], &StartOptions::default())
        .expect("start");

    let resumed = tools.resume(&run.run_id).expect("resume running");
    assert_eq!(resumed.status, RunStatus::Running);

    tools.run(&run.run_id, Some(10)).expect("run");
    let err = tools.resume(&run.run_id).expect_err("resume completed");
    assert!(
        err.downcast_ref::<rlm_runner::scheduler::LifecycleError>()
            .is_some()
    );
}

/// Progress counters are a pure function of the node log: totals equal the
/// number of distinct node ids, max depth equals the deepest snapshot.
#[test]
fn progress_matches_node_log() {
    let temp = tempfile::tempdir().expect("tempdir");
    let scope = split_repo(temp.path());

    let tools = tools(temp.path());
    let run = tools
        .start("map the repo", vec![scope], &StartOptions::default())
        .expect("start");
    let report = tools.run(&run.run_id, Some(1000)).expect("run");

    let nodes = tools.store().load_nodes(&run.run_id).expect("nodes");
    let distinct: std::collections::HashSet<&str> =
        nodes.iter().map(|n| n.node_id.as_str()).collect();
    assert_eq!(report.run.progress.nodes_total as usize, distinct.len());
    let max_depth = nodes.iter().map(|n| n.depth).max().unwrap_or(0);
    assert_eq!(report.run.progress.max_depth_seen, max_depth);
    assert_eq!(report.run.checkpoint.last_event_offset as usize, {
        tools.store().load_events(&run.run_id).expect("events").len()
    });
}
