//! Event-sourced run directory store.
//!
//! Layout per run, under `<base>/<run_id>/`:
//!
//! - `run.json`: whole-document overwrite of the [`Run`] (atomic).
//! - `nodes.jsonl` / `results.jsonl`: append-only snapshot logs; the newest
//!   line per `node_id` wins on read.
//! - `queue.jsonl`: append-only queue event log.
//! - `artifacts/`, `logs/`: output directories.
//!
//! All reads rebuild snapshots from disk; there is no cached authoritative
//! state. Appends are a single write of one line, so a torn trailing line is
//! the worst-case crash artifact and is tolerated on read.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::core::types::{Node, NodeResult, QueueEvent, Run};

/// Current wall-clock time as epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current wall-clock time as an RFC 3339 string.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Filesystem store rooted at an injected base directory, so tests can point
/// it at a temp dir.
#[derive(Debug, Clone)]
pub struct RunStore {
    base: PathBuf,
}

impl RunStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.base.join(run_id)
    }

    pub fn artifacts_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("artifacts")
    }

    pub fn logs_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("logs")
    }

    fn run_json_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("run.json")
    }

    fn nodes_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("nodes.jsonl")
    }

    fn results_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("results.jsonl")
    }

    fn queue_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("queue.jsonl")
    }

    /// Create the run directory skeleton.
    pub fn init_run_dir(&self, run_id: &str) -> Result<()> {
        for dir in [self.artifacts_dir(run_id), self.logs_dir(run_id)] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("create run directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> Result<Run> {
        let path = self.run_json_path(run_id);
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read run {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parse run {}", path.display()))
    }

    /// Atomically write the run document (temp file + rename).
    pub fn set_run(&self, run: &Run) -> Result<()> {
        let path = self.run_json_path(&run.run_id);
        let parent = path
            .parent()
            .with_context(|| format!("run path missing parent {}", path.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
        let mut buf = serde_json::to_string_pretty(run)?;
        buf.push('\n');
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &buf)
            .with_context(|| format!("write temp run {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path).with_context(|| format!("replace run {}", path.display()))?;
        Ok(())
    }

    pub fn append_node(&self, node: &Node) -> Result<()> {
        append_jsonl(&self.nodes_path(&node.run_id), node)
    }

    pub fn append_result(&self, result: &NodeResult) -> Result<()> {
        append_jsonl(&self.results_path(&result.run_id), result)
    }

    pub fn append_event(&self, event: &QueueEvent) -> Result<()> {
        append_jsonl(&self.queue_path(&event.run_id), event)
    }

    /// Latest node snapshots, keyed reduction on `node_id`, preserving the
    /// order in which ids first appeared in the log.
    pub fn load_nodes(&self, run_id: &str) -> Result<Vec<Node>> {
        let entries: Vec<Node> = read_jsonl(&self.nodes_path(run_id))?;
        Ok(latest_wins(entries, |n| n.node_id.clone()))
    }

    /// Latest result snapshots, same discipline as [`load_nodes`].
    ///
    /// [`load_nodes`]: RunStore::load_nodes
    pub fn load_results(&self, run_id: &str) -> Result<Vec<NodeResult>> {
        let entries: Vec<NodeResult> = read_jsonl(&self.results_path(run_id))?;
        Ok(latest_wins(entries, |r| r.node_id.clone()))
    }

    /// All queue events in append order.
    pub fn load_events(&self, run_id: &str) -> Result<Vec<QueueEvent>> {
        read_jsonl(&self.queue_path(run_id))
    }
}

fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append to {}", path.display()))?;
    Ok(())
}

/// Parse a JSONL file, skipping unparseable lines (torn trailing writes).
fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read log {}", path.display()))?;
    let mut entries = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(value) => entries.push(value),
            Err(err) => {
                debug!(path = %path.display(), line = idx + 1, %err, "skipping malformed log line");
            }
        }
    }
    Ok(entries)
}

fn latest_wins<T, K: std::hash::Hash + Eq>(entries: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut order: Vec<T> = Vec::new();
    let mut index: HashMap<K, usize> = HashMap::new();
    for entry in entries {
        let k = key(&entry);
        match index.get(&k) {
            Some(&i) => order[i] = entry,
            None => {
                index.insert(k, order.len());
                order.push(entry);
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{node, run};
    use crate::core::types::NodeStatus;

    /// Verifies the latest-wins law: the materialized node equals the last
    /// line appended for its id, and first-seen ordering is preserved.
    #[test]
    fn latest_node_snapshot_wins() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RunStore::new(temp.path());

        let a = node("run-1", "run-1:root", 0);
        let mut b = node("run-1", "run-1:root:0:src", 1);
        store.append_node(&a).expect("append");
        store.append_node(&b).expect("append");
        b.status = NodeStatus::Completed;
        store.append_node(&b).expect("append");

        let nodes = store.load_nodes("run-1").expect("load");
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].node_id, "run-1:root");
        assert_eq!(nodes[1].status, NodeStatus::Completed);
    }

    /// A torn trailing line (crash mid-append) must not poison the log.
    #[test]
    fn malformed_trailing_line_is_tolerated() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RunStore::new(temp.path());
        store
            .append_node(&node("run-1", "run-1:root", 0))
            .expect("append");

        let path = temp.path().join("run-1").join("nodes.jsonl");
        let mut contents = fs::read_to_string(&path).expect("read");
        contents.push_str("{\"run_id\": \"run-1\", \"node_id\": \"run-1:ro");
        fs::write(&path, contents).expect("write");

        let nodes = store.load_nodes("run-1").expect("load");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_id, "run-1:root");
    }

    #[test]
    fn run_document_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RunStore::new(temp.path());
        let doc = run("run-7");
        store.set_run(&doc).expect("set");
        let loaded = store.get_run("run-7").expect("get");
        assert_eq!(loaded, doc);
    }

    #[test]
    fn missing_logs_read_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RunStore::new(temp.path());
        assert!(store.load_nodes("absent").expect("load").is_empty());
        assert!(store.load_results("absent").expect("load").is_empty());
        assert!(store.load_events("absent").expect("load").is_empty());
    }
}
