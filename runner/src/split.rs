//! Child scope planning for split nodes.
//!
//! Splitting prefers directory structure: if any input path has
//! subdirectories, each subdirectory becomes one child scope. Flat scopes
//! fall back to fixed-size file groups. Every enumerated file lands in at
//! most one child, so sibling scopes never overlap.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::node_id::child_node_id;
use crate::core::types::{Decision, Node, NodeBudgets, NodeStatus, ScopeRef, ScopeType};

/// Flat deduction charged to the parent before dividing budgets.
pub const SPLIT_LLM_CALL_COST: i64 = 1;
pub const SPLIT_TOKEN_COST: i64 = 4_000;

/// Maximum files per `file_group` child.
pub const FILE_GROUP_SIZE: usize = 8;

/// Materialize queued children for a split parent. Returns an empty vec when
/// the scope has nothing to decompose into (the caller falls back to leaf).
pub fn plan_children(parent: &Node, created_at: &str) -> Vec<Node> {
    let mut subdirs: Vec<PathBuf> = Vec::new();
    let mut files: Vec<PathBuf> = Vec::new();
    for raw in &parent.scope_ref.paths {
        enumerate_immediate(Path::new(raw), &mut subdirs, &mut files);
    }
    subdirs.sort();
    subdirs.dedup();
    files.sort();
    files.dedup();

    let budgets = divided_budgets(
        &parent.budgets,
        if subdirs.is_empty() {
            files.chunks(FILE_GROUP_SIZE).count()
        } else {
            subdirs.len()
        },
    );

    let child = |index: usize, label: &str, scope_type: ScopeType, paths: Vec<String>| Node {
        run_id: parent.run_id.clone(),
        node_id: child_node_id(&parent.node_id, index, label),
        parent_id: Some(parent.node_id.clone()),
        depth: parent.depth + 1,
        scope_type,
        scope_ref: ScopeRef { paths },
        objective: parent.objective.clone(),
        domain: parent.domain,
        status: NodeStatus::Queued,
        decision: Decision::Undecided,
        decision_reason: None,
        child_ids: Vec::new(),
        confidence: None,
        budgets,
        metrics: None,
        errors: Vec::new(),
        created_at: created_at.to_string(),
        updated_at: created_at.to_string(),
    };

    if !subdirs.is_empty() {
        debug!(parent = %parent.node_id, children = subdirs.len(), "splitting by subdirectory");
        return subdirs
            .iter()
            .enumerate()
            .map(|(i, dir)| {
                let label = dir
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| format!("dir-{i}"));
                child(i, &label, ScopeType::Dir, vec![dir.to_string_lossy().to_string()])
            })
            .collect();
    }

    if files.is_empty() {
        return Vec::new();
    }

    debug!(parent = %parent.node_id, files = files.len(), "splitting into file groups");
    files
        .chunks(FILE_GROUP_SIZE)
        .enumerate()
        .map(|(i, chunk)| {
            child(
                i,
                &format!("group-{i}"),
                ScopeType::FileGroup,
                chunk.iter().map(|p| p.to_string_lossy().to_string()).collect(),
            )
        })
        .collect()
}

/// List the immediate subdirectories and files of one scope path. A path
/// that is itself a file contributes itself; unreadable entries are skipped.
fn enumerate_immediate(path: &Path, subdirs: &mut Vec<PathBuf>, files: &mut Vec<PathBuf>) {
    let Ok(meta) = fs::metadata(path) else {
        return;
    };
    if meta.is_file() {
        files.push(path.to_path_buf());
        return;
    }
    let Ok(read) = fs::read_dir(path) else {
        return;
    };
    for entry in read.filter_map(|e| e.ok()) {
        let entry_path = path.join(entry.file_name());
        match entry.file_type() {
            Ok(t) if t.is_dir() => subdirs.push(entry_path),
            Ok(t) if t.is_file() => files.push(entry_path),
            _ => {}
        }
    }
}

/// Charge the cost of the split, then divide what remains equally.
fn divided_budgets(parent: &NodeBudgets, child_count: usize) -> NodeBudgets {
    let divisor = child_count.max(1) as i64;
    let llm = (parent.remaining_llm_calls - SPLIT_LLM_CALL_COST).max(0);
    let tokens = (parent.remaining_tokens - SPLIT_TOKEN_COST).max(0);
    NodeBudgets {
        max_depth: parent.max_depth,
        remaining_llm_calls: llm / divisor,
        remaining_tokens: tokens / divisor,
        deadline_epoch_ms: parent.deadline_epoch_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::node_with_scope;
    use std::collections::HashSet;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create dirs");
        }
        fs::write(path, contents).expect("write");
    }

    #[test]
    fn splits_by_subdirectory_when_present() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(&temp.path().join("alpha/a.rs"), "a");
        write(&temp.path().join("beta/b.rs"), "b");
        write(&temp.path().join("loose.md"), "m");

        let parent = node_with_scope("run-1", "run-1:root", 0, &[temp.path().to_path_buf()]);
        let children = plan_children(&parent, "2026-01-01T00:00:00Z");

        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.scope_type == ScopeType::Dir));
        assert!(children.iter().all(|c| c.depth == 1));
        assert!(children.iter().all(|c| c.status == NodeStatus::Queued));
        let ids: Vec<&str> = children.iter().map(|c| c.node_id.as_str()).collect();
        assert_eq!(ids, vec!["run-1:root:0:alpha", "run-1:root:1:beta"]);
    }

    #[test]
    fn groups_flat_files_in_chunks_of_eight() {
        let temp = tempfile::tempdir().expect("tempdir");
        for i in 0..19 {
            write(&temp.path().join(format!("f{i:02}.rs")), "x");
        }
        let parent = node_with_scope("run-1", "run-1:root", 0, &[temp.path().to_path_buf()]);
        let children = plan_children(&parent, "2026-01-01T00:00:00Z");

        assert_eq!(children.len(), 3);
        assert!(children.iter().all(|c| c.scope_type == ScopeType::FileGroup));
        assert_eq!(children[0].scope_ref.paths.len(), 8);
        assert_eq!(children[2].scope_ref.paths.len(), 3);
        assert_eq!(children[1].node_id, "run-1:root:1:group-1");
    }

    /// Split safety: no file appears in more than one child scope.
    #[test]
    fn child_scopes_are_disjoint() {
        let temp = tempfile::tempdir().expect("tempdir");
        for i in 0..12 {
            write(&temp.path().join(format!("f{i:02}.rs")), "x");
        }
        let parent = node_with_scope("run-1", "run-1:root", 0, &[temp.path().to_path_buf()]);
        let children = plan_children(&parent, "2026-01-01T00:00:00Z");

        let mut seen = HashSet::new();
        for child in &children {
            for path in &child.scope_ref.paths {
                assert!(seen.insert(path.clone()), "path {path} in two scopes");
            }
        }
    }

    /// Budget distribution: deduct 1 call and 4000 tokens, then divide.
    #[test]
    fn budgets_are_charged_then_divided() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(&temp.path().join("alpha/a.rs"), "a");
        write(&temp.path().join("beta/b.rs"), "b");

        let mut parent = node_with_scope("run-1", "run-1:root", 0, &[temp.path().to_path_buf()]);
        parent.budgets.remaining_llm_calls = 11;
        parent.budgets.remaining_tokens = 24_000;
        parent.budgets.deadline_epoch_ms = 777;

        let children = plan_children(&parent, "2026-01-01T00:00:00Z");
        assert_eq!(children.len(), 2);
        for child in &children {
            assert_eq!(child.budgets.remaining_llm_calls, 5);
            assert_eq!(child.budgets.remaining_tokens, 10_000);
            assert_eq!(child.budgets.deadline_epoch_ms, 777);
        }
    }

    #[test]
    fn depleted_budgets_never_go_negative() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(&temp.path().join("alpha/a.rs"), "a");
        let mut parent = node_with_scope("run-1", "run-1:root", 0, &[temp.path().to_path_buf()]);
        parent.budgets.remaining_llm_calls = 0;
        parent.budgets.remaining_tokens = 100;

        let children = plan_children(&parent, "2026-01-01T00:00:00Z");
        assert_eq!(children[0].budgets.remaining_llm_calls, 0);
        assert_eq!(children[0].budgets.remaining_tokens, 0);
    }

    #[test]
    fn empty_scope_yields_no_children() {
        let temp = tempfile::tempdir().expect("tempdir");
        let parent = node_with_scope("run-1", "run-1:root", 0, &[temp.path().to_path_buf()]);
        assert!(plan_children(&parent, "2026-01-01T00:00:00Z").is_empty());
    }
}
