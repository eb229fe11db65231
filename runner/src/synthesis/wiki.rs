//! Wiki synthesis: index, module index, and architecture summary over the
//! per-node documents written by leaf execution.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use crate::core::types::{ArtifactRef, Node, NodeResult, Run};
use crate::io::store::RunStore;
use crate::synthesis::objective_tags;

/// A per-node wiki document surviving dedupe and the on-disk presence check.
struct WikiNodeDoc {
    node_id: String,
    relative_path: String,
    module: String,
}

/// Emit `index.md`, `module-index.md`, and `architecture-summary.md` under
/// `artifacts/wiki/`.
pub fn synthesize_wiki(
    store: &RunStore,
    run: &Run,
    nodes: &[Node],
    results: &[NodeResult],
) -> Result<Vec<ArtifactRef>> {
    let docs = collect_node_docs(store, run, nodes, results);

    let wiki_dir = store.artifacts_dir(&run.run_id).join("wiki");
    fs::create_dir_all(&wiki_dir)
        .with_context(|| format!("create wiki dir {}", wiki_dir.display()))?;

    let mut modules: BTreeMap<String, Vec<&WikiNodeDoc>> = BTreeMap::new();
    for doc in &docs {
        modules.entry(doc.module.clone()).or_default().push(doc);
    }

    let index = render_index(run, &docs);
    write_doc(&wiki_dir.join("index.md"), &index)?;

    let module_index = render_module_index(&modules);
    write_doc(&wiki_dir.join("module-index.md"), &module_index)?;

    let architecture = render_architecture_summary(run, nodes, results, &modules);
    write_doc(&wiki_dir.join("architecture-summary.md"), &architecture)?;

    Ok(vec![
        ArtifactRef {
            kind: "wiki_index".to_string(),
            path: "artifacts/wiki/index.md".to_string(),
        },
        ArtifactRef {
            kind: "wiki_module_index".to_string(),
            path: "artifacts/wiki/module-index.md".to_string(),
        },
        ArtifactRef {
            kind: "wiki_architecture".to_string(),
            path: "artifacts/wiki/architecture-summary.md".to_string(),
        },
    ])
}

/// Gather `wiki_node` artifacts from results, dedupe by path, and drop any
/// whose document is missing on disk.
fn collect_node_docs(
    store: &RunStore,
    run: &Run,
    nodes: &[Node],
    results: &[NodeResult],
) -> Vec<WikiNodeDoc> {
    let root_scope = nodes
        .iter()
        .find(|n| n.node_id == run.root_node_id)
        .and_then(|n| n.scope_ref.paths.first().cloned());

    let mut seen = std::collections::HashSet::new();
    let mut docs = Vec::new();
    for result in results {
        for artifact in &result.artifacts {
            if artifact.kind != "wiki_node" || !seen.insert(artifact.path.clone()) {
                continue;
            }
            let absolute = store.run_dir(&run.run_id).join(&artifact.path);
            if !absolute.exists() {
                warn!(path = %artifact.path, "wiki node document missing, skipping link");
                continue;
            }
            let module = nodes
                .iter()
                .find(|n| n.node_id == result.node_id)
                .map(|n| module_of(n, root_scope.as_deref()))
                .unwrap_or_else(|| "root".to_string());
            docs.push(WikiNodeDoc {
                node_id: result.node_id.clone(),
                relative_path: artifact.path.clone(),
                module,
            });
        }
    }
    docs.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    docs
}

/// Module key: first path segment of the node's first scope path relative to
/// the root scope; the root itself maps to `root`.
fn module_of(node: &Node, root_scope: Option<&str>) -> String {
    let Some(first) = node.scope_ref.paths.first() else {
        return "root".to_string();
    };
    let relative = match root_scope {
        Some(root) => Path::new(first)
            .strip_prefix(root)
            .unwrap_or_else(|_| Path::new(first)),
        None => Path::new(first),
    };
    relative
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .filter(|s| !s.is_empty() && s != "/")
        .unwrap_or_else(|| "root".to_string())
}

fn render_index(run: &Run, docs: &[WikiNodeDoc]) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Wiki for run `{}`\n\n", run.run_id));
    out.push_str(&format!("Objective: {}\n\n", run.objective));
    out.push_str("- [Module index](module-index.md)\n");
    out.push_str("- [Architecture summary](architecture-summary.md)\n\n");
    out.push_str("## Node documents\n\n");
    if docs.is_empty() {
        out.push_str("_No per-node documents were produced._\n");
    }
    for doc in docs {
        let link = doc
            .relative_path
            .strip_prefix("artifacts/wiki/")
            .unwrap_or(&doc.relative_path);
        out.push_str(&format!("- [`{}`]({})\n", doc.node_id, link));
    }
    out
}

fn render_module_index(modules: &BTreeMap<String, Vec<&WikiNodeDoc>>) -> String {
    let mut out = String::new();
    out.push_str("# Module index\n\n");
    if modules.is_empty() {
        out.push_str("_No modules covered._\n");
        return out;
    }
    out.push_str("| module | node documents |\n|---|---|\n");
    for (module, docs) in modules {
        out.push_str(&format!("| `{}` | {} |\n", module, docs.len()));
    }
    out
}

fn render_architecture_summary(
    run: &Run,
    nodes: &[Node],
    results: &[NodeResult],
    modules: &BTreeMap<String, Vec<&WikiNodeDoc>>,
) -> String {
    let tags = objective_tags(&run.objective);
    let mut out = String::new();
    out.push_str("# Architecture summary\n\n");
    out.push_str(&format!("Objective: {}\n\n", run.objective));
    out.push_str(&format!(
        "Focus tags: {}\n\n",
        if tags.is_empty() {
            "(none)".to_string()
        } else {
            tags.join(", ")
        }
    ));
    out.push_str(&format!(
        "Coverage: {} nodes analyzed, {} results, {} modules\n\n",
        nodes.len(),
        results.len(),
        modules.len()
    ));
    out.push_str("## Result summaries\n\n");
    for result in results.iter().take(30) {
        let first_line = result.summary.lines().next().unwrap_or("");
        out.push_str(&format!("- `{}`: {}\n", result.node_id, first_line));
    }
    out
}

fn write_doc(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ResultStatus;
    use crate::test_support::{node_with_scope, run};
    use std::path::PathBuf;

    fn wiki_result(node_id: &str, doc_path: &str) -> NodeResult {
        NodeResult {
            run_id: "r".to_string(),
            node_id: node_id.to_string(),
            status: ResultStatus::Completed,
            summary: format!("summary for {node_id}"),
            findings: Vec::new(),
            artifacts: vec![ArtifactRef {
                kind: "wiki_node".to_string(),
                path: doc_path.to_string(),
            }],
            aggregation_notes: None,
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
        }
    }

    /// Index links every present node document; a registered document that
    /// is missing on disk is skipped rather than dangling.
    #[test]
    fn index_links_only_present_documents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RunStore::new(temp.path().join("runs"));
        store.init_run_dir("r").expect("init");

        let doc_rel = "artifacts/wiki/nodes/r-root-0-src.md";
        let doc_abs = store.run_dir("r").join(doc_rel);
        fs::create_dir_all(doc_abs.parent().expect("parent")).expect("mkdir");
        fs::write(&doc_abs, "# Node doc\n").expect("write");

        let run_doc = run("r");
        let nodes = vec![
            node_with_scope("r", "r:root", 0, &[PathBuf::from("/repo")]),
            node_with_scope("r", "r:root:0:src", 1, &[PathBuf::from("/repo/src")]),
            node_with_scope("r", "r:root:1:docs", 1, &[PathBuf::from("/repo/docs")]),
        ];
        let results = vec![
            wiki_result("r:root:0:src", doc_rel),
            wiki_result("r:root:1:docs", "artifacts/wiki/nodes/missing.md"),
        ];

        let artifacts = synthesize_wiki(&store, &run_doc, &nodes, &results).expect("wiki");
        assert_eq!(artifacts.len(), 3);

        let index =
            fs::read_to_string(store.run_dir("r").join("artifacts/wiki/index.md")).expect("read");
        assert!(index.contains("nodes/r-root-0-src.md"));
        assert!(!index.contains("missing.md"));
        assert!(index.contains("module-index.md"));

        let module_index =
            fs::read_to_string(store.run_dir("r").join("artifacts/wiki/module-index.md"))
                .expect("read");
        assert!(module_index.contains("| `src` | 1 |"));
    }

    #[test]
    fn architecture_summary_carries_focus_tags() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RunStore::new(temp.path().join("runs"));
        store.init_run_dir("r").expect("init");

        let mut run_doc = run("r");
        run_doc.objective = "document the architecture for security review".to_string();
        let nodes = vec![node_with_scope("r", "r:root", 0, &[PathBuf::from("/repo")])];

        synthesize_wiki(&store, &run_doc, &nodes, &[]).expect("wiki");
        let summary = fs::read_to_string(
            store
                .run_dir("r")
                .join("artifacts/wiki/architecture-summary.md"),
        )
        .expect("read");
        assert!(summary.contains("security"));
        assert!(summary.contains("architecture"));
    }

    #[test]
    fn module_of_strips_the_root_scope() {
        let node = node_with_scope("r", "r:root:0:src", 1, &[PathBuf::from("/repo/src/lib")]);
        assert_eq!(module_of(&node, Some("/repo")), "src");
        let root = node_with_scope("r", "r:root", 0, &[PathBuf::from("/repo")]);
        assert_eq!(module_of(&root, Some("/repo")), "root");
    }
}
