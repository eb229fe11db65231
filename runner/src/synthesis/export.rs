//! Whole-run export in JSON or markdown.

use std::fs;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::types::{ArtifactRef, Run};
use crate::io::store::RunStore;
use crate::scheduler::dedupe_artifacts;
use crate::status::depth_histogram;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Markdown,
    Json,
}

/// Write `artifacts/export.json` or `artifacts/export.md`, register it in
/// the output index, and return its reference.
pub fn export_run(store: &RunStore, run_id: &str, format: ExportFormat) -> Result<ArtifactRef> {
    let mut run = store.get_run(run_id)?;
    let nodes = store.load_nodes(run_id)?;
    let results = store.load_results(run_id)?;
    let histogram = depth_histogram(&nodes);

    let (relative, contents) = match format {
        ExportFormat::Json => {
            let document = serde_json::json!({
                "run": run,
                "depth_histogram": histogram,
                "node_count": nodes.len(),
                "result_count": results.len(),
                "nodes": nodes,
                "results": results,
            });
            let mut buf = serde_json::to_string_pretty(&document)?;
            buf.push('\n');
            ("artifacts/export.json".to_string(), buf)
        }
        ExportFormat::Markdown => {
            let mut out = String::new();
            out.push_str(&format!("# Run `{}`\n\n", run.run_id));
            out.push_str(&format!("- objective: {}\n", run.objective));
            out.push_str(&format!("- mode: {:?}\n", run.mode).to_lowercase());
            out.push_str(&format!("- status: {:?}\n", run.status).to_lowercase());
            out.push_str(&format!(
                "- progress: {}/{} nodes completed, {} failed, {} active\n",
                run.progress.nodes_completed,
                run.progress.nodes_total,
                run.progress.nodes_failed,
                run.progress.active_nodes
            ));
            out.push_str("\n## Depth histogram\n\n| depth | nodes |\n|---|---|\n");
            for (depth, count) in &histogram {
                out.push_str(&format!("| {depth} | {count} |\n"));
            }
            out.push_str("\n## Results\n\n");
            for result in &results {
                let first_line = result.summary.lines().next().unwrap_or("");
                out.push_str(&format!("- `{}`: {}\n", result.node_id, first_line));
            }
            out.push_str("\n## Artifacts\n\n");
            for artifact in &run.output_index {
                out.push_str(&format!("- `{}` ({})\n", artifact.path, artifact.kind));
            }
            ("artifacts/export.md".to_string(), out)
        }
    };

    let path = store.run_dir(run_id).join(&relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create export dir {}", parent.display()))?;
    }
    fs::write(&path, contents).with_context(|| format!("write export {}", path.display()))?;

    let artifact = ArtifactRef {
        kind: "export".to_string(),
        path: relative,
    };
    let mut index = run.output_index.clone();
    index.push(artifact.clone());
    run.output_index = dedupe_artifacts(index);
    store.set_run(&run)?;
    Ok(artifact)
}
