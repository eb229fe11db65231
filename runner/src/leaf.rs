//! Leaf analysis: bounded scope metrics, heuristic review scanning, and
//! per-node wiki artifacts.

use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::core::node_id::sanitize_node_id;
use crate::core::types::{
    ArtifactRef, Domain, Evidence, Finding, Node, NodeMetrics, NodeResult, ResultStatus, RunMode,
    Severity,
};
use crate::io::store::{RunStore, now_iso};
use crate::io::walker::{ScopeStats, extension_histogram, walk_scope};

/// Sampling cap for leaf metrics.
const LEAF_SAMPLE_FILES: usize = 200;

/// Review scan bounds: files per node, bytes per file, findings per node.
const MAX_SCAN_FILES: usize = 40;
const MAX_SCAN_BYTES: u64 = 256 * 1024;
const MAX_FINDINGS_PER_NODE: usize = 25;

/// Fixed heuristic pattern set for review mode.
struct PatternRule {
    needle: &'static str,
    severity: Severity,
    confidence: f64,
    domain: Domain,
    title: &'static str,
    suggested_fix: &'static str,
}

/// The `any` needle deliberately matches the bare substring, including inside
/// longer identifiers, to keep finding counts stable across reruns.
const PATTERN_RULES: &[PatternRule] = &[
    PatternRule {
        needle: "eval(",
        severity: Severity::High,
        confidence: 0.8,
        domain: Domain::Security,
        title: "Potential dynamic code execution",
        suggested_fix: "Avoid eval-like constructs or strictly validate inputs",
    },
    PatternRule {
        needle: "TODO",
        severity: Severity::Low,
        confidence: 0.6,
        domain: Domain::Quality,
        title: "Unresolved TODO found",
        suggested_fix: "Track TODO in issue and resolve or remove",
    },
    PatternRule {
        needle: "any",
        severity: Severity::Medium,
        confidence: 0.6,
        domain: Domain::Quality,
        title: "Type safety risk",
        suggested_fix: "Replace with stricter types",
    },
];

/// Outcome of executing a leaf node.
#[derive(Debug, Clone)]
pub struct LeafOutcome {
    pub result: NodeResult,
    pub metrics: NodeMetrics,
}

/// Analyze a node in place: collect scope metrics, scan for review patterns
/// when the run is in review mode, and write the per-node wiki document when
/// the run is in wiki mode.
#[instrument(skip_all, fields(node_id = %node.node_id))]
pub fn execute_leaf(store: &RunStore, mode: RunMode, node: &Node) -> Result<LeafOutcome> {
    let start = Instant::now();
    let paths: Vec<std::path::PathBuf> = node
        .scope_ref
        .paths
        .iter()
        .map(std::path::PathBuf::from)
        .collect();
    let stats = walk_scope(&paths, LEAF_SAMPLE_FILES);

    let findings = if mode == RunMode::Review {
        scan_for_patterns(node, &stats)
    } else {
        Vec::new()
    };

    let mut artifacts = Vec::new();
    if mode == RunMode::Wiki {
        artifacts.push(write_wiki_node(store, node, &stats)?);
    }

    let duration_ms = start.elapsed().as_millis() as u64;
    let summary = summary_line(node, &stats, mode, findings.len(), duration_ms);
    debug!(files = stats.file_count, findings = findings.len(), "leaf analyzed");

    let metrics = NodeMetrics {
        file_count: stats.file_count,
        total_bytes: stats.total_bytes,
        duration_ms: Some(duration_ms),
        findings_count: Some(findings.len() as u64),
    };

    Ok(LeafOutcome {
        result: NodeResult {
            run_id: node.run_id.clone(),
            node_id: node.node_id.clone(),
            status: ResultStatus::Completed,
            summary,
            findings,
            artifacts,
            aggregation_notes: None,
            created_at: now_iso(),
        },
        metrics,
    })
}

fn summary_line(
    node: &Node,
    stats: &ScopeStats,
    mode: RunMode,
    findings: usize,
    duration_ms: u64,
) -> String {
    let histogram = extension_histogram(&stats.sampled_files);
    let top_extensions = histogram
        .iter()
        .take(5)
        .map(|(ext, count)| format!("{ext}:{count}"))
        .collect::<Vec<_>>()
        .join(",");
    let sample_files = stats
        .sampled_files
        .iter()
        .take(5)
        .map(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| p.to_string_lossy().to_string())
        })
        .collect::<Vec<_>>()
        .join(",");

    let mut line = format!(
        "Leaf analysis for node {} | scope={} | files={} | bytes={} | top_extensions={} | sample_files={}",
        node.node_id,
        node.scope_type.as_str(),
        stats.file_count,
        stats.total_bytes,
        top_extensions,
        sample_files,
    );
    if mode == RunMode::Review {
        line.push_str(&format!(" | findings={findings}"));
    }
    line.push_str(&format!(" | duration_ms={duration_ms}"));
    line
}

/// Scan sampled files for the fixed pattern set. At most one finding per
/// (file, pattern), anchored to the first matching line.
fn scan_for_patterns(node: &Node, stats: &ScopeStats) -> Vec<Finding> {
    let mut findings = Vec::new();
    for file in stats.sampled_files.iter().take(MAX_SCAN_FILES) {
        if findings.len() >= MAX_FINDINGS_PER_NODE {
            break;
        }
        let Ok(meta) = fs::metadata(file) else {
            continue;
        };
        if meta.len() > MAX_SCAN_BYTES {
            continue;
        }
        let Ok(bytes) = fs::read(file) else {
            continue;
        };
        let contents = String::from_utf8_lossy(&bytes);
        for rule in PATTERN_RULES {
            if findings.len() >= MAX_FINDINGS_PER_NODE {
                break;
            }
            if let Some(finding) = match_rule(node, file, &contents, rule) {
                findings.push(finding);
            }
        }
    }
    findings
}

fn match_rule(node: &Node, file: &Path, contents: &str, rule: &PatternRule) -> Option<Finding> {
    let line_number = contents
        .lines()
        .position(|line| line.contains(rule.needle))?
        + 1;
    let path = file.to_string_lossy().to_string();
    Some(Finding {
        id: finding_id(&node.node_id, &path, rule.needle, line_number),
        domain: rule.domain,
        severity: rule.severity,
        confidence: rule.confidence,
        title: rule.title.to_string(),
        description: format!(
            "Pattern `{}` matched in {} at line {}",
            rule.needle, path, line_number
        ),
        suggested_fix: Some(rule.suggested_fix.to_string()),
        evidence: vec![Evidence {
            path,
            line_start: line_number as u32,
            line_end: line_number as u32,
            quote: Some(rule.needle.to_string()),
        }],
    })
}

/// Deterministic finding id from the match coordinates.
fn finding_id(node_id: &str, path: &str, needle: &str, line: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(node_id.as_bytes());
    hasher.update(path.as_bytes());
    hasher.update(needle.as_bytes());
    hasher.update(line.to_string().as_bytes());
    let digest = hasher.finalize();
    format!("finding-{}", hex::encode(&digest[..8]))
}

/// Write `artifacts/wiki/nodes/<sanitized_node_id>.md` and return its
/// artifact reference (path relative to the run directory).
fn write_wiki_node(store: &RunStore, node: &Node, stats: &ScopeStats) -> Result<ArtifactRef> {
    let file_name = format!("{}.md", sanitize_node_id(&node.node_id));
    let relative = format!("artifacts/wiki/nodes/{file_name}");
    let path = store.run_dir(&node.run_id).join(&relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create wiki node dir {}", parent.display()))?;
    }

    let mut doc = String::new();
    doc.push_str(&format!("# Node `{}`\n\n", node.node_id));
    doc.push_str(&format!("- scope: {}\n", node.scope_type.as_str()));
    doc.push_str(&format!("- depth: {}\n", node.depth));
    doc.push_str(&format!("- files: {}\n", stats.file_count));
    doc.push_str(&format!("- bytes: {}\n", stats.total_bytes));
    doc.push_str("\n## Scope paths\n\n");
    for scope_path in &node.scope_ref.paths {
        doc.push_str(&format!("- `{scope_path}`\n"));
    }
    doc.push_str("\n## Sampled files\n\n");
    for file in stats.sampled_files.iter().take(30) {
        doc.push_str(&format!("- `{}`\n", file.display()));
    }

    fs::write(&path, doc).with_context(|| format!("write wiki node {}", path.display()))?;
    Ok(ArtifactRef {
        kind: "wiki_node".to_string(),
        path: relative,
    })
}
