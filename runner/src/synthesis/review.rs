//! Review synthesis: deterministic dedupe, ranking, clustering, and CI
//! exports over the findings collected from node results.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::core::types::{ArtifactRef, Finding, NodeResult, Run, Severity};
use crate::synthesis::objective_tags;

#[derive(Debug, Clone, Serialize)]
struct RankedReport {
    run_id: String,
    objective: String,
    objective_tags: Vec<String>,
    raw_count: usize,
    deduped_count: usize,
    cluster_count: usize,
    risk_score: f64,
    severity_counts: BTreeMap<String, u64>,
    findings: Vec<Finding>,
}

#[derive(Debug, Clone, Serialize)]
struct FindingCluster {
    cluster_id: String,
    domain: String,
    title: String,
    severity: Severity,
    confidence: f64,
    count: usize,
    affected_paths: Vec<String>,
    finding_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct SummaryReport {
    run_id: String,
    risk_score: f64,
    raw_count: usize,
    deduped_count: usize,
    cluster_count: usize,
    severity_counts: BTreeMap<String, u64>,
    top_hotspots: Vec<FindingCluster>,
}

/// Emit the review artifact set under `artifacts/review/`.
pub fn synthesize_review(
    store: &crate::io::store::RunStore,
    run: &Run,
    results: &[NodeResult],
) -> Result<Vec<ArtifactRef>> {
    let raw: Vec<Finding> = results
        .iter()
        .flat_map(|r| r.findings.iter().cloned())
        .collect();
    let raw_count = raw.len();

    let deduped = dedupe_findings(raw);
    let clusters = cluster_findings(&deduped);
    let risk_score = risk_score(&deduped);
    let severity_counts = severity_counts(&deduped);

    let ranked = RankedReport {
        run_id: run.run_id.clone(),
        objective: run.objective.clone(),
        objective_tags: objective_tags(&run.objective),
        raw_count,
        deduped_count: deduped.len(),
        cluster_count: clusters.len(),
        risk_score,
        severity_counts: severity_counts.clone(),
        findings: deduped.clone(),
    };
    let summary = SummaryReport {
        run_id: run.run_id.clone(),
        risk_score,
        raw_count,
        deduped_count: deduped.len(),
        cluster_count: clusters.len(),
        severity_counts,
        top_hotspots: clusters.iter().take(10).cloned().collect(),
    };

    let review_dir = store.artifacts_dir(&run.run_id).join("review");
    fs::create_dir_all(&review_dir)
        .with_context(|| format!("create review dir {}", review_dir.display()))?;

    write_json(&review_dir.join("findings-ranked.json"), &ranked)?;
    write_json(&review_dir.join("findings-clusters.json"), &clusters)?;
    write_json(&review_dir.join("summary.json"), &summary)?;
    fs::write(
        review_dir.join("report.md"),
        render_report(&ranked, &clusters),
    )
    .with_context(|| "write report.md")?;
    write_json(
        &review_dir.join("codequality.json"),
        &code_quality_entries(&deduped),
    )?;
    write_json(&review_dir.join("sarif.json"), &sarif_document(&deduped))?;

    Ok(vec![
        artifact("review_findings", "findings-ranked.json"),
        artifact("review_clusters", "findings-clusters.json"),
        artifact("review_summary", "summary.json"),
        artifact("review_report", "report.md"),
        artifact("codequality", "codequality.json"),
        artifact("sarif", "sarif.json"),
    ])
}

fn artifact(kind: &str, file: &str) -> ArtifactRef {
    ArtifactRef {
        kind: kind.to_string(),
        path: format!("artifacts/review/{file}"),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

/// Dedupe key: domain, title, and the primary evidence region.
fn dedupe_key(finding: &Finding) -> String {
    let ev = &finding.evidence[0];
    format!(
        "{}|{}|{}|{}|{}",
        finding.domain.as_str(),
        finding.title,
        ev.path,
        ev.line_start,
        ev.line_end
    )
}

/// Drop evidence-free findings, then collapse key collisions keeping the
/// higher severity (higher confidence on ties). Sorted by severity rank then
/// confidence, both descending.
fn dedupe_findings(raw: Vec<Finding>) -> Vec<Finding> {
    let mut by_key: HashMap<String, Finding> = HashMap::new();
    for finding in raw {
        let valid_evidence = finding
            .evidence
            .first()
            .map(|e| e.line_start <= e.line_end)
            .unwrap_or(false);
        if !valid_evidence {
            continue;
        }
        let key = dedupe_key(&finding);
        match by_key.get(&key) {
            Some(existing)
                if (existing.severity.rank(), existing.confidence)
                    >= (finding.severity.rank(), finding.confidence) => {}
            _ => {
                by_key.insert(key, finding);
            }
        }
    }
    let mut deduped: Vec<Finding> = by_key.into_values().collect();
    deduped.sort_by(|a, b| {
        b.severity
            .rank()
            .cmp(&a.severity.rank())
            .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| a.id.cmp(&b.id))
    });
    deduped
}

fn first_path_segment(path: &str) -> String {
    Path::new(path)
        .components()
        .find_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().to_string()),
            _ => None,
        })
        .unwrap_or_else(|| path.to_string())
}

/// First eight lowercase alphanumeric words of the title.
fn normalized_title_prefix(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(8)
        .collect::<Vec<_>>()
        .join(" ")
}

fn cluster_findings(deduped: &[Finding]) -> Vec<FindingCluster> {
    let mut grouped: BTreeMap<String, Vec<&Finding>> = BTreeMap::new();
    for finding in deduped {
        let key = format!(
            "{}|{}|{}",
            finding.domain.as_str(),
            first_path_segment(&finding.evidence[0].path),
            normalized_title_prefix(&finding.title)
        );
        grouped.entry(key).or_default().push(finding);
    }

    let mut clusters: Vec<FindingCluster> = grouped
        .into_iter()
        .map(|(key, members)| {
            let top = members
                .iter()
                .max_by(|a, b| {
                    a.severity
                        .rank()
                        .cmp(&b.severity.rank())
                        .then_with(|| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal))
                })
                .expect("cluster has at least one member");
            let mut affected: Vec<String> = members
                .iter()
                .map(|f| f.evidence[0].path.clone())
                .collect();
            affected.sort();
            affected.dedup();
            FindingCluster {
                cluster_id: cluster_id(&key),
                domain: top.domain.as_str().to_string(),
                title: top.title.clone(),
                severity: members
                    .iter()
                    .map(|f| f.severity)
                    .max_by_key(|s| s.rank())
                    .expect("nonempty"),
                confidence: members.iter().map(|f| f.confidence).fold(0.0, f64::max),
                count: members.len(),
                affected_paths: affected,
                finding_ids: members.iter().map(|f| f.id.clone()).collect(),
            }
        })
        .collect();

    clusters.sort_by(|a, b| {
        b.severity
            .rank()
            .cmp(&a.severity.rank())
            .then_with(|| b.count.cmp(&a.count))
            .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.cluster_id.cmp(&b.cluster_id))
    });
    clusters
}

fn cluster_id(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    format!("cluster_{}", &hex::encode(digest)[..12])
}

/// Σ severity_rank × clamp(confidence, 0.2, 1.0), rounded to two decimals.
fn risk_score(deduped: &[Finding]) -> f64 {
    let total: f64 = deduped
        .iter()
        .map(|f| f.severity.rank() as f64 * f.confidence.clamp(0.2, 1.0))
        .sum();
    (total * 100.0).round() / 100.0
}

fn severity_counts(deduped: &[Finding]) -> BTreeMap<String, u64> {
    let mut counts: BTreeMap<String, u64> = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ]
    .iter()
    .map(|s| (s.as_str().to_string(), 0))
    .collect();
    for finding in deduped {
        *counts.entry(finding.severity.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}

fn render_report(ranked: &RankedReport, clusters: &[FindingCluster]) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Review report for run `{}`\n\n", ranked.run_id));
    out.push_str(&format!("Objective: {}\n\n", ranked.objective));
    out.push_str(&format!(
        "Findings: {} raw, {} deduped, {} clusters. Risk score: {}\n\n",
        ranked.raw_count, ranked.deduped_count, ranked.cluster_count, ranked.risk_score
    ));

    out.push_str("## Severity breakdown\n\n| severity | count |\n|---|---|\n");
    for (severity, count) in &ranked.severity_counts {
        out.push_str(&format!("| {severity} | {count} |\n"));
    }

    out.push_str("\n## Top clusters\n\n");
    for cluster in clusters.iter().take(20) {
        out.push_str(&format!(
            "- `{}` [{} / {}] {} ({} findings in {})\n",
            cluster.cluster_id,
            cluster.severity.as_str(),
            cluster.domain,
            cluster.title,
            cluster.count,
            cluster.affected_paths.join(", ")
        ));
    }

    out.push_str("\n## Top findings\n\n");
    for finding in ranked.findings.iter().take(50) {
        let ev = &finding.evidence[0];
        out.push_str(&format!(
            "- [{}] {} ({}:{})\n",
            finding.severity.as_str(),
            finding.title,
            ev.path,
            ev.line_start
        ));
    }
    out
}

/// GitLab-style severity names.
fn code_quality_severity(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "blocker",
        Severity::High => "critical",
        Severity::Medium => "major",
        Severity::Low => "minor",
        Severity::Info => "info",
    }
}

fn code_quality_entries(deduped: &[Finding]) -> Vec<serde_json::Value> {
    deduped
        .iter()
        .map(|finding| {
            let ev = &finding.evidence[0];
            let fingerprint = hex::encode(Sha256::digest(dedupe_key(finding).as_bytes()));
            serde_json::json!({
                "description": format!("{}: {}", finding.title, finding.description),
                "check_name": format!("pi-rlm-{}", finding.domain.as_str()),
                "fingerprint": fingerprint,
                "severity": code_quality_severity(finding.severity),
                "location": {
                    "path": ev.path,
                    "lines": { "begin": ev.line_start }
                }
            })
        })
        .collect()
}

fn title_slug(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn sarif_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical | Severity::High => "error",
        Severity::Medium => "warning",
        Severity::Low | Severity::Info => "note",
    }
}

/// SARIF 2.1.0 with one run and a rule table keyed by `<domain>:<title-slug>`.
fn sarif_document(deduped: &[Finding]) -> serde_json::Value {
    let mut rule_ids: Vec<String> = Vec::new();
    for finding in deduped {
        let rule_id = format!("{}:{}", finding.domain.as_str(), title_slug(&finding.title));
        if !rule_ids.contains(&rule_id) {
            rule_ids.push(rule_id);
        }
    }
    let rules: Vec<serde_json::Value> = rule_ids
        .iter()
        .map(|id| {
            serde_json::json!({
                "id": id,
                "name": id,
            })
        })
        .collect();
    let results: Vec<serde_json::Value> = deduped
        .iter()
        .map(|finding| {
            let ev = &finding.evidence[0];
            serde_json::json!({
                "ruleId": format!("{}:{}", finding.domain.as_str(), title_slug(&finding.title)),
                "level": sarif_level(finding.severity),
                "message": { "text": finding.description },
                "locations": [{
                    "physicalLocation": {
                        "artifactLocation": { "uri": ev.path },
                        "region": {
                            "startLine": ev.line_start,
                            "endLine": ev.line_end
                        }
                    }
                }]
            })
        })
        .collect();

    serde_json::json!({
        "$schema": "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/master/Schemata/sarif-schema-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "pi-rlm",
                    "rules": rules
                }
            },
            "results": results
        }]
    })
}
