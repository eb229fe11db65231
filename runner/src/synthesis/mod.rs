//! Synthesis of run-level artifacts from terminal node results.
//!
//! Synthesis is deterministic: rerunning it over unchanged logs rewrites
//! byte-identical artifact bodies.

pub mod export;
pub mod review;
pub mod wiki;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::core::types::{ArtifactRef, Run, RunMode};
use crate::io::store::RunStore;
use crate::scheduler::dedupe_artifacts;

/// What to synthesize. `auto` follows the run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisTarget {
    Auto,
    Wiki,
    Review,
    All,
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisOutcome {
    pub run: Run,
    pub artifacts: Vec<ArtifactRef>,
}

/// Synthesize the requested artifacts and merge them into the run's output
/// index (deduped on kind/path, sorted by path).
#[instrument(skip_all, fields(run_id = %run_id, synthesis_target = ?target))]
pub fn synthesize_run(
    store: &RunStore,
    run_id: &str,
    target: SynthesisTarget,
) -> Result<SynthesisOutcome> {
    let mut run = store.get_run(run_id)?;
    let results = store.load_results(run_id)?;
    let nodes = store.load_nodes(run_id)?;

    let (do_wiki, do_review) = match target {
        SynthesisTarget::Wiki => (true, false),
        SynthesisTarget::Review => (false, true),
        SynthesisTarget::All => (true, true),
        SynthesisTarget::Auto => (run.mode == RunMode::Wiki, run.mode == RunMode::Review),
    };

    let mut produced = Vec::new();
    if do_wiki {
        produced.extend(wiki::synthesize_wiki(store, &run, &nodes, &results)?);
    }
    if do_review {
        produced.extend(review::synthesize_review(store, &run, &results)?);
    }

    let mut index = run.output_index.clone();
    index.extend(produced.iter().cloned());
    run.output_index = dedupe_artifacts(index);
    store.set_run(&run)?;

    Ok(SynthesisOutcome {
        artifacts: run.output_index.clone(),
        run,
    })
}

/// Focus tags derived from keyword matches on the objective text.
pub fn objective_tags(objective: &str) -> Vec<String> {
    let lower = objective.to_lowercase();
    ["security", "performance", "quality", "docs", "architecture"]
        .iter()
        .filter(|tag| lower.contains(*tag))
        .map(|tag| tag.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn objective_tags_match_keywords() {
        let tags = objective_tags("Review security and performance of the parser");
        assert_eq!(tags, vec!["security".to_string(), "performance".to_string()]);
        assert!(objective_tags("summarize the repo").is_empty());
    }
}
