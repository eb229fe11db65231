//! Runner defaults stored under `<base>/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::{RunConfig, SchedulerKind};

/// Default run parameters (TOML).
///
/// This file is intended to be edited by humans; missing fields fall back to
/// the built-in defaults so a partial file stays valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerDefaults {
    pub max_depth: u32,
    pub max_llm_calls: i64,
    pub max_tokens: i64,
    pub max_wall_clock_ms: i64,
    pub scheduler: SchedulerKind,
}

impl Default for RunnerDefaults {
    fn default() -> Self {
        let config = RunConfig::default();
        Self {
            max_depth: config.max_depth,
            max_llm_calls: config.max_llm_calls,
            max_tokens: config.max_tokens,
            max_wall_clock_ms: config.max_wall_clock_ms,
            scheduler: config.scheduler,
        }
    }
}

impl RunnerDefaults {
    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(anyhow!("max_depth must be > 0"));
        }
        if self.max_llm_calls <= 0 {
            return Err(anyhow!("max_llm_calls must be > 0"));
        }
        if self.max_tokens <= 0 {
            return Err(anyhow!("max_tokens must be > 0"));
        }
        if self.max_wall_clock_ms <= 0 {
            return Err(anyhow!("max_wall_clock_ms must be > 0"));
        }
        Ok(())
    }

    pub fn to_run_config(&self) -> RunConfig {
        RunConfig {
            max_depth: self.max_depth,
            max_llm_calls: self.max_llm_calls,
            max_tokens: self.max_tokens,
            max_wall_clock_ms: self.max_wall_clock_ms,
            scheduler: self.scheduler,
        }
    }
}

/// Load defaults from a TOML file; a missing file yields the built-ins.
pub fn load_defaults(path: &Path) -> Result<RunnerDefaults> {
    if !path.exists() {
        let defaults = RunnerDefaults::default();
        defaults.validate()?;
        return Ok(defaults);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let defaults: RunnerDefaults =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    defaults.validate()?;
    Ok(defaults)
}

/// Atomically write defaults to disk (temp file + rename).
pub fn write_defaults(path: &Path, defaults: &RunnerDefaults) -> Result<()> {
    defaults.validate()?;
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut buf = toml::to_string_pretty(defaults).context("serialize config toml")?;
    buf.push('\n');
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
