//! Bounded directory traversal for scope sizing and sampling.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Metrics collected by a bounded walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeStats {
    pub file_count: u64,
    pub total_bytes: u64,
    pub sampled_files: Vec<PathBuf>,
}

/// Depth-first traversal of `paths`, stopping once `max_files` files have
/// been seen. Symlink cycles are suppressed with a visited set on canonical
/// paths; inaccessible entries are silently skipped. Directory entries are
/// visited in name order so a single run observes a stable ordering.
pub fn walk_scope(paths: &[PathBuf], max_files: usize) -> ScopeStats {
    let mut stats = ScopeStats::default();
    let mut visited: HashSet<PathBuf> = HashSet::new();
    for path in paths {
        walk_entry(path, max_files, &mut visited, &mut stats);
        if stats.file_count as usize >= max_files {
            break;
        }
    }
    stats
}

fn walk_entry(path: &Path, max_files: usize, visited: &mut HashSet<PathBuf>, stats: &mut ScopeStats) {
    if stats.file_count as usize >= max_files {
        return;
    }
    let Ok(canonical) = fs::canonicalize(path) else {
        return;
    };
    if !visited.insert(canonical.clone()) {
        return;
    }
    let Ok(meta) = fs::metadata(&canonical) else {
        return;
    };
    if meta.is_file() {
        stats.file_count += 1;
        stats.total_bytes += meta.len();
        stats.sampled_files.push(path.to_path_buf());
        return;
    }
    if !meta.is_dir() {
        return;
    }
    let Ok(read) = fs::read_dir(&canonical) else {
        return;
    };
    let mut entries: Vec<PathBuf> = read
        .filter_map(|entry| entry.ok().map(|e| path.join(e.file_name())))
        .collect();
    entries.sort();
    for entry in entries {
        if stats.file_count as usize >= max_files {
            return;
        }
        walk_entry(&entry, max_files, visited, stats);
    }
}

/// Per-extension file counts over sampled paths, descending by count then
/// name. Files without an extension land under `none`.
pub fn extension_histogram(files: &[PathBuf]) -> Vec<(String, u64)> {
    let mut counts: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
    for file in files {
        let ext = file
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_else(|| "none".to_string());
        *counts.entry(ext).or_insert(0) += 1;
    }
    let mut out: Vec<(String, u64)> = counts.into_iter().collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}
