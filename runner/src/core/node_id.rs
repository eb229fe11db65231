//! Hierarchical node id construction and label sanitization.

/// Build the root node id for a run.
pub fn root_node_id(run_id: &str) -> String {
    format!("{run_id}:root")
}

/// Build a child node id: `<parent>:<index>:<sanitized_label>`.
pub fn child_node_id(parent_id: &str, index: usize, label: &str) -> String {
    format!("{parent_id}:{index}:{}", sanitize_label(label))
}

/// Lowercase a label and replace anything outside `[a-z0-9]` with `-`,
/// collapsing runs. Empty input maps to `node`.
pub fn sanitize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut last_dash = true;
    for ch in label.chars() {
        let ch = ch.to_ascii_lowercase();
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_matches('-').to_string();
    if trimmed.is_empty() {
        "node".to_string()
    } else {
        trimmed
    }
}

/// Sanitize a full node id into a filename-safe token (used for per-node
/// wiki documents).
pub fn sanitize_node_id(node_id: &str) -> String {
    sanitize_label(node_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_ids_are_hierarchical() {
        let root = root_node_id("run-1");
        assert_eq!(root, "run-1:root");
        assert_eq!(child_node_id(&root, 0, "src"), "run-1:root:0:src");
        assert_eq!(child_node_id(&root, 2, "group-2"), "run-1:root:2:group-2");
    }

    #[test]
    fn sanitize_collapses_and_trims() {
        assert_eq!(sanitize_label("My Module!!name"), "my-module-name");
        assert_eq!(sanitize_label("__"), "node");
        assert_eq!(sanitize_label("a//b"), "a-b");
    }

    #[test]
    fn sanitized_node_ids_are_filename_safe() {
        let id = sanitize_node_id("run-17:root:0:src lib");
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }
}
