//! Git collaborator interface
//!
//! The engine needs exactly four things from version control: a diff, an
//! isolated workspace, a way to merge the workspace's net changes back, and
//! cleanup. Everything else (remotes, PRs, history) is out of scope. The
//! trait keeps the engine testable against an in-memory fake and lets
//! deployments swap the CLI implementation for something else.

use std::path::Path;

use async_trait::async_trait;

use crate::errors::EngineError;

/// Lockfiles excluded from diffs
///
/// Machine-generated churn that drowns the signal when an agent (or a
/// reviewer) reads the diff of a workspace.
pub const DIFF_IGNORE_FILES: &[&str] = &[
    "Cargo.lock",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "poetry.lock",
    "uv.lock",
    "Gemfile.lock",
];

/// Remove ignored-file sections from a unified git diff
pub fn filter_diff(diff_text: &str) -> String {
    if diff_text.is_empty() {
        return String::new();
    }

    let mut kept = Vec::new();
    for section in diff_text.split("diff --git ") {
        if section.trim().is_empty() {
            continue;
        }

        // First line is "a/path b/path"
        let first_line = section.lines().next().unwrap_or("");
        let ignored = DIFF_IGNORE_FILES
            .iter()
            .any(|f| first_line.contains(&format!("a/{f}")) || first_line.contains(&format!("b/{f}")));

        if !ignored {
            kept.push(section);
        }
    }

    if kept.is_empty() {
        return String::new();
    }

    format!("diff --git {}", kept.join("diff --git "))
}

/// Version-control operations the engine depends on
///
/// `repo` is always passed explicitly; implementations must not assume a
/// process-wide current directory.
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Unified diff of the working tree at `path` against its base revision,
    /// with lockfiles filtered out
    async fn diff(&self, path: &Path) -> Result<String, EngineError>;

    /// Create an isolated copy-on-write workspace (branch + worktree) for
    /// `repo` at `path`
    async fn create_workspace(
        &self,
        repo: &Path,
        branch: &str,
        path: &Path,
    ) -> Result<(), EngineError>;

    /// Remove the workspace at `path`, discarding uncommitted state
    async fn remove_workspace(&self, repo: &Path, path: &Path) -> Result<(), EngineError>;

    /// Apply the workspace's net changes back onto the main tree
    ///
    /// Returns `true` if anything was applied, `false` for an empty diff.
    async fn merge_workspace(&self, repo: &Path, path: &Path) -> Result<bool, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_diff_drops_lockfiles() {
        let diff = "diff --git a/src/main.rs b/src/main.rs\n+fn main() {}\n\
                    diff --git a/Cargo.lock b/Cargo.lock\n+version = 3\n";
        let filtered = filter_diff(diff);
        assert!(filtered.contains("src/main.rs"));
        assert!(!filtered.contains("Cargo.lock"));
    }

    #[test]
    fn test_filter_diff_empty_when_all_ignored() {
        let diff = "diff --git a/yarn.lock b/yarn.lock\n+stuff\n";
        assert_eq!(filter_diff(diff), "");
    }

    #[test]
    fn test_filter_diff_passthrough() {
        let diff = "diff --git a/lib.rs b/lib.rs\n-old\n+new\n";
        assert_eq!(filter_diff(diff), diff);
    }
}
