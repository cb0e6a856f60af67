//! Git CLI backend
//!
//! Implements the `GitBackend` collaborator by shelling out to the `git`
//! binary. Every invocation pins its repository with `-C`; nothing here
//! depends on the process working directory.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::git::{filter_diff, GitBackend};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// `git` subprocess backend
#[derive(Debug, Default, Clone)]
pub struct CliGit;

impl CliGit {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, repo: &Path, args: &[&str]) -> Result<String, EngineError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::Isolation(format!("failed to spawn git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Isolation(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&"?"),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run git, ignoring failure (cleanup paths)
    async fn run_ignore(&self, repo: &Path, args: &[&str]) {
        let _ = self.run(repo, args).await;
    }
}

#[async_trait]
impl GitBackend for CliGit {
    async fn diff(&self, path: &Path) -> Result<String, EngineError> {
        let raw = self.run(path, &["diff", "HEAD"]).await?;
        Ok(filter_diff(&raw))
    }

    async fn create_workspace(
        &self,
        repo: &Path,
        branch: &str,
        path: &Path,
    ) -> Result<(), EngineError> {
        // A branch left behind by a crashed run would make worktree add
        // fail; clear it first.
        self.run_ignore(repo, &["branch", "-D", branch]).await;

        let path_str = path.to_string_lossy();
        self.run(repo, &["worktree", "add", "-b", branch, &path_str])
            .await?;
        debug!(branch, path = %path.display(), "worktree created");
        Ok(())
    }

    async fn remove_workspace(&self, repo: &Path, path: &Path) -> Result<(), EngineError> {
        let path_str = path.to_string_lossy();
        let removed = self
            .run(repo, &["worktree", "remove", "--force", &path_str])
            .await;
        if removed.is_err() {
            // The worktree may be gone already; make sure the directory and
            // the registration are.
            let _ = tokio::fs::remove_dir_all(path).await;
            self.run_ignore(repo, &["worktree", "prune"]).await;
        }

        // Discard the backing branch; net changes were applied (or
        // deliberately dropped) by merge_workspace.
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            self.run_ignore(repo, &["branch", "-D", &format!("cairn/{name}")])
                .await;
        }
        Ok(())
    }

    async fn merge_workspace(&self, repo: &Path, path: &Path) -> Result<bool, EngineError> {
        // Stage everything in the worktree so new files show up in the
        // diff, then replay that diff onto the main tree.
        self.run(path, &["add", "-A"]).await?;
        let raw = self.run(path, &["diff", "--cached", "HEAD"]).await?;
        let patch = filter_diff(&raw);
        if patch.trim().is_empty() {
            return Ok(false);
        }

        let mut child = Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(["apply", "--whitespace=nowarn", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::Isolation(format!("failed to spawn git apply: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(patch.as_bytes())
                .await
                .map_err(|e| EngineError::Isolation(format!("failed to feed git apply: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EngineError::Isolation(format!("git apply did not finish: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Isolation(format!(
                "git apply failed: {}",
                stderr.trim()
            )));
        }

        debug!(path = %path.display(), "workspace changes applied to main tree");
        Ok(true)
    }
}
