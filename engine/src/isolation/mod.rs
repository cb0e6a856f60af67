//! Isolation Manager
//!
//! Creates and tears down execution workspaces. Two modes:
//!
//! - **Isolated**: a private git worktree on a fresh branch, so concurrent
//!   executions never see each other's uncommitted edits. On release the
//!   net diff is applied back to the main tree (on success) and the
//!   worktree is removed unconditionally.
//! - **InPlace**: the shared tree, serialized by a mutex. The owned guard
//!   lives inside the `Workspace`, so the lock is released when the
//!   workspace is released or dropped — a panicking executor cannot leak it.

pub mod git_cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sdk::errors::EngineError;
use sdk::git::GitBackend;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

pub use git_cli::CliGit;

/// Workspace isolation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationMode {
    /// Mutate the shared tree under a mutual-exclusion lock
    InPlace,
    /// Private copy-on-write worktree per execution
    #[default]
    Isolated,
}

/// An acquired execution workspace
///
/// In `InPlace` mode the workspace holds the tree lock; dropping the
/// workspace on any path (including a panic unwinding through the executor)
/// releases it.
pub struct Workspace {
    pub mode: IsolationMode,
    pub unit_id: String,
    root: PathBuf,
    branch: Option<String>,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl Workspace {
    /// Directory the executor operates in
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Branch backing an isolated workspace
    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("mode", &self.mode)
            .field("unit_id", &self.unit_id)
            .field("root", &self.root)
            .field("branch", &self.branch)
            .finish()
    }
}

/// Creates and tears down execution workspaces
pub struct IsolationManager {
    repo_root: PathBuf,
    worktrees_dir: PathBuf,
    git: Arc<dyn GitBackend>,
    tree_lock: Arc<Mutex<()>>,
}

impl IsolationManager {
    /// Create a manager for `repo_root`, placing worktrees in `worktrees_dir`
    pub fn new(repo_root: &Path, worktrees_dir: &Path, git: Arc<dyn GitBackend>) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            worktrees_dir: worktrees_dir.to_path_buf(),
            git,
            tree_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Acquire a workspace for a unit
    ///
    /// InPlace acquisition waits until no other in-place execution holds
    /// the shared tree.
    pub async fn acquire(
        &self,
        unit_id: &str,
        slug: &str,
        mode: IsolationMode,
    ) -> Result<Workspace, EngineError> {
        match mode {
            IsolationMode::InPlace => {
                let guard = Arc::clone(&self.tree_lock).lock_owned().await;
                debug!(unit = unit_id, "in-place workspace acquired");
                Ok(Workspace {
                    mode,
                    unit_id: unit_id.to_string(),
                    root: self.repo_root.clone(),
                    branch: None,
                    _guard: Some(guard),
                })
            }
            IsolationMode::Isolated => {
                fs::create_dir_all(&self.worktrees_dir).await.map_err(|e| {
                    EngineError::Isolation(format!(
                        "cannot create {}: {e}",
                        self.worktrees_dir.display()
                    ))
                })?;

                let name = format!("{unit_id}-{slug}");
                let branch = format!("cairn/{name}");
                let path = self.worktrees_dir.join(&name);

                // A crashed prior run may have left the worktree behind.
                if path.exists() {
                    warn!(path = %path.display(), "removing stale worktree");
                    if let Err(e) = self.git.remove_workspace(&self.repo_root, &path).await {
                        warn!(error = %e, "stale worktree removal failed");
                    }
                }

                self.git
                    .create_workspace(&self.repo_root, &branch, &path)
                    .await?;

                debug!(unit = unit_id, path = %path.display(), "isolated workspace created");
                Ok(Workspace {
                    mode,
                    unit_id: unit_id.to_string(),
                    root: path,
                    branch: Some(branch),
                    _guard: None,
                })
            }
        }
    }

    /// Release a workspace, merging its net changes back when asked
    ///
    /// Cleanup is unconditional: the worktree is removed whether or not the
    /// merge succeeded and whether or not the unit succeeded. Returns
    /// whether any changes were applied to the main tree.
    pub async fn release(&self, workspace: Workspace, merge: bool) -> Result<bool, EngineError> {
        match workspace.mode {
            IsolationMode::InPlace => {
                // Edits already happened in the shared tree; dropping the
                // workspace releases the lock.
                debug!(unit = %workspace.unit_id, "in-place workspace released");
                Ok(false)
            }
            IsolationMode::Isolated => {
                let merge_result = if merge {
                    self.git
                        .merge_workspace(&self.repo_root, workspace.root())
                        .await
                } else {
                    Ok(false)
                };

                if let Err(e) = self
                    .git
                    .remove_workspace(&self.repo_root, workspace.root())
                    .await
                {
                    warn!(unit = %workspace.unit_id, error = %e, "worktree cleanup failed");
                }

                debug!(unit = %workspace.unit_id, merged = merge, "isolated workspace released");
                merge_result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::tempdir;

    use super::*;

    /// In-memory git fake: "worktree" is a plain directory copy target.
    #[derive(Default)]
    struct FakeGit {
        merges: AtomicUsize,
        removes: AtomicUsize,
        fail_merge: bool,
    }

    #[async_trait]
    impl GitBackend for FakeGit {
        async fn diff(&self, _path: &Path) -> Result<String, EngineError> {
            Ok(String::new())
        }

        async fn create_workspace(
            &self,
            _repo: &Path,
            _branch: &str,
            path: &Path,
        ) -> Result<(), EngineError> {
            std::fs::create_dir_all(path).map_err(EngineError::Io)?;
            Ok(())
        }

        async fn remove_workspace(&self, _repo: &Path, path: &Path) -> Result<(), EngineError> {
            self.removes.fetch_add(1, Ordering::SeqCst);
            let _ = std::fs::remove_dir_all(path);
            Ok(())
        }

        async fn merge_workspace(&self, _repo: &Path, _path: &Path) -> Result<bool, EngineError> {
            if self.fail_merge {
                return Err(EngineError::Isolation("merge failed".into()));
            }
            self.merges.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_isolated_acquire_release_cleans_up() {
        let repo = tempdir().expect("tempdir");
        let trees = tempdir().expect("tempdir");
        let git = Arc::new(FakeGit::default());
        let manager = IsolationManager::new(repo.path(), trees.path(), Arc::clone(&git) as _);

        let ws = manager
            .acquire("007", "fix-login", IsolationMode::Isolated)
            .await
            .expect("acquire");
        let ws_path = ws.root().to_path_buf();
        assert!(ws_path.exists());

        let applied = manager.release(ws, true).await.expect("release");
        assert!(applied);
        assert!(!ws_path.exists());
        assert_eq!(git.merges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_without_merge_discards() {
        let repo = tempdir().expect("tempdir");
        let trees = tempdir().expect("tempdir");
        let git = Arc::new(FakeGit::default());
        let manager = IsolationManager::new(repo.path(), trees.path(), Arc::clone(&git) as _);

        let ws = manager
            .acquire("008", "failed-unit", IsolationMode::Isolated)
            .await
            .expect("acquire");
        let applied = manager.release(ws, false).await.expect("release");
        assert!(!applied);
        assert_eq!(git.merges.load(Ordering::SeqCst), 0);
        assert_eq!(git.removes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cleanup_happens_even_when_merge_fails() {
        let repo = tempdir().expect("tempdir");
        let trees = tempdir().expect("tempdir");
        let git = Arc::new(FakeGit {
            fail_merge: true,
            ..Default::default()
        });
        let manager = IsolationManager::new(repo.path(), trees.path(), Arc::clone(&git) as _);

        let ws = manager
            .acquire("009", "merge-fails", IsolationMode::Isolated)
            .await
            .expect("acquire");
        let err = manager.release(ws, true).await.expect_err("merge error");
        assert!(matches!(err, EngineError::Isolation(_)));
        assert_eq!(git.removes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_in_place_lock_serializes() {
        let repo = tempdir().expect("tempdir");
        let trees = tempdir().expect("tempdir");
        let git = Arc::new(FakeGit::default());
        let manager = Arc::new(IsolationManager::new(
            repo.path(),
            trees.path(),
            Arc::clone(&git) as _,
        ));

        let ws1 = manager
            .acquire("001", "first", IsolationMode::InPlace)
            .await
            .expect("acquire");

        // A second in-place acquire must wait until the first is released.
        let second = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .acquire("002", "second", IsolationMode::InPlace)
                    .await
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        manager.release(ws1, false).await.expect("release");
        let ws2 = second.await.expect("join").expect("acquire");
        manager.release(ws2, false).await.expect("release");
    }

    #[tokio::test]
    async fn test_in_place_lock_released_on_drop() {
        let repo = tempdir().expect("tempdir");
        let trees = tempdir().expect("tempdir");
        let git = Arc::new(FakeGit::default());
        let manager = IsolationManager::new(repo.path(), trees.path(), Arc::clone(&git) as _);

        {
            let _ws = manager
                .acquire("001", "dropped", IsolationMode::InPlace)
                .await
                .expect("acquire");
            // Dropped without an explicit release (the panic path).
        }

        // The lock must be free again.
        let ws = manager
            .acquire("002", "after-drop", IsolationMode::InPlace)
            .await
            .expect("acquire");
        manager.release(ws, false).await.expect("release");
    }
}
