//! Orchestrator
//!
//! The top-level scheduler: resolves a selection pattern to ready work
//! units, builds a context bundle per unit, acquires isolation, dispatches
//! the external agent executor, applies results back to the registry, and
//! codifies learnings. Units run on a bounded worker pool; one unit's
//! failure never aborts the batch.

pub mod pattern;
pub mod process;
pub mod report;

use std::path::{Component, Path};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use sdk::errors::EngineError;
use sdk::executor::{ExecutionOutcome, FileEdit};
use tokio::fs;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::context::{ContextAssembler, ContextBundle};
use crate::isolation::{IsolationManager, IsolationMode, Workspace};
use crate::knowledge::{KnowledgeStore, Learning};
use crate::registry::{UnitFilter, UnitStatus, WorkUnit, WorkUnitRegistry};

pub use pattern::Pattern;
pub use process::ProcessExecutor;
pub use report::{OutcomeKind, RunReport, UnitOutcome};

/// The external agent executor boundary
///
/// Opaque, possibly slow, possibly failing. The orchestrator wraps every
/// invocation in a timeout; implementations need no timeout of their own.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(
        &self,
        bundle: &ContextBundle,
        workspace: &Workspace,
    ) -> Result<ExecutionOutcome, EngineError>;
}

/// Per-run options
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Hard cap on concurrently executing units
    pub concurrency: usize,
    pub isolation: IsolationMode,
    /// Build bundles and report without claiming or executing
    pub dry_run: bool,
    /// Wall-clock cap per executor invocation
    pub timeout: Duration,
}

/// Top-level scheduler over the registry, context engine and executor
pub struct Orchestrator {
    registry: Arc<WorkUnitRegistry>,
    assembler: Arc<ContextAssembler>,
    isolation: Arc<IsolationManager>,
    knowledge: Arc<KnowledgeStore>,
    executor: Arc<dyn AgentExecutor>,
    budget: usize,
    reserve: usize,
    cancelled: Arc<AtomicBool>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<WorkUnitRegistry>,
        assembler: Arc<ContextAssembler>,
        isolation: Arc<IsolationManager>,
        knowledge: Arc<KnowledgeStore>,
        executor: Arc<dyn AgentExecutor>,
        budget: usize,
        reserve: usize,
    ) -> Self {
        Self {
            registry,
            assembler,
            isolation,
            knowledge,
            executor,
            budget,
            reserve,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for signalling cancellation from another task
    ///
    /// Cancellation is cooperative: in-flight units finish, unclaimed units
    /// are skipped. Nothing is interrupted mid-execution.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Execute all ready units matching `pattern`
    ///
    /// Configuration problems abort before anything is claimed; per-unit
    /// errors are contained to their unit. The report lists every attempted
    /// unit in completion order.
    pub async fn run(&self, pattern: &Pattern, opts: &RunOptions) -> Result<RunReport, EngineError> {
        if opts.concurrency < 1 {
            return Err(EngineError::Validation("concurrency must be at least 1".into()));
        }
        if self.reserve >= self.budget {
            return Err(EngineError::Validation(format!(
                "reserve ({}) must be smaller than budget ({})",
                self.reserve, self.budget
            )));
        }

        self.cancelled.store(false, Ordering::SeqCst);
        let started = Instant::now();

        let ready = self.registry.list(&UnitFilter::status(UnitStatus::Ready)).await?;
        let selected: Vec<WorkUnit> = ready.into_iter().filter(|u| pattern.matches(u)).collect();

        info!(pattern = %pattern, units = selected.len(), dry_run = opts.dry_run, "run starting");

        if opts.dry_run {
            let mut outcomes = Vec::new();
            for unit in selected {
                outcomes.push(self.plan_unit(unit).await);
            }
            return Ok(RunReport {
                outcomes,
                dry_run: true,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        let semaphore = Arc::new(Semaphore::new(opts.concurrency));
        let mut in_flight = FuturesUnordered::new();

        for (index, unit) in selected.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let worker = format!("worker-{}", index % opts.concurrency.max(1) + 1);
            in_flight.push(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return self.skipped(&unit, "scheduler shut down", 0);
                };
                if self.cancelled.load(Ordering::SeqCst) {
                    return self.skipped(&unit, "run cancelled before claim", 0);
                }
                self.resolve_unit(unit, &worker, opts).await
            });
        }

        // Completion order, not submission order.
        let mut outcomes = Vec::new();
        while let Some(outcome) = in_flight.next().await {
            outcomes.push(outcome);
        }

        let report = RunReport {
            outcomes,
            dry_run: false,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(summary = %report.summary(), "run finished");
        Ok(report)
    }

    /// Dry-run path: build the bundle, touch nothing
    async fn plan_unit(&self, unit: WorkUnit) -> UnitOutcome {
        let started = Instant::now();
        match self.assembler.build(&unit, self.budget, self.reserve).await {
            Ok(bundle) => UnitOutcome {
                unit_id: unit.id,
                title: unit.title,
                kind: OutcomeKind::Skipped,
                detail: format!(
                    "dry run: {} files, {} excerpts",
                    bundle.items.len(),
                    bundle.knowledge_excerpts.len()
                ),
                learning_id: None,
                bundle_tokens: Some(bundle.total_tokens),
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Err(e) => UnitOutcome {
                unit_id: unit.id,
                title: unit.title,
                kind: OutcomeKind::Failed,
                detail: format!("context assembly failed: {e}"),
                learning_id: None,
                bundle_tokens: None,
                duration_ms: started.elapsed().as_millis() as u64,
            },
        }
    }

    /// Claim, execute and resolve one unit
    ///
    /// Result application (status transition, then learning save) strictly
    /// precedes workspace release.
    async fn resolve_unit(&self, unit: WorkUnit, worker: &str, opts: &RunOptions) -> UnitOutcome {
        let started = Instant::now();
        let elapsed = |s: Instant| s.elapsed().as_millis() as u64;

        // Claim is the exclusivity gate; losing it is routine.
        let unit = match self.registry.claim(&unit.id, worker).await {
            Ok(unit) => unit,
            Err(EngineError::ClaimConflict(_)) => {
                return self.skipped(&unit, "claimed by another worker", elapsed(started));
            }
            Err(e) => return self.failed_unrecorded(&unit, &e.to_string(), elapsed(started)),
        };

        let bundle = match self.assembler.build(&unit, self.budget, self.reserve).await {
            Ok(bundle) => bundle,
            Err(e) => {
                let cause = format!("context assembly failed: {e}");
                self.mark_failed(&unit.id, &cause).await;
                return self.failed(&unit, &cause, None, elapsed(started));
            }
        };

        let workspace = match self
            .isolation
            .acquire(&unit.id, &unit.slug(), opts.isolation)
            .await
        {
            Ok(workspace) => workspace,
            Err(e) => {
                let cause = format!("workspace acquisition failed: {e}");
                self.mark_failed(&unit.id, &cause).await;
                return self.failed(&unit, &cause, Some(bundle.total_tokens), elapsed(started));
            }
        };

        let execution = match tokio::time::timeout(
            opts.timeout,
            self.executor.execute(&bundle, &workspace),
        )
        .await
        {
            Ok(Ok(outcome)) if outcome.success => Ok(outcome),
            Ok(Ok(outcome)) => Err(outcome.cause().to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(EngineError::ExecutorTimeout(opts.timeout.as_secs()).to_string()),
        };

        match execution {
            Ok(outcome) => {
                if let Err(e) = apply_edits(workspace.root(), &outcome.changes).await {
                    let cause = format!("applying edits failed: {e}");
                    self.mark_failed(&unit.id, &cause).await;
                    self.release_quietly(workspace, false).await;
                    return self.failed(&unit, &cause, Some(bundle.total_tokens), elapsed(started));
                }

                // Status first: losing a learning is recoverable, losing
                // status tracking is not.
                let mut detail = outcome.summary.clone();
                if let Err(e) = self
                    .registry
                    .transition(&unit.id, UnitStatus::Complete, &outcome.summary)
                    .await
                {
                    warn!(unit = %unit.id, error = %e, "completion transition failed");
                    detail = format!("{detail} (status update failed: {e})");
                }

                let learning_id = match self.knowledge.save(&self.codify(&unit, &outcome)).await {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!(unit = %unit.id, error = %e, "learning save failed");
                        None
                    }
                };

                if let Err(e) = self.isolation.release(workspace, true).await {
                    warn!(unit = %unit.id, error = %e, "merge on release failed");
                    detail = format!("{detail} (merge failed: {e})");
                }

                UnitOutcome {
                    unit_id: unit.id.clone(),
                    title: unit.title.clone(),
                    kind: OutcomeKind::Completed,
                    detail,
                    learning_id,
                    bundle_tokens: Some(bundle.total_tokens),
                    duration_ms: elapsed(started),
                }
            }
            Err(cause) => {
                self.mark_failed(&unit.id, &cause).await;
                self.release_quietly(workspace, false).await;
                self.failed(&unit, &cause, Some(bundle.total_tokens), elapsed(started))
            }
        }
    }

    /// Build the learning codified from a successful resolution
    fn codify(&self, unit: &WorkUnit, outcome: &ExecutionOutcome) -> Learning {
        let mut tags: std::collections::BTreeSet<String> =
            unit.tags.iter().cloned().collect();
        tags.insert(unit.kind.as_str().to_string());

        Learning::new(
            "work-resolutions",
            format!("Resolved: {}", unit.title),
            format!(
                "{}\n\nUnit {} ({}), {} file edits.",
                outcome.summary,
                unit.id,
                unit.kind.as_str(),
                outcome.changes.len()
            ),
            tags,
            unit.id.clone(),
        )
    }

    async fn mark_failed(&self, id: &str, cause: &str) {
        if let Err(e) = self.registry.transition(id, UnitStatus::Failed, cause).await {
            warn!(unit = id, error = %e, "failure transition failed");
        }
    }

    async fn release_quietly(&self, workspace: Workspace, merge: bool) {
        let unit_id = workspace.unit_id.clone();
        if let Err(e) = self.isolation.release(workspace, merge).await {
            warn!(unit = %unit_id, error = %e, "workspace release failed");
        }
    }

    fn skipped(&self, unit: &WorkUnit, reason: &str, duration_ms: u64) -> UnitOutcome {
        UnitOutcome {
            unit_id: unit.id.clone(),
            title: unit.title.clone(),
            kind: OutcomeKind::Skipped,
            detail: reason.to_string(),
            learning_id: None,
            bundle_tokens: None,
            duration_ms,
        }
    }

    fn failed(
        &self,
        unit: &WorkUnit,
        cause: &str,
        bundle_tokens: Option<usize>,
        duration_ms: u64,
    ) -> UnitOutcome {
        UnitOutcome {
            unit_id: unit.id.clone(),
            title: unit.title.clone(),
            kind: OutcomeKind::Failed,
            detail: cause.to_string(),
            learning_id: None,
            bundle_tokens,
            duration_ms,
        }
    }

    /// Failure before the unit was claimed; registry state untouched
    fn failed_unrecorded(&self, unit: &WorkUnit, cause: &str, duration_ms: u64) -> UnitOutcome {
        self.failed(unit, cause, None, duration_ms)
    }
}

/// Write executor edits under the workspace root
///
/// Rejects absolute paths and parent-dir traversal before touching the
/// filesystem.
async fn apply_edits(root: &Path, edits: &[FileEdit]) -> Result<usize, EngineError> {
    for edit in edits {
        let rel = Path::new(&edit.path);
        let escapes = rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir));
        if escapes {
            return Err(EngineError::Executor(format!(
                "edit escapes the workspace: {}",
                edit.path
            )));
        }
    }

    for edit in edits {
        let target = root.join(&edit.path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(EngineError::Io)?;
        }
        fs::write(&target, edit.content.as_bytes())
            .await
            .map_err(EngineError::Io)?;
    }

    Ok(edits.len())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_apply_edits_writes_files() {
        let dir = tempdir().expect("tempdir");
        let edits = vec![
            FileEdit::new("src/a.rs", "fn a() {}\n"),
            FileEdit::new("docs/b.md", "# b\n"),
        ];
        let written = apply_edits(dir.path(), &edits).await.expect("apply");
        assert_eq!(written, 2);
        assert!(dir.path().join("src/a.rs").exists());
        assert!(dir.path().join("docs/b.md").exists());
    }

    #[tokio::test]
    async fn test_apply_edits_rejects_traversal() {
        let dir = tempdir().expect("tempdir");
        let edits = vec![FileEdit::new("../outside.rs", "nope")];
        let err = apply_edits(dir.path(), &edits).await.expect_err("reject");
        assert!(matches!(err, EngineError::Executor(_)));

        let edits = vec![FileEdit::new("/etc/passwd", "nope")];
        assert!(apply_edits(dir.path(), &edits).await.is_err());
    }

    #[tokio::test]
    async fn test_apply_edits_all_or_nothing_validation() {
        let dir = tempdir().expect("tempdir");
        // The bad edit is rejected before the good one is written.
        let edits = vec![
            FileEdit::new("../escape.rs", "nope"),
            FileEdit::new("ok.rs", "fine"),
        ];
        assert!(apply_edits(dir.path(), &edits).await.is_err());
        assert!(!dir.path().join("ok.rs").exists());
    }
}
