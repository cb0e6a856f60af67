//! End-to-end orchestrator scenarios against a scripted executor and an
//! in-memory git fake.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use cairn_engine::config::ContextConfig;
use cairn_engine::context::{ContextAssembler, ContextBundle};
use cairn_engine::isolation::{IsolationManager, IsolationMode, Workspace};
use cairn_engine::knowledge::{KeywordIndex, KnowledgeStore};
use cairn_engine::orchestrator::{AgentExecutor, Orchestrator, Pattern, RunOptions};
use cairn_engine::registry::{
    Payload, Priority, UnitFilter, UnitKind, UnitStatus, WorkUnitRegistry,
};
use sdk::errors::EngineError;
use sdk::executor::{ExecutionOutcome, FileEdit};
use sdk::git::GitBackend;

/// Git fake: workspaces are plain directories, merges are no-ops.
#[derive(Default)]
struct FakeGit;

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
        let _ = std::fs::remove_dir_all(path);
        Ok(())
    }

    async fn merge_workspace(&self, _repo: &Path, _path: &Path) -> Result<bool, EngineError> {
        Ok(true)
    }
}

/// Scripted executor: fails units whose title contains a marker, counts
/// invocations, optionally writes edits, sleeps, or cancels the run.
struct MockExecutor {
    invocations: AtomicUsize,
    edits: Vec<FileEdit>,
    sleep: Option<Duration>,
    cancel_flag: std::sync::Mutex<Option<Arc<AtomicBool>>>,
}

impl MockExecutor {
    fn new() -> Self {
        Self {
            invocations: AtomicUsize::new(0),
            edits: Vec::new(),
            sleep: None,
            cancel_flag: std::sync::Mutex::new(None),
        }
    }

    fn with_edits(mut self, edits: Vec<FileEdit>) -> Self {
        self.edits = edits;
        self
    }

    fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = Some(sleep);
        self
    }

    /// Make every execution flip the run's cancel flag
    fn set_cancel_flag(&self, flag: Arc<AtomicBool>) {
        *self.cancel_flag.lock().expect("lock") = Some(flag);
    }
}

#[async_trait]
impl AgentExecutor for MockExecutor {
    async fn execute(
        &self,
        bundle: &ContextBundle,
        _workspace: &Workspace,
    ) -> Result<ExecutionOutcome, EngineError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        if let Some(sleep) = self.sleep {
            tokio::time::sleep(sleep).await;
        }
        if let Some(flag) = self.cancel_flag.lock().expect("lock").as_ref() {
            flag.store(true, Ordering::SeqCst);
        }

        if bundle.task.contains("always-fails") {
            return Ok(ExecutionOutcome::failure("scripted failure"));
        }

        Ok(ExecutionOutcome::success(format!("resolved unit {}", bundle.unit_id))
            .with_changes(self.edits.clone()))
    }
}

struct Harness {
    _repo: TempDir,
    _data: TempDir,
    registry: Arc<WorkUnitRegistry>,
    knowledge: Arc<KnowledgeStore>,
    orchestrator: Orchestrator,
    repo_path: std::path::PathBuf,
}

async fn harness(executor: Arc<dyn AgentExecutor>) -> Harness {
    let repo = TempDir::new().expect("repo dir");
    let data = TempDir::new().expect("data dir");
    std::fs::create_dir_all(repo.path().join("src")).expect("mkdir");
    std::fs::write(repo.path().join("src/lib.rs"), "pub fn lib() {}\n").expect("write");
    std::fs::write(repo.path().join("README.md"), "# Fixture\n").expect("write");

    let registry = Arc::new(
        WorkUnitRegistry::open(&data.path().join("todos"))
            .await
            .expect("registry"),
    );
    let knowledge = Arc::new(
        KnowledgeStore::open(
            &data.path().join("knowledge"),
            Box::new(KeywordIndex::new()),
            0.3,
        )
        .await
        .expect("knowledge"),
    );
    let assembler = Arc::new(ContextAssembler::new(
        repo.path(),
        ContextConfig::default(),
        Arc::clone(&knowledge),
        5,
    ));
    let isolation = Arc::new(IsolationManager::new(
        repo.path(),
        &data.path().join("worktrees"),
        Arc::new(FakeGit),
    ));

    let orchestrator = Orchestrator::new(
        Arc::clone(&registry),
        assembler,
        isolation,
        Arc::clone(&knowledge),
        executor,
        20_000,
        1_000,
    );

    let repo_path = repo.path().to_path_buf();
    Harness {
        _repo: repo,
        _data: data,
        registry,
        knowledge,
        orchestrator,
        repo_path,
    }
}

async fn ready_unit(h: &Harness, title: &str, priority: Priority) -> String {
    let unit = h
        .registry
        .create(
            title,
            UnitKind::AdHoc,
            priority,
            Payload {
                description: format!("{title} description"),
                ..Default::default()
            },
            vec![],
        )
        .await
        .expect("create");
    h.registry.approve(&unit.id, "test").await.expect("approve");
    unit.id
}

fn opts(concurrency: usize) -> RunOptions {
    RunOptions {
        concurrency,
        isolation: IsolationMode::InPlace,
        dry_run: false,
        timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_mixed_success_and_failure() {
    let executor = Arc::new(MockExecutor::new());
    let h = harness(Arc::clone(&executor) as _).await;

    ready_unit(&h, "first task", Priority::P2).await;
    ready_unit(&h, "always-fails task", Priority::P2).await;
    ready_unit(&h, "third task", Priority::P2).await;

    let report = h
        .orchestrator
        .run(&Pattern::All, &opts(3))
        .await
        .expect("run");

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.completed(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(executor.invocations.load(Ordering::SeqCst), 3);

    // One failure never aborts the batch, and learnings exist only for the
    // two successes.
    let learnings = h.knowledge.load_all().await;
    assert_eq!(learnings.len(), 2);

    let complete = h
        .registry
        .list(&UnitFilter::status(UnitStatus::Complete))
        .await
        .expect("list");
    let failed = h
        .registry
        .list(&UnitFilter::status(UnitStatus::Failed))
        .await
        .expect("list");
    assert_eq!(complete.len(), 2);
    assert_eq!(failed.len(), 1);
    assert!(failed[0].title.contains("always-fails"));
    // The failure cause is recorded on the unit's history.
    assert!(failed[0]
        .history
        .iter()
        .any(|entry| entry.note.contains("scripted failure")));
}

#[tokio::test]
async fn test_dry_run_claims_and_executes_nothing() {
    let executor = Arc::new(MockExecutor::new());
    let h = harness(Arc::clone(&executor) as _).await;

    ready_unit(&h, "untouched", Priority::P2).await;

    let report = h
        .orchestrator
        .run(
            &Pattern::All,
            &RunOptions {
                dry_run: true,
                ..opts(3)
            },
        )
        .await
        .expect("run");

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.skipped(), 1);
    assert!(report.outcomes[0].bundle_tokens.is_some());
    assert_eq!(executor.invocations.load(Ordering::SeqCst), 0);

    let ready = h
        .registry
        .list(&UnitFilter::status(UnitStatus::Ready))
        .await
        .expect("list");
    assert_eq!(ready.len(), 1);
    assert!(h.knowledge.load_all().await.is_empty());
}

#[tokio::test]
async fn test_validation_aborts_before_any_claim() {
    let h = harness(Arc::new(MockExecutor::new())).await;
    ready_unit(&h, "untouched", Priority::P2).await;

    let err = h
        .orchestrator
        .run(&Pattern::All, &opts(0))
        .await
        .expect_err("validation");
    assert!(matches!(err, EngineError::Validation(_)));

    let ready = h
        .registry
        .list(&UnitFilter::status(UnitStatus::Ready))
        .await
        .expect("list");
    assert_eq!(ready.len(), 1);
}

#[tokio::test]
async fn test_pattern_selects_by_priority() {
    let executor = Arc::new(MockExecutor::new());
    let h = harness(Arc::clone(&executor) as _).await;

    let p1 = ready_unit(&h, "urgent", Priority::P1).await;
    ready_unit(&h, "later", Priority::P3).await;

    let report = h
        .orchestrator
        .run(&Pattern::ByPriority(Priority::P1), &opts(2))
        .await
        .expect("run");

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].unit_id, p1);
    assert_eq!(executor.invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_edits_land_in_workspace() {
    let executor = Arc::new(
        MockExecutor::new().with_edits(vec![FileEdit::new("src/fixed.rs", "pub fn fixed() {}\n")]),
    );
    let h = harness(Arc::clone(&executor) as _).await;

    ready_unit(&h, "apply edits", Priority::P2).await;
    let report = h
        .orchestrator
        .run(&Pattern::All, &opts(1))
        .await
        .expect("run");

    assert_eq!(report.completed(), 1);
    // InPlace mode: the workspace is the repo itself.
    let written = std::fs::read_to_string(h.repo_path.join("src/fixed.rs")).expect("written");
    assert!(written.contains("fixed"));
}

#[tokio::test]
async fn test_executor_timeout_fails_unit_and_releases() {
    let executor = Arc::new(MockExecutor::new().with_sleep(Duration::from_millis(300)));
    let h = harness(Arc::clone(&executor) as _).await;

    ready_unit(&h, "too slow", Priority::P2).await;

    let report = h
        .orchestrator
        .run(
            &Pattern::All,
            &RunOptions {
                timeout: Duration::from_millis(100),
                ..opts(1)
            },
        )
        .await
        .expect("run");

    assert_eq!(report.failed(), 1);
    assert!(report.outcomes[0].detail.contains("timed out"));

    // The in-place lock was released despite the timeout: a second unit
    // must run to completion instead of hanging on the lock.
    ready_unit(&h, "after timeout", Priority::P2).await;
    let second = h
        .orchestrator
        .run(&Pattern::All, &opts(1))
        .await
        .expect("run");
    assert_eq!(second.completed(), 1);
}

#[tokio::test]
async fn test_cancellation_skips_unclaimed_units() {
    // The first execution flips the cancel flag; with concurrency 1 the
    // remaining units must be skipped without being claimed.
    let executor = Arc::new(MockExecutor::new());
    let h = harness(Arc::clone(&executor) as _).await;
    executor.set_cancel_flag(h.orchestrator.cancel_flag());

    ready_unit(&h, "one", Priority::P2).await;
    ready_unit(&h, "two", Priority::P2).await;
    ready_unit(&h, "three", Priority::P2).await;

    let report = h
        .orchestrator
        .run(&Pattern::All, &opts(1))
        .await
        .expect("run");

    assert_eq!(report.completed(), 1);
    assert_eq!(report.skipped(), 2);

    let ready = h
        .registry
        .list(&UnitFilter::status(UnitStatus::Ready))
        .await
        .expect("list");
    assert_eq!(ready.len(), 2);
}

#[tokio::test]
async fn test_codified_learning_is_retrievable() {
    let executor = Arc::new(MockExecutor::new());
    let h = harness(Arc::clone(&executor) as _).await;

    let id = ready_unit(&h, "harden login validation", Priority::P1).await;
    let report = h
        .orchestrator
        .run(&Pattern::ById(id.clone()), &opts(1))
        .await
        .expect("run");
    assert_eq!(report.completed(), 1);
    assert!(report.outcomes[0].learning_id.is_some());

    let hits = h
        .knowledge
        .retrieve("harden login validation", &[], 5)
        .await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source, id);
}

#[tokio::test]
async fn test_isolated_mode_uses_worktree() {
    let executor = Arc::new(
        MockExecutor::new().with_edits(vec![FileEdit::new("patch.rs", "// patched\n")]),
    );
    let h = harness(Arc::clone(&executor) as _).await;

    ready_unit(&h, "isolated work", Priority::P2).await;
    let report = h
        .orchestrator
        .run(
            &Pattern::All,
            &RunOptions {
                isolation: IsolationMode::Isolated,
                ..opts(1)
            },
        )
        .await
        .expect("run");

    assert_eq!(report.completed(), 1);
    // The edit went into the (now removed) worktree, not the main tree.
    assert!(!h.repo_path.join("patch.rs").exists());
}
