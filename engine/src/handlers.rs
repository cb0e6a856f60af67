//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - work: execute ready units matching a pattern
//! - todo add/list/approve/abandon: manage work units
//! - knowledge search/garden: query and compact the knowledge store
//! - context: preview a unit's context bundle
//!
//! Handlers are thin glue: they wire the engine components together from
//! configuration and format results for the terminal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::executor::ExecutionOutcome;

use crate::config::Config;
use crate::context::{ContextAssembler, ContextBundle};
use crate::isolation::{CliGit, IsolationManager, IsolationMode, Workspace};
use crate::knowledge::{CompactionStrategy, Gardener, KeywordIndex, KnowledgeStore};
use crate::orchestrator::{
    AgentExecutor, Orchestrator, OutcomeKind, Pattern, ProcessExecutor, RunOptions,
};
use crate::registry::{Payload, Priority, UnitFilter, UnitKind, UnitStatus, WorkUnitRegistry};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// The wired-up engine components
pub struct Engine {
    pub registry: Arc<WorkUnitRegistry>,
    pub knowledge: Arc<KnowledgeStore>,
    pub assembler: Arc<ContextAssembler>,
    pub isolation: Arc<IsolationManager>,
    config: Config,
}

impl Engine {
    /// Build all components from configuration
    ///
    /// The repository root is threaded explicitly from the config into
    /// every component; nothing reads ambient process state.
    pub async fn build(config: Config) -> Result<Self> {
        let registry = Arc::new(
            WorkUnitRegistry::open(&config.units_dir())
                .await
                .context("opening work unit registry")?,
        );
        let knowledge = Arc::new(
            KnowledgeStore::open(
                &config.knowledge_dir(),
                Box::new(KeywordIndex::new()),
                config.knowledge.similarity_threshold,
            )
            .await
            .context("opening knowledge store")?,
        );
        let assembler = Arc::new(ContextAssembler::new(
            &config.core.repo_root,
            config.context.clone(),
            Arc::clone(&knowledge),
            config.knowledge.max_retrieved_learnings,
        ));
        let isolation = Arc::new(IsolationManager::new(
            &config.core.repo_root,
            &config.worktrees_dir(),
            Arc::new(CliGit::new()),
        ));

        Ok(Self {
            registry,
            knowledge,
            assembler,
            isolation,
            config,
        })
    }

    fn orchestrator(&self, executor: Arc<dyn AgentExecutor>) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.assembler),
            Arc::clone(&self.isolation),
            Arc::clone(&self.knowledge),
            executor,
            self.config.context.budget,
            self.config.context.reserve,
        )
    }
}

/// Placeholder executor for dry runs; never invoked
struct NullExecutor;

#[async_trait]
impl AgentExecutor for NullExecutor {
    async fn execute(
        &self,
        _bundle: &ContextBundle,
        _workspace: &Workspace,
    ) -> Result<ExecutionOutcome, EngineError> {
        Err(EngineError::Executor(
            "no agent executor configured".into(),
        ))
    }
}

/// Execute ready units matching a pattern
#[allow(clippy::too_many_arguments)]
pub async fn handle_work(
    pattern: &str,
    concurrency: Option<usize>,
    sequential: bool,
    in_place: bool,
    dry_run: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let pattern = Pattern::parse(pattern)?;
    let engine = Engine::build(config.clone()).await?;

    let executor: Arc<dyn AgentExecutor> = if dry_run {
        Arc::new(NullExecutor)
    } else {
        Arc::new(ProcessExecutor::new(
            config.orchestrator.executor_command.clone(),
        )?)
    };

    let opts = RunOptions {
        concurrency: if sequential {
            1
        } else {
            concurrency.unwrap_or(config.orchestrator.concurrency)
        },
        isolation: if in_place {
            IsolationMode::InPlace
        } else {
            config.orchestrator.isolation_mode
        },
        dry_run,
        timeout: Duration::from_secs(config.orchestrator.executor_timeout_secs),
    };

    let report = engine.orchestrator(executor).run(&pattern, &opts).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            for outcome in &report.outcomes {
                let marker = match outcome.kind {
                    OutcomeKind::Completed => "ok",
                    OutcomeKind::Failed => "FAIL",
                    OutcomeKind::Skipped => "skip",
                };
                println!(
                    "[{marker}] {} {} ({} ms) - {}",
                    outcome.unit_id, outcome.title, outcome.duration_ms, outcome.detail
                );
            }
            println!("{}", report.summary());
        }
    }

    Ok(())
}

/// Create a new pending unit
pub async fn handle_todo_add(
    title: &str,
    description: &str,
    priority: &str,
    tags: Vec<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let priority = Priority::parse(priority)
        .ok_or_else(|| EngineError::Validation(format!("unknown priority: {priority}")))?;

    let engine = Engine::build(config.clone()).await?;
    let unit = engine
        .registry
        .create(
            title,
            UnitKind::AdHoc,
            priority,
            Payload {
                description: description.to_string(),
                ..Default::default()
            },
            tags,
        )
        .await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&unit)?),
        OutputFormat::Text => println!("created unit {} ({})", unit.id, unit.file_name()),
    }
    Ok(())
}

/// List units, optionally filtered by status
pub async fn handle_todo_list(
    status: Option<&str>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let filter = match status {
        Some(raw) => UnitFilter::status(
            UnitStatus::parse(raw)
                .ok_or_else(|| EngineError::Validation(format!("unknown status: {raw}")))?,
        ),
        None => UnitFilter::default(),
    };

    let engine = Engine::build(config.clone()).await?;
    let units = engine.registry.list(&filter).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&units)?),
        OutputFormat::Text => {
            for unit in &units {
                println!(
                    "{} [{}] {} ({}, {})",
                    unit.id,
                    unit.status,
                    unit.title,
                    unit.priority.as_str(),
                    unit.kind.as_str()
                );
            }
            println!("{} units", units.len());
        }
    }
    Ok(())
}

/// Promote a pending unit to ready
pub async fn handle_todo_approve(id: &str, config: &Config, format: OutputFormat) -> Result<()> {
    let engine = Engine::build(config.clone()).await?;
    let unit = engine.registry.approve(id, "approved via cli").await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&unit)?),
        OutputFormat::Text => println!("unit {} is now {}", unit.id, unit.status),
    }
    Ok(())
}

/// Abandon a unit
pub async fn handle_todo_abandon(
    id: &str,
    reason: &str,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let engine = Engine::build(config.clone()).await?;
    let unit = engine
        .registry
        .transition(id, UnitStatus::Abandoned, reason)
        .await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&unit)?),
        OutputFormat::Text => println!("unit {} abandoned", unit.id),
    }
    Ok(())
}

/// Search learnings
pub async fn handle_knowledge_search(
    query: &str,
    tags: Vec<String>,
    limit: usize,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let engine = Engine::build(config.clone()).await?;
    let learnings = engine.knowledge.retrieve(query, &tags, limit).await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&learnings)?),
        OutputFormat::Text => {
            if learnings.is_empty() {
                println!("no matching learnings");
            }
            for learning in &learnings {
                println!("[{}] {} - {}", learning.id, learning.summary, learning.category);
            }
        }
    }
    Ok(())
}

/// Run a compaction pass over the knowledge store
pub async fn handle_knowledge_garden(config: &Config, format: OutputFormat) -> Result<()> {
    let engine = Engine::build(config.clone()).await?;
    let gardener = Gardener::new(
        Arc::clone(&engine.knowledge),
        CompactionStrategy {
            similarity_threshold: config.knowledge.similarity_threshold,
        },
    );
    let report = gardener.compact().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => println!(
            "examined {}, merged {} clusters, archived {}, created {}",
            report.examined, report.merged_clusters, report.archived, report.created
        ),
    }
    Ok(())
}

/// Preview the context bundle for one unit
pub async fn handle_context(id: &str, config: &Config, format: OutputFormat) -> Result<()> {
    let engine = Engine::build(config.clone()).await?;
    let unit = engine.registry.get(id).await?;
    let bundle = engine
        .assembler
        .build(&unit, config.context.budget, config.context.reserve)
        .await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&bundle)?),
        OutputFormat::Text => {
            println!(
                "bundle for unit {}: {} tokens, truncated: {}",
                bundle.unit_id, bundle.total_tokens, bundle.truncated
            );
            for item in &bundle.items {
                println!("  {:>6} tok  {:.2}  {}", item.tokens, item.relevance, item.path);
            }
            for excerpt in &bundle.knowledge_excerpts {
                println!("  {:>6} tok  [kb]  {}", excerpt.tokens, excerpt.summary);
            }
            for warning in &bundle.warnings {
                println!("  warning: {warning}");
            }
        }
    }
    Ok(())
}
