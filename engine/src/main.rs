// Cairn Task Orchestration Engine
// Main entry point for the cairn binary

use clap::Parser;

use cairn_engine::cli::{Cli, Command, KnowledgeAction, TodoAction};
use cairn_engine::config::Config;
use cairn_engine::handlers::{self, OutputFormat};
use cairn_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize basic telemetry first (before config is loaded)
    init_telemetry();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Resolve the repository root and load configuration
    let repo_root = match &cli.repo {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };
    let config = if let Some(config_path) = &cli.config {
        let mut config = Config::load_from_path(config_path)?;
        config.core.repo_root = repo_root;
        config
    } else {
        Config::load_or_default(&repo_root)?
    };

    // Re-initialize telemetry with the effective log level
    // (only takes effect if RUST_LOG env var is not set)
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    // Handle commands
    match cli.command {
        Command::Work {
            pattern,
            concurrency,
            sequential,
            in_place,
            dry_run,
        } => {
            handlers::handle_work(
                &pattern,
                concurrency,
                sequential,
                in_place,
                dry_run,
                &config,
                format,
            )
            .await
        }

        Command::Todo { action } => match action {
            TodoAction::Add {
                title,
                description,
                priority,
                tag,
            } => handlers::handle_todo_add(&title, &description, &priority, tag, &config, format).await,
            TodoAction::List { status } => {
                handlers::handle_todo_list(status.as_deref(), &config, format).await
            }
            TodoAction::Approve { id } => handlers::handle_todo_approve(&id, &config, format).await,
            TodoAction::Abandon { id, reason } => {
                handlers::handle_todo_abandon(&id, &reason, &config, format).await
            }
        },

        Command::Knowledge { action } => match action {
            KnowledgeAction::Search { query, tag, limit } => {
                handlers::handle_knowledge_search(&query, tag, limit, &config, format).await
            }
            KnowledgeAction::Garden => handlers::handle_knowledge_garden(&config, format).await,
        },

        Command::Context { id } => handlers::handle_context(&id, &config, format).await,
    }
}
