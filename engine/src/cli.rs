//! CLI interface for Cairn
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags of the `cairn` binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cairn Task Orchestration Engine
///
/// Dispatches units of engineering work to an external agent executor,
/// assembling a token-bounded context bundle for each and accumulating
/// reusable knowledge across runs.
#[derive(Parser, Debug)]
#[command(name = "cairn")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Repository root to operate on (defaults to the current directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub repo: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute ready work units matching a pattern
    Work {
        /// Unit id, p1/p2/p3, plan path, tag, or "all"
        #[arg(default_value = "all")]
        pattern: String,

        /// Maximum concurrent units (overrides config)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Run units one at a time
        #[arg(long, conflicts_with = "concurrency")]
        sequential: bool,

        /// Mutate the shared tree under a lock instead of worktrees
        #[arg(long)]
        in_place: bool,

        /// Build context bundles and report without executing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage work units
    Todo {
        #[command(subcommand)]
        action: TodoAction,
    },

    /// Manage the knowledge store
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },

    /// Preview the context bundle for a unit without executing it
    Context {
        /// Unit id
        id: String,
    },
}

/// Work unit subcommands
#[derive(Subcommand, Debug)]
pub enum TodoAction {
    /// Create a new pending unit
    Add {
        /// Short title
        title: String,

        /// Full description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Priority (p1, p2, p3)
        #[arg(short, long, default_value = "p2")]
        priority: String,

        /// Tags
        #[arg(short, long)]
        tag: Vec<String>,
    },

    /// List units, optionally by status
    List {
        /// Filter: pending, ready, in-progress, complete, failed, abandoned
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Promote a pending unit to ready
    Approve {
        /// Unit id
        id: String,
    },

    /// Abandon a unit
    Abandon {
        /// Unit id
        id: String,

        /// Why
        #[arg(short, long, default_value = "abandoned")]
        reason: String,
    },
}

/// Knowledge subcommands
#[derive(Subcommand, Debug)]
pub enum KnowledgeAction {
    /// Search learnings
    Search {
        /// Query text
        query: String,

        /// Filter by tag
        #[arg(short, long)]
        tag: Vec<String>,

        /// Maximum results
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Run a compaction (gardening) pass
    Garden,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_work_defaults() {
        let cli = Cli::try_parse_from(["cairn", "work"]).expect("parse");
        match cli.command {
            Command::Work {
                pattern,
                concurrency,
                sequential,
                in_place,
                dry_run,
            } => {
                assert_eq!(pattern, "all");
                assert!(concurrency.is_none());
                assert!(!sequential);
                assert!(!in_place);
                assert!(!dry_run);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_cli_rejects_sequential_with_concurrency() {
        assert!(Cli::try_parse_from(["cairn", "work", "--sequential", "-c", "4"]).is_err());
    }

    #[test]
    fn test_cli_parses_todo_add() {
        let cli = Cli::try_parse_from([
            "cairn", "todo", "add", "Fix login", "-d", "details", "-p", "p1", "-t", "security",
        ])
        .expect("parse");
        match cli.command {
            Command::Todo {
                action: TodoAction::Add { title, priority, tag, .. },
            } => {
                assert_eq!(title, "Fix login");
                assert_eq!(priority, "p1");
                assert_eq!(tag, vec!["security".to_string()]);
            }
            _ => panic!("wrong command"),
        }
    }
}
