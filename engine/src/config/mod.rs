//! Configuration management
//!
//! This module handles loading, validation, and management of the Cairn
//! configuration. Configuration is stored in TOML format at
//! `<repo>/.cairn/config.toml`; every field has a serde default so an empty
//! file (or no file at all) is valid.
//!
//! # Configuration Sections
//!
//! - **core**: Repository root, data directory, log level
//! - **context**: Token budget, reserve, knowledge share, file tier lists
//! - **orchestrator**: Concurrency, isolation mode, executor command/timeout
//! - **knowledge**: Retrieval limits and similarity threshold
//!
//! The repository root is an explicit value threaded into every component
//! constructor. Nothing in the engine reads a process-wide "current repo";
//! two configs pointed at two repositories can run side by side.

use std::fs;
use std::path::{Path, PathBuf};

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};

use crate::context::CriticalOverrun;
use crate::isolation::IsolationMode;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Context assembly settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Orchestrator settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Knowledge store settings
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Repository root the engine operates on
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,

    /// Data directory; defaults to `.cairn` under the repository root
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Context assembly configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Total token budget for one context bundle
    #[serde(default = "default_budget")]
    pub budget: usize,

    /// Tokens held back for the model's output
    #[serde(default = "default_reserve")]
    pub reserve: usize,

    /// Share of the usable budget reserved for knowledge excerpts (0.0–0.5)
    #[serde(default = "default_knowledge_share")]
    pub knowledge_share: f32,

    /// Per-file size cap in bytes; larger files are skipped during the scan
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Files always included in every bundle regardless of score
    #[serde(default = "default_critical_files")]
    pub critical_files: Vec<String>,

    /// Directory names excluded from the tree scan
    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,

    /// File names excluded from the tree scan (lockfiles and the like)
    #[serde(default = "default_skip_files")]
    pub skip_files: Vec<String>,

    /// What to do when critical files alone exceed the budget
    #[serde(default)]
    pub critical_overrun: CriticalOverrun,
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of concurrently executing work units (hard cap)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Workspace isolation mode
    #[serde(default)]
    pub isolation_mode: IsolationMode,

    /// Wall-clock timeout for one executor invocation, in seconds
    #[serde(default = "default_executor_timeout")]
    pub executor_timeout_secs: u64,

    /// Command line of the external agent executor (argv form)
    ///
    /// The bundle is written to its stdin as JSON; the outcome is read from
    /// its stdout as JSON.
    #[serde(default)]
    pub executor_command: Vec<String>,
}

/// Knowledge store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Maximum learnings retrieved per context bundle
    #[serde(default = "default_max_retrieved")]
    pub max_retrieved_learnings: usize,

    /// Minimum similarity score for retrieval and compaction merging (0.0–1.0)
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

fn default_repo_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_budget() -> usize {
    128_000
}

fn default_reserve() -> usize {
    4_096
}

fn default_knowledge_share() -> f32 {
    0.15
}

fn default_max_file_size() -> u64 {
    100_000
}

fn default_critical_files() -> Vec<String> {
    [
        "Cargo.toml",
        "pyproject.toml",
        "package.json",
        "go.mod",
        "README.md",
        "Dockerfile",
        "docker-compose.yml",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_skip_dirs() -> Vec<String> {
    [
        ".git",
        ".cairn",
        "target",
        "node_modules",
        "dist",
        "build",
        ".venv",
        "venv",
        "__pycache__",
        "worktrees",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_skip_files() -> Vec<String> {
    sdk::git::DIFF_IGNORE_FILES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_concurrency() -> usize {
    3
}

fn default_executor_timeout() -> u64 {
    600
}

fn default_max_retrieved() -> usize {
    5
}

fn default_similarity_threshold() -> f32 {
    0.3
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            repo_root: default_repo_root(),
            data_dir: None,
            log_level: default_log_level(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            reserve: default_reserve(),
            knowledge_share: default_knowledge_share(),
            max_file_size: default_max_file_size(),
            critical_files: default_critical_files(),
            skip_dirs: default_skip_dirs(),
            skip_files: default_skip_files(),
            critical_overrun: CriticalOverrun::default(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            isolation_mode: IsolationMode::default(),
            executor_timeout_secs: default_executor_timeout(),
            executor_command: Vec::new(),
        }
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            max_retrieved_learnings: default_max_retrieved(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit file path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| EngineError::Validation(format!("cannot read {}: {e}", path.display())))?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| EngineError::Validation(format!("invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration for a repository, falling back to defaults
    ///
    /// Looks for `<repo>/.cairn/config.toml`. A missing file is not an
    /// error; a present-but-invalid file is.
    pub fn load_or_default(repo_root: &Path) -> Result<Self, EngineError> {
        let path = repo_root.join(".cairn").join("config.toml");
        let mut config = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            Config::default()
        };
        config.core.repo_root = repo_root.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Validation failures are run-fatal: nothing is claimed or executed
    /// with a broken configuration.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.orchestrator.concurrency < 1 {
            return Err(EngineError::Validation(
                "orchestrator.concurrency must be at least 1".into(),
            ));
        }
        if self.context.reserve >= self.context.budget {
            return Err(EngineError::Validation(format!(
                "context.reserve ({}) must be smaller than context.budget ({})",
                self.context.reserve, self.context.budget
            )));
        }
        if !(0.0..=0.5).contains(&self.context.knowledge_share) {
            return Err(EngineError::Validation(
                "context.knowledge_share must be between 0.0 and 0.5".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.knowledge.similarity_threshold) {
            return Err(EngineError::Validation(
                "knowledge.similarity_threshold must be between 0.0 and 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Data directory (creating nothing; callers create what they need)
    pub fn data_dir(&self) -> PathBuf {
        match &self.core.data_dir {
            Some(dir) => expand_tilde(dir),
            None => self.core.repo_root.join(".cairn"),
        }
    }

    /// Directory holding work unit records
    pub fn units_dir(&self) -> PathBuf {
        self.data_dir().join("todos")
    }

    /// Directory holding learning records
    pub fn knowledge_dir(&self) -> PathBuf {
        self.data_dir().join("knowledge")
    }

    /// Directory holding isolated worktrees
    pub fn worktrees_dir(&self) -> PathBuf {
        self.data_dir().join("worktrees")
    }
}

/// Expand a leading `~` to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.orchestrator.concurrency, 3);
        assert_eq!(config.context.budget, 128_000);
        assert!(config.context.budget > config.context.reserve);
    }

    #[test]
    fn test_empty_toml_is_valid() {
        let config: Config = toml::from_str("").expect("empty config parses");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: Config = toml::from_str(
            r#"
            [orchestrator]
            concurrency = 1
            isolation_mode = "in-place"

            [context]
            budget = 1000
            reserve = 200
            "#,
        )
        .expect("partial config parses");

        assert_eq!(config.orchestrator.concurrency, 1);
        assert_eq!(config.context.budget, 1000);
        assert_eq!(config.context.reserve, 200);
        // Untouched sections keep defaults
        assert_eq!(config.knowledge.max_retrieved_learnings, 5);
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.orchestrator.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_reserve_over_budget() {
        let mut config = Config::default();
        config.context.budget = 100;
        config.context.reserve = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_data_dirs_under_repo_root() {
        let mut config = Config::default();
        config.core.repo_root = PathBuf::from("/repo");
        assert_eq!(config.units_dir(), PathBuf::from("/repo/.cairn/todos"));
        assert_eq!(config.knowledge_dir(), PathBuf::from("/repo/.cairn/knowledge"));
    }

    #[test]
    fn test_tilde_expansion_in_data_dir() {
        let mut config = Config::default();
        config.core.data_dir = Some(PathBuf::from("~/cairn-data"));
        let dir = config.data_dir();
        assert!(!dir.starts_with("~"));
        assert!(dir.ends_with("cairn-data"));
    }
}
