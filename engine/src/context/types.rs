//! Context data model
//!
//! Candidate items, selection tiers, and the materialized bundle handed to
//! an agent executor. Bundles are ephemeral: they are rebuilt for every
//! execution and never persisted.

use serde::{Deserialize, Serialize};

/// Selection tier of a candidate context item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Always included, regardless of score or budget
    Critical,
    /// Included greedily by descending relevance until the budget runs out
    Scored,
    /// Never enters a bundle
    Excluded,
}

/// Coarse file category used as a scoring prior
///
/// Weights are strictly ordered: source > config > docs > generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Source,
    Config,
    Docs,
    Generated,
}

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "kt", "rb", "c", "h", "cpp", "hpp", "cs",
    "swift", "sh",
];

const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json", "ini", "cfg", "env"];

const DOC_EXTENSIONS: &[&str] = &["md", "rst", "txt", "adoc"];

impl FileCategory {
    /// Classify a path by its extension
    pub fn from_path(path: &str) -> Self {
        let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        if SOURCE_EXTENSIONS.contains(&ext.as_str()) {
            Self::Source
        } else if CONFIG_EXTENSIONS.contains(&ext.as_str()) {
            Self::Config
        } else if DOC_EXTENSIONS.contains(&ext.as_str()) {
            Self::Docs
        } else {
            Self::Generated
        }
    }

    /// Scoring weight multiplier for this category
    pub fn weight(&self) -> f32 {
        match self {
            Self::Source => 1.0,
            Self::Config => 0.85,
            Self::Docs => 0.6,
            Self::Generated => 0.2,
        }
    }
}

/// A candidate piece of context
///
/// Relevance is recomputed for every request; it is a function of the task
/// at hand and must never be cached across tasks.
#[derive(Debug, Clone)]
pub struct ContextItem {
    /// Repo-relative path, or a knowledge record id
    pub path: String,

    /// File content; loaded lazily, only for items that might be included
    pub content: Option<String>,

    /// Token estimate for the rendered entry
    pub estimated_tokens: usize,

    /// Task-dependent relevance score
    pub relevance: f32,

    /// Selection tier
    pub tier: Tier,
}

/// One item actually included in a bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleItem {
    pub path: String,
    pub content: String,
    pub tokens: usize,
    pub relevance: f32,
}

/// A retrieved learning included in a bundle, with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeExcerpt {
    /// Learning id
    pub id: String,
    /// Work unit the learning was codified from
    pub source: String,
    pub summary: String,
    pub content: String,
    pub tokens: usize,
}

/// The materialized context for one work unit execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Id of the work unit this bundle was built for
    pub unit_id: String,

    /// The task description the items were ranked against
    pub task: String,

    /// Included file items, highest relevance first
    pub items: Vec<BundleItem>,

    /// Retrieved learnings, capped by the knowledge sub-budget
    pub knowledge_excerpts: Vec<KnowledgeExcerpt>,

    /// Token total across items and excerpts
    pub total_tokens: usize,

    /// True when anything was dropped, clipped, or over budget
    pub truncated: bool,

    /// Human-readable notes about overruns and clipping
    pub warnings: Vec<String>,
}
