//! Work selection patterns
//!
//! The user-facing pattern string ("007", "p1", "plans/feature.md",
//! "security") is sniffed exactly once, at the orchestrator boundary, into
//! a tagged variant. Downstream code matches on the variant and never
//! re-interprets the raw string.

use sdk::errors::EngineError;

use crate::registry::{Priority, WorkUnit};

/// Resolved selection pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Every ready unit
    All,
    /// One unit by numeric id
    ById(String),
    /// All ready units of a priority
    ByPriority(Priority),
    /// Units whose payload points at a file (plan steps)
    ByPath(String),
    /// Units carrying a tag
    ByTag(String),
}

impl Pattern {
    /// Parse a raw pattern string
    ///
    /// Rules, in order: empty or "all" selects everything; digits select by
    /// id; p1/p2/p3 select by priority; anything with a path separator or a
    /// `.md` suffix selects by source path; a single bare word selects by
    /// tag. Anything else is a validation error.
    pub fn parse(input: &str) -> Result<Self, EngineError> {
        let trimmed = input.trim();

        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        if trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Ok(Self::ById(trimmed.to_string()));
        }
        if let Some(priority) = Priority::parse(trimmed) {
            return Ok(Self::ByPriority(priority));
        }
        if trimmed.contains('/') || trimmed.ends_with(".md") {
            return Ok(Self::ByPath(trimmed.to_string()));
        }
        if trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Ok(Self::ByTag(trimmed.to_string()));
        }

        Err(EngineError::Validation(format!(
            "cannot interpret pattern '{trimmed}': expected an id, p1/p2/p3, a path, or a tag"
        )))
    }

    /// Whether a unit matches this pattern
    pub fn matches(&self, unit: &WorkUnit) -> bool {
        match self {
            Self::All => true,
            Self::ById(id) => match (id.parse::<u64>(), unit.id.parse::<u64>()) {
                (Ok(a), Ok(b)) => a == b,
                _ => id == &unit.id,
            },
            Self::ByPriority(priority) => unit.priority == *priority,
            Self::ByPath(path) => unit
                .payload
                .source_file
                .as_deref()
                .is_some_and(|f| f == path || f.ends_with(path)),
            Self::ByTag(tag) => unit.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)),
        }
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::ById(id) => write!(f, "#{id}"),
            Self::ByPriority(p) => write!(f, "{}", p.as_str()),
            Self::ByPath(path) => write!(f, "{path}"),
            Self::ByTag(tag) => write!(f, "tag:{tag}"),
        }
    }
}
