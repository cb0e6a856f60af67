//! Work unit model
//!
//! A work unit is one dispatchable task: a review finding, a plan step, or
//! an ad-hoc request. Units move through a persistent lifecycle; the
//! history log is append-only and every transition is recorded with a
//! timestamp and note.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of work a unit represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitKind {
    /// Produced by a review pass
    Finding,
    /// One step of a generated plan
    PlanStep,
    /// Direct request
    AdHoc,
}

impl UnitKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Finding => "finding",
            Self::PlanStep => "plan-step",
            Self::AdHoc => "ad-hoc",
        }
    }
}

/// Lifecycle status of a work unit
///
/// `Complete`, `Failed` and `Abandoned` are terminal: they accept no
/// further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitStatus {
    Pending,
    Ready,
    InProgress,
    Complete,
    Failed,
    Abandoned,
}

impl UnitStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::InProgress => "in-progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }

    /// Parse a status as it appears in record file names
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "in-progress" => Some(Self::InProgress),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }

    /// Whether this status accepts no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Abandoned)
    }

    /// Whether the state machine permits `self -> to`
    ///
    /// Ready -> InProgress is deliberately absent here: claiming is the
    /// single concurrency-critical primitive and has its own path in the
    /// registry.
    pub fn can_transition(&self, to: UnitStatus) -> bool {
        match (self, to) {
            (Self::Pending, UnitStatus::Ready) => true,
            (Self::InProgress, UnitStatus::Complete) => true,
            (Self::InProgress, UnitStatus::Failed) => true,
            (s, UnitStatus::Abandoned) if !s.is_terminal() => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority of a work unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    P1,
    #[default]
    P2,
    P3,
}

impl Priority {
    pub fn as_str(&self) -> &str {
        match self {
            Self::P1 => "p1",
            Self::P2 => "p2",
            Self::P3 => "p3",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "p1" => Some(Self::P1),
            "p2" => Some(Self::P2),
            "p3" => Some(Self::P3),
            _ => None,
        }
    }
}

/// Task description plus structured provenance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payload {
    /// What needs to be done
    pub description: String,

    /// File the task refers to, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,

    /// Line in that file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_line: Option<u32>,

    /// Agent or person that produced the unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// One entry of a unit's transition log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub from: UnitStatus,
    pub to: UnitStatus,
    pub note: String,
}

/// A review finding, as handed over by an upstream review pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub agent: String,
    pub title: String,
    pub detail: String,
    #[serde(default)]
    pub severity: Priority,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub source_file: Option<String>,
    #[serde(default)]
    pub source_line: Option<u32>,
}

/// One dispatchable unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Zero-padded numeric id, unique within a registry
    pub id: String,
    pub title: String,
    pub kind: UnitKind,
    pub status: UnitStatus,
    pub priority: Priority,
    pub payload: Payload,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Worker currently holding the claim, while in progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Append-only transition log
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl WorkUnit {
    /// Create a new pending unit
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        kind: UnitKind,
        priority: Priority,
        payload: Payload,
        tags: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind,
            status: UnitStatus::Pending,
            priority,
            payload,
            tags,
            claimed_by: None,
            created_at: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Build a pending unit from a review finding
    pub fn from_finding(id: impl Into<String>, finding: Finding) -> Self {
        let mut tags = vec!["code-review".to_string()];
        if let Some(category) = &finding.category {
            tags.push(category.to_lowercase().replace(' ', "-"));
        }
        if finding.severity == Priority::P1 {
            tags.push("critical".to_string());
        }

        Self::new(
            id,
            finding.title,
            UnitKind::Finding,
            finding.severity,
            Payload {
                description: finding.detail,
                source_file: finding.source_file,
                source_line: finding.source_line,
                origin: Some(finding.agent),
            },
            tags,
        )
    }

    /// Kebab-case slug derived from the title, capped at 50 chars
    pub fn slug(&self) -> String {
        sanitize_slug(&self.title)
    }

    /// Record file name: `{id}-{status}-{slug}.json`
    ///
    /// Status lives in the name so a directory listing answers status
    /// queries without opening any record.
    pub fn file_name(&self) -> String {
        format!("{}-{}-{}.json", self.id, self.status.as_str(), self.slug())
    }

    /// The text context assembly ranks against
    pub fn task_text(&self) -> String {
        format!("{} {}", self.title, self.payload.description)
    }

    /// Apply a transition, appending to the history log
    pub fn record_transition(&mut self, to: UnitStatus, note: impl Into<String>) {
        self.history.push(HistoryEntry {
            at: Utc::now(),
            from: self.status,
            to,
            note: note.into(),
        });
        self.status = to;
    }
}

/// Parse `{id}-{status}-{slug}.json` into its parts
pub fn parse_file_name(name: &str) -> Option<(String, UnitStatus, String)> {
    let stem = name.strip_suffix(".json")?;
    let (id, rest) = stem.split_once('-')?;
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    // Statuses may contain dashes ("in-progress"); match known prefixes.
    for status in [
        UnitStatus::Pending,
        UnitStatus::Ready,
        UnitStatus::InProgress,
        UnitStatus::Complete,
        UnitStatus::Failed,
        UnitStatus::Abandoned,
    ] {
        if let Some(after) = rest.strip_prefix(status.as_str()) {
            if after.is_empty() {
                return Some((id.to_string(), status, String::new()));
            }
            if let Some(slug) = after.strip_prefix('-') {
                return Some((id.to_string(), status, slug.to_string()));
            }
        }
    }
    None
}

/// Kebab-case a title for use in record file names
pub fn sanitize_slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_matches('-').chars().take(50).collect()
}
