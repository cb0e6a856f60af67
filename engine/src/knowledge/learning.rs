//! Learning records
//!
//! A learning is an immutable, codified fact produced by a resolved work
//! unit and reused in future context bundles. Updates never edit a record
//! in place: a new learning is written and the ids it supersedes are listed
//! on the new record. That is what makes concurrent codification by
//! multiple workers safe.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// An immutable codified fact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    /// Time-ordered unique id; lexicographic order equals recency
    pub id: String,

    /// Grouping category (e.g. "work-resolutions")
    pub category: String,

    /// One-line gist
    pub summary: String,

    /// Full codified content
    pub content: String,

    /// Search tags
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// The work unit this learning was codified from
    pub source: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Ids of older learnings this record replaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supersedes: Vec<String>,
}

impl Learning {
    /// Create a new learning with a fresh time-ordered id
    pub fn new(
        category: impl Into<String>,
        summary: impl Into<String>,
        content: impl Into<String>,
        tags: BTreeSet<String>,
        source: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(now),
            category: category.into(),
            summary: summary.into(),
            content: content.into(),
            tags,
            source: source.into(),
            created_at: now,
            supersedes: Vec::new(),
        }
    }

    /// Mark this learning as replacing older records
    pub fn superseding(mut self, ids: Vec<String>) -> Self {
        self.supersedes = ids;
        self
    }

    /// File name for the persisted record: `{id}-{category}.json`
    pub fn file_name(&self) -> String {
        let category = self.category.to_lowercase().replace(' ', "-");
        format!("{}-{}.json", self.id, category)
    }

    /// The text retrieval matches against
    pub fn searchable_text(&self) -> String {
        let tags = self.tags.iter().cloned().collect::<Vec<_>>().join(" ");
        format!("{} {} {} {}", self.summary, self.content, tags, self.category)
    }

    /// Content fingerprint for exact-duplicate detection
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.category.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.summary.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.content.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Timestamp plus a random suffix: sortable, collision-free under
/// concurrent saves
fn generate_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%d%H%M%S%6f"), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn learning(summary: &str) -> Learning {
        Learning::new(
            "work-resolutions",
            summary,
            "content body",
            BTreeSet::from(["sql".to_string(), "security".to_string()]),
            "007",
        )
    }

    #[test]
    fn test_ids_are_unique() {
        let a = learning("a");
        let b = learning("b");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_file_name_encodes_id_and_category() {
        let l = learning("a");
        let name = l.file_name();
        assert!(name.starts_with(&l.id));
        assert!(name.ends_with("-work-resolutions.json"));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = learning("same");
        let mut b = learning("same");
        b.id = a.id.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.content = "different body".into();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_roundtrip() {
        let l = learning("roundtrip").superseding(vec!["old-id".into()]);
        let json = serde_json::to_string(&l).expect("serialize");
        let back: Learning = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.id, l.id);
        assert_eq!(back.tags, l.tags);
        assert_eq!(back.supersedes, vec!["old-id".to_string()]);
    }
}
