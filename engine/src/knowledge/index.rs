//! Similarity index
//!
//! Retrieval ranking sits behind the `SimilarityIndex` trait so the keyword
//! implementation can be swapped for a vector index without touching the
//! store's contract. The default implementation scores by query-keyword
//! containment: the fraction of the query's keywords present in the
//! document. Containment (rather than symmetric Jaccard) keeps long
//! documents from being penalized for their length.

use std::collections::{BTreeSet, HashMap};

/// Minimum token length for indexing ("sql" must match, "a" must not)
const MIN_TOKEN_LEN: usize = 3;

/// Pluggable nearest-neighbor interface for learning retrieval
pub trait SimilarityIndex: Send + Sync {
    /// Add or replace a document
    fn upsert(&mut self, id: &str, text: &str);

    /// Remove a document
    fn remove(&mut self, id: &str);

    /// Top `limit` document ids for `text`, scored in [0, 1],
    /// ordered by score descending then id descending (newest first for
    /// time-ordered ids)
    fn query(&self, text: &str, limit: usize) -> Vec<(String, f32)>;
}

/// Keyword containment index (the minimum bar; no embeddings involved)
#[derive(Debug, Default)]
pub struct KeywordIndex {
    docs: HashMap<String, BTreeSet<String>>,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SimilarityIndex for KeywordIndex {
    fn upsert(&mut self, id: &str, text: &str) {
        self.docs.insert(id.to_string(), tokens(text));
    }

    fn remove(&mut self, id: &str) {
        self.docs.remove(id);
    }

    fn query(&self, text: &str, limit: usize) -> Vec<(String, f32)> {
        let query_tokens = tokens(text);
        if query_tokens.is_empty() {
            // No signal to rank on; newest first.
            let mut ids: Vec<_> = self.docs.keys().cloned().collect();
            ids.sort_by(|a, b| b.cmp(a));
            return ids.into_iter().take(limit).map(|id| (id, 0.0)).collect();
        }

        let mut scored: Vec<(String, f32)> = self
            .docs
            .iter()
            .map(|(id, doc_tokens)| {
                let hits = query_tokens.intersection(doc_tokens).count();
                let score = hits as f32 / query_tokens.len() as f32;
                (id.clone(), score)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        scored.truncate(limit);
        scored
    }
}

/// Lowercased alphanumeric tokens of minimum length
pub fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= MIN_TOKEN_LEN)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Symmetric Jaccard similarity between two texts
///
/// Used by compaction to decide whether two learnings are near-duplicates;
/// retrieval uses the asymmetric containment score instead.
pub fn jaccard(a: &str, b: &str) -> f32 {
    let ta = tokens(a);
    let tb = tokens(b);
    let union = ta.union(&tb).count();
    if union == 0 {
        return 0.0;
    }
    ta.intersection(&tb).count() as f32 / union as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_containment_scoring() {
        let mut index = KeywordIndex::new();
        index.upsert("doc1", "parameterized queries prevent sql injection in login flows");
        index.upsert("doc2", "render the dashboard chart with cached data");

        let results = index.query("fix SQL injection in login", 10);
        assert_eq!(results[0].0, "doc1");
        assert!(results[0].1 > 0.5);
        assert!(results.iter().all(|(id, _)| id != "doc2"));
    }

    #[test]
    fn test_equal_scores_newest_first() {
        let mut index = KeywordIndex::new();
        // Time-ordered ids: larger id is newer.
        index.upsert("20240101-aaaa", "sql injection note");
        index.upsert("20250101-bbbb", "sql injection note");

        let results = index.query("sql injection", 10);
        assert_eq!(results[0].0, "20250101-bbbb");
        assert_eq!(results[1].0, "20240101-aaaa");
    }

    #[test]
    fn test_remove() {
        let mut index = KeywordIndex::new();
        index.upsert("doc1", "sql stuff");
        index.remove("doc1");
        assert!(index.query("sql", 10).is_empty());
    }

    #[test]
    fn test_empty_query_returns_newest() {
        let mut index = KeywordIndex::new();
        index.upsert("2024-a", "alpha");
        index.upsert("2025-b", "beta");
        let results = index.query("", 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "2025-b");
    }

    #[test]
    fn test_jaccard_bounds() {
        assert_eq!(jaccard("", ""), 0.0);
        assert!(jaccard("sql injection login", "sql injection login") > 0.99);
        let partial = jaccard("sql injection", "sql migration");
        assert!(partial > 0.0 && partial < 1.0);
    }
}
