//! Knowledge store
//!
//! Durable store of learnings: one immutable JSON record per learning,
//! written atomically (temp file + rename) under a unique, time-ordered
//! file name. Saves from concurrent workers are independent appends — there
//! is no shared file to read-modify-write, so nothing can be silently lost.
//!
//! Retrieval is best-effort augmentation: a missing or corrupt store logs
//! and returns empty rather than failing the caller, because knowledge
//! unavailability must never block the execution of a work unit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sdk::errors::EngineError;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::index::SimilarityIndex;
use super::learning::Learning;

/// Directory name compacted records are moved into
pub const ARCHIVE_DIR: &str = "archive";

/// File-backed learning store with a pluggable similarity index
pub struct KnowledgeStore {
    dir: PathBuf,
    index: RwLock<Box<dyn SimilarityIndex>>,
    similarity_threshold: f32,
}

impl KnowledgeStore {
    /// Open (or create) a store at `dir`, hydrating the index from the
    /// records already on disk
    pub async fn open(
        dir: &Path,
        index: Box<dyn SimilarityIndex>,
        similarity_threshold: f32,
    ) -> Result<Self, EngineError> {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| EngineError::Storage(format!("cannot create {}: {e}", dir.display())))?;

        let store = Self {
            dir: dir.to_path_buf(),
            index: RwLock::new(index),
            similarity_threshold,
        };

        let records = store.load_all().await;
        let mut index = store.index.write().await;
        for (_, learning) in &records {
            index.upsert(&learning.id, &learning.searchable_text());
        }
        drop(index);
        debug!(count = records.len(), "knowledge store hydrated");

        Ok(store)
    }

    /// Append a new learning record
    ///
    /// Atomic per record; safe under concurrent callers. Returns the
    /// learning id. After the record lands, the human-readable summary
    /// document is regenerated best-effort — its failure never rolls back
    /// the save.
    pub async fn save(&self, learning: &Learning) -> Result<String, EngineError> {
        let final_path = self.dir.join(learning.file_name());
        let tmp_path = final_path.with_extension("json.tmp");

        let body = serde_json::to_vec_pretty(learning)
            .map_err(|e| EngineError::Storage(format!("serialize learning: {e}")))?;

        fs::write(&tmp_path, &body)
            .await
            .map_err(|e| EngineError::Storage(format!("write {}: {e}", tmp_path.display())))?;
        fs::rename(&tmp_path, &final_path).await.map_err(|e| {
            EngineError::Storage(format!("commit {}: {e}", final_path.display()))
        })?;

        self.index
            .write()
            .await
            .upsert(&learning.id, &learning.searchable_text());

        if let Err(e) = self.write_summary().await {
            warn!(error = %e, "failed to regenerate knowledge summary");
        }

        debug!(id = %learning.id, "learning saved");
        Ok(learning.id.clone())
    }

    /// Retrieve the top `max_results` learnings for a query and tag set
    ///
    /// Ranked by the similarity index; equal scores ordered newest first.
    /// Never errors: a broken store yields an empty result and a log line.
    pub async fn retrieve(&self, query: &str, tags: &[String], max_results: usize) -> Vec<Learning> {
        if max_results == 0 {
            return Vec::new();
        }

        let records = self.load_all().await;
        if records.is_empty() {
            return Vec::new();
        }

        let mut by_id: HashMap<String, Learning> =
            records.into_iter().map(|(_, l)| (l.id.clone(), l)).collect();

        let ranked = self.index.read().await.query(query, max_results * 4);

        let mut results = Vec::new();
        for (id, score) in ranked {
            if !query.trim().is_empty() && score < self.similarity_threshold {
                break; // scores are descending
            }
            let Some(learning) = by_id.remove(&id) else {
                continue; // index entry for a record compacted away
            };
            if !tags.is_empty() && !matches_tags(&learning, tags) {
                continue;
            }
            results.push(learning);
            if results.len() >= max_results {
                break;
            }
        }

        results
    }

    /// All records currently on disk, tolerating corrupt files
    pub async fn load_all(&self) -> Vec<(PathBuf, Learning)> {
        let mut records = Vec::new();

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "knowledge store unreadable");
                return records;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path).await {
                Ok(raw) => match serde_json::from_str::<Learning>(&raw) {
                    Ok(learning) => records.push((path, learning)),
                    Err(e) => warn!(file = %path.display(), error = %e, "skipping corrupt learning"),
                },
                Err(e) => warn!(file = %path.display(), error = %e, "skipping unreadable learning"),
            }
        }

        // Deterministic: time-ordered ids, oldest first.
        records.sort_by(|a, b| a.1.id.cmp(&b.1.id));
        records
    }

    /// Move compacted records into the archive directory
    ///
    /// Missing files are fine — a concurrent pass may have moved them
    /// already. Returns how many records were actually archived.
    pub(crate) async fn archive_records(&self, records: &[(PathBuf, String)]) -> usize {
        let archive = self.dir.join(ARCHIVE_DIR);
        if let Err(e) = fs::create_dir_all(&archive).await {
            warn!(error = %e, "cannot create archive directory");
            return 0;
        }

        let mut moved = 0;
        let mut index = self.index.write().await;
        for (path, id) in records {
            let Some(name) = path.file_name() else {
                continue;
            };
            match fs::rename(path, archive.join(name)).await {
                Ok(()) => {
                    index.remove(id);
                    moved += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(file = %path.display(), error = %e, "failed to archive record"),
            }
        }
        moved
    }

    /// Regenerate the human-readable summary document
    async fn write_summary(&self) -> Result<(), EngineError> {
        let records = self.load_all().await;

        let mut by_category: HashMap<&str, Vec<&Learning>> = HashMap::new();
        for (_, learning) in &records {
            by_category.entry(&learning.category).or_default().push(learning);
        }

        let mut categories: Vec<_> = by_category.keys().copied().collect();
        categories.sort_unstable();

        let mut doc = String::from("# Knowledge Summary\n");
        for category in categories {
            doc.push_str(&format!("\n## {category}\n\n"));
            let mut learnings = by_category[category].clone();
            // Newest first within a category
            learnings.sort_by(|a, b| b.id.cmp(&a.id));
            for learning in learnings {
                doc.push_str(&format!(
                    "- {} _(from unit {}, {})_\n",
                    learning.summary,
                    learning.source,
                    learning.created_at.format("%Y-%m-%d")
                ));
            }
        }

        let path = self.dir.join("SUMMARY.md");
        let tmp = self.dir.join("SUMMARY.md.tmp");
        fs::write(&tmp, doc.as_bytes())
            .await
            .map_err(|e| EngineError::Storage(format!("write summary: {e}")))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| EngineError::Storage(format!("commit summary: {e}")))?;
        Ok(())
    }
}

/// Tag filter: any requested tag matches the learning's tags or category
fn matches_tags(learning: &Learning, tags: &[String]) -> bool {
    tags.iter().any(|t| {
        learning.tags.iter().any(|lt| lt.eq_ignore_ascii_case(t))
            || learning.category.eq_ignore_ascii_case(t)
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use tempfile::tempdir;

    use super::super::index::KeywordIndex;
    use super::*;

    async fn open_store(dir: &Path) -> KnowledgeStore {
        KnowledgeStore::open(dir, Box::new(KeywordIndex::new()), 0.3)
            .await
            .expect("open store")
    }

    fn learning(summary: &str, content: &str, tags: &[&str]) -> Learning {
        Learning::new(
            "work-resolutions",
            summary,
            content,
            tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
            "007",
        )
    }

    #[tokio::test]
    async fn test_save_and_retrieve() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;

        let l = learning(
            "Use parameterized queries",
            "SQL injection in login was fixed by switching to bound parameters",
            &["sql", "security"],
        );
        store.save(&l).await.expect("save");

        let hits = store.retrieve("fix SQL injection in login", &[], 5).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, l.id);
    }

    #[tokio::test]
    async fn test_tag_filter() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;

        let sql = learning("sql note", "about sql injection handling", &["sql"]);
        let perf = learning("perf note", "about sql query performance", &["performance"]);
        store.save(&sql).await.expect("save");
        store.save(&perf).await.expect("save");

        let hits = store.retrieve("sql", &["security".into(), "sql".into()], 5).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, sql.id);
    }

    #[tokio::test]
    async fn test_retrieve_on_missing_dir_is_empty() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;
        // Remove the directory out from under the store.
        std::fs::remove_dir_all(dir.path()).expect("remove");

        let hits = store.retrieve("anything", &[], 5).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_skipped() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;

        let good = learning("good", "sql injection fix details", &["sql"]);
        store.save(&good).await.expect("save");
        std::fs::write(dir.path().join("zz-garbage.json"), b"{ not json").expect("write");

        let hits = store.retrieve("sql injection", &[], 5).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, good.id);
    }

    #[tokio::test]
    async fn test_concurrent_saves_all_land() {
        let dir = tempdir().expect("tempdir");
        let store = std::sync::Arc::new(open_store(dir.path()).await);

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let l = learning(
                    &format!("note {i}"),
                    &format!("distinct content body number {i}"),
                    &["batch"],
                );
                store.save(&l).await.expect("save")
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.expect("join"));
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);

        let records = store.load_all().await;
        assert_eq!(records.len(), 8);
    }

    #[tokio::test]
    async fn test_summary_regenerated() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;
        store
            .save(&learning("first insight", "body", &["misc"]))
            .await
            .expect("save");

        let summary = std::fs::read_to_string(dir.path().join("SUMMARY.md")).expect("summary");
        assert!(summary.contains("first insight"));
        assert!(summary.contains("work-resolutions"));
    }

    #[tokio::test]
    async fn test_hydration_after_reopen() {
        let dir = tempdir().expect("tempdir");
        {
            let store = open_store(dir.path()).await;
            store
                .save(&learning("persisted", "survives reopen of the store", &["misc"]))
                .await
                .expect("save");
        }

        let reopened = open_store(dir.path()).await;
        let hits = reopened.retrieve("survives reopen", &[], 5).await;
        assert_eq!(hits.len(), 1);
    }
}
