//! Knowledge gardening
//!
//! The out-of-band compaction pass: merges duplicate and near-duplicate
//! learnings into fewer, higher-quality records. The pass is
//! snapshot-then-merge-then-archive: it lists the records that exist when
//! it starts, writes merged replacements as ordinary atomic saves, and only
//! then moves the superseded snapshot files aside. A save that lands while
//! the pass runs is not in the snapshot and is never touched.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use sdk::errors::EngineError;
use serde::Serialize;
use tracing::info;

use super::index::jaccard;
use super::learning::Learning;
use super::store::KnowledgeStore;

/// Compaction tuning
#[derive(Debug, Clone)]
pub struct CompactionStrategy {
    /// Two learnings in the same category merge when their text similarity
    /// reaches this threshold (exact duplicates always merge)
    pub similarity_threshold: f32,
}

impl Default for CompactionStrategy {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.3,
        }
    }
}

/// What a compaction pass did
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompactionReport {
    /// Records in the snapshot
    pub examined: usize,
    /// Clusters of near-duplicates that were merged
    pub merged_clusters: usize,
    /// Snapshot records moved into the archive
    pub archived: usize,
    /// Merged records written
    pub created: usize,
}

/// Periodic compaction over a knowledge store
pub struct Gardener {
    store: Arc<KnowledgeStore>,
    strategy: CompactionStrategy,
}

impl Gardener {
    pub fn new(store: Arc<KnowledgeStore>, strategy: CompactionStrategy) -> Self {
        Self { store, strategy }
    }

    /// Run one compaction pass
    pub async fn compact(&self) -> Result<CompactionReport, EngineError> {
        let snapshot = self.store.load_all().await;
        let mut report = CompactionReport {
            examined: snapshot.len(),
            ..Default::default()
        };

        let clusters = cluster(&snapshot, self.strategy.similarity_threshold);

        for cluster in clusters {
            if cluster.len() < 2 {
                continue;
            }

            let merged = merge_cluster(&cluster);
            self.store.save(&merged).await?;
            report.created += 1;
            report.merged_clusters += 1;

            let to_archive: Vec<(PathBuf, String)> = cluster
                .iter()
                .map(|(path, l)| (path.clone(), l.id.clone()))
                .collect();
            report.archived += self.store.archive_records(&to_archive).await;
        }

        info!(
            examined = report.examined,
            merged = report.merged_clusters,
            archived = report.archived,
            "knowledge compaction finished"
        );
        Ok(report)
    }
}

/// Group snapshot records into duplicate clusters within each category
///
/// Greedy single-link: each unvisited record seeds a cluster and pulls in
/// every later record that is an exact fingerprint match or passes the
/// similarity threshold. Records are visited oldest first so the cluster
/// seed is the oldest member.
fn cluster(
    snapshot: &[(PathBuf, Learning)],
    threshold: f32,
) -> Vec<Vec<(PathBuf, Learning)>> {
    let mut visited = vec![false; snapshot.len()];
    let mut clusters = Vec::new();

    for i in 0..snapshot.len() {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        let mut members = vec![snapshot[i].clone()];

        for j in (i + 1)..snapshot.len() {
            if visited[j] {
                continue;
            }
            let (a, b) = (&snapshot[i].1, &snapshot[j].1);
            if a.category != b.category {
                continue;
            }

            let duplicate = a.fingerprint() == b.fingerprint()
                || jaccard(&a.searchable_text(), &b.searchable_text()) >= threshold;
            if duplicate {
                visited[j] = true;
                members.push(snapshot[j].clone());
            }
        }

        clusters.push(members);
    }

    clusters
}

/// Merge a cluster into one replacement learning
///
/// The newest member's summary and content survive; tags are unioned and
/// the replaced ids are recorded on the new record.
fn merge_cluster(members: &[(PathBuf, Learning)]) -> Learning {
    let newest = members
        .iter()
        .map(|(_, l)| l)
        .max_by(|a, b| a.id.cmp(&b.id))
        .expect("cluster is non-empty");

    let tags: BTreeSet<String> = members
        .iter()
        .flat_map(|(_, l)| l.tags.iter().cloned())
        .collect();

    let ids: Vec<String> = members.iter().map(|(_, l)| l.id.clone()).collect();

    Learning::new(
        newest.category.clone(),
        newest.summary.clone(),
        format!(
            "{}\n\nConsolidated from {} earlier records.",
            newest.content,
            members.len()
        ),
        tags,
        newest.source.clone(),
    )
    .superseding(ids)
}
