//! Context assembly
//!
//! Composes the file-tree scan, relevance scoring, knowledge retrieval and
//! budgeted selection into one context bundle per work unit. Assembly is
//! deterministic: identical tree state and knowledge content produce
//! byte-identical bundles, which makes dry runs trustworthy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sdk::errors::EngineError;
use tokio::fs;
use tracing::{debug, warn};

use crate::config::ContextConfig;
use crate::knowledge::KnowledgeStore;
use crate::registry::WorkUnit;

use super::budgeter::ContextBudgeter;
use super::estimator::TokenEstimator;
use super::scorer::RelevanceScorer;
use super::types::{BundleItem, ContextBundle, ContextItem, KnowledgeExcerpt};

/// Extensions that are never text context
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "pdf", "zip", "tar", "gz", "woff", "woff2", "ttf", "otf",
    "exe", "dll", "so", "dylib", "a", "o", "class", "jar", "bin", "wasm", "lock", "db", "sqlite",
];

/// How far past the usable budget content loading goes
///
/// Candidates are ranked on path score before any content is read; loading
/// a bounded superset leaves room for the content bonus to reorder them
/// without reading the whole tree.
const LOAD_FACTOR: usize = 2;

/// A scanned candidate before content is loaded
struct Candidate {
    abs: PathBuf,
    rel: String,
    path_score: f32,
}

/// Builds context bundles for work units
pub struct ContextAssembler {
    repo_root: PathBuf,
    settings: ContextConfig,
    estimator: TokenEstimator,
    scorer: RelevanceScorer,
    budgeter: ContextBudgeter,
    knowledge: Arc<KnowledgeStore>,
    max_retrieved: usize,
}

impl ContextAssembler {
    /// Create an assembler rooted at `repo_root`
    pub fn new(
        repo_root: &Path,
        settings: ContextConfig,
        knowledge: Arc<KnowledgeStore>,
        max_retrieved: usize,
    ) -> Self {
        let estimator = TokenEstimator::default();
        let scorer = RelevanceScorer::new(settings.critical_files.clone());
        let budgeter = ContextBudgeter::new(estimator, settings.critical_overrun);
        Self {
            repo_root: repo_root.to_path_buf(),
            settings,
            estimator,
            scorer,
            budgeter,
            knowledge,
            max_retrieved,
        }
    }

    /// Build the context bundle for one work unit
    ///
    /// Knowledge excerpts are always-included up to their own sub-budget;
    /// the remaining budget goes to file items through the budgeter. The
    /// bundle total never exceeds `budget - reserve`, except for critical
    /// overrun under the warn policy, which is flagged.
    pub async fn build(
        &self,
        unit: &WorkUnit,
        budget: usize,
        reserve: usize,
    ) -> Result<ContextBundle, EngineError> {
        let task = unit.task_text();
        let usable = budget.saturating_sub(reserve);

        let mut warnings = Vec::new();
        let mut truncated = false;

        // Knowledge first: retrieved learnings are capped by their own
        // smaller sub-budget so they can never crowd out the files.
        let sub_budget = (usable as f32 * self.settings.knowledge_share) as usize;
        let (excerpts, knowledge_tokens, knowledge_dropped) =
            self.gather_knowledge(unit, &task, sub_budget).await;
        if knowledge_dropped > 0 {
            truncated = true;
            warnings.push(format!(
                "{knowledge_dropped} retrieved learnings dropped by the knowledge sub-budget"
            ));
        }

        // Files get what the knowledge excerpts left over.
        let file_budget = budget.saturating_sub(knowledge_tokens);
        let items = self.gather_files(&task, file_budget.saturating_sub(reserve)).await?;
        let selection = self.budgeter.select(items, file_budget, reserve)?;
        truncated |= selection.truncated;
        warnings.extend(selection.warnings);

        let items: Vec<BundleItem> = selection
            .items
            .into_iter()
            .map(|item| BundleItem {
                path: item.path,
                content: item.content.unwrap_or_default(),
                tokens: item.estimated_tokens,
                relevance: item.relevance,
            })
            .collect();

        let total_tokens = selection.total_tokens + knowledge_tokens;
        debug!(
            unit = %unit.id,
            files = items.len(),
            excerpts = excerpts.len(),
            total_tokens,
            "context bundle assembled"
        );

        Ok(ContextBundle {
            unit_id: unit.id.clone(),
            task,
            items,
            knowledge_excerpts: excerpts,
            total_tokens,
            truncated,
            warnings,
        })
    }

    /// Retrieve learnings and fit them into the knowledge sub-budget
    ///
    /// Returns the included excerpts, their token total, and how many
    /// retrieved learnings had to be dropped.
    async fn gather_knowledge(
        &self,
        unit: &WorkUnit,
        task: &str,
        sub_budget: usize,
    ) -> (Vec<KnowledgeExcerpt>, usize, usize) {
        let learnings = self
            .knowledge
            .retrieve(task, &unit.tags, self.max_retrieved)
            .await;

        let mut excerpts = Vec::new();
        let mut used = 0usize;
        let mut dropped = 0usize;

        for learning in learnings {
            let rendered = format!("### {}\n{}\n", learning.summary, learning.content);
            let tokens = self.estimator.estimate(&rendered);
            if used + tokens > sub_budget {
                dropped += 1;
                continue;
            }
            used += tokens;
            excerpts.push(KnowledgeExcerpt {
                id: learning.id,
                source: learning.source,
                summary: learning.summary,
                content: learning.content,
                tokens,
            });
        }

        (excerpts, used, dropped)
    }

    /// Scan, score and lazily load candidate files
    async fn gather_files(
        &self,
        task: &str,
        usable: usize,
    ) -> Result<Vec<ContextItem>, EngineError> {
        let mut candidates = self.scan(task).await?;

        // Metadata-only ranking decides what gets its content loaded.
        candidates.sort_by(|a, b| {
            b.path_score
                .total_cmp(&a.path_score)
                .then_with(|| a.rel.len().cmp(&b.rel.len()))
                .then_with(|| a.rel.cmp(&b.rel))
        });

        let load_cap = usable.saturating_mul(LOAD_FACTOR);
        let mut loaded_tokens = 0usize;
        let mut items = Vec::new();

        for candidate in candidates {
            let critical = self.scorer.is_critical(&candidate.rel);
            if !critical && loaded_tokens >= load_cap {
                continue;
            }

            let content = match fs::read_to_string(&candidate.abs).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(file = %candidate.rel, error = %e, "skipping unreadable candidate");
                    continue;
                }
            };

            let entry_tokens = self
                .estimator
                .estimate(&format!("=== {} ===\n{}\n", candidate.rel, content));
            if !critical {
                loaded_tokens += entry_tokens;
            }

            let relevance = self.scorer.score(&candidate.rel, &content, task);
            items.push(ContextItem {
                tier: self.scorer.tier(&candidate.rel),
                path: candidate.rel,
                content: Some(content),
                estimated_tokens: entry_tokens,
                relevance,
            });
        }

        Ok(items)
    }

    /// Walk the tree under the repo root, honoring the denylist
    ///
    /// Directory entries are visited in sorted order so the candidate list
    /// is identical for identical trees.
    async fn scan(&self, task: &str) -> Result<Vec<Candidate>, EngineError> {
        let mut candidates = Vec::new();
        let mut stack = vec![self.repo_root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                    continue;
                }
            };

            let mut names = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                names.push((entry.file_name(), entry.path(), file_type.is_dir()));
            }
            names.sort_by(|a, b| a.0.cmp(&b.0));

            for (name, path, is_dir) in names {
                let Some(name) = name.to_str() else { continue };

                if name.starts_with('.') {
                    continue;
                }

                if is_dir {
                    if !self.settings.skip_dirs.iter().any(|d| d == name) {
                        stack.push(path);
                    }
                    continue;
                }

                if self.settings.skip_files.iter().any(|f| f == name) {
                    continue;
                }
                let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
                if BINARY_EXTENSIONS.contains(&ext.as_str()) {
                    continue;
                }
                if let Ok(meta) = fs::metadata(&path).await {
                    if meta.len() > self.settings.max_file_size {
                        continue;
                    }
                }

                let rel = path
                    .strip_prefix(&self.repo_root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                let path_score = self.scorer.score_path(&rel, task);
                candidates.push(Candidate {
                    abs: path,
                    rel,
                    path_score,
                });
            }
        }

        Ok(candidates)
    }
}
