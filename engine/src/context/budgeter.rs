//! Context budgeting
//!
//! Given a ranked list of scored candidates and a token budget, selects the
//! subset that goes into the bundle. Critical items are included
//! unconditionally; scored items greedily by descending relevance, stopping
//! at the first one that does not fit. Greedy-by-rank trades token-packing
//! optimality for topical relevance and reproducibility.

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};

use super::estimator::TokenEstimator;
use super::types::{ContextItem, Tier};

/// Policy when critical items alone exceed the usable budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CriticalOverrun {
    /// Include them anyway, flag the bundle and emit a warning
    #[default]
    Warn,
    /// Fail the bundle build for this unit
    Fail,
}

/// Result of a budgeting pass
#[derive(Debug, Clone)]
pub struct Selection {
    /// Chosen items with content loaded, critical first then by rank
    pub items: Vec<ContextItem>,
    /// Token total of everything included
    pub total_tokens: usize,
    /// True when anything was dropped, clipped, or over budget
    pub truncated: bool,
    /// Overrun and clipping notes
    pub warnings: Vec<String>,
}

/// Budget-bounded greedy selector
#[derive(Debug, Clone)]
pub struct ContextBudgeter {
    estimator: TokenEstimator,
    policy: CriticalOverrun,
}

impl ContextBudgeter {
    /// Create a budgeter with the given estimator and overrun policy
    pub fn new(estimator: TokenEstimator, policy: CriticalOverrun) -> Self {
        Self { estimator, policy }
    }

    /// Select items so that `total_tokens <= budget - reserve`
    ///
    /// The single sanctioned exception is critical overrun under the `Warn`
    /// policy, which is reported through `truncated` and `warnings` rather
    /// than enforced. Ordering inside each tier is by descending score,
    /// then shorter path, then lexicographic path — identical inputs always
    /// produce identical selections.
    pub fn select(
        &self,
        items: Vec<ContextItem>,
        budget: usize,
        reserve: usize,
    ) -> Result<Selection, EngineError> {
        let available = budget.saturating_sub(reserve);

        let mut critical: Vec<ContextItem> = Vec::new();
        let mut scored: Vec<ContextItem> = Vec::new();
        for item in items {
            match item.tier {
                Tier::Critical => critical.push(item),
                Tier::Scored => scored.push(item),
                Tier::Excluded => {}
            }
        }

        rank(&mut critical);
        rank(&mut scored);

        let mut selected = Vec::new();
        let mut total = 0usize;
        let mut truncated = false;
        let mut warnings = Vec::new();

        for item in critical {
            total += item.estimated_tokens;
            selected.push(item);
        }

        if total > available {
            match self.policy {
                CriticalOverrun::Warn => {
                    truncated = true;
                    warnings.push(format!(
                        "critical files use {total} tokens, over the {available} available"
                    ));
                }
                CriticalOverrun::Fail => {
                    return Err(EngineError::BudgetExceeded {
                        used: total,
                        available,
                    });
                }
            }
        }

        let mut scored_used = 0usize;
        for mut item in scored {
            let remaining = available.saturating_sub(total);

            if item.estimated_tokens <= remaining {
                total += item.estimated_tokens;
                scored_used += item.estimated_tokens;
                selected.push(item);
                continue;
            }

            // The top-ranked scored item gets clipped rather than dropped,
            // so every bundle carries at least some task-relevant content
            // when any room is left at all.
            if scored_used == 0 && remaining > 0 {
                if let Some(content) = item.content.take() {
                    let clipped = self.estimator.clip(&content, remaining);
                    item.estimated_tokens = self.estimator.estimate(&clipped);
                    item.content = Some(clipped);
                    total += item.estimated_tokens;
                    warnings.push(format!("clipped {} to fit the remaining budget", item.path));
                    selected.push(item);
                }
            }

            // Greedy-by-rank: no skipping ahead to smaller items.
            truncated = true;
            break;
        }

        Ok(Selection {
            items: selected,
            total_tokens: total,
            truncated,
            warnings,
        })
    }
}

/// Deterministic ranking: score desc, then shorter path, then lexicographic
fn rank(items: &mut [ContextItem]) {
    items.sort_by(|a, b| {
        b.relevance
            .total_cmp(&a.relevance)
            .then_with(|| a.path.len().cmp(&b.path.len()))
            .then_with(|| a.path.cmp(&b.path))
    });
}
