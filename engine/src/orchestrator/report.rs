//! Run reports
//!
//! The aggregate a run hands back: one entry per attempted unit, in actual
//! completion order (parallel units finish in whatever order they finish),
//! with a human-readable cause for every failure. No silent drops.

use serde::Serialize;

/// Final disposition of one attempted unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    /// Executed and resolved
    Completed,
    /// Executed and failed (or the execution pipeline failed around it)
    Failed,
    /// Not executed: claim conflict, cancellation, or dry run
    Skipped,
}

/// Per-unit result within a run
#[derive(Debug, Clone, Serialize)]
pub struct UnitOutcome {
    pub unit_id: String,
    pub title: String,
    pub kind: OutcomeKind,
    /// Summary for successes, cause for failures, reason for skips
    pub detail: String,
    /// Learning codified from this unit, when one was saved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_id: Option<String>,
    /// Bundle size, when a bundle was built
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_tokens: Option<usize>,
    pub duration_ms: u64,
}

/// Aggregate of one orchestrator run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Outcomes in completion order
    pub outcomes: Vec<UnitOutcome>,
    pub dry_run: bool,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn completed(&self) -> usize {
        self.count(OutcomeKind::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(OutcomeKind::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(OutcomeKind::Skipped)
    }

    fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.iter().filter(|o| o.kind == kind).count()
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        format!(
            "{} attempted: {} completed, {} failed, {} skipped",
            self.outcomes.len(),
            self.completed(),
            self.failed(),
            self.skipped()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, kind: OutcomeKind) -> UnitOutcome {
        UnitOutcome {
            unit_id: id.into(),
            title: "t".into(),
            kind,
            detail: "d".into(),
            learning_id: None,
            bundle_tokens: None,
            duration_ms: 1,
        }
    }

    #[test]
    fn test_counts_and_summary() {
        let report = RunReport {
            outcomes: vec![
                outcome("1", OutcomeKind::Completed),
                outcome("2", OutcomeKind::Completed),
                outcome("3", OutcomeKind::Failed),
                outcome("4", OutcomeKind::Skipped),
            ],
            dry_run: false,
            duration_ms: 10,
        };

        assert_eq!(report.completed(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.summary(), "4 attempted: 2 completed, 1 failed, 1 skipped");
    }
}
