//! Relevance scoring
//!
//! Scores a candidate file against a task description. Three signals feed
//! the score: membership in the critical-files allowlist (build manifests,
//! readmes), keyword overlap between the task and the path (plus a small
//! bonus when a task keyword appears in the content head), and a category
//! prior that ranks source over config over docs over generated files.
//!
//! Scoring is a pure function: same (path, content, task) always yields the
//! same score, which is what makes bundles reproducible.

use std::collections::BTreeSet;

use super::types::{FileCategory, Tier};

/// Minimum keyword length; shorter words are noise ("a", "the", "fix")
const MIN_KEYWORD_LEN: usize = 4;

/// How much of the content head participates in keyword matching
const CONTENT_SAMPLE_BYTES: usize = 1000;

/// Task-relative file scorer
#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    critical_files: Vec<String>,
}

impl RelevanceScorer {
    /// Create a scorer with the given critical-files allowlist
    pub fn new(critical_files: Vec<String>) -> Self {
        Self { critical_files }
    }

    /// Whether the path names a critical file (matched by file name)
    pub fn is_critical(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);
        self.critical_files.iter().any(|c| c == name)
    }

    /// Tier of a candidate path
    pub fn tier(&self, path: &str) -> Tier {
        if self.is_critical(path) {
            Tier::Critical
        } else {
            Tier::Scored
        }
    }

    /// Score from path and task alone
    ///
    /// Used for the metadata-only first pass, before any content is read.
    pub fn score_path(&self, path: &str, task: &str) -> f32 {
        if self.is_critical(path) {
            return 1.0;
        }

        let mut score = 0.1;

        let task_keywords = keywords(task);
        let path_keywords = keywords(&path.replace(['/', '_', '-', '.'], " "));
        let overlap = task_keywords.intersection(&path_keywords).count();
        if overlap > 0 {
            score += 0.3 + 0.1 * overlap as f32;
        }

        let weighted = score * FileCategory::from_path(path).weight();
        weighted.min(0.9)
    }

    /// Full score including a content sample
    ///
    /// Adds a small bonus when any task keyword appears in the first
    /// kilobyte of the file.
    pub fn score(&self, path: &str, content: &str, task: &str) -> f32 {
        if self.is_critical(path) {
            return 1.0;
        }

        let mut score = self.score_path(path, task);

        let mut head_end = content.len().min(CONTENT_SAMPLE_BYTES);
        while head_end > 0 && !content.is_char_boundary(head_end) {
            head_end -= 1;
        }
        let head = content[..head_end].to_lowercase();
        if keywords(task).iter().any(|k| head.contains(k.as_str())) {
            score += 0.1;
        }

        score.min(0.95)
    }
}

/// Lowercased keywords of minimum length, in deterministic order
fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= MIN_KEYWORD_LEN)
        .map(|w| w.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> RelevanceScorer {
        RelevanceScorer::new(vec!["Cargo.toml".into(), "README.md".into()])
    }

    #[test]
    fn test_critical_files_score_top() {
        let s = scorer();
        assert_eq!(s.score_path("Cargo.toml", "anything"), 1.0);
        assert_eq!(s.score_path("docs/README.md", "anything"), 1.0);
        assert_eq!(s.tier("Cargo.toml"), Tier::Critical);
    }

    #[test]
    fn test_path_keyword_overlap_boosts() {
        let s = scorer();
        let relevant = s.score_path("src/auth/login.rs", "fix login validation");
        let unrelated = s.score_path("src/render/canvas.rs", "fix login validation");
        assert!(relevant > unrelated);
    }

    #[test]
    fn test_category_prior_orders_source_over_docs() {
        let s = scorer();
        let source = s.score_path("src/parser.rs", "improve parser performance");
        let docs = s.score_path("notes/parser.md", "improve parser performance");
        assert!(source > docs);
    }

    #[test]
    fn test_content_sample_bonus() {
        let s = scorer();
        let with_hit = s.score("src/db.rs", "handles login sessions", "fix login");
        let without = s.score("src/db.rs", "unrelated content here", "fix login");
        assert!(with_hit > without);
    }

    #[test]
    fn test_deterministic() {
        let s = scorer();
        let a = s.score("src/auth.rs", "validates tokens", "token validation bug");
        let b = s.score("src/auth.rs", "validates tokens", "token validation bug");
        assert_eq!(a, b);
    }

    #[test]
    fn test_scores_bounded() {
        let s = scorer();
        let task = "login login auth auth session session token token";
        let path = "src/login/auth/session/token/login_auth_session_token.rs";
        assert!(s.score_path(path, task) <= 0.9);
        assert!(s.score(path, "login auth session token", task) <= 0.95);
    }

    #[test]
    fn test_multibyte_content_sample() {
        let s = scorer();
        // Content head cut must not split a multi-byte char
        let content = "é".repeat(2000);
        let _ = s.score("src/misc.rs", &content, "anything goes here");
    }
}
