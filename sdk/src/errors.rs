//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the Cairn engine.
//! All errors implement the `ErrorExt` trait, which provides user-facing
//! hints and classifies an error as run-fatal or unit-scoped.
//!
//! The propagation policy is strict: only configuration-level errors may
//! abort a run before any work unit is claimed. Everything else is recorded
//! against the unit it happened on, and the batch continues.

use thiserror::Error;

/// Trait for Cairn error extensions
///
/// Provides additional context for errors: a hint safe to show to end
/// users, and whether the error must abort the whole run.
pub trait ErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error aborts the whole run
    ///
    /// Run-fatal errors are configuration problems detected before any unit
    /// is claimed. All other errors are scoped to a single work unit: the
    /// unit is recorded as failed (or skipped) and the batch continues.
    fn is_run_fatal(&self) -> bool;
}

/// Main engine error type
///
/// Each variant maps to one failure class of the orchestration core:
///
/// - **Validation**: bad pattern or configuration; aborts the run
/// - **ClaimConflict**: another worker owns the unit; expected under
///   concurrency, recovered by skipping
/// - **TerminalState** / **UnitNotFound**: registry state machine violations
/// - **Executor** / **ExecutorTimeout**: the external agent executor failed
/// - **Storage**: knowledge store or registry medium unwritable
/// - **Isolation**: workspace create/merge/cleanup failure
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration and pattern errors (run-fatal)
    #[error("Validation error: {0}")]
    Validation(String),

    // Registry errors
    #[error("Unit {0} is already claimed or not ready")]
    ClaimConflict(String),

    #[error("Unit {id} is in terminal state {status}")]
    TerminalState { id: String, status: String },

    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    // Agent executor errors
    #[error("Executor failed: {0}")]
    Executor(String),

    #[error("Executor timed out after {0}s")]
    ExecutorTimeout(u64),

    // Context budget errors (only under the strict overrun policy)
    #[error("Critical context exceeds budget: {used} > {available} tokens")]
    BudgetExceeded { used: usize, available: usize },

    // Persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Workspace errors
    #[error("Isolation error: {0}")]
    Isolation(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Validation(_) => "Check the pattern and configuration values",
            Self::ClaimConflict(_) => "Another worker claimed this unit first",
            Self::TerminalState { .. } => {
                "Completed, failed, or abandoned units accept no further transitions"
            }
            Self::UnitNotFound(_) => "No unit with this id exists in the registry",
            Self::Executor(_) => "The agent executor reported a failure for this unit",
            Self::ExecutorTimeout(_) => "The agent executor exceeded the configured timeout",
            Self::BudgetExceeded { .. } => "Raise the context budget or trim the critical files list",
            Self::Storage(_) => "Check that the data directory exists and is writable",
            Self::Isolation(_) => "Workspace setup or merge failed. Check the git worktree state",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_run_fatal(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
