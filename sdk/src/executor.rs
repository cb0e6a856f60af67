//! Agent executor boundary types
//!
//! The engine treats the agent executor as an opaque, possibly slow,
//! possibly failing black box. These are the data types that cross that
//! boundary: the edits the executor wants applied and the outcome it
//! reports. The executor trait itself lives in the engine, next to the
//! context bundle type it consumes.

use serde::{Deserialize, Serialize};

/// A single file edit produced by an agent executor
///
/// Paths are relative to the workspace root. The engine validates them
/// before applying; an edit escaping the workspace is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEdit {
    /// Workspace-relative path of the file to write
    pub path: String,

    /// Full new content of the file
    pub content: String,
}

impl FileEdit {
    /// Create a new file edit
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Result reported by an agent executor for one work unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Whether the executor considers the unit resolved
    pub success: bool,

    /// File edits to apply to the workspace
    #[serde(default)]
    pub changes: Vec<FileEdit>,

    /// Human-readable summary of what was done
    pub summary: String,

    /// Failure cause, when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    /// A successful outcome with the given summary
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            changes: Vec::new(),
            summary: summary.into(),
            error: None,
        }
    }

    /// A failed outcome with the given cause
    pub fn failure(cause: impl Into<String>) -> Self {
        let cause = cause.into();
        Self {
            success: false,
            changes: Vec::new(),
            summary: String::new(),
            error: Some(cause),
        }
    }

    /// Attach file edits to this outcome
    pub fn with_changes(mut self, changes: Vec<FileEdit>) -> Self {
        self.changes = changes;
        self
    }

    /// The failure cause, or a generic fallback
    pub fn cause(&self) -> &str {
        self.error.as_deref().unwrap_or("executor reported failure")
    }
}
