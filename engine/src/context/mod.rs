//! Context Engine
//!
//! Builds the token-bounded, relevance-ranked context bundle handed to an
//! agent executor for one work unit: token estimation, task-relative
//! scoring, budgeted selection, and assembly from the file tree plus the
//! knowledge store.

pub mod assembler;
pub mod budgeter;
pub mod estimator;
pub mod scorer;
pub mod types;

pub use assembler::ContextAssembler;
pub use budgeter::{ContextBudgeter, CriticalOverrun, Selection};
pub use estimator::{ModelFamily, TokenEstimator};
pub use scorer::RelevanceScorer;
pub use types::{BundleItem, ContextBundle, ContextItem, FileCategory, KnowledgeExcerpt, Tier};
