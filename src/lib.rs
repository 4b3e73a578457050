//! # githist - Git history ingestion
//!
//! Imports the history of a git repository into a normalized SQLite store.
//!
//! githist provides:
//! - A catalog of projects, repositories and deduplicated users
//! - Per-reference extraction of commits, authorship and optional patch content
//! - A bounded worker pool that imports references in parallel
//! - A post-pass that repairs commit-parent linkage across references
//! - Incremental re-synchronization that skips already-imported references

pub mod model;
pub mod storage;
pub mod git;
pub mod extract;
pub mod pool;
pub mod fixup;
pub mod orchestrator;
pub mod config;
pub mod logging;
pub mod ui;

// Re-exports for convenient access
pub use model::{ImportDepth, RefType, ChangeStatus};
pub use storage::{DbConfig, SqliteStore};
pub use extract::{ExtractionTask, GitExtractor, TaskRunner};
pub use pool::{WorkerPool, PoolStats};
pub use fixup::{ParentFixup, FixupStats};
pub use orchestrator::{Orchestrator, OrchestratorConfig, ImportRequest, UpdateRequest, RunReport, RunError, RunState};

/// Result type alias for githist operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for githist operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid date '{0}' (expected YYYY-MM-DD)")]
    InvalidDate(String),

    #[error("Invalid import depth {0} (expected 1, 2 or 3)")]
    InvalidDepth(u8),

    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("Unknown value '{value}' for {kind}")]
    UnknownValue { kind: &'static str, value: String },
}
