//! Storage Layer - SQLite-backed persistence
//!
//! System of record is SQLite with tables:
//! - project(name), repository(project_id, name, import_depth)
//! - reference(repository_id, name, ref_type, last_commit)
//! - commits(repository_id, hash, author_id, committer_id, authored_at, committed_at, message, parent_hashes)
//! - commit_parent(commit_id, parent_hash, sequence, parent_id)
//! - commit_in_reference(commit_id, reference_id)
//! - users(name, email)
//! - file, file_modification, line_detail

pub mod schema;
pub mod sqlite;
pub mod catalog;
pub mod history;

pub use sqlite::{SqliteStore, DbConfig, DbStats, RepositoryStats, DEFAULT_BUSY_TIMEOUT_MS};
pub use catalog::RepositoryRecord;
pub use history::{NewCommit, CommitInsert, ReferenceRecord, ParentLink};
