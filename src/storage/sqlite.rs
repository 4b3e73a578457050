//! SQLite storage implementation

use std::path::PathBuf;
use std::time::Duration;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use crate::Result;
use super::schema;

/// Default time a writer waits on a locked database before failing
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Connection descriptor handed to every connection, unchanged.
///
/// Extraction tasks carry a copy of this value and open their own
/// connection with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// SQLite-backed storage for imported git history
pub struct SqliteStore {
    pub(super) conn: Connection,
}

impl SqliteStore {
    /// Open a database file (creates it and the schema if missing)
    pub fn open(config: &DbConfig) -> Result<Self> {
        let store = Self::connect(config)?;
        store.conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        store.initialize_schema()?;
        Ok(store)
    }

    /// Open a connection to an already initialized database.
    ///
    /// Used by workers, which must not race on schema creation.
    pub fn connect(config: &DbConfig) -> Result<Self> {
        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn initialize_schema(&self) -> Result<()> {
        for stmt in schema::all_schema_statements() {
            self.conn.execute(stmt, [])?;
        }
        Ok(())
    }

    /// Close the connection, reporting any error from the driver
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| crate::Error::from(e))
    }

    // ========== Transactions ==========

    /// Begin a write transaction, taking the write lock immediately
    pub fn begin_transaction(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE TRANSACTION")?;
        Ok(())
    }

    /// Commit a transaction
    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    /// Rollback a transaction
    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Run `f` inside one write transaction; rolls back if it fails
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.begin_transaction()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback() {
                    tracing::warn!("Rollback failed after error '{}': {}", e, rollback_err);
                }
                Err(e)
            }
        }
    }

    // ========== Statistics ==========

    fn count(&self, sql: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        Ok(DbStats {
            projects: self.count("SELECT COUNT(*) FROM project")?,
            repositories: self.count("SELECT COUNT(*) FROM repository")?,
            references: self.count("SELECT COUNT(*) FROM reference")?,
            commits: self.count("SELECT COUNT(*) FROM commits")?,
            users: self.count("SELECT COUNT(*) FROM users")?,
            file_modifications: self.count("SELECT COUNT(*) FROM file_modification")?,
            unresolved_parents: self.count("SELECT COUNT(*) FROM commit_parent WHERE parent_id IS NULL")?,
        })
    }

    /// Statistics for one repository
    pub fn repository_stats(&self, repository_id: i64) -> Result<RepositoryStats> {
        let references: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM reference WHERE repository_id = ?1",
            params![repository_id],
            |row| row.get(0),
        )?;
        let commits: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM commits WHERE repository_id = ?1",
            params![repository_id],
            |row| row.get(0),
        )?;
        let (linked, unresolved): (i64, i64) = self.conn.query_row(
            r#"
            SELECT COALESCE(SUM(cp.parent_id IS NOT NULL), 0), COALESCE(SUM(cp.parent_id IS NULL), 0)
            FROM commit_parent cp JOIN commits c ON cp.commit_id = c.id
            WHERE c.repository_id = ?1
            "#,
            params![repository_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(RepositoryStats {
            references: references as usize,
            commits: commits as usize,
            linked_parents: linked as usize,
            unresolved_parents: unresolved as usize,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    pub projects: usize,
    pub repositories: usize,
    pub references: usize,
    pub commits: usize,
    pub users: usize,
    pub file_modifications: usize,
    pub unresolved_parents: usize,
}

impl std::fmt::Display for DbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        writeln!(f, "  Projects: {}", self.projects)?;
        writeln!(f, "  Repositories: {}", self.repositories)?;
        writeln!(f, "  References: {}", self.references)?;
        writeln!(f, "  Commits: {}", self.commits)?;
        writeln!(f, "  Users: {}", self.users)?;
        writeln!(f, "  File modifications: {}", self.file_modifications)?;
        writeln!(f, "  Unresolved parents: {}", self.unresolved_parents)
    }
}

/// Per-repository statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryStats {
    pub references: usize,
    pub commits: usize,
    pub linked_parents: usize,
    pub unresolved_parents: usize,
}
