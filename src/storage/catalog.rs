//! Catalog operations: projects, repositories and users.
//!
//! Every insert is find-or-create on top of a unique constraint, so
//! concurrent workers racing on the same user end up with one row.

use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use crate::model::ImportDepth;
use crate::Result;
use super::SqliteStore;

/// A repository row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryRecord {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub import_depth: ImportDepth,
}

fn normalize_email(email: Option<&str>) -> Option<String> {
    email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
}

fn normalize_name(name: Option<&str>) -> Option<String> {
    name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

impl SqliteStore {
    // ========== Project Operations ==========

    /// Insert a project if it does not exist yet and return its id
    pub fn create_project(&self, name: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO project (name) VALUES (?1)",
            params![name],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM project WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Get a project id by name
    pub fn find_project_id(&self, name: &str) -> Result<Option<i64>> {
        let found = self.conn
            .query_row("SELECT id FROM project WHERE name = ?1", params![name], |row| row.get(0))
            .optional()?;
        if found.is_none() {
            tracing::error!("The project {} does not exist", name);
        }
        Ok(found)
    }

    /// List all project names
    pub fn list_projects(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM project ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    // ========== Repository Operations ==========

    /// Return the id of repository `name` in `project_id`, inserting it first if needed.
    ///
    /// `import_depth` is only recorded when the row is created.
    pub fn find_or_create_repository(&self, project_id: i64, name: &str, import_depth: ImportDepth) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO repository (project_id, name, import_depth) VALUES (?1, ?2, ?3)",
            params![project_id, name, import_depth.level()],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM repository WHERE project_id = ?1 AND name = ?2",
            params![project_id, name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Get a repository by project and name
    pub fn find_repository(&self, project_id: i64, name: &str) -> Result<Option<RepositoryRecord>> {
        let found = self.conn
            .query_row(
                "SELECT id, project_id, name, import_depth FROM repository WHERE project_id = ?1 AND name = ?2",
                params![project_id, name],
                |row| {
                    let level: u8 = row.get(3)?;
                    let import_depth = ImportDepth::try_from(level).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Integer, Box::new(e))
                    })?;
                    Ok(RepositoryRecord {
                        id: row.get(0)?,
                        project_id: row.get(1)?,
                        name: row.get(2)?,
                        import_depth,
                    })
                },
            )
            .optional()?;
        if found.is_none() {
            tracing::error!("The repository {} does not exist", name);
        }
        Ok(found)
    }

    // ========== User Operations ==========

    /// Return the id of the user identified by `email` (or `name` when no
    /// email is known), inserting it first if needed.
    ///
    /// Returns `None` when neither a name nor an email is available.
    pub fn find_or_create_user(&self, name: Option<&str>, email: Option<&str>) -> Result<Option<i64>> {
        let name = normalize_name(name);
        let email = normalize_email(email);
        if name.is_none() && email.is_none() {
            return Ok(None);
        }

        self.conn.execute(
            "INSERT OR IGNORE INTO users (name, email) VALUES (?1, ?2)",
            params![name, email],
        )?;

        let id = match (&email, &name) {
            (Some(email), _) => self.select_user_by_email(email)?,
            (None, Some(name)) => self.select_user_by_name(name)?,
            (None, None) => None,
        };
        Ok(id)
    }

    /// Get a user id by email
    pub fn find_user_id_by_email(&self, email: &str) -> Result<Option<i64>> {
        let Some(email) = normalize_email(Some(email)) else {
            return Ok(None);
        };
        let found = self.select_user_by_email(&email)?;
        if found.is_none() {
            tracing::warn!("There is no user with email {}", email);
        }
        Ok(found)
    }

    /// Get the id of a user known only by name
    pub fn find_user_id_by_name(&self, name: &str) -> Result<Option<i64>> {
        let found = self.select_user_by_name(name.trim())?;
        if found.is_none() {
            tracing::warn!("There is no user with name {}", name);
        }
        Ok(found)
    }

    fn select_user_by_email(&self, email: &str) -> Result<Option<i64>> {
        self.conn
            .query_row("SELECT id FROM users WHERE email = ?1", params![email], |row| row.get(0))
            .optional()
            .map_err(Into::into)
    }

    fn select_user_by_name(&self, name: &str) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT id FROM users WHERE name = ?1 AND email IS NULL",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }
}
