//! History operations: references, commits, parent links and file changes

use std::collections::{HashMap, HashSet};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use crate::model::{FileChange, RefType};
use crate::Result;
use super::SqliteStore;

/// Commit attributes as extracted from git
#[derive(Debug, Clone)]
pub struct NewCommit {
    pub hash: String,
    pub author_id: Option<i64>,
    pub committer_id: Option<i64>,
    pub authored_at: String,
    pub committed_at: String,
    pub message: String,
    /// Parent hashes in git order
    pub parent_hashes: Vec<String>,
}

impl NewCommit {
    fn joined_parents(&self) -> String {
        self.parent_hashes.join(" ")
    }
}

/// Outcome of inserting a commit that may already be stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitInsert {
    /// This call created the row
    Inserted(i64),
    /// Another reference (or an earlier run) stored it first
    Existing(i64),
}

impl CommitInsert {
    pub fn id(&self) -> i64 {
        match self {
            CommitInsert::Inserted(id) | CommitInsert::Existing(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, CommitInsert::Inserted(_))
    }
}

/// A stored reference with its commit count
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceRecord {
    pub id: i64,
    pub name: String,
    pub ref_type: String,
    pub last_commit: Option<String>,
    pub commits: usize,
}

/// One row of `commit_parent`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub parent_hash: String,
    pub sequence: u32,
    pub parent_id: Option<i64>,
}

impl SqliteStore {
    // ========== Reference Operations ==========

    /// Return the id of reference `name`, inserting it first if needed
    pub fn find_or_create_reference(&self, repository_id: i64, name: &str, ref_type: RefType) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO reference (repository_id, name, ref_type) VALUES (?1, ?2, ?3)",
            params![repository_id, name, ref_type.as_str()],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM reference WHERE repository_id = ?1 AND name = ?2",
            params![repository_id, name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Get a reference id by name
    pub fn find_reference_id(&self, repository_id: i64, name: &str) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT id FROM reference WHERE repository_id = ?1 AND name = ?2",
                params![repository_id, name],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Names of all references already imported for a repository
    pub fn existing_references(&self, repository_id: i64) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT ref.name FROM reference ref JOIN repository r ON ref.repository_id = r.id WHERE r.id = ?1"
        )?;
        let names = stmt
            .query_map([repository_id], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(names)
    }

    /// Tip commit recorded for each imported reference
    pub fn reference_tips(&self, repository_id: i64) -> Result<HashMap<String, Option<String>>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, last_commit FROM reference WHERE repository_id = ?1"
        )?;
        let tips = stmt
            .query_map([repository_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<HashMap<String, Option<String>>>>()?;
        Ok(tips)
    }

    /// Record the tip commit reached by an extraction
    pub fn set_reference_tip(&self, reference_id: i64, hash: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE reference SET last_commit = ?2 WHERE id = ?1",
            params![reference_id, hash],
        )?;
        Ok(())
    }

    /// All references of a repository with their commit counts
    pub fn list_references(&self, repository_id: i64) -> Result<Vec<ReferenceRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT ref.id, ref.name, ref.ref_type, ref.last_commit, COUNT(cir.commit_id)
            FROM reference ref
            LEFT JOIN commit_in_reference cir ON cir.reference_id = ref.id
            WHERE ref.repository_id = ?1
            GROUP BY ref.id
            ORDER BY ref.name
            "#
        )?;
        let refs = stmt
            .query_map([repository_id], |row| {
                let commits: i64 = row.get(4)?;
                Ok(ReferenceRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    ref_type: row.get(2)?,
                    last_commit: row.get(3)?,
                    commits: commits as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(refs)
    }

    // ========== Commit Operations ==========

    /// Get a commit id by hash
    pub fn find_commit_id(&self, repository_id: i64, hash: &str) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT id FROM commits WHERE repository_id = ?1 AND hash = ?2",
                params![repository_id, hash],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Insert a commit unless a row with the same hash already exists
    pub fn insert_commit(&self, repository_id: i64, commit: &NewCommit) -> Result<CommitInsert> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO commits
                (repository_id, hash, author_id, committer_id, authored_at, committed_at, message, parent_hashes)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                repository_id,
                commit.hash,
                commit.author_id,
                commit.committer_id,
                commit.authored_at,
                commit.committed_at,
                commit.message,
                commit.joined_parents(),
            ],
        )?;

        if inserted > 0 {
            return Ok(CommitInsert::Inserted(self.conn.last_insert_rowid()));
        }
        let id = self.conn.query_row(
            "SELECT id FROM commits WHERE repository_id = ?1 AND hash = ?2",
            params![repository_id, commit.hash],
            |row| row.get(0),
        )?;
        Ok(CommitInsert::Existing(id))
    }

    /// Insert the parent links of a commit, in order.
    ///
    /// `parent_id` is resolved when the parent is already stored and left
    /// NULL otherwise. Existing rows are kept as they are.
    pub fn insert_commit_parents(&self, repository_id: i64, commit_id: i64, parent_hashes: &[String]) -> Result<usize> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            INSERT OR IGNORE INTO commit_parent (commit_id, parent_hash, sequence, parent_id)
            VALUES (?1, ?2, ?3, (SELECT id FROM commits WHERE repository_id = ?4 AND hash = ?2))
            "#
        )?;
        let mut inserted = 0;
        for (sequence, parent_hash) in parent_hashes.iter().enumerate() {
            inserted += stmt.execute(params![commit_id, parent_hash, sequence as i64, repository_id])?;
        }
        Ok(inserted)
    }

    /// Parent links of a commit ordered by sequence
    pub fn commit_parents(&self, commit_id: i64) -> Result<Vec<ParentLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT parent_hash, sequence, parent_id FROM commit_parent WHERE commit_id = ?1 ORDER BY sequence"
        )?;
        let links = stmt
            .query_map([commit_id], |row| {
                Ok(ParentLink {
                    parent_hash: row.get(0)?,
                    sequence: row.get(1)?,
                    parent_id: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }

    /// Commits that record parent hashes but have no `commit_parent` rows
    pub fn commits_missing_parent_links(&self, repository_id: i64) -> Result<Vec<(i64, Vec<String>)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT c.id, c.parent_hashes FROM commits c
            WHERE c.repository_id = ?1 AND c.parent_hashes <> ''
              AND NOT EXISTS (SELECT 1 FROM commit_parent cp WHERE cp.commit_id = c.id)
            ORDER BY c.id
            "#
        )?;
        let rows = stmt
            .query_map([repository_id], |row| {
                let joined: String = row.get(1)?;
                let parents = joined.split_whitespace().map(str::to_string).collect();
                Ok((row.get(0)?, parents))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Fill `parent_id` on every unresolved link whose parent is now stored
    pub fn resolve_parent_links(&self, repository_id: i64) -> Result<usize> {
        let updated = self.conn.execute(
            r#"
            UPDATE commit_parent
            SET parent_id = (
                SELECT p.id FROM commits p
                WHERE p.repository_id = ?1 AND p.hash = commit_parent.parent_hash
            )
            WHERE parent_id IS NULL
              AND commit_id IN (SELECT id FROM commits WHERE repository_id = ?1)
              AND EXISTS (
                SELECT 1 FROM commits p
                WHERE p.repository_id = ?1 AND p.hash = commit_parent.parent_hash
              )
            "#,
            params![repository_id],
        )?;
        Ok(updated)
    }

    /// Links whose parent commit is not stored in the repository
    pub fn count_unresolved_parents(&self, repository_id: i64) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM commit_parent cp
            JOIN commits c ON cp.commit_id = c.id
            WHERE c.repository_id = ?1 AND cp.parent_id IS NULL
            "#,
            params![repository_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Remove the parent links of a commit
    pub fn delete_commit_parents(&self, commit_id: i64) -> Result<usize> {
        let deleted = self.conn.execute("DELETE FROM commit_parent WHERE commit_id = ?1", params![commit_id])?;
        Ok(deleted)
    }

    /// Mark a commit as reachable from a reference
    pub fn link_commit_to_reference(&self, commit_id: i64, reference_id: i64) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO commit_in_reference (commit_id, reference_id) VALUES (?1, ?2)",
            params![commit_id, reference_id],
        )?;
        Ok(())
    }

    /// Hashes of the commits linked to a reference
    pub fn commits_in_reference(&self, reference_id: i64) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.hash FROM commits c JOIN commit_in_reference cir ON cir.commit_id = c.id WHERE cir.reference_id = ?1"
        )?;
        let hashes = stmt
            .query_map([reference_id], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(hashes)
    }

    // ========== File Operations ==========

    /// Return the id of file `path`, inserting it first if needed
    pub fn find_or_create_file(&self, repository_id: i64, path: &str, extension: Option<&str>) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO file (repository_id, name, extension) VALUES (?1, ?2, ?3)",
            params![repository_id, path, extension],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM file WHERE repository_id = ?1 AND name = ?2",
            params![repository_id, path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Store one file change of a commit together with its line details.
    ///
    /// Patch text and lines are stored as given; the caller decides what to
    /// keep for the import depth.
    pub fn insert_file_change(&self, repository_id: i64, commit_id: i64, change: &FileChange) -> Result<Option<i64>> {
        let file_id = self.find_or_create_file(repository_id, &change.path, change.extension())?;
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO file_modification
                (commit_id, file_id, status, additions, deletions, changes, patch)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                commit_id,
                file_id,
                change.status.as_str(),
                change.additions as i64,
                change.deletions as i64,
                change.changes() as i64,
                change.patch,
            ],
        )?;
        if inserted == 0 {
            return Ok(None);
        }

        let modification_id = self.conn.last_insert_rowid();
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO line_detail (file_modification_id, kind, line_number, content) VALUES (?1, ?2, ?3, ?4)"
        )?;
        for line in &change.lines {
            stmt.execute(params![modification_id, line.kind.as_str(), line.line_number, line.content])?;
        }
        Ok(Some(modification_id))
    }

    /// Count line detail rows stored for a commit
    pub fn count_line_details(&self, commit_id: i64) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM line_detail ld
            JOIN file_modification fm ON ld.file_modification_id = fm.id
            WHERE fm.commit_id = ?1
            "#,
            params![commit_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// File modifications of a commit as (path, status, patch)
    pub fn file_modifications(&self, commit_id: i64) -> Result<Vec<(String, String, Option<String>)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT f.name, fm.status, fm.patch FROM file_modification fm
            JOIN file f ON fm.file_id = f.id
            WHERE fm.commit_id = ?1
            ORDER BY f.name
            "#
        )?;
        let rows = stmt
            .query_map([commit_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChangeStatus, ImportDepth, LineChange, LineKind};

    fn setup() -> (SqliteStore, i64) {
        let store = SqliteStore::open_in_memory().unwrap();
        let project = store.create_project("p").unwrap();
        let repo = store.find_or_create_repository(project, "r", ImportDepth::Metadata).unwrap();
        (store, repo)
    }

    fn sample_commit(hash: &str, parents: &[&str]) -> NewCommit {
        NewCommit {
            hash: hash.to_string(),
            author_id: None,
            committer_id: None,
            authored_at: "2020-01-01T00:00:00+00:00".to_string(),
            committed_at: "2020-01-01T00:00:00+00:00".to_string(),
            message: format!("commit {}", hash),
            parent_hashes: parents.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn test_reference_find_or_create() {
        let (store, repo) = setup();
        let main = store.find_or_create_reference(repo, "main", RefType::Branch).unwrap();
        let again = store.find_or_create_reference(repo, "main", RefType::Branch).unwrap();
        store.find_or_create_reference(repo, "v1.0", RefType::Tag).unwrap();

        assert_eq!(main, again);
        let existing = store.existing_references(repo).unwrap();
        assert_eq!(existing.len(), 2);
        assert!(existing.contains("main"));
        assert!(existing.contains("v1.0"));
    }

    #[test]
    fn test_existing_references_scoped_to_repository() {
        let (store, repo) = setup();
        let project = store.create_project("other").unwrap();
        let other = store.find_or_create_repository(project, "r", ImportDepth::Metadata).unwrap();
        store.find_or_create_reference(repo, "main", RefType::Branch).unwrap();
        store.find_or_create_reference(other, "dev", RefType::Branch).unwrap();

        let names = store.existing_references(repo).unwrap();
        assert_eq!(names, HashSet::from(["main".to_string()]));
    }

    #[test]
    fn test_insert_commit_twice_reports_existing() {
        let (store, repo) = setup();
        let first = store.insert_commit(repo, &sample_commit("aaa", &[])).unwrap();
        let second = store.insert_commit(repo, &sample_commit("aaa", &[])).unwrap();

        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.id(), second.id());
        assert_eq!(store.stats().unwrap().commits, 1);
    }

    #[test]
    fn test_parent_resolved_when_present() {
        let (store, repo) = setup();
        let parent = store.insert_commit(repo, &sample_commit("p1", &[])).unwrap().id();
        let child = store.insert_commit(repo, &sample_commit("c1", &["p1", "p2"])).unwrap().id();
        store.insert_commit_parents(repo, child, &["p1".to_string(), "p2".to_string()]).unwrap();

        let links = store.commit_parents(child).unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].parent_hash, "p1");
        assert_eq!(links[0].sequence, 0);
        assert_eq!(links[0].parent_id, Some(parent));
        assert_eq!(links[1].parent_hash, "p2");
        assert_eq!(links[1].parent_id, None);
    }

    #[test]
    fn test_reference_tips_and_listing() {
        let (store, repo) = setup();
        let main = store.find_or_create_reference(repo, "main", RefType::Branch).unwrap();
        let commit = store.insert_commit(repo, &sample_commit("aaa", &[])).unwrap().id();
        store.link_commit_to_reference(commit, main).unwrap();
        store.link_commit_to_reference(commit, main).unwrap();
        store.set_reference_tip(main, "aaa").unwrap();

        let tips = store.reference_tips(repo).unwrap();
        assert_eq!(tips.get("main"), Some(&Some("aaa".to_string())));

        let refs = store.list_references(repo).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].commits, 1);
        assert_eq!(store.commits_in_reference(main).unwrap(), HashSet::from(["aaa".to_string()]));
    }

    #[test]
    fn test_file_change_with_lines() {
        let (store, repo) = setup();
        let commit = store.insert_commit(repo, &sample_commit("aaa", &[])).unwrap().id();
        let change = FileChange {
            path: "README.md".to_string(),
            old_path: None,
            status: ChangeStatus::Added,
            additions: 2,
            deletions: 0,
            patch: Some("+hello\n+world\n".to_string()),
            lines: vec![
                LineChange { kind: LineKind::Added, line_number: 1, content: "hello".to_string() },
                LineChange { kind: LineKind::Added, line_number: 2, content: "world".to_string() },
            ],
        };

        assert!(store.insert_file_change(repo, commit, &change).unwrap().is_some());
        assert!(store.insert_file_change(repo, commit, &change).unwrap().is_none());
        assert_eq!(store.count_line_details(commit).unwrap(), 2);

        let mods = store.file_modifications(commit).unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].0, "README.md");
        assert_eq!(mods[0].1, "added");
    }
}
