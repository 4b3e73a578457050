//! Per-reference extraction
//!
//! An `ExtractionTask` is a plain record describing one reference to import.
//! A `TaskRunner` executes it; `GitExtractor` is the libgit2-backed runner
//! used by the orchestrator.

use std::path::PathBuf;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use crate::git::{CommitInfo, GitRepository};
use crate::model::{FileChange, ImportDepth};
use crate::storage::{DbConfig, NewCommit, SqliteStore};
use crate::Result;

/// One unit of work: import a single reference of a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionTask {
    pub repository_id: i64,
    pub repo_path: PathBuf,
    /// Commits authored after this date are skipped
    pub cutoff: Option<NaiveDate>,
    pub depth: ImportDepth,
    pub reference: String,
    pub db: DbConfig,
    /// Walk only commits not reachable from this one
    pub since: Option<String>,
}

impl std::fmt::Display for ExtractionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reference)
    }
}

/// What a finished task did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionSummary {
    pub reference: String,
    /// Commits visited on the reference
    pub walked: usize,
    /// Commits this task inserted
    pub inserted: usize,
    /// Commits already stored by another reference or an earlier run
    pub existing: usize,
    /// Commits authored after the cutoff date
    pub skipped: usize,
    /// Tip recorded on the reference row
    pub tip: Option<String>,
}

/// Executes extraction tasks. Implementations must be usable from many
/// worker threads at once.
pub trait TaskRunner: Send + Sync {
    fn run(&self, task: &ExtractionTask) -> Result<ExtractionSummary>;
}

/// Imports a reference by walking its history with libgit2
#[derive(Debug, Clone, Copy, Default)]
pub struct GitExtractor;

impl GitExtractor {
    pub fn new() -> Self {
        Self
    }

    fn store_commit(
        &self,
        store: &SqliteStore,
        task: &ExtractionTask,
        reference_id: i64,
        info: &CommitInfo,
        changes: &[FileChange],
    ) -> Result<bool> {
        store.with_transaction(|tx| {
            let author_id = tx.find_or_create_user(info.author.name.as_deref(), info.author.email.as_deref())?;
            let committer_id = tx.find_or_create_user(info.committer.name.as_deref(), info.committer.email.as_deref())?;
            let commit = NewCommit {
                hash: info.hash.clone(),
                author_id,
                committer_id,
                authored_at: info.authored_at.to_rfc3339(),
                committed_at: info.committed_at.to_rfc3339(),
                message: info.message.clone(),
                parent_hashes: info.parents.clone(),
            };

            let inserted = tx.insert_commit(task.repository_id, &commit)?;
            if inserted.is_new() {
                tx.insert_commit_parents(task.repository_id, inserted.id(), &info.parents)?;
                for change in changes {
                    tx.insert_file_change(task.repository_id, inserted.id(), change)?;
                }
            }
            tx.link_commit_to_reference(inserted.id(), reference_id)?;
            Ok(inserted.is_new())
        })
    }
}

impl TaskRunner for GitExtractor {
    fn run(&self, task: &ExtractionTask) -> Result<ExtractionSummary> {
        let repo = GitRepository::open(&task.repo_path)?;
        let tip = repo.resolve(&task.reference)?;
        let store = SqliteStore::connect(&task.db)?;

        let reference_id = store.find_or_create_reference(task.repository_id, &task.reference, tip.ref_type)?;
        let oids = repo.walk(&tip.target, task.since.as_deref())?;
        tracing::debug!("Reference {}: {} commits to visit", task.reference, oids.len());

        let mut summary = ExtractionSummary {
            reference: task.reference.clone(),
            ..Default::default()
        };
        let mut last_included = None;

        for oid in oids {
            let info = repo.commit_info(oid)?;
            summary.walked += 1;
            if task.cutoff.is_some_and(|cutoff| !info.authored_by(cutoff)) {
                summary.skipped += 1;
                continue;
            }

            // diffs are only computed for commits nobody stored yet
            let changes = if store.find_commit_id(task.repository_id, &info.hash)?.is_none() {
                repo.file_changes(oid, task.depth)?
            } else {
                Vec::new()
            };

            if self.store_commit(&store, task, reference_id, &info, &changes)? {
                summary.inserted += 1;
            } else {
                summary.existing += 1;
            }
            last_included = Some(info.hash);
        }

        // with a cutoff the recorded tip is the newest imported commit
        let recorded = if summary.skipped == 0 { Some(tip.target) } else { last_included };
        if let Some(hash) = &recorded {
            store.set_reference_tip(reference_id, hash)?;
        }
        summary.tip = recorded;

        store.close()?;
        tracing::info!(
            "Reference {} imported: {} new, {} already stored, {} after cutoff",
            summary.reference, summary.inserted, summary.existing, summary.skipped
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Oid, Repository, Signature};

    fn commit(repo: &Repository, refname: &str, file: &str, content: &str, parents: &[Oid], time: i64) -> Oid {
        let sig = Signature::new("Alice", "alice@example.com", &git2::Time::new(time, 0)).unwrap();
        let base = parents.first().map(|p| repo.find_commit(*p).unwrap().tree().unwrap());
        let mut builder = repo.treebuilder(base.as_ref()).unwrap();
        let blob = repo.blob(content.as_bytes()).unwrap();
        builder.insert(file, blob, 0o100644).unwrap();
        let tree = repo.find_tree(builder.write().unwrap()).unwrap();
        let parent_commits: Vec<_> = parents.iter().map(|p| repo.find_commit(*p).unwrap()).collect();
        let parent_refs: Vec<_> = parent_commits.iter().collect();
        repo.commit(Some(refname), &sig, &sig, "change", &tree, &parent_refs).unwrap()
    }

    fn setup() -> (tempfile::TempDir, i64, DbConfig) {
        let dir = tempfile::tempdir().unwrap();
        let db = DbConfig::new(dir.path().join("history.db"));
        let store = SqliteStore::open(&db).unwrap();
        let project = store.create_project("p").unwrap();
        let repo_id = store.find_or_create_repository(project, "r", ImportDepth::Metadata).unwrap();
        store.close().unwrap();
        (dir, repo_id, db)
    }

    fn task(repository_id: i64, path: &std::path::Path, db: &DbConfig, reference: &str) -> ExtractionTask {
        ExtractionTask {
            repository_id,
            repo_path: path.to_path_buf(),
            cutoff: None,
            depth: ImportDepth::Metadata,
            reference: reference.to_string(),
            db: db.clone(),
            since: None,
        }
    }

    #[test]
    fn test_extract_reference_and_reimport() {
        let (dir, repo_id, db) = setup();
        let git_dir = dir.path().join("repo");
        let repo = Repository::init(&git_dir).unwrap();
        let c1 = commit(&repo, "refs/heads/main", "a.txt", "1\n", &[], 1_600_000_000);
        let c2 = commit(&repo, "refs/heads/main", "a.txt", "2\n", &[c1], 1_600_100_000);

        let first = GitExtractor.run(&task(repo_id, &git_dir, &db, "main")).unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(first.tip, Some(c2.to_string()));

        let second = GitExtractor.run(&task(repo_id, &git_dir, &db, "main")).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.existing, 2);

        let store = SqliteStore::connect(&db).unwrap();
        let child = store.find_commit_id(repo_id, &c2.to_string()).unwrap().unwrap();
        let parents = store.commit_parents(child).unwrap();
        assert_eq!(parents[0].parent_id, store.find_commit_id(repo_id, &c1.to_string()).unwrap());
        assert_eq!(store.stats().unwrap().users, 1);
    }

    #[test]
    fn test_cutoff_skips_later_commits() {
        let (dir, repo_id, db) = setup();
        let git_dir = dir.path().join("repo");
        let repo = Repository::init(&git_dir).unwrap();
        // 2020-09-13 and 2020-09-14 (UTC)
        let c1 = commit(&repo, "refs/heads/main", "a.txt", "1\n", &[], 1_600_000_000);
        commit(&repo, "refs/heads/main", "a.txt", "2\n", &[c1], 1_600_100_000);

        let mut t = task(repo_id, &git_dir, &db, "main");
        t.cutoff = Some(NaiveDate::from_ymd_opt(2020, 9, 13).unwrap());
        let summary = GitExtractor.run(&t).unwrap();

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.tip, Some(c1.to_string()));
    }

    #[test]
    fn test_missing_reference_fails() {
        let (dir, repo_id, db) = setup();
        let git_dir = dir.path().join("repo");
        let repo = Repository::init(&git_dir).unwrap();
        commit(&repo, "refs/heads/main", "a.txt", "1\n", &[], 1_600_000_000);

        assert!(GitExtractor.run(&task(repo_id, &git_dir, &db, "ghost")).is_err());
    }

    #[test]
    fn test_task_is_serializable() {
        let t = ExtractionTask {
            repository_id: 7,
            repo_path: PathBuf::from("/tmp/repo"),
            cutoff: NaiveDate::from_ymd_opt(2021, 1, 31),
            depth: ImportDepth::Patches,
            reference: "main".to_string(),
            db: DbConfig::new("/tmp/db.sqlite"),
            since: None,
        };
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"depth\":2"));
        let back: ExtractionTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
