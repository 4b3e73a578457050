//! Commit-parent consistency pass
//!
//! References are imported in parallel, so a commit may be stored before
//! its parent and keep a `commit_parent` row with a NULL `parent_id`. This
//! pass runs after every worker finished and repairs those rows for one
//! repository.

use std::fmt;
use serde::Serialize;
use crate::storage::SqliteStore;
use crate::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FixupStats {
    /// Parent links re-created from the commits' recorded parent hashes
    pub restored: usize,
    /// Links whose `parent_id` was filled in
    pub relinked: usize,
    /// Links still pointing outside the imported history
    pub unresolved: usize,
}

impl FixupStats {
    pub fn changed(&self) -> bool {
        self.restored > 0 || self.relinked > 0
    }
}

impl fmt::Display for FixupStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Parent Fixup Stats:")?;
        writeln!(f, "  Restored links: {}", self.restored)?;
        writeln!(f, "  Relinked parents: {}", self.relinked)?;
        writeln!(f, "  Unresolved parents: {}", self.unresolved)
    }
}

pub struct ParentFixup<'a> {
    store: &'a SqliteStore,
}

impl<'a> ParentFixup<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    /// Repair the parent linkage of `repository_id` in one write transaction
    pub fn run(&self, repository_id: i64) -> Result<FixupStats> {
        let stats = self.store.with_transaction(|tx| {
            let mut restored = 0;
            for (commit_id, parents) in tx.commits_missing_parent_links(repository_id)? {
                restored += tx.insert_commit_parents(repository_id, commit_id, &parents)?;
            }
            let relinked = tx.resolve_parent_links(repository_id)?;
            let unresolved = tx.count_unresolved_parents(repository_id)?;
            Ok(FixupStats { restored, relinked, unresolved })
        })?;

        if stats.changed() {
            tracing::info!(
                "Parent fixup for repository {}: {} restored, {} relinked, {} unresolved",
                repository_id, stats.restored, stats.relinked, stats.unresolved
            );
        } else {
            tracing::debug!("Parent fixup for repository {}: nothing to repair", repository_id);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImportDepth;
    use crate::storage::NewCommit;

    fn commit(hash: &str, parents: &[&str]) -> NewCommit {
        NewCommit {
            hash: hash.to_string(),
            author_id: None,
            committer_id: None,
            authored_at: "2021-03-01T10:00:00+00:00".to_string(),
            committed_at: "2021-03-01T10:00:00+00:00".to_string(),
            message: String::new(),
            parent_hashes: parents.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn setup() -> (SqliteStore, i64) {
        let store = SqliteStore::open_in_memory().unwrap();
        let project = store.create_project("p").unwrap();
        let repo = store.find_or_create_repository(project, "r", ImportDepth::Metadata).unwrap();
        (store, repo)
    }

    #[test]
    fn test_child_stored_before_parent_is_relinked() {
        let (store, repo) = setup();
        let child = store.insert_commit(repo, &commit("c", &["p"])).unwrap().id();
        store.insert_commit_parents(repo, child, &["p".to_string()]).unwrap();
        let parent = store.insert_commit(repo, &commit("p", &[])).unwrap().id();
        assert_eq!(store.commit_parents(child).unwrap()[0].parent_id, None);

        let stats = ParentFixup::new(&store).run(repo).unwrap();
        assert_eq!(stats, FixupStats { restored: 0, relinked: 1, unresolved: 0 });
        assert_eq!(store.commit_parents(child).unwrap()[0].parent_id, Some(parent));
    }

    #[test]
    fn test_missing_links_restored_in_order() {
        let (store, repo) = setup();
        let a = store.insert_commit(repo, &commit("a", &[])).unwrap().id();
        let b = store.insert_commit(repo, &commit("b", &[])).unwrap().id();
        let merge = store.insert_commit(repo, &commit("m", &["b", "a", "outside"])).unwrap().id();

        let stats = ParentFixup::new(&store).run(repo).unwrap();
        assert_eq!(stats.restored, 3);
        assert_eq!(stats.unresolved, 1);

        let links = store.commit_parents(merge).unwrap();
        let ids: Vec<_> = links.iter().map(|l| l.parent_id).collect();
        assert_eq!(ids, vec![Some(b), Some(a), None]);
    }

    #[test]
    fn test_second_run_changes_nothing() {
        let (store, repo) = setup();
        let child = store.insert_commit(repo, &commit("c", &["p"])).unwrap().id();
        store.insert_commit_parents(repo, child, &["p".to_string()]).unwrap();
        store.insert_commit(repo, &commit("p", &[])).unwrap();

        let first = ParentFixup::new(&store).run(repo).unwrap();
        assert!(first.changed());
        let second = ParentFixup::new(&store).run(repo).unwrap();
        assert!(!second.changed());
        assert_eq!(second.unresolved, 0);
    }

    #[test]
    fn test_scoped_to_repository() {
        let (store, repo) = setup();
        let project = store.create_project("q").unwrap();
        let other = store.find_or_create_repository(project, "r", ImportDepth::Metadata).unwrap();

        let child = store.insert_commit(repo, &commit("c", &["p"])).unwrap().id();
        store.insert_commit_parents(repo, child, &["p".to_string()]).unwrap();
        // same hash in a different repository must not be linked
        store.insert_commit(other, &commit("p", &[])).unwrap();

        let stats = ParentFixup::new(&store).run(repo).unwrap();
        assert_eq!(stats.relinked, 0);
        assert_eq!(stats.unresolved, 1);
    }
}
