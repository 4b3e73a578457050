#![allow(dead_code)]

use git2::{Oid, Repository, Signature, Time};
use githist::orchestrator::{ImportRequest, Orchestrator, OrchestratorConfig, UpdateRequest};
use githist::storage::DbConfig;
use githist::ImportDepth;
use std::path::PathBuf;
use tempfile::TempDir;

pub const DAY: i64 = 86_400;
/// 2020-09-13 12:26:40 UTC
pub const START: i64 = 1_600_000_000;

pub struct TestRepo {
    pub dir: TempDir,
    pub repo: Repository,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path().join("repo")).unwrap();
        Self { dir, repo }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("repo")
    }

    pub fn db(&self) -> DbConfig {
        DbConfig::new(self.dir.path().join("githist.db"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir.path().join("logs")
    }

    /// Commit `file` with `content` on `branch`, `day` days after START
    pub fn commit(&self, branch: &str, file: &str, content: &str, parents: &[Oid], day: i64) -> Oid {
        let sig = Signature::new("Alice", "alice@example.com", &Time::new(START + day * DAY, 0)).unwrap();
        let base = parents.first().map(|p| self.repo.find_commit(*p).unwrap().tree().unwrap());
        let mut builder = self.repo.treebuilder(base.as_ref()).unwrap();
        let blob = self.repo.blob(content.as_bytes()).unwrap();
        builder.insert(file, blob, 0o100644).unwrap();
        let tree = self.repo.find_tree(builder.write().unwrap()).unwrap();
        let parent_commits: Vec<_> = parents.iter().map(|p| self.repo.find_commit(*p).unwrap()).collect();
        let parent_refs: Vec<_> = parent_commits.iter().collect();
        let refname = format!("refs/heads/{}", branch);
        self.repo
            .commit(Some(&refname), &sig, &sig, &format!("{} on {}", file, branch), &tree, &parent_refs)
            .unwrap()
    }

    pub fn tag(&self, name: &str, target: Oid) {
        let object = self.repo.find_object(target, None).unwrap();
        self.repo.tag_lightweight(name, &object, false).unwrap();
    }
}

/// Commits of the `main` / `feature-x` scenario
pub struct Scenario {
    pub repo: TestRepo,
    pub c1: Oid,
    pub c2: Oid,
    pub c3: Oid,
    pub f1: Oid,
    pub merge: Oid,
}

impl Scenario {
    pub fn all(&self) -> Vec<Oid> {
        vec![self.c1, self.c2, self.c3, self.f1, self.merge]
    }
}

/// main: c1 - c2 - c3 - merge(c3, f1); feature-x: c2 - f1
pub fn main_and_feature() -> Scenario {
    let repo = TestRepo::new();
    let c1 = repo.commit("main", "README.md", "hello\n", &[], 0);
    let c2 = repo.commit("main", "lib.rs", "fn a() {}\n", &[c1], 1);
    let f1 = repo.commit("feature-x", "feature.rs", "fn x() {}\n", &[c2], 2);
    let c3 = repo.commit("main", "lib.rs", "fn a() {}\nfn b() {}\n", &[c2], 3);
    let merge = repo.commit("main", "feature.rs", "fn x() {}\n", &[c3, f1], 4);
    Scenario { repo, c1, c2, c3, f1, merge }
}

pub fn orchestrator(repo: &TestRepo, workers: usize) -> Orchestrator {
    Orchestrator::new(OrchestratorConfig::new(repo.db()).with_workers(workers))
}

pub fn import_request(repo: &TestRepo, depth: ImportDepth) -> ImportRequest {
    ImportRequest {
        project: "P".to_string(),
        repository: "R".to_string(),
        path: repo.path(),
        cutoff: None,
        depth,
        references: None,
    }
}

pub fn update_request(repo: &TestRepo) -> UpdateRequest {
    UpdateRequest {
        project: "P".to_string(),
        repository: "R".to_string(),
        path: repo.path(),
        cutoff: None,
        workers: None,
        refresh_existing: false,
    }
}

pub fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}
