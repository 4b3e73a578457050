//! Git access layer
//!
//! Reads references, commit metadata and per-commit diffs through libgit2.
//! Every caller opens its own `GitRepository`; handles are never shared
//! across threads.

use std::collections::HashMap;
use std::path::Path;
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use git2::{Oid, Repository, Sort};
use crate::model::{ChangeStatus, FileChange, ImportDepth, LineChange, LineKind, RefType};
use crate::{Error, Result};

/// Produces the reference names present in a local repository
pub trait ReferenceEnumerator: Send + Sync {
    fn enumerate(&self, repo_path: &Path) -> Result<Vec<String>>;
}

/// Default enumerator backed by libgit2
#[derive(Debug, Clone, Copy, Default)]
pub struct GitReferences;

impl ReferenceEnumerator for GitReferences {
    fn enumerate(&self, repo_path: &Path) -> Result<Vec<String>> {
        let repo = GitRepository::open(repo_path)?;
        Ok(repo.references()?.into_iter().map(|r| r.name).collect())
    }
}

/// A reference and the commit it points to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceInfo {
    pub name: String,
    pub ref_type: RefType,
    pub target: String,
}

/// Person as recorded in a commit signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Metadata of one commit
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub hash: String,
    pub author: Person,
    pub committer: Person,
    pub authored_at: DateTime<FixedOffset>,
    pub committed_at: DateTime<FixedOffset>,
    pub message: String,
    /// Parent hashes in git order
    pub parents: Vec<String>,
}

impl CommitInfo {
    /// Whether the commit was authored on or before `cutoff`
    pub fn authored_by(&self, cutoff: NaiveDate) -> bool {
        self.authored_at.date_naive() <= cutoff
    }
}

/// An opened git repository
pub struct GitRepository {
    repo: Repository,
}

impl GitRepository {
    /// Open the repository at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::open(path)?;
        Ok(Self { repo })
    }

    /// Branches, remote-tracking branches and tags that point to commits.
    ///
    /// Symbolic references such as `origin/HEAD` are skipped. Names are
    /// shorthands (`main`, `origin/main`, `v1.0`) unless two references
    /// share a shorthand, in which case both keep their full name
    /// (`refs/heads/v1`, `refs/tags/v1`). Sorted alphabetically.
    pub fn references(&self) -> Result<Vec<ReferenceInfo>> {
        let mut found = Vec::new();

        for reference in self.repo.references()? {
            let reference = reference?;
            if reference.kind() != Some(git2::ReferenceType::Direct) {
                continue;
            }
            let ref_type = if reference.is_tag() {
                RefType::Tag
            } else if reference.is_remote() {
                RefType::Remote
            } else if reference.is_branch() {
                RefType::Branch
            } else {
                continue;
            };
            let (Some(full_name), Some(shorthand)) = (reference.name(), reference.shorthand()) else {
                continue;
            };
            let commit = match reference.peel_to_commit() {
                Ok(commit) => commit,
                Err(e) => {
                    tracing::debug!("Skipping reference {} (no commit): {}", full_name, e);
                    continue;
                }
            };
            found.push((
                full_name.to_string(),
                shorthand.to_string(),
                ref_type,
                commit.id().to_string(),
            ));
        }

        let mut shorthands: HashMap<&str, usize> = HashMap::new();
        for (_, shorthand, _, _) in &found {
            *shorthands.entry(shorthand.as_str()).or_default() += 1;
        }

        let mut refs: Vec<ReferenceInfo> = found
            .iter()
            .map(|(full_name, shorthand, ref_type, target)| {
                let name = if shorthands[shorthand.as_str()] > 1 { full_name } else { shorthand };
                ReferenceInfo { name: name.clone(), ref_type: *ref_type, target: target.clone() }
            })
            .collect();
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(refs)
    }

    /// Resolve a name returned by `references`, or a full refname, to its
    /// tip commit
    pub fn resolve(&self, name: &str) -> Result<ReferenceInfo> {
        if let Some(info) = self.references()?.into_iter().find(|r| r.name == name) {
            return Ok(info);
        }
        if !name.starts_with("refs/") {
            return Err(Error::ReferenceNotFound(name.to_string()));
        }

        let reference = self.repo
            .find_reference(name)
            .map_err(|_| Error::ReferenceNotFound(name.to_string()))?;
        let ref_type = if reference.is_tag() {
            RefType::Tag
        } else if reference.is_remote() {
            RefType::Remote
        } else {
            RefType::Branch
        };
        let commit = reference.peel_to_commit()?;
        Ok(ReferenceInfo { name: name.to_string(), ref_type, target: commit.id().to_string() })
    }

    /// Commits reachable from `tip`, parents before children.
    ///
    /// With `since`, commits reachable from that commit are left out. An
    /// unknown `since` falls back to the full history.
    pub fn walk(&self, tip: &str, since: Option<&str>) -> Result<Vec<Oid>> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
        revwalk.push(Oid::from_str(tip)?)?;

        if let Some(since) = since {
            match Oid::from_str(since).ok().filter(|oid| self.repo.find_commit(*oid).is_ok()) {
                Some(oid) => revwalk.hide(oid)?,
                None => tracing::warn!("Start commit {} not found, walking the full history", since),
            }
        }

        let oids = revwalk.collect::<std::result::Result<Vec<Oid>, git2::Error>>()?;
        Ok(oids)
    }

    /// Metadata of one commit
    pub fn commit_info(&self, oid: Oid) -> Result<CommitInfo> {
        let commit = self.repo.find_commit(oid)?;
        let author = commit.author();
        let committer = commit.committer();

        Ok(CommitInfo {
            hash: oid.to_string(),
            author: person(&author),
            committer: person(&committer),
            authored_at: to_datetime(author.when()),
            committed_at: to_datetime(committer.when()),
            message: String::from_utf8_lossy(commit.message_bytes()).trim_end().to_string(),
            parents: commit.parent_ids().map(|p| p.to_string()).collect(),
        })
    }

    /// Files changed by a commit relative to its first parent.
    ///
    /// Patch text is kept from `ImportDepth::Patches`, line details from
    /// `ImportDepth::LineDetail`.
    pub fn file_changes(&self, oid: Oid, depth: ImportDepth) -> Result<Vec<FileChange>> {
        let commit = self.repo.find_commit(oid)?;
        let tree = commit.tree()?;
        let parent_tree = if commit.parent_count() > 0 {
            Some(commit.parent(0)?.tree()?)
        } else {
            None
        };

        let mut diff = self.repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
        diff.find_similar(None)?;

        let mut changes = Vec::new();
        for idx in 0..diff.deltas().len() {
            let Some(delta) = diff.get_delta(idx) else {
                continue;
            };
            let status = ChangeStatus::from(delta.status());
            let new_path = delta.new_file().path().map(|p| p.to_string_lossy().into_owned());
            let old_path = delta.old_file().path().map(|p| p.to_string_lossy().into_owned());
            let Some(path) = new_path.clone().or_else(|| old_path.clone()) else {
                continue;
            };
            let old_path = old_path.filter(|old| Some(old) != new_path.as_ref());

            let mut change = FileChange {
                path,
                old_path,
                status,
                additions: 0,
                deletions: 0,
                patch: None,
                lines: Vec::new(),
            };

            // binary files have no patch
            if let Some(mut patch) = git2::Patch::from_diff(&diff, idx)? {
                let (_, additions, deletions) = patch.line_stats()?;
                change.additions = additions;
                change.deletions = deletions;
                if depth.includes_lines() {
                    change.lines = patch_lines(&patch)?;
                }
                if depth.includes_patches() {
                    let buf = patch.to_buf()?;
                    change.patch = Some(String::from_utf8_lossy(&buf).into_owned());
                }
            }
            changes.push(change);
        }
        Ok(changes)
    }
}

fn person(signature: &git2::Signature<'_>) -> Person {
    Person {
        name: signature.name().map(str::to_string),
        email: signature.email().map(str::to_string),
    }
}

fn to_datetime(time: git2::Time) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(time.offset_minutes() * 60).unwrap_or_else(|| Utc.fix());
    DateTime::<Utc>::from_timestamp(time.seconds(), 0)
        .unwrap_or_default()
        .with_timezone(&offset)
}

fn patch_lines(patch: &git2::Patch<'_>) -> Result<Vec<LineChange>> {
    let mut lines = Vec::new();
    for hunk in 0..patch.num_hunks() {
        for idx in 0..patch.num_lines_in_hunk(hunk)? {
            let line = patch.line_in_hunk(hunk, idx)?;
            let (kind, line_number) = match line.origin() {
                '+' => (LineKind::Added, line.new_lineno()),
                '-' => (LineKind::Removed, line.old_lineno()),
                _ => continue,
            };
            let Some(line_number) = line_number else {
                continue;
            };
            let content = String::from_utf8_lossy(line.content())
                .trim_end_matches(['\n', '\r'])
                .to_string();
            lines.push(LineChange { kind, line_number, content });
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;

    fn commit(repo: &Repository, refname: &str, files: &[(&str, &str)], parents: &[Oid], time: i64) -> Oid {
        let sig = Signature::new("Alice", "alice@example.com", &git2::Time::new(time, 60)).unwrap();
        let base = parents.first().map(|p| repo.find_commit(*p).unwrap().tree().unwrap());
        let mut builder = repo.treebuilder(base.as_ref()).unwrap();
        for (path, content) in files {
            let blob = repo.blob(content.as_bytes()).unwrap();
            builder.insert(path, blob, 0o100644).unwrap();
        }
        let tree = repo.find_tree(builder.write().unwrap()).unwrap();
        let parent_commits: Vec<_> = parents.iter().map(|p| repo.find_commit(*p).unwrap()).collect();
        let parent_refs: Vec<_> = parent_commits.iter().collect();
        repo.commit(Some(refname), &sig, &sig, "change", &tree, &parent_refs).unwrap()
    }

    #[test]
    fn test_references_and_walk_order() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let c1 = commit(&repo, "refs/heads/main", &[("a.txt", "one\n")], &[], 1_600_000_000);
        let c2 = commit(&repo, "refs/heads/main", &[("a.txt", "one\ntwo\n")], &[c1], 1_600_000_100);
        let c3 = commit(&repo, "refs/heads/feature", &[("b.txt", "b\n")], &[c2], 1_600_000_200);
        repo.tag_lightweight("v1", &repo.find_object(c1, None).unwrap(), false).unwrap();

        let git = GitRepository::open(dir.path()).unwrap();
        let refs = git.references().unwrap();
        let names: Vec<_> = refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["feature", "main", "v1"]);
        assert_eq!(refs[2].ref_type, RefType::Tag);

        let feature = git.resolve("feature").unwrap();
        assert_eq!(feature.target, c3.to_string());
        let walked = git.walk(&feature.target, None).unwrap();
        assert_eq!(walked, vec![c1, c2, c3]);

        let since = git.walk(&feature.target, Some(&c2.to_string())).unwrap();
        assert_eq!(since, vec![c3]);

        let enumerated = GitReferences.enumerate(dir.path()).unwrap();
        assert_eq!(enumerated.len(), 3);
    }

    #[test]
    fn test_branch_and_tag_sharing_a_name() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let c1 = commit(&repo, "refs/heads/main", &[("a.txt", "one\n")], &[], 1_600_000_000);
        let c2 = commit(&repo, "refs/heads/v1", &[("a.txt", "two\n")], &[c1], 1_600_000_100);
        repo.tag_lightweight("v1", &repo.find_object(c1, None).unwrap(), false).unwrap();

        let git = GitRepository::open(dir.path()).unwrap();
        let refs = git.references().unwrap();
        let names: Vec<_> = refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["main", "refs/heads/v1", "refs/tags/v1"]);

        let branch = git.resolve("refs/heads/v1").unwrap();
        assert_eq!(branch.ref_type, RefType::Branch);
        assert_eq!(branch.target, c2.to_string());
        let tag = git.resolve("refs/tags/v1").unwrap();
        assert_eq!(tag.ref_type, RefType::Tag);
        assert_eq!(tag.target, c1.to_string());

        // the bare shorthand is ambiguous and no longer enumerated
        assert!(matches!(git.resolve("v1"), Err(Error::ReferenceNotFound(_))));
        assert_eq!(git.resolve("refs/heads/main").unwrap().target, c1.to_string());
    }

    #[test]
    fn test_unknown_reference() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        commit(&repo, "refs/heads/main", &[("a.txt", "one\n")], &[], 1_600_000_000);

        let git = GitRepository::open(dir.path()).unwrap();
        assert!(matches!(git.resolve("nope"), Err(Error::ReferenceNotFound(_))));
    }

    #[test]
    fn test_commit_info_and_changes_by_depth() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let c1 = commit(&repo, "refs/heads/main", &[("a.txt", "one\n")], &[], 1_600_000_000);
        let c2 = commit(&repo, "refs/heads/main", &[("a.txt", "one\ntwo\n")], &[c1], 1_600_000_100);

        let git = GitRepository::open(dir.path()).unwrap();
        let info = git.commit_info(c2).unwrap();
        assert_eq!(info.parents, vec![c1.to_string()]);
        assert_eq!(info.author.email.as_deref(), Some("alice@example.com"));
        assert_eq!(info.authored_at.offset().local_minus_utc(), 3600);
        assert!(info.authored_by(NaiveDate::from_ymd_opt(2020, 9, 13).unwrap()));
        assert!(!info.authored_by(NaiveDate::from_ymd_opt(2020, 9, 12).unwrap()));

        let metadata = git.file_changes(c2, ImportDepth::Metadata).unwrap();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0].status, ChangeStatus::Modified);
        assert_eq!(metadata[0].additions, 1);
        assert!(metadata[0].patch.is_none());
        assert!(metadata[0].lines.is_empty());

        let detailed = git.file_changes(c2, ImportDepth::LineDetail).unwrap();
        assert!(detailed[0].patch.as_deref().unwrap().contains("+two"));
        assert_eq!(
            detailed[0].lines,
            vec![LineChange { kind: LineKind::Added, line_number: 2, content: "two".to_string() }]
        );

        let root = git.file_changes(c1, ImportDepth::Patches).unwrap();
        assert_eq!(root[0].status, ChangeStatus::Added);
    }
}
