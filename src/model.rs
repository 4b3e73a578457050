//! Domain value types shared by the store, the git reader and the extractor.
//!
//! - `ImportDepth`: how much of each commit is captured
//! - `RefType`: local branch, remote-tracking branch or tag
//! - `ChangeStatus`: how a file changed in a commit

use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Level of detail captured per commit.
///
/// Levels are cumulative: every level stores what the previous one does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ImportDepth {
    /// Commit metadata and per-file change statistics
    #[default]
    Metadata = 1,
    /// Patch text for every file modification
    Patches = 2,
    /// Patch text plus one row per added/removed line
    LineDetail = 3,
}

impl ImportDepth {
    pub fn level(&self) -> u8 {
        *self as u8
    }

    pub fn includes_patches(&self) -> bool {
        *self >= ImportDepth::Patches
    }

    pub fn includes_lines(&self) -> bool {
        *self >= ImportDepth::LineDetail
    }
}

impl TryFrom<u8> for ImportDepth {
    type Error = Error;

    fn try_from(level: u8) -> Result<Self> {
        match level {
            1 => Ok(ImportDepth::Metadata),
            2 => Ok(ImportDepth::Patches),
            3 => Ok(ImportDepth::LineDetail),
            other => Err(Error::InvalidDepth(other)),
        }
    }
}

impl From<ImportDepth> for u8 {
    fn from(depth: ImportDepth) -> u8 {
        depth.level()
    }
}

impl std::fmt::Display for ImportDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// Kind of a git reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    Branch,
    Remote,
    Tag,
}

impl RefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefType::Branch => "branch",
            RefType::Remote => "remote",
            RefType::Tag => "tag",
        }
    }
}

impl FromStr for RefType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "branch" | "local" => Ok(RefType::Branch),
            "remote" => Ok(RefType::Remote),
            "tag" => Ok(RefType::Tag),
            _ => Err(Error::UnknownValue { kind: "reference type", value: s.to_string() }),
        }
    }
}

impl std::fmt::Display for RefType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a file changed in a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Deleted,
    Modified,
    Renamed,
    Copied,
    TypeChange,
    Other,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Added => "added",
            ChangeStatus::Deleted => "deleted",
            ChangeStatus::Modified => "modified",
            ChangeStatus::Renamed => "renamed",
            ChangeStatus::Copied => "copied",
            ChangeStatus::TypeChange => "typechange",
            ChangeStatus::Other => "other",
        }
    }
}

impl From<git2::Delta> for ChangeStatus {
    fn from(delta: git2::Delta) -> Self {
        match delta {
            git2::Delta::Added | git2::Delta::Untracked => ChangeStatus::Added,
            git2::Delta::Deleted => ChangeStatus::Deleted,
            git2::Delta::Modified => ChangeStatus::Modified,
            git2::Delta::Renamed => ChangeStatus::Renamed,
            git2::Delta::Copied => ChangeStatus::Copied,
            git2::Delta::Typechange => ChangeStatus::TypeChange,
            _ => ChangeStatus::Other,
        }
    }
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Side of a diff a line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Added,
    Removed,
}

impl LineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineKind::Added => "added",
            LineKind::Removed => "removed",
        }
    }
}

/// One added or removed line of a patch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineChange {
    pub kind: LineKind,
    /// Line number in the new file for additions, in the old file for removals
    pub line_number: u32,
    pub content: String,
}

/// A file touched by a commit, relative to its first parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub old_path: Option<String>,
    pub status: ChangeStatus,
    pub additions: usize,
    pub deletions: usize,
    pub patch: Option<String>,
    pub lines: Vec<LineChange>,
}

impl FileChange {
    pub fn changes(&self) -> usize {
        self.additions + self.deletions
    }

    /// Extension of `path`, without the dot
    pub fn extension(&self) -> Option<&str> {
        std::path::Path::new(&self.path).extension().and_then(|e| e.to_str())
    }
}

/// Parse a `YYYY-MM-DD` cutoff date
pub fn parse_cutoff(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| Error::InvalidDate(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_depth_levels() {
        assert_eq!(ImportDepth::try_from(1).unwrap(), ImportDepth::Metadata);
        assert_eq!(ImportDepth::try_from(3).unwrap(), ImportDepth::LineDetail);
        assert!(matches!(ImportDepth::try_from(4), Err(Error::InvalidDepth(4))));
        assert!(matches!(ImportDepth::try_from(0), Err(Error::InvalidDepth(0))));
    }

    #[test]
    fn test_import_depth_is_cumulative() {
        assert!(!ImportDepth::Metadata.includes_patches());
        assert!(ImportDepth::Patches.includes_patches());
        assert!(!ImportDepth::Patches.includes_lines());
        assert!(ImportDepth::LineDetail.includes_patches());
        assert!(ImportDepth::LineDetail.includes_lines());
    }

    #[test]
    fn test_import_depth_serializes_as_level() {
        assert_eq!(serde_json::to_string(&ImportDepth::Patches).unwrap(), "2");
        let parsed: ImportDepth = serde_json::from_str("3").unwrap();
        assert_eq!(parsed, ImportDepth::LineDetail);
        assert!(serde_json::from_str::<ImportDepth>("7").is_err());
    }

    #[test]
    fn test_ref_type_parse() {
        assert_eq!("tag".parse::<RefType>().unwrap(), RefType::Tag);
        assert_eq!("Branch".parse::<RefType>().unwrap(), RefType::Branch);
        assert!("note".parse::<RefType>().is_err());
    }

    #[test]
    fn test_file_change_helpers() {
        let change = FileChange {
            path: "src/lib.rs".to_string(),
            old_path: None,
            status: ChangeStatus::Modified,
            additions: 3,
            deletions: 2,
            patch: None,
            lines: Vec::new(),
        };
        assert_eq!(change.changes(), 5);
        assert_eq!(change.extension(), Some("rs"));
    }

    #[test]
    fn test_parse_cutoff() {
        let date = parse_cutoff("2021-03-04").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2021, 3, 4).unwrap());
        assert!(matches!(parse_cutoff("04/03/2021"), Err(Error::InvalidDate(_))));
    }
}
