//! Merge, conflict and working-copy models shared by the version-control
//! port and the merge agents.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Suggested way to resolve a single conflicting file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    Ours,
    Theirs,
    Both,
    Manual,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ours => "ours",
            Self::Theirs => "theirs",
            Self::Both => "both",
            Self::Manual => "manual",
        }
    }

    /// Lenient parse used on model output; anything unrecognized is manual.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "ours" => Self::Ours,
            "theirs" => Self::Theirs,
            "both" => Self::Both,
            _ => Self::Manual,
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analysis of one conflicting file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConflictAnalysis {
    pub file: String,
    pub analysis: String,
    pub suggested_resolution: ConflictResolution,
}

/// Result of the AI conflict-analysis pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictAnalysis {
    pub conflicts: Vec<FileConflictAnalysis>,
    pub recommendation: String,
    /// Advisory. Reported to observers; it does not stop an automatic
    /// resolution that the merge agent is configured to run.
    pub auto_resolvable: bool,
}

impl ConflictAnalysis {
    /// Analysis used when the model output could not be interpreted.
    pub fn manual_fallback(files: &[String], recommendation: impl Into<String>) -> Self {
        Self {
            conflicts: files
                .iter()
                .map(|f| FileConflictAnalysis {
                    file: f.clone(),
                    analysis: "Automatic analysis unavailable; review this file manually.".to_string(),
                    suggested_resolution: ConflictResolution::Manual,
                })
                .collect(),
            recommendation: recommendation.into(),
            auto_resolvable: false,
        }
    }
}

/// Isolated working copy created for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: String,
}

/// Short diff summary between two branches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
    pub files: Vec<String>,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.files_changed == 0
    }
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} file(s) changed, {} insertion(s), {} deletion(s)",
            self.files_changed, self.insertions, self.deletions
        )
    }
}

/// Outcome of a merge attempt.
///
/// A conflicted merge is left in progress in `merge_dir` so it can be
/// resolved, committed or aborted there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub success: bool,
    pub conflicts: Vec<String>,
    pub commit_sha: Option<String>,
    pub merge_dir: Option<PathBuf>,
    pub error: Option<String>,
}

impl MergeOutcome {
    pub fn clean(commit_sha: impl Into<String>, merge_dir: PathBuf) -> Self {
        Self {
            success: true,
            commit_sha: Some(commit_sha.into()),
            merge_dir: Some(merge_dir),
            ..Default::default()
        }
    }

    pub fn conflicted(conflicts: Vec<String>, merge_dir: PathBuf) -> Self {
        Self {
            success: false,
            conflicts,
            merge_dir: Some(merge_dir),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Result of committing everything outstanding in a working copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    /// `None` when there was nothing to commit
    pub commit_hash: Option<String>,
    pub files_changed: usize,
}
