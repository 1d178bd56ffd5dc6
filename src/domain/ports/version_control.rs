//! Version control port.

use async_trait::async_trait;
use std::path::Path;

use crate::domain::errors::DomainResult;
use crate::domain::models::{CommitOutcome, DiffSummary, MergeOutcome, WorktreeInfo};

/// Working-copy and branch operations used by the agents.
///
/// Every task gets its own worktree on a task branch; task branches merge
/// into a feature branch and feature branches merge into main.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Name of the integration branch.
    fn main_branch(&self) -> &str;

    /// Branch name for a feature.
    fn feature_branch_name(&self, feature_id: &str) -> String;

    /// Branch name for a task within a feature.
    fn task_branch_name(&self, feature_id: &str, task_id: &str) -> String;

    /// Create an isolated worktree for a task, branching from the feature
    /// branch (created from main when missing).
    async fn create_task_worktree(&self, feature_id: &str, task_id: &str) -> DomainResult<WorktreeInfo>;

    /// Remove a worktree directory.
    async fn remove_worktree(&self, path: &Path, force: bool) -> DomainResult<()>;

    /// Check whether a local branch exists.
    async fn branch_exists(&self, name: &str) -> DomainResult<bool>;

    /// List local branches.
    async fn list_branches(&self) -> DomainResult<Vec<String>>;

    /// Summarize what `head` adds on top of `base`.
    async fn get_diff_summary(&self, base: &str, head: &str) -> DomainResult<DiffSummary>;

    /// Files that would conflict when merging `source` into `target`, without
    /// touching any working copy.
    async fn preview_conflicts(&self, target: &str, source: &str) -> DomainResult<Vec<String>>;

    /// Merge a task branch into its feature branch.
    async fn merge_task_into_feature(&self, feature_id: &str, task_id: &str) -> DomainResult<MergeOutcome>;

    /// Merge a feature branch into main.
    async fn merge_feature_into_main(&self, feature_id: &str) -> DomainResult<MergeOutcome>;

    /// Abort an in-progress merge in `dir`.
    async fn abort_merge(&self, dir: &Path) -> DomainResult<()>;

    /// Commit a merge whose conflicts have been resolved; returns the commit
    /// hash.
    async fn commit_merge(&self, dir: &Path, message: &str) -> DomainResult<String>;

    /// Stage and commit everything outstanding in `dir`.
    async fn commit_all(&self, dir: &Path, message: &str) -> DomainResult<CommitOutcome>;

    /// Uncommitted changed files (tracked and untracked) in `dir`.
    async fn changed_files(&self, dir: &Path) -> DomainResult<Vec<String>>;

    /// Files still unmerged in `dir`.
    async fn conflicted_files(&self, dir: &Path) -> DomainResult<Vec<String>>;

    /// Stage the given files in `dir`.
    async fn stage_files(&self, dir: &Path, files: &[String]) -> DomainResult<()>;
}
