//! Git version-control adapter.
//!
//! Shells out to `git`. Task worktrees live under the configured worktree
//! directory as `task-<feature>-<task>` on branch `<task_prefix><feature>/<task>`.
//! Each feature branch gets its own worktree (`feature-<feature>`) which is
//! where task branches are merged; feature branches are merged into main in
//! the repository root, which must have main checked out.

mod branch;

pub use branch::validate_branch_name;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CommitOutcome, DiffSummary, GitConfig, MergeOutcome, WorktreeInfo};
use crate::domain::ports::VersionControl;

use branch::{feature_worktree_dir_name, task_worktree_dir_name, validate_identifier};

/// `git` subprocess implementation of [`VersionControl`].
#[derive(Debug, Clone)]
pub struct GitVersionControl {
    repo_path: PathBuf,
    worktree_root: PathBuf,
    main_branch: String,
    feature_prefix: String,
    task_prefix: String,
}

impl GitVersionControl {
    pub fn new(config: &GitConfig) -> DomainResult<Self> {
        validate_branch_name(&config.main_branch)?;
        let repo_path = PathBuf::from(&config.repo_path);
        let worktree_root = if Path::new(&config.worktree_dir).is_absolute() {
            PathBuf::from(&config.worktree_dir)
        } else {
            repo_path.join(&config.worktree_dir)
        };
        Ok(Self {
            repo_path,
            worktree_root,
            main_branch: config.main_branch.clone(),
            feature_prefix: config.feature_branch_prefix.clone(),
            task_prefix: config.task_branch_prefix.clone(),
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn feature_worktree_path(&self, feature_id: &str) -> PathBuf {
        self.worktree_root.join(feature_worktree_dir_name(feature_id))
    }

    pub fn task_worktree_path(&self, feature_id: &str, task_id: &str) -> PathBuf {
        self.worktree_root.join(task_worktree_dir_name(feature_id, task_id))
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> DomainResult<Output> {
        debug!(dir = %dir.display(), args = ?args, "git");
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DomainError::VersionControl(format!("Failed to run git: {e}")))
    }

    /// Run git and return trimmed stdout, failing on a non-zero exit.
    async fn git_ok(&self, dir: &Path, args: &[&str]) -> DomainResult<String> {
        let output = self.git(dir, args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DomainError::VersionControl(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    async fn head_sha(&self, dir: &Path) -> DomainResult<String> {
        self.git_ok(dir, &["rev-parse", "HEAD"]).await
    }

    fn is_worktree(path: &Path) -> bool {
        path.join(".git").exists()
    }

    async fn ensure_feature_branch(&self, feature_id: &str) -> DomainResult<String> {
        let branch = self.feature_branch_name(feature_id);
        validate_branch_name(&branch)?;
        if !self.branch_exists(&branch).await? {
            info!(branch = %branch, base = %self.main_branch, "Creating feature branch");
            self.git_ok(&self.repo_path, &["branch", &branch, &self.main_branch])
                .await?;
        }
        Ok(branch)
    }

    async fn ensure_worktree_root(&self) -> DomainResult<()> {
        tokio::fs::create_dir_all(&self.worktree_root).await?;
        Ok(())
    }

    /// Worktree with the feature branch checked out, created on demand.
    async fn ensure_feature_worktree(&self, feature_id: &str) -> DomainResult<PathBuf> {
        let branch = self.ensure_feature_branch(feature_id).await?;
        let path = self.feature_worktree_path(feature_id);
        if Self::is_worktree(&path) {
            return Ok(path);
        }
        self.ensure_worktree_root().await?;
        info!(branch = %branch, path = %path.display(), "Creating feature worktree");
        let path_str = path.to_string_lossy();
        self.git_ok(&self.repo_path, &["worktree", "add", &path_str, &branch])
            .await?;
        Ok(path)
    }

    async fn current_branch(&self, dir: &Path) -> DomainResult<String> {
        self.git_ok(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    /// Merge `source` into whatever `dir` has checked out. Conflicts leave the
    /// merge in progress so they can be resolved or aborted.
    async fn merge_in(&self, dir: &Path, source: &str, message: &str) -> DomainResult<MergeOutcome> {
        let output = self
            .git(dir, &["merge", "--no-ff", "-m", message, "--", source])
            .await?;

        if output.status.success() {
            let sha = self.head_sha(dir).await?;
            info!(source = %source, sha = %sha, "Merge completed");
            return Ok(MergeOutcome::clean(sha, dir.to_path_buf()));
        }

        let conflicts = self.conflicted_files(dir).await?;
        if !conflicts.is_empty() {
            warn!(source = %source, conflicts = ?conflicts, "Merge stopped on conflicts");
            return Ok(MergeOutcome::conflicted(conflicts, dir.to_path_buf()));
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if let Err(e) = self.abort_merge(dir).await {
            debug!(error = %e, "Nothing to abort after failed merge");
        }
        let detail = if stderr.is_empty() { stdout } else { stderr };
        Ok(MergeOutcome::failed(format!("Git merge failed: {detail}")))
    }
}

fn parse_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// Paths from `git status --porcelain`. Renames report the new path.
fn parse_porcelain(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|l| l.len() > 3)
        .map(|l| {
            let path = &l[3..];
            let path = path.rsplit(" -> ").next().unwrap_or(path);
            path.trim_matches('"').to_string()
        })
        .collect()
}

/// Parse `git diff --numstat`. Binary files report `-` for both counts.
fn parse_numstat(stdout: &str) -> DiffSummary {
    let mut summary = DiffSummary::default();
    for line in stdout.lines() {
        let mut parts = line.splitn(3, '\t');
        let (Some(ins), Some(del), Some(path)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        summary.insertions += ins.parse::<usize>().unwrap_or(0);
        summary.deletions += del.parse::<usize>().unwrap_or(0);
        summary.files.push(path.to_string());
    }
    summary.files_changed = summary.files.len();
    summary
}

#[async_trait]
impl VersionControl for GitVersionControl {
    fn main_branch(&self) -> &str {
        &self.main_branch
    }

    fn feature_branch_name(&self, feature_id: &str) -> String {
        format!("{}{feature_id}", self.feature_prefix)
    }

    fn task_branch_name(&self, feature_id: &str, task_id: &str) -> String {
        format!("{}{feature_id}/{task_id}", self.task_prefix)
    }

    #[instrument(skip(self))]
    async fn create_task_worktree(&self, feature_id: &str, task_id: &str) -> DomainResult<WorktreeInfo> {
        validate_identifier("feature", feature_id)?;
        validate_identifier("task", task_id)?;
        let branch = self.task_branch_name(feature_id, task_id);
        validate_branch_name(&branch)?;
        let path = self.task_worktree_path(feature_id, task_id);

        if Self::is_worktree(&path) {
            info!(path = %path.display(), "Reusing existing task worktree");
            return Ok(WorktreeInfo { path, branch });
        }

        let feature_branch = self.ensure_feature_branch(feature_id).await?;
        self.ensure_worktree_root().await?;
        let path_str = path.to_string_lossy();

        if self.branch_exists(&branch).await? {
            info!(branch = %branch, "Branch already exists, creating worktree from existing branch");
            self.git_ok(&self.repo_path, &["worktree", "add", &path_str, &branch])
                .await?;
        } else {
            info!(branch = %branch, feature_branch = %feature_branch, "Creating task branch from feature branch");
            self.git_ok(
                &self.repo_path,
                &["worktree", "add", "-b", &branch, &path_str, &feature_branch],
            )
            .await?;
        }

        Ok(WorktreeInfo { path, branch })
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn remove_worktree(&self, path: &Path, force: bool) -> DomainResult<()> {
        if !path.exists() {
            return Ok(());
        }
        let path_str = path.to_string_lossy();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&path_str);
        self.git_ok(&self.repo_path, &args).await?;
        Ok(())
    }

    async fn branch_exists(&self, name: &str) -> DomainResult<bool> {
        let output = self
            .git(
                &self.repo_path,
                &["show-ref", "--verify", "--quiet", &format!("refs/heads/{name}")],
            )
            .await?;
        Ok(output.status.success())
    }

    async fn list_branches(&self) -> DomainResult<Vec<String>> {
        let stdout = self
            .git_ok(&self.repo_path, &["branch", "--format=%(refname:short)"])
            .await?;
        Ok(parse_lines(&stdout))
    }

    async fn get_diff_summary(&self, base: &str, head: &str) -> DomainResult<DiffSummary> {
        let range = format!("{base}...{head}");
        let stdout = self
            .git_ok(&self.repo_path, &["diff", "--numstat", &range])
            .await?;
        Ok(parse_numstat(&stdout))
    }

    async fn preview_conflicts(&self, target: &str, source: &str) -> DomainResult<Vec<String>> {
        let output = self
            .git(
                &self.repo_path,
                &["merge-tree", "--write-tree", "--name-only", "--no-messages", target, source],
            )
            .await?;
        match output.status.code() {
            Some(0) => Ok(vec![]),
            // First line is the tree id, the rest are conflicted paths
            Some(1) => Ok(parse_lines(&String::from_utf8_lossy(&output.stdout))
                .into_iter()
                .skip(1)
                .collect()),
            _ => Err(DomainError::VersionControl(format!(
                "git merge-tree failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn merge_task_into_feature(&self, feature_id: &str, task_id: &str) -> DomainResult<MergeOutcome> {
        let task_branch = self.task_branch_name(feature_id, task_id);
        if !self.branch_exists(&task_branch).await? {
            return Err(DomainError::BranchNotFound {
                branch: task_branch,
                available: self.list_branches().await?,
            });
        }
        let dir = self.ensure_feature_worktree(feature_id).await?;
        let feature_branch = self.feature_branch_name(feature_id);
        self.merge_in(&dir, &task_branch, &format!("Merge {task_branch} into {feature_branch}"))
            .await
    }

    #[instrument(skip(self))]
    async fn merge_feature_into_main(&self, feature_id: &str) -> DomainResult<MergeOutcome> {
        let feature_branch = self.feature_branch_name(feature_id);
        if !self.branch_exists(&feature_branch).await? {
            return Err(DomainError::BranchNotFound {
                branch: feature_branch,
                available: self.list_branches().await?,
            });
        }
        let current = self.current_branch(&self.repo_path).await?;
        if current != self.main_branch {
            return Ok(MergeOutcome::failed(format!(
                "Repository root has '{current}' checked out, expected '{}'",
                self.main_branch
            )));
        }
        let message = format!("Merge {feature_branch} into {}", self.main_branch);
        self.merge_in(&self.repo_path, &feature_branch, &message).await
    }

    async fn abort_merge(&self, dir: &Path) -> DomainResult<()> {
        self.git_ok(dir, &["merge", "--abort"]).await?;
        Ok(())
    }

    async fn commit_merge(&self, dir: &Path, message: &str) -> DomainResult<String> {
        self.git_ok(dir, &["commit", "-m", message]).await?;
        self.head_sha(dir).await
    }

    async fn commit_all(&self, dir: &Path, message: &str) -> DomainResult<CommitOutcome> {
        self.git_ok(dir, &["add", "-A"]).await?;
        let staged = parse_lines(&self.git_ok(dir, &["diff", "--cached", "--name-only"]).await?);
        if staged.is_empty() {
            return Ok(CommitOutcome {
                commit_hash: None,
                files_changed: 0,
            });
        }
        self.git_ok(dir, &["commit", "-m", message]).await?;
        Ok(CommitOutcome {
            commit_hash: Some(self.head_sha(dir).await?),
            files_changed: staged.len(),
        })
    }

    async fn changed_files(&self, dir: &Path) -> DomainResult<Vec<String>> {
        let stdout = self
            .git_ok(dir, &["status", "--porcelain", "--untracked-files=all"])
            .await?;
        Ok(parse_porcelain(&stdout))
    }

    async fn conflicted_files(&self, dir: &Path) -> DomainResult<Vec<String>> {
        let stdout = self
            .git_ok(dir, &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(parse_lines(&stdout))
    }

    async fn stage_files(&self, dir: &Path, files: &[String]) -> DomainResult<()> {
        if files.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--"];
        args.extend(files.iter().map(String::as_str));
        self.git_ok(dir, &args).await?;
        Ok(())
    }
}
