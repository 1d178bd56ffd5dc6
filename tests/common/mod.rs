//! Common test utilities for integration tests
//!
//! Provides an in-memory version-control fake, session builders and git
//! repository fixtures shared across the integration test files.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use conclave::domain::models::{
    CommitOutcome, Config, DiffSummary, FeatureSpec, MergeOutcome, Task, TaskStatus, WorktreeInfo,
};
use conclave::{DomainError, DomainResult, OrchestrationSession, ScriptedBackend, VersionControl};

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Wait for a condition to be true with timeout
///
/// Polls the predicate every 10ms until it returns true or the timeout is
/// reached.
pub async fn wait_for<F>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    predicate()
}

/// Configuration for tests: no background execution, near-instant retries.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.agents.auto_execute = false;
    config.staging_retry.delays_ms = vec![1, 1];
    config
}

/// In-memory version control.
///
/// Worktrees are real directories under a temp root so agents can read and
/// write files in them. Files present in a worktree and not yet committed
/// count as changed.
pub struct FakeVersionControl {
    dir: TempDir,
    branches: Mutex<BTreeSet<String>>,
    committed: Mutex<HashSet<PathBuf>>,
    commit_messages: Mutex<Vec<String>>,
    merge_outcomes: Mutex<VecDeque<MergeOutcome>>,
    conflicted: Mutex<Vec<String>>,
    predicted: Mutex<Vec<String>>,
    aborts: AtomicUsize,
    pub fail_worktree: AtomicBool,
    pub fail_commit: AtomicBool,
    pub fail_changed_files: AtomicBool,
}

impl FakeVersionControl {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        Self {
            dir,
            branches: Mutex::new(BTreeSet::from(["main".to_string()])),
            committed: Mutex::new(HashSet::new()),
            commit_messages: Mutex::new(Vec::new()),
            merge_outcomes: Mutex::new(VecDeque::new()),
            conflicted: Mutex::new(Vec::new()),
            predicted: Mutex::new(Vec::new()),
            aborts: AtomicUsize::new(0),
            fail_worktree: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            fail_changed_files: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn task_worktree(&self, feature_id: &str, task_id: &str) -> PathBuf {
        self.root().join(format!("task-{feature_id}-{task_id}"))
    }

    pub fn feature_worktree(&self, feature_id: &str) -> PathBuf {
        self.root().join(format!("feature-{feature_id}"))
    }

    pub fn add_branch(&self, name: &str) {
        self.branches.lock().insert(name.to_string());
    }

    pub fn predict_conflicts(&self, files: &[&str]) {
        *self.predicted.lock() = files.iter().map(|f| f.to_string()).collect();
    }

    /// Make the next merge stop on conflicts in `files`, written with
    /// markers into `dir`.
    pub fn script_conflict(&self, dir: &Path, files: &[&str]) {
        std::fs::create_dir_all(dir).unwrap();
        for file in files {
            std::fs::write(
                dir.join(file),
                "<<<<<<< HEAD\nours\n=======\ntheirs\n>>>>>>> task\n",
            )
            .unwrap();
        }
        let files: Vec<String> = files.iter().map(|f| f.to_string()).collect();
        *self.conflicted.lock() = files.clone();
        self.merge_outcomes
            .lock()
            .push_back(MergeOutcome::conflicted(files, dir.to_path_buf()));
    }

    pub fn script_merge(&self, outcome: MergeOutcome) {
        self.merge_outcomes.lock().push_back(outcome);
    }

    pub fn commit_messages(&self) -> Vec<String> {
        self.commit_messages.lock().clone()
    }

    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    fn next_merge(&self) -> MergeOutcome {
        self.merge_outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| MergeOutcome::clean("clean-sha", self.root().to_path_buf()))
    }

    fn uncommitted(&self, dir: &Path) -> Vec<String> {
        let committed = self.committed.lock();
        let mut files: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|e| e.path().is_file() && !committed.contains(&e.path()))
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        files
    }
}

#[async_trait]
impl VersionControl for FakeVersionControl {
    fn main_branch(&self) -> &str {
        "main"
    }

    fn feature_branch_name(&self, feature_id: &str) -> String {
        format!("feature/{feature_id}")
    }

    fn task_branch_name(&self, feature_id: &str, task_id: &str) -> String {
        format!("task/{feature_id}/{task_id}")
    }

    async fn create_task_worktree(&self, feature_id: &str, task_id: &str) -> DomainResult<WorktreeInfo> {
        if self.fail_worktree.load(Ordering::SeqCst) {
            return Err(DomainError::VersionControl("disk full".to_string()));
        }
        let path = self.task_worktree(feature_id, task_id);
        std::fs::create_dir_all(&path)?;
        let branch = self.task_branch_name(feature_id, task_id);
        self.add_branch(&self.feature_branch_name(feature_id));
        self.add_branch(&branch);
        Ok(WorktreeInfo { path, branch })
    }

    async fn remove_worktree(&self, path: &Path, _force: bool) -> DomainResult<()> {
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    async fn branch_exists(&self, name: &str) -> DomainResult<bool> {
        Ok(self.branches.lock().contains(name))
    }

    async fn list_branches(&self) -> DomainResult<Vec<String>> {
        Ok(self.branches.lock().iter().cloned().collect())
    }

    async fn get_diff_summary(&self, _base: &str, _head: &str) -> DomainResult<DiffSummary> {
        Ok(DiffSummary {
            files_changed: 1,
            insertions: 3,
            deletions: 1,
            files: vec!["src/lib.rs".to_string()],
        })
    }

    async fn preview_conflicts(&self, _target: &str, _source: &str) -> DomainResult<Vec<String>> {
        Ok(self.predicted.lock().clone())
    }

    async fn merge_task_into_feature(&self, _feature_id: &str, _task_id: &str) -> DomainResult<MergeOutcome> {
        Ok(self.next_merge())
    }

    async fn merge_feature_into_main(&self, _feature_id: &str) -> DomainResult<MergeOutcome> {
        Ok(self.next_merge())
    }

    async fn abort_merge(&self, _dir: &Path) -> DomainResult<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.conflicted.lock().clear();
        Ok(())
    }

    async fn commit_merge(&self, _dir: &Path, message: &str) -> DomainResult<String> {
        self.commit_messages.lock().push(message.to_string());
        Ok("merge-sha".to_string())
    }

    async fn commit_all(&self, dir: &Path, message: &str) -> DomainResult<CommitOutcome> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(DomainError::VersionControl("git commit failed: hook rejected".to_string()));
        }
        let files = self.uncommitted(dir);
        if files.is_empty() {
            return Ok(CommitOutcome::default());
        }
        self.committed
            .lock()
            .extend(files.iter().map(|f| dir.join(f)));
        let mut messages = self.commit_messages.lock();
        messages.push(message.to_string());
        Ok(CommitOutcome {
            commit_hash: Some(format!("commit-{}", messages.len())),
            files_changed: files.len(),
        })
    }

    async fn changed_files(&self, dir: &Path) -> DomainResult<Vec<String>> {
        if self.fail_changed_files.load(Ordering::SeqCst) {
            return Err(DomainError::VersionControl("git status failed".to_string()));
        }
        Ok(self.uncommitted(dir))
    }

    async fn conflicted_files(&self, _dir: &Path) -> DomainResult<Vec<String>> {
        Ok(self.conflicted.lock().clone())
    }

    async fn stage_files(&self, _dir: &Path, files: &[String]) -> DomainResult<()> {
        self.conflicted.lock().retain(|f| !files.contains(f));
        Ok(())
    }
}

/// Session over a fake repository and a scripted backend.
pub struct Harness {
    pub session: OrchestrationSession,
    pub vcs: Arc<FakeVersionControl>,
    pub backend: Arc<ScriptedBackend>,
}

impl Harness {
    pub fn new(backend: ScriptedBackend) -> Self {
        Self::with_config(test_config(), backend)
    }

    pub fn with_config(config: Config, backend: ScriptedBackend) -> Self {
        let vcs = Arc::new(FakeVersionControl::new());
        let backend = Arc::new(backend);
        let session = OrchestrationSession::new(config, vcs.clone(), backend.clone());
        Self {
            session,
            vcs,
            backend,
        }
    }

    /// Create feature `f1` with the given `(id, title)` tasks, each ready.
    pub fn seed_feature(&self, tasks: &[(&str, &str)]) {
        let dag = self.session.dag();
        dag.create_feature("f1", "Authentication", FeatureSpec::default())
            .unwrap();
        for (id, title) in tasks {
            dag.add_task(
                "f1",
                Task::new(*id, *title, format!("Implement {title}.")).with_status(TaskStatus::Ready),
            )
            .unwrap();
        }
    }

    pub fn task_status(&self, task_id: &str) -> TaskStatus {
        self.session.dag().get_task("f1", task_id).unwrap().status
    }
}

/// Setup a git repository in a temp directory for testing
///
/// Creates an initialized repo on `main` with one commit containing
/// `README.md`. Returns `None` when git is unavailable.
pub fn setup_test_git_repo() -> Option<(TempDir, PathBuf)> {
    if Command::new("git").arg("--version").output().is_err() {
        return None;
    }
    let dir = tempfile::tempdir().expect("Failed to create temp dir for git repo");
    let path = dir.path().to_path_buf();

    git(&path, &["init", "--initial-branch=main"]);
    git(&path, &["config", "user.email", "test@test.com"]);
    git(&path, &["config", "user.name", "Test User"]);
    git(&path, &["config", "commit.gpgsign", "false"]);
    std::fs::write(path.join("README.md"), "# Test\n").unwrap();
    git(&path, &["add", "README.md"]);
    git(&path, &["commit", "-m", "initial commit"]);

    Some((dir, path))
}

/// Run git in `dir`, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Commit `content` to `file` in a worktree or repository.
pub fn commit_file(dir: &Path, file: &str, content: &str, message: &str) {
    std::fs::write(dir.join(file), content).unwrap();
    git(dir, &["add", file]);
    git(dir, &["commit", "-m", message]);
}
