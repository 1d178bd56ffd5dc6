//! Git adapter tests against real repositories
//!
//! Each test creates a throwaway repository; tests return early when git is
//! not installed.

mod common;

use common::{commit_file, git, setup_test_git_repo};
use std::path::Path;
use tempfile::TempDir;

use conclave::domain::models::GitConfig;
use conclave::{GitVersionControl, VersionControl};

fn adapter(repo: &Path) -> (GitVersionControl, TempDir) {
    let worktrees = tempfile::tempdir().unwrap();
    let config = GitConfig {
        repo_path: repo.display().to_string(),
        worktree_dir: worktrees.path().display().to_string(),
        ..GitConfig::default()
    };
    (GitVersionControl::new(&config).unwrap(), worktrees)
}

#[tokio::test]
async fn test_task_worktree_branches_from_feature() {
    let Some((_dir, repo)) = setup_test_git_repo() else {
        return;
    };
    let (vcs, _worktrees) = adapter(&repo);

    let worktree = vcs.create_task_worktree("auth", "login").await.unwrap();
    assert_eq!(worktree.branch, "task/auth/login");
    assert!(worktree.path.join("README.md").exists());
    assert_eq!(
        git(&worktree.path, &["rev-parse", "--abbrev-ref", "HEAD"]),
        "task/auth/login"
    );

    let branches = vcs.list_branches().await.unwrap();
    assert!(branches.contains(&"feature/auth".to_string()));
    assert!(branches.contains(&"main".to_string()));
    assert!(vcs.branch_exists("task/auth/login").await.unwrap());
    assert!(!vcs.branch_exists("task/auth/missing").await.unwrap());

    // A second call reuses the worktree
    let again = vcs.create_task_worktree("auth", "login").await.unwrap();
    assert_eq!(again.path, worktree.path);

    vcs.remove_worktree(&worktree.path, true).await.unwrap();
    assert!(!worktree.path.exists());
    assert!(vcs.branch_exists("task/auth/login").await.unwrap(), "branch outlives worktree");
}

#[tokio::test]
async fn test_invalid_identifiers_are_rejected() {
    let Some((_dir, repo)) = setup_test_git_repo() else {
        return;
    };
    let (vcs, _worktrees) = adapter(&repo);

    assert!(vcs.create_task_worktree("auth", "a/b").await.is_err());
    assert!(vcs.create_task_worktree("-x", "t1").await.is_err());
    assert!(vcs.create_task_worktree("auth", "bad name").await.is_err());
}

#[tokio::test]
async fn test_changed_files_and_commit_all() {
    let Some((_dir, repo)) = setup_test_git_repo() else {
        return;
    };
    let (vcs, _worktrees) = adapter(&repo);
    let worktree = vcs.create_task_worktree("auth", "login").await.unwrap();

    assert!(vcs.changed_files(&worktree.path).await.unwrap().is_empty());
    let empty = vcs.commit_all(&worktree.path, "nothing").await.unwrap();
    assert!(empty.commit_hash.is_none());

    std::fs::create_dir_all(worktree.path.join("src")).unwrap();
    std::fs::write(worktree.path.join("src/login.rs"), "pub fn login() {}\n").unwrap();
    std::fs::write(worktree.path.join("README.md"), "# Changed\n").unwrap();

    let mut changed = vcs.changed_files(&worktree.path).await.unwrap();
    changed.sort();
    assert_eq!(changed, vec!["README.md".to_string(), "src/login.rs".to_string()]);

    let commit = vcs.commit_all(&worktree.path, "Add login").await.unwrap();
    assert_eq!(commit.files_changed, 2);
    let hash = commit.commit_hash.unwrap();
    assert_eq!(git(&worktree.path, &["rev-parse", "HEAD"]), hash);
    assert!(vcs.changed_files(&worktree.path).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_diff_summary_between_branches() {
    let Some((_dir, repo)) = setup_test_git_repo() else {
        return;
    };
    let (vcs, _worktrees) = adapter(&repo);
    let worktree = vcs.create_task_worktree("auth", "login").await.unwrap();
    commit_file(&worktree.path, "login.rs", "a\nb\nc\n", "Add login");

    let diff = vcs
        .get_diff_summary("feature/auth", "task/auth/login")
        .await
        .unwrap();
    assert_eq!(diff.files_changed, 1);
    assert_eq!(diff.insertions, 3);
    assert_eq!(diff.deletions, 0);
    assert_eq!(diff.files, vec!["login.rs".to_string()]);
}

#[tokio::test]
async fn test_clean_merges_up_to_main() {
    let Some((_dir, repo)) = setup_test_git_repo() else {
        return;
    };
    let (vcs, _worktrees) = adapter(&repo);
    let worktree = vcs.create_task_worktree("auth", "login").await.unwrap();
    commit_file(&worktree.path, "login.rs", "fn login() {}\n", "Add login");

    let into_feature = vcs.merge_task_into_feature("auth", "login").await.unwrap();
    assert!(into_feature.success);
    let feature_dir = vcs.feature_worktree_path("auth");
    assert_eq!(into_feature.merge_dir.as_deref(), Some(feature_dir.as_path()));
    assert!(feature_dir.join("login.rs").exists());

    let into_main = vcs.merge_feature_into_main("auth").await.unwrap();
    assert!(into_main.success, "merge failed: {:?}", into_main.error);
    assert!(repo.join("login.rs").exists());
    assert_eq!(
        git(&repo, &["rev-parse", "HEAD"]),
        into_main.commit_sha.unwrap()
    );
}

#[tokio::test]
async fn test_conflict_abort_restores_feature() {
    let Some((_dir, repo)) = setup_test_git_repo() else {
        return;
    };
    let (vcs, _worktrees) = adapter(&repo);
    for task in ["one", "two"] {
        let worktree = vcs.create_task_worktree("auth", task).await.unwrap();
        commit_file(&worktree.path, "README.md", &format!("# {task}\n"), task);
    }

    assert!(vcs.merge_task_into_feature("auth", "one").await.unwrap().success);
    let outcome = vcs.merge_task_into_feature("auth", "two").await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.conflicts, vec!["README.md".to_string()]);

    let dir = outcome.merge_dir.unwrap();
    assert_eq!(vcs.conflicted_files(&dir).await.unwrap(), vec!["README.md".to_string()]);
    vcs.abort_merge(&dir).await.unwrap();
    assert!(vcs.conflicted_files(&dir).await.unwrap().is_empty());
    assert_eq!(std::fs::read_to_string(dir.join("README.md")).unwrap(), "# one\n");
}

#[tokio::test]
async fn test_missing_task_branch_lists_available() {
    let Some((_dir, repo)) = setup_test_git_repo() else {
        return;
    };
    let (vcs, _worktrees) = adapter(&repo);

    let err = vcs.merge_task_into_feature("auth", "ghost").await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("task/auth/ghost"));
    assert!(message.contains("main"));
}
