//! Integration tests for the QA reviewer
//!
//! A passing review commits the worktree and moves the task to
//! ready_for_merge; a failing one stores feedback and sends the task back.

mod common;

use common::Harness;
use std::sync::atomic::Ordering;

use conclave::domain::models::ToolProfile;
use conclave::{QaOptions, QaPhase, ScriptedBackend, ScriptedResponse, TaskStatus};

fn options(h: &Harness, task_id: &str) -> QaOptions {
    QaOptions {
        feature_id: "f1".to_string(),
        task_id: task_id.to_string(),
        title: "Login form".to_string(),
        spec: "Render a login form with email and password.".to_string(),
        worktree_path: h.vcs.task_worktree("f1", task_id),
        feature_spec: None,
    }
}

/// Task `t1` in progress with an uncommitted file in its worktree.
fn seed_worked_task(h: &Harness) {
    h.seed_feature(&[("t1", "Login form")]);
    h.session
        .dag()
        .update_task_status("f1", "t1", TaskStatus::InProgress)
        .unwrap();
    h.session
        .dag()
        .update_task_status("f1", "t1", TaskStatus::ReadyForQa)
        .unwrap();
    let dir = h.vcs.task_worktree("f1", "t1");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("login.tsx"), "export const LoginForm = () => null;\n").unwrap();
}

#[tokio::test]
async fn test_passing_review_commits_and_readies_merge() {
    let h = Harness::new(ScriptedBackend::with_responses([ScriptedResponse::text(
        "QA_RESULT: PASSED\nFILES_REVIEWED: login.tsx\nFEEDBACK: N/A",
    )]));
    seed_worked_task(&h);

    let qa = h.session.qa_agent(options(&h, "t1"));
    assert!(qa.initialize().await);
    assert_eq!(qa.phase(), QaPhase::LoadingContext);

    let result = qa.execute().await;
    assert!(result.passed, "unexpected failure: {}", result.feedback);
    assert_eq!(result.files_reviewed, vec!["login.tsx".to_string()]);
    assert_eq!(result.commit_hash.as_deref(), Some("commit-1"));
    assert_eq!(result.files_committed, 1);
    assert_eq!(qa.phase(), QaPhase::Completed);
    assert_eq!(h.task_status("t1"), TaskStatus::ReadyForMerge);

    let messages = h.vcs.commit_messages();
    assert!(messages[0].starts_with("Login form\n\nTask t1 passed QA review."));

    let prompt = &h.backend.prompts()[0];
    assert_eq!(prompt.tool_profile, ToolProfile::ReadOnly);
    assert!(prompt.prompt.contains("login.tsx"));
    assert_eq!(qa.result(), Some(result));
}

#[tokio::test]
async fn test_failing_review_returns_task_with_feedback() {
    let h = Harness::new(ScriptedBackend::with_responses([ScriptedResponse::text(
        "QA_RESULT: FAILED\nFILES_REVIEWED: login.tsx\nFEEDBACK: The password field is not masked.",
    )]));
    seed_worked_task(&h);

    let qa = h.session.qa_agent(options(&h, "t1"));
    assert!(qa.initialize().await);
    let result = qa.execute().await;

    assert!(!result.passed);
    assert!(result.feedback.contains("password field is not masked"));
    assert!(result.commit_hash.is_none());
    assert!(h.vcs.commit_messages().is_empty());
    assert_eq!(qa.phase(), QaPhase::Completed);

    let task = h.session.dag().get_task("f1", "t1").unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.qa_feedback.as_deref(), Some(result.feedback.as_str()));
}

#[tokio::test]
async fn test_commit_failure_fails_review() {
    let h = Harness::new(ScriptedBackend::with_responses([ScriptedResponse::text(
        "VERDICT: PASS",
    )]));
    seed_worked_task(&h);
    h.vcs.fail_commit.store(true, Ordering::SeqCst);

    let qa = h.session.qa_agent(options(&h, "t1"));
    assert!(qa.initialize().await);
    let result = qa.execute().await;

    assert!(!result.passed);
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .starts_with("QA passed but commit failed"));
    assert_eq!(qa.phase(), QaPhase::Failed);
    assert_eq!(h.task_status("t1"), TaskStatus::Failed);
}

#[tokio::test]
async fn test_missing_worktree_fails_initialize() {
    let h = Harness::new(ScriptedBackend::new());
    h.seed_feature(&[("t1", "Login form")]);

    let qa = h.session.qa_agent(options(&h, "t1"));
    assert!(!qa.initialize().await);
    assert_eq!(qa.phase(), QaPhase::Failed);
    assert!(qa
        .state()
        .error
        .unwrap()
        .starts_with("Worktree not found"));

    let result = qa.execute().await;
    assert!(!result.passed);
    assert_eq!(h.backend.invocations(), 0);
}

#[tokio::test]
async fn test_stream_error_fails_review() {
    let h = Harness::new(ScriptedBackend::with_responses([ScriptedResponse::error("model overloaded")]));
    seed_worked_task(&h);

    let qa = h.session.qa_agent(options(&h, "t1"));
    assert!(qa.initialize().await);
    let result = qa.execute().await;

    assert!(!result.passed);
    assert_eq!(result.error.as_deref(), Some("model overloaded"));
    assert_eq!(qa.phase(), QaPhase::Failed);
    assert_eq!(h.task_status("t1"), TaskStatus::ReadyForQa);
}

#[tokio::test]
async fn test_cleanup_releases_pool_slot() {
    let h = Harness::new(ScriptedBackend::new());
    seed_worked_task(&h);

    let qa = h.session.qa_agent(options(&h, "t1"));
    assert!(qa.initialize().await);
    let id = qa.agent_id().unwrap();
    assert!(h.session.pool().get_agent(id).unwrap().is_active());

    qa.cleanup();
    assert!(!h.session.pool().get_agent(id).unwrap().is_active());
}
