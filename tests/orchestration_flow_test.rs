//! End-to-end orchestration flow
//!
//! One task goes through development, review and merge; its completion
//! unblocks the dependent task. Also covers session shutdown.

mod common;

use common::{wait_for, Harness};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

use conclave::domain::models::{FeatureSpec, FeatureStatus, StreamEvent, ToolProfile};
use conclave::{
    DevAgentOptions, DevPhase, IntentionDecision, MergePhase, QaOptions, ScriptedBackend,
    ScriptedResponse, Task, TaskStatus,
};

fn backend() -> ScriptedBackend {
    ScriptedBackend::with_responses([
        ScriptedResponse::Events(vec![
            StreamEvent::tool_use("Write", json!({ "file_path": "schema.sql" })),
            StreamEvent::result("Created the users table"),
        ]),
        ScriptedResponse::text("QA_RESULT: PASSED\nFILES_REVIEWED: schema.sql\nFEEDBACK: N/A"),
    ])
    .with_hook(|opts| {
        if opts.tool_profile == ToolProfile::Edit {
            if let Some(dir) = &opts.working_dir {
                std::fs::write(dir.join("schema.sql"), "CREATE TABLE users (id INT);\n").unwrap();
            }
        }
    })
}

/// Feature `f1`: `schema` (ready) must complete before `api` (blocked).
fn seed(h: &Harness) {
    let dag = h.session.dag();
    dag.create_feature("f1", "Accounts", FeatureSpec::default()).unwrap();
    dag.add_task("f1", Task::new("schema", "Users schema", "Create the users table.").with_status(TaskStatus::Ready))
        .unwrap();
    dag.add_task("f1", Task::new("api", "Users API", "Expose users over HTTP."))
        .unwrap();
    dag.add_connection("f1", "schema", "api").unwrap();
}

#[tokio::test]
async fn test_dev_qa_merge_unblocks_dependent() {
    let h = Harness::new(backend());
    seed(&h);
    assert_eq!(h.task_status("api"), TaskStatus::Blocked);

    let names = Arc::new(Mutex::new(Vec::new()));
    let sink = names.clone();
    h.session.on_event(move |e| sink.lock().push(e.name()));
    let mut cascade = h.session.cascade().subscribe();

    // Develop
    let dev = h.session.dev_agent("f1", "schema", DevAgentOptions::default());
    assert!(dev.initialize().await);
    dev.propose_intention(None).unwrap();
    dev.receive_approval(IntentionDecision::approve()).unwrap();
    assert!(dev.execute().await.success);
    assert_eq!(h.task_status("schema"), TaskStatus::ReadyForQa);

    // Review
    let task = h.session.dag().get_task("f1", "schema").unwrap();
    let qa = h.session.qa_agent(QaOptions {
        feature_id: "f1".into(),
        task_id: "schema".into(),
        title: task.title.clone(),
        spec: task.description.clone(),
        worktree_path: dev.worktree_path().unwrap(),
        feature_spec: None,
    });
    assert!(qa.initialize().await);
    let review = qa.execute().await;
    assert!(review.passed);
    assert_eq!(review.files_committed, 1);
    assert_eq!(h.task_status("schema"), TaskStatus::ReadyForMerge);

    // Merge
    let merge = h.session.merge_agent("f1", "schema");
    assert!(merge.check_branches().await);
    merge.propose_intention(None).unwrap();
    merge.receive_approval(IntentionDecision::approve()).unwrap();
    assert!(merge.execute_merge().await.success);
    assert_eq!(merge.phase(), MergePhase::Completed);
    assert_eq!(h.task_status("schema"), TaskStatus::Completed);
    assert_eq!(h.task_status("api"), TaskStatus::Blocked, "no promotion before completion is announced");

    // Announce completion; the cascade promotes the dependent
    assert!(dev.mark_completed());
    assert_eq!(dev.phase(), DevPhase::Completed);
    assert_eq!(h.task_status("api"), TaskStatus::Ready);

    let event = cascade.try_recv().unwrap();
    assert_eq!(event.completed_task_id, "schema");
    assert_eq!(event.promoted, vec!["api".to_string()]);
    let ready: Vec<String> = h
        .session
        .dag()
        .ready_tasks("f1")
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ready, vec!["api".to_string()]);
    assert_eq!(h.session.dag().feature_status("f1").unwrap(), FeatureStatus::InProgress);

    let names = names.lock();
    for expected in ["dev-agent:completed", "qa-agent:completed", "merge-agent:completed"] {
        assert!(names.iter().any(|n| n == expected), "missing {expected}");
    }

    for agent in [dev.agent_id(), qa.agent_id(), merge.agent_id()] {
        assert!(agent.is_some());
    }
    dev.cleanup(true).await.unwrap();
    qa.cleanup();
    merge.cleanup();
    assert_eq!(h.session.pool().get_status().active, 0);
}

#[tokio::test]
async fn test_shutdown_cancels_work_and_terminates_agents() {
    let h = Harness::new(ScriptedBackend::with_responses([ScriptedResponse::hang()]));
    seed(&h);

    let dev = h.session.dev_agent("f1", "schema", DevAgentOptions::default());
    assert!(dev.initialize().await);
    dev.propose_intention(None).unwrap();
    dev.receive_approval(IntentionDecision::approve()).unwrap();
    let running = dev.spawn_execute().unwrap();
    assert!(wait_for(|| h.session.queue().status().active_count == 1, 1000).await);

    let report = h.session.shutdown();
    assert_eq!(report.aborted_requests, 1);
    assert_eq!(report.terminated_agents, 1);
    assert!(h.session.is_shut_down());

    let execution = running.await.unwrap();
    assert!(!execution.success);
    assert_eq!(dev.phase(), DevPhase::Failed);
    assert_eq!(h.session.queue().status().active_count, 0);

    // Idempotent
    assert_eq!(h.session.shutdown(), Default::default());
}
