//! QA reviewer state machine.
//!
//! `initializing -> loading_context -> reviewing -> completed`, or `failed`.
//! QA runs without an approval step. A passing review commits the task's
//! outstanding changes; a failing one stores feedback on the task and sends
//! it back to `in_progress` for another dev iteration.

use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    AgentKind, AgentRegistration, AgentStatus, FeatureSpec, PromptOptions, RequestPriority,
    StreamEvent, TaskStatus, ToolProfile,
};

use super::events::{AgentEvent, AgentEventKind, AgentRole, Emitter};
use super::phase::{check_transition, Phase};
use super::prompts::{self, QA_SYSTEM_PROMPT};
use super::qa_parser::parse_review;
use super::session::OrchestrationSession;
use super::transcript;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QaPhase {
    Initializing,
    LoadingContext,
    Reviewing,
    Completed,
    Failed,
}

impl QaPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::LoadingContext => "loading_context",
            Self::Reviewing => "reviewing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for QaPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Phase for QaPhase {
    fn can_transition_to(&self, next: Self) -> bool {
        use QaPhase::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Initializing, LoadingContext) | (LoadingContext, Reviewing) | (Reviewing, Completed)
        )
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// What is under review.
#[derive(Debug, Clone)]
pub struct QaOptions {
    pub feature_id: String,
    pub task_id: String,
    pub title: String,
    /// Task specification; the only pass/fail criterion
    pub spec: String,
    pub worktree_path: PathBuf,
    pub feature_spec: Option<FeatureSpec>,
}

/// Outcome of a review.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QaResult {
    pub passed: bool,
    pub files_reviewed: Vec<String>,
    pub feedback: String,
    pub commit_hash: Option<String>,
    pub files_committed: usize,
    pub error: Option<String>,
}

impl QaResult {
    fn errored(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            feedback: error.clone(),
            error: Some(error),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QaAgentState {
    pub phase: QaPhase,
    pub agent_id: Option<Uuid>,
    pub result: Option<QaResult>,
    pub error: Option<String>,
}

struct QaInner {
    session: OrchestrationSession,
    options: QaOptions,
    state: Mutex<QaAgentState>,
    emitter: Emitter,
}

/// QA reviewer for one task. Clones share state.
#[derive(Clone)]
pub struct QaAgent {
    inner: Arc<QaInner>,
}

impl QaAgent {
    pub fn new(session: OrchestrationSession, options: QaOptions) -> Self {
        let emitter = Emitter::new(AgentRole::Qa, options.task_id.as_str(), session.observers().clone());
        Self {
            inner: Arc::new(QaInner {
                session,
                options,
                state: Mutex::new(QaAgentState {
                    phase: QaPhase::Initializing,
                    agent_id: None,
                    result: None,
                    error: None,
                }),
                emitter,
            }),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.inner.options.task_id
    }

    pub fn state(&self) -> QaAgentState {
        self.inner.state.lock().clone()
    }

    pub fn phase(&self) -> QaPhase {
        self.inner.state.lock().phase
    }

    pub fn agent_id(&self) -> Option<Uuid> {
        self.inner.state.lock().agent_id
    }

    pub fn result(&self) -> Option<QaResult> {
        self.inner.state.lock().result.clone()
    }

    pub fn on_event<F>(&self, observer: F)
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.inner.emitter.local.add(observer);
    }

    fn session(&self) -> &OrchestrationSession {
        &self.inner.session
    }

    fn emit(&self, kind: AgentEventKind) {
        self.inner.emitter.emit(self.agent_id(), kind);
    }

    fn transition(&self, to: QaPhase) -> DomainResult<()> {
        let from = {
            let mut state = self.inner.state.lock();
            check_transition(state.phase, to)?;
            std::mem::replace(&mut state.phase, to)
        };
        debug!(task_id = %self.inner.options.task_id, %from, %to, "QA agent phase changed");
        self.emit(AgentEventKind::PhaseChanged {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }

    fn set_pool_status(&self, status: AgentStatus) {
        if let Some(id) = self.agent_id() {
            let task = (status == AgentStatus::Busy).then(|| self.inner.options.task_id.clone());
            if let Err(e) = self.session().pool().update_agent_status(id, status, task) {
                debug!(agent_id = %id, error = %e, "Pool status not updated");
            }
        }
    }

    fn set_task_status(&self, status: TaskStatus) {
        let o = &self.inner.options;
        if let Err(e) = self.session().dag().update_task_status(&o.feature_id, &o.task_id, status) {
            warn!(task_id = %o.task_id, %status, error = %e, "Task status not updated");
        }
    }

    fn fail(&self, result: QaResult) -> QaResult {
        let error = result.error.clone().unwrap_or_else(|| "QA failed".to_string());
        let from = {
            let mut state = self.inner.state.lock();
            if state.phase.is_terminal() {
                return result;
            }
            state.error = Some(error.clone());
            state.result = Some(result.clone());
            std::mem::replace(&mut state.phase, QaPhase::Failed)
        };
        error!(task_id = %self.inner.options.task_id, %from, error = %error, "QA agent failed");
        self.emit(AgentEventKind::PhaseChanged {
            from: from.to_string(),
            to: QaPhase::Failed.to_string(),
        });
        self.set_pool_status(AgentStatus::Idle);
        self.emit(AgentEventKind::Failed { error });
        result
    }

    /// Register with the pool and check the worktree is there.
    #[instrument(skip(self), fields(task_id = %self.inner.options.task_id))]
    pub async fn initialize(&self) -> bool {
        let phase = self.phase();
        if phase != QaPhase::Initializing {
            warn!(%phase, "initialize called twice");
            return false;
        }

        let o = &self.inner.options;
        let registration = AgentRegistration::new(AgentKind::Qa)
            .with_task(o.task_id.as_str())
            .with_feature(o.feature_id.as_str());
        match self.session().pool().register_agent(registration) {
            Ok(info) => self.inner.state.lock().agent_id = Some(info.id),
            Err(e) => {
                self.fail(QaResult::errored(e.to_string()));
                return false;
            }
        }

        if let Err(e) = self.transition(QaPhase::LoadingContext) {
            self.fail(QaResult::errored(e.to_string()));
            return false;
        }

        match tokio::fs::try_exists(&o.worktree_path).await {
            Ok(true) => {}
            Ok(false) => {
                self.fail(QaResult::errored(format!(
                    "Worktree not found: {}",
                    o.worktree_path.display()
                )));
                return false;
            }
            Err(e) => {
                self.fail(QaResult::errored(format!(
                    "Worktree not accessible: {}: {e}",
                    o.worktree_path.display()
                )));
                return false;
            }
        }

        info!(worktree = %o.worktree_path.display(), "QA agent initialized");
        true
    }

    /// Review the task's uncommitted changes.
    #[instrument(skip(self), fields(task_id = %self.inner.options.task_id))]
    pub async fn execute(&self) -> QaResult {
        let phase = self.phase();
        if phase != QaPhase::LoadingContext {
            return QaResult::errored(format!("cannot review from phase {phase}"));
        }
        if let Err(e) = self.transition(QaPhase::Reviewing) {
            return QaResult::errored(e.to_string());
        }
        self.set_pool_status(AgentStatus::Busy);

        let session = self.session();
        let o = &self.inner.options;

        let changed = match session.vcs().changed_files(&o.worktree_path).await {
            Ok(files) => files,
            Err(e) => return self.fail(QaResult::errored(format!("Could not list changes: {e}"))),
        };

        let prompt = prompts::qa_prompt(&o.title, &o.spec, o.feature_spec.as_ref(), &changed);
        let agents = &session.config().agents;
        let options = PromptOptions::new(prompt)
            .with_system_prompt(QA_SYSTEM_PROMPT)
            .with_working_dir(o.worktree_path.clone())
            .with_tool_profile(ToolProfile::ReadOnly)
            .with_max_turns(agents.qa_max_turns)
            .with_model(agents.model.clone());

        let key = self
            .agent_id()
            .map_or_else(|| format!("qa:{}", o.task_id), |id| id.to_string());
        let stream = match session
            .queue()
            .enqueue_query(RequestPriority::Qa, key, Some(o.task_id.clone()), Arc::clone(session.backend()), options)
            .await
        {
            Ok(stream) => stream,
            Err(e) => return self.fail(QaResult::errored(format!("QA request failed: {e}"))),
        };

        let transcript = match transcript::drain(stream, |event| self.observe(event)).await {
            Ok(t) => t,
            Err(e) => return self.fail(QaResult::errored(e)),
        };

        let verdict = parse_review(&transcript.text);
        let mut result = QaResult {
            passed: verdict.passed,
            files_reviewed: verdict.files_reviewed,
            feedback: verdict.feedback,
            ..QaResult::default()
        };

        if result.passed {
            match session.vcs().commit_all(&o.worktree_path, &self.commit_message(&result)).await {
                Ok(commit) => {
                    result.commit_hash = commit.commit_hash;
                    result.files_committed = commit.files_changed;
                }
                Err(e) => {
                    let error = format!("QA passed but commit failed: {e}");
                    result.passed = false;
                    result.error = Some(error.clone());
                    result.feedback = error;
                    self.set_task_status(TaskStatus::Failed);
                    return self.fail(result);
                }
            }
            let dag = session.dag();
            if let Err(e) = dag.clear_qa_feedback(&o.feature_id, &o.task_id) {
                debug!(error = %e, "No feedback to clear");
            }
            self.set_task_status(TaskStatus::ReadyForMerge);
            info!(commit = ?result.commit_hash, files = result.files_committed, "QA passed");
        } else {
            if let Err(e) = session
                .dag()
                .set_qa_feedback(&o.feature_id, &o.task_id, result.feedback.clone())
            {
                warn!(error = %e, "Could not store QA feedback");
            }
            self.set_task_status(TaskStatus::InProgress);
            info!(feedback = %result.feedback, "QA failed; task returned for rework");
        }

        self.inner.state.lock().result = Some(result.clone());
        if let Err(e) = self.transition(QaPhase::Completed) {
            return QaResult::errored(e.to_string());
        }
        self.set_pool_status(AgentStatus::Idle);

        let summary = if result.passed {
            format!("QA passed ({} file(s) committed)", result.files_committed)
        } else {
            format!("QA failed: {}", result.feedback)
        };
        self.emit(AgentEventKind::Completed { summary });
        result
    }

    fn observe(&self, event: &StreamEvent) {
        match event {
            StreamEvent::ToolUse { name, input } => self.emit(AgentEventKind::ToolUse {
                name: name.clone(),
                input: input.clone(),
            }),
            StreamEvent::ToolResult { name, .. } => {
                self.emit(AgentEventKind::ToolResult { name: name.clone() })
            }
            _ => {}
        }
    }

    fn commit_message(&self, result: &QaResult) -> String {
        let o = &self.inner.options;
        let mut message = format!("{}\n\nTask {} passed QA review.", o.title, o.task_id);
        if !result.files_reviewed.is_empty() {
            message.push_str(&format!("\nFiles reviewed: {}", result.files_reviewed.join(", ")));
        }
        message
    }

    /// Release the pool slot.
    pub fn cleanup(&self) {
        if let Some(id) = self.agent_id() {
            self.session().pool().terminate_agent(id);
        }
    }
}

impl fmt::Debug for QaAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QaAgent")
            .field("task_id", &self.inner.options.task_id)
            .field("phase", &self.phase())
            .finish()
    }
}
