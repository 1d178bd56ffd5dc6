//! Developer agent state machine.
//!
//! Drives one task from intention through execution:
//! `initializing -> loading_context -> proposing_intention -> awaiting_approval
//! -> approved -> working -> ready_for_merge -> completed`, with `failed`
//! reachable from every non-terminal phase. A task sent back by QA re-enters
//! `working` from `ready_for_merge`.
//!
//! Work is left uncommitted on success; the QA agent commits it on a pass.

use futures::StreamExt;
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentKind, AgentRegistration, AgentStatus, BusMessage, Endpoint, FeatureSpec,
    IntentionDecision, MessageKind, MessagePayload, ParticipantKind, PromptOptions,
    RequestPriority, StreamEvent, TaskStatus, ToolProfile, WorktreeInfo,
};
use crate::services::{DependencySummary, Subscription};

use super::events::{AgentEvent, AgentEventKind, AgentRole, Emitter};
use super::phase::{check_transition, Phase};
use super::prompts::{self, DevPromptInput, DEV_SYSTEM_PROMPT};
use super::session::OrchestrationSession;

const PROGRESS_PREVIEW: usize = 200;

/// Phase of a [`DevAgent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DevPhase {
    Initializing,
    LoadingContext,
    ProposingIntention,
    AwaitingApproval,
    Approved,
    Working,
    ReadyForMerge,
    Completed,
    Failed,
}

impl DevPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::LoadingContext => "loading_context",
            Self::ProposingIntention => "proposing_intention",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Approved => "approved",
            Self::Working => "working",
            Self::ReadyForMerge => "ready_for_merge",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DevPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Phase for DevPhase {
    fn can_transition_to(&self, next: Self) -> bool {
        use DevPhase::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Initializing, LoadingContext)
                | (LoadingContext, ProposingIntention)
                | (ProposingIntention, AwaitingApproval)
                | (AwaitingApproval, Approved)
                | (Approved, Working)
                | (Working, ReadyForMerge)
                | (ReadyForMerge, Working)
                | (ReadyForMerge, Completed)
        )
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Inputs beyond what the task store holds.
#[derive(Debug, Clone, Default)]
pub struct DevAgentOptions {
    /// Project guidelines placed at the top of the prompt
    pub project_docs: Option<String>,
    /// Overrides the spec stored with the feature
    pub feature_spec: Option<FeatureSpec>,
}

/// Snapshot of a dev agent.
#[derive(Debug, Clone, PartialEq)]
pub struct DevAgentState {
    pub phase: DevPhase,
    pub agent_id: Option<Uuid>,
    pub worktree: Option<WorktreeInfo>,
    pub dependencies: Vec<DependencySummary>,
    pub intention: Option<String>,
    pub approval_notes: Option<String>,
    pub execution_summary: Option<String>,
    pub tool_uses: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub error: Option<String>,
}

impl Default for DevAgentState {
    fn default() -> Self {
        Self {
            phase: DevPhase::Initializing,
            agent_id: None,
            worktree: None,
            dependencies: Vec::new(),
            intention: None,
            approval_notes: None,
            execution_summary: None,
            tool_uses: 0,
            input_tokens: 0,
            output_tokens: 0,
            error: None,
        }
    }
}

/// Result of [`DevAgent::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub success: bool,
    pub summary: Option<String>,
    pub error: Option<String>,
}

impl ExecutionReport {
    fn succeeded(summary: String) -> Self {
        Self {
            success: true,
            summary: Some(summary),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: None,
            error: Some(error.into()),
        }
    }
}

/// Tools whose use means files were written.
fn is_edit_tool(name: &str) -> bool {
    matches!(name, "Edit" | "Write" | "MultiEdit" | "NotebookEdit")
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PROGRESS_PREVIEW).collect();
    if text.chars().count() > PROGRESS_PREVIEW {
        out.push_str("...");
    }
    out
}

/// Bus message carrying the harness's decision on a dev intention.
pub fn approval_message(task_id: &str, decision: &IntentionDecision) -> BusMessage {
    let payload = match decision {
        IntentionDecision::Approved { notes } => MessagePayload::IntentionApproved {
            notes: notes.clone(),
        },
        IntentionDecision::Rejected { reason } => MessagePayload::IntentionRejected {
            reason: reason.clone(),
        },
    };
    BusMessage::new(Endpoint::harness(), Endpoint::dev(task_id), task_id, payload)
}

struct ExecutingGuard<'a>(&'a AtomicBool);

impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct StreamOutcome {
    result: Option<String>,
    last_text: Option<String>,
    edits: usize,
    error: Option<String>,
}

struct DevInner {
    session: OrchestrationSession,
    feature_id: String,
    task_id: String,
    options: DevAgentOptions,
    state: Mutex<DevAgentState>,
    executing: AtomicBool,
    cancelled: AtomicBool,
    subscription: Mutex<Option<Subscription>>,
    emitter: Emitter,
}

/// Developer agent for one task. Clones share state.
#[derive(Clone)]
pub struct DevAgent {
    inner: Arc<DevInner>,
}

impl DevAgent {
    pub fn new(session: OrchestrationSession, feature_id: &str, task_id: &str, options: DevAgentOptions) -> Self {
        let emitter = Emitter::new(AgentRole::Dev, task_id, session.observers().clone());
        Self {
            inner: Arc::new(DevInner {
                session,
                feature_id: feature_id.to_string(),
                task_id: task_id.to_string(),
                options,
                state: Mutex::new(DevAgentState::default()),
                executing: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                subscription: Mutex::new(None),
                emitter,
            }),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.inner.task_id
    }

    pub fn feature_id(&self) -> &str {
        &self.inner.feature_id
    }

    pub fn state(&self) -> DevAgentState {
        self.inner.state.lock().clone()
    }

    pub fn phase(&self) -> DevPhase {
        self.inner.state.lock().phase
    }

    pub fn agent_id(&self) -> Option<Uuid> {
        self.inner.state.lock().agent_id
    }

    pub fn worktree_path(&self) -> Option<PathBuf> {
        self.inner.state.lock().worktree.as_ref().map(|w| w.path.clone())
    }

    pub fn is_executing(&self) -> bool {
        self.inner.executing.load(Ordering::SeqCst)
    }

    /// Observe this agent's events only.
    pub fn on_event<F>(&self, observer: F)
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.inner.emitter.local.add(observer);
    }

    fn session(&self) -> &OrchestrationSession {
        &self.inner.session
    }

    /// Key the queue knows this agent's requests by.
    fn queue_key(&self) -> String {
        self.agent_id()
            .map_or_else(|| format!("dev:{}", self.inner.task_id), |id| id.to_string())
    }

    fn emit(&self, kind: AgentEventKind) {
        self.inner.emitter.emit(self.agent_id(), kind);
    }

    fn publish(&self, payload: MessagePayload) {
        let task_id = &self.inner.task_id;
        self.session()
            .bus()
            .publish(BusMessage::new(Endpoint::dev(task_id), Endpoint::harness(), task_id, payload));
    }

    fn transition(&self, to: DevPhase) -> DomainResult<()> {
        let from = {
            let mut state = self.inner.state.lock();
            check_transition(state.phase, to)?;
            std::mem::replace(&mut state.phase, to)
        };
        debug!(task_id = %self.inner.task_id, %from, %to, "Dev agent phase changed");
        self.emit(AgentEventKind::PhaseChanged {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }

    fn set_pool_status(&self, status: AgentStatus) {
        if let Some(id) = self.agent_id() {
            let task = (status == AgentStatus::Busy).then(|| self.inner.task_id.clone());
            if let Err(e) = self.session().pool().update_agent_status(id, status, task) {
                debug!(agent_id = %id, error = %e, "Pool status not updated");
            }
        }
    }

    /// Record an error and move to `failed`. A no-op (beyond the returned
    /// report) once the agent has already finished.
    fn fail(&self, error: impl Into<String>) -> ExecutionReport {
        self.fail_inner(error.into(), true)
    }

    /// `task_started` is false when the agent never got a pool slot: the task
    /// is left alone and nothing goes out on the bus.
    fn fail_inner(&self, error: String, task_started: bool) -> ExecutionReport {
        let from = {
            let mut state = self.inner.state.lock();
            if state.phase.is_terminal() {
                return ExecutionReport::failed(error);
            }
            state.error = Some(error.clone());
            std::mem::replace(&mut state.phase, DevPhase::Failed)
        };
        error!(task_id = %self.inner.task_id, %from, error = %error, "Dev agent failed");
        self.emit(AgentEventKind::PhaseChanged {
            from: from.to_string(),
            to: DevPhase::Failed.to_string(),
        });

        if task_started {
            if let Err(e) = self.session().dag().update_task_status(
                &self.inner.feature_id,
                &self.inner.task_id,
                TaskStatus::Failed,
            ) {
                warn!(task_id = %self.inner.task_id, error = %e, "Could not mark task failed");
            }
            self.publish(MessagePayload::TaskFailed {
                error: error.clone(),
            });
        }
        self.set_pool_status(AgentStatus::Idle);
        self.emit(AgentEventKind::Failed {
            error: error.clone(),
        });
        ExecutionReport::failed(error)
    }

    /// Register with the pool, create the worktree, load dependency context
    /// and start listening for approval messages. Returns `false` (and the
    /// agent is failed) on any error.
    #[instrument(skip(self), fields(task_id = %self.inner.task_id, feature_id = %self.inner.feature_id))]
    pub async fn initialize(&self) -> bool {
        let phase = self.phase();
        if phase != DevPhase::Initializing {
            warn!(%phase, "initialize called twice");
            return false;
        }
        let session = self.session();
        let (feature_id, task_id) = (&self.inner.feature_id, &self.inner.task_id);

        let registration = AgentRegistration::new(AgentKind::Task)
            .with_task(task_id.as_str())
            .with_feature(feature_id.as_str());
        let info = match session.pool().register_agent(registration) {
            Ok(info) => info,
            Err(e) => {
                // Leave the task untouched so the orchestrator can retry later
                self.fail_inner(e.to_string(), false);
                return false;
            }
        };
        self.inner.state.lock().agent_id = Some(info.id);

        if let Err(e) = self.transition(DevPhase::LoadingContext) {
            self.fail(e.to_string());
            return false;
        }

        let task = match session.dag().get_task(feature_id, task_id) {
            Ok(task) => task,
            Err(e) => {
                self.fail(e.to_string());
                return false;
            }
        };

        let worktree = match session.vcs().create_task_worktree(feature_id, task_id).await {
            Ok(worktree) => worktree,
            Err(e) => {
                self.fail(format!("Failed to create worktree: {e}"));
                return false;
            }
        };

        let dependencies = session
            .dag()
            .dependency_context(feature_id, task_id)
            .unwrap_or_default();
        let worktree_path = worktree.path.display().to_string();
        {
            let mut state = self.inner.state.lock();
            state.worktree = Some(worktree);
            state.dependencies = dependencies;
        }

        self.listen();
        self.publish(MessagePayload::TaskRegistered {
            title: task.title.clone(),
            worktree_path: Some(worktree_path.clone()),
        });

        if let Err(e) = self.transition(DevPhase::ProposingIntention) {
            self.fail(e.to_string());
            return false;
        }
        info!(worktree = %worktree_path, "Dev agent initialized");
        true
    }

    /// Apply approval and rejection messages addressed to this task's dev
    /// participant.
    fn listen(&self) {
        let weak = Arc::downgrade(&self.inner);
        let task_id = self.inner.task_id.clone();
        let subscription = self.session().bus().subscribe_to_task(task_id.clone(), move |message| {
            if !message.is_addressed_to(ParticipantKind::Dev, &task_id) {
                return;
            }
            let decision = match &message.payload {
                MessagePayload::IntentionApproved { notes } => IntentionDecision::Approved {
                    notes: notes.clone(),
                },
                MessagePayload::IntentionRejected { reason } => IntentionDecision::reject(reason.clone()),
                _ => return,
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if let Err(e) = (DevAgent { inner }).receive_approval(decision) {
                debug!(task_id = %task_id, error = %e, "Ignored approval message");
            }
        });
        if let Some(previous) = self.inner.subscription.lock().replace(subscription) {
            previous.unsubscribe();
        }
    }

    /// Propose the planned work. Without `text`, an intention is derived from
    /// the task and its dependencies.
    pub fn propose_intention(&self, text: Option<String>) -> DomainResult<String> {
        let (phase, branch, dependencies) = {
            let state = self.inner.state.lock();
            (
                state.phase,
                state.worktree.as_ref().map(|w| w.branch.clone()),
                state.dependencies.clone(),
            )
        };
        if phase != DevPhase::ProposingIntention {
            return Err(DomainError::invalid_transition(
                phase,
                DevPhase::AwaitingApproval,
                "intention can only be proposed after initialization",
            ));
        }

        let intention = match text.filter(|t| !t.trim().is_empty()) {
            Some(text) => text,
            None => {
                let task = self
                    .session()
                    .dag()
                    .get_task(&self.inner.feature_id, &self.inner.task_id)?;
                prompts::dev_intention(&task, &dependencies, branch.as_deref())
            }
        };

        self.inner.state.lock().intention = Some(intention.clone());
        // Transition first: an approver may answer synchronously on publish.
        self.transition(DevPhase::AwaitingApproval)?;
        self.publish(MessagePayload::IntentionProposed {
            intention: intention.clone(),
        });
        Ok(intention)
    }

    /// Apply the approval decision. An approval starts execution in the
    /// background when auto-execute is configured; a rejection fails the
    /// agent with the reason.
    #[instrument(skip(self, decision), fields(task_id = %self.inner.task_id, approved = decision.is_approved()))]
    pub fn receive_approval(&self, decision: IntentionDecision) -> DomainResult<()> {
        let phase = self.phase();
        if phase != DevPhase::AwaitingApproval {
            return Err(DomainError::invalid_transition(
                phase,
                DevPhase::Approved,
                "no intention is awaiting approval",
            ));
        }

        match decision {
            IntentionDecision::Approved { notes } => {
                self.transition(DevPhase::Approved)?;
                self.inner.state.lock().approval_notes = notes;
                self.publish(MessagePayload::TaskWorking);
                self.emit(AgentEventKind::Progress {
                    message: "Intention approved".to_string(),
                });
                if self.session().config().agents.auto_execute {
                    self.spawn_execute();
                }
            }
            IntentionDecision::Rejected { reason } => {
                self.fail(format!("Intention rejected: {reason}"));
            }
        }
        Ok(())
    }

    /// Run [`execute`](Self::execute) on a background task. Completion is
    /// observed through events and bus messages.
    pub fn spawn_execute(&self) -> Option<JoinHandle<ExecutionReport>> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let agent = self.clone();
                Some(handle.spawn(async move { agent.execute().await }))
            }
            Err(_) => {
                warn!(task_id = %self.inner.task_id, "No runtime available; call execute() directly");
                None
            }
        }
    }

    fn build_prompt(&self) -> DomainResult<PromptOptions> {
        let session = self.session();
        let task = session.dag().get_task(&self.inner.feature_id, &self.inner.task_id)?;
        let feature = session.dag().feature(&self.inner.feature_id)?;
        let feature_spec = self
            .inner
            .options
            .feature_spec
            .clone()
            .or_else(|| Some(feature.spec.clone()).filter(|s| !s.is_empty()));

        let (dependencies, notes, worktree) = {
            let state = self.inner.state.lock();
            (
                state.dependencies.clone(),
                state.approval_notes.clone(),
                state.worktree.clone(),
            )
        };
        let worktree = worktree
            .ok_or_else(|| DomainError::ExecutionFailed("agent has no worktree".to_string()))?;

        let prompt = prompts::dev_prompt(&DevPromptInput {
            task: &task,
            project_docs: self.inner.options.project_docs.as_deref(),
            feature_title: Some(&feature.title),
            feature_spec: feature_spec.as_ref(),
            dependencies: &dependencies,
            approval_notes: notes.as_deref(),
        });

        let agents = &session.config().agents;
        Ok(PromptOptions::new(prompt)
            .with_system_prompt(DEV_SYSTEM_PROMPT)
            .with_working_dir(worktree.path)
            .with_tool_profile(ToolProfile::Edit)
            .with_max_turns(agents.dev_max_turns)
            .with_model(agents.model.clone()))
    }

    /// Execute the approved work. Only one execution runs at a time; a
    /// second call while one is in flight is rejected without issuing a
    /// request.
    #[instrument(skip(self), fields(task_id = %self.inner.task_id))]
    pub async fn execute(&self) -> ExecutionReport {
        if self.inner.executing.swap(true, Ordering::SeqCst) {
            warn!("Execution already in flight");
            return ExecutionReport::failed("already executing");
        }
        let _executing = ExecutingGuard(&self.inner.executing);

        let phase = self.phase();
        if !matches!(phase, DevPhase::Approved | DevPhase::ReadyForMerge) {
            return ExecutionReport::failed(format!("cannot execute from phase {phase}"));
        }
        self.inner.cancelled.store(false, Ordering::SeqCst);
        if let Err(e) = self.transition(DevPhase::Working) {
            return ExecutionReport::failed(e.to_string());
        }

        let session = self.session();
        let (feature_id, task_id) = (&self.inner.feature_id, &self.inner.task_id);
        if let Err(e) = session
            .dag()
            .update_task_status(feature_id, task_id, TaskStatus::InProgress)
        {
            return self.fail(e.to_string());
        }
        self.set_pool_status(AgentStatus::Busy);

        let options = match self.build_prompt() {
            Ok(options) => options,
            Err(e) => return self.fail(e.to_string()),
        };
        let worktree_path = options.working_dir.clone();

        let request = session.queue().enqueue_query(
            RequestPriority::Dev,
            self.queue_key(),
            Some(task_id.clone()),
            Arc::clone(session.backend()),
            options,
        );
        let mut stream = match request.await {
            Ok(stream) => stream,
            Err(_) if self.inner.cancelled.load(Ordering::SeqCst) => {
                return ExecutionReport::failed("Execution aborted");
            }
            Err(e) => return self.fail(format!("LLM request failed: {e}")),
        };

        let mut outcome = StreamOutcome::default();
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Message {
                    kind: MessageKind::Assistant,
                    content,
                } => {
                    self.emit(AgentEventKind::Progress {
                        message: preview(&content),
                    });
                    outcome.last_text = Some(content);
                }
                StreamEvent::Message {
                    kind: MessageKind::Result,
                    content,
                } => outcome.result = Some(content),
                StreamEvent::ToolUse { name, input } => {
                    self.inner.state.lock().tool_uses += 1;
                    if is_edit_tool(&name) {
                        outcome.edits += 1;
                    }
                    self.emit(AgentEventKind::ToolUse { name, input });
                }
                StreamEvent::ToolResult { name, .. } => {
                    self.emit(AgentEventKind::ToolResult { name });
                }
                StreamEvent::Usage {
                    input_tokens,
                    output_tokens,
                } => {
                    let mut state = self.inner.state.lock();
                    state.input_tokens += input_tokens;
                    state.output_tokens += output_tokens;
                }
                StreamEvent::Error { message } => {
                    outcome.error = Some(message);
                    break;
                }
            }
        }
        drop(stream);

        if self.inner.cancelled.load(Ordering::SeqCst) {
            return ExecutionReport::failed("Execution aborted");
        }
        if let Some(error) = outcome.error {
            return self.fail(error);
        }

        let summary = outcome
            .result
            .filter(|r| !r.trim().is_empty())
            .or(outcome.last_text)
            .unwrap_or_else(|| "Task completed".to_string());

        // Edits the agent reported must be present in the worktree.
        if outcome.edits > 0 {
            let Some(path) = worktree_path else {
                return self.fail("Work not saved: agent has no worktree");
            };
            match session.vcs().changed_files(&path).await {
                Ok(files) if files.is_empty() => {
                    return self.fail(format!(
                        "Work not saved: agent reported {} edit(s) but the worktree has no changes",
                        outcome.edits
                    ));
                }
                Ok(files) => debug!(files = files.len(), "Verified worktree changes"),
                Err(e) => {
                    return self.fail(format!("Work not saved: could not inspect worktree: {e}"));
                }
            }
        }

        if let Err(e) = session.dag().set_execution_summary(feature_id, task_id, summary.clone()) {
            warn!(error = %e, "Could not store execution summary");
        }
        if let Err(e) = session
            .dag()
            .update_task_status(feature_id, task_id, TaskStatus::ReadyForQa)
        {
            return self.fail(e.to_string());
        }
        self.inner.state.lock().execution_summary = Some(summary.clone());
        if let Err(e) = self.transition(DevPhase::ReadyForMerge) {
            return ExecutionReport::failed(e.to_string());
        }
        self.set_pool_status(AgentStatus::Idle);

        self.publish(MessagePayload::TaskReadyForMerge {
            summary: summary.clone(),
        });
        self.emit(AgentEventKind::Completed {
            summary: summary.clone(),
        });
        info!("Dev agent finished work");
        ExecutionReport::succeeded(summary)
    }

    /// Mark the task merged. Only valid from `ready_for_merge`; anything else
    /// is ignored with a warning.
    #[instrument(skip(self), fields(task_id = %self.inner.task_id))]
    pub fn mark_completed(&self) -> bool {
        let phase = self.phase();
        if phase != DevPhase::ReadyForMerge {
            warn!(%phase, "mark_completed ignored outside ready_for_merge");
            return false;
        }
        if let Err(e) = self.session().dag().update_task_status(
            &self.inner.feature_id,
            &self.inner.task_id,
            TaskStatus::Completed,
        ) {
            warn!(error = %e, "Task status not moved to completed");
        }
        if self.transition(DevPhase::Completed).is_err() {
            return false;
        }
        self.set_pool_status(AgentStatus::Idle);
        self.publish(MessagePayload::TaskCompleted {
            feature_id: self.inner.feature_id.clone(),
        });
        self.emit(AgentEventKind::Progress {
            message: "Task completed".to_string(),
        });
        true
    }

    /// Cancel an in-flight execution. Only valid while working.
    #[instrument(skip(self), fields(task_id = %self.inner.task_id))]
    pub fn abort(&self) -> bool {
        let phase = self.phase();
        if phase != DevPhase::Working {
            warn!(%phase, "abort ignored outside working");
            return false;
        }
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let cancelled = self.session().queue().abort(&self.queue_key());
        debug!(cancelled, "Cancelled queued requests");
        self.fail("Execution aborted");
        true
    }

    /// Stop listening, release the pool slot and optionally delete the
    /// worktree.
    #[instrument(skip(self), fields(task_id = %self.inner.task_id))]
    pub async fn cleanup(&self, remove_worktree: bool) -> DomainResult<()> {
        if let Some(subscription) = self.inner.subscription.lock().take() {
            subscription.unsubscribe();
        }
        if let Some(id) = self.agent_id() {
            self.session().pool().terminate_agent(id);
        }
        if remove_worktree {
            if let Some(path) = self.worktree_path() {
                self.session().vcs().remove_worktree(&path, true).await?;
                info!(path = %path.display(), "Removed task worktree");
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DevAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevAgent")
            .field("task_id", &self.inner.task_id)
            .field("phase", &self.phase())
            .finish()
    }
}
