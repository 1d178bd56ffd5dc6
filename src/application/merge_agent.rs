//! Merge agent state machine.
//!
//! One pattern at two scopes: a task branch into its feature branch, or a
//! feature branch into main.
//!
//! `checking_branches -> proposing_intention -> awaiting_approval -> merging
//! -> completed`, detouring through `resolving_conflicts` when the merge
//! stops on conflicts. `failed` is reachable from every non-terminal phase.
//! A merge whose conflicts cannot be fully resolved is aborted, never left
//! half applied.

use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentKind, AgentRegistration, AgentStatus, BusMessage, ConflictAnalysis, DiffSummary, Endpoint,
    FeatureStatus, IntentionDecision, MessagePayload, ParticipantKind, PromptOptions,
    RequestPriority, StreamEvent, TaskStatus, ToolProfile,
};

use super::conflict_parser::{has_conflict_markers, parse_conflict_analysis};
use super::events::{AgentEvent, AgentEventKind, AgentRole, Emitter};
use super::phase::{check_transition, Phase};
use super::prompts::{self, MERGE_SYSTEM_PROMPT};
use super::session::OrchestrationSession;
use super::transcript;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergePhase {
    CheckingBranches,
    ProposingIntention,
    AwaitingApproval,
    Merging,
    ResolvingConflicts,
    Completed,
    Failed,
}

impl MergePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckingBranches => "checking_branches",
            Self::ProposingIntention => "proposing_intention",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Merging => "merging",
            Self::ResolvingConflicts => "resolving_conflicts",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MergePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Phase for MergePhase {
    fn can_transition_to(&self, next: Self) -> bool {
        use MergePhase::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (CheckingBranches, ProposingIntention)
                | (ProposingIntention, AwaitingApproval)
                | (AwaitingApproval, Merging)
                | (Merging, Completed)
                | (Merging, ResolvingConflicts)
                | (ResolvingConflicts, Completed)
        )
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// What is being merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeScope {
    /// Task branch into its feature branch
    Task { task_id: String },
    /// Feature branch into main
    Feature,
}

impl MergeScope {
    pub fn is_feature(&self) -> bool {
        matches!(self, Self::Feature)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeAgentState {
    pub phase: MergePhase,
    pub agent_id: Option<Uuid>,
    pub source_branch: String,
    pub target_branch: String,
    pub diff: Option<DiffSummary>,
    /// Conflicts predicted before merging
    pub predicted_conflicts: Vec<String>,
    pub intention: Option<String>,
    pub approval_notes: Option<String>,
    /// Conflicts the merge actually stopped on
    pub conflicts: Vec<String>,
    pub merge_dir: Option<PathBuf>,
    pub analysis: Option<ConflictAnalysis>,
    pub commit_sha: Option<String>,
    pub error: Option<String>,
}

/// Outcome of [`MergeAgent::execute_merge`] and
/// [`MergeAgent::resolve_conflicts`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub success: bool,
    pub conflicts: Vec<String>,
    pub commit_sha: Option<String>,
    pub analysis: Option<ConflictAnalysis>,
    pub resolved_by_ai: bool,
    pub error: Option<String>,
}

impl MergeReport {
    fn rejected(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct MergeInner {
    session: OrchestrationSession,
    feature_id: String,
    scope: MergeScope,
    auto_resolve: AtomicBool,
    busy: AtomicBool,
    state: Mutex<MergeAgentState>,
    emitter: Emitter,
}

/// Merge agent. Clones share state.
#[derive(Clone)]
pub struct MergeAgent {
    inner: Arc<MergeInner>,
}

impl MergeAgent {
    /// Conflicts are analysed, then resolved automatically only for feature
    /// merges unless [`set_auto_resolve`](Self::set_auto_resolve) says
    /// otherwise.
    pub fn new(session: OrchestrationSession, feature_id: &str, scope: MergeScope) -> Self {
        let (role, subject) = match &scope {
            MergeScope::Task { task_id } => (AgentRole::Merge, task_id.clone()),
            MergeScope::Feature => (AgentRole::FeatureMerge, feature_id.to_string()),
        };
        let emitter = Emitter::new(role, subject, session.observers().clone());
        Self {
            inner: Arc::new(MergeInner {
                feature_id: feature_id.to_string(),
                auto_resolve: AtomicBool::new(scope.is_feature()),
                busy: AtomicBool::new(false),
                state: Mutex::new(MergeAgentState {
                    phase: MergePhase::CheckingBranches,
                    agent_id: None,
                    source_branch: String::new(),
                    target_branch: String::new(),
                    diff: None,
                    predicted_conflicts: Vec::new(),
                    intention: None,
                    approval_notes: None,
                    conflicts: Vec::new(),
                    merge_dir: None,
                    analysis: None,
                    commit_sha: None,
                    error: None,
                }),
                session,
                scope,
                emitter,
            }),
        }
    }

    pub fn for_task(session: OrchestrationSession, feature_id: &str, task_id: &str) -> Self {
        Self::new(
            session,
            feature_id,
            MergeScope::Task {
                task_id: task_id.to_string(),
            },
        )
    }

    pub fn for_feature(session: OrchestrationSession, feature_id: &str) -> Self {
        Self::new(session, feature_id, MergeScope::Feature)
    }

    pub fn set_auto_resolve(&self, enabled: bool) {
        self.inner.auto_resolve.store(enabled, Ordering::SeqCst);
    }

    pub fn auto_resolve(&self) -> bool {
        self.inner.auto_resolve.load(Ordering::SeqCst)
    }

    pub fn scope(&self) -> &MergeScope {
        &self.inner.scope
    }

    pub fn feature_id(&self) -> &str {
        &self.inner.feature_id
    }

    /// Task id for task merges, feature id for feature merges.
    pub fn subject_id(&self) -> &str {
        &self.inner.emitter.subject_id
    }

    pub fn state(&self) -> MergeAgentState {
        self.inner.state.lock().clone()
    }

    pub fn phase(&self) -> MergePhase {
        self.inner.state.lock().phase
    }

    pub fn agent_id(&self) -> Option<Uuid> {
        self.inner.state.lock().agent_id
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

    fn progress(&self, message: impl Into<String>) {
        self.emit(AgentEventKind::Progress {
            message: message.into(),
        });
    }

    fn queue_key(&self) -> String {
        self.agent_id()
            .map_or_else(|| format!("merge:{}", self.subject_id()), |id| id.to_string())
    }

    fn priority(&self) -> RequestPriority {
        RequestPriority::Merge
    }

    fn transition(&self, to: MergePhase) -> DomainResult<()> {
        let from = {
            let mut state = self.inner.state.lock();
            check_transition(state.phase, to)?;
            std::mem::replace(&mut state.phase, to)
        };
        debug!(subject = %self.subject_id(), %from, %to, "Merge agent phase changed");
        self.emit(AgentEventKind::PhaseChanged {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }

    fn set_pool_status(&self, status: AgentStatus) {
        if let Some(id) = self.agent_id() {
            let task = match (&self.inner.scope, status) {
                (MergeScope::Task { task_id }, AgentStatus::Busy) => Some(task_id.clone()),
                _ => None,
            };
            if let Err(e) = self.session().pool().update_agent_status(id, status, task) {
                debug!(agent_id = %id, error = %e, "Pool status not updated");
            }
        }
    }

    fn fail(&self, report: MergeReport) -> MergeReport {
        let error = report.error.clone().unwrap_or_else(|| "merge failed".to_string());
        let from = {
            let mut state = self.inner.state.lock();
            if state.phase.is_terminal() {
                return report;
            }
            state.error = Some(error.clone());
            state.merge_dir = None;
            std::mem::replace(&mut state.phase, MergePhase::Failed)
        };
        error!(subject = %self.subject_id(), %from, error = %error, "Merge agent failed");
        self.emit(AgentEventKind::PhaseChanged {
            from: from.to_string(),
            to: MergePhase::Failed.to_string(),
        });
        self.set_pool_status(AgentStatus::Idle);
        self.emit(AgentEventKind::Failed { error });
        report
    }

    fn fail_with(&self, error: impl Into<String>) -> MergeReport {
        self.fail(MergeReport::rejected(error))
    }

    fn branches(&self) -> (String, String) {
        let vcs = self.session().vcs();
        let feature = vcs.feature_branch_name(&self.inner.feature_id);
        match &self.inner.scope {
            MergeScope::Task { task_id } => {
                (vcs.task_branch_name(&self.inner.feature_id, task_id), feature)
            }
            MergeScope::Feature => (feature, vcs.main_branch().to_string()),
        }
    }

    /// Register with the pool, verify both branches exist, then collect the
    /// diff summary and predicted conflicts for the intention.
    #[instrument(skip(self), fields(subject = %self.subject_id()))]
    pub async fn check_branches(&self) -> bool {
        let phase = self.phase();
        if phase != MergePhase::CheckingBranches {
            warn!(%phase, "check_branches called twice");
            return false;
        }
        let session = self.session();

        let mut registration = AgentRegistration::new(AgentKind::Merge).with_feature(self.inner.feature_id.as_str());
        if let MergeScope::Task { task_id } = &self.inner.scope {
            registration = registration.with_task(task_id.as_str());
        }
        match session.pool().register_agent(registration) {
            Ok(info) => self.inner.state.lock().agent_id = Some(info.id),
            Err(e) => {
                self.fail_with(e.to_string());
                return false;
            }
        }

        let (source, target) = self.branches();
        {
            let mut state = self.inner.state.lock();
            state.source_branch = source.clone();
            state.target_branch = target.clone();
        }

        for branch in [&source, &target] {
            match session.vcs().branch_exists(branch).await {
                Ok(true) => {}
                Ok(false) => {
                    let available = session.vcs().list_branches().await.unwrap_or_default();
                    let err = DomainError::BranchNotFound {
                        branch: branch.clone(),
                        available,
                    };
                    self.fail_with(err.to_string());
                    return false;
                }
                Err(e) => {
                    self.fail_with(e.to_string());
                    return false;
                }
            }
        }

        let diff = match session.vcs().get_diff_summary(&target, &source).await {
            Ok(diff) => Some(diff),
            Err(e) => {
                warn!(error = %e, "Diff summary unavailable");
                None
            }
        };
        let predicted = match session.vcs().preview_conflicts(&target, &source).await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "Conflict preview unavailable");
                Vec::new()
            }
        };
        if !predicted.is_empty() {
            info!(files = ?predicted, "Conflicts predicted");
        }
        {
            let mut state = self.inner.state.lock();
            state.diff = diff;
            state.predicted_conflicts = predicted;
        }

        if let Err(e) = self.transition(MergePhase::ProposingIntention) {
            self.fail_with(e.to_string());
            return false;
        }
        info!(%source, %target, "Branches checked");
        true
    }

    /// Propose the merge. Without `text` the intention describes the diff and
    /// any predicted conflicts.
    pub fn propose_intention(&self, text: Option<String>) -> DomainResult<String> {
        let (phase, intention) = {
            let state = self.inner.state.lock();
            let generated = || {
                prompts::merge_intention(
                    &state.source_branch,
                    &state.target_branch,
                    state.diff.as_ref(),
                    &state.predicted_conflicts,
                )
            };
            (
                state.phase,
                text.filter(|t| !t.trim().is_empty()).unwrap_or_else(generated),
            )
        };
        if phase != MergePhase::ProposingIntention {
            return Err(DomainError::invalid_transition(
                phase,
                MergePhase::AwaitingApproval,
                "branches must be checked before proposing",
            ));
        }

        self.inner.state.lock().intention = Some(intention.clone());
        self.transition(MergePhase::AwaitingApproval)?;
        let subject = self.subject_id();
        self.session().bus().publish(BusMessage::new(
            Endpoint::new(ParticipantKind::Merge, subject),
            Endpoint::harness(),
            subject,
            MessagePayload::IntentionProposed {
                intention: intention.clone(),
            },
        ));
        self.progress(intention.clone());
        Ok(intention)
    }

    /// Approval moves to `merging`; [`execute_merge`](Self::execute_merge)
    /// then performs it. Rejection fails the agent.
    #[instrument(skip(self, decision), fields(subject = %self.subject_id(), approved = decision.is_approved()))]
    pub fn receive_approval(&self, decision: IntentionDecision) -> DomainResult<()> {
        let phase = self.phase();
        if phase != MergePhase::AwaitingApproval {
            return Err(DomainError::invalid_transition(
                phase,
                MergePhase::Merging,
                "no merge intention is awaiting approval",
            ));
        }
        match decision {
            IntentionDecision::Approved { notes } => {
                self.inner.state.lock().approval_notes = notes;
                self.transition(MergePhase::Merging)?;
            }
            IntentionDecision::Rejected { reason } => {
                self.fail_with(format!("Merge rejected: {reason}"));
            }
        }
        Ok(())
    }

    /// Perform the approved merge.
    #[instrument(skip(self), fields(subject = %self.subject_id()))]
    pub async fn execute_merge(&self) -> MergeReport {
        if self.inner.busy.swap(true, Ordering::SeqCst) {
            return MergeReport::rejected("merge already in progress");
        }
        let _busy = BusyGuard(&self.inner.busy);

        let phase = self.phase();
        if phase != MergePhase::Merging || self.inner.state.lock().merge_dir.is_some() {
            return MergeReport::rejected(format!("cannot merge from phase {phase}"));
        }
        self.set_pool_status(AgentStatus::Busy);

        let vcs = self.session().vcs();
        let outcome = match &self.inner.scope {
            MergeScope::Task { task_id } => vcs.merge_task_into_feature(&self.inner.feature_id, task_id).await,
            MergeScope::Feature => vcs.merge_feature_into_main(&self.inner.feature_id).await,
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => return self.fail_with(e.to_string()),
        };

        if outcome.success {
            let sha = outcome.commit_sha.unwrap_or_default();
            return self.finish(sha, false, None);
        }
        if !outcome.has_conflicts() {
            return self.fail_with(outcome.error.unwrap_or_else(|| "merge failed".to_string()));
        }
        let Some(merge_dir) = outcome.merge_dir else {
            return self.fail_with("merge reported conflicts without a working directory");
        };

        let conflicts = outcome.conflicts;
        warn!(files = ?conflicts, "Merge stopped on conflicts");
        {
            let mut state = self.inner.state.lock();
            state.conflicts = conflicts.clone();
            state.merge_dir = Some(merge_dir.clone());
        }
        if let Err(e) = self.transition(MergePhase::ResolvingConflicts) {
            return self.fail_with(e.to_string());
        }
        self.progress(format!("Conflicts in {} file(s): {}", conflicts.len(), conflicts.join(", ")));

        let analysis = self.analyze_conflicts(&merge_dir, &conflicts).await;
        self.inner.state.lock().analysis = Some(analysis.clone());

        // `auto_resolvable` is advisory: it is surfaced, the resolution still
        // runs when auto-resolve is on.
        if self.auto_resolve() {
            if !analysis.auto_resolvable {
                warn!(recommendation = %analysis.recommendation, "Analysis recommends manual resolution");
                self.progress(format!(
                    "Analysis recommends manual resolution; attempting automatic resolution anyway: {}",
                    analysis.recommendation
                ));
            }
            return self.resolve_locked(merge_dir, conflicts, analysis).await;
        }

        self.set_pool_status(AgentStatus::Idle);
        MergeReport {
            success: false,
            conflicts,
            analysis: Some(analysis),
            ..MergeReport::default()
        }
    }

    async fn read_excerpts(dir: &Path, files: &[String]) -> Vec<(String, String)> {
        let mut excerpts = Vec::with_capacity(files.len());
        for file in files {
            let content = match tokio::fs::read_to_string(dir.join(file)).await {
                Ok(content) => prompts::excerpt(&content),
                Err(e) => format!("(could not read file: {e})"),
            };
            excerpts.push((file.clone(), content));
        }
        excerpts
    }

    async fn analyze_conflicts(&self, merge_dir: &Path, conflicts: &[String]) -> ConflictAnalysis {
        let session = self.session();
        let (source, target) = {
            let state = self.inner.state.lock();
            (state.source_branch.clone(), state.target_branch.clone())
        };
        let excerpts = Self::read_excerpts(merge_dir, conflicts).await;
        let agents = &session.config().agents;
        let options = PromptOptions::new(prompts::conflict_analysis_prompt(&source, &target, &excerpts))
            .with_system_prompt(MERGE_SYSTEM_PROMPT)
            .with_working_dir(merge_dir)
            .with_tool_profile(ToolProfile::ReadOnly)
            .with_max_turns(agents.merge_max_turns)
            .with_model(agents.model.clone());

        let response = match session
            .queue()
            .enqueue_query(self.priority(), self.queue_key(), self.task_id(), Arc::clone(session.backend()), options)
            .await
        {
            Ok(stream) => transcript::drain(stream, |event| self.observe(event)).await,
            Err(e) => Err(e.to_string()),
        };

        match response {
            Ok(t) => parse_conflict_analysis(&t.text, conflicts),
            Err(e) => {
                warn!(error = %e, "Conflict analysis failed");
                ConflictAnalysis::manual_fallback(conflicts, format!("Conflict analysis unavailable: {e}"))
            }
        }
    }

    fn task_id(&self) -> Option<String> {
        match &self.inner.scope {
            MergeScope::Task { task_id } => Some(task_id.clone()),
            MergeScope::Feature => None,
        }
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

    /// Have the model edit the conflicted files, stage them and commit the
    /// merge. Only accepted when no conflicted file remains; otherwise the
    /// merge is aborted and the agent fails with the remaining conflicts.
    #[instrument(skip(self), fields(subject = %self.subject_id()))]
    pub async fn resolve_conflicts(&self) -> MergeReport {
        if self.inner.busy.swap(true, Ordering::SeqCst) {
            return MergeReport::rejected("merge already in progress");
        }
        let _busy = BusyGuard(&self.inner.busy);

        let (phase, merge_dir, conflicts, analysis) = {
            let state = self.inner.state.lock();
            (
                state.phase,
                state.merge_dir.clone(),
                state.conflicts.clone(),
                state.analysis.clone(),
            )
        };
        if phase != MergePhase::ResolvingConflicts {
            return MergeReport::rejected(format!("no conflicts to resolve in phase {phase}"));
        }
        let Some(merge_dir) = merge_dir else {
            return self.fail_with("no merge in progress");
        };
        let analysis = analysis.unwrap_or_else(|| {
            ConflictAnalysis::manual_fallback(&conflicts, "No analysis available; resolve conservatively.")
        });
        self.set_pool_status(AgentStatus::Busy);
        self.resolve_locked(merge_dir, conflicts, analysis).await
    }

    async fn resolve_locked(&self, merge_dir: PathBuf, conflicts: Vec<String>, analysis: ConflictAnalysis) -> MergeReport {
        let session = self.session();
        let (source, target) = {
            let state = self.inner.state.lock();
            (state.source_branch.clone(), state.target_branch.clone())
        };
        self.progress("Resolving conflicts");

        let agents = &session.config().agents;
        let options = PromptOptions::new(prompts::conflict_resolution_prompt(&source, &target, &analysis))
            .with_system_prompt(MERGE_SYSTEM_PROMPT)
            .with_working_dir(merge_dir.clone())
            .with_tool_profile(ToolProfile::Edit)
            .with_max_turns(agents.merge_max_turns)
            .with_model(agents.model.clone());
        let response = match session
            .queue()
            .enqueue_query(self.priority(), self.queue_key(), self.task_id(), Arc::clone(session.backend()), options)
            .await
        {
            Ok(stream) => transcript::drain(stream, |event| self.observe(event)).await,
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = response {
            return self
                .abort_and_fail(&merge_dir, conflicts, Some(analysis), format!("Conflict resolution failed: {e}"))
                .await;
        }

        let mut marked = Vec::new();
        for file in &conflicts {
            match tokio::fs::read_to_string(merge_dir.join(file)).await {
                Ok(content) if has_conflict_markers(&content) => marked.push(file.clone()),
                Ok(_) => {}
                // Deleted on one side and resolved by removal
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(_) => marked.push(file.clone()),
            }
        }
        if !marked.is_empty() {
            let error = format!("Conflict markers remain in: {}", marked.join(", "));
            return self.abort_and_fail(&merge_dir, marked, Some(analysis), error).await;
        }

        let (vcs, dir, files) = (session.vcs(), merge_dir.as_path(), conflicts.as_slice());
        let staged = session
            .staging_retry()
            .retry(move |attempt| async move {
                debug!(attempt, "Staging resolved files");
                vcs.stage_files(dir, files).await?;
                let remaining = vcs.conflicted_files(dir).await?;
                if remaining.is_empty() {
                    Ok(())
                } else {
                    Err(DomainError::VersionControl(format!(
                        "files still conflicted: {}",
                        remaining.join(", ")
                    )))
                }
            })
            .await;
        if let Err(e) = staged {
            let remaining = vcs.conflicted_files(dir).await.unwrap_or_else(|_| conflicts.clone());
            return self
                .abort_and_fail(&merge_dir, remaining, Some(analysis), format!("Unresolved conflicts remain: {e}"))
                .await;
        }

        let message = format!(
            "Merge {source} into {target}\n\nResolved conflicts in {} file(s) with AI assistance: {}",
            conflicts.len(),
            conflicts.join(", ")
        );
        match vcs.commit_merge(dir, &message).await {
            Ok(sha) => self.finish(sha, true, Some(analysis)),
            Err(e) => {
                self.abort_and_fail(&merge_dir, conflicts, Some(analysis), format!("Merge commit failed: {e}"))
                    .await
            }
        }
    }

    async fn abort_and_fail(
        &self,
        merge_dir: &Path,
        remaining: Vec<String>,
        analysis: Option<ConflictAnalysis>,
        error: String,
    ) -> MergeReport {
        if let Err(e) = self.session().vcs().abort_merge(merge_dir).await {
            warn!(error = %e, "Could not abort merge");
        }
        self.fail(MergeReport {
            success: false,
            conflicts: remaining,
            analysis,
            error: Some(error),
            ..MergeReport::default()
        })
    }

    /// Record a successful merge and cascade its effect on the task store.
    fn finish(&self, sha: String, resolved_by_ai: bool, analysis: Option<ConflictAnalysis>) -> MergeReport {
        let dag = self.session().dag();
        let feature_id = &self.inner.feature_id;
        match &self.inner.scope {
            MergeScope::Task { task_id } => {
                if let Err(e) = dag.update_task_status(feature_id, task_id, TaskStatus::Completed) {
                    warn!(%task_id, error = %e, "Task status not moved to completed");
                }
                match dag.complete_feature_if_done(feature_id) {
                    Ok(true) => {
                        info!(%feature_id, "All tasks merged; feature completed");
                        self.progress(format!("Feature {feature_id} completed"));
                    }
                    Ok(false) => {}
                    Err(e) => warn!(%feature_id, error = %e, "Feature completion not checked"),
                }
            }
            MergeScope::Feature => {
                if let Err(e) = dag.set_feature_status(feature_id, FeatureStatus::Merged) {
                    warn!(%feature_id, error = %e, "Feature status not moved to merged");
                }
            }
        }

        let (source, target) = {
            let mut state = self.inner.state.lock();
            state.commit_sha = Some(sha.clone());
            (state.source_branch.clone(), state.target_branch.clone())
        };
        if let Err(e) = self.transition(MergePhase::Completed) {
            return MergeReport::rejected(e.to_string());
        }
        self.set_pool_status(AgentStatus::Idle);

        let short: String = sha.chars().take(8).collect();
        self.emit(AgentEventKind::Completed {
            summary: format!("Merged {source} into {target} ({short})"),
        });
        info!(%source, %target, commit = %sha, resolved_by_ai, "Merge completed");
        MergeReport {
            success: true,
            commit_sha: Some(sha),
            analysis,
            resolved_by_ai,
            ..MergeReport::default()
        }
    }

    /// Cancel the merge stopped on conflicts. The working directory is reset
    /// and the agent fails with "merge aborted". Returns whether the reset
    /// succeeded.
    #[instrument(skip(self), fields(subject = %self.subject_id()))]
    pub async fn abort_merge(&self) -> bool {
        if self.inner.busy.swap(true, Ordering::SeqCst) {
            warn!("Merge operation running; abort refused");
            return false;
        }
        let _busy = BusyGuard(&self.inner.busy);

        let (dir, conflicts, analysis) = {
            let state = self.inner.state.lock();
            (state.merge_dir.clone(), state.conflicts.clone(), state.analysis.clone())
        };
        let Some(dir) = dir else {
            warn!("No merge in progress to abort");
            return false;
        };
        match self.session().vcs().abort_merge(&dir).await {
            Ok(()) => {
                self.progress("Merge aborted");
                self.fail(MergeReport {
                    success: false,
                    conflicts,
                    analysis,
                    error: Some("merge aborted".to_string()),
                    ..MergeReport::default()
                });
                true
            }
            Err(e) => {
                warn!(error = %e, "Merge abort failed");
                false
            }
        }
    }

    /// Release the pool slot.
    pub fn cleanup(&self) {
        if let Some(id) = self.agent_id() {
            self.session().pool().terminate_agent(id);
        }
    }
}

impl fmt::Debug for MergeAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeAgent")
            .field("feature_id", &self.inner.feature_id)
            .field("scope", &self.inner.scope)
            .field("phase", &self.phase())
            .finish()
    }
}
