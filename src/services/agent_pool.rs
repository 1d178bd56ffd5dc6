//! Agent pool: registry of live agents and spawn-limit enforcement.
//!
//! The pool is the single source of truth for how many agents of each kind
//! are alive. Limit checks and inserts happen under one lock so two callers
//! can never both claim the last slot.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentInfo, AgentKind, AgentRegistration, AgentStatus, PoolConfig, PoolPolicyKind, PoolStatus,
};

/// External resource owned by an agent (typically a subprocess), released
/// when the agent is terminated.
pub trait ResourceHandle: Send + Sync {
    /// Human-readable description used in logs.
    fn describe(&self) -> String;

    /// Release the resource.
    fn release(&self) -> DomainResult<()>;
}

/// Events buffered per subscriber unless configured otherwise.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Spawn policy for non-harness agents. The harness is always a singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolPolicy {
    #[default]
    Unlimited,
    Capped {
        max_task_agents: usize,
        max_merge_agents: usize,
        max_qa_agents: usize,
    },
}

impl PoolPolicy {
    pub fn from_config(config: &PoolConfig) -> Self {
        match config.policy {
            PoolPolicyKind::Unlimited => Self::Unlimited,
            PoolPolicyKind::Capped => Self::Capped {
                max_task_agents: config.max_task_agents,
                max_merge_agents: config.max_merge_agents,
                max_qa_agents: config.max_qa_agents,
            },
        }
    }

    /// Maximum live agents of a kind; `None` means unlimited.
    pub fn limit_for(&self, kind: AgentKind) -> Option<usize> {
        if kind == AgentKind::Harness {
            return Some(1);
        }
        match *self {
            Self::Unlimited => None,
            Self::Capped {
                max_task_agents,
                max_merge_agents,
                max_qa_agents,
            } => Some(match kind {
                AgentKind::Task => max_task_agents,
                AgentKind::Merge => max_merge_agents,
                AgentKind::Qa => max_qa_agents,
                AgentKind::Harness => 1,
            }),
        }
    }
}

/// Events emitted on every pool mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    Registered {
        agent: AgentInfo,
    },
    StatusChanged {
        agent_id: Uuid,
        kind: AgentKind,
        from: AgentStatus,
        to: AgentStatus,
        task_id: Option<String>,
    },
    Terminated {
        agent_id: Uuid,
        kind: AgentKind,
    },
}

impl PoolEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "agent:registered",
            Self::StatusChanged { .. } => "agent:status",
            Self::Terminated { .. } => "agent:terminated",
        }
    }

    pub fn agent_id(&self) -> Uuid {
        match self {
            Self::Registered { agent } => agent.id,
            Self::StatusChanged { agent_id, .. } | Self::Terminated { agent_id, .. } => *agent_id,
        }
    }
}

#[derive(Default)]
struct PoolState {
    agents: HashMap<Uuid, AgentInfo>,
    resources: HashMap<Uuid, Box<dyn ResourceHandle>>,
}

impl PoolState {
    fn active_of(&self, kind: AgentKind) -> usize {
        self.agents
            .values()
            .filter(|a| a.kind == kind && a.is_active())
            .count()
    }
}

/// Registry of live agents.
pub struct AgentPool {
    policy: PoolPolicy,
    state: Mutex<PoolState>,
    events: broadcast::Sender<PoolEvent>,
}

impl Default for AgentPool {
    fn default() -> Self {
        Self::new(PoolPolicy::default())
    }
}

impl AgentPool {
    pub fn new(policy: PoolPolicy) -> Self {
        Self::with_event_capacity(policy, DEFAULT_EVENT_CAPACITY)
    }

    /// Pool whose subscribers each buffer up to `capacity` events (minimum 1).
    pub fn with_event_capacity(policy: PoolPolicy, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            policy,
            state: Mutex::new(PoolState::default()),
            events,
        }
    }

    pub fn policy(&self) -> PoolPolicy {
        self.policy
    }

    /// Subscribe to pool events. A receiver that falls more than the event
    /// capacity behind gets `RecvError::Lagged` and loses the oldest events;
    /// [`event_stream`](Self::event_stream) logs and skips the gap.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    /// Pool events as a stream. Lag is logged and the stream carries on with
    /// the oldest retained event; it ends when the pool is dropped.
    pub fn event_stream(&self) -> BoxStream<'static, PoolEvent> {
        stream::unfold(self.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Pool event subscriber lagged, events dropped");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    fn emit(&self, event: PoolEvent) {
        debug!(event = event.name(), agent_id = %event.agent_id(), "Pool event");
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Whether a new agent of `kind` may be registered right now.
    pub fn can_spawn(&self, kind: AgentKind) -> bool {
        let state = self.state.lock();
        self.has_capacity(&state, kind)
    }

    fn has_capacity(&self, state: &PoolState, kind: AgentKind) -> bool {
        self.policy
            .limit_for(kind)
            .map_or(true, |limit| state.active_of(kind) < limit)
    }

    fn insert_checked(&self, registration: AgentRegistration, status: AgentStatus) -> DomainResult<AgentInfo> {
        let kind = registration.kind;

        let mut state = self.state.lock();
        if !self.has_capacity(&state, kind) {
            let limit = self.policy.limit_for(kind).unwrap_or(usize::MAX);
            warn!(%kind, limit, "Agent pool limit reached");
            return Err(DomainError::PoolLimitReached { kind, limit });
        }

        let mut info = AgentInfo::new(kind);
        info.task_id = registration.task_id;
        info.feature_id = registration.feature_id;
        info.status = status;
        state.agents.insert(info.id, info.clone());
        Ok(info)
    }

    /// Register a new idle agent.
    #[instrument(skip(self), fields(kind = %registration.kind))]
    pub fn register_agent(&self, registration: AgentRegistration) -> DomainResult<AgentInfo> {
        let info = self.insert_checked(registration, AgentStatus::Idle)?;
        info!(agent_id = %info.id, kind = %info.kind, "Agent registered");
        self.emit(PoolEvent::Registered { agent: info.clone() });
        Ok(info)
    }

    /// Register an agent and mark it busy as one operation.
    #[instrument(skip(self), fields(kind = %registration.kind))]
    pub fn register_busy(&self, registration: AgentRegistration) -> DomainResult<AgentInfo> {
        let info = self.insert_checked(registration, AgentStatus::Busy)?;
        info!(agent_id = %info.id, kind = %info.kind, "Agent registered busy");

        let mut registered = info.clone();
        registered.status = AgentStatus::Idle;
        self.emit(PoolEvent::Registered { agent: registered });
        self.emit(PoolEvent::StatusChanged {
            agent_id: info.id,
            kind: info.kind,
            from: AgentStatus::Idle,
            to: AgentStatus::Busy,
            task_id: info.task_id.clone(),
        });
        Ok(info)
    }

    /// Change an agent's status. Setting `Terminated` is the same as
    /// [`terminate_agent`](Self::terminate_agent).
    pub fn update_agent_status(&self, id: Uuid, status: AgentStatus, task_id: Option<String>) -> DomainResult<()> {
        if status == AgentStatus::Terminated {
            self.terminate_agent(id);
            return Ok(());
        }

        let event = {
            let mut state = self.state.lock();
            let agent = state
                .agents
                .get_mut(&id)
                .ok_or_else(|| DomainError::AgentNotFound(id.to_string()))?;

            if agent.status == AgentStatus::Terminated {
                return Err(DomainError::invalid_transition(
                    agent.status,
                    status,
                    "agent has been terminated",
                ));
            }

            let task_changed = task_id.is_some() && task_id != agent.task_id;
            if agent.status == status && !task_changed {
                return Ok(());
            }

            let from = agent.status;
            agent.status = status;
            if task_id.is_some() {
                agent.task_id = task_id;
            }
            PoolEvent::StatusChanged {
                agent_id: id,
                kind: agent.kind,
                from,
                to: status,
                task_id: agent.task_id.clone(),
            }
        };

        self.emit(event);
        Ok(())
    }

    /// Attach an external resource to be released on termination.
    pub fn attach_resource(&self, id: Uuid, handle: Box<dyn ResourceHandle>) -> DomainResult<()> {
        let mut state = self.state.lock();
        match state.agents.get(&id).map(AgentInfo::is_active) {
            Some(true) => {
                debug!(agent_id = %id, resource = %handle.describe(), "Resource attached");
                state.resources.insert(id, handle);
                Ok(())
            }
            Some(false) => Err(DomainError::invalid_transition(
                AgentStatus::Terminated,
                "attach_resource",
                "agent has been terminated",
            )),
            None => Err(DomainError::AgentNotFound(id.to_string())),
        }
    }

    /// Mark an agent terminated and release its resource. Returns `false`
    /// if the agent is unknown or was already terminated.
    #[instrument(skip(self))]
    pub fn terminate_agent(&self, id: Uuid) -> bool {
        let (kind, resource) = {
            let mut state = self.state.lock();
            let Some(agent) = state.agents.get_mut(&id) else {
                return false;
            };
            if agent.status == AgentStatus::Terminated {
                return false;
            }
            agent.status = AgentStatus::Terminated;
            agent.terminated_at = Some(Utc::now());
            let kind = agent.kind;
            (kind, state.resources.remove(&id))
        };

        if let Some(resource) = resource {
            if let Err(e) = resource.release() {
                warn!(agent_id = %id, resource = %resource.describe(), error = %e, "Failed to release agent resource");
            }
        }

        info!(agent_id = %id, %kind, "Agent terminated");
        self.emit(PoolEvent::Terminated { agent_id: id, kind });
        true
    }

    /// Terminate every live agent. Returns how many were terminated.
    pub fn terminate_all(&self) -> usize {
        let ids: Vec<Uuid> = {
            let state = self.state.lock();
            state
                .agents
                .values()
                .filter(|a| a.is_active())
                .map(|a| a.id)
                .collect()
        };
        ids.into_iter().filter(|id| self.terminate_agent(*id)).count()
    }

    pub fn get_agent(&self, id: Uuid) -> Option<AgentInfo> {
        self.state.lock().agents.get(&id).cloned()
    }

    /// All known agents, oldest first.
    pub fn list_agents(&self) -> Vec<AgentInfo> {
        let mut agents: Vec<AgentInfo> = self.state.lock().agents.values().cloned().collect();
        agents.sort_by_key(|a| a.started_at);
        agents
    }

    /// Aggregate counts for scheduling decisions.
    pub fn get_status(&self) -> PoolStatus {
        let state = self.state.lock();
        let mut status = PoolStatus {
            total: state.agents.len(),
            ..Default::default()
        };
        for agent in state.agents.values() {
            match agent.status {
                AgentStatus::Idle => status.idle += 1,
                AgentStatus::Busy => {
                    status.busy += 1;
                    *status.busy_by_kind.entry(agent.kind).or_insert(0) += 1;
                }
                AgentStatus::Terminated => status.terminated += 1,
            }
            if agent.is_active() {
                status.active += 1;
                *status.active_by_kind.entry(agent.kind).or_insert(0) += 1;
            }
        }
        status
    }

    /// Purge terminated agents. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.agents.len();
        state.agents.retain(|_, a| a.is_active());
        let removed = before - state.agents.len();
        if removed > 0 {
            debug!(removed, "Purged terminated agents");
        }
        removed
    }
}
