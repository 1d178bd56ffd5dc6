//! Agent lifecycle events and observer lists.
//!
//! Every state machine reports progress through an explicit observer list.
//! Event names follow `<role>:<event>`, for example `dev-agent:failed`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Which state machine produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Dev,
    Qa,
    Merge,
    FeatureMerge,
}

impl AgentRole {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Dev => "dev-agent",
            Self::Qa => "qa-agent",
            Self::Merge => "merge-agent",
            Self::FeatureMerge => "feature-merge-agent",
        }
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEventKind {
    PhaseChanged { from: String, to: String },
    Progress { message: String },
    ToolUse { name: String, input: serde_json::Value },
    ToolResult { name: String },
    Completed { summary: String },
    Failed { error: String },
}

impl AgentEventKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::PhaseChanged { .. } => "phase",
            Self::Progress { .. } => "progress",
            Self::ToolUse { .. } => "tool-use",
            Self::ToolResult { .. } => "tool-result",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Notification emitted by a state machine. Fire-and-forget.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentEvent {
    pub role: AgentRole,
    /// Pool id, once the agent is registered
    pub agent_id: Option<Uuid>,
    /// Task id, or feature id for feature-scope merges
    pub subject_id: String,
    #[serde(flatten)]
    pub kind: AgentEventKind,
    pub timestamp: DateTime<Utc>,
}

impl AgentEvent {
    pub fn new(role: AgentRole, agent_id: Option<Uuid>, subject_id: impl Into<String>, kind: AgentEventKind) -> Self {
        Self {
            role,
            agent_id,
            subject_id: subject_id.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Event name, e.g. `qa-agent:completed`.
    pub fn name(&self) -> String {
        format!("{}:{}", self.role.prefix(), self.kind.suffix())
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.kind, AgentEventKind::Failed { .. })
    }
}

pub type Observer = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// Shared list of observers. Clones share the list.
#[derive(Clone, Default)]
pub struct Observers {
    list: Arc<RwLock<Vec<Observer>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, observer: F)
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.list.write().push(Arc::new(observer));
    }

    /// Invoke every observer in registration order. Observers may register
    /// further observers; those see the next event.
    pub fn emit(&self, event: &AgentEvent) {
        let snapshot: Vec<Observer> = self.list.read().clone();
        for observer in snapshot {
            observer(event);
        }
    }

    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers").field("len", &self.len()).finish()
    }
}

/// Emits on an agent's own observers, then on the session-wide ones.
#[derive(Debug, Clone)]
pub(crate) struct Emitter {
    pub role: AgentRole,
    pub subject_id: String,
    pub local: Observers,
    pub session: Observers,
}

impl Emitter {
    pub fn new(role: AgentRole, subject_id: impl Into<String>, session: Observers) -> Self {
        Self {
            role,
            subject_id: subject_id.into(),
            local: Observers::new(),
            session,
        }
    }

    pub fn emit(&self, agent_id: Option<Uuid>, kind: AgentEventKind) {
        let event = AgentEvent::new(self.role, agent_id, self.subject_id.clone(), kind);
        self.local.emit(&event);
        self.session.emit(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_event_names() {
        let event = AgentEvent::new(
            AgentRole::Dev,
            None,
            "t1",
            AgentEventKind::Failed { error: "boom".into() },
        );
        assert_eq!(event.name(), "dev-agent:failed");
        assert!(event.is_failure());

        let event = AgentEvent::new(
            AgentRole::FeatureMerge,
            None,
            "f1",
            AgentEventKind::ToolUse { name: "Edit".into(), input: serde_json::json!({}) },
        );
        assert_eq!(event.name(), "feature-merge-agent:tool-use");
    }

    #[test]
    fn test_emitter_reaches_local_then_session() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let session = Observers::new();
        let l = log.clone();
        session.add(move |e| l.lock().push(format!("session:{}", e.name())));

        let emitter = Emitter::new(AgentRole::Qa, "t1", session);
        let l = log.clone();
        emitter.local.add(move |e| l.lock().push(format!("local:{}", e.name())));

        emitter.emit(None, AgentEventKind::Progress { message: "x".into() });
        assert_eq!(
            *log.lock(),
            vec!["local:qa-agent:progress", "session:qa-agent:progress"]
        );
    }

    #[test]
    fn test_serialized_event_is_flat() {
        let event = AgentEvent::new(
            AgentRole::Merge,
            None,
            "t1",
            AgentEventKind::Completed { summary: "merged".into() },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "completed");
        assert_eq!(json["summary"], "merged");
        assert_eq!(json["role"], "merge");
    }
}
