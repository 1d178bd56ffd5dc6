use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of agent tracked by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Internal oversight agent; only one may be live at a time
    Harness,
    /// Developer agent working a single task
    #[serde(alias = "dev")]
    Task,
    /// Merge agent (task -> feature or feature -> main)
    Merge,
    /// QA reviewer
    Qa,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [Self::Harness, Self::Task, Self::Merge, Self::Qa];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Harness => "harness",
            Self::Task => "task",
            Self::Merge => "merge",
            Self::Qa => "qa",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "harness" => Ok(Self::Harness),
            "task" | "dev" => Ok(Self::Task),
            "merge" => Ok(Self::Merge),
            "qa" => Ok(Self::Qa),
            _ => Err(anyhow::anyhow!("Invalid agent kind: {s}")),
        }
    }
}

/// Agent status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Terminated,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

impl FromStr for AgentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "busy" => Ok(Self::Busy),
            "terminated" => Ok(Self::Terminated),
            _ => Err(anyhow::anyhow!("Invalid agent status: {s}")),
        }
    }
}

/// Pool record for a live (or terminated, not yet purged) agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Unique agent identifier
    pub id: Uuid,

    /// Kind of agent
    #[serde(rename = "type")]
    pub kind: AgentKind,

    /// Current agent status
    pub status: AgentStatus,

    /// Task the agent is attached to (if any)
    pub task_id: Option<String>,

    /// Feature the agent is attached to (if any)
    pub feature_id: Option<String>,

    /// Registration timestamp
    pub started_at: DateTime<Utc>,

    /// Termination timestamp (if terminated)
    pub terminated_at: Option<DateTime<Utc>>,
}

impl AgentInfo {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: AgentStatus::Idle,
            task_id: None,
            feature_id: None,
            started_at: Utc::now(),
            terminated_at: None,
        }
    }

    /// Check if agent is still counted against spawn limits
    pub fn is_active(&self) -> bool {
        self.status != AgentStatus::Terminated
    }
}

/// Registration request for the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRegistration {
    pub kind: AgentKind,
    pub task_id: Option<String>,
    pub feature_id: Option<String>,
}

impl AgentRegistration {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            task_id: None,
            feature_id: None,
        }
    }

    #[must_use]
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    #[must_use]
    pub fn with_feature(mut self, feature_id: impl Into<String>) -> Self {
        self.feature_id = Some(feature_id.into());
        self
    }
}

/// Aggregate pool counts used by the orchestrator for scheduling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub busy: usize,
    pub terminated: usize,
    /// Busy agents per kind
    pub busy_by_kind: HashMap<AgentKind, usize>,
    /// Non-terminated agents per kind
    pub active_by_kind: HashMap<AgentKind, usize>,
}

impl PoolStatus {
    pub fn busy_of(&self, kind: AgentKind) -> usize {
        self.busy_by_kind.get(&kind).copied().unwrap_or(0)
    }

    pub fn active_of(&self, kind: AgentKind) -> usize {
        self.active_by_kind.get(&kind).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing_accepts_dev_alias() {
        assert_eq!("dev".parse::<AgentKind>().unwrap(), AgentKind::Task);
        assert_eq!("QA".parse::<AgentKind>().unwrap(), AgentKind::Qa);
        assert!("planner".parse::<AgentKind>().is_err());
    }

    #[test]
    fn test_new_agent_is_idle_and_active() {
        let info = AgentInfo::new(AgentKind::Merge);
        assert_eq!(info.status, AgentStatus::Idle);
        assert!(info.is_active());
    }

    #[test]
    fn test_registration_always_names_a_kind() {
        let registration = AgentRegistration::new(AgentKind::Qa).with_task("t1").with_feature("f1");
        assert_eq!(registration.kind, AgentKind::Qa);
        assert_eq!(registration.task_id.as_deref(), Some("t1"));
        assert_eq!(registration.feature_id.as_deref(), Some("f1"));
    }

    #[test]
    fn test_agent_info_serializes_type_field() {
        let info = AgentInfo::new(AgentKind::Harness);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "harness");
        assert_eq!(json["status"], "idle");
    }
}
