//! Task domain model.
//!
//! Tasks are the nodes of a feature's dependency DAG. Their status is driven
//! by the dev, QA and merge agents plus the orchestrator's cascades.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task needs refinement before it can be scheduled
    NeedsAnalysis,
    /// Waiting on at least one incomplete dependency
    Blocked,
    /// All dependencies completed, can be picked up
    Ready,
    /// A dev agent is working on it
    InProgress,
    /// Work done, waiting for QA review
    ReadyForQa,
    /// QA passed, waiting to be merged into the feature branch
    ReadyForMerge,
    /// Merged
    Completed,
    /// Execution failed or intention rejected
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Blocked
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeedsAnalysis => "needs_analysis",
            Self::Blocked => "blocked",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::ReadyForQa => "ready_for_qa",
            Self::ReadyForMerge => "ready_for_merge",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "needs_analysis" => Some(Self::NeedsAnalysis),
            "blocked" => Some(Self::Blocked),
            "ready" => Some(Self::Ready),
            "in_progress" => Some(Self::InProgress),
            "ready_for_qa" => Some(Self::ReadyForQa),
            "ready_for_merge" => Some(Self::ReadyForMerge),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> Vec<TaskStatus> {
        match self {
            Self::NeedsAnalysis => vec![Self::Blocked, Self::Ready],
            Self::Blocked => vec![Self::Ready, Self::NeedsAnalysis, Self::Failed],
            Self::Ready => vec![Self::InProgress, Self::Blocked, Self::Failed],
            Self::InProgress => vec![Self::ReadyForQa, Self::ReadyForMerge, Self::Failed],
            // QA failure sends the task back to the developer
            Self::ReadyForQa => vec![Self::ReadyForMerge, Self::InProgress, Self::Failed],
            Self::ReadyForMerge => vec![Self::Completed, Self::InProgress, Self::Failed],
            Self::Completed => vec![],
            Self::Failed => vec![Self::Ready, Self::InProgress, Self::Blocked],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work inside a feature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Task identifier, unique within its feature
    pub id: String,
    /// Short title
    pub title: String,
    /// Full description; this is the task's specification
    pub description: String,
    /// Current status
    pub status: TaskStatus,
    /// Feedback from the last failed QA review
    pub qa_feedback: Option<String>,
    /// Summary the dev agent produced on its last successful execution
    pub execution_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::default(),
            qa_feedback: None,
            execution_summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to new status.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> Result<(), String> {
        if self.status == new_status {
            return Ok(());
        }
        if !self.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.status.as_str(),
                new_status.as_str()
            ));
        }

        self.status = new_status;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether this task is in a QA rework cycle.
    pub fn is_rework(&self) -> bool {
        self.qa_feedback.as_deref().is_some_and(|f| !f.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_names() {
        for status in [
            TaskStatus::NeedsAnalysis,
            TaskStatus::Blocked,
            TaskStatus::Ready,
            TaskStatus::InProgress,
            TaskStatus::ReadyForQa,
            TaskStatus::ReadyForMerge,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::from_str("bogus"), None);
    }

    #[test]
    fn test_completed_is_terminal() {
        assert!(TaskStatus::Completed.valid_transitions().is_empty());
        let mut task = Task::new("t1", "Title", "Desc").with_status(TaskStatus::Completed);
        assert!(task.transition_to(TaskStatus::Ready).is_err());
    }

    #[test]
    fn test_rework_transition_allowed() {
        let mut task = Task::new("t1", "Title", "Desc").with_status(TaskStatus::ReadyForQa);
        task.transition_to(TaskStatus::InProgress).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_same_status_is_noop() {
        let mut task = Task::new("t1", "Title", "Desc").with_status(TaskStatus::Ready);
        assert!(task.transition_to(TaskStatus::Ready).is_ok());
    }

    #[test]
    fn test_is_rework() {
        let mut task = Task::new("t1", "Title", "Desc");
        assert!(!task.is_rework());
        task.qa_feedback = Some("  ".into());
        assert!(!task.is_rework());
        task.qa_feedback = Some("missing tests".into());
        assert!(task.is_rework());
    }
}
