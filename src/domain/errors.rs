//! Domain errors for the Conclave orchestration core.

use thiserror::Error;

use super::models::AgentKind;

/// Format a cycle path as a human-readable string: `A -> B -> C -> A`.
fn format_cycle_path(path: &[String]) -> String {
    path.join(" -> ")
}

/// Domain-level errors that can occur in the orchestration core.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Task dependency cycle detected: {}", format_cycle_path(.0))]
    DependencyCycle(Vec<String>),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Agent pool limit reached for {kind} agents (limit {limit})")]
    PoolLimitReached { kind: AgentKind, limit: usize },

    #[error("Request cancelled: {0}")]
    RequestCancelled(String),

    #[error("Branch '{branch}' not found. Available branches: [{}]", .available.join(", "))]
    BranchNotFound {
        branch: String,
        available: Vec<String>,
    },

    #[error("Version control error: {0}")]
    VersionControl(String),

    #[error("LLM backend error: {0}")]
    Backend(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Shorthand for an invalid transition between two named states.
    pub fn invalid_transition(
        from: impl ToString,
        to: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error stems from a cancellation rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::RequestCancelled(_))
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_path_formatting() {
        let err = DomainError::DependencyCycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Task dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn test_branch_not_found_lists_available() {
        let err = DomainError::BranchNotFound {
            branch: "feature/x".into(),
            available: vec!["main".into(), "feature/y".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("feature/x"));
        assert!(msg.contains("Available branches: [main, feature/y]"));
    }

    #[test]
    fn test_pool_limit_message() {
        let err = DomainError::PoolLimitReached {
            kind: AgentKind::Harness,
            limit: 1,
        };
        assert!(err.to_string().contains("pool limit reached"));
    }
}
