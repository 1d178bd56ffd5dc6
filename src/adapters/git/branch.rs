//! Branch and worktree naming.

use crate::domain::errors::{DomainError, DomainResult};

/// Reject names git would refuse or that could be read as options.
pub fn validate_branch_name(name: &str) -> DomainResult<()> {
    if name.is_empty() {
        return Err(DomainError::ValidationFailed(
            "Branch name cannot be empty".to_string(),
        ));
    }
    if name.starts_with('-') {
        return Err(DomainError::ValidationFailed(format!(
            "Invalid branch name '{name}': must not start with '-'"
        )));
    }
    if name.contains("..") || name.contains("//") || name.contains("@{") {
        return Err(DomainError::ValidationFailed(format!(
            "Invalid branch name '{name}': contains a forbidden sequence"
        )));
    }
    if let Some(ch) = name
        .chars()
        .find(|ch| ch.is_ascii_control() || matches!(ch, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\'))
    {
        return Err(DomainError::ValidationFailed(format!(
            "Invalid branch name '{name}': contains disallowed character '{ch}'"
        )));
    }
    if name.ends_with(".lock") || name.ends_with('/') || name.ends_with('.') {
        return Err(DomainError::ValidationFailed(format!(
            "Invalid branch name '{name}': bad suffix"
        )));
    }
    Ok(())
}

/// Identifiers become both branch path segments and directory names.
pub fn validate_identifier(kind: &str, id: &str) -> DomainResult<()> {
    if id.is_empty() || id.contains('/') || id.starts_with('.') {
        return Err(DomainError::ValidationFailed(format!(
            "Invalid {kind} id '{id}'"
        )));
    }
    validate_branch_name(id)
}

pub fn task_worktree_dir_name(feature_id: &str, task_id: &str) -> String {
    format!("task-{feature_id}-{task_id}")
}

pub fn feature_worktree_dir_name(feature_id: &str) -> String {
    format!("feature-{feature_id}")
}
