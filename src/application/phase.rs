//! Shared shape of agent phase enums.

use std::fmt;

use crate::domain::errors::{DomainError, DomainResult};

/// A phase of an agent state machine.
pub trait Phase: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    fn can_transition_to(&self, next: Self) -> bool;

    fn is_terminal(&self) -> bool;
}

/// Check a transition, producing the usual error when it is not allowed.
pub fn check_transition<P: Phase>(from: P, to: P) -> DomainResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else if from.is_terminal() {
        Err(DomainError::invalid_transition(from, to, "agent already finished"))
    } else {
        Err(DomainError::invalid_transition(from, to, "transition not allowed"))
    }
}
