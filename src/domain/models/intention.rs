use serde::{Deserialize, Serialize};

/// Outcome of the approval step for a proposed intention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum IntentionDecision {
    Approved {
        #[serde(default)]
        notes: Option<String>,
    },
    Rejected {
        reason: String,
    },
}

impl IntentionDecision {
    pub fn approve() -> Self {
        Self::Approved { notes: None }
    }

    pub fn approve_with_notes(notes: impl Into<String>) -> Self {
        Self::Approved {
            notes: Some(notes.into()),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}
