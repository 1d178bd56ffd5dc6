//! Message bus envelope and payloads.
//!
//! Every message carries a strongly typed payload; the message type is derived
//! from the payload variant so the two can never disagree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of participant on either end of a bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    /// Human-facing planning agent
    Pm,
    Harness,
    Dev,
    Qa,
    Merge,
    Orchestrator,
}

impl ParticipantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pm => "pm",
            Self::Harness => "harness",
            Self::Dev => "dev",
            Self::Qa => "qa",
            Self::Merge => "merge",
            Self::Orchestrator => "orchestrator",
        }
    }
}

/// One end of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "type")]
    pub kind: ParticipantKind,
    pub id: String,
}

impl Endpoint {
    pub fn new(kind: ParticipantKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn dev(task_id: impl Into<String>) -> Self {
        Self::new(ParticipantKind::Dev, task_id)
    }

    pub fn harness() -> Self {
        Self::new(ParticipantKind::Harness, "harness")
    }

    pub fn orchestrator() -> Self {
        Self::new(ParticipantKind::Orchestrator, "orchestrator")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Discriminant of [`MessagePayload`], used for per-type subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskRegistered,
    IntentionProposed,
    IntentionApproved,
    IntentionRejected,
    TaskWorking,
    TaskReadyForMerge,
    TaskCompleted,
    TaskFailed,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskRegistered => "task_registered",
            Self::IntentionProposed => "intention_proposed",
            Self::IntentionApproved => "intention_approved",
            Self::IntentionRejected => "intention_rejected",
            Self::TaskWorking => "task_working",
            Self::TaskReadyForMerge => "task_ready_for_merge",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed payload of a bus message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MessagePayload {
    TaskRegistered {
        title: String,
        worktree_path: Option<String>,
    },
    IntentionProposed {
        intention: String,
    },
    IntentionApproved {
        notes: Option<String>,
    },
    IntentionRejected {
        reason: String,
    },
    TaskWorking,
    TaskReadyForMerge {
        summary: String,
    },
    TaskCompleted {
        feature_id: String,
    },
    TaskFailed {
        error: String,
    },
}

impl MessagePayload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::TaskRegistered { .. } => MessageType::TaskRegistered,
            Self::IntentionProposed { .. } => MessageType::IntentionProposed,
            Self::IntentionApproved { .. } => MessageType::IntentionApproved,
            Self::IntentionRejected { .. } => MessageType::IntentionRejected,
            Self::TaskWorking => MessageType::TaskWorking,
            Self::TaskReadyForMerge { .. } => MessageType::TaskReadyForMerge,
            Self::TaskCompleted { .. } => MessageType::TaskCompleted,
            Self::TaskFailed { .. } => MessageType::TaskFailed,
        }
    }
}

/// Envelope published on the message bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: Uuid,
    /// Monotonic publish order, assigned by the bus
    pub sequence: u64,
    pub from: Endpoint,
    pub to: Endpoint,
    pub task_id: String,
    #[serde(flatten)]
    pub payload: MessagePayload,
    pub timestamp: DateTime<Utc>,
}

impl BusMessage {
    pub fn new(from: Endpoint, to: Endpoint, task_id: impl Into<String>, payload: MessagePayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            from,
            to,
            task_id: task_id.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    pub fn is_addressed_to(&self, kind: ParticipantKind, id: &str) -> bool {
        self.to.kind == kind && self.to.id == id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_derived_from_payload() {
        let msg = BusMessage::new(
            Endpoint::dev("t1"),
            Endpoint::harness(),
            "t1",
            MessagePayload::TaskFailed { error: "boom".into() },
        );
        assert_eq!(msg.message_type(), MessageType::TaskFailed);
        assert_eq!(msg.message_type().as_str(), "task_failed");
    }

    #[test]
    fn test_serialized_shape() {
        let msg = BusMessage::new(
            Endpoint::harness(),
            Endpoint::dev("t1"),
            "t1",
            MessagePayload::IntentionRejected { reason: "scope".into() },
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "intention_rejected");
        assert_eq!(json["payload"]["reason"], "scope");
        assert_eq!(json["from"]["type"], "harness");
        assert_eq!(json["to"]["id"], "t1");
    }

    #[test]
    fn test_addressing() {
        let msg = BusMessage::new(
            Endpoint::harness(),
            Endpoint::dev("t1"),
            "t1",
            MessagePayload::TaskWorking,
        );
        assert!(msg.is_addressed_to(ParticipantKind::Dev, "t1"));
        assert!(!msg.is_addressed_to(ParticipantKind::Dev, "t2"));
        assert!(!msg.is_addressed_to(ParticipantKind::Qa, "t1"));
    }
}
