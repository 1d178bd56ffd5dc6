//! Domain models.

pub mod agent;
pub mod config;
pub mod dag;
pub mod feature;
pub mod intention;
pub mod merge;
pub mod message;
pub mod priority;
pub mod stream;
pub mod task;

pub use agent::{AgentInfo, AgentKind, AgentRegistration, AgentStatus, PoolStatus};
pub use config::{
    AgentsConfig, BackendConfig, BackendKind, Config, GitConfig, LoggingConfig, PoolConfig,
    PoolPolicyKind, QueueConfig, StagingRetryConfig,
};
pub use dag::{Connection, DagGraph};
pub use feature::{AcceptanceCriterion, FeatureSpec, FeatureStatus, Requirement};
pub use intention::IntentionDecision;
pub use merge::{
    CommitOutcome, ConflictAnalysis, ConflictResolution, DiffSummary, FileConflictAnalysis,
    MergeOutcome, WorktreeInfo,
};
pub use message::{BusMessage, Endpoint, MessagePayload, MessageType, ParticipantKind};
pub use priority::RequestPriority;
pub use stream::{MessageKind, PromptOptions, StreamEvent, ToolProfile};
pub use task::{Task, TaskStatus};
