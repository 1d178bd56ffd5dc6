//! Conclave - Multi-Agent Coding Orchestration Core
//!
//! Conclave coordinates AI developer, QA and merge agents working on a
//! feature's task graph. Each task gets its own git worktree; every LLM call
//! goes through one priority dispatcher with a bounded concurrency window.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Models, errors and the port traits
//! - **Service Layer** (`services`): Request queue, agent pool, message bus, task DAG
//! - **Application Layer** (`application`): Dev, QA and merge agent state machines
//! - **Adapters** (`adapters`): Git, Claude Code CLI and scripted LLM backends
//! - **Infrastructure Layer** (`infrastructure`): Configuration and logging
//!
//! # Example
//!
//! ```ignore
//! use conclave::{ConfigLoader, IntentionDecision, OrchestrationSession};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = OrchestrationSession::from_config(ConfigLoader::load()?)?;
//!     let dev = session.dev_agent("auth", "login-form", Default::default());
//!     if dev.initialize().await {
//!         dev.propose_intention(None)?;
//!         dev.receive_approval(IntentionDecision::approve())?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use adapters::{ClaudeCodeBackend, GitVersionControl, ScriptedBackend, ScriptedResponse};
pub use application::{
    approval_message, AgentEvent, AgentEventKind, DevAgent, DevAgentOptions, DevPhase,
    FeatureMergeAgent, MergeAgent, MergePhase, MergeReport, OrchestrationSession, QaAgent,
    QaOptions, QaPhase, QaResult,
};
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    AgentKind, AgentStatus, BusMessage, Config, FeatureSpec, IntentionDecision, MessagePayload,
    MessageType, RequestPriority, StreamEvent, Task, TaskStatus,
};
pub use domain::ports::{EventStream, LlmBackend, VersionControl};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::logging::{LogConfig, LoggerImpl};
pub use services::{AgentPool, AgentRequestQueue, MessageBus, TaskDagStore};
