//! Application layer: the agent state machines and the session that wires
//! them to the shared services.

pub mod conflict_parser;
pub mod dev_agent;
pub mod events;
pub mod feature_merge_agent;
pub mod merge_agent;
pub mod phase;
pub mod prompts;
pub mod qa_agent;
pub mod qa_parser;
pub mod session;
mod transcript;

pub use conflict_parser::{has_conflict_markers, parse_conflict_analysis};
pub use dev_agent::{
    approval_message, DevAgent, DevAgentOptions, DevAgentState, DevPhase, ExecutionReport,
};
pub use events::{AgentEvent, AgentEventKind, AgentRole, Observer, Observers};
pub use feature_merge_agent::FeatureMergeAgent;
pub use merge_agent::{MergeAgent, MergeAgentState, MergePhase, MergeReport, MergeScope};
pub use phase::Phase;
pub use qa_agent::{QaAgent, QaAgentState, QaOptions, QaPhase, QaResult};
pub use qa_parser::{parse_review, ReviewVerdict};
pub use session::{OrchestrationSession, ShutdownReport};
