//! Port trait definitions (Hexagonal Architecture)
//!
//! - LlmBackend: streaming LLM invocations
//! - VersionControl: worktrees, branches, merges and commits

pub mod llm_backend;
pub mod version_control;

pub use llm_backend::{EventStream, LlmBackend};
pub use version_control::VersionControl;
