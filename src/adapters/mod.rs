//! Adapters for external systems: git, LLM backends and subprocesses.

pub mod git;
pub mod process;
pub mod substrates;

pub use git::GitVersionControl;
pub use process::ProcessHandle;
pub use substrates::{ClaudeCodeBackend, ClaudeCodeConfig, ScriptedBackend, ScriptedResponse};
