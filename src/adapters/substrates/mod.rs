//! LLM backend implementations.

pub mod claude_code;
pub mod mock;

use std::sync::Arc;

use crate::domain::models::{AgentsConfig, BackendConfig, BackendKind};
use crate::domain::ports::LlmBackend;

pub use claude_code::{ClaudeCodeBackend, ClaudeCodeConfig, StreamJsonParser};
pub use mock::{InvokeHook, ScriptedBackend, ScriptedResponse};

/// Build the backend selected by configuration.
pub fn build_backend(backend: &BackendConfig, agents: &AgentsConfig) -> Arc<dyn LlmBackend> {
    match backend.kind {
        BackendKind::ClaudeCode => Arc::new(ClaudeCodeBackend::new(ClaudeCodeConfig::from_config(
            backend,
            agents.model.clone(),
        ))),
        BackendKind::Mock => Arc::new(ScriptedBackend::new()),
    }
}
