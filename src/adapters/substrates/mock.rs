//! Scripted backend for tests and dry runs.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{PromptOptions, StreamEvent};
use crate::domain::ports::{EventStream, LlmBackend};

/// Callback run when a query is issued, before its events are produced.
/// Tests use it to simulate the edits a real model would make.
pub type InvokeHook = Arc<dyn Fn(&PromptOptions) + Send + Sync>;

/// One scripted reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedResponse {
    /// Yield these events, then end.
    Events(Vec<StreamEvent>),
    /// Fail the query before any stream exists.
    Fail(String),
    /// Yield these events, then never end.
    Hang(Vec<StreamEvent>),
}

impl ScriptedResponse {
    /// Assistant text followed by the same text as the final result.
    pub fn text(result: impl Into<String>) -> Self {
        let result = result.into();
        Self::Events(vec![
            StreamEvent::assistant(result.clone()),
            StreamEvent::result(result),
        ])
    }

    /// A stream carrying a single error event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Events(vec![StreamEvent::error(message)])
    }

    pub fn hang() -> Self {
        Self::Hang(Vec::new())
    }
}

impl Default for ScriptedResponse {
    fn default() -> Self {
        Self::text("Mock task completed successfully.")
    }
}

/// Backend that replays queued responses in order, falling back to a
/// default once the script runs out.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<ScriptedResponse>>,
    fallback: ScriptedResponse,
    prompts: Mutex<Vec<PromptOptions>>,
    on_invoke: Option<InvokeHook>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: ScriptedResponse::default(),
            prompts: Mutex::new(Vec::new()),
            on_invoke: None,
        }
    }

    pub fn with_responses(responses: impl IntoIterator<Item = ScriptedResponse>) -> Self {
        let backend = Self::new();
        backend.script.lock().extend(responses);
        backend
    }

    #[must_use]
    pub fn with_fallback(mut self, response: ScriptedResponse) -> Self {
        self.fallback = response;
        self
    }

    #[must_use]
    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PromptOptions) + Send + Sync + 'static,
    {
        self.on_invoke = Some(Arc::new(hook));
        self
    }

    /// Append a response to the script.
    pub fn push(&self, response: ScriptedResponse) {
        self.script.lock().push_back(response);
    }

    /// Every prompt received so far, in order.
    pub fn prompts(&self) -> Vec<PromptOptions> {
        self.prompts.lock().clone()
    }

    pub fn invocations(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn stream_query(&self, options: PromptOptions) -> DomainResult<EventStream> {
        let response = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        if let Some(hook) = &self.on_invoke {
            hook(&options);
        }
        self.prompts.lock().push(options);

        match response {
            ScriptedResponse::Events(events) => Ok(stream::iter(events).boxed()),
            ScriptedResponse::Fail(message) => Err(DomainError::Backend(message)),
            ScriptedResponse::Hang(events) => {
                Ok(stream::iter(events).chain(stream::pending()).boxed())
            }
        }
    }
}
