//! LLM backend port.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::errors::DomainResult;
use crate::domain::models::{PromptOptions, StreamEvent};

/// Stream of typed events produced by one invocation. Dropping it cancels
/// the invocation.
pub type EventStream = BoxStream<'static, StreamEvent>;

/// Trait for LLM backend implementations.
///
/// Given a prompt and a tool profile, a backend produces a cancellable stream
/// of [`StreamEvent`]s. Failures after the stream is open are reported as
/// `StreamEvent::Error` items rather than as an `Err`.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Start an invocation and return its event stream.
    async fn stream_query(&self, options: PromptOptions) -> DomainResult<EventStream>;
}
