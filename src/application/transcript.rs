//! Draining an LLM event stream into a final answer.

use futures::StreamExt;

use crate::domain::models::{MessageKind, StreamEvent};
use crate::domain::ports::EventStream;

/// What a finished stream produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Transcript {
    /// Terminal result, else the last assistant message
    pub text: String,
    pub tool_uses: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Consume `stream` to its end. Every event is shown to `observe` first. The
/// first error event stops consumption and is returned as `Err`.
pub(crate) async fn drain<F>(mut stream: EventStream, mut observe: F) -> Result<Transcript, String>
where
    F: FnMut(&StreamEvent),
{
    let mut transcript = Transcript::default();
    let mut result: Option<String> = None;
    let mut last_text: Option<String> = None;

    while let Some(event) = stream.next().await {
        observe(&event);
        match event {
            StreamEvent::Message {
                kind: MessageKind::Result,
                content,
            } => result = Some(content),
            StreamEvent::Message {
                kind: MessageKind::Assistant,
                content,
            } => last_text = Some(content),
            StreamEvent::ToolUse { .. } => transcript.tool_uses += 1,
            StreamEvent::ToolResult { .. } => {}
            StreamEvent::Usage {
                input_tokens,
                output_tokens,
            } => {
                transcript.input_tokens += input_tokens;
                transcript.output_tokens += output_tokens;
            }
            StreamEvent::Error { message } => return Err(message),
        }
    }

    transcript.text = result
        .filter(|r| !r.trim().is_empty())
        .or(last_text)
        .unwrap_or_default();
    Ok(transcript)
}
