//! Claude Code CLI backend.
//!
//! Spawns the CLI in `stream-json` mode and maps its line protocol onto
//! [`StreamEvent`]s. The child process is signalled when the consumer drops
//! the stream and killed when the reader task exits.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::adapters::process::ProcessHandle;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{BackendConfig, PromptOptions, StreamEvent};
use crate::domain::ports::{EventStream, LlmBackend};

const STDERR_TAIL: usize = 2000;

/// Claude Code CLI configuration.
#[derive(Debug, Clone)]
pub struct ClaudeCodeConfig {
    /// Path to claude CLI binary
    pub binary_path: String,
    /// Model used when the prompt does not name one
    pub default_model: Option<String>,
    /// Additional CLI flags
    pub extra_flags: Vec<String>,
}

impl Default for ClaudeCodeConfig {
    fn default() -> Self {
        Self {
            binary_path: "claude".to_string(),
            default_model: None,
            extra_flags: vec![],
        }
    }
}

impl ClaudeCodeConfig {
    pub fn from_config(backend: &BackendConfig, model: Option<String>) -> Self {
        Self {
            binary_path: backend.binary_path.clone(),
            default_model: model,
            extra_flags: backend.extra_flags.clone(),
        }
    }
}

/// Translates `stream-json` lines into events.
///
/// Tool results only carry the id of the tool call they answer, so the
/// parser remembers tool names by id.
#[derive(Debug, Default)]
pub struct StreamJsonParser {
    tool_names: HashMap<String, String>,
    saw_result: bool,
}

impl StreamJsonParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal `result` line has been parsed.
    pub fn saw_result(&self) -> bool {
        self.saw_result
    }

    /// Parse one output line. A line may carry several content blocks and
    /// so yield several events; blank and unrecognised lines yield none.
    pub fn parse_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return vec![];
        }
        let Ok(json) = serde_json::from_str::<Value>(trimmed) else {
            // Plain text from older CLI versions
            return vec![StreamEvent::assistant(trimmed)];
        };

        match json.get("type").and_then(Value::as_str) {
            Some("assistant") => self.parse_assistant(&json),
            Some("user") => self.parse_tool_results(&json),
            Some("result") => self.parse_result(&json),
            Some("error") => {
                let message = json
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .or_else(|| json.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error");
                vec![StreamEvent::error(message)]
            }
            _ => vec![],
        }
    }

    fn content_blocks(json: &Value) -> &[Value] {
        json.get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array)
            .map_or(&[], Vec::as_slice)
    }

    fn parse_assistant(&mut self, json: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for block in Self::content_blocks(json) {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        if !text.is_empty() {
                            events.push(StreamEvent::assistant(text));
                        }
                    }
                }
                Some("tool_use") => {
                    let name = block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string();
                    if let Some(id) = block.get("id").and_then(Value::as_str) {
                        self.tool_names.insert(id.to_string(), name.clone());
                    }
                    let input = block.get("input").cloned().unwrap_or(Value::Null);
                    events.push(StreamEvent::tool_use(name, input));
                }
                _ => {}
            }
        }
        events
    }

    fn parse_tool_results(&mut self, json: &Value) -> Vec<StreamEvent> {
        Self::content_blocks(json)
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_result"))
            .map(|block| {
                let name = block
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .and_then(|id| self.tool_names.remove(id))
                    .unwrap_or_else(|| "unknown".to_string());
                StreamEvent::ToolResult {
                    name,
                    result: flatten_content(block.get("content")),
                }
            })
            .collect()
    }

    fn parse_result(&mut self, json: &Value) -> Vec<StreamEvent> {
        self.saw_result = true;
        let mut events = Vec::new();

        if let Some(usage) = json.get("usage") {
            let input_tokens = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
            let output_tokens = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
            if input_tokens > 0 || output_tokens > 0 {
                events.push(StreamEvent::Usage {
                    input_tokens,
                    output_tokens,
                });
            }
        }

        let is_error = json.get("is_error").and_then(Value::as_bool).unwrap_or(false)
            || json
                .get("subtype")
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with("error"));
        let result = json.get("result").and_then(Value::as_str).unwrap_or_default();

        if is_error {
            let subtype = json.get("subtype").and_then(Value::as_str).unwrap_or("error");
            let message = if result.is_empty() {
                format!("claude run ended with {subtype}")
            } else {
                result.to_string()
            };
            events.push(StreamEvent::error(message));
        } else {
            events.push(StreamEvent::result(result));
        }
        events
    }
}

/// Tool result content is either a string or a list of text blocks.
fn flatten_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Backend that shells out to the Claude Code CLI.
pub struct ClaudeCodeBackend {
    config: ClaudeCodeConfig,
}

impl ClaudeCodeBackend {
    pub fn new(config: ClaudeCodeConfig) -> Self {
        Self { config }
    }

    /// Build CLI arguments for a prompt.
    pub fn build_args(&self, options: &PromptOptions) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--max-turns".to_string(),
            options.max_turns.to_string(),
        ];

        if let Some(model) = options.model.as_ref().or(self.config.default_model.as_ref()) {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        if let Some(system_prompt) = options.system_prompt.as_ref().filter(|s| !s.is_empty()) {
            args.push("--system-prompt".to_string());
            args.push(system_prompt.clone());
        }

        args.push("--allowedTools".to_string());
        args.push(options.tool_profile.allowed_tools().join(","));

        args.extend(self.config.extra_flags.iter().cloned());

        args.push("-p".to_string());
        args.push(options.prompt.clone());
        args
    }
}

#[async_trait]
impl LlmBackend for ClaudeCodeBackend {
    fn name(&self) -> &'static str {
        "claude_code"
    }

    #[instrument(skip(self, options), fields(working_dir = ?options.working_dir))]
    async fn stream_query(&self, options: PromptOptions) -> DomainResult<EventStream> {
        let args = self.build_args(&options);

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &options.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| DomainError::Backend(format!("Failed to spawn claude: {e}")))?;
        let handle = child.id().map(ProcessHandle::new);
        debug!(pid = ?handle.map(|h| h.pid()), "Spawned claude process");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DomainError::Backend("Failed to capture stdout".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| DomainError::Backend("Failed to capture stderr".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let (tx, rx) = mpsc::channel::<StreamEvent>(64);

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut parser = StreamJsonParser::new();

            loop {
                tokio::select! {
                    () = tx.closed() => {
                        debug!("Stream dropped, terminating claude process");
                        if let Some(handle) = handle {
                            if let Err(e) = handle.terminate() {
                                warn!(error = %e, "Failed to signal claude process");
                            }
                        }
                        stderr_task.abort();
                        return;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            for event in parser.parse_line(&line) {
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = tx.send(StreamEvent::error(format!("Failed to read claude output: {e}"))).await;
                            return;
                        }
                    },
                }
            }

            let status = child.wait().await;
            let stderr_text = stderr_task.await.unwrap_or_default();
            match status {
                Ok(status) if !status.success() && !parser.saw_result() => {
                    let tail: String = stderr_text
                        .chars()
                        .rev()
                        .take(STDERR_TAIL)
                        .collect::<Vec<_>>()
                        .into_iter()
                        .rev()
                        .collect();
                    let _ = tx
                        .send(StreamEvent::error(format!(
                            "claude exited with {status}: {}",
                            tail.trim()
                        )))
                        .await;
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = tx.send(StreamEvent::error(format!("Failed to wait for claude: {e}"))).await;
                }
            }
        });

        Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) }).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{MessageKind, ToolProfile};

    #[test]
    fn test_build_args() {
        let backend = ClaudeCodeBackend::new(ClaudeCodeConfig {
            default_model: Some("sonnet".into()),
            extra_flags: vec!["--dangerously-skip-permissions".into()],
            ..Default::default()
        });
        let args = backend.build_args(
            &PromptOptions::new("fix it")
                .with_system_prompt("be brief")
                .with_tool_profile(ToolProfile::Edit)
                .with_max_turns(7),
        );

        assert_eq!(&args[..3], &["--print", "--output-format", "stream-json"]);
        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("--max-turns") + 1], "7");
        assert_eq!(args[pos("--model") + 1], "sonnet");
        assert_eq!(args[pos("--system-prompt") + 1], "be brief");
        assert!(args[pos("--allowedTools") + 1].contains("Edit"));
        assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
        assert_eq!(&args[args.len() - 2..], &["-p", "fix it"]);
    }

    #[test]
    fn test_prompt_model_overrides_default() {
        let backend = ClaudeCodeBackend::new(ClaudeCodeConfig {
            default_model: Some("sonnet".into()),
            ..Default::default()
        });
        let args = backend.build_args(&PromptOptions::new("x").with_model(Some("opus".into())));
        let pos = args.iter().position(|a| a == "--model").unwrap();
        assert_eq!(args[pos + 1], "opus");
    }

    #[test]
    fn test_parse_assistant_blocks() {
        let mut parser = StreamJsonParser::new();
        let line = r#"{"type":"assistant","message":{"content":[
            {"type":"text","text":"Looking"},
            {"type":"tool_use","id":"tu_1","name":"Read","input":{"file_path":"a.rs"}}
        ]}}"#
            .replace('\n', "");
        let events = parser.parse_line(&line);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::assistant("Looking"));
        match &events[1] {
            StreamEvent::ToolUse { name, input } => {
                assert_eq!(name, "Read");
                assert_eq!(input["file_path"], "a.rs");
            }
            other => panic!("unexpected {other:?}"),
        }

        let result = parser.parse_line(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"tu_1","content":[{"type":"text","text":"fn main() {}"}]}]}}"#,
        );
        assert_eq!(
            result,
            vec![StreamEvent::ToolResult {
                name: "Read".into(),
                result: "fn main() {}".into()
            }]
        );
    }

    #[test]
    fn test_parse_result_with_usage() {
        let mut parser = StreamJsonParser::new();
        let events = parser.parse_line(
            r#"{"type":"result","subtype":"success","is_error":false,"result":"All done","usage":{"input_tokens":12,"output_tokens":34}}"#,
        );
        assert!(parser.saw_result());
        assert_eq!(
            events,
            vec![
                StreamEvent::Usage {
                    input_tokens: 12,
                    output_tokens: 34
                },
                StreamEvent::Message {
                    kind: MessageKind::Result,
                    content: "All done".into()
                },
            ]
        );
    }

    #[test]
    fn test_parse_error_result() {
        let mut parser = StreamJsonParser::new();
        let events = parser.parse_line(r#"{"type":"result","subtype":"error_max_turns","is_error":true}"#);
        assert_eq!(events, vec![StreamEvent::error("claude run ended with error_max_turns")]);
    }

    #[test]
    fn test_parse_ignores_system_and_blank_lines() {
        let mut parser = StreamJsonParser::new();
        assert!(parser.parse_line(r#"{"type":"system","subtype":"init"}"#).is_empty());
        assert!(parser.parse_line("   ").is_empty());
        assert_eq!(parser.parse_line("plain"), vec![StreamEvent::assistant("plain")]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_backend_error() {
        let backend = ClaudeCodeBackend::new(ClaudeCodeConfig {
            binary_path: "/nonexistent/claude-binary".into(),
            ..Default::default()
        });
        let err = backend.stream_query(PromptOptions::new("x")).await.err().unwrap();
        assert!(matches!(err, DomainError::Backend(_)));
    }
}
