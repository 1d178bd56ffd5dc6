//! LLM stream models.
//!
//! Backends translate their own wire format into [`StreamEvent`]s; nothing
//! above the port boundary sees model-specific output.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of a textual message event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Intermediate assistant text
    Assistant,
    /// Final result of the invocation
    Result,
}

/// Event produced by an LLM backend stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Message { kind: MessageKind, content: String },
    ToolUse { name: String, input: serde_json::Value },
    ToolResult { name: String, result: String },
    Error { message: String },
    Usage { input_tokens: u64, output_tokens: u64 },
}

impl StreamEvent {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Message {
            kind: MessageKind::Assistant,
            content: content.into(),
        }
    }

    pub fn result(content: impl Into<String>) -> Self {
        Self::Message {
            kind: MessageKind::Result,
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn tool_use(name: impl Into<String>, input: serde_json::Value) -> Self {
        Self::ToolUse {
            name: name.into(),
            input,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Text carried by a message event, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Message { content, .. } => Some(content),
            _ => None,
        }
    }
}

/// Tool and permission profile granted to an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolProfile {
    /// Inspection only: reviews and conflict analysis
    #[default]
    ReadOnly,
    /// May edit files in its working directory
    Edit,
}

impl ToolProfile {
    pub fn allowed_tools(&self) -> &'static [&'static str] {
        match self {
            Self::ReadOnly => &["Read", "Glob", "Grep", "Bash(git diff:*)", "Bash(git status:*)", "Bash(git log:*)"],
            Self::Edit => &["Read", "Write", "Edit", "MultiEdit", "Glob", "Grep", "Bash"],
        }
    }
}

/// Options for a single LLM invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptOptions {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub tool_profile: ToolProfile,
    pub max_turns: u32,
    pub model: Option<String>,
}

impl PromptOptions {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            working_dir: None,
            tool_profile: ToolProfile::default(),
            max_turns: 25,
            model: None,
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_tool_profile(mut self, profile: ToolProfile) -> Self {
        self.tool_profile = profile;
        self
    }

    #[must_use]
    pub fn with_max_turns(mut self, turns: u32) -> Self {
        self.max_turns = turns;
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}
