use serde::{Deserialize, Serialize};

/// Main configuration structure for Conclave
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// LLM request dispatcher
    #[serde(default)]
    pub queue: QueueConfig,

    /// Agent spawn policy
    #[serde(default)]
    pub pool: PoolConfig,

    /// Agent state machine behaviour
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Repository and branch layout
    #[serde(default)]
    pub git: GitConfig,

    /// LLM backend selection
    #[serde(default)]
    pub backend: BackendConfig,

    /// Fixed backoff used when staging resolved files
    #[serde(default)]
    pub staging_retry: StagingRetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Request queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QueueConfig {
    /// Maximum simultaneous in-flight LLM requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

const fn default_max_concurrent() -> usize {
    3
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// Spawn policy for non-harness agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPolicyKind {
    #[default]
    Unlimited,
    Capped,
}

/// Agent pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PoolConfig {
    #[serde(default)]
    pub policy: PoolPolicyKind,

    /// Cap on live dev agents (capped policy only)
    #[serde(default = "default_max_task_agents")]
    pub max_task_agents: usize,

    /// Cap on live merge agents (capped policy only)
    #[serde(default = "default_max_merge_agents")]
    pub max_merge_agents: usize,

    /// Cap on live QA agents (capped policy only)
    #[serde(default = "default_max_qa_agents")]
    pub max_qa_agents: usize,

    /// Pool events buffered per subscriber; a slower subscriber skips the
    /// oldest ones
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

const fn default_max_task_agents() -> usize {
    4
}

const fn default_max_merge_agents() -> usize {
    1
}

const fn default_max_qa_agents() -> usize {
    2
}

const fn default_event_capacity() -> usize {
    256
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            policy: PoolPolicyKind::default(),
            max_task_agents: default_max_task_agents(),
            max_merge_agents: default_max_merge_agents(),
            max_qa_agents: default_max_qa_agents(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Agent behaviour configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentsConfig {
    /// Start execution as soon as an intention is approved
    #[serde(default = "default_auto_execute")]
    pub auto_execute: bool,

    #[serde(default = "default_dev_max_turns")]
    pub dev_max_turns: u32,

    #[serde(default = "default_qa_max_turns")]
    pub qa_max_turns: u32,

    #[serde(default = "default_merge_max_turns")]
    pub merge_max_turns: u32,

    /// Model override passed to the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

const fn default_auto_execute() -> bool {
    true
}

const fn default_dev_max_turns() -> u32 {
    50
}

const fn default_qa_max_turns() -> u32 {
    15
}

const fn default_merge_max_turns() -> u32 {
    20
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            auto_execute: default_auto_execute(),
            dev_max_turns: default_dev_max_turns(),
            qa_max_turns: default_qa_max_turns(),
            merge_max_turns: default_merge_max_turns(),
            model: None,
        }
    }
}

/// Git layout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GitConfig {
    /// Repository root
    #[serde(default = "default_repo_path")]
    pub repo_path: String,

    #[serde(default = "default_main_branch")]
    pub main_branch: String,

    /// Directory holding task and feature worktrees, relative to the repo
    #[serde(default = "default_worktree_dir")]
    pub worktree_dir: String,

    #[serde(default = "default_feature_branch_prefix")]
    pub feature_branch_prefix: String,

    #[serde(default = "default_task_branch_prefix")]
    pub task_branch_prefix: String,
}

fn default_repo_path() -> String {
    ".".to_string()
}

fn default_main_branch() -> String {
    "main".to_string()
}

fn default_worktree_dir() -> String {
    ".conclave/worktrees".to_string()
}

fn default_feature_branch_prefix() -> String {
    "feature/".to_string()
}

fn default_task_branch_prefix() -> String {
    "task/".to_string()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            repo_path: default_repo_path(),
            main_branch: default_main_branch(),
            worktree_dir: default_worktree_dir(),
            feature_branch_prefix: default_feature_branch_prefix(),
            task_branch_prefix: default_task_branch_prefix(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    ClaudeCode,
    Mock,
}

/// LLM backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    /// Path to claude CLI executable
    #[serde(default = "default_binary_path")]
    pub binary_path: String,

    /// Extra flags appended to every invocation
    #[serde(default)]
    pub extra_flags: Vec<String>,
}

fn default_binary_path() -> String {
    "claude".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            binary_path: default_binary_path(),
            extra_flags: vec![],
        }
    }
}

/// Staging retry schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StagingRetryConfig {
    /// Delay before each retry, in milliseconds
    #[serde(default = "default_delays_ms")]
    pub delays_ms: Vec<u64>,
}

fn default_delays_ms() -> Vec<u64> {
    vec![100, 250, 500, 1000]
}

impl Default for StagingRetryConfig {
    fn default() -> Self {
        Self {
            delays_ms: default_delays_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
