use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::{Config, PoolPolicyKind};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrent: {0}. Must be at least 1")]
    InvalidMaxConcurrent(usize),

    #[error("Invalid pool cap for {kind}: {value}. A capped pool needs every cap to be at least 1")]
    InvalidPoolCap { kind: &'static str, value: usize },

    #[error("Invalid {0}: must be at least 1")]
    InvalidMaxTurns(&'static str),

    #[error("Main branch cannot be empty")]
    EmptyMainBranch,

    #[error("Worktree directory cannot be empty")]
    EmptyWorktreeDir,

    #[error("Staging retry schedule cannot be empty")]
    EmptyRetrySchedule,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Project-local configuration directory.
pub const CONFIG_DIR: &str = ".conclave";

/// Environment variable prefix; nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "CONCLAVE_";

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .conclave/config.yaml (project config)
    /// 3. .conclave/local.yaml (local overrides, optional)
    /// 4. Environment variables (CONCLAVE_* prefix)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(CONFIG_DIR)
    }

    /// Same as [`load`](Self::load) with the configuration directory given
    /// explicitly.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let dir = dir.as_ref();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.queue.max_concurrent == 0 {
            return Err(ConfigError::InvalidMaxConcurrent(config.queue.max_concurrent));
        }

        let pool = &config.pool;
        if pool.policy == PoolPolicyKind::Capped {
            for (kind, value) in [
                ("task", pool.max_task_agents),
                ("merge", pool.max_merge_agents),
                ("qa", pool.max_qa_agents),
            ] {
                if value == 0 {
                    return Err(ConfigError::InvalidPoolCap { kind, value });
                }
            }
        }
        if pool.event_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "pool.event_capacity must be greater than 0".to_string(),
            ));
        }

        let agents = &config.agents;
        for (name, turns) in [
            ("dev_max_turns", agents.dev_max_turns),
            ("qa_max_turns", agents.qa_max_turns),
            ("merge_max_turns", agents.merge_max_turns),
        ] {
            if turns == 0 {
                return Err(ConfigError::InvalidMaxTurns(name));
            }
        }

        if config.git.main_branch.trim().is_empty() {
            return Err(ConfigError::EmptyMainBranch);
        }
        if config.git.worktree_dir.trim().is_empty() {
            return Err(ConfigError::EmptyWorktreeDir);
        }
        if config.git.feature_branch_prefix == config.git.task_branch_prefix {
            return Err(ConfigError::ValidationFailed(
                "feature and task branch prefixes must differ".to_string(),
            ));
        }

        if config.staging_retry.delays_ms.is_empty() {
            return Err(ConfigError::EmptyRetrySchedule);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::BackendKind;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.queue.max_concurrent, 3);
        assert_eq!(config.pool.policy, PoolPolicyKind::Unlimited);
        assert!(config.agents.auto_execute);
        assert_eq!(config.git.main_branch, "main");
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
queue:
  max_concurrent: 5
pool:
  policy: capped
  max_task_agents: 2
agents:
  auto_execute: false
  model: sonnet
git:
  main_branch: trunk
backend:
  kind: mock
staging_retry:
  delays_ms: [10, 20]
logging:
  level: debug
  format: json
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.queue.max_concurrent, 5);
        assert_eq!(config.pool.policy, PoolPolicyKind::Capped);
        assert_eq!(config.pool.max_task_agents, 2);
        assert_eq!(config.pool.max_merge_agents, 1);
        assert!(!config.agents.auto_execute);
        assert_eq!(config.agents.model.as_deref(), Some("sonnet"));
        assert_eq!(config.git.main_branch, "trunk");
        assert_eq!(config.git.task_branch_prefix, "task/");
        assert_eq!(config.backend.kind, BackendKind::Mock);
        assert_eq!(config.staging_retry.delays_ms, vec![10, 20]);
        assert_eq!(config.logging.format, "json");

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = Config::default();
        config.queue.max_concurrent = 0;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxConcurrent(0))
        ));
    }

    #[test]
    fn test_validate_zero_cap_only_when_capped() {
        let mut config = Config::default();
        config.pool.max_merge_agents = 0;
        assert!(ConfigLoader::validate(&config).is_ok());

        config.pool.policy = PoolPolicyKind::Capped;
        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidPoolCap { kind, value }) => {
                assert_eq!(kind, "merge");
                assert_eq!(value, 0);
            }
            other => panic!("Expected InvalidPoolCap, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_event_capacity() {
        let mut config = Config::default();
        assert_eq!(config.pool.event_capacity, 256);
        config.pool.event_capacity = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ValidationFailed(msg)) if msg.contains("event_capacity")
        ));
    }

    #[test]
    fn test_validate_git_settings() {
        let mut config = Config::default();
        config.git.main_branch = "  ".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyMainBranch)
        ));

        let mut config = Config::default();
        config.git.task_branch_prefix = config.git.feature_branch_prefix.clone();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_validate_empty_retry_schedule() {
        let mut config = Config::default();
        config.staging_retry.delays_ms.clear();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyRetrySchedule)
        ));
    }

    #[test]
    fn test_validate_invalid_logging() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogLevel(level)) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel, got {other:?}"),
        }

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(_))
        ));

        let mut config = Config::default();
        config.logging.rotation = "weekly".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogRotation(_))
        ));
    }

    #[test]
    fn test_hierarchical_merging() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "queue:\n  max_concurrent: 4\nlogging:\n  level: info\n  format: json\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("local.yaml"), "logging:\n  level: debug\n").unwrap();

        let config = temp_env::with_vars_unset(["CONCLAVE_QUEUE__MAX_CONCURRENT", "CONCLAVE_LOGGING__LEVEL"], || {
            ConfigLoader::load_from_dir(dir.path()).unwrap()
        });

        assert_eq!(config.queue.max_concurrent, 4);
        assert_eq!(config.logging.level, "debug", "Local override should win");
        assert_eq!(config.logging.format, "json", "Base value should persist");
    }

    #[test]
    fn test_env_override() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.yaml"), "queue:\n  max_concurrent: 4\n").unwrap();

        let config = temp_env::with_vars(
            [
                ("CONCLAVE_QUEUE__MAX_CONCURRENT", Some("7")),
                ("CONCLAVE_AGENTS__AUTO_EXECUTE", Some("false")),
            ],
            || ConfigLoader::load_from_dir(dir.path()).unwrap(),
        );

        assert_eq!(config.queue.max_concurrent, 7, "Environment should win");
        assert!(!config.agents.auto_execute);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "queue:\n  max_concurrent: 0").unwrap();
        file.flush().unwrap();

        let err = ConfigLoader::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("max_concurrent"));
    }
}
