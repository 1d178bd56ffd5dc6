//! Infrastructure layer module
//!
//! Process-level concerns that sit outside the orchestration core:
//! - Configuration management
//! - Logging infrastructure

pub mod config;
pub mod logging;

pub use config::{ConfigError, ConfigLoader};
pub use logging::{LogConfig, LoggerImpl};
