//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - `RUST_LOG`-aware level filtering
//! - JSON or pretty stdout output
//! - Optional rolling JSON log files

pub mod config;
pub mod logger;

pub use config::{LogConfig, LogFormat, RotationPolicy};
pub use logger::LoggerImpl;
