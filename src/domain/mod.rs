//! Domain layer for the Conclave orchestration core
//!
//! Domain models, port traits and the shared error type.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
