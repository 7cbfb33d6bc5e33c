//! # tern-core
//!
//! Shared foundation for the tern workspace: environment-driven configuration
//! with per-field source tracking, and structured logging setup.

pub mod config;
pub mod logging;

pub use config::*;
pub use logging::{init_logging, LoggingConfig, LogFormat};
