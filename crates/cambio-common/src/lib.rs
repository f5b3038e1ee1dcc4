//! # Cambio Common
//!
//! Shared plumbing for the Cambio offline converter: logging configuration
//! and the install retry policy owned by embedders.

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::RetryConfig;
