//! # Gateway Telemetry
//!
//! Structured logging for the completion gateway.
//!
//! This crate provides:
//! - A serde-configurable [`LoggingConfig`]
//! - Pretty or JSON output to stdout or a log file
//! - `RUST_LOG` overrides through `EnvFilter`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;

// Re-export main types
pub use logging::{init_logging, LogFormat, LoggingConfig, TelemetryError};
