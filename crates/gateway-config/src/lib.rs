//! # Gateway Config
//!
//! Loads the application configuration of the completion gateway from a
//! YAML or TOML file, then applies environment overrides.
//!
//! ```yaml
//! logging:
//!   level: info
//!   format: pretty
//! llm:
//!   configs:
//!     default:
//!       api_key: sk-...
//!       model: gpt-4o-mini
//!       timeout: 30s
//!       max_concurrent_calls: 10
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod loader;

pub use error::{ConfigError, Result};
pub use loader::{
    api_key_env_var, apply_env_overrides, AppConfig, ConfigFormat, ConfigLoader,
    DEFAULT_CONFIG_FILE, LOG_LEVEL_ENV,
};
