//! Configuration error types.

use std::path::PathBuf;

/// Result type for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration loading error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file '{}': {source}", path.display())]
    Read {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file extension does not name a supported format.
    #[error("Unsupported config format for '{}': expected .yaml, .yml or .toml", path.display())]
    UnsupportedFormat {
        /// Path of the file.
        path: PathBuf,
    },

    /// The file contents could not be parsed.
    #[error("Failed to parse config file '{}': {message}", path.display())]
    Parse {
        /// Path of the file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
}

impl ConfigError {
    /// Create a parse error.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}
