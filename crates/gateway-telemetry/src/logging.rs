//! Structured logging setup.
//!
//! Installs a global `tracing` subscriber that writes either human-readable
//! or JSON lines to stdout or to an append-mode log file. `RUST_LOG` takes
//! precedence over the configured level.

use serde::Deserialize;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, Subscriber};
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Level or filter directive, e.g. `info` or `gateway_client=debug`
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format
    #[serde(default)]
    pub format: LogFormat,
    /// Append logs to this file instead of stdout
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Service name recorded at startup
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "completion-gateway".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            file: None,
            service_name: default_service_name(),
        }
    }
}

impl LoggingConfig {
    /// Set the log level
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Set the output format
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Write to a file instead of stdout
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

/// Initialize the global subscriber.
///
/// # Errors
/// Returns error if the level is not a valid filter, the log file cannot be
/// opened, or a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(&config.level)?;

    let (writer, ansi) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| TelemetryError::LogFile {
                    path: path.display().to_string(),
                    source: e,
                })?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer(config.format, writer, ansi))
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))?;

    info!(
        service = %config.service_name,
        level = %config.level,
        format = ?config.format,
        "Logging initialized"
    );

    Ok(())
}

fn build_filter(level: &str) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|e| TelemetryError::InvalidLevel {
            level: level.to_string(),
            message: e.to_string(),
        }),
    }
}

fn fmt_layer<S>(
    format: LogFormat,
    writer: BoxMakeWriter,
    ansi: bool,
) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true);

    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.boxed(),
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to install the subscriber
    #[error("Failed to initialize logging: {0}")]
    Init(String),

    /// Level is not a valid filter directive
    #[error("Invalid log level '{level}': {message}")]
    InvalidLevel {
        /// The rejected level
        level: String,
        /// Parser message
        message: String,
    },

    /// Log file could not be opened
    #[error("Failed to open log file '{path}': {source}")]
    LogFile {
        /// Path of the log file
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}
