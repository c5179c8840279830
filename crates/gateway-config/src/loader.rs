//! Application configuration and file loading.

use crate::error::{ConfigError, Result};
use gateway_client::LlmConfig;
use gateway_telemetry::LoggingConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable overriding the log level.
pub const LOG_LEVEL_ENV: &str = "GATEWAY_LOG_LEVEL";

/// Default configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Application name.
    #[serde(default = "default_name")]
    pub name: String,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Backends keyed by registry name.
    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_name() -> String {
    "completion-gateway".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            logging: LoggingConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

/// Supported file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML (`.yaml`, `.yml`)
    Yaml,
    /// TOML (`.toml`)
    Toml,
}

impl ConfigFormat {
    /// Detect the format from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    /// Parse `contents` in this format.
    pub fn parse(self, path: &Path, contents: &str) -> Result<AppConfig> {
        match self {
            Self::Yaml => {
                serde_yaml::from_str(contents).map_err(|e| ConfigError::parse(path, e.to_string()))
            }
            Self::Toml => {
                toml::from_str(contents).map_err(|e| ConfigError::parse(path, e.to_string()))
            }
        }
    }
}

/// Loads [`AppConfig`] from a file and the environment.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: PathBuf,
    env_overrides: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_CONFIG_FILE),
            env_overrides: true,
        }
    }
}

impl ConfigLoader {
    /// Create a loader reading [`DEFAULT_CONFIG_FILE`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from `path` instead.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = path.into();
        self
    }

    /// Skip environment overrides.
    #[must_use]
    pub fn without_env_overrides(mut self) -> Self {
        self.env_overrides = false;
        self
    }

    /// Get the file this loader reads.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Read, parse and apply environment overrides.
    pub async fn load(&self) -> Result<AppConfig> {
        let format =
            ConfigFormat::from_path(&self.file).ok_or_else(|| ConfigError::UnsupportedFormat {
                path: self.file.clone(),
            })?;

        let contents =
            tokio::fs::read_to_string(&self.file)
                .await
                .map_err(|e| ConfigError::Read {
                    path: self.file.clone(),
                    source: e,
                })?;

        let mut config = format.parse(&self.file, &contents)?;
        debug!(
            path = %self.file.display(),
            backends = config.llm.configs.len(),
            "Loaded configuration file"
        );

        if self.env_overrides {
            apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        }

        Ok(config)
    }
}

/// Environment variable holding the API key for backend `key`,
/// e.g. `LLM_DEFAULT_API_KEY` for `default`.
pub fn api_key_env_var(key: &str) -> String {
    let key: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("LLM_{key}_API_KEY")
}

/// Apply environment overrides using `lookup` to read variables.
///
/// `GATEWAY_LOG_LEVEL` replaces the log level. A backend without an API key
/// takes it from its [`api_key_env_var`]; keys set in the file win.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(level) = lookup(LOG_LEVEL_ENV).filter(|l| !l.is_empty()) {
        debug!(level = %level, "Log level overridden from environment");
        config.logging.level = level;
    }

    for (key, backend) in &mut config.llm.configs {
        if backend.has_api_key() {
            continue;
        }
        let var = api_key_env_var(key);
        if let Some(api_key) = lookup(&var).filter(|k| !k.is_empty()) {
            debug!(backend = %key, var = %var, "API key read from environment");
            *backend = std::mem::take(backend).with_api_key(api_key);
        }
    }
}
