//! Backend configuration.

use crate::error::{GatewayError, Result};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Settings for one text-generation backend.
///
/// Fields left unset in a configuration file are filled by
/// [`BackendConfig::merge_with_defaults`]; explicitly set values are kept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfig {
    /// API key sent as a bearer token.
    #[serde(default)]
    pub(crate) api_key: Option<Secret<String>>,
    /// Base URL, e.g. `https://api.openai.com/v1`.
    #[serde(default)]
    pub(crate) base_url: String,
    /// Organization sent in the `LLM-Organization` header.
    #[serde(default)]
    pub(crate) org_id: Option<String>,
    /// Per-request timeout.
    #[serde(default, with = "humantime_serde")]
    pub(crate) timeout: Duration,
    /// Retries after the first attempt on the synchronous path.
    #[serde(default)]
    pub(crate) max_retries: Option<u32>,
    /// Model used when a request does not name one.
    #[serde(default)]
    pub(crate) model: String,
    /// Admission ceiling for concurrent calls.
    #[serde(default)]
    pub(crate) max_concurrent_calls: usize,
}

impl BackendConfig {
    /// Default base URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";
    /// Default request timeout (30 seconds).
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    /// Default maximum retries.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "gpt-3.5-turbo";
    /// Default concurrency ceiling.
    pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 10;

    /// Create an empty configuration; every field is unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration holding only the built-in defaults.
    pub fn defaults() -> Self {
        Self {
            api_key: None,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            org_id: None,
            timeout: Self::DEFAULT_TIMEOUT,
            max_retries: Some(Self::DEFAULT_MAX_RETRIES),
            model: Self::DEFAULT_MODEL.to_string(),
            max_concurrent_calls: Self::DEFAULT_MAX_CONCURRENT_CALLS,
        }
    }

    /// Fill every unset field from [`BackendConfig::defaults`].
    #[must_use]
    pub fn merge_with_defaults(mut self) -> Self {
        let defaults = Self::defaults();
        if self.base_url.is_empty() {
            self.base_url = defaults.base_url;
        }
        if self.timeout.is_zero() {
            self.timeout = defaults.timeout;
        }
        if self.max_retries.is_none() {
            self.max_retries = defaults.max_retries;
        }
        if self.model.is_empty() {
            self.model = defaults.model;
        }
        if self.max_concurrent_calls == 0 {
            self.max_concurrent_calls = defaults.max_concurrent_calls;
        }
        self
    }

    /// Check the invariants a client relies on.
    pub fn validate(&self) -> Result<()> {
        if self.api_key_value().map_or(true, str::is_empty) {
            return Err(GatewayError::config("api key is required"));
        }
        if self.base_url.is_empty() {
            return Err(GatewayError::config("base url is required"));
        }
        Url::parse(&self.base_url).map_err(|e| {
            GatewayError::config(format!("invalid base url '{}': {}", self.base_url, e))
        })?;
        if self.timeout.is_zero() {
            return Err(GatewayError::config("timeout must be greater than 0"));
        }
        if self.max_concurrent_calls == 0 {
            return Err(GatewayError::config(
                "max concurrent calls must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Set the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(Secret::new(api_key.into()));
        self
    }

    /// Set the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the organization ID.
    #[must_use]
    pub fn with_org_id(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the default model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the concurrency ceiling.
    #[must_use]
    pub fn with_max_concurrent_calls(mut self, max: usize) -> Self {
        self.max_concurrent_calls = max;
        self
    }

    /// Check if an API key is configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key_value().is_some_and(|key| !key.is_empty())
    }

    /// Get the API key (exposed for use in requests).
    pub(crate) fn api_key_value(&self) -> Option<&str> {
        self.api_key.as_ref().map(|s| s.expose_secret().as_str())
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the organization ID, ignoring an empty value.
    pub fn org_id(&self) -> Option<&str> {
        self.org_id.as_deref().filter(|org| !org.is_empty())
    }

    /// Get the request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the maximum number of retries; unset means the default.
    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(Self::DEFAULT_MAX_RETRIES)
    }

    /// Get the default model.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the concurrency ceiling.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_concurrent_calls
    }

    /// Build the chat completions endpoint below the base URL.
    pub fn completions_url(&self) -> Result<Url> {
        let endpoint = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        Url::parse(&endpoint)
            .map_err(|e| GatewayError::config(format!("invalid endpoint '{endpoint}': {e}")))
    }
}

/// The `llm` configuration section: one backend per logical key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmConfig {
    /// Backends by registry key.
    #[serde(default)]
    pub configs: BTreeMap<String, BackendConfig>,
}

impl LlmConfig {
    /// Create an empty section.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend under `key`.
    #[must_use]
    pub fn with_backend(mut self, key: impl Into<String>, config: BackendConfig) -> Self {
        self.configs.insert(key.into(), config);
        self
    }
}
