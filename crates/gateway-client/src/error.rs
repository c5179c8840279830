//! Error types for the gateway client.

use serde::Deserialize;
use thiserror::Error;

/// Result type for gateway client operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors produced by backend configuration, completion calls and the registry.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Invalid or missing backend settings.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue.
        message: String,
    },

    /// The caller's cancellation fired while waiting for an admission slot.
    #[error("Cancelled while waiting for an admission slot on backend '{backend}'")]
    AdmissionCancelled {
        /// Backend whose gate was being waited on.
        backend: String,
    },

    /// The caller's cancellation fired while a request was in flight.
    #[error("Request to backend '{backend}' was cancelled")]
    Cancelled {
        /// Backend the request was sent to.
        backend: String,
    },

    /// Connection or body transfer failure.
    #[error("Transport error: {message}")]
    Transport {
        /// Error message from the HTTP layer.
        message: String,
    },

    /// The backend did not answer within the configured timeout.
    #[error("Request timed out after {duration_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        duration_ms: u64,
    },

    /// The backend answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the backend, or a generic description.
        message: String,
        /// Error type reported by the backend.
        error_type: Option<String>,
        /// Request parameter the backend complained about.
        param: Option<String>,
        /// Opaque error code reported by the backend.
        code: Option<String>,
    },

    /// The backend answered with a body that could not be decoded.
    #[error("Failed to decode response: {message}")]
    Decode {
        /// Error message describing the decode failure.
        message: String,
    },

    /// A client is already registered under this name.
    #[error("Client with key '{name}' already exists")]
    DuplicateKey {
        /// The conflicting registry key.
        name: String,
    },

    /// No client is registered under this name.
    #[error("No client found for key '{name}'")]
    NotFound {
        /// The missing registry key.
        name: String,
    },

    /// Internal client error.
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error.
        message: String,
    },
}

impl GatewayError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an admission-cancelled error.
    pub fn admission_cancelled(backend: impl Into<String>) -> Self {
        Self::AdmissionCancelled {
            backend: backend.into(),
        }
    }

    /// Create a cancelled error.
    pub fn cancelled(backend: impl Into<String>) -> Self {
        Self::Cancelled {
            backend: backend.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create an API error with only a status and message.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            error_type: None,
            param: None,
            code: None,
        }
    }

    /// Build an API error from a non-success status and its raw body.
    ///
    /// Structured error bodies contribute their message, type, param and code;
    /// anything else falls back to the body text or the bare status.
    pub fn from_error_body(status: u16, body: &[u8]) -> Self {
        if let Ok(response) = serde_json::from_slice::<ApiErrorResponse>(body) {
            let detail = response.error;
            return Self::Api {
                status,
                message: detail.message,
                error_type: detail.error_type,
                param: detail.param,
                code: detail.code.map(|code| match code {
                    serde_json::Value::String(code) => code,
                    other => other.to_string(),
                }),
            };
        }

        let text = String::from_utf8_lossy(body).trim().to_string();
        let message = if text.is_empty() {
            format!("unexpected status code: {status}")
        } else {
            text
        };
        Self::api(status, message)
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a duplicate-key error.
    pub fn duplicate_key(name: impl Into<String>) -> Self {
        Self::DuplicateKey { name: name.into() }
    }

    /// Create a not-found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if the synchronous path should spend another attempt on this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::Api { .. } | Self::Decode { .. }
        )
    }

    /// Check if the error came from a cancellation signal.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::AdmissionCancelled { .. } | Self::Cancelled { .. })
    }

    /// Get the HTTP status code if available.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Error body returned by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorDetail,
}

/// Detailed error information from the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    /// Human-readable error message.
    pub message: String,
    /// Error type.
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    /// Parameter that caused the error.
    #[serde(default)]
    pub param: Option<String>,
    /// Opaque error code; backends send strings, numbers or null.
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}
