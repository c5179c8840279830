//! Completion client for one backend.

use crate::admission::{AdmissionGate, AdmissionPermit};
use crate::config::BackendConfig;
use crate::error::{GatewayError, Result};
use crate::request::CompletionRequest;
use crate::response::CompletionResponse;
use crate::streaming::{decode_fragments, FragmentStream};
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

/// Header carrying the organization ID.
pub const ORGANIZATION_HEADER: &str = "llm-organization";

/// Client for one OpenAI-compatible backend.
///
/// Every call first takes a slot from the backend's admission gate, so at most
/// `max_concurrent_calls` requests are in flight at once.
///
/// # Example
///
/// ```rust,no_run
/// use gateway_client::{BackendConfig, CompletionRequest, GatewayClient};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), gateway_client::GatewayError> {
/// let config = BackendConfig::new()
///     .with_api_key("sk-...")
///     .merge_with_defaults();
/// let client = GatewayClient::new("default", config)?;
///
/// let request = CompletionRequest::builder()
///     .system_message("You are a helpful assistant.")
///     .user_message("Hello!")
///     .build()?;
///
/// let response = client.complete(&request, &CancellationToken::new()).await?;
/// println!("{}", response.content());
/// # Ok(())
/// # }
/// ```
pub struct GatewayClient {
    /// Registry key of this backend
    name: String,
    http: reqwest::Client,
    config: Arc<BackendConfig>,
    endpoint: Url,
    gate: AdmissionGate,
}

impl GatewayClient {
    /// Create a client from a validated configuration.
    ///
    /// # Errors
    /// Returns [`GatewayError::Config`] if the configuration is invalid.
    pub fn new(name: impl Into<String>, config: BackendConfig) -> Result<Self> {
        config.validate()?;
        let name = name.into();

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(default_headers(&config)?)
            .build()
            .map_err(|e| GatewayError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint: config.completions_url()?,
            gate: AdmissionGate::new(name.clone(), config.max_concurrent_calls()),
            name,
            http,
            config: Arc::new(config),
        })
    }

    /// Get the backend name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the client configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Get the chat completions endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Number of calls currently holding an admission slot.
    pub fn in_flight(&self) -> usize {
        self.gate.in_flight()
    }

    /// Number of free admission slots.
    pub fn available_slots(&self) -> usize {
        self.gate.available()
    }

    /// Send a chat completion request and wait for the full response.
    ///
    /// The body is serialized once and replayed byte-for-byte on each of up to
    /// `max_retries + 1` attempts. Transport failures, timeouts, non-success
    /// statuses and undecodable bodies all count as failed attempts; the last
    /// one is returned once the attempts run out.
    ///
    /// # Errors
    /// [`GatewayError::AdmissionCancelled`] if `cancel` fires before a slot is
    /// free, [`GatewayError::Cancelled`] if it fires during an attempt, a
    /// non-retryable error as soon as it occurs, or the error of the final
    /// attempt.
    #[instrument(skip(self, request, cancel), fields(backend = %self.name))]
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse> {
        let _permit = self.gate.acquire(cancel).await?;

        let request = self.prepare(request, false);
        let body = Bytes::from(
            serde_json::to_vec(&request)
                .map_err(|e| GatewayError::internal(format!("Failed to serialize request: {e}")))?,
        );

        let max_attempts = self.config.max_retries().saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            debug!(attempt, max_attempts, "Sending chat completion request");

            let result = tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!(attempt, "Chat completion cancelled");
                    return Err(GatewayError::cancelled(&self.name));
                }
                result = self.attempt(body.clone()) => result,
            };

            match result {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(attempt, "Retry succeeded");
                    }
                    return Ok(response);
                }
                Err(error) if error.is_retryable() => {
                    warn!(
                        attempt,
                        max_attempts,
                        error = %error,
                        "Chat completion attempt failed"
                    );
                    last_error = Some(error);
                }
                Err(error) => {
                    warn!(attempt, error = %error, "Chat completion failed without retry");
                    return Err(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| GatewayError::internal("no attempt was made")))
    }

    /// Send a streaming chat completion request.
    ///
    /// The request is sent once and never retried. The returned stream holds
    /// the admission slot until it finishes, fails, is cancelled through
    /// `cancel`, or is dropped.
    ///
    /// # Errors
    /// [`GatewayError::AdmissionCancelled`] if `cancel` fires before a slot is
    /// free, [`GatewayError::Cancelled`] if it fires while the request is
    /// sent, or the transport/status error of the single request.
    #[instrument(skip(self, request, cancel), fields(backend = %self.name))]
    pub async fn stream(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<FragmentStream> {
        let permit = self.gate.acquire(cancel).await?;
        let request = self.prepare(request, true);

        debug!("Sending streaming chat completion request");

        let send = self.http.post(self.endpoint.clone()).json(&request).send();
        let response = tokio::select! {
            biased;

            () = cancel.cancelled() => return Err(GatewayError::cancelled(&self.name)),
            response = send => response.map_err(|e| map_reqwest_error(&e, self.config.timeout()))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;

                () = cancel.cancelled() => return Err(GatewayError::cancelled(&self.name)),
                body = response.bytes() => body.unwrap_or_else(|e| {
                    warn!(
                        status = status.as_u16(),
                        error = %map_reqwest_error(&e, self.config.timeout()),
                        "Failed to read error response body"
                    );
                    Bytes::new()
                }),
            };
            drop(permit);
            let error = GatewayError::from_error_body(status.as_u16(), &body);
            warn!(error = %error, "Streaming chat completion rejected");
            return Err(error);
        }

        let timeout = self.config.timeout();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| map_reqwest_error(&e, timeout)));

        Ok(FragmentStream::new(guarded_fragments(
            decode_fragments(body),
            permit,
            cancel.clone(),
            self.name.clone(),
        )))
    }

    /// Run one attempt with an already serialized body.
    async fn attempt(&self, body: Bytes) -> Result<CompletionResponse> {
        let timeout = self.config.timeout();

        let response = self
            .http
            .post(self.endpoint.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e, timeout))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(&e, timeout))?;

        if !status.is_success() {
            return Err(GatewayError::from_error_body(status.as_u16(), &bytes));
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::decode(format!("Failed to parse response: {e}")))
    }

    /// Copy the caller's request, filling the default model and stream flag.
    fn prepare(&self, request: &CompletionRequest, stream: bool) -> CompletionRequest {
        let mut request = request.clone();
        if request.model.as_deref().map_or(true, str::is_empty) {
            request.model = Some(self.config.model().to_string());
        }
        if stream {
            request.stream = Some(true);
        }
        request
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint.as_str())
            .field("max_concurrent_calls", &self.gate.capacity())
            .finish()
    }
}

/// Yield decoded fragments while holding the admission slot.
///
/// The permit lives inside the generator, so it is released exactly once: when
/// the fragments end, after the first error, on cancellation, or when the
/// consumer drops the stream.
fn guarded_fragments<S>(
    fragments: S,
    permit: AdmissionPermit,
    cancel: CancellationToken,
    backend: String,
) -> impl futures::Stream<Item = Result<crate::StreamFragment>> + Send
where
    S: futures::Stream<Item = Result<crate::StreamFragment>> + Send + 'static,
{
    async_stream::stream! {
        let _permit = permit;
        let mut fragments = std::pin::pin!(fragments);
        let mut count = 0usize;

        loop {
            let next = tokio::select! {
                biased;

                () = cancel.cancelled() => Err(()),
                next = fragments.next() => Ok(next),
            };

            match next {
                Ok(Some(Ok(fragment))) => {
                    count += 1;
                    yield Ok(fragment);
                }
                Ok(Some(Err(e))) => {
                    warn!(backend = %backend, error = %e, "Stream ended with error");
                    yield Err(e);
                    break;
                }
                Ok(None) => break,
                Err(()) => {
                    debug!(backend = %backend, "Stream cancelled");
                    yield Err(GatewayError::cancelled(&backend));
                    break;
                }
            }
        }

        debug!(backend = %backend, fragments = count, "Stream finished");
    }
}

fn default_headers(config: &BackendConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let api_key = config.api_key_value().unwrap_or_default();
    let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|e| GatewayError::config(format!("Invalid API key: {e}")))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);

    if let Some(org_id) = config.org_id() {
        headers.insert(
            HeaderName::from_static(ORGANIZATION_HEADER),
            HeaderValue::from_str(org_id)
                .map_err(|e| GatewayError::config(format!("Invalid organization ID: {e}")))?,
        );
    }

    Ok(headers)
}

/// Map a reqwest error to a gateway error.
fn map_reqwest_error(error: &reqwest::Error, timeout: Duration) -> GatewayError {
    if error.is_timeout() {
        GatewayError::timeout(timeout.as_millis() as u64)
    } else if error.is_decode() {
        GatewayError::decode(error.to_string())
    } else {
        GatewayError::transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Message;

    fn config() -> BackendConfig {
        BackendConfig::new()
            .with_api_key("sk-test")
            .with_model("gpt-test")
            .merge_with_defaults()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = GatewayClient::new("bad", BackendConfig::new()).unwrap_err();
        assert!(matches!(err, GatewayError::Config { .. }));
    }

    #[test]
    fn test_client_exposes_gate_state() {
        let client = GatewayClient::new("default", config().with_max_concurrent_calls(4)).unwrap();
        assert_eq!(client.name(), "default");
        assert_eq!(client.in_flight(), 0);
        assert_eq!(client.available_slots(), 4);
        assert_eq!(
            client.endpoint().as_str(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_prepare_fills_default_model() {
        let client = GatewayClient::new("default", config()).unwrap();
        let request = CompletionRequest::new(vec![Message::user("hi")]);

        let prepared = client.prepare(&request, false);
        assert_eq!(prepared.model.as_deref(), Some("gpt-test"));
        assert_eq!(prepared.stream, None);
        // The caller's request is left untouched
        assert!(request.model.is_none());
    }

    #[test]
    fn test_prepare_keeps_explicit_model_and_sets_stream() {
        let client = GatewayClient::new("default", config()).unwrap();
        let mut request = CompletionRequest::new(vec![Message::user("hi")]);
        request.model = Some("qwen-max".to_string());

        let prepared = client.prepare(&request, true);
        assert_eq!(prepared.model.as_deref(), Some("qwen-max"));
        assert!(prepared.is_stream());
    }

    #[test]
    fn test_default_headers() {
        let headers = default_headers(&config()).unwrap();
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers[AUTHORIZATION], "Bearer sk-test");
        assert!(headers.get(ORGANIZATION_HEADER).is_none());

        let headers = default_headers(&config().with_org_id("org-42")).unwrap();
        assert_eq!(headers[ORGANIZATION_HEADER], "org-42");
    }

    #[test]
    fn test_debug_hides_api_key() {
        let client = GatewayClient::new("default", config()).unwrap();
        assert!(!format!("{client:?}").contains("sk-test"));
    }
}
