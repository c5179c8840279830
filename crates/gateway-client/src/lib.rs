//! # Completion Gateway Client
//!
//! Bounded-concurrency client for OpenAI-compatible chat completion backends.
//!
//! ## Features
//!
//! - Per-backend admission gate capping the number of in-flight calls
//! - Synchronous completions with byte-identical retries
//! - Streaming completions decoded from `data: ` lines
//! - Cancellation through [`CancellationToken`](tokio_util::sync::CancellationToken)
//!   at every blocking point
//! - Named client registry owned by the application
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gateway_client::{init_with_config, BackendConfig, ClientRegistry, CompletionRequest, LlmConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gateway_client::GatewayError> {
//!     let registry = ClientRegistry::new();
//!     let config = LlmConfig::new()
//!         .with_backend("default", BackendConfig::new().with_api_key("sk-..."));
//!     init_with_config(&registry, &config)?;
//!
//!     let client = registry.default_client()?;
//!     let request = CompletionRequest::builder()
//!         .user_message("Hello, world!")
//!         .build()?;
//!
//!     let response = client.complete(&request, &CancellationToken::new()).await?;
//!     println!("Response: {}", response.content());
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use gateway_client::{BackendConfig, CompletionRequest, GatewayClient};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gateway_client::GatewayError> {
//!     let client = GatewayClient::new(
//!         "default",
//!         BackendConfig::new().with_api_key("sk-...").merge_with_defaults(),
//!     )?;
//!
//!     let request = CompletionRequest::builder()
//!         .user_message("Tell me a story")
//!         .build()?;
//!
//!     let mut stream = client.stream(&request, &CancellationToken::new()).await?;
//!     while let Some(fragment) = stream.next().await {
//!         match fragment {
//!             Ok(fragment) => print!("{}", fragment.content()),
//!             Err(e) => eprintln!("Error: {e}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod admission;
mod client;
mod config;
mod error;
mod registry;
mod request;
mod response;
mod streaming;

pub use admission::{AdmissionGate, AdmissionPermit};
pub use client::{GatewayClient, ORGANIZATION_HEADER};
pub use config::{BackendConfig, LlmConfig};
pub use error::{ApiErrorDetail, ApiErrorResponse, GatewayError, Result};
pub use registry::{init_with_config, ClientRegistry, DEFAULT_CLIENT_KEY};
pub use request::{CompletionRequest, CompletionRequestBuilder, Message, MessageRole};
pub use response::{Choice, CompletionResponse, ResponseMessage, Usage};
pub use streaming::{
    decode_fragments, FragmentStream, StreamChoice, StreamDelta, StreamFragment, DATA_PREFIX,
    DONE_MARKER,
};
