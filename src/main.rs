//! # Completion Gateway
//!
//! Sends one chat completion through a named backend of the configured
//! OpenAI-compatible gateway and prints the answer.
//!
//! ## Usage
//!
//! ```bash
//! # Ask the default backend
//! completion-gateway "What is the capital of France?"
//!
//! # Stream from another backend with a custom config file
//! completion-gateway --config /path/to/config.yaml --backend qwen --stream "Tell me a story"
//!
//! # Config file from the environment
//! CONFIG_FILE=gateway.toml completion-gateway "Hello"
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use gateway_client::{
    init_with_config, ClientRegistry, CompletionRequest, GatewayClient, DEFAULT_CLIENT_KEY,
};
use gateway_config::{ConfigLoader, DEFAULT_CONFIG_FILE};
use gateway_telemetry::init_logging;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Completion Gateway - bounded-concurrency client for OpenAI-compatible backends
#[derive(Parser, Debug)]
#[command(name = "completion-gateway")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (.yaml, .yml or .toml)
    #[arg(short, long, env = "CONFIG_FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Backend to send the request to
    #[arg(short, long, default_value = DEFAULT_CLIENT_KEY)]
    backend: String,

    /// Print the answer as it is generated
    #[arg(short, long)]
    stream: bool,

    /// System prompt
    #[arg(long)]
    system: Option<String>,

    /// Model overriding the backend default
    #[arg(short, long)]
    model: Option<String>,

    /// Sampling temperature (0.0 to 2.0)
    #[arg(short, long)]
    temperature: Option<f32>,

    /// Maximum tokens to generate
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Prompt text
    #[arg(required = true)]
    prompt: Vec<String>,
}

#[tokio::main]
async fn main() {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!(error = %e, "Completion failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ConfigLoader::new()
        .with_file(&cli.config)
        .load()
        .await
        .context("failed to load configuration")?;

    init_logging(&config.logging).context("failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        name = %config.name,
        config = %cli.config.display(),
        "Starting completion gateway"
    );

    // Owned here and passed by reference; there is no global registry
    let registry = ClientRegistry::new();
    init_with_config(&registry, &config.llm).context("failed to initialize backend clients")?;

    let client = must_get(&registry, &cli.backend);
    let request = build_request(&cli)?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    if cli.stream {
        stream_completion(&client, &request, &cancel).await
    } else {
        let response = client.complete(&request, &cancel).await?;
        info!(
            id = %response.id,
            model = %response.model,
            total_tokens = ?response.total_tokens(),
            finish_reason = ?response.finish_reason(),
            "Completion received"
        );
        println!("{}", response.content());
        Ok(())
    }
}

/// Resolve a backend that must exist, exiting the process otherwise.
fn must_get(registry: &ClientRegistry, name: &str) -> Arc<GatewayClient> {
    match registry.get(name) {
        Ok(client) => client,
        Err(e) => {
            error!(
                backend = %name,
                available = ?registry.names(),
                error = %e,
                "Required backend is not configured"
            );
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn build_request(cli: &Cli) -> Result<CompletionRequest> {
    let mut builder = CompletionRequest::builder().user_message(cli.prompt.join(" "));

    if let Some(system) = &cli.system {
        builder = builder.system_message(system);
    }
    if let Some(model) = &cli.model {
        builder = builder.model(model);
    }
    if let Some(temperature) = cli.temperature {
        builder = builder.temperature(temperature);
    }
    if let Some(max_tokens) = cli.max_tokens {
        builder = builder.max_tokens(max_tokens);
    }

    builder.build().context("invalid request")
}

async fn stream_completion(
    client: &GatewayClient,
    request: &CompletionRequest,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut stream = client.stream(request, cancel).await?;
    let mut stdout = std::io::stdout();
    let mut fragments = 0usize;

    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        fragments += 1;
        write!(stdout, "{}", fragment.content())?;
        stdout.flush()?;
    }
    writeln!(stdout)?;

    info!(fragments, "Stream completed");
    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!("Interrupt received, cancelling request");
            cancel.cancel();
        }
        Err(e) => error!(error = %e, "Failed to listen for interrupt"),
    }
}
