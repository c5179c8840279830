//! Named registry of backend clients.

use crate::client::GatewayClient;
use crate::config::{BackendConfig, LlmConfig};
use crate::error::{GatewayError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Key under which the default backend is registered.
pub const DEFAULT_CLIENT_KEY: &str = "default";

/// Thread-safe map from backend name to client.
///
/// Registration never overwrites an existing entry. Clients are shared as
/// [`Arc`]s, so a client removed from the registry stays usable by callers
/// that already hold it.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Arc<GatewayClient>>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a client from `config` and register it under `name`.
    ///
    /// Unset configuration fields take their defaults before the client is
    /// built.
    ///
    /// # Errors
    /// [`GatewayError::DuplicateKey`] if `name` is taken, or
    /// [`GatewayError::Config`] if the merged configuration is invalid.
    pub fn register(&self, name: &str, config: BackendConfig) -> Result<Arc<GatewayClient>> {
        let mut clients = self.clients.write();
        if clients.contains_key(name) {
            return Err(GatewayError::duplicate_key(name));
        }

        let client = Arc::new(GatewayClient::new(name, config.merge_with_defaults())?);
        clients.insert(name.to_string(), Arc::clone(&client));

        info!(
            backend = %name,
            endpoint = %client.endpoint(),
            model = %client.config().model(),
            max_concurrent_calls = client.config().max_concurrent_calls(),
            "Registered backend client"
        );

        Ok(client)
    }

    /// Get a client by name.
    ///
    /// # Errors
    /// [`GatewayError::NotFound`] if nothing is registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<GatewayClient>> {
        self.clients
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::not_found(name))
    }

    /// Get the client registered under [`DEFAULT_CLIENT_KEY`].
    pub fn default_client(&self) -> Result<Arc<GatewayClient>> {
        self.get(DEFAULT_CLIENT_KEY)
    }

    /// Remove a client by name.
    ///
    /// # Errors
    /// [`GatewayError::NotFound`] if nothing is registered under `name`.
    pub fn remove(&self, name: &str) -> Result<Arc<GatewayClient>> {
        let removed = self
            .clients
            .write()
            .remove(name)
            .ok_or_else(|| GatewayError::not_found(name))?;
        debug!(backend = %name, "Removed backend client");
        Ok(removed)
    }

    /// Check whether a client is registered under `name`.
    pub fn exists(&self, name: &str) -> bool {
        self.clients.read().contains_key(name)
    }

    /// Remove every client.
    pub fn clear(&self) {
        let mut clients = self.clients.write();
        let count = clients.len();
        clients.clear();
        debug!(count, "Cleared backend clients");
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.clients.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.names())
            .finish()
    }
}

/// Register one client per entry of `config`.
///
/// Each entry is merged with the defaults and validated before it is
/// registered. Entries are processed in key order and processing stops at the
/// first failure; clients registered before it stay registered.
///
/// Returns the number of clients registered.
///
/// # Errors
/// [`GatewayError::Config`] if `config` has no entries or an entry is
/// invalid, or [`GatewayError::DuplicateKey`] if a key is already registered.
pub fn init_with_config(registry: &ClientRegistry, config: &LlmConfig) -> Result<usize> {
    if config.configs.is_empty() {
        return Err(GatewayError::config("no backend configurations provided"));
    }

    for (key, backend) in &config.configs {
        let backend = backend.clone().merge_with_defaults();
        backend.validate().map_err(|e| {
            GatewayError::config(format!("invalid configuration for key '{key}': {e}"))
        })?;
        registry.register(key, backend)?;
    }

    info!(count = config.configs.len(), "Initialized backend clients");
    Ok(config.configs.len())
}
