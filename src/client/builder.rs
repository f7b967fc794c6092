use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use reqwest::Client;
use tracing::{debug, info};

use crate::auth::deauth::DeauthHook;
use crate::auth::lifecycle::TokenLifecycle;
use crate::client::dispatcher::{ApiClient, ClientInner};
use crate::config::settings::ClientConfig;
use crate::config::validator::validate_client_config;
use crate::endpoint::resolver::EndpointResolver;
use crate::helpers::time::{Clock, SystemClock};
use crate::store::kv::{FileStore, KeyValueStore, MemoryStore};
use crate::store::token_store::TokenStore;

/// Wires an [`ApiClient`] from a [`ClientConfig`].
///
/// Storage, clock and HTTP client can be swapped; by default the credential
/// lives in `storage.path` (or memory) and time comes from the system.
pub struct ApiClientBuilder {
    config: ClientConfig,
    storage: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
    http: Option<Client>,
}

impl ApiClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            storage: None,
            clock: None,
            http: None,
        }
    }

    pub fn storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn http_client(mut self, http: Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let config = self.config;
        validate_client_config(&config).map_err(|errors| anyhow!("invalid client config: {}", errors.join("; ")))?;

        let session_error = Regex::new(&config.auth.session_error_pattern)
            .with_context(|| format!("bad session_error_pattern '{}'", config.auth.session_error_pattern))?;

        let storage: Arc<dyn KeyValueStore> = match (self.storage, &config.storage.path) {
            (Some(storage), _) => storage,
            (None, Some(path)) => {
                debug!(path = %path, "using file credential storage");
                Arc::new(FileStore::open(path)?)
            }
            (None, None) => {
                debug!("using in-memory credential storage");
                Arc::new(MemoryStore::new())
            }
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let http = match self.http {
            Some(http) => http,
            None => Client::builder().build().context("failed to build http client")?,
        };

        let store = Arc::new(TokenStore::new(storage, clock.clone(), config.auth.legacy_ttl_seconds));
        let resolver = EndpointResolver::from_config(http.clone(), &config.endpoints, config.timeouts.probe());
        let lifecycle = TokenLifecycle::new(
            store,
            resolver.clone(),
            http.clone(),
            clock,
            config.auth.refresh_lead_seconds,
            config.timeouts.request(),
        );

        info!(
            primary = %resolver.primary(),
            fallbacks = resolver.fallbacks().len(),
            "api client ready"
        );

        Ok(ApiClient::from_inner(ClientInner {
            http,
            resolver,
            lifecycle,
            hook: DeauthHook::new(),
            public_paths: config.auth.public_paths,
            session_error,
            request_timeout: config.timeouts.request(),
        }))
    }
}

impl ApiClient {
    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder::new(config)
    }

    pub fn from_config(config: ClientConfig) -> Result<Self> {
        ApiClientBuilder::new(config).build()
    }
}
