use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::settings::{normalize_base_url, EndpointsConfig};
use crate::observability::metrics::get_metrics;
use crate::resilience::coalesce::Coalescer;

pub const HEALTH_PATH: &str = "/health";

static REACHABLE_MSG: &str = "reachable";
static UNREACHABLE_MSG: &str = "unreachable";

/// Primary base URL, ordered fallbacks and the currently active one.
///
/// `active` starts as the primary and only ever moves to another member of
/// the set; it is never reverted automatically.
#[derive(Clone)]
pub struct EndpointResolver {
    inner: Arc<ResolverInner>,
}

struct ResolverInner {
    client: Client,
    primary: String,
    fallbacks: Vec<String>,
    active: RwLock<String>,
    probe_timeout: Duration,
    resolving: Coalescer<Option<String>>,
}

impl EndpointResolver {
    pub fn new(client: Client, primary: &str, fallbacks: Vec<String>, probe_timeout: Duration) -> Self {
        let primary = normalize_base_url(primary);
        let mut unique: Vec<String> = Vec::with_capacity(fallbacks.len());
        for url in fallbacks.iter().map(|u| normalize_base_url(u)) {
            if url != primary && !unique.contains(&url) {
                unique.push(url);
            }
        }

        Self {
            inner: Arc::new(ResolverInner {
                client,
                active: RwLock::new(primary.clone()),
                primary,
                fallbacks: unique,
                probe_timeout,
                resolving: Coalescer::new(),
            }),
        }
    }

    pub fn from_config(client: Client, endpoints: &EndpointsConfig, probe_timeout: Duration) -> Self {
        Self::new(client, &endpoints.primary_url(), endpoints.fallback_urls(), probe_timeout)
    }

    pub fn active(&self) -> String {
        self.inner.active()
    }

    pub fn primary(&self) -> &str {
        &self.inner.primary
    }

    pub fn fallbacks(&self) -> &[String] {
        &self.inner.fallbacks
    }

    /// Liveness check of `{url}/health`. Any failure reads as unreachable.
    pub async fn probe(&self, url: &str) -> bool {
        self.inner.probe(url).await
    }

    /// Find a reachable base URL, committing it as `active`.
    ///
    /// `active` is probed first and kept when it answers. Otherwise the
    /// primary and then the fallbacks are tried in configured order; the
    /// first reachable one wins. Concurrent calls share one resolution.
    pub async fn resolve(&self) -> Option<String> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .resolving
            .run(move || async move { inner.resolve().await })
            .await
    }
}

impl ResolverInner {
    fn active(&self) -> String {
        self.active.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn candidates(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.primary).chain(self.fallbacks.iter())
    }

    async fn probe(&self, url: &str) -> bool {
        let metrics = get_metrics().await;
        let health_url = format!("{}{}", url, HEALTH_PATH);

        let reachable = match self
            .client
            .get(&health_url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => {
                debug!(url, status = %response.status(), "probe answered");
                response.status().is_success()
            }
            Err(e) => {
                debug!(url, error = %e, "probe failed");
                false
            }
        };

        let outcome = if reachable { REACHABLE_MSG } else { UNREACHABLE_MSG };
        metrics.probes.with_label_values(&[outcome]).inc();
        reachable
    }

    async fn resolve(&self) -> Option<String> {
        let current = self.active();
        if self.probe(&current).await {
            return Some(current);
        }
        warn!(url = %current, "active endpoint unreachable, probing alternatives");

        for candidate in self.candidates().filter(|c| **c != current) {
            if self.probe(candidate).await {
                self.commit(candidate).await;
                return Some(candidate.clone());
            }
        }

        warn!(candidates = self.fallbacks.len() + 1, "no endpoint reachable");
        None
    }

    async fn commit(&self, url: &str) {
        let previous = {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *active, url.to_owned())
        };
        if previous != url {
            info!(from = %previous, to = %url, "switched active endpoint");
            get_metrics().await.failovers.inc();
        }
    }
}
