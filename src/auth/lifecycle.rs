use std::sync::Arc;
use std::time::Duration;

use http::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::endpoint::resolver::EndpointResolver;
use crate::error::ClientError;
use crate::helpers::time::Clock;
use crate::observability::metrics::get_metrics;
use crate::parser::envelope::{extract_token_from_body, failure_details};
use crate::resilience::coalesce::Coalescer;
use crate::store::credential::Credential;
use crate::store::token_store::TokenStore;

pub const REFRESH_PATH: &str = "/auth/refresh";

static SUCCESS_MSG: &str = "success";
static REJECTED_MSG: &str = "rejected";
static NETWORK_MSG: &str = "network";
static INVALID_MSG: &str = "invalid_response";
static NO_CREDENTIAL_MSG: &str = "no_credential";

/// Decides whether the stored token is usable and refreshes it when not.
///
/// All refreshes go through one [`Coalescer`], so any number of concurrent
/// callers produce a single outbound refresh call.
#[derive(Clone)]
pub struct TokenLifecycle {
    inner: Arc<LifecycleInner>,
}

struct LifecycleInner {
    store: Arc<TokenStore>,
    resolver: EndpointResolver,
    client: Client,
    clock: Arc<dyn Clock>,
    lead_seconds: i64,
    request_timeout: Duration,
    refreshing: Coalescer<Result<Credential, ClientError>>,
}

impl TokenLifecycle {
    pub fn new(
        store: Arc<TokenStore>,
        resolver: EndpointResolver,
        client: Client,
        clock: Arc<dyn Clock>,
        lead_seconds: i64,
        request_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(LifecycleInner {
                store,
                resolver,
                client,
                clock,
                lead_seconds,
                request_timeout,
                refreshing: Coalescer::new(),
            }),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    pub fn current(&self) -> Option<Credential> {
        self.inner.store.load()
    }

    /// True when there is no credential or it is inside the lead window.
    pub fn is_expired(&self) -> bool {
        self.inner.fresh_credential().is_none()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.refreshing.is_in_flight()
    }

    /// Exchange the current token for a new one, joining any refresh already
    /// in flight. Any failure voids the stored session.
    pub async fn refresh(&self) -> Result<Credential, ClientError> {
        self.coalesced(true).await
    }

    /// The token to send, refreshing first when it is (nearly) expired.
    /// Signed out means no token and no refresh.
    pub async fn get_valid_token(&self) -> Option<String> {
        let current = self.inner.store.load()?;
        if !current.is_expired_at(self.inner.clock.now(), self.inner.lead_seconds) {
            return Some(current.token);
        }
        self.coalesced(false).await.ok().map(|credential| credential.token)
    }

    async fn coalesced(&self, force: bool) -> Result<Credential, ClientError> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .refreshing
            .run(move || async move { inner.refresh_once(force).await })
            .await
    }
}

impl LifecycleInner {
    fn fresh_credential(&self) -> Option<Credential> {
        self.store
            .load()
            .filter(|c| !c.is_expired_at(self.clock.now(), self.lead_seconds))
    }

    async fn refresh_once(&self, force: bool) -> Result<Credential, ClientError> {
        // a caller that saw an expired token may arrive right after another
        // refresh landed
        if !force {
            if let Some(credential) = self.fresh_credential() {
                debug!("credential already fresh, skipping refresh");
                return Ok(credential);
            }
        }

        let Some(current) = self.store.load() else {
            return self.fail(NO_CREDENTIAL_MSG, "no credential to refresh".to_owned()).await;
        };

        let url = format!("{}{}", self.resolver.active(), REFRESH_PATH);
        info!(url = %url, "refreshing token");

        let response = match self
            .client
            .post(&url)
            .bearer_auth(&current.token)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .timeout(self.request_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return self.fail(NETWORK_MSG, format!("refresh request failed: {}", e)).await,
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return self.fail(NETWORK_MSG, format!("refresh body unreadable: {}", e)).await,
        };

        if !status.is_success() {
            let (message, _) = failure_details(status, &body, content_type.as_deref());
            return self
                .fail(REJECTED_MSG, format!("refresh rejected with status {}: {}", status.as_u16(), message))
                .await;
        }

        let Some(token) = extract_token_from_body(&body) else {
            return self.fail(INVALID_MSG, "refresh response carried no token".to_owned()).await;
        };

        match self.store.save(&token) {
            Ok(credential) => {
                get_metrics().await.refreshes.with_label_values(&[SUCCESS_MSG]).inc();
                info!(expiry = credential.expiry, "token refreshed");
                Ok(credential)
            }
            Err(e) => self.fail(INVALID_MSG, e.to_string()).await,
        }
    }

    async fn fail(&self, outcome: &str, reason: String) -> Result<Credential, ClientError> {
        warn!(outcome, reason = %reason, "token refresh failed, clearing session");
        self.store.clear();
        get_metrics().await.refreshes.with_label_values(&[outcome]).inc();
        Err(ClientError::RefreshFailed(reason))
    }
}
