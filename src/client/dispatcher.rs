use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::CONTENT_TYPE;
use http::{Method, StatusCode};
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::auth::deauth::{DeauthEvent, DeauthHook};
use crate::auth::lifecycle::TokenLifecycle;
use crate::client::attempt::RequestAttempt;
use crate::endpoint::resolver::EndpointResolver;
use crate::error::{from_transport, ClientError};
use crate::observability::metrics::get_metrics;
use crate::parser::envelope::{extract_token, failure_details, parse_success, ApiResponse};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";

static SUCCESS_MSG: &str = "success";
static UNAUTHORIZED_MSG: &str = "unauthorized";
static REJECTED_MSG: &str = "rejected";
static TRANSPORT_MSG: &str = "transport";

/// Client every screen talks to.
///
/// Owns the credential lifecycle, the endpoint set and the deauthentication
/// hook. Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(crate) http: Client,
    pub(crate) resolver: EndpointResolver,
    pub(crate) lifecycle: TokenLifecycle,
    pub(crate) hook: DeauthHook,
    pub(crate) public_paths: Vec<String>,
    pub(crate) session_error: Regex,
    pub(crate) request_timeout: Duration,
}

/// How a single attempt ended.
#[derive(Debug)]
enum Outcome {
    Success(ApiResponse),
    Unauthorized { status: StatusCode, message: String },
    Rejected { status: StatusCode, message: String, errors: Option<Vec<Value>> },
    Transport(ClientError),
}

/// Failures that earn the single recovery cycle.
enum Recoverable {
    Unauthorized { status: StatusCode, message: String },
    Transport(ClientError),
}

impl ApiClient {
    pub(crate) fn from_inner(inner: ClientInner) -> Self {
        Self { inner: Arc::new(inner) }
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.inner.resolver
    }

    pub fn lifecycle(&self) -> &TokenLifecycle {
        &self.inner.lifecycle
    }

    pub fn active_base_url(&self) -> String {
        self.inner.resolver.active()
    }

    /// Register the handler run when the session is irrecoverably lost.
    /// Replaces any earlier handler.
    pub fn on_deauthenticated<F>(&self, callback: F)
    where
        F: Fn(&DeauthEvent) + Send + Sync + 'static,
    {
        self.inner.hook.register(callback);
    }

    pub fn deauth_hook(&self) -> &DeauthHook {
        &self.inner.hook
    }

    /// Paths whose 401s never void the session.
    pub fn is_public_path(&self, endpoint: &str) -> bool {
        let path = endpoint.split(['?', '#']).next().unwrap_or_default();
        let path = path.trim_end_matches('/');
        self.inner
            .public_paths
            .iter()
            .any(|public| public.trim_end_matches('/') == path)
    }

    pub fn is_authenticated(&self) -> bool {
        !self.inner.lifecycle.is_expired()
    }

    pub async fn get(&self, endpoint: &str) -> Result<ApiResponse, ClientError> {
        self.dispatch(Method::GET, endpoint, None).await
    }

    pub async fn post(&self, endpoint: &str, body: &Value) -> Result<ApiResponse, ClientError> {
        self.dispatch(Method::POST, endpoint, Some(body)).await
    }

    pub async fn put(&self, endpoint: &str, body: &Value) -> Result<ApiResponse, ClientError> {
        self.dispatch(Method::PUT, endpoint, Some(body)).await
    }

    pub async fn patch(&self, endpoint: &str, body: &Value) -> Result<ApiResponse, ClientError> {
        self.dispatch(Method::PATCH, endpoint, Some(body)).await
    }

    pub async fn delete(&self, endpoint: &str) -> Result<ApiResponse, ClientError> {
        self.dispatch(Method::DELETE, endpoint, None).await
    }

    /// Authenticate and keep the issued token.
    pub async fn login(&self, credentials: &Value) -> Result<ApiResponse, ClientError> {
        self.authenticate(LOGIN_PATH, credentials).await
    }

    /// Create an account; a token in the response starts the session.
    pub async fn register(&self, account: &Value) -> Result<ApiResponse, ClientError> {
        self.authenticate(REGISTER_PATH, account).await
    }

    /// Explicit sign-out. Does not run the deauthentication hook.
    pub fn logout(&self) {
        self.inner.lifecycle.store().clear();
        info!("logged out");
    }

    async fn authenticate(&self, endpoint: &str, body: &Value) -> Result<ApiResponse, ClientError> {
        let response = self.dispatch(Method::POST, endpoint, Some(body)).await?;
        if !response.success {
            return Ok(response);
        }
        match extract_token(&response) {
            Some(token) => {
                self.inner.lifecycle.store().save(&token)?;
                info!(endpoint, "session started");
            }
            None => warn!(endpoint, "authentication succeeded without a token"),
        }
        Ok(response)
    }

    /// Send one logical request, recovering at most once from an auth or
    /// transport failure.
    pub async fn dispatch(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, ClientError> {
        let started = Instant::now();
        let result = self.dispatch_inner(method.clone(), endpoint, body).await;

        get_metrics()
            .await
            .dispatch_duration
            .with_label_values(&[method.as_str()])
            .observe(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            debug!(%method, endpoint, error = %e, "request failed");
        }
        result
    }

    async fn dispatch_inner(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, ClientError> {
        let public = self.is_public_path(endpoint);

        // Prepare
        let token = if public {
            None
        } else {
            self.inner.lifecycle.get_valid_token().await
        };
        let mut session = self.inner.lifecycle.store().session();
        let base = self.inner.resolver.active();

        // Attempt 1
        let first = RequestAttempt::new(&base, endpoint, method.clone(), token.as_deref(), 0);
        let failure = match self.send(&first, body).await {
            Outcome::Success(response) => return Ok(response),
            Outcome::Rejected { status, message, errors } => {
                return Err(self.rejected(endpoint, public, status, message, errors));
            }
            Outcome::Unauthorized { status, message } if public => {
                return Err(ClientError::Unauthorized { status, message });
            }
            Outcome::Unauthorized { status, message } => Recoverable::Unauthorized { status, message },
            Outcome::Transport(err) => Recoverable::Transport(err),
        };

        // Recover
        let resolved = self.inner.resolver.resolve().await;
        let (retry_base, retry_token) = match failure {
            Recoverable::Transport(err) => match resolved {
                Some(url) => {
                    info!(endpoint, url = %url, error = %err, "retrying after transport failure");
                    (url, token)
                }
                None => {
                    error!(endpoint, error = %err, "no endpoint reachable");
                    return Err(ClientError::NetworkUnreachable(format!(
                        "no endpoint in the configured set responded ({})",
                        err
                    )));
                }
            },
            Recoverable::Unauthorized { status, message } => match resolved {
                Some(url) if url != base => {
                    info!(endpoint, url = %url, "retrying unauthorized request on another endpoint");
                    (url, token)
                }
                resolved => {
                    let retry_base = resolved.unwrap_or(base);
                    match self.inner.lifecycle.current() {
                        // another request already rotated the token
                        Some(stored) if token.as_deref() != Some(stored.token.as_str()) => {
                            debug!(endpoint, "retrying with the token stored since the first attempt");
                            session = self.inner.lifecycle.store().session();
                            (retry_base, Some(stored.token))
                        }
                        _ => match self.inner.lifecycle.refresh().await {
                            Ok(credential) => {
                                session = self.inner.lifecycle.store().session();
                                (retry_base, Some(credential.token))
                            }
                            Err(e) => {
                                warn!(endpoint, error = %e, "recovery refresh failed");
                                return Err(self.deauthenticate(endpoint, session, status, message).await);
                            }
                        },
                    }
                }
            },
        };

        // Attempt 2
        let second = RequestAttempt::new(&retry_base, endpoint, method, retry_token.as_deref(), 1);
        match self.send(&second, body).await {
            Outcome::Success(response) => Ok(response),
            Outcome::Rejected { status, message, errors } => {
                Err(self.rejected(endpoint, public, status, message, errors))
            }
            Outcome::Unauthorized { status, message } if public => {
                Err(ClientError::Unauthorized { status, message })
            }
            Outcome::Unauthorized { status, message } => {
                Err(self.deauthenticate(endpoint, session, status, message).await)
            }
            Outcome::Transport(err) => Err(err),
        }
    }

    async fn send(&self, attempt: &RequestAttempt, body: Option<&Value>) -> Outcome {
        let metrics = get_metrics().await;
        let method = attempt.method.as_str().to_owned();
        debug!(url = %attempt.url, %method, retry = attempt.retry_count, auth = attempt.has_authorization(), "sending request");

        let mut request = self
            .inner
            .http
            .request(attempt.method.clone(), &attempt.url)
            .headers(attempt.headers.clone())
            .timeout(self.inner.request_timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        let outcome = match request.send().await {
            Err(e) => Outcome::Transport(from_transport(&e, self.inner.request_timeout)),
            Ok(response) => {
                let status = response.status();
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);

                match response.text().await {
                    Err(e) => Outcome::Transport(from_transport(&e, self.inner.request_timeout)),
                    Ok(text) if status.is_success() => {
                        Outcome::Success(parse_success(&text, content_type.as_deref()))
                    }
                    Ok(text) => {
                        let (message, errors) = failure_details(status, &text, content_type.as_deref());
                        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                            Outcome::Unauthorized { status, message }
                        } else {
                            Outcome::Rejected { status, message, errors }
                        }
                    }
                }
            }
        };

        let label = match &outcome {
            Outcome::Success(_) => SUCCESS_MSG,
            Outcome::Unauthorized { .. } => UNAUTHORIZED_MSG,
            Outcome::Rejected { .. } => REJECTED_MSG,
            Outcome::Transport(_) => TRANSPORT_MSG,
        };
        metrics.dispatch_attempts.with_label_values(&[method.as_str(), label]).inc();
        outcome
    }

    /// Non-auth failure. A message that says the session is broken voids it,
    /// except on public paths.
    fn rejected(
        &self,
        endpoint: &str,
        public: bool,
        status: StatusCode,
        message: String,
        errors: Option<Vec<Value>>,
    ) -> ClientError {
        if !public && self.inner.session_error.is_match(&message) {
            warn!(endpoint, %status, message = %message, "server reports an invalid session, clearing credential");
            self.inner.lifecycle.store().clear();
        }
        ClientError::ServerError { status, message, errors }
    }

    /// End the session the request was sent under. Concurrent requests of
    /// one session fire the hook once; a session that was already replaced
    /// is left alone.
    async fn deauthenticate(&self, endpoint: &str, session: u64, status: StatusCode, message: String) -> ClientError {
        let store = self.inner.lifecycle.store();
        if store.session() != session {
            info!(endpoint, session, "request belonged to an earlier session, keeping the current one");
            return ClientError::Unauthorized { status, message };
        }

        store.clear();
        let event = DeauthEvent {
            path: endpoint.to_owned(),
            status,
            message: message.clone(),
        };
        if self.inner.hook.invoke_once(session, &event) {
            error!(endpoint, %status, session, "session irrecoverable, deauthenticated");
            get_metrics().await.deauthentications.inc();
        } else {
            debug!(endpoint, session, "session already deauthenticated");
        }
        ClientError::Unauthorized { status, message }
    }
}

