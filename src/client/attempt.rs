use http::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, Method};
use tracing::warn;

/// Highest `retry_count` a logical request may reach.
pub const MAX_RETRIES: u8 = 1;

/// One HTTP attempt of a logical request.
#[derive(Debug, Clone)]
pub struct RequestAttempt {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub retry_count: u8,
}

impl RequestAttempt {
    pub fn new(base_url: &str, endpoint: &str, method: Method, token: Option<&str>, retry_count: u8) -> Self {
        debug_assert!(retry_count <= MAX_RETRIES, "a logical request is retried at most once");
        Self {
            url: join_url(base_url, endpoint),
            method,
            headers: build_headers(token),
            retry_count,
        }
    }

    pub fn has_authorization(&self) -> bool {
        self.headers.contains_key(AUTHORIZATION)
    }
}

pub fn join_url(base_url: &str, endpoint: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if endpoint.is_empty() {
        base.to_owned()
    } else if endpoint.starts_with('/') {
        format!("{}{}", base, endpoint)
    } else {
        format!("{}/{}", base, endpoint)
    }
}

/// JSON content negotiation plus the bearer token when there is one.
pub fn build_headers(token: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    if let Some(token) = token {
        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(e) => warn!(error = %e, "token is not a valid header value, sending request without it"),
        }
    }
    headers
}
