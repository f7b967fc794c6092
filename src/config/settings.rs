use std::net::{IpAddr, UdpSocket};
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_REFRESH_LEAD_SECONDS: i64 = 300;
pub const DEFAULT_LEGACY_TTL_SECONDS: i64 = 24 * 60 * 60;
pub const DEFAULT_SESSION_ERROR_PATTERN: &str = r"(?i)\b(invalid|expired|malformed) token\b|\bjwt expired\b";

/// Host every Android emulator sees its development machine under.
pub const EMULATOR_HOST_ALIAS: &str = "10.0.2.2";
pub const LOOPBACK_HOST: &str = "localhost";
/// `lan_host` value that asks for the outbound interface address.
pub const LAN_HOST_AUTO: &str = "auto";

/// ================================
/// Full client configuration
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub logging: Option<LoggingConfig>,
}

impl ClientConfig {
    /// Defaults around a single base URL, no aliases, in-memory storage.
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            endpoints: EndpointsConfig {
                primary: primary.into(),
                fallbacks: Vec::new(),
                aliases: None,
            },
            timeouts: TimeoutsConfig::default(),
            auth: AuthConfig::default(),
            storage: StorageConfig::default(),
            logging: None,
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<String>) -> Self {
        self.endpoints.fallbacks = fallbacks;
        self
    }
}

/// ================================
/// Endpoints
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct EndpointsConfig {
    pub primary: String,
    /// explicit extra base URLs, probed in this order
    #[serde(default)]
    pub fallbacks: Vec<String>,
    pub aliases: Option<AliasConfig>,
}

/// Well-known network aliases appended after the explicit fallbacks.
#[derive(Debug, Deserialize, Clone)]
pub struct AliasConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// defaults to the primary URL's port
    pub port: Option<u16>,
    /// defaults to the primary URL's path
    pub path: Option<String>,
    /// explicit LAN host, or `auto` to detect it
    pub lan_host: Option<String>,
}

impl EndpointsConfig {
    pub fn primary_url(&self) -> String {
        normalize_base_url(&self.primary)
    }

    /// Ordered, deduplicated fallback list; never contains the primary.
    pub fn fallback_urls(&self) -> Vec<String> {
        let primary = self.primary_url();
        let mut urls: Vec<String> = Vec::new();

        let explicit = self.fallbacks.iter().map(|u| normalize_base_url(u));
        let aliases = self
            .aliases
            .as_ref()
            .filter(|a| a.enabled)
            .map(|a| alias_urls(a, &primary))
            .unwrap_or_default();

        for url in explicit.chain(aliases) {
            if url != primary && !urls.contains(&url) {
                urls.push(url);
            }
        }
        urls
    }
}

fn alias_urls(aliases: &AliasConfig, primary: &str) -> Vec<String> {
    let parsed = Url::parse(primary).ok();
    let port = aliases
        .port
        .or_else(|| parsed.as_ref().and_then(|u| u.port_or_known_default()))
        .unwrap_or(80);
    let path = aliases
        .path
        .clone()
        .or_else(|| parsed.as_ref().map(|u| u.path().to_owned()))
        .unwrap_or_default();
    let path = path.trim_end_matches('/');

    let mut hosts = vec![LOOPBACK_HOST.to_owned(), EMULATOR_HOST_ALIAS.to_owned()];
    match aliases.lan_host.as_deref().map(str::trim) {
        Some(LAN_HOST_AUTO) => {
            if let Some(ip) = detect_lan_address() {
                hosts.push(ip.to_string());
            }
        }
        Some(host) if !host.is_empty() => hosts.push(host.to_owned()),
        _ => {}
    }

    hosts
        .into_iter()
        .map(|host| format!("http://{}:{}{}", host, port, path))
        .collect()
}

/// Address of the interface that routes outbound traffic.
///
/// Connecting a UDP socket only selects a route, nothing is sent.
pub fn detect_lan_address() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("192.0.2.1:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    debug!(%ip, "detected lan address");
    (!ip.is_unspecified() && !ip.is_loopback()).then_some(ip)
}

pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_owned()
}

/// ================================
/// Timeouts
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutsConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            probe_ms: DEFAULT_PROBE_TIMEOUT_MS,
        }
    }
}

impl TimeoutsConfig {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_ms)
    }
}

/// ================================
/// Auth
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// refresh this many seconds before the token actually expires
    #[serde(default = "default_refresh_lead_seconds")]
    pub refresh_lead_seconds: i64,
    /// lifetime assumed for migrated legacy tokens without an `exp` claim
    #[serde(default = "default_legacy_ttl_seconds")]
    pub legacy_ttl_seconds: i64,
    /// paths whose 401s are an expected outcome, never a session loss
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
    #[serde(default = "default_session_error_pattern")]
    pub session_error_pattern: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_lead_seconds: DEFAULT_REFRESH_LEAD_SECONDS,
            legacy_ttl_seconds: DEFAULT_LEGACY_TTL_SECONDS,
            public_paths: default_public_paths(),
            session_error_pattern: default_session_error_pattern(),
        }
    }
}

/// ================================
/// Storage
/// ================================
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// credential file; in-memory storage when absent
    pub path: Option<String>,
}

/// ================================
/// Logging
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String, // allowed: trace, debug, info, warn, error
    pub format: LogFormat,
}

impl LoggingConfig {
    pub fn new(level: String, format: LogFormat) -> Self {
        Self { level, format }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new("info".to_owned(), LogFormat::Compact)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

fn default_refresh_lead_seconds() -> i64 {
    DEFAULT_REFRESH_LEAD_SECONDS
}

fn default_legacy_ttl_seconds() -> i64 {
    DEFAULT_LEGACY_TTL_SECONDS
}

pub fn default_public_paths() -> Vec<String> {
    vec!["/auth/login".to_owned(), "/auth/register".to_owned()]
}

fn default_session_error_pattern() -> String {
    DEFAULT_SESSION_ERROR_PATTERN.to_owned()
}
