// tests/common/mod.rs
pub use axum::Router;
pub use serde_json::json;
pub use tokio::task::JoinHandle;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::Client;

use crate::client::ApiClient;
use crate::config::settings::ClientConfig;
use crate::helpers::time::ManualClock;
use crate::store::kv::{KeyValueStore, MemoryStore};

/// Fixed "now" for every scenario, in unix seconds.
pub const NOW: i64 = 1_760_000_000;

/// Spawn an Axum router on an ephemeral port and return (JoinHandle, SocketAddr)
pub async fn spawn_axum(router: Router) -> (JoinHandle<()>, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server failed");
    });
    (handle, addr)
}

pub fn build_reqwest_client() -> Client {
    Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .expect("reqwest client")
}

/// Unsigned JWT whose payload carries `exp`.
pub fn sample_jwt(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({"sub": "user-1", "exp": exp}).to_string());
    format!("{}.{}.signature", header, payload)
}

/// Base URL nothing listens on: bind an ephemeral port, then release it.
pub async fn dead_base_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

pub fn test_config(primary: &str, fallbacks: Vec<String>) -> ClientConfig {
    let mut config = ClientConfig::new(primary).with_fallbacks(fallbacks);
    config.timeouts.request_ms = 2_000;
    config.timeouts.probe_ms = 500;
    config
}

/// Client pinned to [`NOW`] over the given storage.
pub fn client_with(config: ClientConfig, storage: Arc<dyn KeyValueStore>) -> (ApiClient, ManualClock) {
    let clock = ManualClock::new(NOW);
    let client = ApiClient::builder(config)
        .storage(storage)
        .clock(Arc::new(clock.clone()))
        .http_client(build_reqwest_client())
        .build()
        .expect("client builds");
    (client, clock)
}

pub fn test_client(primary: &str, fallbacks: Vec<String>) -> (ApiClient, ManualClock) {
    client_with(test_config(primary, fallbacks), Arc::new(MemoryStore::new()))
}

/// Count deauthentication hook invocations.
pub fn count_deauths(client: &ApiClient) -> Arc<AtomicUsize> {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    client.on_deauthenticated(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    fired
}

pub fn hits(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}
