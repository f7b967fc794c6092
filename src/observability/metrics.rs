use std::sync::Arc;

use anyhow::Result;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::sync::OnceCell;
use tracing::info;

// Declare the static OnceCell to hold the Metrics.
static METRICS_INSTANCE: OnceCell<Arc<Metrics>> = OnceCell::const_new();

/// Asynchronously initializes and gets a reference to the static `Metrics`.
pub async fn get_metrics() -> &'static Arc<Metrics> {
    METRICS_INSTANCE
        .get_or_init(|| async {
            info!("Initializing Metrics ...");
            Metrics::new()
        })
        .await
}

#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Endpoint resolver
    pub probes: IntCounterVec,
    pub failovers: IntCounter,

    // Token lifecycle
    pub refreshes: IntCounterVec,

    // Dispatcher
    pub dispatch_attempts: IntCounterVec,
    pub dispatch_duration: HistogramVec,
    pub deauthentications: IntCounter,
}

impl Metrics {
    fn new() -> Arc<Self> {
        let registry = Registry::new_custom(Some("careapiclient".into()), None)
            .expect("static registry prefix is valid");

        let metrics = Arc::new(Self {
            probes: IntCounterVec::new(Opts::new("endpoint_probes_total", "Liveness probes by outcome"), &["outcome"]).expect("metric"),
            failovers: IntCounter::new("endpoint_failovers_total", "Active base URL switched to another candidate").expect("metric"),

            refreshes: IntCounterVec::new(Opts::new("token_refreshes_total", "Outbound token refresh calls by outcome"), &["outcome"]).expect("metric"),

            dispatch_attempts: IntCounterVec::new(Opts::new("dispatch_attempts_total", "HTTP attempts by method and outcome"), &["method", "outcome"]).expect("metric"),
            dispatch_duration: HistogramVec::new(
                HistogramOpts::new("dispatch_duration_seconds", "Logical request duration seconds")
                    .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
                &["method"],
            ).expect("metric"),
            deauthentications: IntCounter::new("deauthentications_total", "Sessions voided after unrecoverable 401/403").expect("metric"),

            registry,
        });

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(metrics.probes.clone()),
            Box::new(metrics.failovers.clone()),
            Box::new(metrics.refreshes.clone()),
            Box::new(metrics.dispatch_attempts.clone()),
            Box::new(metrics.dispatch_duration.clone()),
            Box::new(metrics.deauthentications.clone()),
        ];
        for collector in collectors {
            metrics.registry.register(collector).expect("metric registered once");
        }

        metrics
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
