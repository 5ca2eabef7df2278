//! Latency probes reported by `/api/speedtest`.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use reqwest::Client;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::cache::CacheStore;

use super::origin::OriginClient;

const PROBE_PATH: &str = "/api/news?page=1&limit=10";
const FAILED_PROBE: f64 = -1.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedReport {
    pub message: &'static str,
    pub redis_ping_ms: f64,
    pub hot_latency_ms: f64,
    pub cold_latency_ms: f64,
    pub total_processing_ms: f64,
    pub server: &'static str,
}

/// Measures the cache store, this node's own cached path (hot) and the
/// registry's uncached path (cold). A probe that fails reports `-1`.
pub struct SpeedTest {
    store: Arc<dyn CacheStore>,
    client: Client,
    hot_url: String,
    cold_url: String,
}

impl SpeedTest {
    pub fn new(store: Arc<dyn CacheStore>, origin: &OriginClient, public_url: &Url) -> Self {
        Self {
            store,
            client: origin.http().clone(),
            hot_url: format!("{}{PROBE_PATH}", public_url.as_str().trim_end_matches('/')),
            cold_url: origin.url(PROBE_PATH),
        }
    }

    pub async fn run(&self) -> SpeedReport {
        let started_at = Instant::now();

        let redis_ping_ms = timed(async { self.store.ping().await.is_ok() }).await;
        let hot_latency_ms = timed(self.get(&self.hot_url)).await;
        let cold_latency_ms = timed(self.get(&self.cold_url)).await;

        SpeedReport {
            message: "Speed test results",
            redis_ping_ms,
            hot_latency_ms,
            cold_latency_ms,
            total_processing_ms: round_ms(elapsed_ms(started_at)),
            server: "community-server",
        }
    }

    /// Any HTTP answer counts as reachable; only transport failures fail the probe.
    async fn get(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(_) => true,
            Err(err) => {
                debug!(
                    target = "community_node::speedtest",
                    url,
                    error = %err,
                    "probe failed"
                );
                false
            }
        }
    }
}

async fn timed(probe: impl Future<Output = bool>) -> f64 {
    let started_at = Instant::now();
    if probe.await {
        round_ms(elapsed_ms(started_at))
    } else {
        FAILED_PROBE
    }
}

fn elapsed_ms(started_at: Instant) -> f64 {
    started_at.elapsed().as_secs_f64() * 1000.0
}

fn round_ms(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
