use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;

use crate::config::RateLimitSettings;

use super::error::ApiError;

const UNKNOWN_CLIENT: &str = "unknown";

/// Sliding-window request counter keyed by client address.
///
/// Clients with no request inside the window are swept at most once per window.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    buckets: Arc<DashMap<String, Vec<Instant>>>,
    started_at: Instant,
    last_sweep_ms: Arc<AtomicU64>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            buckets: Arc::new(DashMap::new()),
            started_at: Instant::now(),
            last_sweep_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(
            Duration::from_secs(u64::from(settings.window_seconds.get())),
            settings.max_requests.get(),
        )
    }

    /// Record a request for `client`; returns `false` once the window is full.
    pub fn allow(&self, client: &str) -> bool {
        let now = Instant::now();
        let window = self.window;
        self.sweep_if_due(now);

        let mut entry = self.buckets.entry(client.to_string()).or_default();
        entry.retain(|instant| now.duration_since(*instant) < window);

        if entry.len() as u32 >= self.max_requests {
            return false;
        }

        entry.push(now);
        true
    }

    /// Number of clients currently holding a bucket.
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }

    fn sweep_if_due(&self, now: Instant) {
        let window_ms = u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX);
        let now_ms = u64::try_from(now.duration_since(self.started_at).as_millis())
            .unwrap_or(u64::MAX);
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < window_ms {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let window = self.window;
        self.buckets.retain(|_, hits| {
            hits.retain(|instant| now.duration_since(*instant) < window);
            !hits.is_empty()
        });
    }

    pub fn retry_after_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }

    pub fn limit(&self) -> u32 {
        self.max_requests
    }
}

/// Peer address when the server was started with connect info, otherwise the
/// first forwarded address.
fn client_key(peer: Option<SocketAddr>, headers: &HeaderMap) -> String {
    if let Some(peer) = peer {
        return peer.ip().to_string();
    }

    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|value| value.to_str().ok()))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = client_key(peer, request.headers());

    if !limiter.allow(&client) {
        return ApiError::rate_limited(limiter.limit(), limiter.retry_after_secs());
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn blocks_after_ceiling_within_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);

        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.2"));
    }

    #[test]
    fn window_expiry_frees_slots() {
        let limiter = RateLimiter::new(Duration::from_millis(20), 1);

        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.allow("10.0.0.1"));
    }

    #[test]
    fn idle_clients_are_forgotten() {
        let limiter = RateLimiter::new(Duration::from_millis(20), 5);

        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.2"));
        assert_eq!(limiter.tracked_clients(), 2);

        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.allow("10.0.0.3"));

        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        let limiter = RateLimiter::new(Duration::from_millis(200), 1);
        assert_eq!(limiter.retry_after_secs(), 1);
    }

    #[test]
    fn client_key_prefers_peer_address() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );

        let peer: SocketAddr = "192.0.2.1:5000".parse().expect("addr");
        assert_eq!(client_key(Some(peer), &headers), "192.0.2.1");
        assert_eq!(client_key(None, &headers), "203.0.113.7");
        assert_eq!(client_key(None, &HeaderMap::new()), UNKNOWN_CLIENT);
    }
}
