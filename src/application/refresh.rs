//! Background refresh of cache entries served stale.
//!
//! A refresh re-fetches the entry's upstream path and overwrites the entry on
//! success. Failures are logged and dropped: the caller already has its answer.
//! At most one refresh per key is in flight at a time, and the number of
//! concurrently running refreshes is bounded by a semaphore.

use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use dashmap::DashSet;
use metrics::counter;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cache::{CacheKey, CacheStore};

use super::proxy::store_response;
use super::upstream::Upstream;

pub(crate) const METRIC_REFRESH_TOTAL: &str = "community_node_refresh_total";
pub(crate) const METRIC_REFRESH_SKIPPED_TOTAL: &str = "community_node_refresh_skipped_total";

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of a single refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Stored,
    /// The registry answered with a non-2xx status below 400; nothing was written.
    NotCacheable,
    UpstreamFailed,
    StoreFailed,
}

impl RefreshOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshOutcome::Stored => "stored",
            RefreshOutcome::NotCacheable => "not_cacheable",
            RefreshOutcome::UpstreamFailed => "upstream_failed",
            RefreshOutcome::StoreFailed => "store_failed",
        }
    }
}

/// Spawns fire-and-forget refresh tasks, de-duplicated per cache key.
#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<RefreshInner>,
}

struct RefreshInner {
    store: Arc<dyn CacheStore>,
    upstream: Arc<dyn Upstream>,
    permits: Arc<Semaphore>,
    in_flight: DashSet<CacheKey>,
}

/// Removes the key from the in-flight set however the task ends.
struct InFlightGuard {
    inner: Arc<RefreshInner>,
    key: CacheKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.key);
    }
}

impl RefreshScheduler {
    pub fn new(store: Arc<dyn CacheStore>, upstream: Arc<dyn Upstream>, concurrency: usize) -> Self {
        Self {
            inner: Arc::new(RefreshInner {
                store,
                upstream,
                permits: Arc::new(Semaphore::new(concurrency.max(1))),
                in_flight: DashSet::new(),
            }),
        }
    }

    /// Queue a refresh of `key` from `path`.
    ///
    /// Returns `false` when a refresh for the same key is already in flight.
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, key: CacheKey, path: String) -> bool {
        if !self.inner.in_flight.insert(key.clone()) {
            counter!(METRIC_REFRESH_SKIPPED_TOTAL).increment(1);
            debug!(
                target = "community_node::refresh",
                key = %key,
                "refresh already in flight"
            );
            return false;
        }

        let guard = InFlightGuard {
            inner: Arc::clone(&self.inner),
            key,
        };

        tokio::spawn(async move {
            let inner = Arc::clone(&guard.inner);
            let Ok(_permit) = inner.permits.clone().acquire_owned().await else {
                return;
            };

            let outcome = refresh_entry(
                inner.store.as_ref(),
                inner.upstream.as_ref(),
                &guard.key,
                &path,
            )
            .await;
            counter!(METRIC_REFRESH_TOTAL, "outcome" => outcome.as_str()).increment(1);
            drop(guard);
        });

        true
    }

    /// Number of refreshes queued or running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Wait until no refresh is in flight, giving up after `timeout`.
    ///
    /// Returns `true` when the scheduler became idle.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            while self.in_flight() > 0 {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

async fn refresh_entry(
    store: &dyn CacheStore,
    upstream: &dyn Upstream,
    key: &CacheKey,
    path: &str,
) -> RefreshOutcome {
    let response = match upstream.fetch(&Method::GET, path).await {
        Ok(response) => response,
        Err(err) => {
            warn!(
                target = "community_node::refresh",
                key = %key,
                error = %err,
                "background refresh failed"
            );
            return RefreshOutcome::UpstreamFailed;
        }
    };

    match store_response(store, key, &response).await {
        Ok(true) => {
            debug!(
                target = "community_node::refresh",
                key = %key,
                "background refresh stored"
            );
            RefreshOutcome::Stored
        }
        Ok(false) => RefreshOutcome::NotCacheable,
        Err(err) => {
            warn!(
                target = "community_node::refresh",
                key = %key,
                error = %err,
                "background refresh could not be stored"
            );
            RefreshOutcome::StoreFailed
        }
    }
}
