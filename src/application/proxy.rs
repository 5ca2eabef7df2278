//! Cache-aside proxy engine.
//!
//! Reads are answered from the cache store whenever an entry exists, and every
//! hit schedules a background refresh so the next caller sees fresher data. On
//! a miss the registry is queried synchronously and the answer is stored before
//! it is returned. Store failures of any kind degrade to a miss.

use std::sync::Arc;

use axum::http::Method;
use bytes::Bytes;
use metrics::counter;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheEnvelope, CacheError, CacheKey, CacheStore, CachedPayload};
use crate::domain::pagination::{PageRequest, paginate};

use super::error::GatewayError;
use super::refresh::RefreshScheduler;
use super::upstream::{Upstream, UpstreamResponse};

pub(crate) const METRIC_CACHE_HIT_TOTAL: &str = "community_node_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS_TOTAL: &str = "community_node_cache_miss_total";
pub(crate) const METRIC_CACHE_STORE_ERROR_TOTAL: &str = "community_node_cache_store_error_total";

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A read to be answered through the cache.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Upstream path including its query string.
    pub path: String,
    /// Page window applied to structured list entries.
    pub page: Option<PageRequest>,
}

impl ProxyRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            page: None,
        }
    }

    pub fn with_page(mut self, page: PageRequest) -> Self {
        self.page = Some(page);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Origin,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Cache => "HIT",
            ResponseSource::Origin => "MISS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    pub body: Bytes,
    pub content_type: String,
    pub source: ResponseSource,
}

pub struct ProxyEngine {
    store: Arc<dyn CacheStore>,
    upstream: Arc<dyn Upstream>,
    refresher: RefreshScheduler,
}

impl ProxyEngine {
    pub fn new(
        store: Arc<dyn CacheStore>,
        upstream: Arc<dyn Upstream>,
        refresher: RefreshScheduler,
    ) -> Self {
        Self {
            store,
            upstream,
            refresher,
        }
    }

    pub fn refresher(&self) -> &RefreshScheduler {
        &self.refresher
    }

    /// Answer `request` from the cache, falling back to the registry on a miss.
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn serve(&self, request: ProxyRequest) -> Result<ProxyResponse, GatewayError> {
        if request.method != Method::GET {
            return Err(GatewayError::UnsupportedMethod(request.method));
        }

        let key = CacheKey::derive(&request.method, &request.path);

        if let Some(envelope) = self.lookup(&key).await {
            counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
            debug!(cache = "store", outcome = "hit", key = %key, "serving cached response");
            self.refresher.schedule(key, request.path);
            return Ok(render_cached(envelope, request.page));
        }

        counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
        debug!(cache = "store", outcome = "miss", key = %key, "fetching from registry");

        let response = self.upstream.fetch(&request.method, &request.path).await?;

        if let Err(err) = store_response(self.store.as_ref(), &key, &response).await {
            counter!(METRIC_CACHE_STORE_ERROR_TOTAL, "op" => "set").increment(1);
            warn!(key = %key, error = %err, "failed to store registry response");
        }

        Ok(ProxyResponse {
            body: response.body,
            content_type: response
                .content_type
                .unwrap_or_else(|| JSON_CONTENT_TYPE.to_string()),
            source: ResponseSource::Origin,
        })
    }

    /// Read and decode the entry for `key`; absent, unreadable and corrupted entries are all `None`.
    async fn lookup(&self, key: &CacheKey) -> Option<CacheEnvelope> {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) if !bytes.is_empty() => bytes,
            Ok(_) => return None,
            Err(err) => {
                counter!(METRIC_CACHE_STORE_ERROR_TOTAL, "op" => "get").increment(1);
                warn!(key = %key, error = %err, "cache lookup failed, treating as miss");
                return None;
            }
        };

        match CacheEnvelope::decode(&bytes) {
            Ok(envelope) => Some(envelope),
            Err(err) => {
                let err = CacheError::from(err);
                counter!(METRIC_CACHE_STORE_ERROR_TOTAL, "op" => "decode").increment(1);
                warn!(key = %key, error = %err, "cache entry unreadable, treating as miss");
                None
            }
        }
    }
}

/// Persist a successful registry response under `key`.
///
/// Returns `Ok(false)` when the response is not a 2xx and was therefore not stored.
pub(crate) async fn store_response(
    store: &dyn CacheStore,
    key: &CacheKey,
    response: &UpstreamResponse,
) -> Result<bool, CacheError> {
    if !response.status.is_success() {
        return Ok(false);
    }

    let envelope = CacheEnvelope::raw(
        &response.body,
        response.content_type.clone(),
        OffsetDateTime::now_utc(),
    )?;
    store.set(key, envelope.encode()?).await?;
    Ok(true)
}

fn render_cached(envelope: CacheEnvelope, page: Option<PageRequest>) -> ProxyResponse {
    let content_type = envelope
        .content_type
        .unwrap_or_else(|| JSON_CONTENT_TYPE.to_string());

    let body = match envelope.payload {
        CachedPayload::Raw(text) => Bytes::from(text),
        CachedPayload::Structured(value) => render_structured(value, page),
    };

    ProxyResponse {
        body,
        content_type,
        source: ResponseSource::Cache,
    }
}

/// Serialise a structured entry, slicing it to `page` when it is a list.
fn render_structured(value: Value, page: Option<PageRequest>) -> Bytes {
    let rendered = match (value, page) {
        (Value::Array(items), Some(page)) => serde_json::to_vec(&paginate(&items, page)),
        (value, _) => serde_json::to_vec(&value),
    };
    // Serialising a `Value` cannot fail.
    Bytes::from(rendered.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::cache::MemoryStore;

    /// Counts calls and answers every read with the same body.
    struct StaticUpstream {
        calls: AtomicUsize,
        status: StatusCode,
        body: &'static str,
    }

    impl StaticUpstream {
        fn ok(body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                status: StatusCode::OK,
                body,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for StaticUpstream {
        async fn fetch(
            &self,
            _method: &Method,
            _path: &str,
        ) -> Result<UpstreamResponse, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(UpstreamResponse {
                status: self.status,
                content_type: Some(JSON_CONTENT_TYPE.into()),
                body: Bytes::from_static(self.body.as_bytes()),
            })
        }
    }

    /// A store whose every operation fails.
    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
            Err(CacheError::unavailable("connection refused"))
        }

        async fn set(&self, _key: &CacheKey, _value: Vec<u8>) -> Result<(), CacheError> {
            Err(CacheError::unavailable("connection refused"))
        }

        async fn hash_values(&self, _hash: &str) -> Result<Vec<String>, CacheError> {
            Err(CacheError::unavailable("connection refused"))
        }

        async fn ping(&self) -> Result<(), CacheError> {
            Err(CacheError::unavailable("connection refused"))
        }
    }

    fn engine(store: Arc<dyn CacheStore>, upstream: Arc<dyn Upstream>) -> ProxyEngine {
        let refresher = RefreshScheduler::new(store.clone(), upstream.clone(), 4);
        ProxyEngine::new(store, upstream, refresher)
    }

    #[tokio::test]
    async fn non_read_methods_are_rejected_before_any_io() {
        let store = Arc::new(MemoryStore::new());
        let upstream = StaticUpstream::ok("{}");
        let engine = engine(store.clone(), upstream.clone());

        for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
            let request = ProxyRequest {
                method: method.clone(),
                path: "/api/news".into(),
                page: None,
            };
            let err = engine.serve(request).await.expect_err("write rejected");
            assert_eq!(err, GatewayError::UnsupportedMethod(method));
        }

        assert_eq!(upstream.calls(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn miss_stores_and_next_request_hits() {
        let store = Arc::new(MemoryStore::new());
        let upstream = StaticUpstream::ok(r#"{"data":[1,2,3]}"#);
        let engine = engine(store.clone(), upstream.clone());

        let first = engine
            .serve(ProxyRequest::get("/api/news?page=1"))
            .await
            .expect("miss served");
        assert_eq!(first.source, ResponseSource::Origin);

        let second = engine
            .serve(ProxyRequest::get("/api/news?page=1"))
            .await
            .expect("hit served");
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.body, first.body);
        assert_eq!(second.content_type, JSON_CONTENT_TYPE);

        assert!(engine.refresher().drain(Duration::from_secs(5)).await);
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test]
    async fn store_outage_degrades_to_origin() {
        let upstream = StaticUpstream::ok(r#"{"ok":true}"#);
        let engine = engine(Arc::new(BrokenStore), upstream.clone());

        for _ in 0..2 {
            let response = engine
                .serve(ProxyRequest::get("/api/phones"))
                .await
                .expect("served from origin");
            assert_eq!(response.source, ResponseSource::Origin);
            assert_eq!(response.body, Bytes::from_static(br#"{"ok":true}"#));
        }
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test]
    async fn non_success_statuses_are_returned_but_not_cached() {
        let store = Arc::new(MemoryStore::new());
        let upstream = Arc::new(StaticUpstream {
            calls: AtomicUsize::new(0),
            status: StatusCode::NOT_MODIFIED,
            body: "",
        });
        let engine = engine(store.clone(), upstream);

        let response = engine
            .serve(ProxyRequest::get("/api/news"))
            .await
            .expect("served");
        assert_eq!(response.source, ResponseSource::Origin);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn structured_list_entries_are_paginated() {
        let store = Arc::new(MemoryStore::new());
        let key = CacheKey::derive(&Method::GET, "/api/rescue_points?page=2&limit=3");
        store.insert_raw(key.as_str(), json!([0, 1, 2, 3, 4, 5, 6]).to_string());

        let engine = engine(store, StaticUpstream::ok("[]"));
        let response = engine
            .serve(
                ProxyRequest::get("/api/rescue_points?page=2&limit=3")
                    .with_page(PageRequest::new(2, 3).expect("valid page")),
            )
            .await
            .expect("hit served");

        let body: Value = serde_json::from_slice(&response.body).expect("json body");
        assert_eq!(
            body,
            json!({"data": [3, 4, 5], "total": 7, "page": 2, "limit": 3, "total_pages": 3})
        );
    }

    #[tokio::test]
    async fn structured_documents_are_returned_whole() {
        let store = Arc::new(MemoryStore::new());
        let key = CacheKey::derive(&Method::GET, "/api/news");
        store.insert_raw(
            key.as_str(),
            json!({"payload": {"items": [1]}, "is_raw": false}).to_string(),
        );

        let engine = engine(store, StaticUpstream::ok("{}"));
        let response = engine
            .serve(
                ProxyRequest::get("/api/news").with_page(PageRequest::new(1, 5).expect("page")),
            )
            .await
            .expect("hit served");

        let body: Value = serde_json::from_slice(&response.body).expect("json body");
        assert_eq!(body, json!({"items": [1]}));
    }

    #[tokio::test]
    async fn empty_entries_count_as_misses() {
        let store = Arc::new(MemoryStore::new());
        let key = CacheKey::derive(&Method::GET, "/api/news");
        store.insert_raw(key.as_str(), Vec::new());

        let upstream = StaticUpstream::ok(r#"{"fresh":1}"#);
        let engine = engine(store, upstream.clone());
        let response = engine
            .serve(ProxyRequest::get("/api/news"))
            .await
            .expect("served");

        assert_eq!(response.source, ResponseSource::Origin);
        assert_eq!(upstream.calls(), 1);
    }
}
