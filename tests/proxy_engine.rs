use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{Method, StatusCode};
use community_node::application::error::GatewayError;
use community_node::application::proxy::{ProxyEngine, ProxyRequest, ResponseSource};
use community_node::application::refresh::RefreshScheduler;
use community_node::application::upstream::Upstream;
use community_node::cache::{CacheEnvelope, CacheKey, CacheStore, CachedPayload, MemoryStore};
use community_node::config::UpstreamSettings;
use community_node::infra::origin::OriginClient;
use httpmock::MockServer;
use time::OffsetDateTime;
use url::Url;

struct Harness {
    store: Arc<MemoryStore>,
    engine: ProxyEngine,
}

fn harness(base_url: &str) -> Harness {
    let origin = OriginClient::new(&UpstreamSettings {
        base_url: Url::parse(base_url).expect("base url"),
        timeout: Duration::from_secs(5),
        max_connections: NonZeroU32::new(8).expect("non-zero"),
        max_idle_connections: 4,
    })
    .expect("origin client");

    let store = Arc::new(MemoryStore::new());
    let cache: Arc<dyn CacheStore> = store.clone();
    let upstream: Arc<dyn Upstream> = Arc::new(origin);
    let refresher = RefreshScheduler::new(cache.clone(), upstream.clone(), 4);

    Harness {
        engine: ProxyEngine::new(cache, upstream, refresher),
        store,
    }
}

fn stored_payload(store: &MemoryStore, path: &str) -> Option<CachedPayload> {
    let key = CacheKey::derive(&Method::GET, path);
    store
        .get_raw(key.as_str())
        .map(|bytes| CacheEnvelope::decode(&bytes).expect("valid envelope").payload)
}

#[tokio::test]
async fn miss_populates_store_and_next_read_is_a_hit() {
    let server = MockServer::start();
    let body = r#"{"data":[{"id":1,"title":"Lũ quét"}],"total":1}"#;
    server.mock(|when, then| {
        when.method("GET")
            .path("/api/news")
            .query_param("page", "1")
            .query_param("limit", "10");
        then.status(200)
            .header("content-type", "application/json")
            .body(body);
    });

    let harness = harness(&server.base_url());
    let path = "/api/news?page=1&limit=10";

    let first = harness
        .engine
        .serve(ProxyRequest::get(path))
        .await
        .expect("miss");
    assert_eq!(first.source, ResponseSource::Origin);
    assert_eq!(first.body, body.as_bytes());
    assert_eq!(
        stored_payload(&harness.store, path),
        Some(CachedPayload::Raw(body.to_string()))
    );

    let second = harness
        .engine
        .serve(ProxyRequest::get(path))
        .await
        .expect("hit");
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.body, first.body);
    assert_eq!(second.content_type, "application/json");

    assert!(
        harness
            .engine
            .refresher()
            .drain(Duration::from_secs(5))
            .await
    );
    assert_eq!(
        stored_payload(&harness.store, path),
        Some(CachedPayload::Raw(body.to_string()))
    );
}

#[tokio::test]
async fn hit_does_not_wait_for_slow_registry_and_refresh_overwrites_entry() {
    let server = MockServer::start();
    let fresh = r#"{"data":[{"id":2}],"total":1}"#;
    let mock = server.mock(|when, then| {
        when.method("GET").path("/api/phones");
        then.status(200)
            .header("content-type", "application/json")
            .body(fresh)
            .delay(Duration::from_millis(800));
    });

    let harness = harness(&server.base_url());
    let path = "/api/phones?page=1&limit=25";
    let stale = r#"{"data":[{"id":1}],"total":1}"#;
    let envelope = CacheEnvelope::raw(
        stale.as_bytes(),
        Some("application/json".to_string()),
        OffsetDateTime::now_utc(),
    )
    .expect("envelope");
    harness.store.insert_raw(
        CacheKey::derive(&Method::GET, path).as_str(),
        envelope.encode().expect("encode"),
    );

    let started = Instant::now();
    let response = harness
        .engine
        .serve(ProxyRequest::get(path))
        .await
        .expect("hit");
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(response.body, stale.as_bytes());

    assert!(
        harness
            .engine
            .refresher()
            .drain(Duration::from_secs(5))
            .await
    );
    mock.assert();
    assert_eq!(
        stored_payload(&harness.store, path),
        Some(CachedPayload::Raw(fresh.to_string()))
    );
}

#[tokio::test]
async fn corrupted_entry_is_refetched_and_replaced() {
    let server = MockServer::start();
    let body = r#"{"data":[],"total":0}"#;
    let mock = server.mock(|when, then| {
        when.method("GET").path("/api/rescue_points");
        then.status(200).body(body);
    });

    let harness = harness(&server.base_url());
    let path = "/api/rescue_points?page=1&limit=25";
    harness.store.insert_raw(
        CacheKey::derive(&Method::GET, path).as_str(),
        b"{not json".to_vec(),
    );

    let response = harness
        .engine
        .serve(ProxyRequest::get(path))
        .await
        .expect("refetched");

    mock.assert();
    assert_eq!(response.source, ResponseSource::Origin);
    assert_eq!(response.body, body.as_bytes());
    assert_eq!(
        stored_payload(&harness.store, path),
        Some(CachedPayload::Raw(body.to_string()))
    );
}

#[tokio::test]
async fn registry_errors_are_forwarded_and_not_cached() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET").path("/api/requests");
        then.status(404)
            .header("content-type", "application/json")
            .body(r#"{"detail":"Region not found"}"#);
    });

    let harness = harness(&server.base_url());
    let path = "/api/requests?page=1&limit=25&region=xyz";

    let err = harness
        .engine
        .serve(ProxyRequest::get(path))
        .await
        .expect_err("not found");

    mock.assert();
    assert_eq!(
        err,
        GatewayError::Upstream {
            status: StatusCode::NOT_FOUND,
            detail: "Region not found".to_string(),
        }
    );
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn unreachable_registry_is_service_unavailable() {
    let harness = harness("http://127.0.0.1:1");

    let err = harness
        .engine
        .serve(ProxyRequest::get("/api/news?page=1&limit=25"))
        .await
        .expect_err("unreachable");

    assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(err.detail().starts_with("Upstream server unavailable"));
    assert!(harness.store.is_empty());
}
