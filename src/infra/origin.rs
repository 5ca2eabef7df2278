//! HTTP client for the upstream registry.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::http::Method;
use metrics::histogram;
use reqwest::{Client, header::CONTENT_TYPE};
use tokio::sync::Semaphore;
use tracing::debug;
use url::Url;

use crate::application::error::{GatewayError, upstream_detail};
use crate::application::upstream::{Upstream, UpstreamResponse};
use crate::config::UpstreamSettings;

use super::error::InfraError;
use super::telemetry::METRIC_UPSTREAM_REQUEST_MS;

pub fn user_agent() -> &'static str {
    concat!("community-node/", env!("CARGO_PKG_VERSION"))
}

/// Registry client shared by the miss path, background refreshes and diagnostics.
///
/// Simultaneous reads are capped by `max_connections`; callers beyond the cap
/// wait for a slot rather than failing.
#[derive(Clone)]
pub struct OriginClient {
    client: Client,
    base_url: Url,
    permits: Arc<Semaphore>,
}

impl OriginClient {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(settings.timeout)
            .pool_max_idle_per_host(settings.max_idle_connections)
            .build()
            .map_err(|err| InfraError::http_client(format!("failed to build client: {err}")))?;

        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            permits: Arc::new(Semaphore::new(settings.max_connections.get() as usize)),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Absolute URL for a registry path that already carries its query string.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }
}

#[async_trait]
impl Upstream for OriginClient {
    async fn fetch(&self, method: &Method, path: &str) -> Result<UpstreamResponse, GatewayError> {
        if method != Method::GET {
            return Err(GatewayError::UnsupportedMethod(method.clone()));
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| GatewayError::unavailable("registry client is shutting down"))?;

        let started_at = Instant::now();
        let result = self.client.get(self.url(path)).send().await;
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                histogram!(METRIC_UPSTREAM_REQUEST_MS, "outcome" => "unavailable")
                    .record(started_at.elapsed().as_secs_f64() * 1000.0);
                return Err(GatewayError::unavailable(err.to_string()));
            }
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|err| GatewayError::unavailable(err.to_string()))?;

        let outcome = if status.is_client_error() || status.is_server_error() {
            "error"
        } else {
            "ok"
        };
        histogram!(METRIC_UPSTREAM_REQUEST_MS, "outcome" => outcome)
            .record(started_at.elapsed().as_secs_f64() * 1000.0);
        debug!(
            target = "community_node::origin",
            path,
            status = status.as_u16(),
            bytes = body.len(),
            "registry responded"
        );

        if outcome == "error" {
            return Err(GatewayError::Upstream {
                status,
                detail: upstream_detail(&body),
            });
        }

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;
    use std::time::Duration;

    use axum::http::StatusCode;
    use httpmock::MockServer;

    use super::*;

    fn client(base_url: &str) -> OriginClient {
        OriginClient::new(&UpstreamSettings {
            base_url: Url::parse(base_url).expect("base url"),
            timeout: Duration::from_secs(5),
            max_connections: NonZeroU32::new(4).expect("non-zero"),
            max_idle_connections: 2,
        })
        .expect("client")
    }

    #[tokio::test]
    async fn success_bodies_pass_through_unchanged() {
        let server = MockServer::start();
        let body = r#"{"data":[{"title":"Sạt lở"}],"total":1}"#;
        let mock = server.mock(|when, then| {
            when.method("GET")
                .path("/api/news")
                .query_param("page", "1")
                .query_param("search", "lũ");
            then.status(200)
                .header("content-type", "application/json; charset=utf-8")
                .body(body);
        });

        let response = client(&server.base_url())
            .fetch(&Method::GET, "/api/news?page=1&search=l%C5%A9")
            .await
            .expect("success");

        mock.assert();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, body.as_bytes());
        assert_eq!(
            response.content_type.as_deref(),
            Some("application/json; charset=utf-8")
        );
    }

    #[tokio::test]
    async fn error_statuses_carry_the_registry_detail() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/api/phones");
            then.status(404)
                .header("content-type", "application/json")
                .body(r#"{"detail":"not found"}"#);
        });
        server.mock(|when, then| {
            when.method("GET").path("/api/news");
            then.status(500);
        });

        let origin = client(&server.base_url());

        let err = origin
            .fetch(&Method::GET, "/api/phones")
            .await
            .expect_err("404");
        assert_eq!(
            err,
            GatewayError::Upstream {
                status: StatusCode::NOT_FOUND,
                detail: "not found".into(),
            }
        );

        let err = origin
            .fetch(&Method::GET, "/api/news")
            .await
            .expect_err("500");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.detail(), "Error from upstream server");
    }

    #[tokio::test]
    async fn refused_connections_are_unavailable() {
        let err = client("http://127.0.0.1:1")
            .fetch(&Method::GET, "/api/news")
            .await
            .expect_err("refused");

        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.detail().starts_with("Upstream server unavailable: "));
    }

    #[tokio::test]
    async fn non_read_methods_never_leave_the_process() {
        let err = client("http://127.0.0.1:1")
            .fetch(&Method::DELETE, "/api/news")
            .await
            .expect_err("rejected");

        assert_eq!(err, GatewayError::UnsupportedMethod(Method::DELETE));
    }

    #[test]
    fn urls_keep_base_path_prefix() {
        let origin = client("http://registry.local/sos/");
        assert_eq!(
            origin.url("/api/news?page=1"),
            "http://registry.local/sos/api/news?page=1"
        );
    }
}
