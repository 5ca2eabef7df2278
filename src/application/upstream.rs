//! Seam between the proxy and the registry it mirrors.

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use bytes::Bytes;

use super::error::GatewayError;

/// A successful (status < 400) registry response, body untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Issue a read against `path` (path plus query, relative to the registry base).
    ///
    /// Non-read methods fail with [`GatewayError::UnsupportedMethod`] without any
    /// network traffic.
    async fn fetch(&self, method: &Method, path: &str) -> Result<UpstreamResponse, GatewayError>;
}
