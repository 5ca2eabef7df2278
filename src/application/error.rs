use std::error::Error as StdError;

use axum::http::{Method, StatusCode};
use axum::response::Response;
use thiserror::Error;

use crate::{domain::error::DomainError, infra::error::InfraError};

pub const DEFAULT_UPSTREAM_DETAIL: &str = "Error from upstream server";

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Failures talking to the registry on behalf of a caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Only reads go through the caching path.
    #[error("method `{0}` is not supported by the caching path")]
    UnsupportedMethod(Method),
    /// The registry could not be reached (timeout, refused connection, DNS).
    #[error("Upstream server unavailable: {message}")]
    UpstreamUnavailable { message: String },
    /// The registry answered with an application error.
    #[error("upstream responded with {status}: {detail}")]
    Upstream { status: StatusCode, detail: String },
}

impl GatewayError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::UnsupportedMethod(_) => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Upstream { status, .. } => *status,
        }
    }

    /// Message shown to callers in the `detail` field.
    pub fn detail(&self) -> String {
        match self {
            GatewayError::UnsupportedMethod(_) => "Method not allowed".to_string(),
            GatewayError::UpstreamUnavailable { .. } => self.to_string(),
            GatewayError::Upstream { detail, .. } => detail.clone(),
        }
    }
}

/// Extract the human-readable detail from an upstream error body.
///
/// JSON objects yield their `detail` field (or a generic message when it is
/// missing); anything else is returned as text.
pub fn upstream_detail(body: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(object)) => match object.get("detail") {
            Some(serde_json::Value::String(detail)) => detail.clone(),
            Some(other) => other.to_string(),
            None => DEFAULT_UPSTREAM_DETAIL.to_string(),
        },
        _ => {
            let text = String::from_utf8_lossy(body);
            if text.trim().is_empty() {
                DEFAULT_UPSTREAM_DETAIL.to_string()
            } else {
                text.into_owned()
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_prefers_json_detail_field() {
        assert_eq!(upstream_detail(br#"{"detail":"not found"}"#), "not found");
    }

    #[test]
    fn detail_falls_back_for_objects_without_detail() {
        assert_eq!(upstream_detail(br#"{"error":"x"}"#), DEFAULT_UPSTREAM_DETAIL);
    }

    #[test]
    fn detail_serialises_structured_details() {
        assert_eq!(
            upstream_detail(br#"{"detail":[{"loc":["query","page"]}]}"#),
            r#"[{"loc":["query","page"]}]"#
        );
    }

    #[test]
    fn detail_uses_text_bodies() {
        assert_eq!(upstream_detail(b"Bad Gateway"), "Bad Gateway");
        assert_eq!(upstream_detail(b"[1,2]"), "[1,2]");
        assert_eq!(upstream_detail(b""), DEFAULT_UPSTREAM_DETAIL);
    }

    #[test]
    fn gateway_errors_map_to_status_codes() {
        let not_found = GatewayError::Upstream {
            status: StatusCode::NOT_FOUND,
            detail: "not found".into(),
        };
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.detail(), "not found");

        let down = GatewayError::unavailable("connection refused");
        assert_eq!(down.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            down.detail(),
            "Upstream server unavailable: connection refused"
        );

        assert_eq!(
            GatewayError::UnsupportedMethod(Method::POST).status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
