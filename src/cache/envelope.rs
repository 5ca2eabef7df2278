//! Versioned wrapper persisted around each cached response body.
//!
//! Wire form (JSON):
//!
//! ```json
//! {"version":1,"payload":"<body text>","is_raw":true,"timestamp":1735689600.25,"content_type":"application/json"}
//! ```
//!
//! `is_raw = true` entries carry the upstream body verbatim as text. Entries with
//! `is_raw = false`, or bare JSON documents without the wrapper, decode into a
//! structured payload that the pagination overlay can slice.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

pub const ENVELOPE_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("upstream body is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("cached entry is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("raw cached entry payload must be a string")]
    RawPayloadNotText,
    #[error("cached entry uses unsupported envelope version {0}")]
    UnsupportedVersion(u64),
}

/// Body held by a cache entry.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedPayload {
    /// Upstream bytes re-decoded as text, replayed unchanged.
    Raw(String),
    /// A parsed JSON document.
    Structured(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEnvelope {
    pub payload: CachedPayload,
    pub content_type: Option<String>,
    pub stored_at: OffsetDateTime,
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    version: u8,
    payload: &'a Value,
    is_raw: bool,
    timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
}

#[derive(Deserialize)]
struct StoredEnvelope {
    #[serde(default)]
    version: Option<u64>,
    payload: Value,
    #[serde(default)]
    is_raw: bool,
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    content_type: Option<String>,
}

impl CacheEnvelope {
    /// Wrap an upstream body as a raw entry. Fails when the body is not UTF-8 text.
    pub fn raw(
        body: &[u8],
        content_type: Option<String>,
        stored_at: OffsetDateTime,
    ) -> Result<Self, EnvelopeError> {
        let text = std::str::from_utf8(body)?;
        Ok(Self {
            payload: CachedPayload::Raw(text.to_string()),
            content_type,
            stored_at,
        })
    }

    pub fn is_raw(&self) -> bool {
        matches!(self.payload, CachedPayload::Raw(_))
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        let (payload, is_raw) = match &self.payload {
            CachedPayload::Raw(text) => (Value::String(text.clone()), true),
            CachedPayload::Structured(value) => (value.clone(), false),
        };

        let wire = WireEnvelope {
            version: ENVELOPE_VERSION,
            payload: &payload,
            is_raw,
            timestamp: unix_seconds(self.stored_at),
            content_type: self.content_type.as_deref(),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let document: Value = serde_json::from_slice(bytes)?;

        let wrapped = document
            .as_object()
            .is_some_and(|object| object.contains_key("payload"));
        if !wrapped {
            return Ok(Self {
                payload: CachedPayload::Structured(document),
                content_type: None,
                stored_at: OffsetDateTime::UNIX_EPOCH,
            });
        }

        let stored: StoredEnvelope = serde_json::from_value(document)?;
        if let Some(version) = stored
            .version
            .filter(|version| *version > u64::from(ENVELOPE_VERSION))
        {
            return Err(EnvelopeError::UnsupportedVersion(version));
        }

        let payload = if stored.is_raw {
            match stored.payload {
                Value::String(text) => CachedPayload::Raw(text),
                _ => return Err(EnvelopeError::RawPayloadNotText),
            }
        } else {
            CachedPayload::Structured(stored.payload)
        };

        Ok(Self {
            payload,
            content_type: stored.content_type,
            stored_at: stored
                .timestamp
                .map(from_unix_seconds)
                .unwrap_or(OffsetDateTime::UNIX_EPOCH),
        })
    }
}

fn unix_seconds(at: OffsetDateTime) -> f64 {
    at.unix_timestamp_nanos() as f64 / 1_000_000_000.0
}

fn from_unix_seconds(seconds: f64) -> OffsetDateTime {
    let nanos = (seconds * 1_000_000_000.0) as i128;
    OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
