//! Key/value backend seam for cached envelopes.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use super::envelope::EnvelopeError;
use super::keys::CacheKey;

/// Failures reaching or reading the cache store.
///
/// The proxy never surfaces these to callers: a failed lookup is a miss and a
/// failed write leaves the previous entry (if any) in place.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store unavailable: {message}")]
    Unavailable { message: String },
    #[error("cache entry corrupted: {0}")]
    Corrupted(#[from] EnvelopeError),
}

impl CacheError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError>;

    /// Overwrite the entry for `key`.
    async fn set(&self, key: &CacheKey, value: Vec<u8>) -> Result<(), CacheError>;

    /// All values of the hash stored under `hash`.
    async fn hash_values(&self, hash: &str) -> Result<Vec<String>, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Process-local store. Contents do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Vec<u8>>,
    hashes: DashMap<String, DashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bytes under an arbitrary key, bypassing envelope encoding.
    pub fn insert_raw(&self, key: &str, value: impl Into<Vec<u8>>) {
        self.entries.insert(key.to_string(), value.into());
    }

    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn hash_insert(&self, hash: &str, field: &str, value: &str) {
        self.hashes
            .entry(hash.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.get_raw(key.as_str()))
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>) -> Result<(), CacheError> {
        self.entries.insert(key.as_str().to_string(), value);
        Ok(())
    }

    async fn hash_values(&self, hash: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .hashes
            .get(hash)
            .map(|fields| fields.iter().map(|field| field.value().clone()).collect())
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
