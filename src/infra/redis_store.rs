//! Redis-backed cache store.

use async_trait::async_trait;
use deadpool_redis::{Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use tracing::info;

use crate::cache::{CacheError, CacheKey, CacheStore};

use super::error::InfraError;

/// Cache store over a pooled Redis connection. Values are stored as plain
/// strings without expiry and overwritten on every refresh.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Build the connection pool. Connections are opened lazily, so an
    /// unreachable server only surfaces on first use.
    pub fn connect(url: &str, pool_size: usize) -> Result<Self, InfraError> {
        let mut config = deadpool_redis::Config::from_url(url);
        config.pool = Some(PoolConfig::new(pool_size));

        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|err| InfraError::cache_store(format!("failed to create pool: {err}")))?;

        info!(
            target = "community_node::redis",
            pool_size, "redis pool created"
        );
        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|err| CacheError::unavailable(err.to_string()))
    }
}

fn command_error(err: redis::RedisError) -> CacheError {
    CacheError::unavailable(err.to_string())
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<Vec<u8>>>(key.as_str())
            .await
            .map_err(command_error)
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.set::<_, _, ()>(key.as_str(), value)
            .await
            .map_err(command_error)
    }

    async fn hash_values(&self, hash: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connection().await?;
        conn.hvals::<_, Vec<String>>(hash)
            .await
            .map_err(command_error)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }
}
