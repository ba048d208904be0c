//! Cache (C2, spec §3/§5): a derived, TTL-bounded projection of
//! `UserAccount.balance`. Writer is the Event Dispatcher (invalidation
//! only, §4.6); readers are the Orchestrator's advisory balance checks.
//! Grounded on `monitoring-engine/src/database/mod.rs`'s pool-holder
//! style, generalized from a Postgres pool to a `redis` multiplexed
//! connection.

pub mod fake;

use async_trait::async_trait;
use redis::AsyncCommands;
use rust_decimal::Decimal;
use tracing::warn;

use crate::{Error, Result};

#[async_trait]
pub trait Cache: Send + Sync {
    /// Read the cached balance for `user_id`, if present and unexpired.
    async fn get_balance(&self, user_id: &str) -> Result<Option<Decimal>>;
    /// Populate the cache with a fresh reading, bounding staleness to
    /// `ttl_seconds` (spec §6.4, default 300).
    async fn set_balance(&self, user_id: &str, balance: Decimal, ttl_seconds: u64) -> Result<()>;
    /// Remove the cached entry for `user_id`. Idempotent: invalidating an
    /// absent key is not an error.
    async fn invalidate(&self, user_id: &str) -> Result<()>;

    /// Checks connectivity to the backing store (spec.md's supplemented
    /// `/healthz` surface).
    async fn health_check(&self) -> Result<bool>;
}

pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Config(format!("invalid redis url: {}", e)))?;
        Ok(Self { client })
    }

    fn key(user_id: &str) -> String {
        format!("balance:{}", user_id)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_balance(&self, user_id: &str) -> Result<Option<Decimal>> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::TransientCache(e.to_string()))?;
        let raw: Option<String> = conn
            .get(Self::key(user_id))
            .await
            .map_err(|e| Error::TransientCache(e.to_string()))?;
        match raw {
            Some(s) => s
                .parse::<Decimal>()
                .map(Some)
                .map_err(|e| Error::TransientCache(format!("corrupt cache entry: {}", e))),
            None => Ok(None),
        }
    }

    async fn set_balance(&self, user_id: &str, balance: Decimal, ttl_seconds: u64) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::TransientCache(e.to_string()))?;
        conn.set_ex::<_, _, ()>(Self::key(user_id), balance.to_string(), ttl_seconds)
            .await
            .map_err(|e| Error::TransientCache(e.to_string()))?;
        Ok(())
    }

    async fn invalidate(&self, user_id: &str) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::TransientCache(e.to_string()))?;
        let result: redis::RedisResult<()> = conn.del(Self::key(user_id)).await;
        if let Err(e) = result {
            warn!("cache invalidation failed for {}: {}", user_id, e);
            return Err(Error::TransientCache(e.to_string()));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.get_multiplexed_async_connection().await {
            Ok(mut conn) => match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
                Ok(_) => Ok(true),
                Err(e) => {
                    tracing::error!("cache health check failed: {}", e);
                    Ok(false)
                }
            },
            Err(e) => {
                tracing::error!("cache health check connection failed: {}", e);
                Ok(false)
            }
        }
    }
}
