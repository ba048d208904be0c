//! Lock Service (C3, spec §5.1): a named distributed lease with
//! independent at-most/at-least hold durations. `RedisLeaseStore` uses
//! `SET NX PX` for non-blocking acquisition; release does not delete the
//! key but instead shortens its TTL down to `at_least_for`, so the name
//! stays reserved for that floor even when the job finishes early (spec
//! §5.1: "prevents a fast-completing job from starting again on another
//! replica before its period elapses"). A Lua compare-and-extend script
//! keeps this change fenced to the token's own holder, so a replica can
//! never touch a lease it no longer holds (e.g. after its own
//! `at_most_for` expired and another replica re-acquired the name).

pub mod fake;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{Error, Result};

/// A held lease; `token` fences `release` against a different holder,
/// and `at_least_for_seconds` is carried along so `release` knows how
/// long to keep the name reserved afterward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub name: String,
    pub token: String,
    pub at_least_for_seconds: u64,
}

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Non-blocking: returns `None` immediately if the lease is held
    /// elsewhere, or still within another holder's post-release
    /// `at_least_for` floor (spec §5.1, "acquisition is non-blocking").
    async fn acquire(
        &self,
        name: &str,
        at_most_for_seconds: u64,
        at_least_for_seconds: u64,
    ) -> Result<Option<Lease>>;

    /// Release is a courtesy early-unlock; it is safe to skip it and let
    /// `at_most_for` expire, but releasing promptly lets another replica
    /// re-acquire sooner once `at_least_for` has elapsed, rather than
    /// waiting out the rest of `at_most_for`.
    async fn release(&self, lease: &Lease) -> Result<()>;

    /// Checks connectivity to the backing store, independent of any
    /// particular lease (spec.md's supplemented `/healthz` surface).
    async fn health_check(&self) -> Result<bool>;
}

/// Compare-and-extend: only the token's own holder may shorten the key's
/// TTL down to `at_least_for`. `PEXPIRE` with 0 deletes the key outright,
/// so `at_least_for_seconds == 0` degenerates to the old delete-on-release
/// behavior.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

pub struct RedisLeaseStore {
    client: redis::Client,
}

impl RedisLeaseStore {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Config(format!("invalid redis url: {}", e)))?;
        Ok(Self { client })
    }

    fn key(name: &str) -> String {
        format!("lease:{}", name)
    }
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn acquire(
        &self,
        name: &str,
        at_most_for_seconds: u64,
        at_least_for_seconds: u64,
    ) -> Result<Option<Lease>> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        let token = Uuid::new_v4().to_string();

        let acquired: bool = redis::cmd("SET")
            .arg(Self::key(name))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(at_most_for_seconds * 1000)
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map(|v| v.is_some())
            .map_err(|e| Error::TransientStorage(e.to_string()))?;

        if acquired {
            Ok(Some(Lease {
                name: name.to_string(),
                token,
                at_least_for_seconds,
            }))
        } else {
            Ok(None)
        }
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        redis::Script::new(RELEASE_SCRIPT)
            .key(Self::key(&lease.name))
            .arg(&lease.token)
            .arg(lease.at_least_for_seconds * 1000)
            .invoke_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.get_multiplexed_async_connection().await {
            Ok(mut conn) => match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
                Ok(_) => Ok(true),
                Err(e) => {
                    tracing::error!("lock service health check failed: {}", e);
                    Ok(false)
                }
            },
            Err(e) => {
                tracing::error!("lock service health check connection failed: {}", e);
                Ok(false)
            }
        }
    }
}
