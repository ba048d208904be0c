//! In-memory Cache, for unit and integration tests. TTL is tracked with a
//! stored expiry instant rather than relying on a real clock source tick.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::Result;

use super::Cache;

struct Entry {
    balance: Decimal,
    expires_at: Instant,
}

pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get_balance(&self, user_id: &str) -> Result<Option<Decimal>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(user_id) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.balance)),
            Some(_) => {
                entries.remove(user_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_balance(&self, user_id: &str, balance: Decimal, ttl_seconds: u64) -> Result<()> {
        self.entries.lock().unwrap().insert(
            user_id.to_string(),
            Entry {
                balance,
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn invalidate(&self, user_id: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(user_id);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
