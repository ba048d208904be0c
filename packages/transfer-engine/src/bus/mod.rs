//! Message Bus (C4, spec §4.7/§4.8): at-least-once delivery across the
//! request and result topics. This trait covers publish only; the
//! per-key ordering guarantee is a property of partition assignment, and
//! the two consumer loops (§4.7) talk to `rskafka` directly since they
//! have no unit-testable surface beyond what `orchestrator`/`consumers`
//! already cover with the fake bus.
//!
//! Grounded on `monitoring-engine/src/hyperbridge` message-relay pattern
//! for the publish-with-retry shape; the floored-modulus partitioner is
//! new, required by spec §4.8 and absent from the teacher.

pub mod fake;
pub mod messages;

use async_trait::async_trait;
use rskafka::client::partition::{Compression, UnknownTopicHandling};
use rskafka::client::{Client, ClientBuilder};
use rskafka::record::Record;
use tracing::info;

use crate::{Error, Result};

use messages::{BalanceChange, BalanceChangeResult};

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish_request(&self, msg: BalanceChange) -> Result<()>;
    async fn publish_result(&self, msg: BalanceChangeResult) -> Result<()>;
}

/// Floored modulus: always non-negative for any signed `hash`, unlike
/// Rust's `%` which carries the dividend's sign. Spec §4.8/§9: "the
/// source already hit and fixed this bug, it is a landmine to preserve."
pub fn floored_mod(hash: i64, partitions: i64) -> i64 {
    ((hash % partitions) + partitions) % partitions
}

fn partition_for_key(key: &str, partitions: i32) -> i32 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    let h = hasher.finish() as i64;
    floored_mod(h, partitions as i64) as i32
}

pub struct KafkaBus {
    request_partitions: Vec<rskafka::client::partition::PartitionClient>,
    result_partitions: Vec<rskafka::client::partition::PartitionClient>,
}

impl KafkaBus {
    pub async fn connect(
        brokers: &[String],
        request_topic: &str,
        result_topic: &str,
        partitions: i32,
    ) -> Result<Self> {
        info!("connecting to message bus brokers {:?}", brokers);
        let client: Client = ClientBuilder::new(brokers.to_vec())
            .build()
            .await
            .map_err(|e| Error::TransientMq(e.to_string()))?;

        let mut request_partitions = Vec::with_capacity(partitions as usize);
        let mut result_partitions = Vec::with_capacity(partitions as usize);
        for p in 0..partitions {
            request_partitions.push(
                client
                    .partition_client(request_topic, p, UnknownTopicHandling::Error)
                    .await
                    .map_err(|e| Error::TransientMq(e.to_string()))?,
            );
            result_partitions.push(
                client
                    .partition_client(result_topic, p, UnknownTopicHandling::Error)
                    .await
                    .map_err(|e| Error::TransientMq(e.to_string()))?,
            );
        }

        Ok(Self {
            request_partitions,
            result_partitions,
        })
    }

    fn record_for(payload: Vec<u8>, key: Vec<u8>) -> Record {
        Record {
            key: Some(key),
            value: Some(payload),
            headers: Default::default(),
            timestamp: chrono::Utc::now(),
        }
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    async fn publish_request(&self, msg: BalanceChange) -> Result<()> {
        let idx = partition_for_key(&msg.user_id, self.request_partitions.len() as i32);
        let payload = serde_json::to_vec(&msg).map_err(|e| Error::TransientMq(e.to_string()))?;
        let record = Self::record_for(payload, msg.user_id.clone().into_bytes());
        self.request_partitions[idx as usize]
            .produce(vec![record], Compression::NoCompression)
            .await
            .map_err(|e| Error::TransientMq(e.to_string()))?;
        Ok(())
    }

    async fn publish_result(&self, msg: BalanceChangeResult) -> Result<()> {
        let idx = partition_for_key(&msg.user_id, self.result_partitions.len() as i32);
        let payload = serde_json::to_vec(&msg).map_err(|e| Error::TransientMq(e.to_string()))?;
        let record = Self::record_for(payload, msg.user_id.clone().into_bytes());
        self.result_partitions[idx as usize]
            .produce(vec![record], Compression::NoCompression)
            .await
            .map_err(|e| Error::TransientMq(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floored_mod_is_non_negative_for_negative_hashes() {
        assert_eq!(floored_mod(-1, 8), 7);
        assert_eq!(floored_mod(-8, 8), 0);
        assert_eq!(floored_mod(-9, 8), 7);
        assert_eq!(floored_mod(15, 8), 7);
    }

    #[test]
    fn partition_for_key_is_stable_for_the_same_key() {
        let a = partition_for_key("alice", 16);
        let b = partition_for_key("alice", 16);
        assert_eq!(a, b);
        assert!(a >= 0 && a < 16);
    }
}
