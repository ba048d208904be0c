//! Consumers (C10, spec §4.7): two long-running MQ readers. The request
//! consumer holds one task per partition so same-`user_id` messages stay
//! on one worker in arrival order (per-key ordering falls out of the
//! publisher's partitioning, spec §4.8); the result consumer spawns the
//! same per-partition shape but makes no ordering promise across
//! partitions, matching "concurrent (non-ordered) consumption" since the
//! Orchestrator's row locks already serialize per-transfer work.
//!
//! Grounded on `monitoring-engine/src/mempool` for the per-source-reader
//! task-per-partition shape (absent its block-height logic); the
//! redelivery/dead-letter loop is new, required by spec §4.7/§7 and not
//! present in the teacher.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rskafka::client::consumer::{StartOffset, StreamConsumerBuilder};
use rskafka::client::partition::{PartitionClient, UnknownTopicHandling};
use rskafka::client::{Client, ClientBuilder};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::bus::messages::{BalanceChange, BalanceChangeResult};
use crate::config::McConsumerConfig;
use crate::orchestrator::Orchestrator;
use crate::{Error, Result};

pub struct Consumers {
    orchestrator: Arc<Orchestrator>,
    request_partitions: Vec<Arc<PartitionClient>>,
    result_partitions: Vec<Arc<PartitionClient>>,
    max_redeliveries: u32,
}

impl Consumers {
    pub async fn connect(
        orchestrator: Arc<Orchestrator>,
        brokers: &[String],
        request_topic: &str,
        result_topic: &str,
        partitions: i32,
        config: &McConsumerConfig,
    ) -> Result<Self> {
        info!("connecting consumers to message bus brokers {:?}", brokers);
        let client: Client = ClientBuilder::new(brokers.to_vec())
            .build()
            .await
            .map_err(|e| Error::TransientMq(e.to_string()))?;

        let mut request_partitions = Vec::with_capacity(partitions as usize);
        let mut result_partitions = Vec::with_capacity(partitions as usize);
        for p in 0..partitions {
            request_partitions.push(Arc::new(
                client
                    .partition_client(request_topic, p, UnknownTopicHandling::Error)
                    .await
                    .map_err(|e| Error::TransientMq(e.to_string()))?,
            ));
            result_partitions.push(Arc::new(
                client
                    .partition_client(result_topic, p, UnknownTopicHandling::Error)
                    .await
                    .map_err(|e| Error::TransientMq(e.to_string()))?,
            ));
        }

        Ok(Self {
            orchestrator,
            request_partitions,
            result_partitions,
            max_redeliveries: config.max_redeliveries,
        })
    }

    /// Runs both consumer fleets until `shutdown` reports `true`.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let mut handles = Vec::new();

        for partition_client in &self.request_partitions {
            let partition_client = partition_client.clone();
            let orchestrator = self.orchestrator.clone();
            let max_redeliveries = self.max_redeliveries;
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                Self::run_request_partition(partition_client, orchestrator, max_redeliveries, shutdown).await;
            }));
        }

        for partition_client in &self.result_partitions {
            let partition_client = partition_client.clone();
            let orchestrator = self.orchestrator.clone();
            let max_redeliveries = self.max_redeliveries;
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                Self::run_result_partition(partition_client, orchestrator, max_redeliveries, shutdown).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "consumer task panicked");
            }
        }
    }

    async fn run_request_partition(
        partition_client: Arc<PartitionClient>,
        orchestrator: Arc<Orchestrator>,
        max_redeliveries: u32,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut stream = StreamConsumerBuilder::new(partition_client, StartOffset::Earliest)
            .with_max_wait_ms(1_000)
            .build();

        loop {
            tokio::select! {
                next = stream.next() => {
                    match next {
                        Some(Ok((record_and_offset, _watermark))) => {
                            Self::handle_request_record(&orchestrator, record_and_offset.record.value, max_redeliveries).await;
                        }
                        Some(Err(e)) => error!(error = %e, "request consumer stream error"),
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn run_result_partition(
        partition_client: Arc<PartitionClient>,
        orchestrator: Arc<Orchestrator>,
        max_redeliveries: u32,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut stream = StreamConsumerBuilder::new(partition_client, StartOffset::Earliest)
            .with_max_wait_ms(1_000)
            .build();

        loop {
            tokio::select! {
                next = stream.next() => {
                    match next {
                        Some(Ok((record_and_offset, _watermark))) => {
                            Self::handle_result_record(&orchestrator, record_and_offset.record.value, max_redeliveries).await;
                        }
                        Some(Err(e)) => error!(error = %e, "result consumer stream error"),
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn handle_request_record(
        orchestrator: &Arc<Orchestrator>,
        payload: Option<Vec<u8>>,
        max_redeliveries: u32,
    ) {
        let payload = match payload {
            Some(p) => p,
            None => {
                warn!("request record had no payload, skipping");
                return;
            }
        };
        let msg: BalanceChange = match serde_json::from_slice(&payload) {
            Ok(m) => m,
            Err(e) => {
                error!(error = %e, "failed to decode BalanceChange, dead-lettering");
                return;
            }
        };

        let mut attempt = 0u32;
        loop {
            match orchestrator.on_balance_change_request(msg.clone()).await {
                Ok(()) => return,
                Err(e) if !e.should_nack() => {
                    error!(external_id = msg.external_id, error = %e, "non-retryable error processing balance change request");
                    return;
                }
                Err(e) if attempt < max_redeliveries => {
                    attempt += 1;
                    warn!(
                        external_id = msg.external_id,
                        attempt, error = %e, "negative-acking balance change request for redelivery"
                    );
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
                Err(e) => {
                    error!(
                        external_id = msg.external_id,
                        attempts = attempt, error = %e,
                        "balance change request exhausted redelivery ceiling, dead-lettering"
                    );
                    return;
                }
            }
        }
    }

    async fn handle_result_record(
        orchestrator: &Arc<Orchestrator>,
        payload: Option<Vec<u8>>,
        max_redeliveries: u32,
    ) {
        let payload = match payload {
            Some(p) => p,
            None => {
                warn!("result record had no payload, skipping");
                return;
            }
        };
        let msg: BalanceChangeResult = match serde_json::from_slice(&payload) {
            Ok(m) => m,
            Err(e) => {
                error!(error = %e, "failed to decode BalanceChangeResult, dead-lettering");
                return;
            }
        };

        let mut attempt = 0u32;
        loop {
            match orchestrator.on_balance_change_result(msg.clone()).await {
                Ok(()) => return,
                Err(e) if !e.should_nack() => {
                    error!(external_id = msg.external_id, error = %e, "non-retryable error processing balance change result");
                    return;
                }
                Err(e) if attempt < max_redeliveries => {
                    attempt += 1;
                    warn!(
                        external_id = msg.external_id,
                        attempt, error = %e, "negative-acking balance change result for redelivery"
                    );
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
                Err(e) => {
                    error!(
                        external_id = msg.external_id,
                        attempts = attempt, error = %e,
                        "balance change result exhausted redelivery ceiling, dead-lettering (operator alert: credit redelivery exhausted)"
                    );
                    return;
                }
            }
        }
    }
}
