//! In-memory Message Bus, for unit and integration tests. Captures
//! published messages in arrival order so tests can assert on what would
//! have gone out over the wire.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::Result;

use super::messages::{BalanceChange, BalanceChangeResult};
use super::MessageBus;

#[derive(Default)]
pub struct InMemoryBus {
    requests: Mutex<Vec<BalanceChange>>,
    results: Mutex<Vec<BalanceChangeResult>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published_requests(&self) -> Vec<BalanceChange> {
        self.requests.lock().unwrap().clone()
    }

    pub fn published_results(&self) -> Vec<BalanceChangeResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn drain_requests(&self) -> Vec<BalanceChange> {
        std::mem::take(&mut self.requests.lock().unwrap())
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish_request(&self, msg: BalanceChange) -> Result<()> {
        self.requests.lock().unwrap().push(msg);
        Ok(())
    }

    async fn publish_result(&self, msg: BalanceChangeResult) -> Result<()> {
        self.results.lock().unwrap().push(msg);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::messages::BalanceChangeKind;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn publish_request_is_recorded_in_order() {
        let bus = InMemoryBus::new();
        bus.publish_request(BalanceChange {
            external_id: 1,
            kind: BalanceChangeKind::TransferOut,
            user_id: "alice".to_string(),
            amount: Decimal::new(-100, 2),
            related_id: 1,
            timestamp: 0,
        })
        .await
        .unwrap();
        assert_eq!(bus.published_requests().len(), 1);
    }
}
