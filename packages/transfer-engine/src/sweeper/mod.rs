//! Sweeper (C7, spec §4.5/§9): three periodic, lease-gated jobs driven by
//! one ticker, per the design note "`@Scheduled + @Lock` composition ->
//! represent each periodic job as `{schedule, lease_name, max_hold,
//! min_hold, action}` tuples driven by a single ticker that runs them
//! cooperatively; no hidden container threads." Grounded structurally on
//! `monitoring-engine/src/main.rs`'s `tokio::select!` shutdown race,
//! generalized from a one-shot API-server-vs-ctrl_c race into a
//! recurring tick-vs-shutdown race.

use std::time::{Duration, Instant};

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::SweepConfig;
use crate::ledger::models::TransferStatus;
use crate::lock::LeaseStore;
use crate::orchestrator::Orchestrator;

pub struct Sweeper {
    orchestrator: Arc<Orchestrator>,
    lock: Arc<dyn LeaseStore>,
    config: SweepConfig,
}

impl Sweeper {
    pub fn new(orchestrator: Arc<Orchestrator>, lock: Arc<dyn LeaseStore>, config: SweepConfig) -> Self {
        Self {
            orchestrator,
            lock,
            config,
        }
    }

    /// Runs until `shutdown` reports `true`. A single 1-second ticker
    /// evaluates all three jobs; each fires only once its own period has
    /// elapsed, so three different periods share one timer source.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let now = Instant::now();
        let mut last_pending = now;
        let mut last_debit_processing = now;
        let mut last_credit_processing = now;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if last_pending.elapsed() >= Duration::from_secs(self.config.pending.period_seconds) {
                        last_pending = Instant::now();
                        self.tick_pending().await;
                    }
                    if last_debit_processing.elapsed() >= Duration::from_secs(self.config.debit_processing.period_seconds) {
                        last_debit_processing = Instant::now();
                        self.tick_debit_processing().await;
                    }
                    if last_credit_processing.elapsed() >= Duration::from_secs(self.config.credit_processing.period_seconds) {
                        last_credit_processing = Instant::now();
                        self.tick_credit_processing().await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("sweeper received shutdown signal, stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn tick_pending(&self) {
        let job = &self.config.pending;
        match self
            .lock
            .acquire(
                "sweep:processPendingTransfers",
                job.lock_at_most_seconds,
                job.lock_at_least_seconds,
            )
            .await
        {
            Ok(Some(lease)) => {
                match self.orchestrator.sweep_pending(job.delay_seconds, job.batch_size).await {
                    Ok(n) if n > 0 => info!(advanced = n, "processPendingTransfers"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "processPendingTransfers failed"),
                }
                if let Err(e) = self.lock.release(&lease).await {
                    warn!(error = %e, "failed to release processPendingTransfers lease");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to acquire processPendingTransfers lease"),
        }
    }

    async fn tick_debit_processing(&self) {
        let job = &self.config.debit_processing;
        match self
            .lock
            .acquire(
                "sweep:processDebitProcessingTransfers",
                job.lock_at_most_seconds,
                job.lock_at_least_seconds,
            )
            .await
        {
            Ok(Some(lease)) => {
                match self
                    .orchestrator
                    .sweep_stale(TransferStatus::DebitProcessing, job.delay_seconds, job.batch_size)
                    .await
                {
                    Ok(n) if n > 0 => info!(redriven = n, "processDebitProcessingTransfers"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "processDebitProcessingTransfers failed"),
                }
                if let Err(e) = self.lock.release(&lease).await {
                    warn!(error = %e, "failed to release processDebitProcessingTransfers lease");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to acquire processDebitProcessingTransfers lease"),
        }
    }

    async fn tick_credit_processing(&self) {
        let job = &self.config.credit_processing;
        match self
            .lock
            .acquire(
                "sweep:processCreditProcessingTransfers",
                job.lock_at_most_seconds,
                job.lock_at_least_seconds,
            )
            .await
        {
            Ok(Some(lease)) => {
                match self
                    .orchestrator
                    .sweep_stale(TransferStatus::CreditProcessing, job.delay_seconds, job.batch_size)
                    .await
                {
                    Ok(n) if n > 0 => info!(redriven = n, "processCreditProcessingTransfers"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "processCreditProcessingTransfers failed"),
                }
                if let Err(e) = self.lock.release(&lease).await {
                    warn!(error = %e, "failed to release processCreditProcessingTransfers lease");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to acquire processCreditProcessingTransfers lease"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::BalanceMutator;
    use crate::bus::fake::InMemoryBus;
    use crate::bus::MessageBus;
    use crate::cache::fake::InMemoryCache;
    use crate::cache::Cache;
    use crate::events::EventDispatcher;
    use crate::ledger::fake::InMemoryLedger;
    use crate::ledger::LedgerStore;
    use crate::lock::fake::InMemoryLeaseStore;
    use rust_decimal::Decimal;

    fn sweeper() -> (Sweeper, Arc<InMemoryBus>, Arc<dyn LedgerStore>) {
        let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedger::new());
        let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
        let bus = Arc::new(InMemoryBus::new());
        let bus_dyn: Arc<dyn MessageBus> = bus.clone();
        let events = Arc::new(EventDispatcher::new(cache.clone(), bus_dyn.clone()));
        let transfer = Arc::new(crate::transfer::TransferEngine::new(ledger.clone(), events.clone(), 600));
        let mutator = Arc::new(BalanceMutator::new(ledger.clone(), events));
        let orchestrator = Arc::new(Orchestrator::new(transfer, mutator, ledger.clone(), cache, bus_dyn));
        let lock: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
        (Sweeper::new(orchestrator, lock, SweepConfig::default()), bus, ledger)
    }

    #[tokio::test]
    async fn tick_pending_publishes_a_debit_request_for_a_due_transfer() {
        let (sweeper, bus, ledger) = sweeper();
        ledger.create_account("alice", Decimal::new(100000, 2)).await.unwrap();
        ledger.create_account("bob", Decimal::new(0, 2)).await.unwrap();
        ledger.create_transfer("alice", "bob", Decimal::new(10000, 2)).await.unwrap();

        sweeper.tick_pending().await;
        assert_eq!(bus.published_requests().len(), 1);
    }
}
