// Common test utilities and helpers

use std::sync::Arc;

use transfer_engine::bus::fake::InMemoryBus;
use transfer_engine::bus::MessageBus;
use transfer_engine::cache::fake::InMemoryCache;
use transfer_engine::cache::Cache;
use transfer_engine::events::EventDispatcher;
use transfer_engine::ledger::fake::InMemoryLedger;
use transfer_engine::ledger::LedgerStore;
use transfer_engine::orchestrator::Orchestrator;
use transfer_engine::balance::BalanceMutator;
use transfer_engine::transfer::TransferEngine;

/// One fully wired in-process stack, built from the same fakes the crate's
/// own inline tests use, so scenarios from spec.md §8 can run without a
/// database, cache, or broker.
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub transfer: Arc<TransferEngine>,
    pub balance: Arc<BalanceMutator>,
    pub ledger: Arc<dyn LedgerStore>,
    pub cache: Arc<dyn Cache>,
    pub bus: Arc<InMemoryBus>,
}

/// Cancellation window used by every scenario unless a test cares about it
/// specifically (spec.md §9's resolved open question: 10 minutes).
pub const CANCELLATION_WINDOW_SECONDS: i64 = 600;

pub fn harness() -> Harness {
    let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedger::new());
    let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
    let bus = Arc::new(InMemoryBus::new());
    let bus_dyn: Arc<dyn MessageBus> = bus.clone();

    let events = Arc::new(EventDispatcher::new(cache.clone(), bus_dyn.clone()));
    let transfer = Arc::new(TransferEngine::new(
        ledger.clone(),
        events.clone(),
        CANCELLATION_WINDOW_SECONDS,
    ));
    let balance = Arc::new(BalanceMutator::new(ledger.clone(), events));
    let orchestrator = Arc::new(Orchestrator::new(
        transfer.clone(),
        balance.clone(),
        ledger.clone(),
        cache.clone(),
        bus_dyn,
    ));

    Harness {
        orchestrator,
        transfer,
        balance,
        ledger,
        cache,
        bus,
    }
}

/// Drive a transfer all the way to a terminal state using only the bus
/// messages and the orchestrator's public handlers, the way the request and
/// result consumers (C10) would in production: sweep publishes the debit
/// request, the debit is applied and its result consumed, the credit
/// request is published and applied, and its result is consumed.
///
/// Returns once the transfer reaches COMPLETED or DEBIT_FAILED, or after
/// `max_hops` request/result round trips, whichever comes first.
pub async fn drive_to_terminal(h: &Harness, transfer_id: i64, max_hops: usize) {
    for _ in 0..max_hops {
        let transfer = h.ledger.get_transfer(transfer_id).await.unwrap().expect("transfer must exist");
        if transfer.status.is_terminal() {
            return;
        }

        for request in h.bus.drain_requests() {
            h.orchestrator
                .on_balance_change_request(request.clone())
                .await
                .unwrap();
            let mutation = h
                .ledger
                .find_mutation(request.external_id, request.kind.to_mutation_type())
                .await
                .unwrap()
                .expect("mutation should exist right after on_balance_change_request");
            let result = transfer_engine::bus::messages::BalanceChangeResult {
                external_id: mutation.external_id,
                kind: request.kind,
                success: mutation.status == transfer_engine::ledger::models::MutationStatus::Completed,
                user_id: mutation.user_id.clone(),
                old_balance: mutation.balance_before,
                new_balance: mutation.balance_after,
                failure_reason: mutation.failure_reason.clone(),
                timestamp: 0,
            };
            let _ = h.orchestrator.on_balance_change_result(result).await;
        }
    }
}
