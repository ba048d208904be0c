//! Event Dispatcher (C9, spec §4.6): two post-commit listeners that
//! decouple the write path from its side effects. Grounded on
//! `monitoring-engine/src/alerts/mod.rs`'s `AlertManager` — that type
//! buffered in-process records and fanned them out to a webhook; this
//! type buffers nothing (events are consumed synchronously by their one
//! caller) and fans out to the Cache and Message Bus instead.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::bus::messages::{BalanceChangeKind, BalanceChangeResult};
use crate::bus::MessageBus;
use crate::cache::Cache;
use crate::ledger::models::{BalanceMutation, MutationStatus, TransferStatus};

/// `StatusChanged` (spec §4.2/§4.6.2): observability-only by itself. The
/// caller that advanced the transfer (a sweep tick or the result-handling
/// path) is responsible for publishing the corresponding request message;
/// this dispatcher does not re-derive that decision from the event.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferStatusChanged {
    pub transfer_id: i64,
    pub from: Option<TransferStatus>,
    pub to: TransferStatus,
}

pub struct EventDispatcher {
    cache: Arc<dyn Cache>,
    bus: Arc<dyn MessageBus>,
}

impl EventDispatcher {
    pub fn new(cache: Arc<dyn Cache>, bus: Arc<dyn MessageBus>) -> Self {
        Self { cache, bus }
    }

    /// Listener 2 (spec §4.6): observability only.
    pub async fn transfer_status_changed(&self, event: TransferStatusChanged) {
        info!(
            transfer_id = event.transfer_id,
            from = ?event.from,
            to = ?event.to,
            "transfer status changed"
        );
    }

    /// Listener 1 (spec §4.6): invalidate-then-publish, on the mutation
    /// row produced by `BalanceMutator::debit`/`credit`. Both steps are
    /// best-effort: their failures are logged, never propagated, since
    /// the owning transaction has already committed and there is nothing
    /// left to roll back.
    pub async fn balance_mutation_completed(&self, mutation: &BalanceMutation) {
        if mutation.status == MutationStatus::Completed {
            if let Err(e) = self.cache.invalidate(&mutation.user_id).await {
                warn!(
                    user_id = %mutation.user_id,
                    error = %e,
                    "cache invalidation failed after balance mutation, proceeding to publish anyway"
                );
            }
        }

        let kind = match BalanceChangeKind::from_mutation_type(mutation.mutation_type) {
            Some(k) => k,
            None => {
                warn!(
                    mutation_type = ?mutation.mutation_type,
                    "no wire representation for this mutation type, skipping result publish"
                );
                return;
            }
        };

        let result = BalanceChangeResult {
            external_id: mutation.external_id,
            kind,
            success: mutation.status == MutationStatus::Completed,
            user_id: mutation.user_id.clone(),
            old_balance: mutation.balance_before,
            new_balance: mutation.balance_after,
            failure_reason: mutation.failure_reason.clone(),
            timestamp: Utc::now().timestamp_millis(),
        };

        if let Err(e) = self.bus.publish_result(result).await {
            error!(
                external_id = mutation.external_id,
                error = %e,
                "failed to publish balance change result; relying on the retry sweep to re-drive this transfer"
            );
        }
    }
}
