//! Orchestrator (C8, spec §4.3/§4.4): coordinates C5/C6/C9 and contains
//! no persistence logic of its own beyond the cache-then-ledger balance
//! read used for the early quick-fail check. Grounded on
//! `monitoring-engine/src/engine.rs`'s top-level coordinator that wires
//! the detectors, database, and alert manager together without owning
//! any of their storage.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tracing::{error, warn};

use crate::balance::BalanceMutator;
use crate::bus::messages::{BalanceChange, BalanceChangeKind, BalanceChangeResult};
use crate::bus::MessageBus;
use crate::cache::Cache;
use crate::ledger::models::{Transfer, TransferStatus};
use crate::ledger::LedgerStore;
use crate::transfer::TransferEngine;
use crate::{Error, Result};

pub struct Orchestrator {
    transfer: Arc<TransferEngine>,
    balance: Arc<BalanceMutator>,
    ledger: Arc<dyn LedgerStore>,
    cache: Arc<dyn Cache>,
    bus: Arc<dyn MessageBus>,
}

impl Orchestrator {
    pub fn new(
        transfer: Arc<TransferEngine>,
        balance: Arc<BalanceMutator>,
        ledger: Arc<dyn LedgerStore>,
        cache: Arc<dyn Cache>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            transfer,
            balance,
            ledger,
            cache,
            bus,
        }
    }

    /// Cache-then-ledger balance read (spec §4.3 step 1): advisory only,
    /// the authoritative check happens inside C5's debit transaction.
    async fn resolve_balance(&self, user_id: &str) -> Result<Decimal> {
        if let Ok(Some(balance)) = self.cache.get_balance(user_id).await {
            return Ok(balance);
        }
        let account = self
            .ledger
            .get_account(user_id)
            .await?
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;
        if let Err(e) = self.cache.set_balance(user_id, account.balance, 300).await {
            warn!(user_id = %user_id, error = %e, "failed to warm cache on read-through");
        }
        Ok(account.balance)
    }

    /// `createTransfer` (spec §4.3).
    pub async fn create_transfer(&self, from: &str, to: &str, amount: Decimal) -> Result<Transfer> {
        let sender_balance = self.resolve_balance(from).await?;
        // `to` must exist too, even though its balance plays no role here.
        self.resolve_balance(to).await?;

        if sender_balance < amount {
            return Err(Error::InsufficientBalance {
                have: sender_balance,
                need: amount,
            });
        }

        self.transfer.create(from, to, amount).await
    }

    /// `cancelTransfer` (spec §4.3).
    pub async fn cancel_transfer(&self, id: i64) -> Result<Transfer> {
        self.transfer.cancel(id).await
    }

    /// `getHistory` (spec §4.3). Paging/clamping is the HTTP layer's job.
    pub async fn get_history(&self, user_id: &str, page: u32, size: u32) -> Result<Vec<Transfer>> {
        self.transfer.history_of(user_id, page, size).await
    }

    /// `onBalanceChangeRequest` (spec §4.7, request consumer).
    pub async fn on_balance_change_request(&self, msg: BalanceChange) -> Result<()> {
        match msg.kind {
            BalanceChangeKind::TransferOut => {
                self.balance.debit(msg.external_id, &msg.user_id, msg.amount.abs()).await?;
            }
            BalanceChangeKind::TransferIn => {
                self.balance.credit(msg.external_id, &msg.user_id, msg.amount.abs()).await?;
            }
        }
        Ok(())
    }

    /// `onBalanceChangeResult` (spec §4.4, result consumer).
    pub async fn on_balance_change_result(&self, msg: BalanceChangeResult) -> Result<()> {
        match (msg.kind, msg.success) {
            (BalanceChangeKind::TransferOut, true) => {
                let transfer = self.transfer.handle_debit_success(msg.external_id).await?;
                self.publish_credit_request(&transfer).await;
                Ok(())
            }
            (BalanceChangeKind::TransferOut, false) => {
                let reason = msg
                    .failure_reason
                    .unwrap_or_else(|| "debit failed with no reason reported".to_string());
                self.transfer.handle_debit_failure(msg.external_id, &reason).await?;
                Ok(())
            }
            (BalanceChangeKind::TransferIn, true) => {
                self.transfer.complete(msg.external_id).await?;
                Ok(())
            }
            (BalanceChangeKind::TransferIn, false) => {
                error!(
                    external_id = msg.external_id,
                    "credit failed; this is not expected to occur in steady state"
                );
                Err(Error::CreditFailed(
                    msg.external_id,
                    msg.failure_reason.unwrap_or_default(),
                ))
            }
        }
    }

    /// `sweepPending` (spec §4.3/§4.5): advance due PENDING rows to
    /// DEBIT_PROCESSING and publish the debit request for each.
    pub async fn sweep_pending(&self, delay_seconds: i64, batch: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::seconds(delay_seconds);
        let due = self.transfer.find_pending_older_than(cutoff, batch).await?;
        let mut advanced = 0;
        for transfer in due {
            match self.transfer.mark_debit_processing(transfer.id).await {
                Ok(updated) => {
                    self.publish_debit_request(&updated).await;
                    advanced += 1;
                }
                Err(e) => {
                    warn!(transfer_id = transfer.id, error = %e, "pending sweep failed to advance transfer, skipping");
                }
            }
        }
        Ok(advanced)
    }

    /// `sweepStale` (spec §4.3/§4.5): re-drive in-flight rows whose
    /// `updated_at` is stale, then touch them so the same tick doesn't
    /// re-pick them up.
    pub async fn sweep_stale(&self, status: TransferStatus, delay_seconds: i64, batch: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::seconds(delay_seconds);
        let stale = self.transfer.find_in_flight_stale_than(status, cutoff, batch).await?;
        let mut redriven = 0;
        for transfer in stale {
            match status {
                TransferStatus::DebitProcessing => self.publish_debit_request(&transfer).await,
                TransferStatus::CreditProcessing => self.publish_credit_request(&transfer).await,
                other => {
                    warn!(status = ?other, "sweep_stale invoked with a non-in-flight status, skipping tick");
                    continue;
                }
            }
            if let Err(e) = self.transfer.touch_updated_at(transfer.id).await {
                warn!(transfer_id = transfer.id, error = %e, "failed to touch updated_at after re-drive");
            }
            redriven += 1;
        }
        Ok(redriven)
    }

    async fn publish_debit_request(&self, transfer: &Transfer) {
        let msg = BalanceChange {
            external_id: transfer.id,
            kind: BalanceChangeKind::TransferOut,
            user_id: transfer.from_user_id.clone(),
            amount: -transfer.amount,
            related_id: transfer.id,
            timestamp: Utc::now().timestamp_millis(),
        };
        if let Err(e) = self.bus.publish_request(msg).await {
            error!(transfer_id = transfer.id, error = %e, "failed to publish debit request");
        }
    }

    async fn publish_credit_request(&self, transfer: &Transfer) {
        let msg = BalanceChange {
            external_id: transfer.id,
            kind: BalanceChangeKind::TransferIn,
            user_id: transfer.to_user_id.clone(),
            amount: transfer.amount,
            related_id: transfer.id,
            timestamp: Utc::now().timestamp_millis(),
        };
        if let Err(e) = self.bus.publish_request(msg).await {
            error!(transfer_id = transfer.id, error = %e, "failed to publish credit request");
        }
    }
}
