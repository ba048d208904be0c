//! Transfer State Engine (C6, spec §4.2).
//!
//! `graph` is the explicit transition-legality function (spec §9's design
//! note: "the transition table should be an explicit function returning
//! either the advanced row or a typed rejection; callers match on the
//! tag" — modeled here as `Result<(), Error>` rather than a thrown
//! exception). `TransferEngine` is the component that calls into the
//! Ledger Store's row-locked primitives and emits `StatusChanged` events on
//! success.

pub mod graph;

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::events::{EventDispatcher, TransferStatusChanged};
use crate::ledger::models::{Transfer, TransferStatus};
use crate::ledger::LedgerStore;
use crate::{Error, Result};

/// Transfer State Engine (C6).
pub struct TransferEngine {
    ledger: Arc<dyn LedgerStore>,
    events: Arc<EventDispatcher>,
    cancellation_window_seconds: i64,
}

impl TransferEngine {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        events: Arc<EventDispatcher>,
        cancellation_window_seconds: i64,
    ) -> Self {
        Self {
            ledger,
            events,
            cancellation_window_seconds,
        }
    }

    /// `create(from, to, amount) -> Transfer`: inserts PENDING, emits
    /// `StatusChanged(null -> PENDING)`.
    pub async fn create(&self, from: &str, to: &str, amount: Decimal) -> Result<Transfer> {
        if from == to {
            return Err(Error::Validation(
                "from_user_id and to_user_id must be distinct".to_string(),
            ));
        }
        if amount <= Decimal::ZERO {
            return Err(Error::Validation("amount must be strictly positive".to_string()));
        }

        let transfer = self.ledger.create_transfer(from, to, amount).await?;
        self.events
            .transfer_status_changed(TransferStatusChanged {
                transfer_id: transfer.id,
                from: None,
                to: transfer.status,
            })
            .await;
        Ok(transfer)
    }

    /// `cancel(id)`: PENDING -> CANCELLED, subject to the 10-minute window
    /// measured from `created_at` (spec §4.2/§9's resolved open question).
    pub async fn cancel(&self, id: i64) -> Result<Transfer> {
        let now = Utc::now();
        let transfer = self
            .ledger
            .cancel_transfer(id, self.cancellation_window_seconds, now)
            .await?;
        self.events
            .transfer_status_changed(TransferStatusChanged {
                transfer_id: transfer.id,
                from: Some(TransferStatus::Pending),
                to: transfer.status,
            })
            .await;
        Ok(transfer)
    }

    pub async fn mark_debit_processing(&self, id: i64) -> Result<Transfer> {
        let transfer = self.ledger.mark_debit_processing(id).await?;
        self.events
            .transfer_status_changed(TransferStatusChanged {
                transfer_id: transfer.id,
                from: Some(TransferStatus::Pending),
                to: transfer.status,
            })
            .await;
        Ok(transfer)
    }

    pub async fn handle_debit_success(&self, id: i64) -> Result<Transfer> {
        let transfer = self.ledger.handle_debit_success(id).await?;
        self.events
            .transfer_status_changed(TransferStatusChanged {
                transfer_id: transfer.id,
                from: Some(TransferStatus::DebitProcessing),
                to: transfer.status,
            })
            .await;
        Ok(transfer)
    }

    pub async fn handle_debit_failure(&self, id: i64, reason: &str) -> Result<Transfer> {
        let transfer = self.ledger.handle_debit_failure(id, reason).await?;
        self.events
            .transfer_status_changed(TransferStatusChanged {
                transfer_id: transfer.id,
                from: Some(TransferStatus::DebitProcessing),
                to: transfer.status,
            })
            .await;
        Ok(transfer)
    }

    pub async fn mark_credit_processing(&self, id: i64) -> Result<Transfer> {
        let transfer = self.ledger.mark_credit_processing(id).await?;
        self.events
            .transfer_status_changed(TransferStatusChanged {
                transfer_id: transfer.id,
                from: Some(TransferStatus::DebitProcessing),
                to: transfer.status,
            })
            .await;
        Ok(transfer)
    }

    pub async fn complete(&self, id: i64) -> Result<Transfer> {
        let transfer = self.ledger.complete_transfer(id).await?;
        self.events
            .transfer_status_changed(TransferStatusChanged {
                transfer_id: transfer.id,
                from: Some(TransferStatus::CreditProcessing),
                to: transfer.status,
            })
            .await;
        Ok(transfer)
    }

    pub async fn get(&self, id: i64) -> Result<Transfer> {
        self.ledger
            .get_transfer(id)
            .await?
            .ok_or(Error::TransferNotFound(id))
    }

    pub async fn find_pending_older_than(
        &self,
        cutoff: chrono::DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<Transfer>> {
        self.ledger.find_pending_older_than(cutoff, batch).await
    }

    pub async fn find_in_flight_stale_than(
        &self,
        status: TransferStatus,
        cutoff: chrono::DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<Transfer>> {
        self.ledger
            .find_in_flight_stale_than(status, cutoff, batch)
            .await
    }

    pub async fn touch_updated_at(&self, id: i64) -> Result<()> {
        self.ledger.touch_updated_at(id).await
    }

    /// `historyOf(user_id, page, size)`: page is 0-based; size is clamped
    /// to [1, 100] by the HTTP caller surface (spec §4.3/§6.1), not here.
    pub async fn history_of(&self, user_id: &str, page: u32, size: u32) -> Result<Vec<Transfer>> {
        self.ledger.history_of(user_id, page, size).await
    }
}
