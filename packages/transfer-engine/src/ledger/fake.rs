//! In-memory Ledger Store, for unit and integration tests. Mirrors
//! `PostgresLedger`'s row-locking semantics with a single `Mutex` guarding
//! both tables, since tests never need more concurrency than that.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::transfer::graph;
use crate::{Error, Result};

use super::models::{BalanceMutation, MutationStatus, MutationType, Transfer, TransferStatus, UserAccount};
use super::{LedgerStore, MutationOutcome};

struct State {
    accounts: HashMap<String, UserAccount>,
    transfers: HashMap<i64, Transfer>,
    mutations: HashMap<(i64, MutationType), BalanceMutation>,
    next_transfer_id: i64,
    next_mutation_id: i64,
}

pub struct InMemoryLedger {
    state: Mutex<State>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                accounts: HashMap::new(),
                transfers: HashMap::new(),
                mutations: HashMap::new(),
                next_transfer_id: 1,
                next_mutation_id: 1,
            }),
        }
    }

    fn write_transition(
        current: &Transfer,
        to: TransferStatus,
        completed_at: Option<DateTime<Utc>>,
        cancelled_at: Option<DateTime<Utc>>,
        failure_reason: Option<&str>,
    ) -> Result<Transfer> {
        graph::validate_transition(current.status, to)?;
        let mut next = current.clone();
        next.status = to;
        next.updated_at = Utc::now();
        if completed_at.is_some() {
            next.completed_at = completed_at;
        }
        if cancelled_at.is_some() {
            next.cancelled_at = cancelled_at;
        }
        if let Some(r) = failure_reason {
            next.failure_reason = Some(super::models::truncate_reason(r));
        }
        Ok(next)
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn get_account(&self, user_id: &str) -> Result<Option<UserAccount>> {
        Ok(self.state.lock().unwrap().accounts.get(user_id).cloned())
    }

    async fn create_account(&self, user_id: &str, initial_balance: Decimal) -> Result<UserAccount> {
        if initial_balance < Decimal::ZERO {
            return Err(Error::Validation("initial balance must be >= 0".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        if state.accounts.contains_key(user_id) {
            return Err(Error::Conflict(user_id.to_string()));
        }
        let account = UserAccount {
            user_id: user_id.to_string(),
            balance: initial_balance,
            version: 0,
            created_at: Utc::now(),
        };
        state.accounts.insert(user_id.to_string(), account.clone());
        Ok(account)
    }

    async fn find_mutation(
        &self,
        external_id: i64,
        mutation_type: MutationType,
    ) -> Result<Option<BalanceMutation>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .mutations
            .get(&(external_id, mutation_type))
            .cloned())
    }

    async fn execute_mutation(
        &self,
        external_id: i64,
        user_id: &str,
        mutation_type: MutationType,
        signed_amount: Decimal,
    ) -> Result<MutationOutcome> {
        let mut state = self.state.lock().unwrap();

        if let Some(existing) = state.mutations.get(&(external_id, mutation_type)) {
            return Ok(MutationOutcome::AlreadyProcessed(existing.clone()));
        }

        let account = state
            .accounts
            .get(user_id)
            .cloned()
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;

        if mutation_type == MutationType::Debit && account.balance < signed_amount.abs() {
            let id = state.next_mutation_id;
            state.next_mutation_id += 1;
            let reason = format!(
                "insufficient balance: have={}, need={}",
                account.balance,
                signed_amount.abs()
            );
            let mutation = BalanceMutation {
                id,
                external_id,
                mutation_type,
                user_id: user_id.to_string(),
                amount: signed_amount,
                status: MutationStatus::Failed,
                balance_before: Some(account.balance),
                balance_after: None,
                created_at: Utc::now(),
                completed_at: None,
                failure_reason: Some(super::models::truncate_reason(&reason)),
            };
            state
                .mutations
                .insert((external_id, mutation_type), mutation.clone());
            return Ok(MutationOutcome::Failed(mutation));
        }

        let new_balance = account.balance + signed_amount;
        let id = state.next_mutation_id;
        state.next_mutation_id += 1;
        let mutation = BalanceMutation {
            id,
            external_id,
            mutation_type,
            user_id: user_id.to_string(),
            amount: signed_amount,
            status: MutationStatus::Completed,
            balance_before: Some(account.balance),
            balance_after: Some(new_balance),
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
            failure_reason: None,
        };

        state
            .mutations
            .insert((external_id, mutation_type), mutation.clone());
        let mut account = account;
        account.balance = new_balance;
        account.version += 1;
        state.accounts.insert(user_id.to_string(), account);

        Ok(MutationOutcome::Completed(mutation))
    }

    async fn create_transfer(&self, from: &str, to: &str, amount: Decimal) -> Result<Transfer> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_transfer_id;
        state.next_transfer_id += 1;
        let now = Utc::now();
        let transfer = Transfer {
            id,
            from_user_id: from.to_string(),
            to_user_id: to.to_string(),
            amount,
            status: TransferStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
            failure_reason: None,
        };
        state.transfers.insert(id, transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&self, id: i64) -> Result<Option<Transfer>> {
        Ok(self.state.lock().unwrap().transfers.get(&id).cloned())
    }

    async fn cancel_transfer(
        &self,
        id: i64,
        cancellation_window_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<Transfer> {
        let mut state = self.state.lock().unwrap();
        let current = state
            .transfers
            .get(&id)
            .cloned()
            .ok_or(Error::TransferNotFound(id))?;

        let deadline = current.created_at + chrono::Duration::seconds(cancellation_window_seconds);
        if now > deadline {
            return Err(Error::InvalidTransferState(format!(
                "cancellation window elapsed for transfer {} (created_at={}, deadline={})",
                id, current.created_at, deadline
            )));
        }

        let next = Self::write_transition(&current, TransferStatus::Cancelled, None, Some(now), None)?;
        state.transfers.insert(id, next.clone());
        Ok(next)
    }

    async fn mark_debit_processing(&self, id: i64) -> Result<Transfer> {
        let mut state = self.state.lock().unwrap();
        let current = state
            .transfers
            .get(&id)
            .cloned()
            .ok_or(Error::TransferNotFound(id))?;
        let next = Self::write_transition(&current, TransferStatus::DebitProcessing, None, None, None)?;
        state.transfers.insert(id, next.clone());
        Ok(next)
    }

    async fn handle_debit_success(&self, id: i64) -> Result<Transfer> {
        let mut state = self.state.lock().unwrap();
        let current = state
            .transfers
            .get(&id)
            .cloned()
            .ok_or(Error::TransferNotFound(id))?;
        let next = Self::write_transition(&current, TransferStatus::CreditProcessing, None, None, None)?;
        state.transfers.insert(id, next.clone());
        Ok(next)
    }

    async fn handle_debit_failure(&self, id: i64, reason: &str) -> Result<Transfer> {
        let mut state = self.state.lock().unwrap();
        let current = state
            .transfers
            .get(&id)
            .cloned()
            .ok_or(Error::TransferNotFound(id))?;
        let next = Self::write_transition(
            &current,
            TransferStatus::DebitFailed,
            Some(Utc::now()),
            None,
            Some(reason),
        )?;
        state.transfers.insert(id, next.clone());
        Ok(next)
    }

    async fn mark_credit_processing(&self, id: i64) -> Result<Transfer> {
        let mut state = self.state.lock().unwrap();
        let current = state
            .transfers
            .get(&id)
            .cloned()
            .ok_or(Error::TransferNotFound(id))?;
        let next = Self::write_transition(&current, TransferStatus::CreditProcessing, None, None, None)?;
        state.transfers.insert(id, next.clone());
        Ok(next)
    }

    async fn complete_transfer(&self, id: i64) -> Result<Transfer> {
        let mut state = self.state.lock().unwrap();
        let current = state
            .transfers
            .get(&id)
            .cloned()
            .ok_or(Error::TransferNotFound(id))?;
        let next = Self::write_transition(
            &current,
            TransferStatus::Completed,
            Some(Utc::now()),
            None,
            None,
        )?;
        state.transfers.insert(id, next.clone());
        Ok(next)
    }

    async fn touch_updated_at(&self, id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let transfer = state
            .transfers
            .get_mut(&id)
            .ok_or(Error::TransferNotFound(id))?;
        transfer.updated_at = Utc::now();
        Ok(())
    }

    async fn find_pending_older_than(&self, cutoff: DateTime<Utc>, batch: i64) -> Result<Vec<Transfer>> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<Transfer> = state
            .transfers
            .values()
            .filter(|t| t.status == TransferStatus::Pending && t.created_at < cutoff)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.created_at);
        rows.truncate(batch.max(0) as usize);
        Ok(rows)
    }

    async fn find_in_flight_stale_than(
        &self,
        status: TransferStatus,
        cutoff: DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<Transfer>> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<Transfer> = state
            .transfers
            .values()
            .filter(|t| t.status == status && t.updated_at < cutoff)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.created_at);
        rows.truncate(batch.max(0) as usize);
        Ok(rows)
    }

    async fn history_of(&self, user_id: &str, page: u32, size: u32) -> Result<Vec<Transfer>> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<Transfer> = state
            .transfers
            .values()
            .filter(|t| t.from_user_id == user_id || t.to_user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let start = (page as usize) * (size as usize);
        Ok(rows.into_iter().skip(start).take(size as usize).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_mutation_is_idempotent_on_external_id() {
        let ledger = InMemoryLedger::new();
        ledger.create_account("alice", Decimal::new(10000, 2)).await.unwrap();

        let first = ledger
            .execute_mutation(1, "alice", MutationType::Debit, Decimal::new(-5000, 2))
            .await
            .unwrap();
        assert!(matches!(first, MutationOutcome::Completed(_)));

        let second = ledger
            .execute_mutation(1, "alice", MutationType::Debit, Decimal::new(-5000, 2))
            .await
            .unwrap();
        assert!(matches!(second, MutationOutcome::AlreadyProcessed(_)));

        let account = ledger.get_account("alice").await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::new(5000, 2));
    }

    #[tokio::test]
    async fn execute_mutation_rejects_insufficient_balance_without_mutating() {
        let ledger = InMemoryLedger::new();
        ledger.create_account("alice", Decimal::new(1000, 2)).await.unwrap();

        let outcome = ledger
            .execute_mutation(1, "alice", MutationType::Debit, Decimal::new(-5000, 2))
            .await
            .unwrap();
        assert!(matches!(outcome, MutationOutcome::Failed(_)));

        let account = ledger.get_account("alice").await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::new(1000, 2));
    }

    #[tokio::test]
    async fn cancel_transfer_rejects_past_the_window() {
        let ledger = InMemoryLedger::new();
        let transfer = ledger
            .create_transfer("alice", "bob", Decimal::new(100, 2))
            .await
            .unwrap();
        let far_future = transfer.created_at + chrono::Duration::seconds(1000);
        let err = ledger.cancel_transfer(transfer.id, 600, far_future).await;
        assert!(matches!(err, Err(Error::InvalidTransferState(_))));
    }
}
