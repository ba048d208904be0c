//! Balance Mutator (C5, spec §4.1): the only component allowed to write
//! `UserAccount.balance`. Thin by design — persistence and idempotency
//! live in `LedgerStore::execute_mutation`; this module owns sign
//! convention, the positive-amount precondition, and firing the
//! post-commit event exactly once per call, success or failure.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::events::EventDispatcher;
use crate::ledger::models::{BalanceMutation, MutationType};
use crate::ledger::{LedgerStore, MutationOutcome};
use crate::{Error, Result};

pub struct BalanceMutator {
    ledger: Arc<dyn LedgerStore>,
    events: Arc<EventDispatcher>,
}

impl BalanceMutator {
    pub fn new(ledger: Arc<dyn LedgerStore>, events: Arc<EventDispatcher>) -> Self {
        Self { ledger, events }
    }

    /// `debit(external_id, user_id, amount)`, amount positive.
    pub async fn debit(&self, external_id: i64, user_id: &str, amount: Decimal) -> Result<BalanceMutation> {
        self.mutate(external_id, user_id, MutationType::Debit, -amount.require_positive()?)
            .await
    }

    /// `credit(external_id, user_id, amount)`, amount positive.
    pub async fn credit(&self, external_id: i64, user_id: &str, amount: Decimal) -> Result<BalanceMutation> {
        self.mutate(external_id, user_id, MutationType::Credit, amount.require_positive()?)
            .await
    }

    async fn mutate(
        &self,
        external_id: i64,
        user_id: &str,
        mutation_type: MutationType,
        signed_amount: Decimal,
    ) -> Result<BalanceMutation> {
        let outcome = self
            .ledger
            .execute_mutation(external_id, user_id, mutation_type, signed_amount)
            .await?;

        // Spec §4.1 step 1 and step 7: every path — idempotent
        // short-circuit, recorded failure, fresh success — fires the same
        // post-commit completion event exactly once.
        self.events.balance_mutation_completed(outcome.mutation()).await;

        Ok(outcome.mutation().clone())
    }
}

trait PositiveAmount {
    fn require_positive(self) -> Result<Decimal>;
}

impl PositiveAmount for Decimal {
    fn require_positive(self) -> Result<Decimal> {
        if self <= Decimal::ZERO {
            Err(Error::Validation("amount must be strictly positive".to_string()))
        } else {
            Ok(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::fake::InMemoryBus;
    use crate::cache::fake::InMemoryCache;
    use crate::ledger::fake::InMemoryLedger;

    fn mutator() -> (BalanceMutator, Arc<InMemoryLedger>, Arc<InMemoryBus>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let cache = Arc::new(InMemoryCache::new());
        let bus = Arc::new(InMemoryBus::new());
        let events = Arc::new(EventDispatcher::new(cache, bus.clone()));
        (BalanceMutator::new(ledger.clone(), events), ledger, bus)
    }

    #[tokio::test]
    async fn debit_rejects_non_positive_amount() {
        let (mutator, ledger, _bus) = mutator();
        ledger.create_account("alice", Decimal::new(10000, 2)).await.unwrap();
        let err = mutator.debit(1, "alice", Decimal::ZERO).await;
        assert!(matches!(err, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn debit_then_credit_conserves_total() {
        let (mutator, ledger, bus) = mutator();
        ledger.create_account("alice", Decimal::new(100000, 2)).await.unwrap();
        ledger.create_account("bob", Decimal::new(0, 2)).await.unwrap();

        let debit = mutator.debit(1, "alice", Decimal::new(30000, 2)).await.unwrap();
        assert_eq!(debit.balance_after, Some(Decimal::new(70000, 2)));

        let credit = mutator.credit(1, "bob", Decimal::new(30000, 2)).await.unwrap();
        assert_eq!(credit.balance_after, Some(Decimal::new(30000, 2)));

        assert_eq!(bus.published_results().len(), 2);
    }

    #[tokio::test]
    async fn insufficient_balance_records_failed_mutation_without_raising() {
        let (mutator, ledger, bus) = mutator();
        ledger.create_account("alice", Decimal::new(100, 2)).await.unwrap();

        let mutation = mutator.debit(1, "alice", Decimal::new(5000, 2)).await.unwrap();
        assert_eq!(mutation.status, crate::ledger::models::MutationStatus::Failed);
        assert!(mutation.failure_reason.as_deref().unwrap().contains("insufficient"));
        assert_eq!(bus.published_results().len(), 1);
        assert!(!bus.published_results()[0].success);
    }

    #[tokio::test]
    async fn user_not_found_raises_without_recording_a_mutation() {
        let (mutator, _ledger, bus) = mutator();
        let err = mutator.debit(1, "ghost", Decimal::new(100, 2)).await;
        assert!(matches!(err, Err(Error::UserNotFound(_))));
        assert!(bus.published_results().is_empty());
    }

    #[tokio::test]
    async fn replaying_the_same_external_id_is_idempotent() {
        let (mutator, ledger, _bus) = mutator();
        ledger.create_account("alice", Decimal::new(10000, 2)).await.unwrap();

        let first = mutator.debit(1, "alice", Decimal::new(3000, 2)).await.unwrap();
        let second = mutator.debit(1, "alice", Decimal::new(3000, 2)).await.unwrap();
        assert_eq!(first, second);

        let account = ledger.get_account("alice").await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::new(7000, 2));
    }
}
