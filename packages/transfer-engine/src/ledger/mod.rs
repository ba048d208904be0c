//! Ledger Store (C1, spec §3/§4.1/§4.2).
//!
//! Persists `UserAccount`, `Transfer`, `BalanceMutation` with row-level
//! pessimistic locking (`SELECT ... FOR UPDATE` inside one
//! `deadpool_postgres` transaction per operation) and the
//! `(external_id, mutation_type)` unique index that fences idempotency.
//! Grounded on `monitoring-engine/src/database/mod.rs`'s pool/prepare/execute
//! style; generalized from append-only analytics tables to a mutable,
//! row-locked ledger.

pub mod fake;
pub mod models;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{GenericClient, Manager, ManagerConfig, Pool, RecyclingMethod};
use rust_decimal::Decimal;
use tokio_postgres::{error::SqlState, NoTls, Transaction};
use tracing::{error, info};

use crate::transfer::graph;
use crate::{Error, Result};

use models::{truncate_reason, BalanceMutation, MutationStatus, MutationType, Transfer, TransferStatus, UserAccount};

/// Outcome of `LedgerStore::execute_mutation`, mirroring spec §4.1's three
/// return shapes (idempotent short-circuit, recorded failure, fresh
/// success) without raising for the two expected cases.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// Step 1 short-circuit: a mutation already existed for this key.
    AlreadyProcessed(BalanceMutation),
    /// Step 3: debit preconditions failed; a FAILED row was recorded.
    Failed(BalanceMutation),
    /// Steps 4-6: a fresh PROCESSING -> COMPLETED mutation went through.
    Completed(BalanceMutation),
}

impl MutationOutcome {
    pub fn mutation(&self) -> &BalanceMutation {
        match self {
            MutationOutcome::AlreadyProcessed(m)
            | MutationOutcome::Failed(m)
            | MutationOutcome::Completed(m) => m,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, MutationOutcome::Failed(_))
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn health_check(&self) -> Result<bool>;

    // --- UserAccount -------------------------------------------------
    async fn get_account(&self, user_id: &str) -> Result<Option<UserAccount>>;
    async fn create_account(&self, user_id: &str, initial_balance: Decimal) -> Result<UserAccount>;

    // --- BalanceMutation / balance mutation (C5) ----------------------
    async fn find_mutation(
        &self,
        external_id: i64,
        mutation_type: MutationType,
    ) -> Result<Option<BalanceMutation>>;

    async fn execute_mutation(
        &self,
        external_id: i64,
        user_id: &str,
        mutation_type: MutationType,
        signed_amount: Decimal,
    ) -> Result<MutationOutcome>;

    // --- Transfer (C6) -------------------------------------------------
    async fn create_transfer(&self, from: &str, to: &str, amount: Decimal) -> Result<Transfer>;
    async fn get_transfer(&self, id: i64) -> Result<Option<Transfer>>;
    async fn cancel_transfer(
        &self,
        id: i64,
        cancellation_window_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<Transfer>;
    async fn mark_debit_processing(&self, id: i64) -> Result<Transfer>;
    async fn handle_debit_success(&self, id: i64) -> Result<Transfer>;
    async fn handle_debit_failure(&self, id: i64, reason: &str) -> Result<Transfer>;
    async fn mark_credit_processing(&self, id: i64) -> Result<Transfer>;
    async fn complete_transfer(&self, id: i64) -> Result<Transfer>;
    async fn touch_updated_at(&self, id: i64) -> Result<()>;
    async fn find_pending_older_than(&self, cutoff: DateTime<Utc>, batch: i64) -> Result<Vec<Transfer>>;
    async fn find_in_flight_stale_than(
        &self,
        status: TransferStatus,
        cutoff: DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<Transfer>>;
    async fn history_of(&self, user_id: &str, page: u32, size: u32) -> Result<Vec<Transfer>>;
}

/// Postgres-backed Ledger Store.
pub struct PostgresLedger {
    pool: Pool,
}

impl PostgresLedger {
    pub async fn connect(database_url: &str, max_size: usize) -> Result<Self> {
        info!("connecting to ledger store at {}", database_url);

        let pg_config = database_url
            .parse::<tokio_postgres::Config>()
            .map_err(|e| Error::TransientStorage(format!("invalid database url: {}", e)))?;

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(manager)
            .max_size(max_size)
            .build()
            .map_err(|e| Error::TransientStorage(format!("failed to build pool: {}", e)))?;

        let client = pool
            .get()
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;

        info!("ledger store connection established");
        Ok(Self { pool })
    }

    async fn lock_transfer<'a>(txn: &Transaction<'a>, id: i64) -> Result<Transfer> {
        let row = txn
            .query_opt(
                "SELECT id, from_user_id, to_user_id, amount, status, created_at, updated_at, \
                 completed_at, cancelled_at, failure_reason \
                 FROM transfers WHERE id = $1 FOR UPDATE",
                &[&id],
            )
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?
            .ok_or(Error::TransferNotFound(id))?;
        Transfer::from_row(&row)
    }

    async fn write_transition<'a>(
        txn: &Transaction<'a>,
        current: &Transfer,
        to: TransferStatus,
        completed_at: Option<DateTime<Utc>>,
        cancelled_at: Option<DateTime<Utc>>,
        failure_reason: Option<&str>,
    ) -> Result<Transfer> {
        graph::validate_transition(current.status, to)?;
        let reason = failure_reason.map(truncate_reason);
        let row = txn
            .query_one(
                "UPDATE transfers SET status = $2, updated_at = now(), completed_at = $3, \
                 cancelled_at = $4, failure_reason = $5 \
                 WHERE id = $1 \
                 RETURNING id, from_user_id, to_user_id, amount, status, created_at, updated_at, \
                 completed_at, cancelled_at, failure_reason",
                &[&current.id, &to.as_db_str(), &completed_at, &cancelled_at, &reason],
            )
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        Transfer::from_row(&row)
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn health_check(&self) -> Result<bool> {
        match self.pool.get().await {
            Ok(client) => match client.query_one("SELECT 1", &[]).await {
                Ok(_) => Ok(true),
                Err(e) => {
                    error!("ledger health check query failed: {}", e);
                    Ok(false)
                }
            },
            Err(e) => {
                error!("ledger health check connection failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn get_account(&self, user_id: &str) -> Result<Option<UserAccount>> {
        let client = self.pool.get().await.map_err(pool_err)?;
        let row = client
            .query_opt(
                "SELECT user_id, balance, version, created_at FROM user_accounts WHERE user_id = $1",
                &[&user_id],
            )
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        row.map(|r| UserAccount::from_row(&r)).transpose()
    }

    async fn create_account(&self, user_id: &str, initial_balance: Decimal) -> Result<UserAccount> {
        if initial_balance < Decimal::ZERO {
            return Err(Error::Validation("initial balance must be >= 0".to_string()));
        }
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let txn = client
            .transaction()
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;

        let row = txn
            .query_one(
                "INSERT INTO user_accounts (user_id, balance, version, created_at) \
                 VALUES ($1, $2, 0, now()) \
                 RETURNING user_id, balance, version, created_at",
                &[&user_id, &initial_balance],
            )
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    Error::Conflict(user_id.to_string())
                } else {
                    Error::TransientStorage(e.to_string())
                }
            })?;

        txn.commit()
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        UserAccount::from_row(&row)
    }

    async fn find_mutation(
        &self,
        external_id: i64,
        mutation_type: MutationType,
    ) -> Result<Option<BalanceMutation>> {
        let client = self.pool.get().await.map_err(pool_err)?;
        let row = client
            .query_opt(
                "SELECT id, external_id, mutation_type, user_id, amount, status, balance_before, \
                 balance_after, created_at, completed_at, failure_reason \
                 FROM balance_mutations WHERE external_id = $1 AND mutation_type = $2",
                &[&external_id, &mutation_type.as_db_str()],
            )
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        row.map(|r| BalanceMutation::from_row(&r)).transpose()
    }

    async fn execute_mutation(
        &self,
        external_id: i64,
        user_id: &str,
        mutation_type: MutationType,
        signed_amount: Decimal,
    ) -> Result<MutationOutcome> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let txn = client
            .transaction()
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;

        // Step 1: idempotency short-circuit.
        if let Some(existing) = query_mutation(&txn, external_id, mutation_type).await? {
            txn.commit().await.map_err(|e| Error::TransientStorage(e.to_string()))?;
            return Ok(MutationOutcome::AlreadyProcessed(existing));
        }

        // Step 2: row-level lock on the account.
        let account_row = txn
            .query_opt(
                "SELECT user_id, balance, version, created_at FROM user_accounts \
                 WHERE user_id = $1 FOR UPDATE",
                &[&user_id],
            )
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        let account = match account_row {
            Some(r) => UserAccount::from_row(&r)?,
            None => return Err(Error::UserNotFound(user_id.to_string())),
        };

        // Step 3: insufficient-balance short-circuit for debits.
        if mutation_type == MutationType::Debit && account.balance < signed_amount.abs() {
            let reason = format!(
                "insufficient balance: have={}, need={}",
                account.balance,
                signed_amount.abs()
            );
            let row = txn
                .query_one(
                    "INSERT INTO balance_mutations \
                     (external_id, mutation_type, user_id, amount, status, balance_before, \
                      failure_reason, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, now()) \
                     RETURNING id, external_id, mutation_type, user_id, amount, status, \
                     balance_before, balance_after, created_at, completed_at, failure_reason",
                    &[
                        &external_id,
                        &mutation_type.as_db_str(),
                        &user_id,
                        &signed_amount,
                        &MutationStatus::Failed.as_db_str(),
                        &account.balance,
                        &reason,
                    ],
                )
                .await
                .map_err(|e| Error::TransientStorage(e.to_string()))?;
            let mutation = BalanceMutation::from_row(&row)?;
            txn.commit().await.map_err(|e| Error::TransientStorage(e.to_string()))?;
            return Ok(MutationOutcome::Failed(mutation));
        }

        // Step 4: insert PROCESSING, absorbing a racing duplicate insert as
        // the step-1 short-circuit.
        let inserted = txn
            .query_one(
                "INSERT INTO balance_mutations \
                 (external_id, mutation_type, user_id, amount, status, balance_before, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, now()) \
                 RETURNING id, external_id, mutation_type, user_id, amount, status, \
                 balance_before, balance_after, created_at, completed_at, failure_reason",
                &[
                    &external_id,
                    &mutation_type.as_db_str(),
                    &user_id,
                    &signed_amount,
                    &MutationStatus::Processing.as_db_str(),
                    &account.balance,
                ],
            )
            .await;

        let mutation = match inserted {
            Ok(row) => BalanceMutation::from_row(&row)?,
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                let existing = query_mutation(&txn, external_id, mutation_type)
                    .await?
                    .ok_or_else(|| {
                        Error::TransientStorage(
                            "unique violation on balance_mutations with no visible row".to_string(),
                        )
                    })?;
                txn.commit().await.map_err(|e| Error::TransientStorage(e.to_string()))?;
                return Ok(MutationOutcome::AlreadyProcessed(existing));
            }
            Err(e) => return Err(Error::TransientStorage(e.to_string())),
        };

        // Step 5: update the account balance, through the row lock.
        let new_balance = account.balance + signed_amount;
        txn.execute(
            "UPDATE user_accounts SET balance = $2, version = version + 1 WHERE user_id = $1",
            &[&user_id, &new_balance],
        )
        .await
        .map_err(|e| Error::TransientStorage(e.to_string()))?;

        // Step 6: complete the mutation row.
        let row = txn
            .query_one(
                "UPDATE balance_mutations SET status = $2, balance_after = $3, completed_at = now() \
                 WHERE id = $1 \
                 RETURNING id, external_id, mutation_type, user_id, amount, status, \
                 balance_before, balance_after, created_at, completed_at, failure_reason",
                &[&mutation.id, &MutationStatus::Completed.as_db_str(), &new_balance],
            )
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        let mutation = BalanceMutation::from_row(&row)?;

        txn.commit().await.map_err(|e| Error::TransientStorage(e.to_string()))?;
        Ok(MutationOutcome::Completed(mutation))
    }

    async fn create_transfer(&self, from: &str, to: &str, amount: Decimal) -> Result<Transfer> {
        let client = self.pool.get().await.map_err(pool_err)?;
        let row = client
            .query_one(
                "INSERT INTO transfers \
                 (from_user_id, to_user_id, amount, status, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, now(), now()) \
                 RETURNING id, from_user_id, to_user_id, amount, status, created_at, updated_at, \
                 completed_at, cancelled_at, failure_reason",
                &[&from, &to, &amount, &TransferStatus::Pending.as_db_str()],
            )
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        Transfer::from_row(&row)
    }

    async fn get_transfer(&self, id: i64) -> Result<Option<Transfer>> {
        let client = self.pool.get().await.map_err(pool_err)?;
        let row = client
            .query_opt(
                "SELECT id, from_user_id, to_user_id, amount, status, created_at, updated_at, \
                 completed_at, cancelled_at, failure_reason FROM transfers WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        row.map(|r| Transfer::from_row(&r)).transpose()
    }

    async fn cancel_transfer(
        &self,
        id: i64,
        cancellation_window_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<Transfer> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let txn = client
            .transaction()
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        let current = Self::lock_transfer(&txn, id).await?;

        let deadline = current.created_at + chrono::Duration::seconds(cancellation_window_seconds);
        if now > deadline {
            return Err(Error::InvalidTransferState(format!(
                "cancellation window elapsed for transfer {} (created_at={}, deadline={})",
                id, current.created_at, deadline
            )));
        }

        let transfer = Self::write_transition(
            &txn,
            &current,
            TransferStatus::Cancelled,
            None,
            Some(now),
            None,
        )
        .await?;
        txn.commit().await.map_err(|e| Error::TransientStorage(e.to_string()))?;
        Ok(transfer)
    }

    async fn mark_debit_processing(&self, id: i64) -> Result<Transfer> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let txn = client
            .transaction()
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        let current = Self::lock_transfer(&txn, id).await?;
        let transfer =
            Self::write_transition(&txn, &current, TransferStatus::DebitProcessing, None, None, None)
                .await?;
        txn.commit().await.map_err(|e| Error::TransientStorage(e.to_string()))?;
        Ok(transfer)
    }

    async fn handle_debit_success(&self, id: i64) -> Result<Transfer> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let txn = client
            .transaction()
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        let current = Self::lock_transfer(&txn, id).await?;
        let transfer = Self::write_transition(
            &txn,
            &current,
            TransferStatus::CreditProcessing,
            None,
            None,
            None,
        )
        .await?;
        txn.commit().await.map_err(|e| Error::TransientStorage(e.to_string()))?;
        Ok(transfer)
    }

    async fn handle_debit_failure(&self, id: i64, reason: &str) -> Result<Transfer> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let txn = client
            .transaction()
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        let current = Self::lock_transfer(&txn, id).await?;
        let transfer = Self::write_transition(
            &txn,
            &current,
            TransferStatus::DebitFailed,
            Some(Utc::now()),
            None,
            Some(reason),
        )
        .await?;
        txn.commit().await.map_err(|e| Error::TransientStorage(e.to_string()))?;
        Ok(transfer)
    }

    async fn mark_credit_processing(&self, id: i64) -> Result<Transfer> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let txn = client
            .transaction()
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        let current = Self::lock_transfer(&txn, id).await?;
        let transfer = Self::write_transition(
            &txn,
            &current,
            TransferStatus::CreditProcessing,
            None,
            None,
            None,
        )
        .await?;
        txn.commit().await.map_err(|e| Error::TransientStorage(e.to_string()))?;
        Ok(transfer)
    }

    async fn complete_transfer(&self, id: i64) -> Result<Transfer> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let txn = client
            .transaction()
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        let current = Self::lock_transfer(&txn, id).await?;
        let transfer = Self::write_transition(
            &txn,
            &current,
            TransferStatus::Completed,
            Some(Utc::now()),
            None,
            None,
        )
        .await?;
        txn.commit().await.map_err(|e| Error::TransientStorage(e.to_string()))?;
        Ok(transfer)
    }

    async fn touch_updated_at(&self, id: i64) -> Result<()> {
        let client = self.pool.get().await.map_err(pool_err)?;
        client
            .execute("UPDATE transfers SET updated_at = now() WHERE id = $1", &[&id])
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        Ok(())
    }

    async fn find_pending_older_than(&self, cutoff: DateTime<Utc>, batch: i64) -> Result<Vec<Transfer>> {
        let client = self.pool.get().await.map_err(pool_err)?;
        let rows = client
            .query(
                "SELECT id, from_user_id, to_user_id, amount, status, created_at, updated_at, \
                 completed_at, cancelled_at, failure_reason FROM transfers \
                 WHERE status = $1 AND created_at < $2 ORDER BY created_at ASC LIMIT $3",
                &[&TransferStatus::Pending.as_db_str(), &cutoff, &batch],
            )
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        rows.iter().map(Transfer::from_row).collect()
    }

    async fn find_in_flight_stale_than(
        &self,
        status: TransferStatus,
        cutoff: DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<Transfer>> {
        let client = self.pool.get().await.map_err(pool_err)?;
        let rows = client
            .query(
                "SELECT id, from_user_id, to_user_id, amount, status, created_at, updated_at, \
                 completed_at, cancelled_at, failure_reason FROM transfers \
                 WHERE status = $1 AND updated_at < $2 ORDER BY created_at ASC LIMIT $3",
                &[&status.as_db_str(), &cutoff, &batch],
            )
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        rows.iter().map(Transfer::from_row).collect()
    }

    async fn history_of(&self, user_id: &str, page: u32, size: u32) -> Result<Vec<Transfer>> {
        let client = self.pool.get().await.map_err(pool_err)?;
        let offset = i64::from(page) * i64::from(size);
        let rows = client
            .query(
                "SELECT id, from_user_id, to_user_id, amount, status, created_at, updated_at, \
                 completed_at, cancelled_at, failure_reason FROM transfers \
                 WHERE from_user_id = $1 OR to_user_id = $1 \
                 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
                &[&user_id, &i64::from(size), &offset],
            )
            .await
            .map_err(|e| Error::TransientStorage(e.to_string()))?;
        rows.iter().map(Transfer::from_row).collect()
    }
}

async fn query_mutation<'a>(
    txn: &Transaction<'a>,
    external_id: i64,
    mutation_type: MutationType,
) -> Result<Option<BalanceMutation>> {
    let row = txn
        .query_opt(
            "SELECT id, external_id, mutation_type, user_id, amount, status, balance_before, \
             balance_after, created_at, completed_at, failure_reason \
             FROM balance_mutations WHERE external_id = $1 AND mutation_type = $2",
            &[&external_id, &mutation_type.as_db_str()],
        )
        .await
        .map_err(|e| Error::TransientStorage(e.to_string()))?;
    row.map(|r| BalanceMutation::from_row(&r)).transpose()
}

fn pool_err(e: deadpool_postgres::PoolError) -> Error {
    Error::TransientStorage(e.to_string())
}
