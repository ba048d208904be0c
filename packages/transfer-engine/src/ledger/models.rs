//! Ledger Store data model (spec §3): `UserAccount`, `Transfer`,
//! `BalanceMutation`, plus their enums. Grounded on
//! `monitoring-engine/src/database/models.rs`'s `from_row`-from-`&Row`
//! convention.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;

use crate::{Error, Result};

/// `Transfer.status` (spec §3/§4.2). Postgres-side this is stored as text;
/// `FromStr`/`Display` keep the wire/storage form in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    DebitProcessing,
    CreditProcessing,
    Completed,
    DebitFailed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::DebitFailed | TransferStatus::Cancelled
        )
    }

    pub fn as_db_str(self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::DebitProcessing => "DEBIT_PROCESSING",
            TransferStatus::CreditProcessing => "CREDIT_PROCESSING",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::DebitFailed => "DEBIT_FAILED",
            TransferStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "PENDING" => TransferStatus::Pending,
            "DEBIT_PROCESSING" => TransferStatus::DebitProcessing,
            "CREDIT_PROCESSING" => TransferStatus::CreditProcessing,
            "COMPLETED" => TransferStatus::Completed,
            "DEBIT_FAILED" => TransferStatus::DebitFailed,
            "CANCELLED" => TransferStatus::Cancelled,
            other => {
                return Err(Error::TransientStorage(format!(
                    "unrecognized transfer status in storage: {}",
                    other
                )))
            }
        })
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// `BalanceMutation.type` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationType {
    Debit,
    Credit,
    Refund,
}

impl MutationType {
    pub fn as_db_str(self) -> &'static str {
        match self {
            MutationType::Debit => "DEBIT",
            MutationType::Credit => "CREDIT",
            MutationType::Refund => "REFUND",
        }
    }
}

impl std::str::FromStr for MutationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "DEBIT" => MutationType::Debit,
            "CREDIT" => MutationType::Credit,
            "REFUND" => MutationType::Refund,
            other => {
                return Err(Error::TransientStorage(format!(
                    "unrecognized mutation type in storage: {}",
                    other
                )))
            }
        })
    }
}

/// `BalanceMutation.status` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationStatus {
    Processing,
    Completed,
    Failed,
}

impl MutationStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            MutationStatus::Processing => "PROCESSING",
            MutationStatus::Completed => "COMPLETED",
            MutationStatus::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for MutationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "PROCESSING" => MutationStatus::Processing,
            "COMPLETED" => MutationStatus::Completed,
            "FAILED" => MutationStatus::Failed,
            other => {
                return Err(Error::TransientStorage(format!(
                    "unrecognized mutation status in storage: {}",
                    other
                )))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub user_id: String,
    pub balance: Decimal,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            user_id: row.try_get("user_id").map_err(row_err)?,
            balance: row.try_get("balance").map_err(row_err)?,
            version: row.try_get("version").map_err(row_err)?,
            created_at: row.try_get("created_at").map_err(row_err)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: i64,
    pub from_user_id: String,
    pub to_user_id: String,
    pub amount: Decimal,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Transfer {
    pub fn from_row(row: &Row) -> Result<Self> {
        let status_str: String = row.try_get("status").map_err(row_err)?;
        Ok(Self {
            id: row.try_get("id").map_err(row_err)?,
            from_user_id: row.try_get("from_user_id").map_err(row_err)?,
            to_user_id: row.try_get("to_user_id").map_err(row_err)?,
            amount: row.try_get("amount").map_err(row_err)?,
            status: status_str.parse()?,
            created_at: row.try_get("created_at").map_err(row_err)?,
            updated_at: row.try_get("updated_at").map_err(row_err)?,
            completed_at: row.try_get("completed_at").map_err(row_err)?,
            cancelled_at: row.try_get("cancelled_at").map_err(row_err)?,
            failure_reason: row.try_get("failure_reason").map_err(row_err)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceMutation {
    pub id: i64,
    pub external_id: i64,
    pub mutation_type: MutationType,
    pub user_id: String,
    /// Signed: debit negative, credit positive (spec §3).
    pub amount: Decimal,
    pub status: MutationStatus,
    pub balance_before: Option<Decimal>,
    pub balance_after: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl BalanceMutation {
    pub fn from_row(row: &Row) -> Result<Self> {
        let type_str: String = row.try_get("mutation_type").map_err(row_err)?;
        let status_str: String = row.try_get("status").map_err(row_err)?;
        Ok(Self {
            id: row.try_get("id").map_err(row_err)?,
            external_id: row.try_get("external_id").map_err(row_err)?,
            mutation_type: type_str.parse()?,
            user_id: row.try_get("user_id").map_err(row_err)?,
            amount: row.try_get("amount").map_err(row_err)?,
            status: status_str.parse()?,
            balance_before: row.try_get("balance_before").map_err(row_err)?,
            balance_after: row.try_get("balance_after").map_err(row_err)?,
            created_at: row.try_get("created_at").map_err(row_err)?,
            completed_at: row.try_get("completed_at").map_err(row_err)?,
            failure_reason: row.try_get("failure_reason").map_err(row_err)?,
        })
    }
}

fn row_err(e: tokio_postgres::Error) -> Error {
    Error::TransientStorage(format!("row decode error: {}", e))
}

/// Truncate a failure reason to 255 chars (spec §4.2), at a char boundary.
pub fn truncate_reason(reason: &str) -> String {
    if reason.chars().count() <= 255 {
        return reason.to_string();
    }
    reason.chars().take(255).collect()
}
