//! Wire schemas for the request/result topics (spec §6.2).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::models::MutationType;

/// Request-topic payload. `kind` mirrors the wire's `TRANSFER_OUT` /
/// `TRANSFER_IN` vocabulary rather than the ledger's `DEBIT/CREDIT`, since
/// the two enums drift independently (the wire format is a published
/// contract; `MutationType` is storage-internal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChange {
    #[serde(rename = "externalId")]
    pub external_id: i64,
    #[serde(rename = "type")]
    pub kind: BalanceChangeKind,
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Signed: negative for `TRANSFER_OUT`, positive for `TRANSFER_IN`.
    pub amount: Decimal,
    #[serde(rename = "relatedId")]
    pub related_id: i64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceChangeKind {
    #[serde(rename = "TRANSFER_OUT")]
    TransferOut,
    #[serde(rename = "TRANSFER_IN")]
    TransferIn,
}

impl BalanceChangeKind {
    pub fn to_mutation_type(self) -> MutationType {
        match self {
            BalanceChangeKind::TransferOut => MutationType::Debit,
            BalanceChangeKind::TransferIn => MutationType::Credit,
        }
    }

    pub fn from_mutation_type(t: MutationType) -> Option<Self> {
        match t {
            MutationType::Debit => Some(BalanceChangeKind::TransferOut),
            MutationType::Credit => Some(BalanceChangeKind::TransferIn),
            MutationType::Refund => None,
        }
    }
}

/// Result-topic payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChangeResult {
    #[serde(rename = "externalId")]
    pub external_id: i64,
    #[serde(rename = "type")]
    pub kind: BalanceChangeKind,
    pub success: bool,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "oldBalance")]
    pub old_balance: Option<Decimal>,
    #[serde(rename = "newBalance")]
    pub new_balance: Option<Decimal>,
    #[serde(rename = "failureReason")]
    pub failure_reason: Option<String>,
    pub timestamp: i64,
}
