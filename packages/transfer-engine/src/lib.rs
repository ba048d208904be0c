//! Transfer Engine
//!
//! Asynchronous, event-driven money-transfer orchestration core: a durable
//! per-transfer state machine, an idempotent balance mutation engine, a
//! leader-gated sweeper, and a pair of message-queue consumer fleets.

pub mod balance;
pub mod bus;
pub mod cache;
pub mod config;
pub mod consumers;
pub mod events;
pub mod ledger;
pub mod lock;
pub mod orchestrator;
pub mod sweeper;
pub mod transfer;

pub mod api;

use thiserror::Error;

pub use config::AppConfig;

/// Crate-wide error type. Variants map onto the error kinds in spec §7.
#[derive(Error, Debug)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("transfer not found: {0}")]
    TransferNotFound(i64),

    #[error("user already exists: {0}")]
    Conflict(String),

    #[error("invalid transfer state: {0}")]
    InvalidTransferState(String),

    #[error("insufficient balance: have={have}, need={need}")]
    InsufficientBalance {
        have: rust_decimal::Decimal,
        need: rust_decimal::Decimal,
    },

    #[error("credit failed unexpectedly for transfer {0}: {1}")]
    CreditFailed(i64, String),

    #[error("storage error: {0}")]
    TransientStorage(String),

    #[error("cache error: {0}")]
    TransientCache(String),

    #[error("message bus error: {0}")]
    TransientMq(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error should cause an MQ consumer to negatively
    /// acknowledge (and thus request redelivery) per spec §7's propagation
    /// policy. `UserNotFound` indicates a data-consistency bug rather than
    /// a transient condition, so it is recorded without redelivery, same
    /// as Validation/Conflict/InvalidTransferState.
    pub fn should_nack(&self) -> bool {
        matches!(
            self,
            Error::TransientStorage(_)
                | Error::TransientCache(_)
                | Error::TransientMq(_)
                | Error::CreditFailed(_, _)
        )
    }
}
