//! The transfer status graph (spec §4.2): the only legal edges.
//!
//! ```text
//! PENDING           -> DEBIT_PROCESSING
//! PENDING           -> CANCELLED
//! DEBIT_PROCESSING  -> CREDIT_PROCESSING   (debit succeeded)
//! DEBIT_PROCESSING  -> DEBIT_FAILED        (debit failed)
//! CREDIT_PROCESSING -> COMPLETED           (credit succeeded)
//! ```
//!
//! Terminal states (COMPLETED, DEBIT_FAILED, CANCELLED) have no outgoing
//! edges. Any other transition is rejected as `InvalidTransferState`.

use crate::ledger::models::TransferStatus;
use crate::{Error, Result};

const EDGES: &[(TransferStatus, TransferStatus)] = &[
    (TransferStatus::Pending, TransferStatus::DebitProcessing),
    (TransferStatus::Pending, TransferStatus::Cancelled),
    (
        TransferStatus::DebitProcessing,
        TransferStatus::CreditProcessing,
    ),
    (TransferStatus::DebitProcessing, TransferStatus::DebitFailed),
    (TransferStatus::CreditProcessing, TransferStatus::Completed),
];

/// Validate that `from -> to` is a legal edge. Terminal states never
/// transition, including to themselves.
pub fn validate_transition(from: TransferStatus, to: TransferStatus) -> Result<()> {
    if EDGES.iter().any(|&(f, t)| f == from && t == to) {
        Ok(())
    } else {
        Err(Error::InvalidTransferState(format!(
            "illegal transition {} -> {}",
            from, to
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_spec_edge_is_legal() {
        assert!(validate_transition(TransferStatus::Pending, TransferStatus::DebitProcessing).is_ok());
        assert!(validate_transition(TransferStatus::Pending, TransferStatus::Cancelled).is_ok());
        assert!(validate_transition(
            TransferStatus::DebitProcessing,
            TransferStatus::CreditProcessing
        )
        .is_ok());
        assert!(validate_transition(TransferStatus::DebitProcessing, TransferStatus::DebitFailed)
            .is_ok());
        assert!(
            validate_transition(TransferStatus::CreditProcessing, TransferStatus::Completed)
                .is_ok()
        );
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for terminal in [
            TransferStatus::Completed,
            TransferStatus::DebitFailed,
            TransferStatus::Cancelled,
        ] {
            for target in [
                TransferStatus::Pending,
                TransferStatus::DebitProcessing,
                TransferStatus::CreditProcessing,
                TransferStatus::Completed,
                TransferStatus::DebitFailed,
                TransferStatus::Cancelled,
            ] {
                assert!(validate_transition(terminal, target).is_err());
            }
        }
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        // PENDING -> CREDIT_PROCESSING skips the debit stage entirely.
        assert!(
            validate_transition(TransferStatus::Pending, TransferStatus::CreditProcessing)
                .is_err()
        );
        // PENDING -> COMPLETED skips both stages.
        assert!(validate_transition(TransferStatus::Pending, TransferStatus::Completed).is_err());
    }

    #[test]
    fn reverse_edges_are_rejected() {
        assert!(
            validate_transition(TransferStatus::DebitProcessing, TransferStatus::Pending)
                .is_err()
        );
        assert!(validate_transition(
            TransferStatus::CreditProcessing,
            TransferStatus::DebitProcessing
        )
        .is_err());
    }
}
