//! Assertion helpers shared by the state machine tests.

use crate::types::{
    round2, CarbonProject, CreditSelectionState, PaymentState, TransactionStatus,
};

/// Each status carries exactly the fields it promises.
pub fn assert_state_consistent(state: &PaymentState) {
    use TransactionStatus::*;

    if let Some(key) = &state.idempotency_key {
        assert!(!key.as_str().is_empty(), "empty idempotency key");
    }
    match state.status {
        Idle => {
            assert!(
                state.transaction_hash.is_none() && state.error.is_none(),
                "idle state carries leftovers: {state:?}"
            );
        }
        Preparing | Signing | Submitting => {
            assert!(state.idempotency_key.is_some(), "{} without key", state.status);
            assert!(state.transaction_hash.is_none(), "{} with hash", state.status);
            assert!(state.error.is_none(), "{} with error", state.status);
        }
        Confirming => {
            assert!(state.idempotency_key.is_some(), "confirming without key");
            assert!(state.transaction_hash.is_some(), "confirming without hash");
            assert!(state.error.is_none(), "confirming with error");
        }
        Success => {
            assert!(state.transaction_hash.is_some(), "success without hash");
            assert!(state.error.is_none(), "success with error");
        }
        Error => {
            assert!(state.error.is_some(), "error without reason");
        }
    }
}

/// Only forward moves, retries out of `error`, and resets back to `idle`.
pub fn assert_valid_transition(from: TransactionStatus, to: TransactionStatus) {
    use TransactionStatus::*;

    let valid = matches!(
        (from, to),
        (Idle, Preparing)
            | (Preparing, Signing)
            | (Preparing, Error)
            | (Signing, Submitting)
            | (Signing, Error)
            | (Submitting, Confirming)
            | (Submitting, Error)
            | (Confirming, Success)
            | (Confirming, Error)
            | (Error, Preparing)
            | (Error, Confirming)
            | (Success, Idle)
            | (Error, Idle)
            | (Idle, Idle)
    );
    assert!(valid, "invalid status transition: {from} -> {to}");
}

/// Every published state is consistent, every step is a legal transition and
/// the key never changes between resets.
pub fn assert_history_valid(history: &[PaymentState]) {
    for state in history {
        assert_state_consistent(state);
    }
    for pair in history.windows(2) {
        let (before, after) = (&pair[0], &pair[1]);
        assert_valid_transition(before.status, after.status);
        if before.idempotency_key.is_some() && after.status != TransactionStatus::Idle {
            assert_eq!(
                before.idempotency_key, after.idempotency_key,
                "idempotency key changed mid-attempt"
            );
        }
        if before.transaction_hash.is_some() && after.status != TransactionStatus::Idle {
            assert_eq!(
                before.transaction_hash, after.transaction_hash,
                "transaction hash changed mid-attempt"
            );
        }
    }
}

pub fn assert_selection_priced(selection: &CreditSelectionState, project: &CarbonProject) {
    assert_eq!(selection.project_id.as_deref(), Some(project.id.as_str()));
    assert_eq!(
        selection.calculated_price,
        round2(selection.quantity * project.price_per_ton),
        "price of {} t of {} is off",
        selection.quantity,
        project.id
    );
    assert!(selection.quantity <= project.available_supply);
}
