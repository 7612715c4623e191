// ============================================================================
// APPROVALS - Admin-mediated withdrawals and deposit claims
// ============================================================================
//
// WITHDRAWAL:  request (hold funds) ──approve(tx_ref)──▶ completed (capture)
//                                   └─reject──────────▶ rejected  (release)
//
// DEPOSIT:     report (claim only) ──credit(amount)──▶ processed (ledger credit)
//                                  └─dismiss─────────▶ dismissed (no effect)
//
// Each record changes state at most once. The record update and its ledger
// mutation commit in one batch under a per-record lock, so a double click
// on "approve" cannot capture or credit twice.
//
// ============================================================================

pub mod deposits;
pub mod withdrawals;

use std::sync::Arc;

use thiserror::Error;

use crate::access::AccessControl;
use crate::clock::SharedClock;
use crate::ledger::{LedgerError, LedgerStore};
use crate::storage::{EntityLocks, StoreError};

pub use deposits::{DepositNotification, DepositStatus};
pub use withdrawals::{WithdrawalRequest, WithdrawalStatus};

const MAX_REFERENCE_LEN: usize = 256;

pub type ApprovalResult<T> = Result<T, ApprovalError>;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} was already processed")]
    AlreadyProcessed { kind: &'static str, id: String },

    #[error("notification belongs to {expected}, not {got}")]
    AccountMismatch { expected: String, got: String },

    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("{0} is not an admin")]
    Forbidden(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct Approvals {
    ledger: LedgerStore,
    access: AccessControl,
    clock: SharedClock,
    locks: Arc<EntityLocks>,
}

impl Approvals {
    pub fn new(ledger: LedgerStore, access: AccessControl, clock: SharedClock) -> Self {
        Self {
            ledger,
            access,
            clock,
            locks: Arc::new(EntityLocks::new()),
        }
    }

    fn require_admin(&self, account_id: &str) -> ApprovalResult<()> {
        self.access
            .require_admin(account_id)
            .map_err(|_| ApprovalError::Forbidden(account_id.to_string()))
    }
}

fn check_reference(field: &str, value: &str) -> ApprovalResult<()> {
    if value.trim().is_empty() || value.len() > MAX_REFERENCE_LEN {
        return Err(ApprovalError::InvalidInput(format!(
            "{} must be 1..={} bytes",
            field, MAX_REFERENCE_LEN
        )));
    }
    Ok(())
}
