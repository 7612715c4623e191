//! Two-phase balance holds.
//!
//! A reservation deducts funds up front (phase 1) and is later either
//! captured (funds leave the system, audit entry only) or released (funds come
//! back in full). Holding and releasing net to zero on the account.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Amount, EntryType, LedgerError, LedgerResult, Mutation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Held,
    Captured,
    Released,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reservation {
    pub reservation_id: String,
    pub account_id: String,
    pub amount: Amount,
    pub state: ReservationState,
}

impl Reservation {
    /// New hold and the debit that establishes it.
    pub fn hold(account_id: &str, amount: Amount, reference: &str) -> (Self, Mutation) {
        let reservation = Self {
            reservation_id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            amount,
            state: ReservationState::Held,
        };
        let mutation = Mutation::new(account_id, EntryType::WithdrawalPending, amount)
            .with_note(format!("hold {} for {}", reservation.reservation_id, reference));
        (reservation, mutation)
    }

    /// Make the hold permanent. The balance was already reduced, so this only
    /// records an audit entry.
    pub fn capture(&mut self, reference: &str) -> LedgerResult<Mutation> {
        self.close(ReservationState::Captured)?;
        Ok(
            Mutation::new(&self.account_id, EntryType::WithdrawalCompleted, self.amount)
                .with_note(format!("capture {} ({})", self.reservation_id, reference)),
        )
    }

    /// Give the held funds back.
    pub fn release(&mut self, reference: &str) -> LedgerResult<Mutation> {
        self.close(ReservationState::Released)?;
        Ok(
            Mutation::new(&self.account_id, EntryType::WithdrawalRejectedRefund, self.amount)
                .with_note(format!("release {} ({})", self.reservation_id, reference)),
        )
    }

    pub fn is_held(&self) -> bool {
        self.state == ReservationState::Held
    }

    fn close(&mut self, to: ReservationState) -> LedgerResult<()> {
        if !self.is_held() {
            return Err(LedgerError::ReservationClosed(self.reservation_id.clone()));
        }
        self.state = to;
        Ok(())
    }
}
