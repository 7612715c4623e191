//! Withdrawal requests, backed by a ledger [`Reservation`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::events::NotificationKind;
use crate::ledger::{validate_account_id, Amount, Mutation, Reservation};
use crate::storage::{Collection, WriteSet};

use super::{check_reference, ApprovalError, ApprovalResult, Approvals};

const KIND: &str = "withdrawal request";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Completed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WithdrawalRequest {
    pub request_id: String,
    pub account_id: String,
    pub amount: Amount,
    pub destination_address: String,
    pub status: WithdrawalStatus,
    pub reservation: Reservation,
    pub tx_reference: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
}

impl Approvals {
    /// Hold `amount` immediately and queue the request for an admin.
    pub fn request_withdrawal(
        &self,
        account_id: &str,
        amount: Amount,
        destination_address: &str,
    ) -> ApprovalResult<WithdrawalRequest> {
        validate_account_id(account_id)?;
        check_reference("destination_address", destination_address)?;
        if amount == 0 {
            return Err(ApprovalError::InvalidInput("amount must be positive".into()));
        }

        let request_id = Uuid::new_v4().to_string();
        let (reservation, hold) = Reservation::hold(account_id, amount, &request_id);
        let request = WithdrawalRequest {
            request_id: request_id.clone(),
            account_id: account_id.to_string(),
            amount,
            destination_address: destination_address.trim().to_string(),
            status: WithdrawalStatus::Pending,
            reservation,
            tx_reference: None,
            rejection_reason: None,
            created_at: self.clock.now(),
            processed_at: None,
            processed_by: None,
        };

        let mut attached = WriteSet::new();
        attached.put(Collection::Withdrawals, request_id.as_str(), &request)?;
        self.ledger.apply_batch(&[hold], attached)?;

        info!(request = %request_id, account = %account_id, amount, "💸 Withdrawal requested, funds held");
        Ok(request)
    }

    /// Mark paid out. The balance was already reduced at request time; only
    /// an audit entry is written.
    pub fn approve_withdrawal(
        &self,
        admin: &str,
        request_id: &str,
        tx_reference: &str,
    ) -> ApprovalResult<WithdrawalRequest> {
        self.require_admin(admin)?;
        check_reference("tx_reference", tx_reference)?;
        self.decide_withdrawal(request_id, |request| {
            let capture = request.reservation.capture(tx_reference)?;
            request.status = WithdrawalStatus::Completed;
            request.tx_reference = Some(tx_reference.trim().to_string());
            request.processed_by = Some(admin.to_string());
            Ok(capture)
        })
    }

    /// Refuse and give the held funds back in full.
    pub fn reject_withdrawal(
        &self,
        admin: &str,
        request_id: &str,
        reason: Option<String>,
    ) -> ApprovalResult<WithdrawalRequest> {
        self.require_admin(admin)?;
        self.decide_withdrawal(request_id, |request| {
            let release = request.reservation.release("withdrawal rejected")?;
            request.status = WithdrawalStatus::Rejected;
            request.rejection_reason = reason;
            request.processed_by = Some(admin.to_string());
            Ok(release)
        })
    }

    fn decide_withdrawal<F>(&self, request_id: &str, decide: F) -> ApprovalResult<WithdrawalRequest>
    where
        F: FnOnce(&mut WithdrawalRequest) -> ApprovalResult<Mutation>,
    {
        let slot = self.locks.slot(&format!("withdrawal:{}", request_id));
        let _guard = slot.lock();

        let mut request = self.withdrawal(request_id)?;
        if request.status != WithdrawalStatus::Pending {
            return Err(ApprovalError::AlreadyProcessed {
                kind: KIND,
                id: request_id.to_string(),
            });
        }

        let mutation = decide(&mut request)?;
        request.processed_at = Some(self.clock.now());

        let mut attached = WriteSet::new();
        attached.put(Collection::Withdrawals, request_id, &request)?;
        self.ledger.apply_batch(&[mutation], attached)?;

        let notification = match request.status {
            WithdrawalStatus::Completed => NotificationKind::WithdrawalCompleted {
                request_id: request_id.to_string(),
            },
            _ => NotificationKind::WithdrawalRejected {
                request_id: request_id.to_string(),
            },
        };
        self.ledger.events().notify(&request.account_id, notification);
        info!(
            request = %request_id,
            account = %request.account_id,
            status = ?request.status,
            by = request.processed_by.as_deref().unwrap_or("-"),
            "Withdrawal decided"
        );
        Ok(request)
    }

    pub fn withdrawal(&self, request_id: &str) -> ApprovalResult<WithdrawalRequest> {
        self.ledger
            .store()
            .get(Collection::Withdrawals, request_id)?
            .ok_or_else(|| ApprovalError::NotFound {
                kind: KIND,
                id: request_id.to_string(),
            })
    }

    /// Admin queue, oldest first.
    pub fn pending_withdrawals(&self, admin: &str) -> ApprovalResult<Vec<WithdrawalRequest>> {
        self.require_admin(admin)?;
        let mut pending: Vec<WithdrawalRequest> = self
            .ledger
            .store()
            .scan::<WithdrawalRequest>(Collection::Withdrawals)?
            .into_iter()
            .filter(|r| r.status == WithdrawalStatus::Pending)
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }
}
