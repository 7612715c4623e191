//! Self-reported deposits. A notification is a claim, not money: only an
//! admin credit touches the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::events::NotificationKind;
use crate::ledger::{validate_account_id, Amount, EntryType, Mutation, Receipt};
use crate::storage::{Collection, WriteSet};

use super::{check_reference, ApprovalError, ApprovalResult, Approvals};

const KIND: &str = "deposit notification";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Pending,
    Processed,
    Dismissed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DepositNotification {
    pub notification_id: String,
    pub account_id: String,
    pub claimed_amount: Amount,
    /// Unverified; whatever the user pasted.
    pub external_tx_reference: Option<String>,
    pub note: Option<String>,
    pub status: DepositStatus,
    pub credited_amount: Option<Amount>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
}

impl Approvals {
    pub fn report_deposit(
        &self,
        account_id: &str,
        claimed_amount: Amount,
        external_tx_reference: Option<String>,
        note: Option<String>,
    ) -> ApprovalResult<DepositNotification> {
        validate_account_id(account_id)?;
        if claimed_amount == 0 {
            return Err(ApprovalError::InvalidInput("claimed_amount must be positive".into()));
        }
        if let Some(reference) = &external_tx_reference {
            check_reference("external_tx_reference", reference)?;
        }

        let notification = DepositNotification {
            notification_id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            claimed_amount,
            external_tx_reference,
            note,
            status: DepositStatus::Pending,
            credited_amount: None,
            created_at: self.clock.now(),
            processed_at: None,
            processed_by: None,
        };
        let mut writes = WriteSet::new();
        writes.put(
            Collection::Deposits,
            notification.notification_id.as_str(),
            &notification,
        )?;
        self.ledger.store().commit(writes)?;

        info!(
            notification = %notification.notification_id,
            account = %account_id,
            claimed = claimed_amount,
            "📥 Deposit reported"
        );
        Ok(notification)
    }

    /// Credit the admin-verified amount, which may differ from the claim.
    pub fn credit_deposit(
        &self,
        admin: &str,
        notification_id: &str,
        account_id: &str,
        verified_amount: Amount,
    ) -> ApprovalResult<(DepositNotification, Receipt)> {
        self.require_admin(admin)?;
        if verified_amount == 0 {
            return Err(ApprovalError::InvalidInput("verified_amount must be positive".into()));
        }

        let slot = self.locks.slot(&format!("deposit:{}", notification_id));
        let _guard = slot.lock();

        let mut notification = self.pending_deposit(notification_id)?;
        if notification.account_id != account_id {
            return Err(ApprovalError::AccountMismatch {
                expected: notification.account_id,
                got: account_id.to_string(),
            });
        }

        notification.status = DepositStatus::Processed;
        notification.credited_amount = Some(verified_amount);
        notification.processed_at = Some(self.clock.now());
        notification.processed_by = Some(admin.to_string());

        let credit = Mutation::new(account_id, EntryType::Deposit, verified_amount)
            .with_note(format!("deposit notification {}", notification_id));
        let mut attached = WriteSet::new();
        attached.put(Collection::Deposits, notification_id, &notification)?;
        let mut receipts = self.ledger.apply_batch(&[credit], attached)?;
        let receipt = receipts.pop().ok_or_else(|| {
            ApprovalError::InvalidInput("deposit credit produced no receipt".into())
        })?;

        self.ledger.events().notify(
            account_id,
            NotificationKind::DepositCredited {
                notification_id: notification_id.to_string(),
            },
        );
        info!(
            notification = %notification_id,
            account = %account_id,
            claimed = notification.claimed_amount,
            credited = verified_amount,
            admin = %admin,
            "✅ Deposit credited"
        );
        Ok((notification, receipt))
    }

    pub fn dismiss_deposit(&self, admin: &str, notification_id: &str) -> ApprovalResult<DepositNotification> {
        self.require_admin(admin)?;

        let slot = self.locks.slot(&format!("deposit:{}", notification_id));
        let _guard = slot.lock();

        let mut notification = self.pending_deposit(notification_id)?;
        notification.status = DepositStatus::Dismissed;
        notification.processed_at = Some(self.clock.now());
        notification.processed_by = Some(admin.to_string());

        let mut writes = WriteSet::new();
        writes.put(Collection::Deposits, notification_id, &notification)?;
        self.ledger.store().commit(writes)?;

        self.ledger.events().notify(
            &notification.account_id,
            NotificationKind::DepositDismissed {
                notification_id: notification_id.to_string(),
            },
        );
        info!(notification = %notification_id, admin = %admin, "Deposit notification dismissed");
        Ok(notification)
    }

    pub fn deposit(&self, notification_id: &str) -> ApprovalResult<DepositNotification> {
        self.ledger
            .store()
            .get(Collection::Deposits, notification_id)?
            .ok_or_else(|| ApprovalError::NotFound {
                kind: KIND,
                id: notification_id.to_string(),
            })
    }

    fn pending_deposit(&self, notification_id: &str) -> ApprovalResult<DepositNotification> {
        let notification = self.deposit(notification_id)?;
        if notification.status != DepositStatus::Pending {
            return Err(ApprovalError::AlreadyProcessed {
                kind: KIND,
                id: notification_id.to_string(),
            });
        }
        Ok(notification)
    }

    /// Admin queue, oldest first.
    pub fn pending_deposits(&self, admin: &str) -> ApprovalResult<Vec<DepositNotification>> {
        self.require_admin(admin)?;
        let mut pending: Vec<DepositNotification> = self
            .ledger
            .store()
            .scan::<DepositNotification>(Collection::Deposits)?
            .into_iter()
            .filter(|n| n.status == DepositStatus::Pending)
            .collect();
        pending.sort_by_key(|n| n.created_at);
        Ok(pending)
    }
}
