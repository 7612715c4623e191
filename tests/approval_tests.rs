//! Approval workflow tests
//!
//! Withdrawals hold funds at request time and either capture or release
//! them; deposit notifications only move money when an admin credits them.

mod test_helpers;

use draftbook::approvals::{ApprovalError, DepositStatus, WithdrawalStatus};
use draftbook::ledger::{aury, EntryType, LedgerEntry, LedgerError, ReservationState};
use test_helpers::*;

fn entry_types(h: &Harness, account_id: &str) -> Vec<EntryType> {
    let mut entries: Vec<LedgerEntry> = h
        .ledger
        .list_entries(account_id)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    entries.reverse();
    entries.into_iter().map(|e| e.entry_type).collect()
}

// ============================================================================
// WITHDRAWALS
// ============================================================================

#[test]
fn test_withdrawal_holds_then_reject_restores() {
    let h = Harness::new();
    h.fund("alice", hundred());

    let request = h
        .approvals
        .request_withdrawal("alice", aury(40), "0xabc")
        .unwrap();
    assert_eq!(request.status, WithdrawalStatus::Pending);
    assert_eq!(h.balance("alice"), aury(60));

    let pending = h.approvals.pending_withdrawals(ADMIN).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request_id, request.request_id);

    let rejected = h
        .approvals
        .reject_withdrawal(ADMIN, &request.request_id, Some("kyc".into()))
        .unwrap();
    assert_eq!(rejected.status, WithdrawalStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("kyc"));
    assert_eq!(rejected.processed_by.as_deref(), Some(ADMIN));
    assert_eq!(rejected.reservation.state, ReservationState::Released);
    assert_eq!(h.balance("alice"), hundred());

    assert_eq!(
        entry_types(&h, "alice"),
        vec![
            EntryType::Deposit,
            EntryType::WithdrawalPending,
            EntryType::WithdrawalRejectedRefund
        ]
    );
    assert!(h.approvals.pending_withdrawals(ADMIN).unwrap().is_empty());
}

#[test]
fn test_approved_withdrawal_writes_audit_entry_only() {
    let h = Harness::new();
    h.fund("alice", hundred());
    let request = h
        .approvals
        .request_withdrawal("alice", aury(25), "0xabc")
        .unwrap();

    let approved = h
        .approvals
        .approve_withdrawal(ADMIN, &request.request_id, "tx-991")
        .unwrap();
    assert_eq!(approved.status, WithdrawalStatus::Completed);
    assert_eq!(approved.tx_reference.as_deref(), Some("tx-991"));
    assert_eq!(h.balance("alice"), aury(75));
    assert_eq!(
        entry_types(&h, "alice").last(),
        Some(&EntryType::WithdrawalCompleted)
    );
    assert!(h.ledger.reconcile("alice").unwrap().is_balanced());

    // A second decision on the same request is refused and changes nothing.
    assert!(matches!(
        h.approvals.approve_withdrawal(ADMIN, &request.request_id, "tx-992"),
        Err(ApprovalError::AlreadyProcessed { .. })
    ));
    assert!(matches!(
        h.approvals.reject_withdrawal(ADMIN, &request.request_id, None),
        Err(ApprovalError::AlreadyProcessed { .. })
    ));
    assert_eq!(h.balance("alice"), aury(75));
}

#[test]
fn test_withdrawal_beyond_balance_is_refused() {
    let h = Harness::new();
    h.fund("alice", aury(10));

    let err = h
        .approvals
        .request_withdrawal("alice", aury(11), "0xabc")
        .unwrap_err();
    assert!(matches!(
        err,
        ApprovalError::Ledger(LedgerError::InsufficientBalance { .. })
    ));
    assert_eq!(h.balance("alice"), aury(10));
    assert!(h.approvals.pending_withdrawals(ADMIN).unwrap().is_empty());
}

#[test]
fn test_unknown_withdrawal_and_non_admin() {
    let h = Harness::new();
    assert!(matches!(
        h.approvals.approve_withdrawal(ADMIN, "missing", "tx"),
        Err(ApprovalError::NotFound { .. })
    ));
    assert!(matches!(
        h.approvals.pending_withdrawals("alice"),
        Err(ApprovalError::Forbidden(_))
    ));
}

// ============================================================================
// DEPOSITS
// ============================================================================

#[test]
fn test_deposit_credit_uses_verified_amount() {
    let h = Harness::new();

    let notification = h
        .approvals
        .report_deposit("alice", aury(50), Some("0xfeed".into()), Some("from exchange".into()))
        .unwrap();
    assert_eq!(notification.status, DepositStatus::Pending);
    assert_eq!(h.balance("alice"), 0);
    assert_eq!(h.approvals.pending_deposits(ADMIN).unwrap().len(), 1);

    let (processed, receipt) = h
        .approvals
        .credit_deposit(ADMIN, &notification.notification_id, "alice", aury(48))
        .unwrap();
    assert_eq!(processed.status, DepositStatus::Processed);
    assert_eq!(processed.claimed_amount, aury(50));
    assert_eq!(processed.credited_amount, Some(aury(48)));
    assert_eq!(receipt.new_balance, aury(48));
    assert_eq!(h.balance("alice"), aury(48));

    assert!(matches!(
        h.approvals
            .credit_deposit(ADMIN, &notification.notification_id, "alice", aury(48)),
        Err(ApprovalError::AlreadyProcessed { .. })
    ));
    assert_eq!(h.balance("alice"), aury(48));
    assert!(h.approvals.pending_deposits(ADMIN).unwrap().is_empty());
}

#[test]
fn test_deposit_credit_checks_owner() {
    let h = Harness::new();
    let notification = h.approvals.report_deposit("alice", aury(5), None, None).unwrap();

    let err = h
        .approvals
        .credit_deposit(ADMIN, &notification.notification_id, "bob", aury(5))
        .unwrap_err();
    assert!(matches!(err, ApprovalError::AccountMismatch { .. }));
    assert_eq!(h.balance("bob"), 0);
    assert_eq!(
        h.approvals.deposit(&notification.notification_id).unwrap().status,
        DepositStatus::Pending
    );
}

#[test]
fn test_dismissed_deposit_moves_no_money() {
    let h = Harness::new();
    let notification = h.approvals.report_deposit("alice", aury(5), None, None).unwrap();

    assert!(matches!(
        h.approvals.dismiss_deposit("alice", &notification.notification_id),
        Err(ApprovalError::Forbidden(_))
    ));
    let dismissed = h
        .approvals
        .dismiss_deposit(ADMIN, &notification.notification_id)
        .unwrap();
    assert_eq!(dismissed.status, DepositStatus::Dismissed);
    assert_eq!(h.balance("alice"), 0);
    assert!(matches!(
        h.approvals
            .credit_deposit(ADMIN, &notification.notification_id, "alice", aury(5)),
        Err(ApprovalError::AlreadyProcessed { .. })
    ));
}

#[test]
fn test_deposit_input_validation() {
    let h = Harness::new();
    assert!(matches!(
        h.approvals.report_deposit("alice", 0, None, None),
        Err(ApprovalError::InvalidInput(_))
    ));
    assert!(matches!(
        h.approvals.report_deposit("alice", 1, Some("x".repeat(257)), None),
        Err(ApprovalError::InvalidInput(_))
    ));
    let notification = h.approvals.report_deposit("alice", 1, None, None).unwrap();
    assert!(matches!(
        h.approvals.credit_deposit(ADMIN, &notification.notification_id, "alice", 0),
        Err(ApprovalError::InvalidInput(_))
    ));
}
