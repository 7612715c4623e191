//! Entry/payout settlement.
//!
//! Turns draft lifecycle events into ledger mutations and commits them in the
//! same redb transaction as the draft document, so money and draft state can
//! never disagree:
//!
//! - creation/join: the side leader's entry fee (or the sponsor's pool)
//! - completion: prize to the winning leader, tax to the house account, or
//!   full `refund_draw` on a draw
//! - cancellation/leave: refund of every recorded payment
//!
//! Every path that pays out sets `draft.settled` inside the committed batch.
//! A second call sees the flag and returns [`SettlementError::AlreadySettled`]
//! without touching the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::SettlementConfig;
use crate::draft::{Draft, DraftStatus, PaymentKind, Payment, Side, Winner};
use crate::ledger::{Amount, EntryType, LedgerError, LedgerStore, Mutation, Receipt};
use crate::storage::{Collection, WriteSet};

/// Result type for settlement operations
pub type SettlementResult<T> = Result<T, SettlementError>;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("draft {0} is already settled")]
    AlreadySettled(String),

    #[error("draft {draft_id} cannot be settled: {reason}")]
    NotSettleable {
        draft_id: String,
        reason: &'static str,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// What a draft costs up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntryCost {
    pub creator_deduction: Amount,
    pub per_player_entry_fee: Amount,
}

impl EntryCost {
    pub const FREE: EntryCost = EntryCost {
        creator_deduction: 0,
        per_player_entry_fee: 0,
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Refund {
    pub account_id: String,
    pub amount: Amount,
    pub entry_type: EntryType,
}

impl Refund {
    pub fn mutation(&self, draft_id: &str) -> Mutation {
        Mutation::new(self.account_id.as_str(), self.entry_type, self.amount).with_draft(draft_id)
    }
}

/// Audit record stored on the draft once it has been settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettlementSummary {
    /// `None` for a cancelled draft.
    pub outcome: Option<Winner>,
    pub collected: Amount,
    pub prize: Amount,
    pub prize_recipient: Option<String>,
    pub tax: Amount,
    pub tax_account: Option<String>,
    pub refunds: Vec<Refund>,
    pub settled_at: DateTime<Utc>,
}

/// Who pays what when the draft is created.
///
/// Split mode charges each side leader half the pool; the creator pays only
/// when seated. Sponsored mode charges the creator the whole pool.
pub fn compute_entry_cost(draft: &Draft, creator_account_id: &str) -> EntryCost {
    if draft.is_friendly {
        return EntryCost::FREE;
    }
    if draft.requires_entry_fee {
        let fee = draft.pool_amount / 2;
        let seated = draft.side_of(creator_account_id).is_some();
        EntryCost {
            creator_deduction: if seated { fee } else { 0 },
            per_player_entry_fee: fee,
        }
    } else {
        EntryCost {
            creator_deduction: draft.pool_amount,
            per_player_entry_fee: 0,
        }
    }
}

/// Fee owed by someone taking a seat after creation. Only a side's first
/// seat (its leader) pays.
pub fn join_fee(draft: &Draft, takes_leader_seat: bool) -> Amount {
    if draft.is_friendly || !draft.requires_entry_fee || !takes_leader_seat {
        0
    } else {
        draft.entry_fee
    }
}

#[derive(Clone)]
pub struct Settlement {
    ledger: LedgerStore,
    policy: SettlementConfig,
}

impl Settlement {
    pub fn new(ledger: LedgerStore, policy: SettlementConfig) -> Self {
        Self { ledger, policy }
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    pub fn policy(&self) -> &SettlementConfig {
        &self.policy
    }

    /// `floor(collected * bps / 10_000)`
    pub fn tax_on(&self, collected: Amount) -> Amount {
        ((collected as u128 * self.policy.tax_bps as u128) / 10_000) as Amount
    }

    /// Persist `draft` together with `mutations` in one atomic batch. Bumps
    /// the draft version; on failure nothing is written and the caller
    /// should drop `draft`.
    pub fn commit(
        &self,
        draft: &mut Draft,
        mutations: &[Mutation],
        now: DateTime<Utc>,
    ) -> Result<Vec<Receipt>, LedgerError> {
        draft.version += 1;
        draft.updated_at = now;
        let mut attached = WriteSet::new();
        attached.put(Collection::Drafts, draft.draft_id.as_str(), &*draft)?;
        self.ledger.apply_batch(mutations, attached)
    }

    /// Record a payment on `draft` and commit it with the matching debit.
    /// A zero amount just persists the draft. On `InsufficientBalance` the
    /// draft is not written, so no record ever implies an uncollected fee.
    pub fn charge_entry(
        &self,
        draft: &mut Draft,
        account_id: &str,
        side: Option<Side>,
        amount: Amount,
        kind: PaymentKind,
        now: DateTime<Utc>,
    ) -> SettlementResult<Option<Receipt>> {
        let mut mutations = Vec::new();
        if amount > 0 {
            let entry_type = match kind {
                PaymentKind::EntryFee => EntryType::EntryFee,
                PaymentKind::SponsoredPool => EntryType::SponsoredPool,
            };
            mutations.push(
                Mutation::new(account_id, entry_type, amount).with_draft(draft.draft_id.as_str()),
            );
            draft.payments.push(Payment {
                account_id: account_id.to_string(),
                amount,
                kind,
                side,
                refunded: false,
            });
        }

        let mut receipts = self.commit(draft, &mutations, now)?;
        if amount > 0 {
            info!(draft = %draft.draft_id, account = %account_id, amount, kind = ?kind, "Entry charged");
        }
        Ok(receipts.pop())
    }

    /// Refunds for every unrefunded payment matching `selects`, marking them
    /// refunded on `draft`.
    pub fn refund_payments<F>(&self, draft: &mut Draft, selects: F) -> Vec<Refund>
    where
        F: Fn(&Payment) -> bool,
    {
        let mut refunds = Vec::new();
        for payment in draft.payments.iter_mut() {
            if payment.refunded || !selects(payment) {
                continue;
            }
            payment.refunded = true;
            refunds.push(Refund {
                account_id: payment.account_id.clone(),
                amount: payment.amount,
                entry_type: match payment.kind {
                    PaymentKind::EntryFee => EntryType::EntryFeeRefund,
                    PaymentKind::SponsoredPool => EntryType::RefundPool,
                },
            });
        }
        refunds
    }

    /// Pay out a completed draft. Runs at most once per draft.
    pub fn settle_draft_completion(
        &self,
        draft: &mut Draft,
        now: DateTime<Utc>,
    ) -> SettlementResult<SettlementSummary> {
        if draft.settled {
            warn!(draft = %draft.draft_id, "Settlement requested twice, ignoring");
            return Err(SettlementError::AlreadySettled(draft.draft_id.clone()));
        }
        if draft.status != DraftStatus::Completed {
            return Err(SettlementError::NotSettleable {
                draft_id: draft.draft_id.clone(),
                reason: "draft is not completed",
            });
        }
        let outcome = draft.overall_winner.ok_or_else(|| SettlementError::NotSettleable {
            draft_id: draft.draft_id.clone(),
            reason: "no overall winner",
        })?;

        let mut next = draft.clone();
        let collected: Amount = next
            .payments
            .iter()
            .filter(|p| !p.refunded)
            .map(|p| p.amount)
            .sum();

        let mut summary = SettlementSummary {
            outcome: Some(outcome),
            collected,
            prize: 0,
            prize_recipient: None,
            tax: 0,
            tax_account: None,
            refunds: Vec::new(),
            settled_at: now,
        };
        let mut mutations = Vec::new();

        match outcome {
            Winner::Draw => {
                for payment in next.payments.iter_mut().filter(|p| !p.refunded) {
                    payment.refunded = true;
                    summary.refunds.push(Refund {
                        account_id: payment.account_id.clone(),
                        amount: payment.amount,
                        entry_type: EntryType::RefundDraw,
                    });
                }
            }
            Winner::SideA | Winner::SideB if collected > 0 => {
                let side = if outcome == Winner::SideA { Side::A } else { Side::B };
                let leader = next.team(side).leader.clone().ok_or_else(|| {
                    SettlementError::NotSettleable {
                        draft_id: next.draft_id.clone(),
                        reason: "winning side has no leader",
                    }
                })?;
                let tax = self.tax_on(collected);
                summary.tax = tax;
                summary.prize = collected - tax;
                summary.prize_recipient = Some(leader.clone());
                if summary.prize > 0 {
                    mutations.push(
                        Mutation::new(leader, EntryType::PrizeWon, summary.prize)
                            .with_draft(next.draft_id.as_str()),
                    );
                }
                if tax > 0 {
                    summary.tax_account = Some(self.policy.house_account.clone());
                    mutations.push(
                        Mutation::new(self.policy.house_account.as_str(), EntryType::TaxCollected, tax)
                            .with_draft(next.draft_id.as_str())
                            .with_note(format!("{} bps", self.policy.tax_bps)),
                    );
                }
            }
            Winner::SideA | Winner::SideB => {}
        }

        mutations.extend(summary.refunds.iter().map(|r| r.mutation(&next.draft_id)));

        next.settled = true;
        next.settlement = Some(summary.clone());
        self.commit(&mut next, &mutations, now)?;
        *draft = next;

        info!(
            draft = %draft.draft_id,
            outcome = ?outcome,
            collected = summary.collected,
            prize = summary.prize,
            tax = summary.tax,
            refunds = summary.refunds.len(),
            "💰 Draft settled"
        );
        Ok(summary)
    }

    /// Refund everything collected by a cancelled draft and mark it settled.
    pub fn settle_cancellation(
        &self,
        draft: &mut Draft,
        now: DateTime<Utc>,
    ) -> SettlementResult<SettlementSummary> {
        if draft.settled {
            return Err(SettlementError::AlreadySettled(draft.draft_id.clone()));
        }
        if draft.status != DraftStatus::Cancelled {
            return Err(SettlementError::NotSettleable {
                draft_id: draft.draft_id.clone(),
                reason: "draft is not cancelled",
            });
        }

        let mut next = draft.clone();
        let collected = next.payments.iter().filter(|p| !p.refunded).map(|p| p.amount).sum();
        let refunds = self.refund_payments(&mut next, |_| true);
        let mutations: Vec<Mutation> = refunds
            .iter()
            .map(|r| r.mutation(&next.draft_id).with_note("draft cancelled"))
            .collect();

        let summary = SettlementSummary {
            outcome: None,
            collected,
            prize: 0,
            prize_recipient: None,
            tax: 0,
            tax_account: None,
            refunds,
            settled_at: now,
        };
        next.settled = true;
        next.settlement = Some(summary.clone());
        self.commit(&mut next, &mutations, now)?;
        *draft = next;

        info!(draft = %draft.draft_id, refunds = summary.refunds.len(), "Cancelled draft refunded");
        Ok(summary)
    }
}
