// ============================================================================
// LEDGER STORE - Balances + Append-Only Entry Log
// ============================================================================
//
// The ONLY component allowed to write `balance`. Everything else asks for a
// `Mutation` and gets back a `Receipt` or a typed refusal.
//
// ATOMIC PRIMITIVE:
//   lock accounts (sorted) → load working copies → validate every mutation
//   → one redb commit (balances + entries + attached records) → refresh cache
//   → publish events
//
// If any mutation in a batch would overdraw its account, nothing is written.
//
// RECONCILIATION INVARIANT:
//   balance == Σ signed_effect(entries)   for every account, at all times
//
// Amounts are u64 scaled by 10^9 (AMOUNT_SCALE). Never floats.
//
// ============================================================================

pub mod entries;
pub mod reservation;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::events::{DomainEvent, EventBus};
use crate::storage::{Collection, EntityLocks, Store, StoreError, WriteSet};

pub use entries::EntryIter;
pub use reservation::{Reservation, ReservationState};

/// Smallest-unit amount (10^-9 AURY).
pub type Amount = u64;

/// 1 AURY = 1_000_000_000 units.
pub const AMOUNT_SCALE: Amount = 1_000_000_000;

const MAX_ACCOUNT_ID_LEN: usize = 128;

/// Whole units to scaled amount.
pub const fn aury(whole: u64) -> Amount {
    whole * AMOUNT_SCALE
}

// ============================================================================
// ERRORS
// ============================================================================

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient balance on {account_id}: have {available}, need {required}")]
    InsufficientBalance {
        account_id: String,
        available: Amount,
        required: Amount,
    },

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("invalid account id: {0:?}")]
    InvalidAccountId(String),

    #[error("invalid mutation: {0}")]
    InvalidMutation(String),

    #[error("reservation {0} is no longer held")]
    ReservationClosed(String),

    #[error("balance overflow on {0}")]
    Overflow(String),

    #[error("reconciliation mismatch on {account_id}: balance {balance}, entries sum to {ledger_sum}")]
    ReconciliationMismatch {
        account_id: String,
        balance: Amount,
        ledger_sum: i128,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// True for failures that mean an invariant is broken rather than a
    /// request being refused.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            LedgerError::ReconciliationMismatch { .. }
                | LedgerError::Overflow(_)
                | LedgerError::Store(StoreError::Corrupt { .. })
        )
    }
}

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Deposit,
    WithdrawalPending,
    WithdrawalCompleted,
    WithdrawalRejectedRefund,
    EntryFee,
    SponsoredPool,
    PrizeWon,
    TaxCollected,
    RefundDraw,
    RefundPool,
    EntryFeeRefund,
}

/// What an entry type does to a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Credit,
    Debit,
    /// Recorded for audit, no balance change.
    Audit,
}

impl EntryType {
    pub fn effect(self) -> Effect {
        match self {
            EntryType::Deposit
            | EntryType::WithdrawalRejectedRefund
            | EntryType::PrizeWon
            | EntryType::TaxCollected
            | EntryType::RefundDraw
            | EntryType::RefundPool
            | EntryType::EntryFeeRefund => Effect::Credit,
            EntryType::WithdrawalPending | EntryType::EntryFee | EntryType::SponsoredPool => {
                Effect::Debit
            }
            EntryType::WithdrawalCompleted => Effect::Audit,
        }
    }

    pub fn signed(self, amount: Amount) -> i128 {
        match self.effect() {
            Effect::Credit => amount as i128,
            Effect::Debit => -(amount as i128),
            Effect::Audit => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Account {
    pub account_id: String,
    pub balance: Amount,
    /// Bumped on every committed mutation.
    pub version: u64,
    /// Sequence number the next entry will get.
    pub next_seq: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    fn open(account_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            account_id: account_id.to_string(),
            balance: 0,
            version: 0,
            next_seq: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub account_id: String,
    pub seq: u64,
    pub entry_type: EntryType,
    /// Unsigned magnitude; the sign comes from `entry_type`.
    pub amount: Amount,
    pub balance_after: Amount,
    pub related_draft_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub note: Option<String>,
}

impl LedgerEntry {
    pub fn signed_effect(&self) -> i128 {
        self.entry_type.signed(self.amount)
    }
}

/// A requested balance change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub account_id: String,
    pub entry_type: EntryType,
    pub amount: Amount,
    pub related_draft_id: Option<String>,
    pub note: Option<String>,
}

impl Mutation {
    pub fn new(account_id: impl Into<String>, entry_type: EntryType, amount: Amount) -> Self {
        Self {
            account_id: account_id.into(),
            entry_type,
            amount,
            related_draft_id: None,
            note: None,
        }
    }

    /// Build from a signed delta. The sign must agree with the entry type;
    /// audit types take a zero delta and a separate magnitude via `new`.
    pub fn from_delta(
        account_id: impl Into<String>,
        delta: i64,
        entry_type: EntryType,
    ) -> LedgerResult<Self> {
        let ok = match entry_type.effect() {
            Effect::Credit => delta > 0,
            Effect::Debit => delta < 0,
            Effect::Audit => false,
        };
        if !ok {
            return Err(LedgerError::InvalidMutation(format!(
                "delta {} does not match {:?}",
                delta, entry_type
            )));
        }
        Ok(Self::new(account_id, entry_type, delta.unsigned_abs()))
    }

    pub fn with_draft(mut self, draft_id: impl Into<String>) -> Self {
        self.related_draft_id = Some(draft_id.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn signed_delta(&self) -> i128 {
        self.entry_type.signed(self.amount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub account_id: String,
    pub entry_id: String,
    pub seq: u64,
    pub entry_type: EntryType,
    pub new_balance: Amount,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub account_id: String,
    pub balance: Amount,
    pub ledger_sum: i128,
    pub entry_count: u64,
}

impl Reconciliation {
    pub fn is_balanced(&self) -> bool {
        self.ledger_sum == self.balance as i128
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub checked: usize,
    pub mismatches: Vec<Reconciliation>,
}

// ============================================================================
// KEYS & VALIDATION
// ============================================================================

pub fn validate_account_id(account_id: &str) -> LedgerResult<()> {
    if account_id.is_empty()
        || account_id.len() > MAX_ACCOUNT_ID_LEN
        || account_id.chars().any(char::is_control)
    {
        return Err(LedgerError::InvalidAccountId(account_id.to_string()));
    }
    Ok(())
}

pub(crate) fn entry_key(account_id: &str, seq: u64) -> String {
    format!("{}\u{1}{:020}", account_id, seq)
}

pub(crate) fn entry_bounds(account_id: &str) -> (String, String) {
    (format!("{}\u{1}", account_id), format!("{}\u{2}", account_id))
}

// ============================================================================
// LEDGER STORE
// ============================================================================

/// `Clone` is cheap; all clones share cache, locks and database.
#[derive(Clone)]
pub struct LedgerStore {
    store: Store,
    cache: Arc<DashMap<String, Account>>,
    locks: Arc<EntityLocks>,
    events: EventBus,
}

impl LedgerStore {
    pub fn new(store: Store, events: EventBus) -> Self {
        Self {
            store,
            cache: Arc::new(DashMap::new()),
            locks: Arc::new(EntityLocks::new()),
            events,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        validate_account_id(account_id)?;
        if let Some(account) = self.cache.get(account_id) {
            return Ok(Some(account.clone()));
        }
        // Fill the cache only under the account lock, so a read that raced
        // a commit can never put an older copy back.
        let slot = self.locks.slot(account_id);
        let _guard = slot.lock();
        let account = self.load_locked(account_id)?;
        if let Some(account) = &account {
            self.cache
                .entry(account_id.to_string())
                .or_insert_with(|| account.clone());
        }
        Ok(account)
    }

    /// Current balance; 0 for an account that was never credited.
    pub fn get_balance(&self, account_id: &str) -> LedgerResult<Amount> {
        Ok(self.account(account_id)?.map(|a| a.balance).unwrap_or(0))
    }

    /// Newest-first, paged lazily from storage.
    pub fn list_entries(&self, account_id: &str) -> LedgerResult<EntryIter> {
        validate_account_id(account_id)?;
        Ok(EntryIter::new(self.store.clone(), account_id))
    }

    /// Newest-first history resumed from a cursor (see [`EntryIter::cursor`]).
    pub fn list_entries_before(&self, account_id: &str, before: Option<u64>) -> LedgerResult<EntryIter> {
        validate_account_id(account_id)?;
        Ok(EntryIter::resume(self.store.clone(), account_id, before))
    }

    /// Entries with `seq >= since`, oldest first.
    pub fn entries_since(&self, account_id: &str, since: u64) -> LedgerResult<Vec<LedgerEntry>> {
        validate_account_id(account_id)?;
        let (_, hi) = entry_bounds(account_id);
        let lo = entry_key(account_id, since);
        let entries: Vec<(String, LedgerEntry)> =
            self.store.range(Collection::LedgerEntries, &lo, &hi)?;
        Ok(entries.into_iter().map(|(_, e)| e).collect())
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    pub fn apply_mutation(&self, mutation: Mutation) -> LedgerResult<Receipt> {
        let mut receipts = self.apply_batch(std::slice::from_ref(&mutation), WriteSet::new())?;
        receipts
            .pop()
            .ok_or_else(|| LedgerError::InvalidMutation("empty batch".into()))
    }

    /// Apply every mutation and commit `attached` records alongside, or do
    /// nothing at all.
    pub fn apply_batch(&self, mutations: &[Mutation], attached: WriteSet) -> LedgerResult<Vec<Receipt>> {
        for m in mutations {
            validate_account_id(&m.account_id)?;
            if m.amount == 0 {
                return Err(LedgerError::InvalidMutation(format!(
                    "zero amount for {:?} on {}",
                    m.entry_type, m.account_id
                )));
            }
        }

        if mutations.is_empty() {
            self.store.commit(attached)?;
            return Ok(Vec::new());
        }

        let slots = self.locks.slots(mutations.iter().map(|m| m.account_id.as_str()));
        let _guards: Vec<_> = slots.iter().map(|s| s.lock()).collect();

        let now = Utc::now();
        let mut working: HashMap<String, Account> = HashMap::new();
        let mut writes = WriteSet::new();
        let mut receipts = Vec::with_capacity(mutations.len());

        for m in mutations {
            if !working.contains_key(&m.account_id) {
                let loaded = match self.load_locked(&m.account_id)? {
                    Some(existing) => existing,
                    // First-ever credit opens the account at zero.
                    None if m.entry_type.effect() == Effect::Credit => {
                        Account::open(&m.account_id, now)
                    }
                    None => return Err(LedgerError::AccountNotFound(m.account_id.clone())),
                };
                working.insert(m.account_id.clone(), loaded);
            }

            let account = working
                .get_mut(&m.account_id)
                .ok_or_else(|| LedgerError::AccountNotFound(m.account_id.clone()))?;

            let new_balance = match m.entry_type.effect() {
                Effect::Credit => account
                    .balance
                    .checked_add(m.amount)
                    .ok_or_else(|| LedgerError::Overflow(m.account_id.clone()))?,
                Effect::Debit => {
                    if m.amount > account.balance {
                        debug!(
                            account = %m.account_id,
                            available = account.balance,
                            required = m.amount,
                            entry_type = ?m.entry_type,
                            "Mutation refused: insufficient balance"
                        );
                        return Err(LedgerError::InsufficientBalance {
                            account_id: m.account_id.clone(),
                            available: account.balance,
                            required: m.amount,
                        });
                    }
                    account.balance - m.amount
                }
                Effect::Audit => account.balance,
            };

            let entry = LedgerEntry {
                entry_id: Uuid::new_v4().to_string(),
                account_id: m.account_id.clone(),
                seq: account.next_seq,
                entry_type: m.entry_type,
                amount: m.amount,
                balance_after: new_balance,
                related_draft_id: m.related_draft_id.clone(),
                timestamp: now,
                note: m.note.clone(),
            };

            account.balance = new_balance;
            account.next_seq += 1;
            account.version += 1;
            account.updated_at = now;

            writes.put(
                Collection::LedgerEntries,
                entry_key(&entry.account_id, entry.seq),
                &entry,
            )?;
            receipts.push(Receipt {
                account_id: entry.account_id.clone(),
                entry_id: entry.entry_id,
                seq: entry.seq,
                entry_type: entry.entry_type,
                new_balance,
                version: account.version,
            });
        }

        for account in working.values() {
            writes.put(Collection::Accounts, account.account_id.as_str(), account)?;
        }
        writes.extend(attached);

        self.store.commit(writes)?;

        for (id, account) in working {
            self.cache.insert(id, account);
        }

        for (m, r) in mutations.iter().zip(&receipts) {
            info!(
                account = %r.account_id,
                entry_type = ?r.entry_type,
                amount = m.amount,
                new_balance = r.new_balance,
                draft = m.related_draft_id.as_deref().unwrap_or("-"),
                "✅ Ledger mutation committed"
            );
            self.events.publish(DomainEvent::BalanceChanged {
                account_id: r.account_id.clone(),
                version: r.version,
                new_balance: r.new_balance,
                entry_type: r.entry_type,
                at: now,
            });
        }

        Ok(receipts)
    }

    // Caller must hold the account's slot.
    fn load_locked(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        if let Some(account) = self.cache.get(account_id) {
            return Ok(Some(account.clone()));
        }
        Ok(self.store.get(Collection::Accounts, account_id)?)
    }

    // ========================================================================
    // RECONCILIATION
    // ========================================================================

    /// Check `balance == Σ entries` for one account under its lock.
    pub fn reconcile(&self, account_id: &str) -> LedgerResult<Reconciliation> {
        validate_account_id(account_id)?;
        let slot = self.locks.slot(account_id);
        let _guard = slot.lock();

        let account: Option<Account> = self.store.get(Collection::Accounts, account_id)?;
        let (balance, next_seq) = account.map(|a| (a.balance, a.next_seq)).unwrap_or((0, 0));

        let (lo, hi) = entry_bounds(account_id);
        let entries: Vec<(String, LedgerEntry)> =
            self.store.range(Collection::LedgerEntries, &lo, &hi)?;
        let ledger_sum: i128 = entries.iter().map(|(_, e)| e.signed_effect()).sum();

        let report = Reconciliation {
            account_id: account_id.to_string(),
            balance,
            ledger_sum,
            entry_count: entries.len() as u64,
        };

        if !report.is_balanced() || report.entry_count != next_seq {
            error!(
                account = %account_id,
                balance,
                ledger_sum,
                entries = report.entry_count,
                next_seq,
                "🚨 RECONCILIATION MISMATCH"
            );
            return Err(LedgerError::ReconciliationMismatch {
                account_id: account_id.to_string(),
                balance,
                ledger_sum,
            });
        }
        Ok(report)
    }

    pub fn reconcile_all(&self) -> LedgerResult<ReconciliationReport> {
        let accounts: Vec<Account> = self.store.scan(Collection::Accounts)?;
        let mut mismatches = Vec::new();
        for account in &accounts {
            match self.reconcile(&account.account_id) {
                Ok(_) => {}
                Err(LedgerError::ReconciliationMismatch {
                    account_id,
                    balance,
                    ledger_sum,
                }) => mismatches.push(Reconciliation {
                    account_id,
                    balance,
                    ledger_sum,
                    entry_count: account.next_seq,
                }),
                Err(e) => return Err(e),
            }
        }
        info!(checked = accounts.len(), mismatches = mismatches.len(), "Reconciliation sweep finished");
        Ok(ReconciliationReport {
            checked: accounts.len(),
            mismatches,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
