//! Draft lifecycle state machine.
//!
//! ```text
//! waiting ──(both sides seated / manual start)──▶ coin_flip
//! coin_flip ──(last side locks in)──▶ active
//! active ──(pick phases exhausted)──▶ awaiting_verification
//! awaiting_verification ──(all battles terminal)──▶ completed
//! waiting | coin_flip | active | awaiting_verification ──(cancel)──▶ cancelled
//! ```
//!
//! A draft is one document. Only [`engine::DraftEngine`] writes `status`,
//! `pick_history` or `current_turn_side`, always under that draft's lock.

pub mod engine;
pub mod fairness;
pub mod modes;
pub mod verification;

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MAX_TURN_SECONDS;
use crate::ledger::{Amount, LedgerError};
use crate::settlement::{SettlementError, SettlementSummary};
use crate::storage::StoreError;

pub use engine::DraftEngine;
pub use modes::{Action, DraftType, Phase, Turn};

// ============================================================================
// ERRORS
// ============================================================================

pub type DraftResult<T> = Result<T, DraftError>;

#[derive(Debug, Error)]
pub enum DraftError {
    #[error("draft not found: {0}")]
    NotFound(String),

    #[error("cannot {action} while draft {draft_id} is {status:?}")]
    InvalidTransition {
        draft_id: String,
        status: DraftStatus,
        action: &'static str,
    },

    #[error("invalid pick {item:?}: {reason}")]
    InvalidPick { item: String, reason: &'static str },

    #[error("{account_id} may not {action}")]
    Forbidden {
        account_id: String,
        action: &'static str,
    },

    #[error("invalid draft input: {0}")]
    InvalidInput(String),

    #[error("{0} already holds a seat in this draft")]
    AlreadySeated(String),

    #[error("side {0:?} is full")]
    SideFull(Side),

    #[error("{0} is not invited to this draft")]
    NotInvited(String),

    #[error("no selectable items left in draft {0}")]
    PoolExhausted(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Settlement(#[from] SettlementError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DraftError {
    pub(crate) fn transition(draft: &Draft, action: &'static str) -> Self {
        DraftError::InvalidTransition {
            draft_id: draft.draft_id.clone(),
            status: draft.status,
            action,
        }
    }
}

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "side_a")]
    A,
    #[serde(rename = "side_b")]
    B,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    SideA,
    SideB,
    Draw,
}

impl From<Side> for Winner {
    fn from(side: Side) -> Self {
        match side {
            Side::A => Winner::SideA,
            Side::B => Winner::SideB,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Waiting,
    CoinFlip,
    Active,
    AwaitingVerification,
    Completed,
    Cancelled,
}

impl DraftStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DraftStatus::Completed | DraftStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftRole {
    Admin,
    SideA,
    SideB,
    Spectator,
}

impl DraftRole {
    pub fn for_side(side: Side) -> Self {
        match side {
            Side::A => DraftRole::SideA,
            Side::B => DraftRole::SideB,
        }
    }

    pub fn side(self) -> Option<Side> {
        match self {
            DraftRole::SideA => Some(Side::A),
            DraftRole::SideB => Some(Side::B),
            DraftRole::Admin | DraftRole::Spectator => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoinFace {
    Heads,
    Tails,
}

impl CoinFace {
    pub fn other(self) -> Self {
        match self {
            CoinFace::Heads => CoinFace::Tails,
            CoinFace::Tails => CoinFace::Heads,
        }
    }
}

/// What the flip winner wants: take the `First` turns or hand them over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    First,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    EntryFee,
    SponsoredPool,
}

// ============================================================================
// SUB-RECORDS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Team {
    pub leader: Option<String>,
    pub members: Vec<String>,
}

impl Team {
    pub fn seated(&self) -> usize {
        self.leader.iter().count() + self.members.len()
    }

    pub fn contains(&self, account_id: &str) -> bool {
        self.leader.as_deref() == Some(account_id) || self.members.iter().any(|m| m == account_id)
    }

    /// Leader first, then members in join order.
    pub fn seats(&self) -> Vec<String> {
        self.leader.iter().cloned().chain(self.members.iter().cloned()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimerConfig {
    pub turn_seconds: u64,
}

impl TimerConfig {
    /// Turn length, clamped to [`MAX_TURN_SECONDS`] for records written
    /// before the bound existed.
    pub fn duration(&self) -> Duration {
        Duration::seconds(self.turn_seconds.min(MAX_TURN_SECONDS) as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum PickSource {
    Player { account_id: String },
    /// Filled by the turn timer.
    Timer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pick {
    pub side: Side,
    pub item: String,
    pub action: Action,
    pub phase: usize,
    pub source: PickSource,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoinFlipState {
    pub side_a_call: Option<CoinFace>,
    pub side_a_priority: Option<Priority>,
    pub side_b_priority: Option<Priority>,
    pub side_a_locked_at: Option<DateTime<Utc>>,
    pub side_b_locked_at: Option<DateTime<Utc>>,
    /// sha256 hex the result was derived from.
    pub seed: Option<String>,
    pub result: Option<CoinFace>,
    pub winner: Option<Side>,
}

impl CoinFlipState {
    pub fn is_locked(&self, side: Side) -> bool {
        match side {
            Side::A => self.side_a_locked_at.is_some(),
            Side::B => self.side_b_locked_at.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Payment {
    pub account_id: String,
    pub amount: Amount,
    pub kind: PaymentKind,
    pub side: Option<Side>,
    pub refunded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BattleStatus {
    Pending,
    /// `Draw` only comes from an admin resolution.
    Verified { winner: Winner },
    NeedsReview { reason: String },
    Disqualified { side: Side },
}

impl BattleStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BattleStatus::Verified { .. } | BattleStatus::Disqualified { .. })
    }

    /// Outcome of this battle, once terminal.
    pub fn winner(&self) -> Option<Winner> {
        match self {
            BattleStatus::Verified { winner } => Some(*winner),
            BattleStatus::Disqualified { side } => Some(side.other().into()),
            BattleStatus::Pending | BattleStatus::NeedsReview { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Battle {
    pub index: usize,
    pub seat_a: String,
    pub seat_b: String,
    pub battle_code: Option<String>,
    pub status: BattleStatus,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub used_items: Option<BTreeMap<String, Vec<String>>>,
}

// ============================================================================
// DRAFT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Draft {
    pub draft_id: String,
    pub draft_type: DraftType,
    pub status: DraftStatus,
    pub creator: String,
    pub side_a: Team,
    pub side_b: Team,
    pub permissions: BTreeMap<String, DraftRole>,
    pub invited: Vec<String>,
    pub timer: TimerConfig,
    pub manual_timer_start: bool,
    pub item_pool: Vec<String>,
    /// Side holding the `First` turns, decided by the coin flip.
    pub first_side: Option<Side>,
    pub current_phase: usize,
    /// Items the active side has already chosen in the current phase.
    pub phase_picks: u32,
    pub current_turn_side: Option<Side>,
    pub current_turn_started_at: Option<DateTime<Utc>>,
    pub pick_history: Vec<Pick>,
    pub coin_flip: Option<CoinFlipState>,
    pub pool_amount: Amount,
    pub entry_fee: Amount,
    pub requires_entry_fee: bool,
    pub is_friendly: bool,
    pub payments: Vec<Payment>,
    pub battles: Vec<Battle>,
    pub overall_winner: Option<Winner>,
    pub settled: bool,
    pub settlement: Option<SettlementSummary>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Draft {
    pub fn team(&self, side: Side) -> &Team {
        match side {
            Side::A => &self.side_a,
            Side::B => &self.side_b,
        }
    }

    pub fn team_mut(&mut self, side: Side) -> &mut Team {
        match side {
            Side::A => &mut self.side_a,
            Side::B => &mut self.side_b,
        }
    }

    pub fn side_of(&self, account_id: &str) -> Option<Side> {
        if self.side_a.contains(account_id) {
            Some(Side::A)
        } else if self.side_b.contains(account_id) {
            Some(Side::B)
        } else {
            None
        }
    }

    pub fn is_full(&self) -> bool {
        let cap = self.draft_type.seats_per_side();
        self.side_a.seated() == cap && self.side_b.seated() == cap
    }

    pub fn current_phase(&self) -> Option<Phase> {
        self.draft_type.schedule().get(self.current_phase).copied()
    }

    /// Side owning a schedule turn once the flip is decided.
    pub fn side_for_turn(&self, turn: Turn) -> Option<Side> {
        self.first_side.map(|first| match turn {
            Turn::First => first,
            Turn::Second => first.other(),
        })
    }

    pub fn turn_deadline(&self) -> Option<DateTime<Utc>> {
        self.current_turn_started_at
            .and_then(|t| t.checked_add_signed(self.timer.duration()))
    }

    /// Items `side` picked (bans excluded).
    pub fn picks_of(&self, side: Side) -> Vec<&str> {
        self.pick_history
            .iter()
            .filter(|p| p.side == side && p.action == Action::Pick)
            .map(|p| p.item.as_str())
            .collect()
    }

    fn is_banned(&self, item: &str) -> bool {
        self.pick_history
            .iter()
            .any(|p| p.action == Action::Ban && p.item == item)
    }

    /// Why `item` cannot be chosen by `side` for `action`, if it cannot.
    pub fn unavailable_reason(&self, side: Side, action: Action, item: &str) -> Option<&'static str> {
        if !self.item_pool.iter().any(|i| i == item) {
            return Some("not in this draft's pool");
        }
        if self.is_banned(item) {
            return Some("banned");
        }
        let picked_by = |s: Side| {
            self.pick_history
                .iter()
                .any(|p| p.action == Action::Pick && p.side == s && p.item == item)
        };
        match action {
            Action::Ban => {
                if picked_by(Side::A) || picked_by(Side::B) {
                    return Some("already picked");
                }
            }
            Action::Pick => {
                if picked_by(side) {
                    return Some("already picked by this side");
                }
                if !self.draft_type.mirror_picks_allowed() && picked_by(side.other()) {
                    return Some("already picked by the opposing side");
                }
            }
        }
        None
    }

    /// Every item `side` may still choose for `action`, in stable sorted order.
    pub fn available_items(&self, side: Side, action: Action) -> Vec<String> {
        let mut items: Vec<String> = self
            .item_pool
            .iter()
            .filter(|item| self.unavailable_reason(side, action, item).is_none())
            .cloned()
            .collect();
        items.sort();
        items
    }

    /// Accounts with a seat on either side.
    pub fn players(&self) -> Vec<String> {
        let mut all = self.side_a.seats();
        all.extend(self.side_b.seats());
        all
    }
}

// ============================================================================
// INPUT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateDraft {
    pub draft_type: DraftType,
    /// Seat the creator as this side's leader; `None` = organizer only.
    pub creator_side: Option<Side>,
    pub pool_amount: Amount,
    pub requires_entry_fee: bool,
    pub is_friendly: bool,
    pub turn_seconds: Option<u64>,
    pub manual_timer_start: Option<bool>,
    pub item_pool: Vec<String>,
    pub invited: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitPick {
    pub item: String,
    /// Phase the client believes is open. A stale value is rejected, so a
    /// pick racing the turn timer can never land in the following phase.
    pub phase: Option<usize>,
}

/// Admin verdict for a battle the oracle could not settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BattleResolution {
    Winner { side: Side },
    Draw,
    Disqualify { side: Side },
}

impl BattleResolution {
    pub fn status(self) -> BattleStatus {
        match self {
            BattleResolution::Winner { side } => BattleStatus::Verified { winner: side.into() },
            BattleResolution::Draw => BattleStatus::Verified { winner: Winner::Draw },
            BattleResolution::Disqualify { side } => BattleStatus::Disqualified { side },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoinChoice {
    /// Required from side A, ignored from side B.
    pub call: Option<CoinFace>,
    pub priority: Priority,
}
