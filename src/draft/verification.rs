//! Applying oracle answers to a draft's battles.
//!
//! Everything here is synchronous and works on a draft the caller already
//! holds; the engine does the `await` on the oracle with no lock held and
//! then hands the answers over.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::config::OracleConfig;
use crate::oracle::OracleResponse;

use super::{Battle, BattleStatus, Draft, Side, Winner};

/// Largest backoff exponent; keeps the delay arithmetic bounded.
const MAX_BACKOFF_SHIFT: u32 = 16;
/// Ceiling on a single retry delay (30 days).
const MAX_BACKOFF_SECONDS: i64 = 30 * 86_400;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before the next poll after `attempts` failures: `base * 2^attempts`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let seconds = self
            .base_backoff
            .num_seconds()
            .max(0)
            .saturating_mul(1i64 << attempts.min(MAX_BACKOFF_SHIFT));
        Duration::seconds(seconds.min(MAX_BACKOFF_SECONDS))
    }
}

impl From<&OracleConfig> for RetryPolicy {
    fn from(config: &OracleConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_backoff: Duration::seconds(config.backoff_seconds.min(MAX_BACKOFF_SECONDS as u64) as i64),
        }
    }
}

/// How one oracle answer changed a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Still pending, poll again at `next_attempt_at`.
    Deferred,
    Verified,
    FlaggedForReview,
}

/// Pending battles with a code whose next poll is due.
pub fn due_battles(draft: &Draft, now: DateTime<Utc>) -> Vec<(usize, String)> {
    draft
        .battles
        .iter()
        .filter(|b| b.status == BattleStatus::Pending)
        .filter(|b| b.next_attempt_at.map_or(true, |at| at <= now))
        .filter_map(|b| b.battle_code.clone().map(|code| (b.index, code)))
        .collect()
}

/// Why the reported lineup does not match the draft, if it does not.
pub fn lineup_problem(
    draft: &Draft,
    battle: &Battle,
    used_items: &BTreeMap<String, Vec<String>>,
) -> Option<String> {
    for (account_id, items) in used_items {
        let side = if *account_id == battle.seat_a {
            Side::A
        } else if *account_id == battle.seat_b {
            Side::B
        } else {
            return Some(format!("{} is not seated in battle {}", account_id, battle.index));
        };
        let picks = draft.picks_of(side);
        if let Some(item) = items.iter().find(|item| !picks.contains(&item.as_str())) {
            return Some(format!("{} used undrafted item {}", account_id, item));
        }
    }
    None
}

fn flag(battle: &mut Battle, reason: String) -> Applied {
    warn!(battle = battle.index, reason = %reason, "Battle flagged for review");
    battle.status = BattleStatus::NeedsReview { reason };
    battle.next_attempt_at = None;
    Applied::FlaggedForReview
}

/// Apply one oracle answer to `battle_index` of `draft`.
pub fn apply_response(
    draft: &mut Draft,
    battle_index: usize,
    response: OracleResponse,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Applied {
    let lineup = match &response {
        OracleResponse::Verified { used_items, .. } => draft
            .battles
            .get(battle_index)
            .and_then(|b| lineup_problem(draft, b, used_items)),
        _ => None,
    };

    let Some(battle) = draft.battles.get_mut(battle_index) else {
        return Applied::Deferred;
    };

    match response {
        OracleResponse::Verified { winner_side, used_items } => {
            if let Some(problem) = lineup {
                return flag(battle, problem);
            }
            battle.status = BattleStatus::Verified {
                winner: winner_side.into(),
            };
            battle.used_items = Some(used_items);
            battle.next_attempt_at = None;
            battle.last_error = None;
            debug!(battle = battle.index, winner = ?winner_side, "Battle verified");
            Applied::Verified
        }
        OracleResponse::NotFound => {
            battle.next_attempt_at = Some(now + policy.backoff(0));
            Applied::Deferred
        }
        OracleResponse::PlayerMismatch => flag(battle, "player mismatch".into()),
        OracleResponse::WrongPlayers => flag(battle, "wrong players".into()),
        OracleResponse::Error { message } => {
            let message = message.unwrap_or_else(|| "oracle error".into());
            let delay = policy.backoff(battle.attempts);
            battle.attempts += 1;
            battle.last_error = Some(message.clone());
            if battle.attempts >= policy.max_attempts {
                return flag(
                    battle,
                    format!("oracle failed {} times: {}", battle.attempts, message),
                );
            }
            battle.next_attempt_at = Some(now + delay);
            Applied::Deferred
        }
    }
}

/// Majority outcome once every battle is terminal; ties are a draw.
pub fn overall_winner(draft: &Draft) -> Option<Winner> {
    if draft.battles.is_empty() {
        return None;
    }
    let mut a = 0usize;
    let mut b = 0usize;
    for battle in &draft.battles {
        match battle.status.winner()? {
            Winner::SideA => a += 1,
            Winner::SideB => b += 1,
            Winner::Draw => {}
        }
    }
    Some(match a.cmp(&b) {
        std::cmp::Ordering::Greater => Winner::SideA,
        std::cmp::Ordering::Less => Winner::SideB,
        std::cmp::Ordering::Equal => Winner::Draw,
    })
}
