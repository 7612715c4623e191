// ============================================================================
// DRAFT ENGINE - The only writer of draft state
// ============================================================================
//
// Each draft lives behind its own mutex; two drafts never contend.
//
// EVERY OPERATION:
//   lock draft → catch up expired turns (commit if any) → clone
//   → validate + apply on the clone → commit clone (+ ledger mutations)
//   → swap clone in → publish events
//
// A failed operation leaves the in-memory draft untouched, but an expiry
// caught up before it stays committed. A late pick therefore loses to the
// timer with InvalidTransition instead of landing twice.
//
// The oracle is awaited with no lock held; answers only apply to battles
// that are still pending with the same code.
//
// ============================================================================

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::access::AccessControl;
use crate::clock::SharedClock;
use crate::config::MAX_TURN_SECONDS;
use crate::events::{DomainEvent, EventBus, NotificationKind};
use crate::ledger::{validate_account_id, Mutation};
use crate::oracle::MatchOracle;
use crate::settlement::{self, Settlement, SettlementError, SettlementSummary};
use crate::storage::Collection;

use super::fairness;
use super::verification::{self, RetryPolicy};
use super::{
    Battle, BattleResolution, BattleStatus, CoinChoice, CoinFlipState, CreateDraft, Draft,
    DraftError, DraftResult, DraftRole, DraftStatus, PaymentKind, Pick, PickSource, Priority,
    Side, SubmitPick, Team, TimerConfig,
};

const MAX_BATTLE_CODE_LEN: usize = 64;

type Handle = Arc<Mutex<Draft>>;

#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub failed: usize,
}

pub struct DraftEngine {
    drafts: DashMap<String, Handle>,
    settlement: Settlement,
    access: AccessControl,
    clock: SharedClock,
    events: EventBus,
    oracle: Option<Arc<dyn MatchOracle>>,
    retry: RetryPolicy,
    default_turn_seconds: u64,
}

impl DraftEngine {
    pub fn new(
        settlement: Settlement,
        access: AccessControl,
        clock: SharedClock,
        retry: RetryPolicy,
        default_turn_seconds: u64,
    ) -> Self {
        let events = settlement.ledger().events().clone();
        Self {
            drafts: DashMap::new(),
            settlement,
            access,
            clock,
            events,
            oracle: None,
            retry,
            default_turn_seconds,
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn MatchOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn settlement(&self) -> &Settlement {
        &self.settlement
    }

    // ========================================================================
    // PLUMBING
    // ========================================================================

    fn handle(&self, draft_id: &str) -> DraftResult<Handle> {
        if let Some(handle) = self.drafts.get(draft_id) {
            return Ok(handle.value().clone());
        }
        let stored: Option<Draft> = self
            .settlement
            .ledger()
            .store()
            .get(Collection::Drafts, draft_id)?;
        let draft = stored.ok_or_else(|| DraftError::NotFound(draft_id.to_string()))?;
        Ok(self
            .drafts
            .entry(draft_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(draft)))
            .value()
            .clone())
    }

    /// Run `op` on a caught-up copy of the draft. `op` commits through
    /// `self.settlement` when it changes anything; an uncommitted copy is
    /// thrown away.
    fn mutate<R, F>(&self, draft_id: &str, op: F) -> DraftResult<R>
    where
        F: FnOnce(&mut Draft, DateTime<Utc>) -> DraftResult<R>,
    {
        let handle = self.handle(draft_id)?;
        let mut current = handle.lock();
        let now = self.clock.now();
        self.catch_up(&mut current, now)?;

        let mut next = current.clone();
        let out = op(&mut next, now)?;
        if next.version != current.version {
            self.announce(&current, &next);
            *current = next;
        }

        let retired = current.settled && current.status.is_terminal();
        drop(current);
        if retired {
            self.retire(draft_id, &handle);
        }
        Ok(out)
    }

    /// Forget a finished draft's handle; the next touch reloads it from the
    /// store. Skipped while any other caller still holds the handle.
    fn retire(&self, draft_id: &str, handle: &Handle) {
        let removed = self
            .drafts
            .remove_if(draft_id, |_, h| Arc::ptr_eq(h, handle) && Arc::strong_count(h) == 2);
        if removed.is_some() {
            debug!(draft = %draft_id, "Retired settled draft from memory");
        }
    }

    /// Drafts currently held in memory.
    pub fn resident(&self) -> usize {
        self.drafts.len()
    }

    fn catch_up(&self, current: &mut Draft, now: DateTime<Utc>) -> DraftResult<()> {
        if current.status != DraftStatus::Active {
            return Ok(());
        }
        let mut next = current.clone();
        let turns = expire_turns(&mut next, now)?;
        if turns == 0 {
            return Ok(());
        }
        self.settlement.commit(&mut next, &[], now)?;
        info!(
            draft = %next.draft_id,
            turns,
            phase = next.current_phase,
            status = ?next.status,
            "⏰ Expired turns auto-filled"
        );
        self.announce(current, &next);
        *current = next;
        Ok(())
    }

    fn announce(&self, before: &Draft, after: &Draft) {
        self.events.publish(DomainEvent::DraftChanged {
            draft_id: after.draft_id.clone(),
            version: after.version,
            status: after.status,
            at: after.updated_at,
        });
        let draft_id = after.draft_id.clone();

        if before.status != after.status {
            let notification = match after.status {
                DraftStatus::Active => Some(NotificationKind::DraftStarted { draft_id: draft_id.clone() }),
                DraftStatus::Completed => Some(NotificationKind::DraftCompleted { draft_id: draft_id.clone() }),
                DraftStatus::Cancelled => Some(NotificationKind::DraftCancelled { draft_id: draft_id.clone() }),
                _ => None,
            };
            if let Some(notification) = notification {
                for player in after.players() {
                    self.events.notify(&player, notification.clone());
                }
            }
        }

        let turn_moved = before.status != after.status
            || before.current_phase != after.current_phase
            || before.current_turn_side != after.current_turn_side;
        if after.status == DraftStatus::Active && turn_moved {
            if let Some(side) = after.current_turn_side {
                for seat in after.team(side).seats() {
                    self.events.notify(&seat, NotificationKind::YourTurn { draft_id: draft_id.clone() });
                }
            }
        }

        for battle in &after.battles {
            let flagged = |b: &Battle| matches!(b.status, BattleStatus::NeedsReview { .. });
            let was_flagged = before.battles.get(battle.index).map_or(false, flagged);
            if flagged(battle) && !was_flagged {
                for leader in [&after.side_a.leader, &after.side_b.leader].into_iter().flatten() {
                    self.events.notify(
                        leader,
                        NotificationKind::BattleNeedsReview {
                            draft_id: draft_id.clone(),
                            battle_index: battle.index,
                        },
                    );
                }
            }
        }
    }

    fn require_manager(&self, draft: &Draft, account_id: &str, action: &'static str) -> DraftResult<()> {
        let manages = draft.creator == account_id
            || draft.permissions.get(account_id) == Some(&DraftRole::Admin)
            || self.access.is_admin(account_id);
        if manages {
            Ok(())
        } else {
            Err(DraftError::Forbidden {
                account_id: account_id.to_string(),
                action,
            })
        }
    }

    fn require_admin(&self, account_id: &str, action: &'static str) -> DraftResult<()> {
        self.access
            .require_admin(account_id)
            .map_err(|_| DraftError::Forbidden {
                account_id: account_id.to_string(),
                action,
            })
    }

    // ========================================================================
    // CREATION & SEATING
    // ========================================================================

    /// Create a draft and collect the creator's share in the same commit.
    pub fn create(&self, creator: &str, input: CreateDraft) -> DraftResult<Draft> {
        validate_account_id(creator)?;
        let mode = input.draft_type;

        if !input.is_friendly && input.pool_amount == 0 {
            return Err(DraftError::InvalidInput("pool_amount must be positive".into()));
        }

        let mut seen = HashSet::new();
        let mut item_pool = Vec::with_capacity(input.item_pool.len());
        for item in input.item_pool {
            let item = item.trim().to_string();
            if item.is_empty() {
                return Err(DraftError::InvalidInput("empty item in pool".into()));
            }
            if !seen.insert(item.clone()) {
                return Err(DraftError::InvalidInput(format!("duplicate item {:?} in pool", item)));
            }
            item_pool.push(item);
        }
        if item_pool.len() < mode.min_pool_size() {
            return Err(DraftError::InvalidInput(format!(
                "{:?} needs at least {} items, got {}",
                mode,
                mode.min_pool_size(),
                item_pool.len()
            )));
        }

        let turn_seconds = input.turn_seconds.unwrap_or(self.default_turn_seconds);
        if turn_seconds == 0 || turn_seconds > MAX_TURN_SECONDS {
            return Err(DraftError::InvalidInput(format!(
                "turn_seconds must be between 1 and {}",
                MAX_TURN_SECONDS
            )));
        }

        let invited = input.invited.unwrap_or_default();
        for account_id in &invited {
            validate_account_id(account_id)?;
        }

        let now = self.clock.now();
        let fee_split = input.requires_entry_fee && !input.is_friendly;
        let mut draft = Draft {
            draft_id: Uuid::new_v4().to_string(),
            draft_type: mode,
            status: DraftStatus::Waiting,
            creator: creator.to_string(),
            side_a: Team::default(),
            side_b: Team::default(),
            permissions: BTreeMap::new(),
            invited,
            timer: TimerConfig { turn_seconds },
            manual_timer_start: mode.is_team() || input.manual_timer_start.unwrap_or(false),
            item_pool,
            first_side: None,
            current_phase: 0,
            phase_picks: 0,
            current_turn_side: None,
            current_turn_started_at: None,
            pick_history: Vec::new(),
            coin_flip: None,
            pool_amount: input.pool_amount,
            entry_fee: if fee_split { input.pool_amount / 2 } else { 0 },
            requires_entry_fee: input.requires_entry_fee,
            is_friendly: input.is_friendly,
            payments: Vec::new(),
            battles: Vec::new(),
            overall_winner: None,
            settled: false,
            settlement: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let role = match input.creator_side {
            Some(side) => {
                draft.team_mut(side).leader = Some(creator.to_string());
                DraftRole::for_side(side)
            }
            None => DraftRole::Admin,
        };
        draft.permissions.insert(creator.to_string(), role);

        let cost = settlement::compute_entry_cost(&draft, creator);
        let kind = if draft.requires_entry_fee {
            PaymentKind::EntryFee
        } else {
            PaymentKind::SponsoredPool
        };
        self.settlement.charge_entry(
            &mut draft,
            creator,
            input.creator_side,
            cost.creator_deduction,
            kind,
            now,
        )?;

        self.drafts
            .insert(draft.draft_id.clone(), Arc::new(Mutex::new(draft.clone())));
        self.events.publish(DomainEvent::DraftChanged {
            draft_id: draft.draft_id.clone(),
            version: draft.version,
            status: draft.status,
            at: now,
        });
        info!(
            draft = %draft.draft_id,
            creator = %creator,
            mode = ?mode,
            pool = draft.pool_amount,
            charged = cost.creator_deduction,
            "🎲 Draft created"
        );
        Ok(draft)
    }

    /// Seat `account_id`. The first seat on a side is its leader and pays
    /// the entry fee.
    pub fn join(&self, draft_id: &str, account_id: &str, side: Option<Side>) -> DraftResult<Draft> {
        validate_account_id(account_id)?;
        self.mutate(draft_id, |next, now| {
            if next.status != DraftStatus::Waiting {
                return Err(DraftError::transition(next, "join"));
            }
            if next.side_of(account_id).is_some() {
                return Err(DraftError::AlreadySeated(account_id.to_string()));
            }
            if !next.invited.is_empty()
                && next.creator != account_id
                && !next.invited.iter().any(|i| i == account_id)
            {
                return Err(DraftError::NotInvited(account_id.to_string()));
            }

            let cap = next.draft_type.seats_per_side();
            let side = match side {
                Some(side) if next.team(side).seated() >= cap => return Err(DraftError::SideFull(side)),
                Some(side) => side,
                None => [Side::A, Side::B]
                    .into_iter()
                    .filter(|s| next.team(*s).seated() < cap)
                    .min_by_key(|s| next.team(*s).seated())
                    .ok_or(DraftError::SideFull(Side::B))?,
            };

            let team = next.team_mut(side);
            let takes_leader_seat = team.leader.is_none();
            if takes_leader_seat {
                team.leader = Some(account_id.to_string());
            } else {
                team.members.push(account_id.to_string());
            }
            next.permissions
                .insert(account_id.to_string(), DraftRole::for_side(side));

            let both_led = next.side_a.leader.is_some() && next.side_b.leader.is_some();
            if !next.draft_type.is_team() && !next.manual_timer_start && both_led {
                open_coin_flip(next);
            }

            let fee = settlement::join_fee(next, takes_leader_seat);
            self.settlement
                .charge_entry(next, account_id, Some(side), fee, PaymentKind::EntryFee, now)?;
            info!(draft = %next.draft_id, account = %account_id, side = ?side, fee, "Player joined");
            Ok(next.clone())
        })
    }

    /// Give up a seat before play starts. Leaders leave last and get their
    /// entry fee back.
    pub fn leave(&self, draft_id: &str, account_id: &str) -> DraftResult<Draft> {
        self.mutate(draft_id, |next, now| {
            if next.status != DraftStatus::Waiting {
                return Err(DraftError::transition(next, "leave"));
            }
            let side = next
                .side_of(account_id)
                .ok_or_else(|| DraftError::InvalidInput(format!("{} is not seated", account_id)))?;

            let team = next.team_mut(side);
            if team.leader.as_deref() == Some(account_id) {
                if !team.members.is_empty() {
                    return Err(DraftError::InvalidInput(
                        "a leader cannot leave while members remain".into(),
                    ));
                }
                team.leader = None;
            } else {
                team.members.retain(|m| m != account_id);
            }

            if next.creator == account_id {
                next.permissions.insert(account_id.to_string(), DraftRole::Admin);
            } else {
                next.permissions.remove(account_id);
            }

            let refunds = self.settlement.refund_payments(next, |p| {
                p.account_id == account_id && p.kind == PaymentKind::EntryFee
            });
            let mutations: Vec<Mutation> = refunds
                .iter()
                .map(|r| r.mutation(&next.draft_id).with_note("left draft"))
                .collect();
            self.settlement.commit(next, &mutations, now)?;
            info!(draft = %next.draft_id, account = %account_id, refunds = refunds.len(), "Player left");
            Ok(next.clone())
        })
    }

    pub fn spectate(&self, draft_id: &str, account_id: &str) -> DraftResult<Draft> {
        validate_account_id(account_id)?;
        self.mutate(draft_id, |next, now| {
            if next.status.is_terminal() {
                return Err(DraftError::transition(next, "spectate"));
            }
            if next.permissions.contains_key(account_id) {
                return Ok(next.clone());
            }
            next.permissions
                .insert(account_id.to_string(), DraftRole::Spectator);
            self.settlement.commit(next, &[], now)?;
            Ok(next.clone())
        })
    }

    /// Manual start: team modes, and duels created with `manual_timer_start`.
    pub fn start(&self, draft_id: &str, actor: &str) -> DraftResult<Draft> {
        self.mutate(draft_id, |next, now| {
            if next.status != DraftStatus::Waiting {
                return Err(DraftError::transition(next, "start"));
            }
            self.require_manager(next, actor, "start this draft")?;
            let ready = if next.draft_type.is_team() {
                next.is_full()
            } else {
                next.side_a.leader.is_some() && next.side_b.leader.is_some()
            };
            if !ready {
                return Err(DraftError::transition(next, "start before both sides are seated"));
            }
            next.manual_timer_start = false;
            open_coin_flip(next);
            self.settlement.commit(next, &[], now)?;
            info!(draft = %next.draft_id, actor = %actor, "Draft started, awaiting coin flip");
            Ok(next.clone())
        })
    }

    // ========================================================================
    // COIN FLIP & PICKS
    // ========================================================================

    /// Lock one leader's coin-flip choice. The second lock resolves the flip
    /// and opens the first pick phase.
    pub fn lock_coin_flip(&self, draft_id: &str, account_id: &str, choice: CoinChoice) -> DraftResult<Draft> {
        self.mutate(draft_id, |next, now| {
            if next.status != DraftStatus::CoinFlip {
                return Err(DraftError::transition(next, "lock the coin flip"));
            }
            let side = [Side::A, Side::B]
                .into_iter()
                .find(|s| next.team(*s).leader.as_deref() == Some(account_id))
                .ok_or_else(|| DraftError::Forbidden {
                    account_id: account_id.to_string(),
                    action: "lock the coin flip",
                })?;
            if next.coin_flip.as_ref().map_or(false, |f| f.is_locked(side)) {
                return Err(DraftError::transition(next, "lock the coin flip twice"));
            }
            if side == Side::A && choice.call.is_none() {
                return Err(DraftError::InvalidInput("side A must call heads or tails".into()));
            }

            let draft_id = next.draft_id.clone();
            let flip = next.coin_flip.get_or_insert_with(CoinFlipState::default);
            match side {
                Side::A => {
                    flip.side_a_call = choice.call;
                    flip.side_a_priority = Some(choice.priority);
                    flip.side_a_locked_at = Some(now);
                }
                Side::B => {
                    flip.side_b_priority = Some(choice.priority);
                    flip.side_b_locked_at = Some(now);
                }
            }

            let mut first_side = None;
            if let (Some(a_at), Some(b_at), Some(call)) =
                (flip.side_a_locked_at, flip.side_b_locked_at, flip.side_a_call)
            {
                let (seed, face) = fairness::coin_flip(&draft_id, a_at, b_at);
                let winner = if face == call { Side::A } else { Side::B };
                let priority = match winner {
                    Side::A => flip.side_a_priority,
                    Side::B => flip.side_b_priority,
                }
                .unwrap_or(Priority::First);
                info!(draft = %draft_id, face = ?face, winner = ?winner, priority = ?priority, seed = %seed, "🪙 Coin flip resolved");
                flip.seed = Some(seed);
                flip.result = Some(face);
                flip.winner = Some(winner);
                first_side = Some(match priority {
                    Priority::First => winner,
                    Priority::Second => winner.other(),
                });
            }
            if let Some(first) = first_side {
                begin_picking(next, first, now);
            }

            self.settlement.commit(next, &[], now)?;
            Ok(next.clone())
        })
    }

    /// Pick (or ban, per the open phase) one item for the caller's side.
    pub fn submit_pick(&self, draft_id: &str, account_id: &str, pick: SubmitPick) -> DraftResult<Draft> {
        self.mutate(draft_id, |next, now| {
            if next.status != DraftStatus::Active {
                return Err(DraftError::transition(next, "pick"));
            }
            let side = next.side_of(account_id).ok_or_else(|| DraftError::Forbidden {
                account_id: account_id.to_string(),
                action: "pick",
            })?;
            if pick.phase.map_or(false, |p| p != next.current_phase) {
                return Err(DraftError::transition(next, "pick in a closed phase"));
            }
            if next.current_turn_side != Some(side) {
                return Err(DraftError::transition(next, "pick out of turn"));
            }
            let phase = next
                .current_phase()
                .ok_or_else(|| DraftError::transition(next, "pick"))?;
            if let Some(reason) = next.unavailable_reason(side, phase.action, &pick.item) {
                debug!(draft = %next.draft_id, item = %pick.item, reason, "Pick refused");
                return Err(DraftError::InvalidPick {
                    item: pick.item,
                    reason,
                });
            }

            let source = PickSource::Player {
                account_id: account_id.to_string(),
            };
            debug!(draft = %next.draft_id, side = ?side, action = ?phase.action, item = %pick.item, "Pick accepted");
            record_pick(next, side, pick.item, source, now);
            self.settlement.commit(next, &[], now)?;
            Ok(next.clone())
        })
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Current draft, with any expired turns applied first.
    pub fn get(&self, draft_id: &str) -> DraftResult<Draft> {
        self.mutate(draft_id, |next, _| Ok(next.clone()))
    }

    /// `Some(draft)` only if its version moved past `version`.
    pub fn changed_since(&self, draft_id: &str, version: u64) -> DraftResult<Option<Draft>> {
        let draft = self.get(draft_id)?;
        Ok((draft.version > version).then_some(draft))
    }

    // ========================================================================
    // VERIFICATION
    // ========================================================================

    pub fn submit_battle_code(
        &self,
        draft_id: &str,
        account_id: &str,
        battle_index: usize,
        code: &str,
    ) -> DraftResult<Draft> {
        let code = code.trim();
        let well_formed = !code.is_empty()
            && code.len() <= MAX_BATTLE_CODE_LEN
            && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !well_formed {
            return Err(DraftError::InvalidInput(format!("malformed battle code {:?}", code)));
        }

        self.mutate(draft_id, |next, now| {
            if next.status != DraftStatus::AwaitingVerification {
                return Err(DraftError::transition(next, "submit a battle code"));
            }
            let battle = next
                .battles
                .get(battle_index)
                .ok_or_else(|| DraftError::InvalidInput(format!("no battle {}", battle_index)))?;
            let involved = battle.seat_a == account_id
                || battle.seat_b == account_id
                || next.side_a.leader.as_deref() == Some(account_id)
                || next.side_b.leader.as_deref() == Some(account_id);
            if !involved {
                return Err(DraftError::Forbidden {
                    account_id: account_id.to_string(),
                    action: "submit a battle code",
                });
            }
            if battle.status != BattleStatus::Pending {
                return Err(DraftError::transition(next, "submit a code for a decided battle"));
            }

            let battle = &mut next.battles[battle_index];
            battle.battle_code = Some(code.to_string());
            battle.attempts = 0;
            battle.next_attempt_at = None;
            battle.last_error = None;
            self.settlement.commit(next, &[], now)?;
            Ok(next.clone())
        })
    }

    /// Poll the oracle for every due battle and complete the draft once all
    /// battles are decided.
    pub async fn verify(&self, draft_id: &str) -> DraftResult<Draft> {
        let snapshot = self.get(draft_id)?;
        if snapshot.status != DraftStatus::AwaitingVerification {
            return Ok(snapshot);
        }
        let Some(oracle) = self.oracle.clone() else {
            debug!(draft = %draft_id, "No oracle configured, battles need admin resolution");
            return Ok(snapshot);
        };
        let due = verification::due_battles(&snapshot, self.clock.now());
        if due.is_empty() {
            return Ok(snapshot);
        }

        let mut answers = Vec::with_capacity(due.len());
        for (index, code) in due {
            let response = oracle.check(&code).await;
            debug!(draft = %draft_id, battle = index, response = ?response, "Oracle answered");
            answers.push((index, code, response));
        }

        self.mutate(draft_id, |next, now| {
            if next.status != DraftStatus::AwaitingVerification {
                return Ok(next.clone());
            }
            let mut applied = 0;
            for (index, code, response) in answers {
                let still_pending = next.battles.get(index).map_or(false, |b| {
                    b.status == BattleStatus::Pending && b.battle_code.as_deref() == Some(code.as_str())
                });
                if !still_pending {
                    debug!(draft = %next.draft_id, battle = index, "Discarding stale oracle answer");
                    continue;
                }
                verification::apply_response(next, index, response, &self.retry, now);
                applied += 1;
            }
            if applied > 0 {
                self.conclude(next, now)?;
            }
            Ok(next.clone())
        })
    }

    /// Admin verdict for a pending or flagged battle.
    pub fn resolve_battle(
        &self,
        draft_id: &str,
        admin: &str,
        battle_index: usize,
        resolution: BattleResolution,
    ) -> DraftResult<Draft> {
        self.require_admin(admin, "resolve battles")?;
        self.mutate(draft_id, |next, now| {
            if next.status != DraftStatus::AwaitingVerification {
                return Err(DraftError::transition(next, "resolve a battle"));
            }
            let decided = next
                .battles
                .get(battle_index)
                .map(|b| b.status.is_terminal())
                .ok_or_else(|| DraftError::InvalidInput(format!("no battle {}", battle_index)))?;
            if decided {
                return Err(DraftError::transition(next, "resolve an already decided battle"));
            }

            let battle = &mut next.battles[battle_index];
            battle.status = resolution.status();
            battle.next_attempt_at = None;
            info!(draft = %next.draft_id, admin = %admin, battle = battle_index, resolution = ?resolution, "Battle resolved by admin");
            self.conclude(next, now)?;
            Ok(next.clone())
        })
    }

    /// Complete and settle if every battle is decided, otherwise just commit.
    fn conclude(&self, next: &mut Draft, now: DateTime<Utc>) -> DraftResult<Option<SettlementSummary>> {
        match verification::overall_winner(next) {
            Some(winner) => {
                next.status = DraftStatus::Completed;
                next.overall_winner = Some(winner);
                info!(draft = %next.draft_id, winner = ?winner, "🏆 Draft completed");
                Ok(Some(self.settlement.settle_draft_completion(next, now)?))
            }
            None => {
                self.settlement.commit(next, &[], now)?;
                Ok(None)
            }
        }
    }

    // ========================================================================
    // CANCELLATION & SETTLEMENT
    // ========================================================================

    /// Creators may cancel before picking starts; admins at any point.
    /// Every collected payment is refunded in the same commit.
    pub fn cancel(&self, draft_id: &str, actor: &str) -> DraftResult<Draft> {
        self.mutate(draft_id, |next, now| {
            if next.status.is_terminal() {
                return Err(DraftError::transition(next, "cancel"));
            }
            let creator_may = next.creator == actor
                && matches!(next.status, DraftStatus::Waiting | DraftStatus::CoinFlip);
            if !creator_may && !self.access.is_admin(actor) {
                return Err(if next.creator == actor {
                    DraftError::transition(next, "cancel after picking began")
                } else {
                    DraftError::Forbidden {
                        account_id: actor.to_string(),
                        action: "cancel this draft",
                    }
                });
            }

            next.status = DraftStatus::Cancelled;
            next.current_turn_side = None;
            next.current_turn_started_at = None;
            let summary = self.settlement.settle_cancellation(next, now)?;
            warn!(draft = %next.draft_id, actor = %actor, refunds = summary.refunds.len(), "Draft cancelled");
            Ok(next.clone())
        })
    }

    /// Admin re-run of settlement. A draft that is already settled answers
    /// with its stored summary and the ledger is untouched.
    pub fn settle(&self, draft_id: &str, admin: &str) -> DraftResult<SettlementSummary> {
        self.require_admin(admin, "settle drafts")?;
        match self.settle_terminal(draft_id) {
            Err(DraftError::Settlement(SettlementError::AlreadySettled(id))) => {
                debug!(draft = %id, "Settlement already recorded");
                self.get(draft_id)?
                    .settlement
                    .ok_or(DraftError::Settlement(SettlementError::AlreadySettled(id)))
            }
            other => other,
        }
    }

    fn settle_terminal(&self, draft_id: &str) -> DraftResult<SettlementSummary> {
        self.mutate(draft_id, |next, now| match next.status {
            DraftStatus::Completed => Ok(self.settlement.settle_draft_completion(next, now)?),
            DraftStatus::Cancelled => Ok(self.settlement.settle_cancellation(next, now)?),
            _ => Err(DraftError::transition(next, "settle")),
        })
    }

    /// Background pass: catch up timers, poll the oracle, settle anything
    /// left unsettled. Nothing depends on it running.
    pub async fn sweep(&self) -> DraftResult<SweepReport> {
        let stored: Vec<Draft> = self.settlement.ledger().store().scan(Collection::Drafts)?;
        let mut report = SweepReport::default();

        for draft in stored {
            let draft_id = draft.draft_id;
            let outcome = match draft.status {
                DraftStatus::Active => self.get(&draft_id).map(|_| ()),
                DraftStatus::AwaitingVerification => self.verify(&draft_id).await.map(|_| ()),
                DraftStatus::Completed | DraftStatus::Cancelled if !draft.settled => {
                    match self.settle_terminal(&draft_id) {
                        Err(DraftError::Settlement(SettlementError::AlreadySettled(_))) => Ok(()),
                        other => other.map(|_| ()),
                    }
                }
                _ => continue,
            };
            report.checked += 1;
            if let Err(e) = outcome {
                report.failed += 1;
                warn!(draft = %draft_id, error = %e, "Sweep failed for draft");
            }
        }

        debug!(checked = report.checked, failed = report.failed, "Draft sweep finished");
        Ok(report)
    }
}

// ============================================================================
// STATE TRANSITIONS
// ============================================================================

fn open_coin_flip(draft: &mut Draft) {
    draft.status = DraftStatus::CoinFlip;
    draft.coin_flip = Some(CoinFlipState::default());
}

fn begin_picking(draft: &mut Draft, first_side: Side, at: DateTime<Utc>) {
    draft.status = DraftStatus::Active;
    draft.first_side = Some(first_side);
    draft.current_phase = 0;
    draft.phase_picks = 0;
    draft.current_turn_side = draft.current_phase().and_then(|p| draft.side_for_turn(p.turn));
    draft.current_turn_started_at = Some(at);
}

fn record_pick(draft: &mut Draft, side: Side, item: String, source: PickSource, at: DateTime<Utc>) {
    let Some(phase) = draft.current_phase() else {
        return;
    };
    draft.pick_history.push(Pick {
        side,
        item,
        action: phase.action,
        phase: draft.current_phase,
        source,
        at,
    });
    draft.phase_picks += 1;
    if draft.phase_picks >= phase.count {
        advance_phase(draft, at);
    }
}

/// Next phase's turn starts at `at`, which for an expired turn is its
/// deadline rather than the time the expiry was noticed.
fn advance_phase(draft: &mut Draft, at: DateTime<Utc>) {
    draft.current_phase += 1;
    draft.phase_picks = 0;
    match draft.current_phase() {
        Some(phase) => {
            draft.current_turn_side = draft.side_for_turn(phase.turn);
            draft.current_turn_started_at = Some(at);
        }
        None => finish_picking(draft),
    }
}

fn finish_picking(draft: &mut Draft) {
    draft.status = DraftStatus::AwaitingVerification;
    draft.current_turn_side = None;
    draft.current_turn_started_at = None;
    draft.battles = draft
        .side_a
        .seats()
        .into_iter()
        .zip(draft.side_b.seats())
        .take(draft.draft_type.battles_required())
        .enumerate()
        .map(|(index, (seat_a, seat_b))| Battle {
            index,
            seat_a,
            seat_b,
            battle_code: None,
            status: BattleStatus::Pending,
            attempts: 0,
            next_attempt_at: None,
            last_error: None,
            used_items: None,
        })
        .collect();
}

/// Auto-fill every turn whose deadline has strictly passed. Returns how many
/// turns were closed this way.
fn expire_turns(draft: &mut Draft, now: DateTime<Utc>) -> DraftResult<usize> {
    let mut turns = 0;
    while draft.status == DraftStatus::Active {
        let (Some(side), Some(deadline), Some(phase)) =
            (draft.current_turn_side, draft.turn_deadline(), draft.current_phase())
        else {
            break;
        };
        if now <= deadline {
            break;
        }

        for slot in draft.phase_picks..phase.count {
            let mut candidates = draft.available_items(side, phase.action);
            if candidates.is_empty() {
                return Err(DraftError::PoolExhausted(draft.draft_id.clone()));
            }
            let index =
                fairness::autofill_index(&draft.draft_id, draft.current_phase, slot, candidates.len());
            let item = candidates.swap_remove(index);
            debug!(
                draft = %draft.draft_id,
                phase = draft.current_phase,
                slot,
                side = ?side,
                item = %item,
                "Auto-filled expired turn"
            );
            record_pick(draft, side, item, PickSource::Timer, deadline);
        }
        turns += 1;
    }
    Ok(turns)
}
