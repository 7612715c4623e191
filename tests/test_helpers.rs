// ============================================================================
// TEST HELPERS - Shared harness for integration tests
// ============================================================================
//
// Everything runs against an in-memory store and a ManualClock, so timer
// expiry is driven explicitly. The oracle is scripted per battle code.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use parking_lot::Mutex;

use draftbook::access::AccessControl;
use draftbook::approvals::Approvals;
use draftbook::clock::{ManualClock, SharedClock};
use draftbook::config::SettlementConfig;
use draftbook::draft::verification::RetryPolicy;
use draftbook::draft::{
    Action, CoinChoice, CoinFace, CreateDraft, Draft, DraftEngine, DraftStatus, DraftType, Priority, Side,
    SubmitPick,
};
use draftbook::events::EventBus;
use draftbook::ledger::{aury, Amount, EntryType, LedgerStore, Mutation};
use draftbook::oracle::{MatchOracle, OracleResponse};
use draftbook::settlement::Settlement;
use draftbook::storage::Store;

pub const ADMIN: &str = "admin";
pub const HOUSE: &str = "house";
pub const TURN_SECONDS: u64 = 30;
pub const MAX_ATTEMPTS: u32 = 3;
pub const BACKOFF_SECONDS: i64 = 10;

// ============================================================================
// SCRIPTED ORACLE
// ============================================================================

/// Answers queued per battle code; an empty queue answers `NotFound`.
#[derive(Default)]
pub struct ScriptedOracle {
    answers: Mutex<HashMap<String, VecDeque<OracleResponse>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn answer(&self, code: &str, response: OracleResponse) {
        self.answers
            .lock()
            .entry(code.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl MatchOracle for ScriptedOracle {
    async fn check(&self, battle_code: &str) -> OracleResponse {
        self.calls.lock().push(battle_code.to_string());
        self.answers
            .lock()
            .get_mut(battle_code)
            .and_then(|q| q.pop_front())
            .unwrap_or(OracleResponse::NotFound)
    }
}

// ============================================================================
// HARNESS
// ============================================================================

pub struct Harness {
    pub store: Store,
    pub events: EventBus,
    pub ledger: LedgerStore,
    pub access: AccessControl,
    pub clock: Arc<ManualClock>,
    pub oracle: Arc<ScriptedOracle>,
    pub engine: DraftEngine,
    pub approvals: Approvals,
}

impl Harness {
    pub fn new() -> Self {
        let store = Store::in_memory().unwrap();
        let events = EventBus::new();
        let ledger = LedgerStore::new(store.clone(), events.clone());
        let access = AccessControl::load(store.clone(), &[ADMIN.to_string()]).unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let shared: SharedClock = clock.clone();
        let oracle = Arc::new(ScriptedOracle::default());

        let settlement = Settlement::new(
            ledger.clone(),
            SettlementConfig {
                tax_bps: 250,
                house_account: HOUSE.to_string(),
            },
        );
        let retry = RetryPolicy {
            max_attempts: MAX_ATTEMPTS,
            base_backoff: Duration::seconds(BACKOFF_SECONDS),
        };
        let engine = DraftEngine::new(settlement, access.clone(), shared.clone(), retry, TURN_SECONDS)
            .with_oracle(oracle.clone());
        let approvals = Approvals::new(ledger.clone(), access.clone(), shared);

        Self {
            store,
            events,
            ledger,
            access,
            clock,
            oracle,
            engine,
            approvals,
        }
    }

    pub fn fund(&self, account_id: &str, amount: Amount) {
        self.ledger
            .apply_mutation(Mutation::new(account_id, EntryType::Deposit, amount))
            .unwrap();
    }

    pub fn balance(&self, account_id: &str) -> Amount {
        self.ledger.get_balance(account_id).unwrap()
    }

    pub fn advance(&self, seconds: i64) {
        self.clock.advance(Duration::seconds(seconds));
    }

    /// Split-fee duel: alice leads A, bob leads B, each pays half of `pool`.
    /// Returns the draft in `coin_flip`.
    pub fn duel(&self, mode: DraftType, pool: Amount) -> Draft {
        let draft = self
            .engine
            .create("alice", duel_input(mode, pool))
            .unwrap();
        self.engine.join(&draft.draft_id, "bob", None).unwrap()
    }

    /// Both leaders lock in; returns the draft in `active`.
    pub fn flip(&self, draft_id: &str) -> Draft {
        self.engine
            .lock_coin_flip(
                draft_id,
                "alice",
                CoinChoice {
                    call: Some(CoinFace::Heads),
                    priority: Priority::First,
                },
            )
            .unwrap();
        self.advance(1);
        self.engine
            .lock_coin_flip(
                draft_id,
                "bob",
                CoinChoice {
                    call: None,
                    priority: Priority::First,
                },
            )
            .unwrap()
    }

    /// Whoever is on the clock picks the first available item, until the
    /// schedule is exhausted.
    pub fn play_out(&self, draft_id: &str) -> Draft {
        let mut draft = self.engine.get(draft_id).unwrap();
        while draft.status == DraftStatus::Active {
            let side = draft.current_turn_side.unwrap();
            let action = draft.current_phase().unwrap().action;
            let item = draft.available_items(side, action).remove(0);
            let picker = draft.team(side).leader.clone().unwrap();
            draft = self
                .engine
                .submit_pick(
                    draft_id,
                    &picker,
                    SubmitPick {
                        item,
                        phase: Some(draft.current_phase),
                    },
                )
                .unwrap();
        }
        draft
    }
}

pub fn items(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("unit-{:02}", i)).collect()
}

pub fn duel_input(mode: DraftType, pool: Amount) -> CreateDraft {
    CreateDraft {
        draft_type: mode,
        creator_side: Some(Side::A),
        pool_amount: pool,
        requires_entry_fee: true,
        is_friendly: false,
        turn_seconds: None,
        manual_timer_start: None,
        item_pool: items(12),
        invited: None,
    }
}

/// Leader of whichever side is not on the clock.
pub fn idle_leader(draft: &Draft) -> String {
    let side = draft.current_turn_side.unwrap().other();
    draft.team(side).leader.clone().unwrap()
}

pub fn pick_count(draft: &Draft, action: Action) -> usize {
    draft.pick_history.iter().filter(|p| p.action == action).count()
}

pub fn hundred() -> Amount {
    aury(100)
}
