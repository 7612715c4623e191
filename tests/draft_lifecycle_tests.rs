//! Draft lifecycle tests
//!
//! Seating, coin flip, pick rules, turn timers and cancellation, driven
//! through `DraftEngine` with a manual clock.

mod test_helpers;

use std::collections::HashSet;

use draftbook::config::SettlementConfig;
use draftbook::draft::verification::RetryPolicy;
use draftbook::draft::{
    Action, CoinChoice, CoinFace, CreateDraft, DraftEngine, DraftError, DraftStatus, DraftType, PickSource,
    Priority, Side, SubmitPick,
};
use draftbook::ledger::aury;
use draftbook::settlement::Settlement;
use draftbook::storage::{Collection, WriteSet};
use draftbook::Draft;
use test_helpers::*;

fn pick(item: &str) -> SubmitPick {
    SubmitPick {
        item: item.to_string(),
        phase: None,
    }
}

fn on_clock(draft: &Draft) -> String {
    let side = draft.current_turn_side.unwrap();
    draft.team(side).leader.clone().unwrap()
}

// ============================================================================
// SEATING
// ============================================================================

#[test]
fn test_second_leader_opens_coin_flip() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());

    let draft = h.duel(DraftType::DuelPool, hundred());
    assert_eq!(draft.status, DraftStatus::CoinFlip);
    assert_eq!(draft.side_a.leader.as_deref(), Some("alice"));
    assert_eq!(draft.side_b.leader.as_deref(), Some("bob"));
    assert_eq!(draft.payments.len(), 2);
    assert_eq!(h.balance("alice"), aury(50));
    assert_eq!(h.balance("bob"), aury(50));
}

#[test]
fn test_manual_start_duel_waits_for_start() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());

    let mut input = duel_input(DraftType::DuelPool, hundred());
    input.manual_timer_start = Some(true);
    let draft = h.engine.create("alice", input).unwrap();
    let draft = h.engine.join(&draft.draft_id, "bob", None).unwrap();
    assert_eq!(draft.status, DraftStatus::Waiting);

    assert!(matches!(
        h.engine.start(&draft.draft_id, "bob"),
        Err(DraftError::Forbidden { .. })
    ));
    let draft = h.engine.start(&draft.draft_id, "alice").unwrap();
    assert_eq!(draft.status, DraftStatus::CoinFlip);
}

#[test]
fn test_leaving_refunds_entry_fee() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());

    let mut input = duel_input(DraftType::DuelPool, hundred());
    input.manual_timer_start = Some(true);
    let draft = h.engine.create("alice", input).unwrap();
    h.engine.join(&draft.draft_id, "bob", None).unwrap();
    assert_eq!(h.balance("bob"), aury(50));

    let draft = h.engine.leave(&draft.draft_id, "bob").unwrap();
    assert_eq!(h.balance("bob"), hundred());
    assert!(draft.side_b.leader.is_none());
    assert!(!draft.permissions.contains_key("bob"));
    assert!(draft.payments.iter().any(|p| p.account_id == "bob" && p.refunded));
}

#[test]
fn test_invite_list_is_enforced() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("carol", hundred());

    let mut input = duel_input(DraftType::DuelPool, hundred());
    input.invited = Some(vec!["bob".to_string()]);
    let draft = h.engine.create("alice", input).unwrap();

    assert!(matches!(
        h.engine.join(&draft.draft_id, "carol", None),
        Err(DraftError::NotInvited(_))
    ));
    assert_eq!(h.balance("carol"), hundred());
}

#[test]
fn test_duplicate_or_short_pool_rejected() {
    let h = Harness::new();
    h.fund("alice", hundred());

    let mut dup = duel_input(DraftType::DuelPool, hundred());
    dup.item_pool = vec!["x".into(), "x".into()];
    assert!(matches!(h.engine.create("alice", dup), Err(DraftError::InvalidInput(_))));

    let mut short = duel_input(DraftType::DuelPool, hundred());
    short.item_pool = items(DraftType::DuelPool.min_pool_size() - 1);
    assert!(matches!(h.engine.create("alice", short), Err(DraftError::InvalidInput(_))));

    assert_eq!(h.balance("alice"), hundred());
}

#[test]
fn test_team_draft_needs_full_sides() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());

    let input = CreateDraft {
        draft_type: DraftType::TeamSwissA,
        creator_side: Some(Side::A),
        pool_amount: hundred(),
        requires_entry_fee: true,
        is_friendly: false,
        turn_seconds: None,
        manual_timer_start: None,
        item_pool: items(DraftType::TeamSwissA.min_pool_size()),
        invited: None,
    };
    let draft = h.engine.create("alice", input).unwrap();
    let id = draft.draft_id.clone();
    assert!(draft.manual_timer_start);

    h.engine.join(&id, "bob", Some(Side::B)).unwrap();
    assert!(matches!(h.engine.start(&id, "alice"), Err(DraftError::InvalidTransition { .. })));

    for member in ["a2", "a3"] {
        h.engine.join(&id, member, Some(Side::A)).unwrap();
    }
    assert!(matches!(
        h.engine.join(&id, "a4", Some(Side::A)),
        Err(DraftError::SideFull(Side::A))
    ));
    for member in ["b2", "b3"] {
        h.engine.join(&id, member, None).unwrap();
    }

    // Members pay nothing; only the two leaders funded the pool.
    assert_eq!(h.balance("alice"), aury(50));
    assert_eq!(h.balance("bob"), aury(50));

    // A leader with members cannot walk out on them.
    assert!(matches!(h.engine.leave(&id, "bob"), Err(DraftError::InvalidInput(_))));

    let draft = h.engine.start(&id, "alice").unwrap();
    assert_eq!(draft.status, DraftStatus::CoinFlip);

    h.flip(&id);
    let draft = h.play_out(&id);
    assert_eq!(draft.status, DraftStatus::AwaitingVerification);
    assert_eq!(draft.battles.len(), 3);
    assert_eq!(draft.battles[0].seat_a, "alice");
    assert_eq!(draft.battles[0].seat_b, "bob");
    assert_eq!(draft.battles[2].seat_a, "a3");
    assert_eq!(draft.battles[2].seat_b, "b3");
    assert_eq!(draft.picks_of(Side::A).len(), 6);
    assert_eq!(draft.picks_of(Side::B).len(), 6);
}

// ============================================================================
// COIN FLIP
// ============================================================================

#[test]
fn test_coin_flip_resolves_on_second_lock() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());
    let draft = h.duel(DraftType::DuelPool, hundred());

    let draft = h.flip(&draft.draft_id);
    assert_eq!(draft.status, DraftStatus::Active);

    let flip = draft.coin_flip.clone().unwrap();
    let face = flip.result.unwrap();
    let winner = flip.winner.unwrap();
    assert_eq!(winner == Side::A, face == CoinFace::Heads);
    assert_eq!(flip.seed.unwrap().len(), 64);

    // Both asked for First, so the flip winner moves first.
    assert_eq!(draft.first_side, Some(winner));
    assert_eq!(draft.current_turn_side, Some(winner));
    assert_eq!(draft.current_phase, 0);
    assert!(draft.current_turn_started_at.is_some());
}

#[test]
fn test_side_a_must_call_and_locks_once() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());
    let draft = h.duel(DraftType::DuelPool, hundred());
    let id = draft.draft_id;

    let no_call = CoinChoice {
        call: None,
        priority: Priority::Second,
    };
    assert!(matches!(
        h.engine.lock_coin_flip(&id, "alice", no_call),
        Err(DraftError::InvalidInput(_))
    ));

    let bob_choice = CoinChoice {
        call: None,
        priority: Priority::Second,
    };
    let draft = h.engine.lock_coin_flip(&id, "bob", bob_choice).unwrap();
    assert_eq!(draft.status, DraftStatus::CoinFlip);
    assert!(matches!(
        h.engine.lock_coin_flip(&id, "bob", bob_choice),
        Err(DraftError::InvalidTransition { .. })
    ));
    assert!(matches!(
        h.engine.lock_coin_flip(&id, "mallory", bob_choice),
        Err(DraftError::Forbidden { .. })
    ));
}

// ============================================================================
// PICKS
// ============================================================================

#[test]
fn test_out_of_turn_pick_rejected() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());
    let draft = h.duel(DraftType::DuelPool, hundred());
    let draft = h.flip(&draft.draft_id);

    let err = h
        .engine
        .submit_pick(&draft.draft_id, &idle_leader(&draft), pick("unit-00"))
        .unwrap_err();
    assert!(matches!(err, DraftError::InvalidTransition { .. }));
    assert!(h.engine.get(&draft.draft_id).unwrap().pick_history.is_empty());
}

#[test]
fn test_invalid_pick_has_no_effect() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());
    let draft = h.duel(DraftType::DuelPool, hundred());
    let draft = h.flip(&draft.draft_id);
    let version = draft.version;

    let err = h
        .engine
        .submit_pick(&draft.draft_id, &on_clock(&draft), pick("not-a-unit"))
        .unwrap_err();
    assert!(matches!(err, DraftError::InvalidPick { .. }));

    let after = h.engine.get(&draft.draft_id).unwrap();
    assert_eq!(after.version, version);
    assert!(after.pick_history.is_empty());
    assert_eq!(after.current_turn_side, draft.current_turn_side);
}

#[test]
fn test_duel_pool_items_are_unique_across_sides() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());
    let draft = h.duel(DraftType::DuelPool, hundred());
    let draft = h.flip(&draft.draft_id);
    let id = draft.draft_id.clone();

    // First phase is a single pick, so the turn passes straight over.
    let draft = h.engine.submit_pick(&id, &on_clock(&draft), pick("unit-05")).unwrap();
    assert_eq!(draft.current_phase, 1);

    let err = h.engine.submit_pick(&id, &on_clock(&draft), pick("unit-05")).unwrap_err();
    assert!(matches!(err, DraftError::InvalidPick { item, .. } if item == "unit-05"));
}

#[test]
fn test_duel_ban_removes_items_and_allows_mirror_picks() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());
    let draft = h.duel(DraftType::DuelBan, hundred());
    let draft = h.flip(&draft.draft_id);
    let id = draft.draft_id.clone();

    let draft = h.engine.submit_pick(&id, &on_clock(&draft), pick("unit-00")).unwrap();
    assert_eq!(draft.pick_history[0].action, Action::Ban);
    assert!(matches!(
        h.engine.submit_pick(&id, &on_clock(&draft), pick("unit-00")),
        Err(DraftError::InvalidPick { .. })
    ));

    let mut draft = draft;
    for item in ["unit-01", "unit-02", "unit-03"] {
        draft = h.engine.submit_pick(&id, &on_clock(&draft), pick(item)).unwrap();
    }
    assert_eq!(pick_count(&draft, Action::Ban), 4);
    assert_eq!(draft.current_phase().unwrap().action, Action::Pick);

    // Banned items are gone for picks too.
    assert!(matches!(
        h.engine.submit_pick(&id, &on_clock(&draft), pick("unit-02")),
        Err(DraftError::InvalidPick { .. })
    ));

    let draft = h.engine.submit_pick(&id, &on_clock(&draft), pick("unit-07")).unwrap();
    let draft = h.engine.submit_pick(&id, &on_clock(&draft), pick("unit-07")).unwrap();
    let first = draft.first_side.unwrap();
    assert_eq!(draft.picks_of(first), vec!["unit-07"]);
    assert_eq!(draft.picks_of(first.other()), vec!["unit-07"]);
}

#[test]
fn test_full_schedule_builds_battle() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());
    let draft = h.duel(DraftType::DuelPool, hundred());
    h.flip(&draft.draft_id);

    let draft = h.play_out(&draft.draft_id);
    assert_eq!(draft.status, DraftStatus::AwaitingVerification);
    assert_eq!(draft.pick_history.len(), 6);
    assert_eq!(draft.picks_of(Side::A).len(), 3);
    assert_eq!(draft.picks_of(Side::B).len(), 3);
    assert!(draft.current_turn_side.is_none());
    assert_eq!(draft.battles.len(), 1);
    assert_eq!(draft.battles[0].seat_a, "alice");
    assert_eq!(draft.battles[0].seat_b, "bob");
}

// ============================================================================
// TIMERS
// ============================================================================

#[test]
fn test_turn_does_not_expire_at_deadline() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());
    let draft = h.duel(DraftType::DuelPool, hundred());
    let draft = h.flip(&draft.draft_id);

    h.advance(TURN_SECONDS as i64);
    let same = h.engine.get(&draft.draft_id).unwrap();
    assert!(same.pick_history.is_empty());
    assert_eq!(same.version, draft.version);

    // Still in time, so the pick goes through.
    h.engine
        .submit_pick(&draft.draft_id, &on_clock(&draft), pick("unit-03"))
        .unwrap();
}

#[test]
fn test_expired_turn_is_auto_filled_on_read() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());
    let draft = h.duel(DraftType::DuelPool, hundred());
    let draft = h.flip(&draft.draft_id);
    let first = draft.current_turn_side.unwrap();

    h.advance(TURN_SECONDS as i64 + 1);
    let after = h.engine.get(&draft.draft_id).unwrap();
    assert_eq!(after.pick_history.len(), 1);
    assert_eq!(after.pick_history[0].source, PickSource::Timer);
    assert_eq!(after.pick_history[0].side, first);
    assert_eq!(after.current_phase, 1);
    assert_eq!(after.current_turn_side, Some(first.other()));

    // The next turn is timed from the missed deadline, not from the read.
    let deadline = draft.turn_deadline().unwrap();
    assert_eq!(after.current_turn_started_at, Some(deadline));
    assert!(after.version > draft.version);
}

#[test]
fn test_auto_fill_is_reproducible() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());
    let draft = h.duel(DraftType::DuelPool, hundred());
    let draft = h.flip(&draft.draft_id);

    let side = draft.current_turn_side.unwrap();
    let candidates = draft.available_items(side, Action::Pick);
    let expected = &candidates[draftbook::draft::fairness::autofill_index(
        &draft.draft_id,
        0,
        0,
        candidates.len(),
    )];

    h.advance(TURN_SECONDS as i64 + 1);
    let after = h.engine.get(&draft.draft_id).unwrap();
    assert_eq!(&after.pick_history[0].item, expected);
}

#[test]
fn test_long_stall_fills_every_slot_exactly_once() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());
    let draft = h.duel(DraftType::DuelPool, hundred());
    let draft = h.flip(&draft.draft_id);

    h.advance(3_600);
    let after = h.engine.get(&draft.draft_id).unwrap();
    assert_eq!(after.status, DraftStatus::AwaitingVerification);
    assert_eq!(after.pick_history.len(), 6);
    assert!(after.pick_history.iter().all(|p| p.source == PickSource::Timer));

    let distinct: HashSet<&str> = after.pick_history.iter().map(|p| p.item.as_str()).collect();
    assert_eq!(distinct.len(), 6);

    for (phase, step) in DraftType::DuelPool.schedule().iter().enumerate() {
        let in_phase = after.pick_history.iter().filter(|p| p.phase == phase).count();
        assert_eq!(in_phase, step.count as usize);
    }
}

#[test]
fn test_turn_seconds_out_of_range_rejected() {
    let h = Harness::new();
    h.fund("alice", hundred());

    for turn_seconds in [1u64 << 62, u64::MAX, 86_401] {
        let mut input = duel_input(DraftType::DuelPool, hundred());
        input.turn_seconds = Some(turn_seconds);
        assert!(
            matches!(h.engine.create("alice", input), Err(DraftError::InvalidInput(_))),
            "turn_seconds {}",
            turn_seconds
        );
    }
    assert_eq!(h.balance("alice"), hundred());

    h.fund("bob", hundred());
    let mut input = duel_input(DraftType::DuelPool, hundred());
    input.turn_seconds = Some(86_400);
    let draft = h.engine.create("alice", input).unwrap();
    h.engine.join(&draft.draft_id, "bob", None).unwrap();
    h.flip(&draft.draft_id);

    h.advance(3_600);
    let after = h.engine.get(&draft.draft_id).unwrap();
    assert!(after.pick_history.is_empty());
    assert_eq!(after.status, DraftStatus::Active);
}

#[test]
fn test_stored_oversized_timer_is_clamped() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());
    let draft = h.duel(DraftType::DuelPool, hundred());
    let mut draft = h.flip(&draft.draft_id);

    // A record carrying a timer no create call would accept today.
    draft.timer.turn_seconds = 1 << 62;
    let mut writes = WriteSet::new();
    writes.put(Collection::Drafts, draft.draft_id.as_str(), &draft).unwrap();
    h.store.commit(writes).unwrap();

    let settlement = Settlement::new(h.ledger.clone(), SettlementConfig::default());
    let retry = RetryPolicy {
        max_attempts: MAX_ATTEMPTS,
        base_backoff: chrono::Duration::seconds(BACKOFF_SECONDS),
    };
    let restarted = DraftEngine::new(settlement, h.access.clone(), h.clock.clone(), retry, TURN_SECONDS);

    let loaded = restarted.get(&draft.draft_id).unwrap();
    assert!(loaded.pick_history.is_empty());

    // Clamped to one day, after which the turn auto-fills as usual.
    h.advance(86_401);
    let expired = restarted.get(&draft.draft_id).unwrap();
    assert_eq!(expired.pick_history.len(), 1);
    assert_eq!(expired.pick_history[0].source, PickSource::Timer);
}

#[test]
fn test_late_pick_cannot_land_in_next_phase() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());
    let draft = h.duel(DraftType::DuelPool, hundred());
    let draft = h.flip(&draft.draft_id);
    let late_picker = on_clock(&draft);

    h.advance(TURN_SECONDS as i64 + 5);
    let err = h
        .engine
        .submit_pick(
            &draft.draft_id,
            &late_picker,
            SubmitPick {
                item: "unit-09".into(),
                phase: Some(0),
            },
        )
        .unwrap_err();
    assert!(matches!(err, DraftError::InvalidTransition { .. }));

    let after = h.engine.get(&draft.draft_id).unwrap();
    let phase_zero: Vec<_> = after.pick_history.iter().filter(|p| p.phase == 0).collect();
    assert_eq!(phase_zero.len(), 1);
    assert_eq!(phase_zero[0].source, PickSource::Timer);
    assert_eq!(after.pick_history.len(), 1);
}

#[test]
fn test_changed_since_reports_only_newer_versions() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());
    let draft = h.duel(DraftType::DuelPool, hundred());
    let draft = h.flip(&draft.draft_id);

    assert!(h.engine.changed_since(&draft.draft_id, draft.version).unwrap().is_none());

    h.engine
        .submit_pick(&draft.draft_id, &on_clock(&draft), pick("unit-01"))
        .unwrap();
    let newer = h.engine.changed_since(&draft.draft_id, draft.version).unwrap().unwrap();
    assert_eq!(newer.version, draft.version + 1);
}

// ============================================================================
// CANCELLATION & PERSISTENCE
// ============================================================================

#[test]
fn test_cancel_permissions_and_refunds() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());
    let draft = h.duel(DraftType::DuelPool, hundred());
    let id = draft.draft_id.clone();

    assert!(matches!(h.engine.cancel(&id, "bob"), Err(DraftError::Forbidden { .. })));

    h.flip(&id);
    assert!(matches!(
        h.engine.cancel(&id, "alice"),
        Err(DraftError::InvalidTransition { .. })
    ));

    let draft = h.engine.cancel(&id, ADMIN).unwrap();
    assert_eq!(draft.status, DraftStatus::Cancelled);
    assert!(draft.settled);
    assert!(draft.current_turn_side.is_none());
    assert_eq!(h.balance("alice"), hundred());
    assert_eq!(h.balance("bob"), hundred());

    assert!(matches!(h.engine.cancel(&id, ADMIN), Err(DraftError::InvalidTransition { .. })));
    let again = h.engine.settle(&id, ADMIN).unwrap();
    assert_eq!(Some(again), draft.settlement);
    assert_eq!(h.balance("alice"), hundred());
}

#[test]
fn test_spectator_cannot_pick() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());
    let draft = h.duel(DraftType::DuelPool, hundred());
    let id = draft.draft_id.clone();

    let draft = h.engine.spectate(&id, "carol").unwrap();
    assert!(draft.permissions.contains_key("carol"));
    h.flip(&id);
    assert!(matches!(
        h.engine.submit_pick(&id, "carol", pick("unit-00")),
        Err(DraftError::Forbidden { .. })
    ));
}

#[test]
fn test_drafts_reload_from_store() {
    let h = Harness::new();
    h.fund("alice", hundred());
    h.fund("bob", hundred());
    let draft = h.duel(DraftType::DuelPool, hundred());
    let draft = h.flip(&draft.draft_id);

    let stored: Draft = h.store.get(Collection::Drafts, &draft.draft_id).unwrap().unwrap();
    assert_eq!(stored, draft);

    // A fresh engine over the same store loads the draft on first touch.
    let settlement = Settlement::new(h.ledger.clone(), SettlementConfig::default());
    let retry = RetryPolicy {
        max_attempts: MAX_ATTEMPTS,
        base_backoff: chrono::Duration::seconds(BACKOFF_SECONDS),
    };
    let restarted = DraftEngine::new(settlement, h.access.clone(), h.clock.clone(), retry, TURN_SECONDS);
    assert_eq!(restarted.get(&draft.draft_id).unwrap(), draft);
    assert!(matches!(restarted.get("no-such-draft"), Err(DraftError::NotFound(_))));
}
