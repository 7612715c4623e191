//! Draft modes and their pick schedules.
//!
//! A schedule is an ordered list of phases. `Turn::First` phases belong to
//! the side that ended up with priority after the coin flip, `Turn::Second`
//! phases to the other side.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DraftType {
    #[serde(rename = "team-swiss-A")]
    TeamSwissA,
    #[serde(rename = "team-swiss-B")]
    TeamSwissB,
    #[serde(rename = "duel-pool")]
    DuelPool,
    #[serde(rename = "duel-ban")]
    DuelBan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Turn {
    First,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Pick,
    Ban,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub turn: Turn,
    pub action: Action,
    pub count: u32,
}

const fn pick(turn: Turn, count: u32) -> Phase {
    Phase { turn, action: Action::Pick, count }
}

const fn ban(turn: Turn, count: u32) -> Phase {
    Phase { turn, action: Action::Ban, count }
}

use Turn::{First, Second};

// 3-6-3
const TEAM_SWISS_A: [Phase; 3] = [pick(First, 3), pick(Second, 6), pick(First, 3)];

// 1-2-2-2-2-2-1
const TEAM_SWISS_B: [Phase; 7] = [
    pick(First, 1),
    pick(Second, 2),
    pick(First, 2),
    pick(Second, 2),
    pick(First, 2),
    pick(Second, 2),
    pick(First, 1),
];

// 1-2-2-1
const DUEL_POOL: [Phase; 4] = [pick(First, 1), pick(Second, 2), pick(First, 2), pick(Second, 1)];

// bans 1-1-1-1, then picks 1-2-2-1
const DUEL_BAN: [Phase; 8] = [
    ban(First, 1),
    ban(Second, 1),
    ban(First, 1),
    ban(Second, 1),
    pick(First, 1),
    pick(Second, 2),
    pick(First, 2),
    pick(Second, 1),
];

impl DraftType {
    pub fn schedule(self) -> &'static [Phase] {
        match self {
            DraftType::TeamSwissA => &TEAM_SWISS_A,
            DraftType::TeamSwissB => &TEAM_SWISS_B,
            DraftType::DuelPool => &DUEL_POOL,
            DraftType::DuelBan => &DUEL_BAN,
        }
    }

    pub fn is_team(self) -> bool {
        matches!(self, DraftType::TeamSwissA | DraftType::TeamSwissB)
    }

    pub fn seats_per_side(self) -> usize {
        if self.is_team() {
            3
        } else {
            1
        }
    }

    /// One battle per seat pairing.
    pub fn battles_required(self) -> usize {
        self.seats_per_side()
    }

    /// Whether both sides may pick the same item.
    pub fn mirror_picks_allowed(self) -> bool {
        matches!(self, DraftType::DuelBan)
    }

    /// Total picks (not bans) one side makes over the whole schedule.
    pub fn picks_per_side(self, turn: Turn) -> u32 {
        self.schedule()
            .iter()
            .filter(|p| p.action == Action::Pick && p.turn == turn)
            .map(|p| p.count)
            .sum()
    }

    pub fn total_bans(self) -> u32 {
        self.schedule()
            .iter()
            .filter(|p| p.action == Action::Ban)
            .map(|p| p.count)
            .sum()
    }

    /// Smallest item pool that can never run dry, timer auto-fill included.
    pub fn min_pool_size(self) -> usize {
        let first = self.picks_per_side(First);
        let second = self.picks_per_side(Second);
        let picks = if self.mirror_picks_allowed() {
            first.max(second)
        } else {
            first + second
        };
        (picks + self.total_bans()) as usize
    }
}
