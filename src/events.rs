//! Outbound event stream.
//!
//! Every committed balance mutation and draft transition is published here,
//! along with "please notify account X" requests. Delivery (websocket, push,
//! email) is the subscriber's problem; publishing never blocks and never fails
//! when nobody is listening.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::draft::DraftStatus;
use crate::ledger::EntryType;

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    YourTurn { draft_id: String },
    DraftStarted { draft_id: String },
    DraftCompleted { draft_id: String },
    DraftCancelled { draft_id: String },
    BattleNeedsReview { draft_id: String, battle_index: usize },
    WithdrawalCompleted { request_id: String },
    WithdrawalRejected { request_id: String },
    DepositCredited { notification_id: String },
    DepositDismissed { notification_id: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    BalanceChanged {
        account_id: String,
        version: u64,
        new_balance: u64,
        entry_type: EntryType,
        at: DateTime<Utc>,
    },
    DraftChanged {
        draft_id: String,
        version: u64,
        status: DraftStatus,
        at: DateTime<Utc>,
    },
    Notify {
        account_id: String,
        notification: NotificationKind,
    },
}

/// Cheap to clone; all clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: DomainEvent) {
        // An error only means there are no subscribers right now.
        let _ = self.sender.send(event);
    }

    pub fn notify(&self, account_id: &str, notification: NotificationKind) {
        self.publish(DomainEvent::Notify {
            account_id: account_id.to_string(),
            notification,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
