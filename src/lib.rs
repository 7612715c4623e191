//! Draftbook
//!
//! Turn-based draft tournaments with real-money entry fees, backed by an
//! append-only wallet ledger.
//!
//! ## Architecture
//!
//! - **Storage**: ReDB (ACID) + DashMap (account cache)
//! - **Ledger**: integer amounts, one entry per balance change, per-account locks
//! - **Drafts**: one document per draft, mutated under its own lock
//! - **Server**: Axum, identity from the `x-account-id` header

pub mod access;
pub mod approvals;
pub mod clock;
pub mod config;
pub mod draft;
pub mod events;
pub mod ledger;
pub mod oracle;
pub mod routes;
pub mod settlement;
pub mod storage;

// ============================================================================
// PUBLIC API
// ============================================================================

pub use access::{AccessControl, Role};
pub use approvals::{Approvals, DepositNotification, WithdrawalRequest};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::Config;
pub use draft::{Draft, DraftEngine, DraftError, DraftStatus, DraftType, Side};
pub use events::{DomainEvent, EventBus, NotificationKind};
pub use ledger::{aury, Amount, EntryType, LedgerError, LedgerStore, Mutation, AMOUNT_SCALE};
pub use oracle::{HttpMatchOracle, MatchOracle, OracleResponse};
pub use settlement::{Settlement, SettlementError, SettlementSummary};
pub use storage::{Store, StoreError};
