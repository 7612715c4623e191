// ============================================================================
// DRAFTBOOK - DURABLE DOCUMENT STORE
// ============================================================================
//
// Simple, production-ready storage using:
// - ReDB: ACID-compliant embedded database (key-value, MVCC)
// - serde_json documents, one table per collection
//
// LOGICAL LAYOUT:
//   accounts/{accountId}                      → Account
//   ledger_entries/{accountId}\x01{seq:020}   → LedgerEntry (append-only)
//   withdrawal_requests/{requestId}           → WithdrawalRequest
//   deposit_notifications/{notificationId}    → DepositNotification
//   drafts/{draftId}                          → Draft (whole lifecycle, one doc)
//   roles/{accountId}                         → Role
//
// CONCURRENCY MODEL:
// - Reads: MVCC snapshots, never blocked by writers
// - Writes: a WriteSet commits in ONE redb write transaction, so a draft
//   document and the ledger mutations it triggers land together or not at all
// - Logical exclusion (per account, per draft, per request) lives in
//   `locks::EntityLocks`; redb only serializes the final commit
//
// ============================================================================

pub mod locks;

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

pub use locks::EntityLocks;

// ============================================================================
// REDB TABLE DEFINITIONS
// ============================================================================

const ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("accounts");
const LEDGER_ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("ledger_entries");
const WITHDRAWALS: TableDefinition<&str, &[u8]> = TableDefinition::new("withdrawal_requests");
const DEPOSITS: TableDefinition<&str, &[u8]> = TableDefinition::new("deposit_notifications");
const DRAFTS: TableDefinition<&str, &[u8]> = TableDefinition::new("drafts");
const ROLES: TableDefinition<&str, &[u8]> = TableDefinition::new("roles");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    Accounts,
    LedgerEntries,
    Withdrawals,
    Deposits,
    Drafts,
    Roles,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Accounts,
        Collection::LedgerEntries,
        Collection::Withdrawals,
        Collection::Deposits,
        Collection::Drafts,
        Collection::Roles,
    ];

    fn table(self) -> TableDefinition<'static, &'static str, &'static [u8]> {
        match self {
            Collection::Accounts => ACCOUNTS,
            Collection::LedgerEntries => LEDGER_ENTRIES,
            Collection::Withdrawals => WITHDRAWALS,
            Collection::Deposits => DEPOSITS,
            Collection::Drafts => DRAFTS,
            Collection::Roles => ROLES,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Collection::Accounts => "accounts",
            Collection::LedgerEntries => "ledger_entries",
            Collection::Withdrawals => "withdrawal_requests",
            Collection::Deposits => "deposit_notifications",
            Collection::Drafts => "drafts",
            Collection::Roles => "roles",
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] redb::Error),

    #[error("failed to encode {collection} record: {source}")]
    Encode {
        collection: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt {collection} record {key:?}: {reason}")]
    Corrupt {
        collection: &'static str,
        key: String,
        reason: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

macro_rules! redb_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(e: $ty) -> Self {
                    StoreError::Database(e.into())
                }
            }
        )*
    };
}

redb_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

// ============================================================================
// WRITE SET
// ============================================================================

/// Records to be committed together.
#[derive(Debug, Default)]
pub struct WriteSet {
    puts: Vec<(Collection, String, Vec<u8>)>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Serialize>(
        &mut self,
        collection: Collection,
        key: impl Into<String>,
        value: &T,
    ) -> StoreResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Encode {
            collection: collection.name(),
            source,
        })?;
        self.puts.push((collection, key.into(), bytes));
        Ok(())
    }

    pub fn extend(&mut self, other: WriteSet) {
        self.puts.extend(other.puts);
    }

    pub fn is_empty(&self) -> bool {
        self.puts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.puts.len()
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Handle to the redb database. `Clone` is cheap (Arc).
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Create or open `{dir}/draftbook.redb`.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref();
        info!(path = %dir.display(), "Opening ReDB database");
        std::fs::create_dir_all(dir)?;
        let db = Database::create(dir.join("draftbook.redb"))?;
        Self::init(db)
    }

    /// Volatile database for tests and benches.
    pub fn in_memory() -> StoreResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StoreResult<Self> {
        let write_txn = db.begin_write()?;
        for collection in Collection::ALL {
            let _ = write_txn.open_table(collection.table())?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn get<T: DeserializeOwned>(&self, collection: Collection, key: &str) -> StoreResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(collection.table())?;
        let result = match table.get(key)? {
            Some(access) => Some(decode(collection, key, access.value())?),
            None => None,
        };
        Ok(result)
    }

    /// Every record in a collection, in key order.
    pub fn scan<T: DeserializeOwned>(&self, collection: Collection) -> StoreResult<Vec<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(collection.table())?;
        let mut records = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            records.push(decode(collection, key.value(), value.value())?);
        }
        Ok(records)
    }

    /// Records with keys in `[lo, hi)`, newest key first, at most `limit`.
    pub fn range_rev<T: DeserializeOwned>(
        &self,
        collection: Collection,
        lo: &str,
        hi: &str,
        limit: usize,
    ) -> StoreResult<Vec<(String, T)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(collection.table())?;
        let mut records = Vec::new();
        for item in table.range(lo..hi)?.rev().take(limit) {
            let (key, value) = item?;
            let key = key.value().to_string();
            let record = decode(collection, &key, value.value())?;
            records.push((key, record));
        }
        Ok(records)
    }

    /// Records with keys in `[lo, hi)`, oldest key first.
    pub fn range<T: DeserializeOwned>(
        &self,
        collection: Collection,
        lo: &str,
        hi: &str,
    ) -> StoreResult<Vec<(String, T)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(collection.table())?;
        let mut records = Vec::new();
        for item in table.range(lo..hi)? {
            let (key, value) = item?;
            let key = key.value().to_string();
            let record = decode(collection, &key, value.value())?;
            records.push((key, record));
        }
        Ok(records)
    }

    /// Commit every put in one write transaction.
    pub fn commit(&self, writes: WriteSet) -> StoreResult<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let write_txn = self.db.begin_write()?;
        for collection in Collection::ALL {
            let mut puts = writes
                .puts
                .iter()
                .filter(|(c, _, _)| *c == collection)
                .peekable();
            if puts.peek().is_none() {
                continue;
            }
            let mut table = write_txn.open_table(collection.table())?;
            for (_, key, bytes) in puts {
                table.insert(key.as_str(), bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(collection: Collection, key: &str, bytes: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        error!(collection = collection.name(), key = %key, error = %e, "Corrupt record in store");
        StoreError::Corrupt {
            collection: collection.name(),
            key: key.to_string(),
            reason: e.to_string(),
        }
    })
}

// ============================================================================
// TESTS
// ============================================================================
