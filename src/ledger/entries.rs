//! Lazy, restartable walk over an account's ledger entries, newest first.
//!
//! Pages are pulled from storage on demand. [`EntryIter::cursor`] captures
//! the position of the next unread entry so a caller (or an HTTP client via
//! `?before=`) can resume later with [`EntryIter::resume`].

use std::collections::VecDeque;

use crate::storage::{Collection, Store};

use super::{entry_bounds, entry_key, LedgerEntry, LedgerResult};

const DEFAULT_PAGE_SIZE: usize = 64;

pub struct EntryIter {
    store: Store,
    account_id: String,
    /// Exclusive upper bound (seq) for the next page; `None` = from the top.
    before: Option<u64>,
    start: Option<u64>,
    page_size: usize,
    buffer: VecDeque<LedgerEntry>,
    exhausted: bool,
}

impl EntryIter {
    pub(crate) fn new(store: Store, account_id: &str) -> Self {
        Self::resume(store, account_id, None)
    }

    /// Continue from a cursor previously returned by [`EntryIter::cursor`].
    pub fn resume(store: Store, account_id: &str, before: Option<u64>) -> Self {
        Self {
            store,
            account_id: account_id.to_string(),
            before,
            start: before,
            page_size: DEFAULT_PAGE_SIZE,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Exclusive `seq` bound of the next entry this iterator would yield.
    pub fn cursor(&self) -> Option<u64> {
        match self.buffer.front() {
            Some(entry) => Some(entry.seq + 1),
            None => self.before,
        }
    }

    /// Go back to where this iterator started.
    pub fn restart(&mut self) {
        self.before = self.start;
        self.buffer.clear();
        self.exhausted = false;
    }

    fn fill(&mut self) -> LedgerResult<()> {
        if self.before == Some(0) {
            self.exhausted = true;
            return Ok(());
        }
        let (lo, top) = entry_bounds(&self.account_id);
        let hi = match self.before {
            Some(seq) => entry_key(&self.account_id, seq),
            None => top,
        };
        let page: Vec<(String, LedgerEntry)> =
            self.store
                .range_rev(Collection::LedgerEntries, &lo, &hi, self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some((_, last)) = page.last() {
            self.before = Some(last.seq);
        }
        self.buffer.extend(page.into_iter().map(|(_, e)| e));
        Ok(())
    }
}

impl Iterator for EntryIter {
    type Item = LedgerResult<LedgerEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
