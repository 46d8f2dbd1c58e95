//! Caller-side owner of the current result set.
//!
//! Every search is issued a [`SearchTicket`] before it starts. Only the
//! newest ticket may replace the entries, so a response that arrives after a
//! newer query was started is dropped instead of overwriting fresher
//! results. Positional ids from the text backend are resolved against the
//! current set only.

use tracing::debug;

use crate::models::Entry;

/// Sequence number handed out by [`ResultSet::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SearchTicket(u64);

impl SearchTicket {
    pub fn sequence(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct ResultSet {
    issued: u64,
    /// Ticket whose entries are currently held.
    applied: Option<SearchTicket>,
    entries: Vec<Entry>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new search; every earlier ticket becomes stale.
    pub fn begin(&mut self) -> SearchTicket {
        self.issued += 1;
        SearchTicket(self.issued)
    }

    pub fn is_current(&self, ticket: SearchTicket) -> bool {
        ticket.0 == self.issued
    }

    /// Replace the entries if `ticket` is the newest issued.
    ///
    /// Returns `false` (and keeps the current entries) for a stale ticket.
    pub fn apply(&mut self, ticket: SearchTicket, entries: Vec<Entry>) -> bool {
        if !self.is_current(ticket) {
            debug!(
                "Ignoring stale results (ticket {} != latest {})",
                ticket.0, self.issued
            );
            return false;
        }
        self.entries = entries;
        self.applied = Some(ticket);
        true
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Ticket of the search that produced the current entries.
    pub fn applied(&self) -> Option<SearchTicket> {
        self.applied
    }

    /// Look up an entry id in the current set.
    pub fn get(&self, id: u32) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Drop the current entries. Issued tickets stay valid.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.applied = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
