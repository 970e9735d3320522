//! Per-identity direct message log.

use parley_proto::IdentityId;

/// Whether an inbox entry was sent or received by the owning identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Delivered to the owner
    Received,
    /// Sent by the owner
    Sent,
}

/// One direct message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxEntry<I> {
    /// Sent or received
    pub direction: Direction,
    /// Other party. `None` for received messages without a `sender_id`
    pub peer: Option<IdentityId>,
    /// Message text
    pub text: String,
    /// When the entry was recorded
    pub timestamp: I,
}

/// Ordered direct messages for one identity.
#[derive(Debug, Clone)]
pub struct Inbox<I> {
    entries: Vec<InboxEntry<I>>,
}

impl<I> Default for Inbox<I> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<I> Inbox<I> {
    /// Create an empty inbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn push(&mut self, entry: InboxEntry<I>) {
        self.entries.push(entry);
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> &[InboxEntry<I>] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was sent or received.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
