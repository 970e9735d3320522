//! Echo reconciliation for room messages.
//!
//! The backend broadcasts every room message to all members, the sender
//! included, and older deployments leave `sender_id` unset. A local identity
//! that already appended its own message optimistically would therefore see
//! it twice. The reconciler decides, per incoming text, whether a recent log
//! entry already accounts for it.
//!
//! This is a content + time heuristic. Two identities sending the same text
//! inside the lookback window can be confused; only a backend-echoed message
//! nonce would make it exact.
//!
//! # Matching
//!
//! An entry matches an incoming copy when all of these hold:
//!
//! - it is not a system entry
//! - its text is identical
//! - it was appended no more than `lookback` ago
//! - the receiving identity has not already been folded into it
//! - with `sender_id` present: it is attributed to that identity
//! - without `sender_id`: it is attributed to a connected member of the room,
//!   or it is an unattributed copy of the same broadcast
//!
//! The oldest matching entry wins, so repeated sends confirm in order.

use std::{ops::Sub, time::Duration};

use parley_proto::IdentityId;

use crate::rooms::{EntryOrigin, LogEntry, Sender};

/// Default lookback window.
pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(5);

/// Decision for one incoming room text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Existing entry at this index accounts for the copy
    Confirmed {
        /// Index into the room's history
        index: usize,
    },
    /// No entry matches; append a new one
    Append {
        /// Attribution for the new entry
        sender: Sender,
    },
}

/// Echo reconciler.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    lookback: Duration,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKBACK)
    }
}

impl Reconciler {
    /// Create a reconciler with the given lookback window.
    pub fn new(lookback: Duration) -> Self {
        Self { lookback }
    }

    /// Configured lookback window.
    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    /// Decide what to do with `text` delivered to `receiver`.
    ///
    /// `is_connected_member` answers whether an identity is both connected
    /// and a member of the room `history` belongs to.
    pub fn reconcile<I>(
        &self,
        history: &[LogEntry<I>],
        text: &str,
        sender_id: Option<IdentityId>,
        receiver: IdentityId,
        now: I,
        is_connected_member: impl Fn(IdentityId) -> bool,
    ) -> Reconciliation
    where
        I: Copy + Ord + Sub<Output = Duration>,
    {
        let attributed_ok = |sender: Sender| match (sender_id, sender) {
            (Some(expected), Sender::Identity(actual)) => expected == actual,
            (Some(_), _) => false,
            (None, Sender::Identity(actual)) => is_connected_member(actual),
            (None, Sender::Unknown) => true,
            (None, Sender::System) => false,
        };

        // Entries are appended in time order, so the window is a suffix.
        let start = history
            .iter()
            .rposition(|entry| !self.within_window(entry.timestamp, now))
            .map_or(0, |i| i + 1);

        let matched = history[start..].iter().position(|entry| {
            entry.origin != EntryOrigin::System
                && entry.text == text
                && !entry.receivers.contains(&receiver)
                && attributed_ok(entry.sender)
        });

        match matched {
            Some(offset) => Reconciliation::Confirmed { index: start + offset },
            None => Reconciliation::Append {
                sender: sender_id.map_or(Sender::Unknown, Sender::Identity),
            },
        }
    }

    fn within_window<I>(&self, timestamp: I, now: I) -> bool
    where
        I: Copy + Ord + Sub<Output = Duration>,
    {
        timestamp >= now || now - timestamp <= self.lookback
    }
}
