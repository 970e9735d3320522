//! Room state store.
//!
//! Owns every room's membership belief and message log. Membership is kept as
//! two indices, room → identities and identity → rooms, so that dropping an
//! identity from everything it joined costs O(rooms of that identity).
//!
//! Membership here is a client-side cache. The backend's `get_units` answer
//! replaces it wholesale via [`RoomStore::refresh_members`]; join/leave calls
//! and Notify frames adjust it in between.
//!
//! # Invariants
//!
//! - `rooms[r].members` contains `x` iff `memberships[x]` contains `r`
//! - History is append-only; entries are only ever confirmed in place
//! - History outlives membership: a room that empties keeps its log

use std::{
    collections::{BTreeSet, HashMap},
    ops::Sub,
    time::Duration,
};

use parley_proto::{IdentityId, NotifyEvent, NotifyKind, RoomId};

/// Backend-reported room state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomStatus {
    /// Accepting members
    Normal,
    /// Closed by an operator
    Banned,
    /// At capacity
    Full,
}

impl RoomStatus {
    /// Parse the backend's integer code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Normal),
            1 => Some(Self::Banned),
            2 => Some(Self::Full),
            _ => None,
        }
    }
}

/// Capacity and state of a room, as last listed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomInfo {
    /// Maximum number of members
    pub max_units: u32,
    /// Current state
    pub status: RoomStatus,
}

/// One member as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// Identity id
    pub id: IdentityId,
    /// Display name
    pub nickname: String,
}

/// Who a log entry is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    /// A specific identity
    Identity(IdentityId),
    /// Sender could not be determined
    Unknown,
    /// Synthetic membership entry
    System,
}

impl Sender {
    /// Attributed identity, if any.
    pub fn identity(self) -> Option<IdentityId> {
        match self {
            Self::Identity(id) => Some(id),
            Self::Unknown | Self::System => None,
        }
    }
}

/// How a log entry came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryOrigin {
    /// Appended locally at send time
    Optimistic,
    /// Appended from a server broadcast
    Echo,
    /// Appended for a membership change
    System,
}

/// One line of a room's chat history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry<I> {
    /// Attribution
    pub sender: Sender,
    /// Display name resolved when the entry was appended
    pub nickname: String,
    /// Message text
    pub text: String,
    /// Append time
    pub timestamp: I,
    /// Where the entry came from
    pub origin: EntryOrigin,
    /// Server has delivered this message at least once
    pub confirmed: bool,
    /// Local identities whose copy of the broadcast is folded into this entry
    pub receivers: BTreeSet<IdentityId>,
}

impl<I> LogEntry<I> {
    /// Build an entry with no receivers folded in yet.
    pub fn new(
        sender: Sender,
        nickname: String,
        text: String,
        timestamp: I,
        origin: EntryOrigin,
    ) -> Self {
        Self {
            sender,
            nickname,
            text,
            timestamp,
            origin,
            confirmed: origin != EntryOrigin::Optimistic,
            receivers: BTreeSet::new(),
        }
    }
}

#[derive(Debug)]
struct Room<I> {
    members: BTreeSet<IdentityId>,
    history: Vec<LogEntry<I>>,
    info: Option<RoomInfo>,
}

impl<I> Default for Room<I> {
    fn default() -> Self {
        Self { members: BTreeSet::new(), history: Vec::new(), info: None }
    }
}

/// Per-room membership and history, plus the nickname directory.
#[derive(Debug)]
pub struct RoomStore<I> {
    rooms: HashMap<RoomId, Room<I>>,
    memberships: HashMap<IdentityId, BTreeSet<RoomId>>,
    nicknames: HashMap<IdentityId, String>,
}

impl<I> Default for RoomStore<I> {
    fn default() -> Self {
        Self { rooms: HashMap::new(), memberships: HashMap::new(), nicknames: HashMap::new() }
    }
}

impl<I> RoomStore<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `identity` to `room`. Returns false if it was already a member.
    pub fn join(&mut self, room: RoomId, identity: IdentityId) -> bool {
        let added = self.rooms.entry(room).or_default().members.insert(identity);
        if added {
            self.memberships.entry(identity).or_default().insert(room);
        }
        added
    }

    /// Remove `identity` from `room`. A no-op for non-members.
    pub fn leave(&mut self, room: RoomId, identity: IdentityId) -> bool {
        let removed = self.rooms.get_mut(&room).is_some_and(|r| r.members.remove(&identity));

        if let Some(rooms) = self.memberships.get_mut(&identity) {
            rooms.remove(&room);
            if rooms.is_empty() {
                self.memberships.remove(&identity);
            }
        }

        removed
    }

    /// Remove `identity` from every room. Returns the rooms it left.
    pub fn leave_all(&mut self, identity: IdentityId) -> Vec<RoomId> {
        let rooms = self.memberships.remove(&identity).unwrap_or_default();

        for room in &rooms {
            if let Some(state) = self.rooms.get_mut(room) {
                state.members.remove(&identity);
            }
        }

        rooms.into_iter().collect()
    }

    /// Identities believed to be in `room`.
    pub fn members_of(&self, room: RoomId) -> BTreeSet<IdentityId> {
        self.rooms.get(&room).map(|r| r.members.clone()).unwrap_or_default()
    }

    /// Whether `identity` is believed to be in `room`.
    pub fn is_member(&self, room: RoomId, identity: IdentityId) -> bool {
        self.rooms.get(&room).is_some_and(|r| r.members.contains(&identity))
    }

    /// Rooms `identity` is believed to be in, ascending.
    pub fn rooms_of(&self, identity: IdentityId) -> Vec<RoomId> {
        self.memberships.get(&identity).map(|r| r.iter().copied().collect()).unwrap_or_default()
    }

    /// Every room the store knows anything about, ascending.
    pub fn rooms(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Append to `room`'s log. Returns the entry's index.
    pub fn append_message(&mut self, room: RoomId, entry: LogEntry<I>) -> usize {
        let history = &mut self.rooms.entry(room).or_default().history;
        history.push(entry);
        history.len() - 1
    }

    /// `room`'s log, oldest first. Empty for unknown rooms.
    pub fn history(&self, room: RoomId) -> &[LogEntry<I>] {
        match self.rooms.get(&room) {
            Some(state) => &state.history,
            None => &[],
        }
    }

    /// Mark entry `index` as confirmed by `receiver`'s copy of the broadcast.
    ///
    /// Returns false if the entry does not exist.
    pub fn confirm(&mut self, room: RoomId, index: usize, receiver: IdentityId) -> bool {
        let Some(entry) = self.rooms.get_mut(&room).and_then(|r| r.history.get_mut(index)) else {
            return false;
        };

        entry.confirmed = true;
        entry.receivers.insert(receiver);
        true
    }

    /// Build an entry with the nickname for `sender` resolved now.
    pub fn entry(
        &self,
        sender: Sender,
        text: String,
        timestamp: I,
        origin: EntryOrigin,
    ) -> LogEntry<I> {
        LogEntry::new(sender, self.display_name(sender), text, timestamp, origin)
    }

    /// Apply a membership notification received by `receiver`.
    ///
    /// Ignored unless `receiver` currently believes itself a member of
    /// `room`. Otherwise updates membership and appends a system entry.
    /// Returns whether the notification was applied.
    pub fn apply_notify(
        &mut self,
        receiver: IdentityId,
        room: RoomId,
        event: NotifyEvent,
        now: I,
    ) -> bool {
        if !self.is_member(room, receiver) {
            return false;
        }

        let name = self.display_name(Sender::Identity(event.operator));
        let text = match event.kind {
            NotifyKind::Joined => {
                self.join(room, event.operator);
                format!("{name} joined")
            },
            NotifyKind::Left => {
                self.leave(room, event.operator);
                format!("{name} left")
            },
        };

        let entry = self.entry(Sender::System, text, now, EntryOrigin::System);
        self.append_message(room, entry);
        true
    }

    /// Replace `room`'s membership with the backend's list.
    pub fn refresh_members(&mut self, room: RoomId, units: &[Unit]) {
        for unit in units {
            self.nicknames.insert(unit.id, unit.nickname.clone());
        }

        let fresh: BTreeSet<IdentityId> = units.iter().map(|u| u.id).collect();
        let current = self.members_of(room);

        for gone in current.difference(&fresh) {
            self.leave(room, *gone);
        }
        for added in fresh.difference(&current) {
            self.join(room, *added);
        }

        // Make sure a room listed with no units still exists locally.
        self.rooms.entry(room).or_default();
    }

    /// Known nickname for `identity`.
    pub fn nickname(&self, identity: IdentityId) -> Option<&str> {
        self.nicknames.get(&identity).map(String::as_str)
    }

    /// Record a nickname learned outside `get_units`.
    pub fn set_nickname(&mut self, identity: IdentityId, nickname: impl Into<String>) {
        self.nicknames.insert(identity, nickname.into());
    }

    /// Name shown for `sender`.
    pub fn display_name(&self, sender: Sender) -> String {
        match sender {
            Sender::Identity(id) => {
                self.nickname(id).map_or_else(|| format!("user {id}"), str::to_string)
            },
            Sender::Unknown => "unknown".to_string(),
            Sender::System => "system".to_string(),
        }
    }

    /// Cache the backend's description of `room`.
    pub fn set_room_info(&mut self, room: RoomId, info: Option<RoomInfo>) {
        self.rooms.entry(room).or_default().info = info;
    }

    /// Last known backend description of `room`.
    pub fn room_info(&self, room: RoomId) -> Option<RoomInfo> {
        self.rooms.get(&room).and_then(|r| r.info)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn store() -> RoomStore<Instant> {
        RoomStore::new()
    }

    #[test]
    fn join_is_idempotent() {
        let mut rooms = store();

        assert!(rooms.join(3, 7));
        assert!(!rooms.join(3, 7));
        assert_eq!(rooms.members_of(3).len(), 1);
        assert_eq!(rooms.rooms_of(7), vec![3]);
    }

    #[test]
    fn leave_non_member_is_noop() {
        let mut rooms = store();
        rooms.join(3, 7);

        assert!(!rooms.leave(3, 8));
        assert!(!rooms.leave(4, 7));
        assert_eq!(rooms.members_of(3), BTreeSet::from([7]));
    }

    #[test]
    fn leave_all_clears_every_room() {
        let mut rooms = store();
        rooms.join(1, 7);
        rooms.join(2, 7);
        rooms.join(2, 8);

        let mut left = rooms.leave_all(7);
        left.sort_unstable();

        assert_eq!(left, vec![1, 2]);
        assert!(rooms.members_of(1).is_empty());
        assert_eq!(rooms.members_of(2), BTreeSet::from([8]));
        assert!(rooms.rooms_of(7).is_empty());
        assert!(rooms.leave_all(7).is_empty());
    }

    #[test]
    fn history_survives_empty_room() {
        let mut rooms = store();
        let now = Instant::now();
        rooms.join(3, 7);
        let entry = rooms.entry(Sender::Identity(7), "hello".into(), now, EntryOrigin::Optimistic);
        rooms.append_message(3, entry);

        rooms.leave(3, 7);

        assert!(rooms.members_of(3).is_empty());
        assert_eq!(rooms.history(3).len(), 1);
    }

    #[test]
    fn notify_for_unjoined_room_is_ignored() {
        let mut rooms = store();
        let event = NotifyEvent { kind: NotifyKind::Joined, operator: 2 };

        assert!(!rooms.apply_notify(1, 10, event, Instant::now()));
        assert!(rooms.members_of(10).is_empty());
        assert!(rooms.history(10).is_empty());
    }

    #[test]
    fn notify_updates_membership_and_logs_system_entry() {
        let mut rooms = store();
        rooms.join(10, 1);
        rooms.set_nickname(2, "bob");

        let joined = NotifyEvent { kind: NotifyKind::Joined, operator: 2 };
        assert!(rooms.apply_notify(1, 10, joined, Instant::now()));
        assert_eq!(rooms.members_of(10), BTreeSet::from([1, 2]));

        let left = NotifyEvent { kind: NotifyKind::Left, operator: 2 };
        assert!(rooms.apply_notify(1, 10, left, Instant::now()));
        assert_eq!(rooms.members_of(10), BTreeSet::from([1]));

        let history = rooms.history(10);
        assert_eq!(history.len(), 2);
        assert!(
            history.iter().all(|e| e.sender == Sender::System && e.origin == EntryOrigin::System)
        );
        assert_eq!(history[0].text, "bob joined");
        assert_eq!(history[1].text, "bob left");
    }

    #[test]
    fn refresh_replaces_membership_and_learns_nicknames() {
        let mut rooms = store();
        rooms.join(5, 1);
        rooms.join(5, 9);

        rooms.refresh_members(5, &[Unit { id: 1, nickname: "ann".into() }, Unit {
            id: 2,
            nickname: "bob".into(),
        }]);

        assert_eq!(rooms.members_of(5), BTreeSet::from([1, 2]));
        assert!(rooms.rooms_of(9).is_empty());
        assert_eq!(rooms.rooms_of(2), vec![5]);
        assert_eq!(rooms.nickname(2), Some("bob"));
    }

    #[test]
    fn display_names() {
        let mut rooms = store();
        rooms.set_nickname(1, "ann");

        assert_eq!(rooms.display_name(Sender::Identity(1)), "ann");
        assert_eq!(rooms.display_name(Sender::Identity(2)), "user 2");
        assert_eq!(rooms.display_name(Sender::Unknown), "unknown");
        assert_eq!(rooms.display_name(Sender::System), "system");
    }

    #[test]
    fn confirm_marks_entry() {
        let mut rooms = store();
        let entry =
            rooms.entry(Sender::Identity(7), "hi".into(), Instant::now(), EntryOrigin::Optimistic);
        let index = rooms.append_message(3, entry);
        assert!(!rooms.history(3)[index].confirmed);

        assert!(rooms.confirm(3, index, 7));
        assert!(rooms.history(3)[index].confirmed);
        assert!(rooms.history(3)[index].receivers.contains(&7));
        assert!(!rooms.confirm(3, index + 1, 7));
    }

    #[test]
    fn room_status_codes() {
        assert_eq!(RoomStatus::from_code(0), Some(RoomStatus::Normal));
        assert_eq!(RoomStatus::from_code(1), Some(RoomStatus::Banned));
        assert_eq!(RoomStatus::from_code(2), Some(RoomStatus::Full));
        assert_eq!(RoomStatus::from_code(3), None);
    }
}
