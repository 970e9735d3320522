//! Message router.
//!
//! Classifies decoded frames received on an identity's connection and hands
//! them to the right owner:
//!
//! - Direct frames go to the receiving identity's inbox, provided they are
//!   addressed to it. Anything else on that socket is a protocol anomaly.
//! - Notify frames go to the room store, which ignores them unless the
//!   receiver is a member. A join announced for a local identity whose
//!   connection is closed is dropped.
//! - Data frames pass through the reconciler, then land in the room log.
//!
//! Nothing here is fatal; anomalies are counted in [`RouteStats`] and
//! reported back to the caller for logging.

use std::{collections::HashMap, ops::Sub, time::Duration};

use parley_proto::{DirectMessage, Frame, IdentityId, NotifyKind, RoomBody, RoomId, RoomMessage};

use crate::{
    inbox::{Direction, Inbox, InboxEntry},
    reconciler::{Reconciler, Reconciliation},
    registry::Presence,
    rooms::{EntryOrigin, RoomStore},
};

/// Routing counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteStats {
    /// Direct messages delivered to an inbox
    pub direct_delivered: u64,
    /// Direct messages addressed to someone other than the receiver
    pub direct_misaddressed: u64,
    /// Notify frames applied to room state
    pub notify_applied: u64,
    /// Notify frames dropped: receiver not in the room, or a join for an
    /// offline local identity
    pub notify_ignored: u64,
    /// New room log entries from broadcasts
    pub room_appended: u64,
    /// Broadcast copies folded into an existing entry
    pub echoes_suppressed: u64,
    /// Payloads that failed to decode
    pub decode_failures: u64,
    /// Connections refused by the backend
    pub auth_rejections: u64,
}

/// What routing one frame did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Direct message stored in the receiver's inbox
    Delivered {
        /// Receiving identity
        identity: IdentityId,
        /// Inbox entries added
        entries: usize,
    },
    /// Direct message for another identity, dropped
    Misaddressed {
        /// Identity the frame was addressed to
        target: IdentityId,
    },
    /// Notify applied; the room's member list should be refreshed
    Notified {
        /// Room
        room: RoomId,
    },
    /// Notify dropped: receiver not in the room, or the joining identity is
    /// local and offline
    NotifyIgnored {
        /// Room
        room: RoomId,
    },
    /// Data frame reconciled into the room log
    RoomData {
        /// Room
        room: RoomId,
        /// New entries
        appended: usize,
        /// Existing entries confirmed
        confirmed: usize,
    },
}

/// Frame router. Owns the reconciler and the routing counters.
#[derive(Debug, Clone, Default)]
pub struct Router {
    reconciler: Reconciler,
    stats: RouteStats,
}

impl Router {
    /// Create a router using `reconciler` for room data.
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler, stats: RouteStats::default() }
    }

    /// Counters so far.
    pub fn stats(&self) -> RouteStats {
        self.stats
    }

    /// Count a payload that failed to decode.
    pub fn record_decode_failure(&mut self) {
        self.stats.decode_failures += 1;
    }

    /// Count a connection refused by the backend.
    pub fn record_auth_rejection(&mut self) {
        self.stats.auth_rejections += 1;
    }

    /// Route `frame`, received on `receiver`'s connection.
    ///
    /// `presence` classifies identities. The reconciler only attributes
    /// anonymous echoes to `Live` ones, and an `Offline` identity never
    /// rejoins a room through a notify.
    pub fn route<I>(
        &mut self,
        receiver: IdentityId,
        frame: Frame,
        now: I,
        rooms: &mut RoomStore<I>,
        inboxes: &mut HashMap<IdentityId, Inbox<I>>,
        presence: impl Fn(IdentityId) -> Presence,
    ) -> Routed
    where
        I: Copy + Ord + Sub<Output = Duration>,
    {
        match frame {
            Frame::Direct(msg) => self.route_direct(receiver, msg, now, inboxes),
            Frame::Room(msg) => self.route_room(receiver, msg, now, rooms, presence),
        }
    }

    fn route_direct<I>(
        &mut self,
        receiver: IdentityId,
        msg: DirectMessage,
        now: I,
        inboxes: &mut HashMap<IdentityId, Inbox<I>>,
    ) -> Routed
    where
        I: Copy,
    {
        if msg.target != receiver {
            self.stats.direct_misaddressed += 1;
            return Routed::Misaddressed { target: msg.target };
        }

        let inbox = inboxes.entry(receiver).or_default();
        let mut entries = 0;
        for text in msg.texts() {
            inbox.push(InboxEntry {
                direction: Direction::Received,
                peer: msg.sender,
                text: text.to_string(),
                timestamp: now,
            });
            entries += 1;
        }

        self.stats.direct_delivered += 1;
        Routed::Delivered { identity: receiver, entries }
    }

    fn route_room<I>(
        &mut self,
        receiver: IdentityId,
        msg: RoomMessage,
        now: I,
        rooms: &mut RoomStore<I>,
        presence: impl Fn(IdentityId) -> Presence,
    ) -> Routed
    where
        I: Copy + Ord + Sub<Output = Duration>,
    {
        let room = msg.room;

        match msg.body {
            RoomBody::Notify(event) => {
                let offline_join = event.kind == NotifyKind::Joined
                    && presence(event.operator) == Presence::Offline;

                if !offline_join && rooms.apply_notify(receiver, room, event, now) {
                    self.stats.notify_applied += 1;
                    Routed::Notified { room }
                } else {
                    self.stats.notify_ignored += 1;
                    Routed::NotifyIgnored { room }
                }
            },
            RoomBody::Data(payloads) => {
                let mut appended = 0;
                let mut confirmed = 0;

                for text in payloads.into_iter().flatten() {
                    let decision = self.reconciler.reconcile(
                        rooms.history(room),
                        &text,
                        msg.sender,
                        receiver,
                        now,
                        |id| presence(id) == Presence::Live && rooms.is_member(room, id),
                    );

                    match decision {
                        Reconciliation::Confirmed { index } => {
                            rooms.confirm(room, index, receiver);
                            self.stats.echoes_suppressed += 1;
                            confirmed += 1;
                        },
                        Reconciliation::Append { sender } => {
                            let mut entry = rooms.entry(sender, text, now, EntryOrigin::Echo);
                            entry.receivers.insert(receiver);
                            rooms.append_message(room, entry);
                            self.stats.room_appended += 1;
                            appended += 1;
                        },
                    }
                }

                Routed::RoomData { room, appended, confirmed }
            },
        }
    }
}
