use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, trace};

use crate::{
    clock::SharedClock,
    config::PresenceConfig,
    dao::{
        error::TransportResult,
        models::{ParticipantRow, RoomEvent, RoomFields, RoomRow},
        sync_transport::SyncTransport,
    },
    state::room::{Participant, Room, RoomSnapshot},
};

/// Canonical in-memory view of one room for one membership.
///
/// Local commands and inbound events both go through the same merge rules; listeners are
/// only notified when a merge actually changed something.
pub struct RoomStore {
    room_id: String,
    timeout_ms: i64,
    clock: SharedClock,
    state: watch::Sender<RoomSnapshot>,
}

/// Shared handle to a [`RoomStore`].
pub type SharedStore = Arc<RoomStore>;

impl RoomStore {
    /// Empty store for `room_id`.
    pub fn new(room_id: impl Into<String>, presence: &PresenceConfig, clock: SharedClock) -> Self {
        let room_id = room_id.into();
        let (state, _rx) = watch::channel(RoomSnapshot::empty(room_id.clone()));
        Self {
            room_id,
            timeout_ms: presence.timeout_ms(),
            clock,
            state,
        }
    }

    /// Build a store from the rows currently held by `transport`.
    ///
    /// A missing room row yields the all-defaults room rather than an error.
    pub async fn load(
        room_id: &str,
        transport: &dyn SyncTransport,
        presence: &PresenceConfig,
        clock: SharedClock,
    ) -> TransportResult<Self> {
        let store = Self::new(room_id, presence, clock);
        store.reload(transport).await?;
        Ok(store)
    }

    /// Re-read every row from `transport` and merge it in.
    pub async fn reload(&self, transport: &dyn SyncTransport) -> TransportResult<()> {
        let (participants, room) = futures::try_join!(
            transport.read_participants(&self.room_id),
            transport.read_room(&self.room_id)
        )?;
        let changed = self.merge_rows(participants, room);
        debug!(room_id = %self.room_id, changed, "room rows loaded");
        Ok(())
    }

    /// Room this store tracks.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Liveness timeout in milliseconds.
    pub fn timeout_ms(&self) -> i64 {
        self.timeout_ms
    }

    /// Copy of the current view.
    pub fn current_snapshot(&self) -> RoomSnapshot {
        self.state.borrow().clone()
    }

    /// Run `read` against the current view without copying it.
    pub fn read<R>(&self, read: impl FnOnce(&RoomSnapshot) -> R) -> R {
        read(&self.state.borrow())
    }

    /// Receiver woken on every accepted change.
    pub fn subscribe(&self) -> watch::Receiver<RoomSnapshot> {
        self.state.subscribe()
    }

    /// Merge an event delivered by the transport.
    ///
    /// Returns the new snapshot, or `None` when the event changed nothing.
    pub fn apply_remote_event(&self, event: RoomEvent) -> Option<RoomSnapshot> {
        if event.room_id() != self.room_id {
            trace!(room_id = %self.room_id, other = event.room_id(), "ignoring event for another room");
            return None;
        }

        let kind = event.kind();
        let changed = match event {
            RoomEvent::ParticipantUpserted { participant } => self.merge_participant(participant),
            RoomEvent::ParticipantDeleted { user_id, .. } => self.remove_participant(&user_id),
            RoomEvent::RoomUpdated { room } => self.merge_room(room),
        };
        trace!(room_id = %self.room_id, kind, changed, "remote event merged");
        changed.then(|| self.current_snapshot())
    }

    /// Merge a full participant row.
    ///
    /// Rows converge on the greatest `last_seen`; stale or departed rows remove the entry.
    pub fn merge_participant(&self, row: ParticipantRow) -> bool {
        if row.room_id != self.room_id {
            return false;
        }
        let now = self.clock.now_ms();
        let timeout = self.timeout_ms;
        self.modify(|snapshot| merge_row(snapshot, row, now, timeout, Arrival::Event))
    }

    /// Replace the room fields with `row`.
    pub fn merge_room(&self, row: RoomRow) -> bool {
        if row.id != self.room_id {
            return false;
        }
        let next = Room::from(row);
        self.modify(|snapshot| {
            if snapshot.room == next {
                return false;
            }
            snapshot.room = next;
            true
        })
    }

    /// Apply a partial room update locally ahead of the remote write.
    pub fn apply_room_fields(&self, fields: &RoomFields) -> bool {
        self.modify(|snapshot| {
            let mut row = RoomRow::from(snapshot.room.clone());
            fields.apply_to(&mut row);
            let next = Room::from(row);
            if snapshot.room == next {
                return false;
            }
            snapshot.room = next;
            true
        })
    }

    /// Drop a participant and remember how recent its last heartbeat was.
    pub fn remove_participant(&self, user_id: &str) -> bool {
        let now = self.clock.now_ms();
        self.modify(|snapshot| evict(snapshot, user_id, 0, now))
    }

    /// Set or clear one participant's vote, stamping the entry newer than anything merged so
    /// far.
    ///
    /// Returns the stamp to publish along with the vote, or `None` for unknown participants.
    pub fn set_vote(&self, user_id: &str, vote: Option<String>, now_ms: i64) -> Option<i64> {
        let mut stamp = None;
        self.modify(|snapshot| {
            let Some(participant) = snapshot.participants.get_mut(user_id) else {
                return false;
            };
            // Strictly newer, so an echo carrying the previous stamp cannot revert the vote.
            let at = now_ms.max(participant.last_seen + 1);
            participant.last_seen = at;
            participant.vote = vote;
            stamp = Some(at);
            true
        });
        stamp
    }

    /// Clear every vote in the room.
    pub fn clear_votes(&self) -> bool {
        self.modify(|snapshot| {
            let mut changed = false;
            for participant in snapshot.participants.values_mut() {
                changed |= participant.vote.take().is_some();
            }
            changed
        })
    }

    /// Record a local heartbeat for `user_id`.
    pub fn touch(&self, user_id: &str, now_ms: i64) -> bool {
        self.modify(|snapshot| match snapshot.participants.get_mut(user_id) {
            Some(participant) if participant.last_seen < now_ms => {
                participant.last_seen = now_ms;
                true
            }
            _ => false,
        })
    }

    /// Evict every participant whose heartbeat is missing, zero or older than the timeout.
    ///
    /// Local projection only; nothing is written back. Returns the evicted ids.
    pub fn sweep_stale(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let timeout = self.timeout_ms;
        let mut evicted = Vec::new();
        self.modify(|snapshot| {
            evicted = snapshot
                .participants
                .values()
                .filter(|participant| !participant.is_live(now, timeout))
                .map(|participant| participant.id.clone())
                .collect();
            for user_id in &evicted {
                evict(snapshot, user_id, 0, 0);
            }
            !evicted.is_empty()
        });
        if !evicted.is_empty() {
            debug!(room_id = %self.room_id, evicted = ?evicted, "stale participants evicted");
        }
        evicted
    }

    fn merge_rows(&self, participants: Vec<ParticipantRow>, room: Option<RoomRow>) -> bool {
        let now = self.clock.now_ms();
        let timeout = self.timeout_ms;
        let room_id = self.room_id.clone();
        self.modify(|snapshot| {
            let mut changed = false;
            for row in participants.into_iter().filter(|row| row.room_id == room_id) {
                changed |= merge_row(snapshot, row, now, timeout, Arrival::Load);
            }
            if let Some(room) = room.filter(|room| room.id == room_id) {
                let next = Room::from(room);
                if snapshot.room != next {
                    snapshot.room = next;
                    changed = true;
                }
            }
            changed
        })
    }

    fn modify(&self, mutate: impl FnOnce(&mut RoomSnapshot) -> bool) -> bool {
        self.state.send_if_modified(|snapshot| {
            let changed = mutate(snapshot);
            if changed {
                snapshot.revision += 1;
            }
            changed
        })
    }
}

/// How a participant row reached the store.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Arrival {
    /// Part of a consistent read of every row.
    Load,
    /// Delivered by the subscription, possibly reordered.
    Event,
}

fn merge_row(
    snapshot: &mut RoomSnapshot,
    row: ParticipantRow,
    now: i64,
    timeout: i64,
    arrival: Arrival,
) -> bool {
    let user_id = row.user_id.clone();

    if !Participant::is_live_at(row.last_seen, now, timeout) {
        // An old stale echo must not evict an entry with a newer heartbeat.
        let newer = snapshot
            .participants
            .get(&user_id)
            .is_some_and(|existing| row.last_seen != 0 && existing.last_seen > row.last_seen);
        if newer {
            return false;
        }
        // Explicit departures also fence off rows of participants this view never saw.
        let unseen_floor = if row.last_seen == 0 && arrival == Arrival::Event {
            now
        } else {
            0
        };
        return evict(snapshot, &user_id, row.last_seen, unseen_floor);
    }

    if let Some(&departed_at) = snapshot.departed.get(&user_id) {
        if row.last_seen <= departed_at {
            return false;
        }
        snapshot.departed.remove(&user_id);
    }

    let incoming = Participant::from(row);
    match snapshot.participants.get_mut(&user_id) {
        Some(existing) => {
            if incoming.last_seen < existing.last_seen || *existing == incoming {
                return false;
            }
            *existing = incoming;
            true
        }
        None => {
            snapshot.participants.insert(user_id, incoming);
            true
        }
    }
}

/// Remove `user_id` and record a tombstone rejecting rows no newer than its departure.
///
/// The tombstone is the entry's last heartbeat when it was known, else `unseen_floor`.
/// Returns whether a visible entry was removed.
fn evict(snapshot: &mut RoomSnapshot, user_id: &str, last_seen: i64, unseen_floor: i64) -> bool {
    let (departed_at, removed) = match snapshot.participants.shift_remove(user_id) {
        Some(existing) => (existing.last_seen.max(last_seen), true),
        None => (unseen_floor.max(last_seen), false),
    };
    if departed_at > 0 {
        let entry = snapshot.departed.entry(user_id.to_string()).or_insert(0);
        *entry = (*entry).max(departed_at);
    }
    removed
}
