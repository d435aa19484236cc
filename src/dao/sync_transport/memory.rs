//! In-process transport: rows live in concurrent maps and every write fans out through a
//! per-room broadcast channel. Backs the relay server and the test suites.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::{FutureExt, StreamExt, future::BoxFuture};
use indexmap::IndexMap;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dao::{
    error::{TransportError, TransportResult},
    models::{ParticipantFields, ParticipantRow, RoomEvent, RoomFields, RoomRow},
    sync_transport::{Subscription, SubscriptionId, SyncTransport},
};

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Shared in-memory relay. Cloning yields another handle onto the same rows.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

struct Inner {
    rooms: DashMap<String, RoomRow>,
    participants: DashMap<String, IndexMap<String, ParticipantRow>>,
    channels: DashMap<String, broadcast::Sender<RoomEvent>>,
    subscriptions: DashMap<SubscriptionId, (String, CancellationToken)>,
    reachable: AtomicBool,
    capacity: usize,
}

impl MemoryTransport {
    /// Create an empty transport with the default per-room channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create an empty transport whose per-room channels buffer `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                rooms: DashMap::new(),
                participants: DashMap::new(),
                channels: DashMap::new(),
                subscriptions: DashMap::new(),
                reachable: AtomicBool::new(true),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Simulate losing (or regaining) connectivity; while unreachable every call fails.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of live subscriptions on `room_id`.
    pub fn subscriber_count(&self, room_id: &str) -> usize {
        self.inner
            .subscriptions
            .iter()
            .filter(|entry| entry.value().0 == room_id)
            .count()
    }

    /// Number of live subscriptions across every room.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Number of rooms holding a room row or at least one participant row.
    pub fn room_count(&self) -> usize {
        let orphans = self
            .inner
            .participants
            .iter()
            .filter(|entry| !entry.value().is_empty() && !self.inner.rooms.contains_key(entry.key()))
            .count();
        self.inner.rooms.len() + orphans
    }

    /// Current stored participant row, bypassing the async contract.
    pub fn participant(&self, room_id: &str, user_id: &str) -> Option<ParticipantRow> {
        self.inner
            .participants
            .get(room_id)
            .and_then(|rows| rows.get(user_id).cloned())
    }

    /// Current stored room row, bypassing the async contract.
    pub fn room(&self, room_id: &str) -> Option<RoomRow> {
        self.inner.rooms.get(room_id).map(|row| row.value().clone())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn ensure_reachable(&self) -> TransportResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::unavailable(
                "memory transport offline",
                io::Error::new(io::ErrorKind::NotConnected, "transport marked unreachable"),
            ))
        }
    }

    fn publish(&self, event: RoomEvent) {
        if let Some(sender) = self.channels.get(event.room_id()) {
            // No receivers is fine; nobody is listening to that room right now.
            let _ = sender.send(event);
        }
    }

    fn room_exists(&self, room_id: &str) -> TransportResult<bool> {
        self.ensure_reachable()?;
        let has_participants = self
            .participants
            .get(room_id)
            .is_some_and(|rows| !rows.is_empty());
        Ok(self.rooms.contains_key(room_id) || has_participants)
    }

    fn read_participants(&self, room_id: &str) -> TransportResult<Vec<ParticipantRow>> {
        self.ensure_reachable()?;
        Ok(self
            .participants
            .get(room_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn read_room(&self, room_id: &str) -> TransportResult<Option<RoomRow>> {
        self.ensure_reachable()?;
        Ok(self.room_row(room_id))
    }

    fn room_row(&self, room_id: &str) -> Option<RoomRow> {
        self.rooms.get(room_id).map(|row| row.value().clone())
    }

    fn upsert_participant(
        &self,
        room_id: &str,
        user_id: &str,
        fields: ParticipantFields,
    ) -> TransportResult<()> {
        self.ensure_reachable()?;
        let row = {
            let mut rows = self.participants.entry(room_id.to_string()).or_default();
            match rows.get_mut(user_id) {
                Some(existing) => {
                    fields.apply_to(existing);
                    existing.clone()
                }
                None => {
                    let row = fields.into_row(room_id, user_id);
                    rows.insert(user_id.to_string(), row.clone());
                    row
                }
            }
        };
        self.publish(RoomEvent::ParticipantUpserted { participant: row });
        Ok(())
    }

    fn update_participant(
        &self,
        room_id: &str,
        user_id: &str,
        fields: ParticipantFields,
    ) -> TransportResult<()> {
        self.ensure_reachable()?;
        let updated = self.participants.get_mut(room_id).and_then(|mut rows| {
            rows.get_mut(user_id).map(|row| {
                fields.apply_to(row);
                row.clone()
            })
        });
        match updated {
            Some(row) => self.publish(RoomEvent::ParticipantUpserted { participant: row }),
            None => debug!(room_id, user_id, "update of missing participant row ignored"),
        }
        Ok(())
    }

    fn delete_participant(&self, room_id: &str, user_id: &str) -> TransportResult<()> {
        self.ensure_reachable()?;
        let removed = self
            .participants
            .get_mut(room_id)
            .and_then(|mut rows| rows.shift_remove(user_id));
        if removed.is_some() {
            self.publish(RoomEvent::ParticipantDeleted {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
            });
        }
        Ok(())
    }

    fn insert_room(&self, room_id: &str, fields: RoomFields) -> TransportResult<()> {
        self.ensure_reachable()?;
        let row = match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(TransportError::Conflict(format!(
                    "room `{room_id}` already exists"
                )));
            }
            Entry::Vacant(slot) => {
                let mut row = RoomRow::empty(room_id);
                fields.apply_to(&mut row);
                slot.insert(row.clone());
                row
            }
        };
        self.publish(RoomEvent::RoomUpdated { room: row });
        Ok(())
    }

    fn update_room(&self, room_id: &str, fields: RoomFields) -> TransportResult<()> {
        self.ensure_reachable()?;
        let updated = self.rooms.get_mut(room_id).map(|mut row| {
            fields.apply_to(row.value_mut());
            row.value().clone()
        });
        match updated {
            Some(room) => self.publish(RoomEvent::RoomUpdated { room }),
            None => debug!(room_id, "update of missing room row ignored"),
        }
        Ok(())
    }

    fn claim_admin(&self, room_id: &str, fields: RoomFields) -> TransportResult<()> {
        self.ensure_reachable()?;
        let claimed = match self.rooms.get_mut(room_id) {
            Some(mut row) if row.admin_user_id.is_empty() => {
                fields.apply_to(row.value_mut());
                row.value().clone()
            }
            Some(_) => {
                return Err(TransportError::Conflict(format!(
                    "room `{room_id}` already has an admin"
                )));
            }
            None => {
                return Err(TransportError::Conflict(format!(
                    "room `{room_id}` has no row to claim"
                )));
            }
        };
        self.publish(RoomEvent::RoomUpdated { room: claimed });
        Ok(())
    }

    fn subscribe(&self, room_id: &str) -> TransportResult<Subscription> {
        self.ensure_reachable()?;
        let receiver = self
            .channels
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        self.subscriptions
            .insert(id, (room_id.to_string(), token.clone()));

        let room = room_id.to_string();
        let events = BroadcastStream::new(receiver)
            .filter_map(move |item| {
                let room = room.clone();
                async move {
                    match item {
                        Ok(event) => Some(event),
                        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                            warn!(room_id = %room, skipped, "subscriber lagged; events dropped");
                            None
                        }
                    }
                }
            })
            .take_until(token.cancelled_owned())
            .boxed();

        Ok(Subscription { id, events })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Some((_, (room_id, token))) = self.subscriptions.remove(&id) {
            token.cancel();
            debug!(room_id = %room_id, subscription = %id, "subscription closed");
        }
    }
}

impl SyncTransport for MemoryTransport {
    fn room_exists(&self, room_id: &str) -> BoxFuture<'static, TransportResult<bool>> {
        let inner = self.inner.clone();
        let room_id = room_id.to_string();
        async move { inner.room_exists(&room_id) }.boxed()
    }

    fn read_participants(
        &self,
        room_id: &str,
    ) -> BoxFuture<'static, TransportResult<Vec<ParticipantRow>>> {
        let inner = self.inner.clone();
        let room_id = room_id.to_string();
        async move { inner.read_participants(&room_id) }.boxed()
    }

    fn read_room(&self, room_id: &str) -> BoxFuture<'static, TransportResult<Option<RoomRow>>> {
        let inner = self.inner.clone();
        let room_id = room_id.to_string();
        async move { inner.read_room(&room_id) }.boxed()
    }

    fn upsert_participant(
        &self,
        room_id: &str,
        user_id: &str,
        fields: ParticipantFields,
    ) -> BoxFuture<'static, TransportResult<()>> {
        let inner = self.inner.clone();
        let (room_id, user_id) = (room_id.to_string(), user_id.to_string());
        async move { inner.upsert_participant(&room_id, &user_id, fields) }.boxed()
    }

    fn update_participant(
        &self,
        room_id: &str,
        user_id: &str,
        fields: ParticipantFields,
    ) -> BoxFuture<'static, TransportResult<()>> {
        let inner = self.inner.clone();
        let (room_id, user_id) = (room_id.to_string(), user_id.to_string());
        async move { inner.update_participant(&room_id, &user_id, fields) }.boxed()
    }

    fn delete_participant(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> BoxFuture<'static, TransportResult<()>> {
        let inner = self.inner.clone();
        let (room_id, user_id) = (room_id.to_string(), user_id.to_string());
        async move { inner.delete_participant(&room_id, &user_id) }.boxed()
    }

    fn insert_room(
        &self,
        room_id: &str,
        fields: RoomFields,
    ) -> BoxFuture<'static, TransportResult<()>> {
        let inner = self.inner.clone();
        let room_id = room_id.to_string();
        async move { inner.insert_room(&room_id, fields) }.boxed()
    }

    fn update_room(
        &self,
        room_id: &str,
        fields: RoomFields,
    ) -> BoxFuture<'static, TransportResult<()>> {
        let inner = self.inner.clone();
        let room_id = room_id.to_string();
        async move { inner.update_room(&room_id, fields) }.boxed()
    }

    fn claim_admin(
        &self,
        room_id: &str,
        fields: RoomFields,
    ) -> BoxFuture<'static, TransportResult<()>> {
        let inner = self.inner.clone();
        let room_id = room_id.to_string();
        async move { inner.claim_admin(&room_id, fields) }.boxed()
    }

    fn subscribe(&self, room_id: &str) -> BoxFuture<'static, TransportResult<Subscription>> {
        let inner = self.inner.clone();
        let room_id = room_id.to_string();
        async move { inner.subscribe(&room_id) }.boxed()
    }

    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'static, ()> {
        let inner = self.inner.clone();
        async move { inner.unsubscribe(id) }.boxed()
    }
}
