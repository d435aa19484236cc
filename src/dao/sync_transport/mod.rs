pub mod memory;
#[cfg(feature = "relay-client")]
pub mod relay;

use std::fmt;

use futures::{future::BoxFuture, stream::BoxStream};
use uuid::Uuid;

use crate::dao::{
    error::TransportResult,
    models::{ParticipantFields, ParticipantRow, RoomEvent, RoomFields, RoomRow},
};

/// Identifier handed out by [`SyncTransport::subscribe`].
pub type SubscriptionId = Uuid;

/// Live feed of changes for one room.
///
/// Deliveries may be duplicated or reordered; consumers must merge idempotently.
pub struct Subscription {
    /// Handle to pass back to [`SyncTransport::unsubscribe`].
    pub id: SubscriptionId,
    /// Change events, ending when the subscription is torn down.
    pub events: BoxStream<'static, RoomEvent>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Publish/subscribe and row storage contract consumed by the room engine.
///
/// Any realtime backend (hosted relay, in-process bus) implements this; the engine never depends
/// on which one is in use. Updates of rows that do not exist are no-ops, mirroring SQL `UPDATE`.
pub trait SyncTransport: Send + Sync {
    /// Whether a room row or at least one participant row exists for `room_id`.
    fn room_exists(&self, room_id: &str) -> BoxFuture<'static, TransportResult<bool>>;
    /// Every participant row of the room, live or not.
    fn read_participants(
        &self,
        room_id: &str,
    ) -> BoxFuture<'static, TransportResult<Vec<ParticipantRow>>>;
    /// The room row, if it was ever written.
    fn read_room(&self, room_id: &str) -> BoxFuture<'static, TransportResult<Option<RoomRow>>>;
    /// Create or update the participant row keyed by (room, user).
    fn upsert_participant(
        &self,
        room_id: &str,
        user_id: &str,
        fields: ParticipantFields,
    ) -> BoxFuture<'static, TransportResult<()>>;
    /// Update an existing participant row.
    fn update_participant(
        &self,
        room_id: &str,
        user_id: &str,
        fields: ParticipantFields,
    ) -> BoxFuture<'static, TransportResult<()>>;
    /// Remove a participant row.
    fn delete_participant(&self, room_id: &str, user_id: &str)
    -> BoxFuture<'static, TransportResult<()>>;
    /// Create the room row, failing with a conflict when it already exists.
    fn insert_room(&self, room_id: &str, fields: RoomFields)
    -> BoxFuture<'static, TransportResult<()>>;
    /// Update an existing room row.
    fn update_room(&self, room_id: &str, fields: RoomFields)
    -> BoxFuture<'static, TransportResult<()>>;
    /// Apply `fields` to an existing room row only while its admin seat is vacant.
    ///
    /// Fails with a conflict when the row is missing or an admin is already recorded, so at
    /// most one concurrent claimant succeeds.
    fn claim_admin(&self, room_id: &str, fields: RoomFields)
    -> BoxFuture<'static, TransportResult<()>>;
    /// Start receiving change events for the room.
    fn subscribe(&self, room_id: &str) -> BoxFuture<'static, TransportResult<Subscription>>;
    /// Stop a subscription; unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'static, ()>;
}
