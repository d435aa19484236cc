use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    dao::{
        models::{RoomFields, RoomRow},
        sync_transport::SyncTransport,
    },
    error::{RoomError, RoomResult},
    services::identity::{IdentityStore, new_user_id},
};

/// Who the local client is in a room and whether it holds admin authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    /// Identity to use for every row this client writes.
    pub user_id: String,
    /// Whether the identity is the recorded admin.
    pub is_admin: bool,
}

/// Decides who is admin, creates the room row on first access, and checks PINs.
///
/// PINs are compared verbatim, without hashing.
#[derive(Clone)]
pub struct AdminAuthority {
    transport: Arc<dyn SyncTransport>,
    identities: Arc<dyn IdentityStore>,
}

impl AdminAuthority {
    /// Authority over `transport`, remembering identities in `identities`.
    pub fn new(transport: Arc<dyn SyncTransport>, identities: Arc<dyn IdentityStore>) -> Self {
        Self {
            transport,
            identities,
        }
    }

    /// Create `room_id` with the caller as admin.
    ///
    /// Fails with [`RoomError::RoomAlreadyExists`] when any row already uses the id.
    pub async fn create_room(&self, room_id: &str, pin: Option<&str>) -> RoomResult<Authority> {
        if self.transport.room_exists(room_id).await? {
            return Err(RoomError::RoomAlreadyExists(room_id.to_string()));
        }

        let user_id = self.local_user_id(room_id);
        match self
            .transport
            .insert_room(room_id, admin_fields(&user_id, pin))
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_conflict() => {
                return Err(RoomError::RoomAlreadyExists(room_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        }

        info!(room_id = %room_id, user_id = %user_id, pin = pin.is_some(), "room created");
        Ok(self.remember_admin(room_id, user_id, pin.is_some()))
    }

    /// Resolve the caller's identity and authority when joining an existing room.
    pub async fn resolve_on_join(&self, room_id: &str, pin: Option<&str>) -> RoomResult<Authority> {
        if !self.transport.room_exists(room_id).await? {
            return Err(RoomError::RoomNotFound(room_id.to_string()));
        }

        let room = self.transport.read_room(room_id).await?;
        match room {
            Some(room) if !room.admin_user_id.is_empty() => self.resolve_existing(room_id, &room, pin),
            Some(_) => self.claim_vacant(room_id, pin).await,
            None => self.claim_missing(room_id, pin).await,
        }
    }

    /// An admin is on record: PIN takeover, accidental-admin prevention, or plain member.
    fn resolve_existing(
        &self,
        room_id: &str,
        room: &RoomRow,
        pin: Option<&str>,
    ) -> RoomResult<Authority> {
        let admin = room.admin_user_id.as_str();

        if let Some(pin) = pin {
            if room.admin_pin.as_deref() != Some(pin) {
                warn!(room_id = %room_id, "admin PIN rejected");
                return Err(RoomError::InvalidAdminPin);
            }
            info!(room_id = %room_id, user_id = %admin, "admin re-authenticated with PIN");
            return Ok(self.remember_admin(room_id, admin.to_string(), true));
        }

        if self.identities.admin_id(room_id).as_deref() == Some(admin) {
            // Rejoining without the PIN on the admin's device must not grant admin rights.
            let user_id = new_user_id();
            self.identities.clear_admin_id(room_id);
            self.identities.set_user_id(room_id, &user_id);
            info!(room_id = %room_id, user_id = %user_id, "issued fresh identity instead of stored admin id");
            return Ok(Authority {
                user_id,
                is_admin: false,
            });
        }

        let user_id = self.local_user_id(room_id);
        let is_admin = user_id == admin;
        self.identities.set_user_id(room_id, &user_id);
        debug!(room_id = %room_id, user_id = %user_id, is_admin, "joined existing room");
        Ok(Authority { user_id, is_admin })
    }

    /// Room row exists without an admin: the first conditional claim wins the seat.
    async fn claim_vacant(&self, room_id: &str, pin: Option<&str>) -> RoomResult<Authority> {
        let user_id = self.local_user_id(room_id);
        match self
            .transport
            .claim_admin(room_id, admin_fields(&user_id, pin))
            .await
        {
            Ok(()) => {
                info!(room_id = %room_id, user_id = %user_id, "claimed vacant admin seat");
                Ok(self.remember_admin(room_id, user_id, pin.is_some()))
            }
            Err(err) if err.is_conflict() => self.join_after_lost_claim(room_id, user_id).await,
            Err(err) => Err(err.into()),
        }
    }

    /// Room exists only through participant rows: the first insert wins the admin seat.
    async fn claim_missing(&self, room_id: &str, pin: Option<&str>) -> RoomResult<Authority> {
        let user_id = self.local_user_id(room_id);
        match self
            .transport
            .insert_room(room_id, admin_fields(&user_id, pin))
            .await
        {
            Ok(()) => {
                info!(room_id = %room_id, user_id = %user_id, "created room row and claimed admin");
                Ok(self.remember_admin(room_id, user_id, pin.is_some()))
            }
            Err(err) if err.is_conflict() => self.join_after_lost_claim(room_id, user_id).await,
            Err(err) => Err(err.into()),
        }
    }

    async fn join_after_lost_claim(&self, room_id: &str, user_id: String) -> RoomResult<Authority> {
        debug!(room_id = %room_id, "lost the race for the admin seat");
        match self.transport.read_room(room_id).await? {
            // The winner's PIN is unknown to us; join as a plain member.
            Some(room) if !room.admin_user_id.is_empty() => self.resolve_existing(room_id, &room, None),
            _ => {
                self.identities.set_user_id(room_id, &user_id);
                Ok(Authority {
                    user_id,
                    is_admin: false,
                })
            }
        }
    }

    fn local_user_id(&self, room_id: &str) -> String {
        self.identities
            .user_id(room_id)
            .unwrap_or_else(new_user_id)
    }

    fn remember_admin(&self, room_id: &str, user_id: String, with_pin: bool) -> Authority {
        self.identities.set_user_id(room_id, &user_id);
        if with_pin {
            self.identities.set_admin_id(room_id, &user_id);
        }
        Authority {
            user_id,
            is_admin: true,
        }
    }
}

fn admin_fields(user_id: &str, pin: Option<&str>) -> RoomFields {
    RoomFields {
        admin_user_id: Some(user_id.to_string()),
        admin_pin: pin.map(|pin| Some(pin.to_string())),
        ..RoomFields::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        config::DEFAULT_IDENTITY_TTL,
        dao::{
            error::TransportResult,
            models::{ParticipantFields, ParticipantRow},
            sync_transport::{Subscription, SubscriptionId, memory::MemoryTransport},
        },
        services::identity::MemoryIdentityStore,
    };
    use futures::{FutureExt, future::BoxFuture};

    fn authority(transport: &MemoryTransport) -> (AdminAuthority, Arc<MemoryIdentityStore>) {
        let identities = Arc::new(MemoryIdentityStore::new(
            DEFAULT_IDENTITY_TTL,
            Arc::new(ManualClock::new(1_000)),
        ));
        let authority = AdminAuthority::new(Arc::new(transport.clone()), identities.clone());
        (authority, identities)
    }

    #[tokio::test]
    async fn creator_becomes_admin_and_pin_is_stored_verbatim() {
        let transport = MemoryTransport::new();
        let (authority, identities) = authority(&transport);

        let created = authority.create_room("R", Some(" 12 34 ")).await.unwrap();

        assert!(created.is_admin);
        let room = transport.room("R").unwrap();
        assert_eq!(room.admin_user_id, created.user_id);
        assert_eq!(room.admin_pin.as_deref(), Some(" 12 34 "));
        assert_eq!(identities.admin_id("R"), Some(created.user_id));
    }

    #[tokio::test]
    async fn create_on_taken_id_fails() {
        let transport = MemoryTransport::new();
        let (first, _) = authority(&transport);
        let (second, _) = authority(&transport);
        first.create_room("R", None).await.unwrap();

        let err = second.create_room("R", None).await.unwrap_err();
        assert!(matches!(err, RoomError::RoomAlreadyExists(id) if id == "R"));
    }

    #[tokio::test]
    async fn join_on_missing_room_is_not_found() {
        let transport = MemoryTransport::new();
        let (authority, _) = authority(&transport);
        let err = authority.resolve_on_join("NOPE", None).await.unwrap_err();
        assert!(matches!(err, RoomError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn first_writer_wins_the_admin_seat() {
        let transport = MemoryTransport::new();
        transport
            .upsert_participant("R", "someone", ParticipantFields::joined("S", 1))
            .await
            .unwrap();
        let (first, _) = authority(&transport);
        let (second, _) = authority(&transport);

        let a = first.resolve_on_join("R", None).await.unwrap();
        let b = second.resolve_on_join("R", None).await.unwrap();

        assert!(a.is_admin);
        assert!(!b.is_admin);
        assert_eq!(transport.room("R").unwrap().admin_user_id, a.user_id);
    }

    #[tokio::test]
    async fn correct_pin_adopts_recorded_admin_id() {
        let transport = MemoryTransport::new();
        let (owner, _) = authority(&transport);
        let created = owner.create_room("R", Some("1234")).await.unwrap();

        let (other_device, identities) = authority(&transport);
        let joined = other_device.resolve_on_join("R", Some("1234")).await.unwrap();

        assert!(joined.is_admin);
        assert_eq!(joined.user_id, created.user_id);
        assert_eq!(identities.admin_id("R"), Some(created.user_id.clone()));
        assert_eq!(identities.user_id("R"), Some(created.user_id));
    }

    #[tokio::test]
    async fn wrong_pin_changes_nothing() {
        let transport = MemoryTransport::new();
        let (owner, _) = authority(&transport);
        owner.create_room("R", Some("1234")).await.unwrap();
        let before = transport.room("R");

        let (intruder, identities) = authority(&transport);
        let err = intruder.resolve_on_join("R", Some("0000")).await.unwrap_err();

        assert!(matches!(err, RoomError::InvalidAdminPin));
        assert_eq!(transport.room("R"), before);
        assert_eq!(identities.user_id("R"), None);
        assert_eq!(identities.admin_id("R"), None);
    }

    #[tokio::test]
    async fn stored_admin_without_pin_gets_fresh_identity() {
        let transport = MemoryTransport::new();
        let (owner, identities) = authority(&transport);
        let created = owner.create_room("R", Some("1234")).await.unwrap();

        let rejoined = owner.resolve_on_join("R", None).await.unwrap();

        assert!(!rejoined.is_admin);
        assert_ne!(rejoined.user_id, created.user_id);
        assert_eq!(identities.admin_id("R"), None);
        assert_eq!(identities.user_id("R"), Some(rejoined.user_id));
    }

    #[tokio::test]
    async fn pinless_admin_keeps_seat_through_stored_user_id() {
        let transport = MemoryTransport::new();
        let (owner, _) = authority(&transport);
        let created = owner.create_room("R", None).await.unwrap();

        let rejoined = owner.resolve_on_join("R", None).await.unwrap();
        assert!(rejoined.is_admin);
        assert_eq!(rejoined.user_id, created.user_id);
    }

    #[tokio::test]
    async fn vacant_room_row_is_claimed() {
        let transport = MemoryTransport::new();
        transport.insert_room("R", RoomFields::default()).await.unwrap();
        let (authority, _) = authority(&transport);

        let joined = authority.resolve_on_join("R", Some("9")).await.unwrap();
        assert!(joined.is_admin);
        assert_eq!(transport.room("R").unwrap().admin_pin.as_deref(), Some("9"));
    }

    /// Memory transport whose room writes yield to the scheduler a few times first.
    struct SlowRoomWrites {
        inner: MemoryTransport,
        yields: usize,
    }

    impl SlowRoomWrites {
        fn delayed(
            &self,
            write: BoxFuture<'static, TransportResult<()>>,
        ) -> BoxFuture<'static, TransportResult<()>> {
            let yields = self.yields;
            async move {
                for _ in 0..yields {
                    tokio::task::yield_now().await;
                }
                write.await
            }
            .boxed()
        }
    }

    impl SyncTransport for SlowRoomWrites {
        fn room_exists(&self, room_id: &str) -> BoxFuture<'static, TransportResult<bool>> {
            self.inner.room_exists(room_id)
        }

        fn read_participants(
            &self,
            room_id: &str,
        ) -> BoxFuture<'static, TransportResult<Vec<ParticipantRow>>> {
            self.inner.read_participants(room_id)
        }

        fn read_room(&self, room_id: &str) -> BoxFuture<'static, TransportResult<Option<RoomRow>>> {
            self.inner.read_room(room_id)
        }

        fn upsert_participant(
            &self,
            room_id: &str,
            user_id: &str,
            fields: ParticipantFields,
        ) -> BoxFuture<'static, TransportResult<()>> {
            self.inner.upsert_participant(room_id, user_id, fields)
        }

        fn update_participant(
            &self,
            room_id: &str,
            user_id: &str,
            fields: ParticipantFields,
        ) -> BoxFuture<'static, TransportResult<()>> {
            self.inner.update_participant(room_id, user_id, fields)
        }

        fn delete_participant(
            &self,
            room_id: &str,
            user_id: &str,
        ) -> BoxFuture<'static, TransportResult<()>> {
            self.inner.delete_participant(room_id, user_id)
        }

        fn insert_room(
            &self,
            room_id: &str,
            fields: RoomFields,
        ) -> BoxFuture<'static, TransportResult<()>> {
            self.delayed(self.inner.insert_room(room_id, fields))
        }

        fn update_room(
            &self,
            room_id: &str,
            fields: RoomFields,
        ) -> BoxFuture<'static, TransportResult<()>> {
            self.delayed(self.inner.update_room(room_id, fields))
        }

        fn claim_admin(
            &self,
            room_id: &str,
            fields: RoomFields,
        ) -> BoxFuture<'static, TransportResult<()>> {
            self.delayed(self.inner.claim_admin(room_id, fields))
        }

        fn subscribe(&self, room_id: &str) -> BoxFuture<'static, TransportResult<Subscription>> {
            self.inner.subscribe(room_id)
        }

        fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'static, ()> {
            self.inner.unsubscribe(id)
        }
    }

    fn slow_authority(transport: &MemoryTransport, yields: usize) -> AdminAuthority {
        let identities = Arc::new(MemoryIdentityStore::new(
            DEFAULT_IDENTITY_TTL,
            Arc::new(ManualClock::new(1_000)),
        ));
        let transport = SlowRoomWrites {
            inner: transport.clone(),
            yields,
        };
        AdminAuthority::new(Arc::new(transport), identities)
    }

    #[tokio::test]
    async fn interleaved_claims_on_a_vacant_seat_elect_one_admin() {
        let transport = MemoryTransport::new();
        transport.insert_room("R", RoomFields::default()).await.unwrap();
        let quick = slow_authority(&transport, 1);
        let slow = slow_authority(&transport, 6);

        // Both read the vacant seat before either write lands.
        let (a, b) = tokio::join!(
            quick.resolve_on_join("R", Some("1")),
            slow.resolve_on_join("R", Some("2")),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(a.is_admin);
        assert!(!b.is_admin);
        let room = transport.room("R").unwrap();
        assert_eq!(room.admin_user_id, a.user_id);
        assert_eq!(room.admin_pin.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn unreachable_transport_propagates() {
        let transport = MemoryTransport::new();
        transport.set_reachable(false);
        let (authority, _) = authority(&transport);
        let err = authority.create_room("R", None).await.unwrap_err();
        assert!(matches!(err, RoomError::Transport(_)));
    }
}
