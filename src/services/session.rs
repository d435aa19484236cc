use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::{StreamExt, stream::BoxStream};
use rand::Rng;
use tokio::{runtime::Handle, sync::watch, task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    clock::{MonotonicClock, SharedClock},
    config::{CardDeck, EngineConfig},
    dao::{
        models::{ParticipantFields, RoomEvent, RoomFields},
        sync_transport::{SubscriptionId, SyncTransport},
    },
    dto::validation::validate_path_id,
    error::{RoomError, RoomResult},
    services::{
        admin_authority::{AdminAuthority, Authority},
        identity::{IdentityStore, MemoryIdentityStore},
        outbox::{Outbox, WriteOp},
        presence::{PresenceContext, PresenceTracker},
    },
    state::{
        derived::{RoomSummary, SummaryCache, spawn_summary_feed},
        discussion::{DiscussionPick, compute_outlier_candidates, select_for_discussion},
        room::RoomSnapshot,
        store::{RoomStore, SharedStore},
        tracked::Tracked,
        voting::{self, VotingEvent, VotingPhase},
    },
};

/// Collaborators shared by every session of one client.
#[derive(Clone)]
pub struct SessionContext {
    /// Realtime backend.
    pub transport: Arc<dyn SyncTransport>,
    /// Local identity memory.
    pub identities: Arc<dyn IdentityStore>,
    /// Timestamp source.
    pub clock: SharedClock,
    /// Engine settings.
    pub config: Arc<EngineConfig>,
}

impl SessionContext {
    /// Bundle explicit collaborators.
    pub fn new(
        transport: Arc<dyn SyncTransport>,
        identities: Arc<dyn IdentityStore>,
        clock: SharedClock,
        config: EngineConfig,
    ) -> Self {
        Self {
            transport,
            identities,
            clock,
            config: Arc::new(config),
        }
    }

    /// Context with a monotonic clock and identities kept in memory.
    pub fn ephemeral(transport: Arc<dyn SyncTransport>, config: EngineConfig) -> Self {
        let clock: SharedClock = Arc::new(MonotonicClock::new());
        let identities = Arc::new(MemoryIdentityStore::new(config.identity_ttl, clock.clone()));
        Self::new(transport, identities, clock, config)
    }

    fn authority(&self) -> AdminAuthority {
        AdminAuthority::new(self.transport.clone(), self.identities.clone())
    }
}

/// One client's membership in one room.
///
/// Commands apply to the local snapshot first and are written to the transport in issue order
/// by a background outbox. Leaving is idempotent; dropping an active session leaves on a best
/// effort basis.
pub struct RoomSession {
    room_id: String,
    user_id: String,
    name: String,
    store: SharedStore,
    outbox: Outbox,
    presence: Arc<PresenceTracker>,
    transport: Arc<dyn SyncTransport>,
    identities: Arc<dyn IdentityStore>,
    clock: SharedClock,
    subscription: SubscriptionId,
    pump: JoinHandle<()>,
    deck: CardDeck,
    leave_timeout: Duration,
    summaries: Mutex<SummaryCache>,
    highlighted: Mutex<Tracked<Option<usize>>>,
    left: AtomicBool,
}

impl RoomSession {
    /// Create `room_id` and enter it as admin.
    pub async fn create(
        context: &SessionContext,
        room_id: &str,
        name: &str,
        pin: Option<&str>,
    ) -> RoomResult<Self> {
        let (room_id, name) = validate_entry(room_id, name)?;
        let authority = context.authority().create_room(&room_id, pin).await?;
        Self::enter(context, room_id, name, authority).await
    }

    /// Join an existing `room_id`, re-authenticating as admin when `pin` is supplied.
    pub async fn join(
        context: &SessionContext,
        room_id: &str,
        name: &str,
        pin: Option<&str>,
    ) -> RoomResult<Self> {
        let (room_id, name) = validate_entry(room_id, name)?;
        let authority = context.authority().resolve_on_join(&room_id, pin).await?;
        Self::enter(context, room_id, name, authority).await
    }

    async fn enter(
        context: &SessionContext,
        room_id: String,
        name: String,
        authority: Authority,
    ) -> RoomResult<Self> {
        let transport = context.transport.clone();
        let presence_config = context.config.presence;
        let Authority { user_id, is_admin } = authority;

        // Subscribe before loading so nothing written in between is missed.
        let subscription = transport.subscribe(&room_id).await?;
        let store = match Self::load_and_announce(context, &room_id, &user_id, &name).await {
            Ok(store) => Arc::new(store),
            Err(err) => {
                transport.unsubscribe(subscription.id).await;
                return Err(err);
            }
        };

        let outbox = Outbox::spawn(room_id.clone(), transport.clone());
        let presence = Arc::new(PresenceTracker::start(PresenceContext {
            store: store.clone(),
            outbox: outbox.clone(),
            user_id: user_id.clone(),
            config: presence_config,
            clock: context.clock.clone(),
        }));
        let pump = spawn_event_pump(
            store.clone(),
            presence.clone(),
            user_id.clone(),
            subscription.events,
        );

        info!(room_id = %room_id, user_id = %user_id, is_admin, "entered room");

        Ok(Self {
            room_id,
            user_id,
            name,
            store,
            outbox,
            presence,
            transport,
            identities: context.identities.clone(),
            clock: context.clock.clone(),
            subscription: subscription.id,
            pump,
            deck: context.config.deck.clone(),
            leave_timeout: context.config.leave_timeout,
            summaries: Mutex::new(SummaryCache::new()),
            highlighted: Mutex::new(Tracked::new(None)),
            left: AtomicBool::new(false),
        })
    }

    async fn load_and_announce(
        context: &SessionContext,
        room_id: &str,
        user_id: &str,
        name: &str,
    ) -> RoomResult<RoomStore> {
        let store = RoomStore::load(
            room_id,
            context.transport.as_ref(),
            &context.config.presence,
            context.clock.clone(),
        )
        .await?;

        let now = context.clock.now_ms();
        let fields = ParticipantFields::joined(name, now);
        context
            .transport
            .upsert_participant(room_id, user_id, fields.clone())
            .await?;
        store.merge_participant(fields.into_row(room_id, user_id));
        Ok(store)
    }

    /// Publish the departure, stop the timers and drop the subscription.
    ///
    /// Never fails; a second call is a no-op.
    pub async fn leave(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            debug!(room_id = %self.room_id, "leave ignored; already left");
            return;
        }

        self.presence.stop();
        self.outbox.send(WriteOp::UpdateParticipant {
            user_id: self.user_id.clone(),
            fields: ParticipantFields::left(),
        });
        if timeout(self.leave_timeout, self.outbox.flush()).await.is_err() {
            warn!(room_id = %self.room_id, user_id = %self.user_id, "leave notification timed out");
        }
        self.pump.abort();
        self.transport.unsubscribe(self.subscription).await;
        info!(room_id = %self.room_id, user_id = %self.user_id, "left room");
    }

    /// Submit or clear the caller's own card.
    ///
    /// Accepted in every phase; values outside the deck are rejected.
    pub fn vote(&self, value: Option<&str>) -> RoomResult<()> {
        self.ensure_active()?;
        if let Some(value) = value {
            if !self.deck.contains(value) {
                return Err(RoomError::InvalidInput(format!(
                    "`{value}` is not a card of this deck"
                )));
            }
        }

        let vote = value.map(str::to_string);
        let now = self.clock.now_ms();
        let stamp = self
            .store
            .set_vote(&self.user_id, vote.clone(), now)
            .unwrap_or(now);
        self.outbox.send(WriteOp::UpdateParticipant {
            user_id: self.user_id.clone(),
            fields: ParticipantFields::own_vote(vote, stamp),
        });
        Ok(())
    }

    /// Start a fresh round: clear every vote, hide cards, end any discussion.
    pub fn start_voting(&self) -> RoomResult<VotingPhase> {
        self.drive(VotingEvent::StartVoting, "start voting")
    }

    /// Show or hide the cards. Hiding them also ends a discussion.
    pub fn toggle_reveal(&self) -> RoomResult<VotingPhase> {
        self.drive(VotingEvent::ToggleReveal, "reveal votes")
    }

    /// Drop the round and return to idle. Repeating it changes nothing.
    pub fn reset_votes(&self) -> RoomResult<VotingPhase> {
        self.drive(VotingEvent::ResetVotes, "reset votes")
    }

    fn drive(&self, event: VotingEvent, action: &'static str) -> RoomResult<VotingPhase> {
        self.ensure_active()?;
        self.ensure_admin(action)?;

        let plan = self.store.read(|snapshot| voting::plan(&snapshot.room, event));
        if plan.clear_votes {
            self.clear_all_votes();
        }
        self.write_room(plan.room);
        debug!(room_id = %self.room_id, from = ?plan.from, to = ?plan.to, ?event, "voting transition");
        Ok(plan.to)
    }

    /// Turn discussion on, picking the outliers to talk first.
    ///
    /// Once active the pick stays frozen; calling again returns it unchanged.
    pub fn start_discussion(&self) -> RoomResult<DiscussionPick> {
        self.start_discussion_with(&mut rand::rng())
    }

    /// [`RoomSession::start_discussion`] with an explicit random source.
    pub fn start_discussion_with<R>(&self, rng: &mut R) -> RoomResult<DiscussionPick>
    where
        R: Rng + ?Sized,
    {
        self.ensure_active()?;
        self.ensure_admin("start a discussion")?;

        let snapshot = self.store.current_snapshot();
        if snapshot.room.discussion_active {
            return Ok(DiscussionPick {
                min_voter: snapshot.room.discussion_min_voter,
                max_voter: snapshot.room.discussion_max_voter,
            });
        }
        if !VotingPhase::of(&snapshot.room).allows_discussion() {
            return Err(RoomError::InvalidInput(
                "votes must be revealed before starting a discussion".into(),
            ));
        }

        let pick = select_for_discussion(&compute_outlier_candidates(&snapshot), rng);
        info!(
            room_id = %self.room_id,
            min_voter = ?pick.min_voter,
            max_voter = ?pick.max_voter,
            "discussion started"
        );
        self.write_room(pick.clone().into_fields());
        Ok(pick)
    }

    /// Turn discussion off and clear both picks.
    pub fn stop_discussion(&self) -> RoomResult<()> {
        self.ensure_active()?;
        self.ensure_admin("stop a discussion")?;
        self.write_room(RoomFields::discussion_cleared());
        Ok(())
    }

    /// Start or stop discussion depending on its current state. Returns whether it is now on.
    pub fn toggle_discussion(&self) -> RoomResult<bool> {
        if self.store.read(|snapshot| snapshot.room.discussion_active) {
            self.stop_discussion()?;
            Ok(false)
        } else {
            self.start_discussion()?;
            Ok(true)
        }
    }

    /// Whether the admin's own card counts in statistics.
    pub fn set_admin_participates(&self, participates: bool) -> RoomResult<()> {
        self.ensure_active()?;
        self.ensure_admin("change admin participation")?;
        self.write_room(RoomFields {
            admin_participates: Some(participates),
            ..RoomFields::default()
        });
        Ok(())
    }

    /// Set or remove the PIN guarding admin re-entry.
    pub fn set_admin_pin(&self, pin: Option<&str>) -> RoomResult<()> {
        self.ensure_active()?;
        self.ensure_admin("change the admin PIN")?;
        if pin.is_some_and(str::is_empty) {
            return Err(RoomError::InvalidInput("admin PIN must not be empty".into()));
        }

        match pin {
            Some(_) => self.identities.set_admin_id(&self.room_id, &self.user_id),
            None => self.identities.clear_admin_id(&self.room_id),
        }
        self.write_room(RoomFields {
            admin_pin: Some(pin.map(str::to_string)),
            ..RoomFields::default()
        });
        Ok(())
    }

    /// Remove another participant from the room.
    pub fn remove_participant(&self, user_id: &str) -> RoomResult<()> {
        self.ensure_active()?;
        self.ensure_admin("remove participants")?;
        if user_id == self.user_id {
            return Err(RoomError::InvalidInput("use leave to exit the room".into()));
        }

        self.store.remove_participant(user_id);
        self.outbox.send(WriteOp::DeleteParticipant {
            user_id: user_id.to_string(),
        });
        info!(room_id = %self.room_id, removed = %user_id, "participant removed");
        Ok(())
    }

    /// Copy of the current room view.
    pub fn snapshot(&self) -> RoomSnapshot {
        self.store.current_snapshot()
    }

    /// Receiver woken whenever the room view changes.
    pub fn changes(&self) -> watch::Receiver<RoomSnapshot> {
        self.store.subscribe()
    }

    /// Derived view of the current snapshot, memoized by revision.
    pub fn summary(&self) -> Arc<RoomSummary> {
        let mut cache = self
            .summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.store.read(|snapshot| cache.get(snapshot))
    }

    /// Receiver of derived views, woken only when the view actually differs.
    pub fn watch_summary(&self) -> watch::Receiver<RoomSummary> {
        spawn_summary_feed(self.store.subscribe())
    }

    /// Current voting phase.
    pub fn phase(&self) -> VotingPhase {
        self.store.read(|snapshot| VotingPhase::of(&snapshot.room))
    }

    /// Whether this client is the room admin.
    pub fn is_admin(&self) -> bool {
        self.store.read(|snapshot| snapshot.room.is_admin(&self.user_id))
    }

    /// Identity used by this membership.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Room of this membership.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Display name announced on join.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cards accepted by [`RoomSession::vote`].
    pub fn deck(&self) -> &CardDeck {
        &self.deck
    }

    /// Whether heartbeats are still being published.
    pub fn is_present(&self) -> bool {
        self.presence.is_running()
    }

    /// Whether the admin removed this client from the room.
    pub fn was_removed(&self) -> bool {
        !self.presence.is_running() && !self.left.load(Ordering::SeqCst)
    }

    /// Card highlighted in the UI: the caller's own vote unless overridden since it changed.
    pub fn highlighted_card(&self) -> Option<String> {
        let own = self.store.read(|snapshot| {
            snapshot
                .participant(&self.user_id)
                .and_then(|participant| participant.vote.as_deref())
                .and_then(|vote| self.deck.index_of(vote))
        });
        let mut highlighted = self
            .highlighted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        highlighted.track(own);
        highlighted
            .get()
            .and_then(|index| self.deck.cards().get(index).cloned())
    }

    /// Override the highlighted card until the caller's vote changes.
    pub fn highlight_card(&self, card: Option<&str>) -> RoomResult<()> {
        let index = match card {
            Some(card) => Some(self.deck.index_of(card).ok_or_else(|| {
                RoomError::InvalidInput(format!("`{card}` is not a card of this deck"))
            })?),
            None => None,
        };
        // Sync the tracked source first so the override survives until the next real change.
        self.highlighted_card();
        self.highlighted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_override(index);
        Ok(())
    }

    /// Wait until every write issued so far reached the transport (or failed).
    pub async fn flush(&self) {
        self.outbox.flush().await;
    }

    fn ensure_active(&self) -> RoomResult<()> {
        if self.left.load(Ordering::SeqCst) {
            return Err(RoomError::NotJoined);
        }
        Ok(())
    }

    fn ensure_admin(&self, action: &'static str) -> RoomResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(RoomError::NotAdmin(action))
        }
    }

    fn write_room(&self, fields: RoomFields) {
        self.store.apply_room_fields(&fields);
        self.outbox.send(WriteOp::UpdateRoom { fields });
    }

    fn clear_all_votes(&self) {
        let members: Vec<String> = self
            .store
            .read(|snapshot| snapshot.participants.keys().cloned().collect());
        self.store.clear_votes();
        for user_id in members {
            self.outbox.send(WriteOp::UpdateParticipant {
                user_id,
                fields: ParticipantFields::vote(None),
            });
        }
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        if self.left.swap(true, Ordering::SeqCst) {
            return;
        }
        self.presence.stop();
        self.outbox.send(WriteOp::UpdateParticipant {
            user_id: self.user_id.clone(),
            fields: ParticipantFields::left(),
        });
        self.pump.abort();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(self.transport.unsubscribe(self.subscription));
            }
            Err(_) => debug!(room_id = %self.room_id, "no runtime to unsubscribe on drop"),
        }
        debug!(room_id = %self.room_id, user_id = %self.user_id, "session dropped without leave");
    }
}

fn validate_entry(room_id: &str, name: &str) -> RoomResult<(String, String)> {
    let room_id = room_id.trim();
    let name = name.trim();
    validate_path_id(room_id)
        .map_err(|err| RoomError::InvalidInput(format!("invalid room id `{room_id}`: {err}")))?;
    if name.is_empty() {
        return Err(RoomError::InvalidInput("name must not be empty".into()));
    }
    Ok((room_id.to_string(), name.to_string()))
}

fn spawn_event_pump(
    store: SharedStore,
    presence: Arc<PresenceTracker>,
    user_id: String,
    mut events: BoxStream<'static, RoomEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let removes_self = matches!(
                &event,
                RoomEvent::ParticipantDeleted { user_id: removed, .. } if *removed == user_id
            );
            store.apply_remote_event(event);
            if removes_self && presence.stop() {
                warn!(room_id = %store.room_id(), user_id = %user_id, "removed from room; presence stopped");
            }
        }
        debug!(room_id = %store.room_id(), "room event stream ended");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::sync_transport::memory::MemoryTransport, state::discussion::tests::ZeroRng,
    };

    fn context(transport: &MemoryTransport) -> SessionContext {
        SessionContext::ephemeral(Arc::new(transport.clone()), EngineConfig::default())
    }

    async fn settle(session: &RoomSession) {
        session.flush().await;
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn creator_sees_self_as_admin_member() {
        let transport = MemoryTransport::new();
        let session = RoomSession::create(&context(&transport), "R", "Ann", None)
            .await
            .unwrap();

        assert!(session.is_admin());
        assert!(session.snapshot().contains(session.user_id()));
        assert_eq!(session.phase(), VotingPhase::Idle);
        session.leave().await;
    }

    #[tokio::test]
    async fn blank_names_are_rejected() {
        let transport = MemoryTransport::new();
        let err = RoomSession::create(&context(&transport), "R", "  ", None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RoomError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn room_ids_must_be_url_safe() {
        let transport = MemoryTransport::new();
        for room_id in ["AB CD", "a/b", ""] {
            let err = RoomSession::create(&context(&transport), room_id, "Ann", None)
                .await
                .err()
                .unwrap();
            assert!(matches!(err, RoomError::InvalidInput(_)), "{room_id:?}");
        }

        RoomSession::create(&context(&transport), " AB-CD ", "Ann", None)
            .await
            .unwrap()
            .leave()
            .await;
        let err = RoomSession::join(&context(&transport), "AB CD", "Bob", None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RoomError::InvalidInput(_)));
        assert!(transport.room("AB-CD").is_some());
    }

    #[tokio::test]
    async fn non_admin_commands_are_refused() {
        let transport = MemoryTransport::new();
        let admin = RoomSession::create(&context(&transport), "R", "Ann", None)
            .await
            .unwrap();
        let guest = RoomSession::join(&context(&transport), "R", "Bob", None)
            .await
            .unwrap();

        assert!(!guest.is_admin());
        assert!(matches!(guest.start_voting(), Err(RoomError::NotAdmin(_))));
        assert!(matches!(guest.remove_participant(admin.user_id()), Err(RoomError::NotAdmin(_))));

        guest.leave().await;
        admin.leave().await;
    }

    #[tokio::test]
    async fn votes_outside_the_deck_are_rejected() {
        let transport = MemoryTransport::new();
        let session = RoomSession::create(&context(&transport), "R", "Ann", None)
            .await
            .unwrap();

        assert!(matches!(session.vote(Some("4")), Err(RoomError::InvalidInput(_))));
        session.vote(Some("5")).unwrap();
        assert_eq!(
            session.snapshot().participant(session.user_id()).unwrap().vote.as_deref(),
            Some("5")
        );

        settle(&session).await;
        let row = transport.participant("R", session.user_id()).unwrap();
        assert_eq!(row.vote.as_deref(), Some("5"));
        session.leave().await;
    }

    #[tokio::test]
    async fn discussion_pick_is_frozen_while_active() {
        let transport = MemoryTransport::new();
        let session = RoomSession::create(&context(&transport), "R", "Ann", None)
            .await
            .unwrap();
        session.set_admin_participates(true).unwrap();
        session.start_voting().unwrap();
        session.vote(Some("1")).unwrap();

        assert!(matches!(
            session.start_discussion_with(&mut ZeroRng),
            Err(RoomError::InvalidInput(_))
        ));

        session.toggle_reveal().unwrap();
        let first = session.start_discussion_with(&mut ZeroRng).unwrap();
        let again = session.start_discussion().unwrap();
        assert_eq!(first, again);
        assert!(session.snapshot().room.discussion_active);

        assert!(!session.toggle_discussion().unwrap());
        let room = session.snapshot().room;
        assert!(!room.discussion_active);
        assert_eq!(room.discussion_min_voter, None);
        session.leave().await;
    }

    #[tokio::test]
    async fn highlighted_card_follows_vote_until_overridden() {
        let transport = MemoryTransport::new();
        let session = RoomSession::create(&context(&transport), "R", "Ann", None)
            .await
            .unwrap();

        session.vote(Some("8")).unwrap();
        assert_eq!(session.highlighted_card().as_deref(), Some("8"));

        session.highlight_card(Some("13")).unwrap();
        assert_eq!(session.highlighted_card().as_deref(), Some("13"));

        session.vote(Some("3")).unwrap();
        assert_eq!(session.highlighted_card().as_deref(), Some("3"));
        session.leave().await;
    }

    #[tokio::test]
    async fn leave_is_idempotent_and_publishes_departure() {
        let transport = MemoryTransport::new();
        let session = RoomSession::create(&context(&transport), "R", "Ann", None)
            .await
            .unwrap();
        let user_id = session.user_id().to_string();

        session.leave().await;
        session.leave().await;

        assert_eq!(transport.participant("R", &user_id).unwrap().last_seen, 0);
        assert_eq!(transport.subscriber_count("R"), 0);
        assert!(matches!(session.vote(Some("1")), Err(RoomError::NotJoined)));
    }

    #[tokio::test]
    async fn leave_survives_unreachable_transport() {
        let transport = MemoryTransport::new();
        let session = RoomSession::create(&context(&transport), "R", "Ann", None)
            .await
            .unwrap();
        transport.set_reachable(false);

        session.leave().await;
        assert!(!session.is_present());
    }

    #[tokio::test]
    async fn dropping_a_session_leaves_best_effort() {
        let transport = MemoryTransport::new();
        let context = context(&transport);
        let session = RoomSession::create(&context, "R", "Ann", None).await.unwrap();
        let user_id = session.user_id().to_string();
        let outbox = session.outbox.clone();

        drop(session);
        outbox.flush().await;

        assert_eq!(transport.participant("R", &user_id).unwrap().last_seen, 0);
    }
}
