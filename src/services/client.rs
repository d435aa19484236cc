use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    error::{RoomError, RoomResult},
    services::session::{RoomSession, SessionContext},
};

/// Client-side entry point owning at most one active room membership.
pub struct PokerClient {
    context: SessionContext,
    active: Mutex<Option<Arc<RoomSession>>>,
}

impl PokerClient {
    /// Client using the given collaborators.
    pub fn new(context: SessionContext) -> Self {
        Self {
            context,
            active: Mutex::new(None),
        }
    }

    /// Shared collaborators of this client.
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Create a room and make it the active one, leaving any previous room first.
    pub async fn create(
        &self,
        room_id: &str,
        name: &str,
        pin: Option<&str>,
    ) -> RoomResult<Arc<RoomSession>> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.leave().await;
        }
        let session = Arc::new(RoomSession::create(&self.context, room_id, name, pin).await?);
        *active = Some(session.clone());
        Ok(session)
    }

    /// Join a room and make it the active one, leaving any previous room first.
    pub async fn join(
        &self,
        room_id: &str,
        name: &str,
        pin: Option<&str>,
    ) -> RoomResult<Arc<RoomSession>> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.leave().await;
        }
        let session = Arc::new(RoomSession::join(&self.context, room_id, name, pin).await?);
        *active = Some(session.clone());
        Ok(session)
    }

    /// Leave the active room. A no-op when no room is active.
    pub async fn leave(&self) {
        let session = self.active.lock().await.take();
        match session {
            Some(session) => session.leave().await,
            None => debug!("leave ignored; no active room"),
        }
    }

    /// The active membership, if any.
    pub async fn session(&self) -> Option<Arc<RoomSession>> {
        self.active.lock().await.clone()
    }

    /// The active membership, or [`RoomError::NotJoined`].
    pub async fn require_session(&self) -> RoomResult<Arc<RoomSession>> {
        self.session().await.ok_or(RoomError::NotJoined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::EngineConfig, dao::sync_transport::memory::MemoryTransport};

    fn client(transport: &MemoryTransport) -> PokerClient {
        PokerClient::new(SessionContext::ephemeral(
            Arc::new(transport.clone()),
            EngineConfig::default(),
        ))
    }

    #[tokio::test]
    async fn leave_without_room_is_a_no_op() {
        let transport = MemoryTransport::new();
        let client = client(&transport);
        client.leave().await;
        assert!(matches!(client.require_session().await, Err(RoomError::NotJoined)));
    }

    #[tokio::test]
    async fn joining_another_room_leaves_the_previous_one() {
        let transport = MemoryTransport::new();
        let client = client(&transport);

        let first = client.create("ONE", "Ann", None).await.unwrap();
        client.create("TWO", "Ann", None).await.unwrap();

        assert!(!first.is_present());
        assert_eq!(transport.participant("ONE", first.user_id()).unwrap().last_seen, 0);
        assert_eq!(client.session().await.unwrap().room_id(), "TWO");

        client.leave().await;
        assert!(client.session().await.is_none());
    }
}
