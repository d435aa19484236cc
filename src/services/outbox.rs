use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::dao::{
    error::TransportResult,
    models::{ParticipantFields, RoomFields},
    sync_transport::SyncTransport,
};

/// One remote write issued by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Update an existing participant row; a no-op once the row is gone.
    UpdateParticipant {
        /// Row owner.
        user_id: String,
        /// Fields to write.
        fields: ParticipantFields,
    },
    /// Remove a participant row.
    DeleteParticipant {
        /// Row owner.
        user_id: String,
    },
    /// Update the room row.
    UpdateRoom {
        /// Fields to write.
        fields: RoomFields,
    },
}

impl WriteOp {
    /// Heartbeat refresh for `user_id`.
    pub fn heartbeat(user_id: impl Into<String>, now_ms: i64) -> Self {
        WriteOp::UpdateParticipant {
            user_id: user_id.into(),
            fields: ParticipantFields::heartbeat(now_ms),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            WriteOp::UpdateParticipant { .. } => "update_participant",
            WriteOp::DeleteParticipant { .. } => "delete_participant",
            WriteOp::UpdateRoom { .. } => "update_room",
        }
    }

    async fn execute(self, transport: &dyn SyncTransport, room_id: &str) -> TransportResult<()> {
        match self {
            WriteOp::UpdateParticipant { user_id, fields } => {
                transport.update_participant(room_id, &user_id, fields).await
            }
            WriteOp::DeleteParticipant { user_id } => {
                transport.delete_participant(room_id, &user_id).await
            }
            WriteOp::UpdateRoom { fields } => transport.update_room(room_id, fields).await,
        }
    }
}

enum Command {
    Write(WriteOp),
    Flush(oneshot::Sender<()>),
}

/// Ordered queue of remote writes for one room.
///
/// A single task drains the queue, so writes reach the transport in the order they were
/// issued. Failures are logged and dropped. The task ends once every handle is dropped.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Command>,
}

impl Outbox {
    /// Start the writer task for `room_id`.
    pub fn spawn(room_id: impl Into<String>, transport: Arc<dyn SyncTransport>) -> Self {
        let room_id = room_id.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Write(op) => {
                        let name = op.name();
                        match op.execute(transport.as_ref(), &room_id).await {
                            Ok(()) => debug!(room_id = %room_id, op = name, "remote write applied"),
                            Err(err) => {
                                warn!(room_id = %room_id, op = name, error = %err, "remote write failed")
                            }
                        }
                    }
                    Command::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            debug!(room_id = %room_id, "outbox closed");
        });

        Self { tx }
    }

    /// Queue `op` behind every write issued so far. Returns `false` once the writer is gone.
    pub fn send(&self, op: WriteOp) -> bool {
        self.tx.send(Command::Write(op)).is_ok()
    }

    /// Wait until every write queued before this call has been attempted.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::sync_transport::memory::MemoryTransport;

    #[tokio::test]
    async fn writes_land_in_issue_order() {
        let transport = MemoryTransport::new();
        transport
            .upsert_participant("R", "a", ParticipantFields::joined("Ann", 10))
            .await
            .unwrap();
        let outbox = Outbox::spawn("R", Arc::new(transport.clone()));

        outbox.send(WriteOp::UpdateParticipant {
            user_id: "a".into(),
            fields: ParticipantFields::vote(Some("5".into())),
        });
        outbox.send(WriteOp::heartbeat("a", 20));
        outbox.send(WriteOp::UpdateParticipant {
            user_id: "a".into(),
            fields: ParticipantFields::left(),
        });
        outbox.flush().await;

        let row = transport.participant("R", "a").expect("row written");
        assert_eq!(row.vote.as_deref(), Some("5"));
        assert_eq!(row.last_seen, 0);
    }

    #[tokio::test]
    async fn failed_writes_do_not_block_the_queue() {
        let transport = MemoryTransport::new();
        transport
            .upsert_participant("R", "a", ParticipantFields::joined("Ann", 10))
            .await
            .unwrap();
        let outbox = Outbox::spawn("R", Arc::new(transport.clone()));

        transport.set_reachable(false);
        outbox.send(WriteOp::heartbeat("a", 15));
        outbox.flush().await;

        transport.set_reachable(true);
        outbox.send(WriteOp::heartbeat("a", 20));
        outbox.flush().await;

        assert_eq!(transport.participant("R", "a").unwrap().last_seen, 20);
    }
}
