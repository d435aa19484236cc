use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{
    dao::sync_transport::{Subscription, SyncTransport},
    error::AppError,
    state::SharedState,
};

/// Subscribe to the change feed of one room.
pub async fn subscribe_room(state: &SharedState, room_id: &str) -> Result<Subscription, AppError> {
    Ok(state.transport().subscribe(room_id).await?)
}

/// Convert a room subscription into an SSE response, forwarding events and unsubscribing
/// once the client disconnects.
pub fn to_sse_stream(
    state: SharedState,
    room_id: String,
    subscription: Subscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);
    let Subscription { id, mut events } = subscription;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                next = events.next() => {
                    let Some(event) = next else {
                        break;
                    };
                    let payload = match serde_json::to_string(&event) {
                        Ok(payload) => payload,
                        Err(err) => {
                            warn!(room_id = %room_id, error = %err, "failed to encode room event");
                            continue;
                        }
                    };
                    let frame = Event::default().event(event.kind()).data(payload);
                    if tx.send(Ok(frame)).await.is_err() {
                        break;
                    }
                }
            }
        }

        state.transport().unsubscribe(id).await;
        info!(room_id = %room_id, "room SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
