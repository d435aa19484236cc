//! HTTP client for the relay server (`planning-relay`): rows over REST, changes over SSE.

mod config;
mod sse;

use std::{sync::Arc, time::Duration};

use async_stream::stream;
use dashmap::DashMap;
use futures::{FutureExt, StreamExt, future::BoxFuture, stream::BoxStream};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, header::ACCEPT};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dao::{
    error::{TransportError, TransportResult},
    models::{ParticipantFields, ParticipantRow, RoomEvent, RoomFields, RoomRow},
    sync_transport::{Subscription, SubscriptionId, SyncTransport},
};

pub use self::config::{RelayConfig, RelayConfigError};
pub use self::sse::{SseDecoder, SseFrame};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(1_000);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct ExistsBody {
    exists: bool,
}

/// Sync transport talking to a remote relay server.
#[derive(Clone)]
pub struct RelayTransport {
    client: Client,
    base_url: Arc<str>,
    request_timeout: Duration,
    subscriptions: Arc<DashMap<SubscriptionId, CancellationToken>>,
}

impl RelayTransport {
    /// Build a client for the relay described by `config`.
    pub fn new(config: RelayConfig) -> Result<Self, RelayConfigError> {
        let client = Client::builder()
            .build()
            .map_err(|source| RelayConfigError::ClientBuilder { source })?;

        Ok(Self {
            client,
            base_url: Arc::<str>::from(config.base_url.trim_end_matches('/')),
            request_timeout: config.request_timeout,
            subscriptions: Arc::new(DashMap::new()),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        self.client.request(method, url)
    }

    async fn execute(&self, builder: RequestBuilder, operation: &str) -> TransportResult<Response> {
        builder
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|source| TransportError::unavailable(operation, source))
    }

    async fn write<B>(&self, method: Method, path: String, body: Option<&B>) -> TransportResult<()>
    where
        B: Serialize + ?Sized,
    {
        let operation = format!("{method} {path}");
        let mut builder = self.request(method, &path);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = self.execute(builder, &operation).await?;
        match response.status() {
            StatusCode::CONFLICT => Err(TransportError::Conflict(operation)),
            status if status.is_success() => Ok(()),
            status => Err(TransportError::Rejected {
                operation,
                status: status.as_u16(),
            }),
        }
    }

    async fn read<T>(&self, path: String) -> TransportResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let operation = format!("GET {path}");
        let response = self
            .execute(self.request(Method::GET, &path), &operation)
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response
                    .json::<T>()
                    .await
                    .map(Some)
                    .map_err(|source| TransportError::Decode {
                        operation,
                        source: Box::new(source),
                    })
            }
            status => Err(TransportError::Rejected {
                operation,
                status: status.as_u16(),
            }),
        }
    }

    async fn fetch_room(&self, room_id: &str) -> TransportResult<Option<RoomRow>> {
        self.read(format!("rooms/{room_id}")).await
    }

    async fn fetch_participants(&self, room_id: &str) -> TransportResult<Vec<ParticipantRow>> {
        Ok(self
            .read(format!("rooms/{room_id}/participants"))
            .await?
            .unwrap_or_default())
    }

    /// Full state of the room expressed as events, replayed after a reconnect so nothing
    /// written while the stream was down is missed.
    async fn resync_events(&self, room_id: &str) -> TransportResult<Vec<RoomEvent>> {
        let mut events: Vec<RoomEvent> = self
            .fetch_participants(room_id)
            .await?
            .into_iter()
            .map(|participant| RoomEvent::ParticipantUpserted { participant })
            .collect();
        if let Some(room) = self.fetch_room(room_id).await? {
            events.push(RoomEvent::RoomUpdated { room });
        }
        Ok(events)
    }

    async fn open_stream(&self, room_id: &str) -> TransportResult<Response> {
        let path = format!("rooms/{room_id}/events");
        let operation = format!("GET {path}");
        let response = self
            .request(Method::GET, &path)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|source| TransportError::unavailable(operation.clone(), source))?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(TransportError::Rejected {
                operation,
                status: response.status().as_u16(),
            })
        }
    }

    /// Consume the relay's event stream, reconnecting with exponential backoff until the
    /// subscription is cancelled.
    fn event_stream(
        self,
        room_id: String,
        token: CancellationToken,
        initial: Response,
    ) -> BoxStream<'static, RoomEvent> {
        stream! {
            let mut delay = INITIAL_RECONNECT_DELAY;
            let mut reconnecting = false;
            let mut pending = Some(initial);

            'connection: loop {
                if token.is_cancelled() {
                    break;
                }

                let opened = match pending.take() {
                    Some(response) => Ok(response),
                    None => self.open_stream(&room_id).await,
                };
                match opened {
                    Ok(response) => {
                        delay = INITIAL_RECONNECT_DELAY;
                        if reconnecting {
                            info!(room_id = %room_id, "relay event stream re-established; resyncing");
                            match self.resync_events(&room_id).await {
                                Ok(events) => {
                                    for event in events {
                                        yield event;
                                    }
                                }
                                Err(err) => warn!(room_id = %room_id, error = %err, "resync after reconnect failed"),
                            }
                        }

                        let mut body = Box::pin(response.bytes_stream());
                        let mut decoder = SseDecoder::new();
                        loop {
                            let next = tokio::select! {
                                _ = token.cancelled() => None,
                                chunk = body.next() => Some(chunk),
                            };
                            let Some(chunk) = next else {
                                break 'connection;
                            };
                            match chunk {
                                Some(Ok(bytes)) => {
                                    for frame in decoder.push(&bytes) {
                                        match serde_json::from_str::<RoomEvent>(&frame.data) {
                                            Ok(event) => {
                                                yield event;
                                            }
                                            Err(err) => debug!(
                                                room_id = %room_id,
                                                event = ?frame.event,
                                                error = %err,
                                                "ignoring undecodable relay frame"
                                            ),
                                        }
                                    }
                                }
                                Some(Err(err)) => {
                                    warn!(room_id = %room_id, error = %err, "relay event stream failed");
                                    break;
                                }
                                None => {
                                    warn!(room_id = %room_id, "relay event stream closed by server");
                                    break;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        warn!(room_id = %room_id, error = %err, "relay event stream connection attempt failed");
                    }
                }

                reconnecting = true;
                let cancelled = tokio::select! {
                    _ = token.cancelled() => true,
                    _ = sleep(delay) => false,
                };
                if cancelled {
                    break;
                }
                delay = (delay * 2).min(MAX_RECONNECT_DELAY);
            }
        }
        .boxed()
    }
}

impl SyncTransport for RelayTransport {
    fn room_exists(&self, room_id: &str) -> BoxFuture<'static, TransportResult<bool>> {
        let this = self.clone();
        let path = format!("rooms/{room_id}/exists");
        async move {
            let body: Option<ExistsBody> = this.read(path).await?;
            Ok(body.is_some_and(|body| body.exists))
        }
        .boxed()
    }

    fn read_participants(
        &self,
        room_id: &str,
    ) -> BoxFuture<'static, TransportResult<Vec<ParticipantRow>>> {
        let this = self.clone();
        let room_id = room_id.to_string();
        async move { this.fetch_participants(&room_id).await }.boxed()
    }

    fn read_room(&self, room_id: &str) -> BoxFuture<'static, TransportResult<Option<RoomRow>>> {
        let this = self.clone();
        let room_id = room_id.to_string();
        async move { this.fetch_room(&room_id).await }.boxed()
    }

    fn upsert_participant(
        &self,
        room_id: &str,
        user_id: &str,
        fields: ParticipantFields,
    ) -> BoxFuture<'static, TransportResult<()>> {
        let this = self.clone();
        let path = format!("rooms/{room_id}/participants/{user_id}");
        async move { this.write(Method::PUT, path, Some(&fields)).await }.boxed()
    }

    fn update_participant(
        &self,
        room_id: &str,
        user_id: &str,
        fields: ParticipantFields,
    ) -> BoxFuture<'static, TransportResult<()>> {
        let this = self.clone();
        let path = format!("rooms/{room_id}/participants/{user_id}");
        async move { this.write(Method::PATCH, path, Some(&fields)).await }.boxed()
    }

    fn delete_participant(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> BoxFuture<'static, TransportResult<()>> {
        let this = self.clone();
        let path = format!("rooms/{room_id}/participants/{user_id}");
        async move { this.write::<()>(Method::DELETE, path, None).await }.boxed()
    }

    fn insert_room(
        &self,
        room_id: &str,
        fields: RoomFields,
    ) -> BoxFuture<'static, TransportResult<()>> {
        let this = self.clone();
        let path = format!("rooms/{room_id}");
        async move { this.write(Method::POST, path, Some(&fields)).await }.boxed()
    }

    fn update_room(
        &self,
        room_id: &str,
        fields: RoomFields,
    ) -> BoxFuture<'static, TransportResult<()>> {
        let this = self.clone();
        let path = format!("rooms/{room_id}");
        async move { this.write(Method::PATCH, path, Some(&fields)).await }.boxed()
    }

    fn claim_admin(
        &self,
        room_id: &str,
        fields: RoomFields,
    ) -> BoxFuture<'static, TransportResult<()>> {
        let this = self.clone();
        let path = format!("rooms/{room_id}/admin");
        async move { this.write(Method::PUT, path, Some(&fields)).await }.boxed()
    }

    fn subscribe(&self, room_id: &str) -> BoxFuture<'static, TransportResult<Subscription>> {
        let this = self.clone();
        let room_id = room_id.to_string();
        async move {
            // Fail fast when the relay is down instead of handing out a stream that only retries.
            let initial = this.open_stream(&room_id).await?;

            let id = Uuid::new_v4();
            let token = CancellationToken::new();
            this.subscriptions.insert(id, token.clone());
            let events = this.clone().event_stream(room_id, token, initial);
            Ok(Subscription { id, events })
        }
        .boxed()
    }

    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'static, ()> {
        let subscriptions = self.subscriptions.clone();
        async move {
            if let Some((_, token)) = subscriptions.remove(&id) {
                token.cancel();
            }
        }
        .boxed()
    }
}
