use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;
use validator::Validate;

use crate::{dto::rooms::RoomPath, error::AppError, services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/rooms/{room}/events",
    tag = "events",
    params(("room" = String, Path, description = "Room code")),
    responses((status = 200, description = "Room change feed", content_type = "text/event-stream", body = String))
)]
/// Stream every row change of one room.
pub async fn room_events(
    State(state): State<SharedState>,
    Path(path): Path<RoomPath>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    path.validate()?;
    let subscription = sse_service::subscribe_room(&state, &path.room).await?;
    info!(room_id = %path.room, subscription = %subscription.id, "new room SSE connection");
    Ok(sse_service::to_sse_stream(state, path.room, subscription))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/rooms/{room}/events", get(room_events))
}
