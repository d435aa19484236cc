use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
};
use validator::Validate;

use crate::{
    dao::models::{ParticipantFields, ParticipantRow, RoomFields, RoomRow},
    dto::rooms::{ExistsResponse, ParticipantPath, RoomPath},
    error::AppError,
    services::room_service,
    state::SharedState,
};

/// Routes exposing room and participant rows.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms/{room}/exists", get(room_exists))
        .route(
            "/rooms/{room}",
            get(get_room).post(create_room).patch(update_room),
        )
        .route("/rooms/{room}/admin", put(claim_admin))
        .route("/rooms/{room}/participants", get(list_participants))
        .route(
            "/rooms/{room}/participants/{user}",
            put(upsert_participant)
                .patch(update_participant)
                .delete(delete_participant),
        )
}

/// Whether anything was ever written for the room.
#[utoipa::path(
    get,
    path = "/rooms/{room}/exists",
    tag = "rooms",
    params(("room" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Whether the room exists", body = ExistsResponse),
        (status = 400, description = "Invalid room code")
    )
)]
pub async fn room_exists(
    State(state): State<SharedState>,
    Path(path): Path<RoomPath>,
) -> Result<Json<ExistsResponse>, AppError> {
    path.validate()?;
    let exists = room_service::room_exists(&state, &path.room).await?;
    Ok(Json(ExistsResponse { exists }))
}

/// Read the room row.
#[utoipa::path(
    get,
    path = "/rooms/{room}",
    tag = "rooms",
    params(("room" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Room row", body = RoomRow),
        (status = 404, description = "Room row missing")
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Path(path): Path<RoomPath>,
) -> Result<Json<RoomRow>, AppError> {
    path.validate()?;
    Ok(Json(room_service::read_room(&state, &path.room).await?))
}

/// Create the room row. The first writer wins.
#[utoipa::path(
    post,
    path = "/rooms/{room}",
    tag = "rooms",
    params(("room" = String, Path, description = "Room code")),
    request_body = RoomFields,
    responses(
        (status = 201, description = "Room row created", body = RoomRow),
        (status = 409, description = "Room row already exists")
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    Path(path): Path<RoomPath>,
    Json(fields): Json<RoomFields>,
) -> Result<(StatusCode, Json<RoomRow>), AppError> {
    path.validate()?;
    let row = room_service::insert_room(&state, &path.room, fields).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// Apply a partial update to the room row.
#[utoipa::path(
    patch,
    path = "/rooms/{room}",
    tag = "rooms",
    params(("room" = String, Path, description = "Room code")),
    request_body = RoomFields,
    responses((status = 204, description = "Update applied, or room row missing"))
)]
pub async fn update_room(
    State(state): State<SharedState>,
    Path(path): Path<RoomPath>,
    Json(fields): Json<RoomFields>,
) -> Result<StatusCode, AppError> {
    path.validate()?;
    room_service::update_room(&state, &path.room, fields).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Record the room admin, only while no admin is on record.
#[utoipa::path(
    put,
    path = "/rooms/{room}/admin",
    tag = "rooms",
    params(("room" = String, Path, description = "Room code")),
    request_body = RoomFields,
    responses(
        (status = 204, description = "Admin seat claimed"),
        (status = 409, description = "Admin already recorded or room row missing")
    )
)]
pub async fn claim_admin(
    State(state): State<SharedState>,
    Path(path): Path<RoomPath>,
    Json(fields): Json<RoomFields>,
) -> Result<StatusCode, AppError> {
    path.validate()?;
    room_service::claim_admin(&state, &path.room, fields).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// List every participant row of the room in join order.
#[utoipa::path(
    get,
    path = "/rooms/{room}/participants",
    tag = "rooms",
    params(("room" = String, Path, description = "Room code")),
    responses((status = 200, description = "Participant rows", body = [ParticipantRow]))
)]
pub async fn list_participants(
    State(state): State<SharedState>,
    Path(path): Path<RoomPath>,
) -> Result<Json<Vec<ParticipantRow>>, AppError> {
    path.validate()?;
    Ok(Json(
        room_service::read_participants(&state, &path.room).await?,
    ))
}

/// Create or update a participant row.
#[utoipa::path(
    put,
    path = "/rooms/{room}/participants/{user}",
    tag = "rooms",
    params(
        ("room" = String, Path, description = "Room code"),
        ("user" = String, Path, description = "Participant identity")
    ),
    request_body = ParticipantFields,
    responses((status = 204, description = "Row written"))
)]
pub async fn upsert_participant(
    State(state): State<SharedState>,
    Path(path): Path<ParticipantPath>,
    Json(fields): Json<ParticipantFields>,
) -> Result<StatusCode, AppError> {
    path.validate()?;
    room_service::upsert_participant(&state, &path.room, &path.user, fields).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Update an existing participant row.
#[utoipa::path(
    patch,
    path = "/rooms/{room}/participants/{user}",
    tag = "rooms",
    params(
        ("room" = String, Path, description = "Room code"),
        ("user" = String, Path, description = "Participant identity")
    ),
    request_body = ParticipantFields,
    responses((status = 204, description = "Update applied, or row missing"))
)]
pub async fn update_participant(
    State(state): State<SharedState>,
    Path(path): Path<ParticipantPath>,
    Json(fields): Json<ParticipantFields>,
) -> Result<StatusCode, AppError> {
    path.validate()?;
    room_service::update_participant(&state, &path.room, &path.user, fields).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Delete a participant row.
#[utoipa::path(
    delete,
    path = "/rooms/{room}/participants/{user}",
    tag = "rooms",
    params(
        ("room" = String, Path, description = "Room code"),
        ("user" = String, Path, description = "Participant identity")
    ),
    responses((status = 204, description = "Row removed"))
)]
pub async fn delete_participant(
    State(state): State<SharedState>,
    Path(path): Path<ParticipantPath>,
) -> Result<StatusCode, AppError> {
    path.validate()?;
    room_service::delete_participant(&state, &path.room, &path.user).await?;
    Ok(StatusCode::NO_CONTENT)
}
