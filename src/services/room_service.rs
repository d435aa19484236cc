//! Row operations served by the relay, delegating to the shared in-process transport.

use tracing::info;

use crate::{
    dao::{
        models::{ParticipantFields, ParticipantRow, RoomFields, RoomRow},
        sync_transport::SyncTransport,
    },
    error::AppError,
    state::SharedState,
};

/// Whether the room has a room row or any participant row.
pub async fn room_exists(state: &SharedState, room_id: &str) -> Result<bool, AppError> {
    Ok(state.transport().room_exists(room_id).await?)
}

/// The room row, or `NotFound` when it was never written.
pub async fn read_room(state: &SharedState, room_id: &str) -> Result<RoomRow, AppError> {
    state
        .transport()
        .read_room(room_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("room `{room_id}` has no room row")))
}

/// Create the room row; `Conflict` when it already exists.
pub async fn insert_room(
    state: &SharedState,
    room_id: &str,
    fields: RoomFields,
) -> Result<RoomRow, AppError> {
    state.transport().insert_room(room_id, fields).await?;
    info!(room_id = %room_id, "room row created");
    read_room(state, room_id).await
}

/// Apply a partial update to an existing room row; a missing row is left alone.
pub async fn update_room(
    state: &SharedState,
    room_id: &str,
    fields: RoomFields,
) -> Result<(), AppError> {
    Ok(state.transport().update_room(room_id, fields).await?)
}

/// Record the admin of a room row whose seat is still vacant; `Conflict` otherwise.
pub async fn claim_admin(
    state: &SharedState,
    room_id: &str,
    fields: RoomFields,
) -> Result<(), AppError> {
    state.transport().claim_admin(room_id, fields).await?;
    info!(room_id = %room_id, "admin seat claimed");
    Ok(())
}

/// Every participant row of the room, live or not.
pub async fn read_participants(
    state: &SharedState,
    room_id: &str,
) -> Result<Vec<ParticipantRow>, AppError> {
    Ok(state.transport().read_participants(room_id).await?)
}

/// Create or update a participant row.
pub async fn upsert_participant(
    state: &SharedState,
    room_id: &str,
    user_id: &str,
    fields: ParticipantFields,
) -> Result<(), AppError> {
    Ok(state
        .transport()
        .upsert_participant(room_id, user_id, fields)
        .await?)
}

/// Update an existing participant row; missing rows are left alone.
pub async fn update_participant(
    state: &SharedState,
    room_id: &str,
    user_id: &str,
    fields: ParticipantFields,
) -> Result<(), AppError> {
    Ok(state
        .transport()
        .update_participant(room_id, user_id, fields)
        .await?)
}

/// Remove a participant row.
pub async fn delete_participant(
    state: &SharedState,
    room_id: &str,
    user_id: &str,
) -> Result<(), AppError> {
    state.transport().delete_participant(room_id, user_id).await?;
    info!(room_id = %room_id, user_id = %user_id, "participant row deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dao::sync_transport::memory::MemoryTransport, state::RelayState};

    #[tokio::test]
    async fn second_insert_is_a_conflict() {
        let state = RelayState::new(MemoryTransport::new());
        insert_room(&state, "R", RoomFields::default()).await.unwrap();

        let err = insert_room(&state, "R", RoomFields::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn taken_admin_seat_is_a_conflict() {
        let state = RelayState::new(MemoryTransport::new());
        insert_room(&state, "R", RoomFields::default()).await.unwrap();
        let claim = |user: &str| RoomFields {
            admin_user_id: Some(user.to_string()),
            ..RoomFields::default()
        };

        claim_admin(&state, "R", claim("a")).await.unwrap();
        let err = claim_admin(&state, "R", claim("b")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(read_room(&state, "R").await.unwrap().admin_user_id, "a");
    }

    #[tokio::test]
    async fn missing_room_row_is_not_found() {
        let state = RelayState::new(MemoryTransport::new());
        let err = read_room(&state, "R").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_of_missing_room_creates_nothing() {
        let state = RelayState::new(MemoryTransport::new());
        let fields = RoomFields {
            voting_started: Some(true),
            ..RoomFields::default()
        };
        update_room(&state, "R", fields).await.unwrap();
        assert!(!room_exists(&state, "R").await.unwrap());
    }

    #[tokio::test]
    async fn unreachable_transport_maps_to_service_unavailable() {
        let transport = MemoryTransport::new();
        let state = RelayState::new(transport.clone());
        transport.set_reachable(false);

        let err = read_participants(&state, "R").await.unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
    }
}
