use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the planning relay.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rooms::room_exists,
        crate::routes::rooms::get_room,
        crate::routes::rooms::create_room,
        crate::routes::rooms::update_room,
        crate::routes::rooms::claim_admin,
        crate::routes::rooms::list_participants,
        crate::routes::rooms::upsert_participant,
        crate::routes::rooms::update_participant,
        crate::routes::rooms::delete_participant,
        crate::routes::events::room_events,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::rooms::ExistsResponse,
            crate::dao::models::RoomRow,
            crate::dao::models::RoomFields,
            crate::dao::models::ParticipantRow,
            crate::dao::models::ParticipantFields,
            crate::dao::models::RoomEvent,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Room and participant rows"),
        (name = "events", description = "Server-sent change feeds"),
    )
)]
pub struct ApiDoc;
