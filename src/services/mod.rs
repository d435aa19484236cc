/// Admin assignment, room creation and PIN checks.
pub mod admin_authority;
/// Client entry point owning the active membership.
pub mod client;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Locally persisted identities.
pub mod identity;
/// Ordered remote write queue.
pub mod outbox;
/// Heartbeat and eviction timers.
pub mod presence;
/// Relay row operations.
pub mod room_service;
/// One membership of one room.
pub mod session;
/// Server-Sent Events forwarding of room changes.
pub mod sse_service;
