use std::time::SystemTime;

use serde::Serialize;
use utoipa::ToSchema;

use crate::dto::format_system_time;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status, always "ok" while the relay answers.
    pub status: String,
    /// RFC 3339 timestamp of the relay start.
    pub started_at: String,
    /// Rooms currently holding at least one row.
    pub rooms: usize,
    /// Open event subscriptions across all rooms.
    pub subscriptions: usize,
}

impl HealthResponse {
    /// Create a health response indicating the relay is operational.
    pub fn ok(started_at: SystemTime, rooms: usize, subscriptions: usize) -> Self {
        Self {
            status: "ok".to_string(),
            started_at: format_system_time(started_at),
            rooms,
            subscriptions,
        }
    }
}
