use tracing::debug;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Respond with the relay status and a few bookkeeping counters.
pub fn health_status(state: &SharedState) -> HealthResponse {
    let transport = state.transport();
    let rooms = transport.room_count();
    let subscriptions = transport.subscription_count();
    debug!(rooms, subscriptions, "health check");
    HealthResponse::ok(state.started_at(), rooms, subscriptions)
}
