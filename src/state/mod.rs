/// Pure derivations over room snapshots.
pub mod derived;
/// Outlier detection and discussion picks.
pub mod discussion;
/// Room and participant model.
pub mod room;
/// Canonical per-membership room store.
pub mod store;
/// Overridable derived values.
pub mod tracked;
/// Voting phase machine.
pub mod voting;

use std::{sync::Arc, time::SystemTime};

use crate::dao::sync_transport::memory::MemoryTransport;

/// Shared handle to the relay server state.
pub type SharedState = Arc<RelayState>;

/// State of the relay server: the in-process transport every HTTP client talks through.
pub struct RelayState {
    transport: MemoryTransport,
    started_at: SystemTime,
}

impl RelayState {
    /// Construct a new [`RelayState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(transport: MemoryTransport) -> SharedState {
        Arc::new(Self {
            transport,
            started_at: SystemTime::now(),
        })
    }

    /// Transport holding every room served by this relay.
    pub fn transport(&self) -> &MemoryTransport {
        &self.transport
    }

    /// When the relay started.
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }
}
