/// Transport-level error types.
pub mod error;
/// Row models exchanged with sync transports.
pub mod models;
/// Sync transport contract and its backends.
pub mod sync_transport;
