//! Room presence and state synchronization engine for planning poker.
//!
//! Each client keeps a local [`state::store::RoomStore`] converged with the rows held by a
//! [`dao::sync_transport::SyncTransport`]. [`services::session::RoomSession`] drives one
//! membership; the `planning-relay` binary serves the transport over HTTP.

pub mod clock;
pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use config::EngineConfig;
pub use error::{RoomError, RoomResult};
pub use services::{
    client::PokerClient,
    session::{RoomSession, SessionContext},
};
