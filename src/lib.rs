//! Two-party peer sessions: a rendezvous relay, WebRTC negotiation, signed
//! data-channel messages and a replicated state machine

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod rendezvous;
pub mod state;

pub use config::{RendezvousConfig, SessionConfig};
pub use connection::ConnectionManager;
pub use error::{Error, ErrorKind, Result};
pub use rendezvous::RendezvousServer;
pub use state::{StateManager, StateTransition};
