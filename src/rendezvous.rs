//! WebSocket rendezvous server matching two clients per room and relaying signaling

mod actor;
mod client;
mod messages;
mod server;
mod types;

pub use actor::RoomManagerHandle;
pub use client::RendezvousClient;
pub use messages::{ClientEvent, ServerEvent};
pub use server::RendezvousServer;
pub use types::{ConnId, OutboundMessage, ROOM_CAPACITY, RendezvousError, RoomName, RoomState};
