use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::RoomName;

/// Events sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Join a room by name (creates it if empty)
    Join { room: RoomName },

    /// Tell the other member this side is ready to negotiate
    Ready { room: RoomName },

    /// Relay an SDP offer to the other member
    Offer { sdp: Value, room: RoomName },

    /// Relay an SDP answer to the other member
    Answer { sdp: Value, room: RoomName },

    /// Relay an ICE candidate to the other member
    IceCandidate { candidate: Value, room: RoomName },

    /// Leave the room
    Leave { room: RoomName },
}

impl ClientEvent {
    pub fn room(&self) -> &RoomName {
        match self {
            ClientEvent::Join { room }
            | ClientEvent::Ready { room }
            | ClientEvent::Offer { room, .. }
            | ClientEvent::Answer { room, .. }
            | ClientEvent::IceCandidate { room, .. }
            | ClientEvent::Leave { room } => room,
        }
    }

    /// The event as seen by the other member, if this is a relayed kind.
    pub fn into_relayed(self) -> Option<ServerEvent> {
        match self {
            ClientEvent::Join { .. } => None,
            ClientEvent::Ready { .. } => Some(ServerEvent::Ready),
            ClientEvent::Offer { sdp, .. } => Some(ServerEvent::Offer { sdp }),
            ClientEvent::Answer { sdp, .. } => Some(ServerEvent::Answer { sdp }),
            ClientEvent::IceCandidate { candidate, .. } => {
                Some(ServerEvent::IceCandidate { candidate })
            }
            ClientEvent::Leave { .. } => Some(ServerEvent::Leave),
        }
    }
}

/// Events sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// The sender created the room and is alone in it
    Created { room: RoomName },

    /// The sender joined a room that had one member
    Joined { room: RoomName },

    /// The room already has two members
    Full { room: RoomName },

    /// Relayed: the other member is ready
    Ready,

    /// Relayed SDP offer (opaque)
    Offer { sdp: Value },

    /// Relayed SDP answer (opaque)
    Answer { sdp: Value },

    /// Relayed ICE candidate (opaque)
    IceCandidate { candidate: Value },

    /// Relayed: the other member left
    Leave,

    /// Unparsable client frame
    Error { message: String },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Created { .. } => "created",
            ServerEvent::Joined { .. } => "joined",
            ServerEvent::Full { .. } => "full",
            ServerEvent::Ready => "ready",
            ServerEvent::Offer { .. } => "offer",
            ServerEvent::Answer { .. } => "answer",
            ServerEvent::IceCandidate { .. } => "ice-candidate",
            ServerEvent::Leave => "leave",
            ServerEvent::Error { .. } => "error",
        }
    }
}
