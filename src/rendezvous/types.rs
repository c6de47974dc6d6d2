use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;

use crate::error::ErrorKind;

/// Rendezvous server errors
#[derive(Debug, Error)]
pub enum RendezvousError {
    #[error("room is full: {0}")]
    RoomFull(RoomName),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RendezvousError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RendezvousError::RoomFull(_) => ErrorKind::Resource,
            RendezvousError::WebSocket(_) | RendezvousError::Internal(_) => ErrorKind::Transport,
        }
    }
}

/// A room never holds more than two members.
pub const ROOM_CAPACITY: usize = 2;

const CONN_ID_LEN: usize = 13;
const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Room name chosen by the clients. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomName(Arc<str>);

impl RoomName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for RoomName {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for RoomName {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl Serialize for RoomName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RoomName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(RoomName::from(s))
    }
}

static NEXT_CONN: AtomicU32 = AtomicU32::new(1);

/// Connection ID: 13-byte fixed array ("conn_" + 8 hex)
///
/// Ids come from a process-wide counter, so two live connections never
/// share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId([u8; CONN_ID_LEN]);

impl ConnId {
    pub fn generate() -> Self {
        let value = NEXT_CONN.fetch_add(1, Ordering::Relaxed);

        let mut bytes = [0u8; CONN_ID_LEN];
        bytes[..5].copy_from_slice(b"conn_");
        for i in 0..8 {
            let nibble = ((value >> (28 - i * 4)) & 0xF) as usize;
            bytes[5 + i] = HEX_CHARS[nibble];
        }
        Self(bytes)
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("")
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Occupancy of a room as seen by the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    Empty,
    WaitingForPeer,
    Full,
}

impl RoomState {
    pub fn from_len(len: usize) -> Self {
        match len {
            0 => RoomState::Empty,
            n if n < ROOM_CAPACITY => RoomState::WaitingForPeer,
            _ => RoomState::Full,
        }
    }
}

/// Wrapper for outbound WebSocket messages using tungstenite's Utf8Bytes.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

#[derive(Debug)]
pub(crate) struct Member {
    /// Channel for outbound messages to this connection.
    /// Uses OutboundMessage (Utf8Bytes) for O(1) broadcast cloning.
    pub tx: mpsc::UnboundedSender<OutboundMessage>,
}

#[derive(Debug, Default)]
pub(crate) struct Room {
    pub members: HashMap<ConnId, Member>,
}

impl Room {
    pub fn state(&self) -> RoomState {
        RoomState::from_len(self.members.len())
    }
}
