//! Runtime configuration for the rendezvous server and peer sessions

use std::time::Duration;

use crate::rendezvous::RoomName;

pub const DEFAULT_RENDEZVOUS_PORT: u16 = 3479;
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_CHANNEL_LABEL: &str = "jsonChannel";

const BIND_ADDR_ENV: &str = "TANDEM_BIND_ADDR";

/// Rendezvous server settings.
#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    pub bind_addr: String,
    /// Interval between WebSocket keep-alive pings.
    pub ping_interval: Duration,
    /// Disconnect a client that does not answer a ping within this time.
    pub pong_timeout: Duration,
    /// Capacity of the room manager's command queue.
    pub command_buffer: usize,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_RENDEZVOUS_PORT),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            command_buffer: 1024,
        }
    }
}

impl RendezvousConfig {
    /// Defaults, with the bind address taken from `TANDEM_BIND_ADDR` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var(BIND_ADDR_ENV) {
            if !addr.trim().is_empty() {
                config.bind_addr = addr;
            }
        }
        config
    }
}

/// Settings for one `ConnectionManager` session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub room: RoomName,
    /// STUN/TURN URLs handed to the peer-connection backend.
    pub ice_servers: Vec<String>,
    pub channel_label: String,
    /// Give up negotiating after this long. `None` waits forever.
    pub negotiation_timeout: Option<Duration>,
    /// Hold ICE candidates that arrive before the remote description and
    /// apply them once it is set. Off by default: early candidates are dropped.
    pub buffer_early_candidates: bool,
}

impl SessionConfig {
    pub fn new(room: impl Into<RoomName>) -> Self {
        Self {
            room: room.into(),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            negotiation_timeout: Some(Duration::from_secs(30)),
            buffer_early_candidates: false,
        }
    }

    pub fn with_ice_servers(mut self, servers: Vec<String>) -> Self {
        self.ice_servers = servers;
        self
    }

    pub fn with_channel_label(mut self, label: impl Into<String>) -> Self {
        self.channel_label = label.into();
        self
    }

    pub fn with_negotiation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    pub fn with_buffer_early_candidates(mut self, enabled: bool) -> Self {
        self.buffer_early_candidates = enabled;
        self
    }
}
