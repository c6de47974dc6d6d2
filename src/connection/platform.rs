//! Seam to the peer-connection primitive (ICE, DTLS, SCTP live behind it)

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{ConnectionError, IceCandidate, IceConnectionState, SessionDescription};

/// Callbacks of the underlying connection, delivered as messages to the
/// session that owns it.
pub enum PlatformEvent {
    /// A local candidate was gathered and should be signaled to the other side.
    LocalCandidate(IceCandidate),
    IceStateChanged(IceConnectionState),
    /// The remote side opened a data channel.
    DataChannel(Arc<dyn DataChannel>),
    ChannelOpen,
    ChannelClosed,
    /// Inbound text frame on the data channel.
    Message(String),
}

pub type PlatformEvents = mpsc::UnboundedSender<PlatformEvent>;

/// Creates peer connections.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[String],
        events: PlatformEvents,
    ) -> Result<Arc<dyn PeerConnection>, ConnectionError>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, ConnectionError>;

    async fn create_answer(&self) -> Result<SessionDescription, ConnectionError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), ConnectionError>;

    async fn set_remote_description(&self, desc: SessionDescription)
    -> Result<(), ConnectionError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), ConnectionError>;

    /// Open an ordered, reliable data channel from this side.
    async fn create_data_channel(&self, label: &str)
    -> Result<Arc<dyn DataChannel>, ConnectionError>;

    async fn close(&self) -> Result<(), ConnectionError>;
}

#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;

    async fn send_text(&self, text: String) -> Result<(), ConnectionError>;

    async fn close(&self) -> Result<(), ConnectionError>;
}
