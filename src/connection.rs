//! Peer session management: rendezvous signaling, SDP/ICE negotiation and an
//! authenticated JSON data channel
//!
//! A [`ConnectionManager`] is a handle to one session actor. The actor owns
//! the peer connection and data channel behind the [`PeerConnector`] seam,
//! so the same negotiation logic runs over webrtc-rs ([`RtcConnector`]) or
//! an in-process link (`MemoryConnector`, built with the `test-util`
//! feature).

mod manager;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
mod platform;
mod rtc;
mod session;
mod types;

pub use manager::ConnectionManager;
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryConnector;
pub use platform::{DataChannel, PeerConnection, PeerConnector, PlatformEvent, PlatformEvents};
pub use rtc::RtcConnector;
pub use types::{
    ConnectionError, IceCandidate, IceConnectionState, InboundMessage, Phase, Role, SdpType,
    SessionDescription, SessionStatus,
};
