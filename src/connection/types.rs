use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::auth::{
    AuthError, Envelope, PUBLIC_KEY_EXCHANGE_LABEL, PublicKey, SIGNED_DATA_LABEL, SignedEnvelope,
};
use crate::error::ErrorKind;

/// Connection manager errors. Most are logged and swallowed by the session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("answer received without a prior offer")]
    AnswerWithoutOffer,

    #[error("only the host originates offers")]
    NotHost,

    #[error("a peer connection already exists")]
    AlreadyNegotiating,

    #[error("role is already {0}")]
    RoleAlreadyAssigned(Role),

    #[error("no remote description set")]
    NoRemoteDescription,

    #[error("label {0:?} is reserved")]
    ReservedLabel(String),

    #[error("data channel is not open")]
    ChannelNotOpen,

    #[error("session is closed")]
    SessionClosed,

    #[error("room is full: {0}")]
    RoomFull(String),

    #[error("negotiation did not finish within {0:?}")]
    NegotiationTimeout(Duration),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("platform error: {0}")]
    Platform(String),
}

impl ConnectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::AnswerWithoutOffer
            | ConnectionError::NotHost
            | ConnectionError::AlreadyNegotiating
            | ConnectionError::RoleAlreadyAssigned(_)
            | ConnectionError::NoRemoteDescription
            | ConnectionError::ReservedLabel(_) => ErrorKind::Protocol,
            ConnectionError::ChannelNotOpen
            | ConnectionError::SessionClosed
            | ConnectionError::NegotiationTimeout(_)
            | ConnectionError::Platform(_) => ErrorKind::Transport,
            ConnectionError::MalformedMessage(_) => ErrorKind::Validation,
            ConnectionError::RoomFull(_) => ErrorKind::Resource,
            ConnectionError::Auth(e) => e.kind(),
        }
    }
}

/// Which side of the pair this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Created the room; sends the offer and opens the data channel.
    Host,
    /// Joined the room; answers and receives the data channel.
    Peer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Host => "host",
            Role::Peer => "peer",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Joining,
    Hosting,
    Peering,
    Negotiating,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// SDP as exchanged through the rendezvous relay: `{"type", "sdp"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Application message handed to the message callback.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub label: String,
    pub payload: Value,
    /// Arrived as `SignedData` and verified against the counterpart key.
    pub authenticated: bool,
}

/// Every kind of frame that can arrive on the data channel.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ChannelMessage {
    PublicKeyExchange(PublicKey),
    SignedData(SignedEnvelope),
    Application(Envelope),
}

impl ChannelMessage {
    pub fn parse(text: &str) -> Result<Self, ConnectionError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| ConnectionError::MalformedMessage(e.to_string()))?;

        match envelope.label.as_str() {
            "" => Err(ConnectionError::MalformedMessage("empty label".to_string())),
            PUBLIC_KEY_EXCHANGE_LABEL => serde_json::from_value(envelope.payload)
                .map(ChannelMessage::PublicKeyExchange)
                .map_err(|e| ConnectionError::MalformedMessage(e.to_string())),
            SIGNED_DATA_LABEL => serde_json::from_value(envelope.payload)
                .map(ChannelMessage::SignedData)
                .map_err(|e| ConnectionError::MalformedMessage(e.to_string())),
            _ => Ok(ChannelMessage::Application(envelope)),
        }
    }
}

pub(crate) fn is_reserved_label(label: &str) -> bool {
    label == PUBLIC_KEY_EXCHANGE_LABEL || label == SIGNED_DATA_LABEL
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub phase: Phase,
    pub role: Option<Role>,
    pub has_connection: bool,
    pub has_channel: bool,
    pub channel_open: bool,
    pub has_counterpart_key: bool,
    pub public_key: PublicKey,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_description_wire_shape() {
        let offer = SessionDescription::offer("v=0");
        assert_eq!(
            serde_json::to_value(&offer).unwrap(),
            json!({"type": "offer", "sdp": "v=0"})
        );
    }

    #[test]
    fn ice_candidate_uses_browser_field_names() {
        let c: IceCandidate = serde_json::from_value(json!({
            "candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0
        }))
        .unwrap();
        assert_eq!(c.sdp_mid.as_deref(), Some("0"));
        assert_eq!(c.sdp_mline_index, Some(0));
        assert_eq!(c.username_fragment, None);

        let bare: IceCandidate = serde_json::from_value(json!({"candidate": "c"})).unwrap();
        assert_eq!(serde_json::to_value(&bare).unwrap(), json!({"candidate": "c"}));
    }

    #[test]
    fn parse_application_message() {
        let msg = ChannelMessage::parse(r#"{"label": "ping", "payload": {"n": 1}}"#).unwrap();
        assert_eq!(
            msg,
            ChannelMessage::Application(Envelope::new("ping", json!({"n": 1})))
        );
    }

    #[test]
    fn parse_public_key_exchange() {
        let msg = ChannelMessage::parse(
            r#"{"label": "PublicKeyExchange", "payload": {"x": "1", "y": "2"}}"#,
        )
        .unwrap();
        assert!(matches!(msg, ChannelMessage::PublicKeyExchange(k) if k.x == "1" && k.y == "2"));
    }

    #[test]
    fn parse_rejects_unlabeled_and_garbage() {
        assert!(ChannelMessage::parse("not json").is_err());
        assert!(ChannelMessage::parse(r#"{"payload": 1}"#).is_err());
        assert!(ChannelMessage::parse(r#"{"label": "", "payload": 1}"#).is_err());
        assert!(ChannelMessage::parse(r#"{"label": "SignedData", "payload": {"message": 1}}"#).is_err());
    }

    #[test]
    fn error_kinds() {
        assert_eq!(ConnectionError::AnswerWithoutOffer.kind(), ErrorKind::Protocol);
        assert_eq!(ConnectionError::ChannelNotOpen.kind(), ErrorKind::Transport);
        assert_eq!(
            ConnectionError::Auth(AuthError::InvalidSignature).kind(),
            ErrorKind::Validation
        );
        assert_eq!(ConnectionError::RoomFull("r1".into()).kind(), ErrorKind::Resource);
    }
}
