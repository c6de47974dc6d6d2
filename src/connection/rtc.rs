//! Peer connections backed by webrtc-rs

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::platform::{DataChannel, PeerConnection, PeerConnector, PlatformEvent, PlatformEvents};
use super::types::{ConnectionError, IceCandidate, IceConnectionState, SdpType, SessionDescription};

fn platform(e: impl std::fmt::Display) -> ConnectionError {
    ConnectionError::Platform(e.to_string())
}

/// Creates real WebRTC peer connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct RtcConnector;

impl RtcConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn create(
        &self,
        ice_servers: &[String],
        events: PlatformEvents,
    ) -> Result<Arc<dyn PeerConnection>, ConnectionError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(platform)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media).map_err(platform)?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await.map_err(platform)?);
        let connection = RtcPeerConnection { pc, events };
        connection.setup_handlers();
        Ok(Arc::new(connection))
    }
}

pub struct RtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
    events: PlatformEvents,
}

impl RtcPeerConnection {
    fn setup_handlers(&self) {
        let events = self.events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = events.clone();
                Box::pin(async move {
                    // None marks the end of gathering
                    let Some(candidate) = candidate else {
                        debug!("ICE gathering complete");
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            let _ = events.send(PlatformEvent::LocalCandidate(init.into()));
                        }
                        Err(e) => warn!("Failed to serialize local candidate: {}", e),
                    }
                })
            }));

        let events = self.events.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                let events = events.clone();
                Box::pin(async move {
                    if let Some(state) = map_ice_state(state) {
                        let _ = events.send(PlatformEvent::IceStateChanged(state));
                    }
                })
            }));

        let events = self.events.clone();
        self.pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let events = events.clone();
                Box::pin(async move {
                    info!("Received data channel: {}", dc.label());
                    // the session must learn about the channel before it opens
                    let channel = Arc::new(RtcDataChannel { dc: dc.clone() });
                    let _ = events.send(PlatformEvent::DataChannel(channel));
                    RtcDataChannel::wire(&dc, events);
                })
            }));
    }
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, ConnectionError> {
        let offer = self.pc.create_offer(None).await.map_err(platform)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, ConnectionError> {
        let answer = self.pc.create_answer(None).await.map_err(platform)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), ConnectionError> {
        self.pc
            .set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(platform)
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), ConnectionError> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(platform)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), ConnectionError> {
        if self.pc.remote_description().await.is_none() {
            return Err(ConnectionError::NoRemoteDescription);
        }
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(platform)
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, ConnectionError> {
        // defaults give an ordered, reliable channel
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(platform)?;
        RtcDataChannel::wire(&dc, self.events.clone());
        Ok(Arc::new(RtcDataChannel { dc }))
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.pc.close().await.map_err(platform)
    }
}

pub struct RtcDataChannel {
    dc: Arc<RTCDataChannel>,
}

impl RtcDataChannel {
    /// Route the channel's callbacks to `events`.
    fn wire(dc: &Arc<RTCDataChannel>, events: PlatformEvents) {
        let label = dc.label().to_string();

        let open_events = events.clone();
        dc.on_open(Box::new(move || {
            info!("Data channel '{}' open", label);
            let _ = open_events.send(PlatformEvent::ChannelOpen);
            Box::pin(async {})
        }));

        let close_events = events.clone();
        dc.on_close(Box::new(move || {
            let _ = close_events.send(PlatformEvent::ChannelClosed);
            Box::pin(async {})
        }));

        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let events = events.clone();
            Box::pin(async move {
                if !msg.is_string {
                    debug!("Ignoring binary frame of {} bytes", msg.data.len());
                    return;
                }
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => {
                        let _ = events.send(PlatformEvent::Message(text));
                    }
                    Err(e) => warn!("Dropping non UTF-8 text frame: {}", e),
                }
            })
        }));
    }
}

#[async_trait]
impl DataChannel for RtcDataChannel {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    async fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        if self.dc.ready_state() != RTCDataChannelState::Open {
            return Err(ConnectionError::ChannelNotOpen);
        }
        self.dc.send_text(text).await.map(|_| ()).map_err(platform)
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.dc.close().await.map_err(platform)
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, ConnectionError> {
    match desc.kind {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    }
    .map_err(platform)
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    Some(match state {
        RTCIceConnectionState::New => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        RTCIceConnectionState::Unspecified => return None,
    })
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}
