use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::platform::{DataChannel, PeerConnection, PeerConnector, PlatformEvent};
use super::types::{
    ChannelMessage, ConnectionError, IceCandidate, IceConnectionState, InboundMessage, Phase, Role,
    SessionDescription, SessionStatus, is_reserved_label,
};
use crate::auth::{Envelope, KeyExchange, PUBLIC_KEY_EXCHANGE_LABEL, SIGNED_DATA_LABEL};
use crate::config::SessionConfig;
use crate::rendezvous::{ClientEvent, ServerEvent};

pub(crate) type MessageCallback = Box<dyn FnMut(InboundMessage) + Send>;

/// Commands sent to the session actor by its handle
pub(crate) enum SessionCommand {
    Init { role: Option<Role> },
    SetCallback(MessageCallback),
    SendData { label: String, payload: Value },
    SendSigned { label: String, payload: Value },
    CreateAndSendOffer,
    Signal(ServerEvent),
    Status { reply: oneshot::Sender<SessionStatus> },
    Close { reply: oneshot::Sender<()> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Local,
    RemoteLeft,
    RoomFull,
    IceFailed,
    Timeout,
}

/// State owned by one session actor.
pub(crate) struct Session {
    config: SessionConfig,
    phase: Phase,
    role: Option<Role>,
    signal_tx: mpsc::UnboundedSender<ClientEvent>,
    connector: Arc<dyn PeerConnector>,
    platform_tx: mpsc::UnboundedSender<PlatformEvent>,
    connection: Option<Arc<dyn PeerConnection>>,
    channel: Option<Arc<dyn DataChannel>>,
    channel_open: bool,
    remote_description_set: bool,
    early_candidates: Vec<IceCandidate>,
    keys: KeyExchange,
    on_message: Option<MessageCallback>,
    deadline: Option<Instant>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        signal_tx: mpsc::UnboundedSender<ClientEvent>,
        connector: Arc<dyn PeerConnector>,
        platform_tx: mpsc::UnboundedSender<PlatformEvent>,
    ) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            role: None,
            signal_tx,
            connector,
            platform_tx,
            connection: None,
            channel: None,
            channel_open: false,
            remote_description_set: false,
            early_candidates: Vec::new(),
            keys: KeyExchange::new(),
            on_message: None,
            deadline: None,
        }
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            phase: self.phase,
            role: self.role,
            has_connection: self.connection.is_some(),
            has_channel: self.channel.is_some(),
            channel_open: self.channel_open,
            has_counterpart_key: self.keys.has_counterpart(),
            public_key: self.keys.public_key(),
        }
    }

    fn emit(&self, event: ClientEvent) {
        if self.signal_tx.send(event).is_err() {
            warn!("Rendezvous connection is gone, signal dropped");
        }
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            SessionCommand::Close { reply } => {
                self.close(CloseReason::Local).await;
                let _ = reply.send(());
            }
            SessionCommand::SetCallback(cb) => self.on_message = Some(cb),
            _ if self.phase == Phase::Closed => {
                warn!("Session for room {} is closed, command ignored", self.config.room);
            }
            SessionCommand::Init { role } => self.init(role),
            SessionCommand::SendData { label, payload } => {
                if is_reserved_label(&label) {
                    warn!("{}", ConnectionError::ReservedLabel(label));
                    return;
                }
                self.send_envelope(Envelope::new(label, payload)).await;
            }
            SessionCommand::SendSigned { label, payload } => {
                self.send_signed(label, payload).await
            }
            SessionCommand::CreateAndSendOffer => self.create_and_send_offer().await,
            SessionCommand::Signal(event) => self.handle_signal(event).await,
        }
    }

    fn init(&mut self, role: Option<Role>) {
        if self.phase != Phase::Idle {
            warn!("Session for room {} already initialized", self.config.room);
            return;
        }
        if let Some(role) = role {
            self.role = Some(role);
        }
        info!("Joining room {}", self.config.room);
        self.phase = Phase::Joining;
        self.emit(ClientEvent::Join {
            room: self.config.room.clone(),
        });
    }

    /// Role is set once; a contradicting response keeps the first value.
    fn assign_role(&mut self, role: Role) -> Role {
        match self.role {
            Some(current) if current != role => {
                warn!(
                    "Rendezvous suggests {} but {}",
                    role,
                    ConnectionError::RoleAlreadyAssigned(current)
                );
                current
            }
            _ => {
                self.role = Some(role);
                role
            }
        }
    }

    async fn handle_signal(&mut self, event: ServerEvent) {
        if self.phase == Phase::Closed {
            debug!("Session closed, ignoring {}", event.name());
            return;
        }

        match event {
            ServerEvent::Created { room } | ServerEvent::Joined { room }
                if room != self.config.room =>
            {
                debug!("Ignoring response for unrelated room {}", room);
            }
            ServerEvent::Created { .. } => self.on_room_response(Role::Host, false).await,
            ServerEvent::Joined { .. } => self.on_room_response(Role::Peer, true).await,
            ServerEvent::Full { room } => {
                warn!("{}", ConnectionError::RoomFull(room.to_string()));
                self.close(CloseReason::RoomFull).await;
            }
            ServerEvent::Ready => self.on_ready().await,
            ServerEvent::Offer { sdp } => match parse_description(sdp) {
                Ok(desc) => self.handle_offer(desc).await,
                Err(e) => warn!("Dropping offer: {}", e),
            },
            ServerEvent::Answer { sdp } => match parse_description(sdp) {
                Ok(desc) => self.handle_answer(desc).await,
                Err(e) => warn!("Dropping answer: {}", e),
            },
            ServerEvent::IceCandidate { candidate } => {
                match serde_json::from_value::<IceCandidate>(candidate) {
                    Ok(candidate) => self.handle_ice_candidate(candidate).await,
                    Err(e) => warn!("Dropping ICE candidate: {}", e),
                }
            }
            ServerEvent::Leave => {
                info!("Other side left room {}", self.config.room);
                self.close(CloseReason::RemoteLeft).await;
            }
            ServerEvent::Error { message } => warn!("Rendezvous error: {}", message),
        }
    }

    async fn on_room_response(&mut self, suggested: Role, other_present: bool) {
        if !matches!(self.phase, Phase::Idle | Phase::Joining) {
            warn!("Unexpected room response in phase {:?}", self.phase);
            return;
        }

        match self.assign_role(suggested) {
            Role::Host => {
                info!("Room {}: acting as host", self.config.room);
                self.phase = Phase::Hosting;
                // a pre-assigned host that finds the peer already waiting goes first
                if other_present {
                    self.initiate_call().await;
                }
            }
            Role::Peer => {
                info!("Room {}: acting as peer", self.config.room);
                self.phase = Phase::Peering;
                self.emit(ClientEvent::Ready {
                    room: self.config.room.clone(),
                });
            }
        }
    }

    async fn on_ready(&mut self) {
        if self.role != Some(Role::Host) {
            debug!("Ignoring ready: not the host");
            return;
        }
        if self.connection.is_some() {
            warn!("Ignoring ready: {}", ConnectionError::AlreadyNegotiating);
            return;
        }
        self.initiate_call().await;
    }

    fn start_negotiation(&mut self) {
        self.phase = Phase::Negotiating;
        self.deadline = self
            .config
            .negotiation_timeout
            .map(|timeout| Instant::now() + timeout);
    }

    async fn new_connection(&mut self) -> Result<Arc<dyn PeerConnection>, ConnectionError> {
        let connection = self
            .connector
            .create(&self.config.ice_servers, self.platform_tx.clone())
            .await?;
        self.connection = Some(connection.clone());
        Ok(connection)
    }

    /// Host: create the connection and channel, then offer.
    async fn initiate_call(&mut self) {
        if let Err(e) = self.try_initiate_call().await {
            error!("Error initiating call: {}", e);
        }
    }

    async fn try_initiate_call(&mut self) -> Result<(), ConnectionError> {
        let connection = self.new_connection().await?;
        self.start_negotiation();

        info!("Creating data channel as host");
        let channel = connection
            .create_data_channel(&self.config.channel_label)
            .await?;
        self.channel = Some(channel);

        self.send_offer(&connection).await
    }

    async fn send_offer(&mut self, connection: &Arc<dyn PeerConnection>) -> Result<(), ConnectionError> {
        let offer = connection.create_offer().await?;
        connection.set_local_description(offer.clone()).await?;
        info!("Sending offer to room {}", self.config.room);
        self.emit(ClientEvent::Offer {
            sdp: serde_json::to_value(&offer).map_err(|e| ConnectionError::Platform(e.to_string()))?,
            room: self.config.room.clone(),
        });
        Ok(())
    }

    async fn create_and_send_offer(&mut self) {
        if self.role != Some(Role::Host) {
            warn!("{}", ConnectionError::NotHost);
            return;
        }
        let result = match self.connection.clone() {
            Some(connection) => self.send_offer(&connection).await,
            None => self.try_initiate_call().await,
        };
        if let Err(e) = result {
            error!("Error creating offer: {}", e);
        }
    }

    pub(crate) async fn handle_offer(&mut self, offer: SessionDescription) {
        if self.role == Some(Role::Host) {
            warn!("Ignoring offer: {}", ConnectionError::NotHost);
            return;
        }
        if self.connection.is_some() {
            warn!("Ignoring offer: {}", ConnectionError::AlreadyNegotiating);
            return;
        }
        if let Err(e) = self.try_answer(offer).await {
            error!("Error handling offer: {}", e);
        }
    }

    async fn try_answer(&mut self, offer: SessionDescription) -> Result<(), ConnectionError> {
        let connection = self.new_connection().await?;
        self.start_negotiation();

        connection.set_remote_description(offer).await?;
        self.remote_description_set = true;

        let answer = connection.create_answer().await?;
        connection.set_local_description(answer.clone()).await?;
        info!("Sending answer to room {}", self.config.room);
        self.emit(ClientEvent::Answer {
            sdp: serde_json::to_value(&answer).map_err(|e| ConnectionError::Platform(e.to_string()))?,
            room: self.config.room.clone(),
        });

        self.flush_early_candidates(&connection).await;
        Ok(())
    }

    pub(crate) async fn handle_answer(&mut self, answer: SessionDescription) {
        let Some(connection) = self.connection.clone() else {
            warn!("Ignoring answer: {}", ConnectionError::AnswerWithoutOffer);
            return;
        };
        if self.role != Some(Role::Host) {
            warn!("Ignoring answer: {}", ConnectionError::NotHost);
            return;
        }
        if self.remote_description_set {
            warn!("Ignoring duplicate answer");
            return;
        }

        match connection.set_remote_description(answer).await {
            Ok(()) => {
                info!("Remote description set");
                self.remote_description_set = true;
                self.flush_early_candidates(&connection).await;
            }
            Err(e) => error!("Error handling answer: {}", e),
        }
    }

    pub(crate) async fn handle_ice_candidate(&mut self, candidate: IceCandidate) {
        let connection = match self.connection.clone() {
            Some(connection) if self.remote_description_set => connection,
            _ => {
                if self.config.buffer_early_candidates {
                    debug!("Buffering early ICE candidate");
                    self.early_candidates.push(candidate);
                } else {
                    warn!("Discarding ICE candidate: {}", ConnectionError::NoRemoteDescription);
                }
                return;
            }
        };

        if let Err(e) = connection.add_ice_candidate(candidate).await {
            warn!("Error adding ICE candidate: {}", e);
        }
    }

    async fn flush_early_candidates(&mut self, connection: &Arc<dyn PeerConnection>) {
        for candidate in std::mem::take(&mut self.early_candidates) {
            if let Err(e) = connection.add_ice_candidate(candidate).await {
                warn!("Error adding buffered ICE candidate: {}", e);
            }
        }
    }

    async fn handle_platform(&mut self, event: PlatformEvent) {
        if self.phase == Phase::Closed {
            return;
        }

        match event {
            PlatformEvent::LocalCandidate(candidate) => {
                if self.connection.is_none() {
                    return;
                }
                match serde_json::to_value(&candidate) {
                    Ok(candidate) => {
                        debug!("Sending ICE candidate");
                        self.emit(ClientEvent::IceCandidate {
                            candidate,
                            room: self.config.room.clone(),
                        });
                    }
                    Err(e) => warn!("Failed to encode ICE candidate: {}", e),
                }
            }
            PlatformEvent::IceStateChanged(state) => {
                info!("ICE connection state: {:?}", state);
                if state == IceConnectionState::Failed {
                    warn!("ICE failed for room {}", self.config.room);
                    self.close(CloseReason::IceFailed).await;
                }
            }
            PlatformEvent::DataChannel(channel) => {
                if self.role == Some(Role::Peer) && self.channel.is_none() {
                    info!("Received data channel {}", channel.label());
                    self.channel = Some(channel);
                } else {
                    warn!("Closing unexpected data channel {}", channel.label());
                    let _ = channel.close().await;
                }
            }
            PlatformEvent::ChannelOpen => self.on_channel_open().await,
            PlatformEvent::ChannelClosed => {
                info!("Data channel closed");
                self.channel_open = false;
            }
            PlatformEvent::Message(text) => self.dispatch_inbound(&text),
        }
    }

    async fn on_channel_open(&mut self) {
        if self.channel.is_none() {
            warn!("Open signal without a data channel");
            return;
        }
        info!("Data channel opened");
        self.channel_open = true;
        self.phase = Phase::Connected;
        self.deadline = None;

        match serde_json::to_value(self.keys.public_key()) {
            Ok(key) => {
                self.send_envelope(Envelope::new(PUBLIC_KEY_EXCHANGE_LABEL, key))
                    .await
            }
            Err(e) => error!("Failed to encode public key: {}", e),
        }
    }

    fn dispatch_inbound(&mut self, text: &str) {
        let message = match ChannelMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping inbound frame: {}", e);
                return;
            }
        };

        match message {
            ChannelMessage::PublicKeyExchange(key) => {
                if let Err(e) = self.keys.register_counterpart(&key) {
                    warn!("Rejected public key: {}", e);
                }
            }
            ChannelMessage::SignedData(signed) => match self.keys.verify(&signed) {
                Ok(()) => self.deliver(InboundMessage {
                    label: signed.message.label,
                    payload: signed.message.payload,
                    authenticated: true,
                }),
                Err(e) => warn!("Dropping signed message: {}", e),
            },
            ChannelMessage::Application(envelope) => self.deliver(InboundMessage {
                label: envelope.label,
                payload: envelope.payload,
                authenticated: false,
            }),
        }
    }

    fn deliver(&mut self, message: InboundMessage) {
        match self.on_message.as_mut() {
            Some(cb) => cb(message),
            None => info!("Received {} with no callback set", message.label),
        }
    }

    async fn send_envelope(&mut self, envelope: Envelope) {
        let channel = match &self.channel {
            Some(channel) if self.channel_open => channel.clone(),
            _ => {
                warn!("Not sending {}: {}", envelope.label, ConnectionError::ChannelNotOpen);
                return;
            }
        };

        let text = match serde_json::to_string(&envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode {}: {}", envelope.label, e);
                return;
            }
        };
        if let Err(e) = channel.send_text(text).await {
            warn!("Failed to send {}: {}", envelope.label, e);
        }
    }

    async fn send_signed(&mut self, label: String, payload: Value) {
        let signed = match self.keys.sign(label, payload) {
            Ok(signed) => signed,
            Err(e) => {
                warn!("Failed to sign message: {}", e);
                return;
            }
        };
        match serde_json::to_value(&signed) {
            Ok(payload) => {
                self.send_envelope(Envelope::new(SIGNED_DATA_LABEL, payload))
                    .await
            }
            Err(e) => warn!("Failed to encode signed message: {}", e),
        }
    }

    async fn negotiation_timed_out(&mut self) {
        if let Some(timeout) = self.config.negotiation_timeout {
            warn!("{}", ConnectionError::NegotiationTimeout(timeout));
        }
        self.close(CloseReason::Timeout).await;
    }

    /// Tear everything down. Safe to call repeatedly.
    async fn close(&mut self, reason: CloseReason) {
        if self.phase == Phase::Closed {
            return;
        }
        let joined = self.phase != Phase::Idle;

        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!("Error closing data channel: {}", e);
            }
        }
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                debug!("Error closing peer connection: {}", e);
            }
        }
        self.channel_open = false;
        self.early_candidates.clear();
        self.deadline = None;
        self.phase = Phase::Closed;

        if joined && !matches!(reason, CloseReason::RemoteLeft | CloseReason::RoomFull) {
            self.emit(ClientEvent::Leave {
                room: self.config.room.clone(),
            });
        }
        info!("Session for room {} closed ({:?})", self.config.room, reason);
    }
}

fn parse_description(value: Value) -> Result<SessionDescription, ConnectionError> {
    serde_json::from_value(value).map_err(|e| ConnectionError::MalformedMessage(e.to_string()))
}

pub(crate) async fn session_actor(
    mut session: Session,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    mut signals: mpsc::UnboundedReceiver<ServerEvent>,
    mut platform: mpsc::UnboundedReceiver<PlatformEvent>,
) {
    loop {
        let deadline = session.deadline;
        let negotiation_timeout = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(cmd) => session.handle_command(cmd).await,
                None => {
                    session.close(CloseReason::Local).await;
                    break;
                }
            },
            Some(event) = signals.recv() => session.handle_signal(event).await,
            Some(event) = platform.recv() => session.handle_platform(event).await,
            _ = negotiation_timeout => session.negotiation_timed_out().await,
        }
    }
}
