use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use super::platform::{PeerConnector, PlatformEvent};
use super::session::{Session, SessionCommand, session_actor};
use super::types::{ConnectionError, IceCandidate, InboundMessage, Role, SessionDescription, SessionStatus};
use crate::config::SessionConfig;
use crate::rendezvous::{ClientEvent, RendezvousClient, ServerEvent};

/// Handle to one peer session.
///
/// The session itself runs as an actor task that owns the peer connection,
/// the data channel and the keypair. Every method here only enqueues a
/// command, so none of them block or fail; problems are logged by the actor.
/// Clones share the same session.
#[derive(Clone)]
pub struct ConnectionManager {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl ConnectionManager {
    /// Spawn a session that signals through `rendezvous`.
    pub fn new(
        config: SessionConfig,
        rendezvous: RendezvousClient,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        let (signal_tx, signal_rx) = rendezvous.into_parts();
        Self::with_signaling(config, signal_tx, signal_rx, connector)
    }

    /// Spawn a session over raw signaling channels.
    pub fn with_signaling(
        config: SessionConfig,
        signal_tx: mpsc::UnboundedSender<ClientEvent>,
        signal_rx: mpsc::UnboundedReceiver<ServerEvent>,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<SessionCommand>();
        let (platform_tx, platform_rx) = mpsc::unbounded_channel::<PlatformEvent>();

        let session = Session::new(config, signal_tx, connector, platform_tx);
        tokio::spawn(session_actor(session, rx, signal_rx, platform_rx));

        Self { tx }
    }

    fn command(&self, cmd: SessionCommand) {
        if self.tx.send(cmd).is_err() {
            warn!("{}", ConnectionError::SessionClosed);
        }
    }

    /// Join the room; the role follows from the server's answer.
    pub fn init(&self) {
        self.command(SessionCommand::Init { role: None });
    }

    /// Join the room with a fixed role.
    pub fn init_with_role(&self, role: Role) {
        self.command(SessionCommand::Init { role: Some(role) });
    }

    /// Set the single message callback, replacing any previous one.
    pub fn set_on_message_callback(&self, callback: impl FnMut(InboundMessage) + Send + 'static) {
        self.command(SessionCommand::SetCallback(Box::new(callback)));
    }

    /// Send `{label, payload}` on the data channel. A no-op (logged) when the
    /// channel is not open.
    pub fn send_data(&self, label: impl Into<String>, payload: impl Serialize) {
        if let Some(payload) = to_payload(&payload) {
            self.command(SessionCommand::SendData {
                label: label.into(),
                payload,
            });
        }
    }

    /// Sign `{label, payload}` with the session key and send it as `SignedData`.
    pub fn send_signed_data(&self, label: impl Into<String>, payload: impl Serialize) {
        if let Some(payload) = to_payload(&payload) {
            self.command(SessionCommand::SendSigned {
                label: label.into(),
                payload,
            });
        }
    }

    /// Host only: (re)send an offer, creating the connection if needed.
    pub fn create_and_send_offer(&self) {
        self.command(SessionCommand::CreateAndSendOffer);
    }

    pub fn handle_offer(&self, offer: SessionDescription) {
        self.signal(ServerEvent::Offer {
            sdp: description_value(&offer),
        });
    }

    pub fn handle_answer(&self, answer: SessionDescription) {
        self.signal(ServerEvent::Answer {
            sdp: description_value(&answer),
        });
    }

    pub fn handle_ice_candidate(&self, candidate: IceCandidate) {
        match serde_json::to_value(&candidate) {
            Ok(candidate) => self.signal(ServerEvent::IceCandidate { candidate }),
            Err(e) => warn!("Failed to encode ICE candidate: {}", e),
        }
    }

    /// Feed a rendezvous event as if it came from the server.
    pub fn signal(&self, event: ServerEvent) {
        self.command(SessionCommand::Signal(event));
    }

    pub async fn status(&self) -> Result<SessionStatus, ConnectionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Status { reply: reply_tx })
            .map_err(|_| ConnectionError::SessionClosed)?;
        reply_rx.await.map_err(|_| ConnectionError::SessionClosed)
    }

    /// Close the channel and connection. Idempotent; the session stays
    /// closed for good.
    pub async fn close(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(SessionCommand::Close { reply: reply_tx }).is_ok() {
            let _ = reply_rx.await;
        }
    }
}

fn to_payload(payload: &impl Serialize) -> Option<Value> {
    match serde_json::to_value(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Payload is not JSON-serializable: {}", e);
            None
        }
    }
}

fn description_value(desc: &SessionDescription) -> Value {
    serde_json::json!({ "type": desc.kind, "sdp": desc.sdp })
}
