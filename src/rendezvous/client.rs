use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::actor::RoomManagerHandle;
use super::messages::{ClientEvent, ServerEvent};
use super::server::handle_text_message;
use super::types::{ConnId, OutboundMessage, RendezvousError};

/// Client side of the rendezvous protocol.
///
/// Outbound events go through [`sender`](Self::sender); inbound events are read
/// from [`recv`](Self::recv). Both halves can be split off with
/// [`into_parts`](Self::into_parts) and handed to a `ConnectionManager`.
pub struct RendezvousClient {
    tx: mpsc::UnboundedSender<ClientEvent>,
    rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl RendezvousClient {
    /// Connect to a rendezvous server over WebSocket (`ws://host:port`).
    pub async fn connect(url: &str) -> crate::Result<Self> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(RendezvousError::from)?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        info!("Connected to rendezvous server at {}", url);

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerEvent>();

        tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode client event: {}", e);
                        continue;
                    }
                };
                if ws_tx.send(Message::text(json)).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if in_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Unparsable server frame: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            debug!("Rendezvous connection closed");
        });

        Ok(Self {
            tx: out_tx,
            rx: in_rx,
        })
    }

    /// Attach to a room manager in the same process, without a socket.
    ///
    /// Events still travel as JSON text frames so the behavior matches a
    /// WebSocket client exactly. Dropping every clone of the sender
    /// disconnects the client.
    pub fn local(handle: &RoomManagerHandle) -> Self {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerEvent>();
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<OutboundMessage>();
        let handle = handle.clone();
        let conn = ConnId::generate();

        tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => handle_text_message(&json, conn, &frame_tx, &handle).await,
                    Err(e) => warn!("Failed to encode client event: {}", e),
                }
            }
            handle.disconnect(conn).await;
            debug!("Local client {} detached", conn);
        });

        tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                match serde_json::from_str::<ServerEvent>(frame.as_str()) {
                    Ok(event) => {
                        if in_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Unparsable server frame: {}", e),
                }
            }
        });

        Self {
            tx: out_tx,
            rx: in_rx,
        }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<ClientEvent> {
        self.tx.clone()
    }

    pub fn send(&self, event: ClientEvent) -> Result<(), RendezvousError> {
        self.tx
            .send(event)
            .map_err(|_| RendezvousError::Internal("rendezvous connection closed".to_string()))
    }

    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }

    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<ClientEvent>,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        (self.tx, self.rx)
    }
}
