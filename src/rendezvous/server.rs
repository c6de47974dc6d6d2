use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, error, info, warn};

use super::actor::{RoomManagerHandle, encode};
use super::messages::{ClientEvent, ServerEvent};
use super::types::{ConnId, OutboundMessage, RendezvousError, RoomName};
use crate::config::RendezvousConfig;

/// Room matcher and pass-through relay for two-party sessions.
///
/// The room registry lives in a single actor task; every connection task
/// talks to it through a [`RoomManagerHandle`], so mutations of one room
/// never interleave.
pub struct RendezvousServer {
    handle: RoomManagerHandle,
    config: RendezvousConfig,
}

impl Default for RendezvousServer {
    fn default() -> Self {
        Self::new(RendezvousConfig::default())
    }
}

impl RendezvousServer {
    pub fn new(config: RendezvousConfig) -> Self {
        Self {
            handle: RoomManagerHandle::spawn(config.command_buffer),
            config,
        }
    }

    pub fn handle(&self) -> RoomManagerHandle {
        self.handle.clone()
    }

    /// Emit `event` to every member of `room`.
    pub async fn broadcast_event(&self, room: impl Into<RoomName>, event: ServerEvent) {
        self.handle.broadcast(room.into(), event).await;
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> crate::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve WebSocket clients on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> crate::Result<()> {
        info!("Rendezvous server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            let handle = self.handle.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, handle, config).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handle: RoomManagerHandle,
    config: RendezvousConfig,
) -> Result<(), RendezvousError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let conn = ConnId::generate();
    info!("WebSocket connection from {} as {}", addr, conn);

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    let mut ping_interval = tokio::time::interval(config.ping_interval);
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    loop {
        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", conn);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(tokio::time::Instant::now() + config.pong_timeout);
                debug!("Ping sent to {}", conn);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", conn);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", conn, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => handle_text_message(&text, conn, &tx, &handle).await,
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", conn);
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", conn);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    handle.disconnect(conn).await;
    send_task.abort();
    info!("WebSocket disconnected: {}", conn);

    Ok(())
}

/// Parse one client frame and act on it. Unparsable frames get an `error` reply.
pub(crate) async fn handle_text_message(
    text: &str,
    conn: ConnId,
    tx: &mpsc::UnboundedSender<OutboundMessage>,
    handle: &RoomManagerHandle,
) {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => dispatch(event, conn, tx, handle).await,
        Err(e) => {
            warn!("Invalid frame from {}: {}", conn, e);
            let err = ServerEvent::Error {
                message: format!("Invalid message: {}", e),
            };
            let _ = tx.send(encode(&err));
        }
    }
}

pub(crate) async fn dispatch(
    event: ClientEvent,
    conn: ConnId,
    tx: &mpsc::UnboundedSender<OutboundMessage>,
    handle: &RoomManagerHandle,
) {
    match event {
        ClientEvent::Join { room } => {
            info!("{} joining room {}", conn, room);
            if let Err(e) = handle.join(conn, room, tx.clone()).await {
                warn!("Join failed for {}: {}", conn, e);
            }
        }
        ClientEvent::Leave { room } => handle.leave(conn, room).await,
        relayed => {
            let room = relayed.room().clone();
            if let Some(event) = relayed.into_relayed() {
                handle.relay(conn, room, event).await;
            }
        }
    }
}
