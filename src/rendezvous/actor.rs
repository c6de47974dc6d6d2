use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::messages::ServerEvent;
use super::types::{
    ConnId, Member, OutboundMessage, ROOM_CAPACITY, RendezvousError, Room, RoomName, RoomState,
};

/// Commands sent to the room manager actor
pub(crate) enum RoomCommand {
    Join {
        conn: ConnId,
        room: RoomName,
        tx: mpsc::UnboundedSender<OutboundMessage>,
        reply: oneshot::Sender<ServerEvent>,
    },
    Relay {
        from: ConnId,
        room: RoomName,
        event: ServerEvent,
    },
    Leave {
        conn: ConnId,
        room: RoomName,
    },
    Disconnect {
        conn: ConnId,
    },
    Broadcast {
        room: RoomName,
        event: ServerEvent,
    },
    State {
        room: RoomName,
        reply: oneshot::Sender<RoomState>,
    },
}

pub(crate) fn encode(event: &ServerEvent) -> OutboundMessage {
    let json = serde_json::to_string(event).expect("ServerEvent serialization should never fail");
    OutboundMessage::from(json)
}

#[derive(Default)]
struct Registry {
    rooms: HashMap<RoomName, Room>,
    memberships: HashMap<ConnId, HashSet<RoomName>>,
}

impl Registry {
    fn join(
        &mut self,
        conn: ConnId,
        room: RoomName,
        tx: mpsc::UnboundedSender<OutboundMessage>,
    ) -> ServerEvent {
        let entry = self.rooms.entry(room.clone()).or_default();

        let rejoin = entry.members.contains_key(&conn);
        let response = if rejoin && entry.state() == RoomState::WaitingForPeer {
            // a lone member re-joining keeps its seat
            ServerEvent::Joined { room: room.clone() }
        } else {
            match entry.state() {
                RoomState::Empty => {
                    entry.members.insert(conn, Member { tx: tx.clone() });
                    info!("Room created: {} by {}", room, conn);
                    ServerEvent::Created { room: room.clone() }
                }
                RoomState::WaitingForPeer => {
                    entry.members.insert(conn, Member { tx: tx.clone() });
                    info!("{} joined room {}", conn, room);
                    ServerEvent::Joined { room: room.clone() }
                }
                RoomState::Full => {
                    let err = RendezvousError::RoomFull(room.clone());
                    warn!("Join rejected for {}: {}", conn, err);
                    ServerEvent::Full { room: room.clone() }
                }
            }
        };

        if !matches!(response, ServerEvent::Full { .. }) {
            self.memberships.entry(conn).or_default().insert(room);
        }
        debug_assert!(
            self.rooms
                .values()
                .all(|r| r.members.len() <= ROOM_CAPACITY)
        );

        let _ = tx.send(encode(&response));
        response
    }

    fn relay(&self, from: ConnId, room: &RoomName, event: &ServerEvent) {
        let Some(entry) = self.rooms.get(room) else {
            debug!("Dropping {} from {}: room {} does not exist", event.name(), from, room);
            return;
        };

        let msg = encode(event);
        let mut delivered = 0;
        for (id, member) in &entry.members {
            if *id != from && member.tx.send(msg.clone()).is_ok() {
                delivered += 1;
            }
        }
        if delivered == 0 {
            debug!("Dropping {} from {}: no other member in {}", event.name(), from, room);
        } else {
            debug!("Relayed {} from {} in room {}", event.name(), from, room);
        }
    }

    fn broadcast(&self, room: &RoomName, event: &ServerEvent) {
        if let Some(entry) = self.rooms.get(room) {
            let msg = encode(event);
            for member in entry.members.values() {
                let _ = member.tx.send(msg.clone());
            }
        }
    }

    fn leave(&mut self, conn: ConnId, room: &RoomName) {
        let Some(entry) = self.rooms.get_mut(room) else {
            return;
        };
        if entry.members.remove(&conn).is_none() {
            return;
        }
        if let Some(rooms) = self.memberships.get_mut(&conn) {
            rooms.remove(room);
            if rooms.is_empty() {
                self.memberships.remove(&conn);
            }
        }
        info!("{} left room {}", conn, room);

        if entry.members.is_empty() {
            self.rooms.remove(room);
            info!("Room {} removed (empty)", room);
        } else {
            self.broadcast(room, &ServerEvent::Leave);
        }
    }

    fn disconnect(&mut self, conn: ConnId) {
        let rooms = self.memberships.remove(&conn).unwrap_or_default();
        for room in rooms {
            // membership entry is already gone, leave() only touches the room
            self.leave(conn, &room);
        }
    }

    fn state(&self, room: &RoomName) -> RoomState {
        self.rooms
            .get(room)
            .map(Room::state)
            .unwrap_or(RoomState::Empty)
    }
}

pub(crate) async fn room_manager_actor(mut rx: mpsc::Receiver<RoomCommand>) {
    let mut registry = Registry::default();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RoomCommand::Join {
                conn,
                room,
                tx,
                reply,
            } => {
                let response = registry.join(conn, room, tx);
                let _ = reply.send(response);
            }

            RoomCommand::Relay { from, room, event } => registry.relay(from, &room, &event),

            RoomCommand::Leave { conn, room } => registry.leave(conn, &room),

            RoomCommand::Disconnect { conn } => registry.disconnect(conn),

            RoomCommand::Broadcast { room, event } => registry.broadcast(&room, &event),

            RoomCommand::State { room, reply } => {
                let _ = reply.send(registry.state(&room));
            }
        }
    }
}

/// Handle to communicate with the room manager actor
#[derive(Clone)]
pub struct RoomManagerHandle {
    pub(crate) tx: mpsc::Sender<RoomCommand>,
}

impl RoomManagerHandle {
    /// Spawn a room manager actor and return its handle
    pub fn spawn(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel::<RoomCommand>(buffer);
        tokio::spawn(room_manager_actor(rx));
        Self { tx }
    }

    /// Join a room; the response is also pushed to `tx`
    pub async fn join(
        &self,
        conn: ConnId,
        room: RoomName,
        tx: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Result<ServerEvent, RendezvousError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RoomCommand::Join {
                conn,
                room,
                tx,
                reply: reply_tx,
            })
            .await;
        reply_rx
            .await
            .map_err(|_| RendezvousError::Internal("actor channel closed".to_string()))
    }

    /// Forward an event to every other member of the room
    pub async fn relay(&self, from: ConnId, room: RoomName, event: ServerEvent) {
        let _ = self
            .tx
            .send(RoomCommand::Relay { from, room, event })
            .await;
    }

    /// Leave one room
    pub async fn leave(&self, conn: ConnId, room: RoomName) {
        let _ = self.tx.send(RoomCommand::Leave { conn, room }).await;
    }

    /// Drop a connection from every room it is in
    pub async fn disconnect(&self, conn: ConnId) {
        let _ = self.tx.send(RoomCommand::Disconnect { conn }).await;
    }

    /// Emit an event to every member of the room
    pub async fn broadcast(&self, room: RoomName, event: ServerEvent) {
        let _ = self.tx.send(RoomCommand::Broadcast { room, event }).await;
    }

    /// Current occupancy of a room
    pub async fn room_state(&self, room: RoomName) -> Result<RoomState, RendezvousError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RoomCommand::State {
                room,
                reply: reply_tx,
            })
            .await;
        reply_rx
            .await
            .map_err(|_| RendezvousError::Internal("actor channel closed".to_string()))
    }
}
