//! In-process peer connections for tests and simulations
//!
//! Connections created by the same [`MemoryConnector`] find each other
//! through the endpoint id embedded in their SDP. The pair reports ICE
//! connectivity once both sides hold the other's description and at least
//! one remote candidate, then opens the data channel the offerer created.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::platform::{DataChannel, PeerConnection, PeerConnector, PlatformEvent, PlatformEvents};
use super::types::{
    ConnectionError, IceCandidate, IceConnectionState, SdpType, SessionDescription,
};

const ENDPOINT_ATTR: &str = "a=endpoint:";

#[derive(Clone, Default)]
pub struct MemoryConnector {
    fabric: Arc<Mutex<Fabric>>,
}

#[derive(Default)]
struct Fabric {
    next_id: u64,
    endpoints: HashMap<u64, Endpoint>,
}

struct Endpoint {
    events: PlatformEvents,
    remote: Option<u64>,
    remote_set: bool,
    candidates_added: usize,
    /// Label of a channel created on this side
    local_channel: Option<String>,
    has_channel: bool,
    channel_closed: bool,
    connected: bool,
    closed: bool,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections created so far.
    pub fn connections_created(&self) -> usize {
        lock(&self.fabric).endpoints.len()
    }

    /// Report ICE failure on every live connection.
    pub fn fail_ice(&self) {
        let fabric = lock(&self.fabric);
        for ep in fabric.endpoints.values().filter(|ep| !ep.closed) {
            let _ = ep
                .events
                .send(PlatformEvent::IceStateChanged(IceConnectionState::Failed));
        }
    }
}

#[async_trait]
impl PeerConnector for MemoryConnector {
    async fn create(
        &self,
        _ice_servers: &[String],
        events: PlatformEvents,
    ) -> Result<Arc<dyn PeerConnection>, ConnectionError> {
        let mut fabric = lock(&self.fabric);
        fabric.next_id += 1;
        let id = fabric.next_id;
        fabric.endpoints.insert(
            id,
            Endpoint {
                events,
                remote: None,
                remote_set: false,
                candidates_added: 0,
                local_channel: None,
                has_channel: false,
                channel_closed: false,
                connected: false,
                closed: false,
            },
        );

        Ok(Arc::new(MemoryConnection {
            id,
            fabric: self.fabric.clone(),
        }))
    }
}

fn lock(fabric: &Mutex<Fabric>) -> MutexGuard<'_, Fabric> {
    fabric.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn platform(msg: &str) -> ConnectionError {
    ConnectionError::Platform(msg.to_string())
}

fn describe(kind: SdpType, id: u64) -> SessionDescription {
    let sdp = format!("v=0\r\no=- {id} 0 IN IP4 127.0.0.1\r\ns=-\r\n{ENDPOINT_ATTR}{id}\r\n");
    SessionDescription { kind, sdp }
}

fn endpoint_of(desc: &SessionDescription) -> Option<u64> {
    desc.sdp
        .lines()
        .find_map(|line| line.strip_prefix(ENDPOINT_ATTR))
        .and_then(|id| id.trim().parse().ok())
}

pub struct MemoryConnection {
    id: u64,
    fabric: Arc<Mutex<Fabric>>,
}

impl MemoryConnection {
    fn with_endpoint<T>(
        &self,
        f: impl FnOnce(&mut Fabric, u64) -> Result<T, ConnectionError>,
    ) -> Result<T, ConnectionError> {
        let mut fabric = lock(&self.fabric);
        let open = fabric.endpoints.get(&self.id).is_some_and(|ep| !ep.closed);
        if !open {
            return Err(platform("connection is closed"));
        }
        f(&mut *fabric, self.id)
    }
}

impl Fabric {
    fn ep(&mut self, id: u64) -> Result<&mut Endpoint, ConnectionError> {
        self.endpoints
            .get_mut(&id)
            .ok_or_else(|| platform("unknown endpoint"))
    }

    fn ready_for(&self, id: u64, remote: u64) -> bool {
        self.endpoints.get(&id).is_some_and(|ep| {
            ep.remote == Some(remote)
                && ep.remote_set
                && ep.candidates_added > 0
                && !ep.connected
                && !ep.closed
        })
    }

    fn try_connect(&mut self, a: u64, handle: &Arc<Mutex<Fabric>>) {
        let Some(b) = self.endpoints.get(&a).and_then(|ep| ep.remote) else {
            return;
        };
        if !self.ready_for(a, b) || !self.ready_for(b, a) {
            return;
        }

        for id in [a, b] {
            if let Some(ep) = self.endpoints.get_mut(&id) {
                ep.connected = true;
                let _ = ep
                    .events
                    .send(PlatformEvent::IceStateChanged(IceConnectionState::Connected));
            }
        }

        for (side, other) in [(a, b), (b, a)] {
            let Some(label) = self.endpoints.get(&side).and_then(|ep| ep.local_channel.clone())
            else {
                continue;
            };
            if let Some(ep) = self.endpoints.get_mut(&other) {
                ep.has_channel = true;
                let channel: Arc<dyn DataChannel> = Arc::new(MemoryChannel {
                    label,
                    owner: other,
                    fabric: handle.clone(),
                });
                let _ = ep.events.send(PlatformEvent::DataChannel(channel));
                let _ = ep.events.send(PlatformEvent::ChannelOpen);
            }
            if let Some(ep) = self.endpoints.get(&side) {
                let _ = ep.events.send(PlatformEvent::ChannelOpen);
            }
        }
    }

    fn send_text(&self, owner: u64, text: String) -> Result<(), ConnectionError> {
        let ep = self
            .endpoints
            .get(&owner)
            .filter(|ep| ep.connected && !ep.closed && ep.has_channel && !ep.channel_closed)
            .ok_or(ConnectionError::ChannelNotOpen)?;
        let remote = ep
            .remote
            .and_then(|id| self.endpoints.get(&id))
            .filter(|ep| !ep.closed && !ep.channel_closed)
            .ok_or(ConnectionError::ChannelNotOpen)?;
        remote
            .events
            .send(PlatformEvent::Message(text))
            .map_err(|_| ConnectionError::ChannelNotOpen)
    }

    fn close_channel(&mut self, owner: u64) {
        let remote = match self.endpoints.get_mut(&owner) {
            Some(ep) if ep.has_channel && !ep.channel_closed => {
                ep.channel_closed = true;
                ep.remote
            }
            _ => return,
        };
        if let Some(ep) = remote.and_then(|id| self.endpoints.get_mut(&id)) {
            if ep.has_channel && !ep.channel_closed {
                ep.channel_closed = true;
                let _ = ep.events.send(PlatformEvent::ChannelClosed);
            }
        }
    }
}

#[async_trait]
impl PeerConnection for MemoryConnection {
    async fn create_offer(&self) -> Result<SessionDescription, ConnectionError> {
        self.with_endpoint(|_, id| Ok(describe(SdpType::Offer, id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, ConnectionError> {
        self.with_endpoint(|fabric, id| {
            if !fabric.ep(id)?.remote_set {
                return Err(ConnectionError::NoRemoteDescription);
            }
            Ok(describe(SdpType::Answer, id))
        })
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), ConnectionError> {
        self.with_endpoint(|fabric, id| {
            if endpoint_of(&desc) != Some(id) {
                return Err(platform("local description was not created here"));
            }
            let candidate = IceCandidate {
                candidate: format!(
                    "candidate:{id} 1 udp 2130706431 127.0.0.1 {} typ host",
                    40000 + id
                ),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            };
            let _ = fabric
                .ep(id)?
                .events
                .send(PlatformEvent::LocalCandidate(candidate));
            Ok(())
        })
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), ConnectionError> {
        self.with_endpoint(|fabric, id| {
            let remote = endpoint_of(&desc).ok_or_else(|| platform("unparsable SDP"))?;
            if remote == id || !fabric.endpoints.contains_key(&remote) {
                return Err(platform("SDP names an unknown endpoint"));
            }
            let ep = fabric.ep(id)?;
            ep.remote = Some(remote);
            ep.remote_set = true;
            Ok(())
        })
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), ConnectionError> {
        self.with_endpoint(|fabric, id| {
            let ep = fabric.ep(id)?;
            if !ep.remote_set {
                return Err(ConnectionError::NoRemoteDescription);
            }
            ep.candidates_added += 1;
            fabric.try_connect(id, &self.fabric);
            Ok(())
        })
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, ConnectionError> {
        self.with_endpoint(|fabric, id| {
            let ep = fabric.ep(id)?;
            ep.local_channel = Some(label.to_string());
            ep.has_channel = true;
            Ok(Arc::new(MemoryChannel {
                label: label.to_string(),
                owner: id,
                fabric: self.fabric.clone(),
            }) as Arc<dyn DataChannel>)
        })
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        let mut fabric = lock(&self.fabric);
        fabric.close_channel(self.id);
        if let Some(ep) = fabric.endpoints.get_mut(&self.id) {
            ep.closed = true;
            ep.connected = false;
        }
        Ok(())
    }
}

pub struct MemoryChannel {
    label: String,
    owner: u64,
    fabric: Arc<Mutex<Fabric>>,
}

#[async_trait]
impl DataChannel for MemoryChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        lock(&self.fabric).send_text(self.owner, text)
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        lock(&self.fabric).close_channel(self.owner);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    async fn endpoint(
        connector: &MemoryConnector,
    ) -> (Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PlatformEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (connector.create(&[], tx).await.unwrap(), rx)
    }

    fn first_candidate(rx: &mut mpsc::UnboundedReceiver<PlatformEvent>) -> IceCandidate {
        while let Ok(event) = rx.try_recv() {
            if let PlatformEvent::LocalCandidate(c) = event {
                return c;
            }
        }
        panic!("no local candidate gathered");
    }

    #[tokio::test]
    async fn answer_needs_a_remote_description() {
        let connector = MemoryConnector::new();
        let (conn, _rx) = endpoint(&connector).await;
        assert!(matches!(
            conn.create_answer().await,
            Err(ConnectionError::NoRemoteDescription)
        ));
        assert!(matches!(
            conn.add_ice_candidate(IceCandidate {
                candidate: "c".into(),
                sdp_mid: None,
                sdp_mline_index: None,
                username_fragment: None,
            })
            .await,
            Err(ConnectionError::NoRemoteDescription)
        ));
    }

    #[tokio::test]
    async fn pair_opens_offerer_channel_on_both_sides() {
        let connector = MemoryConnector::new();
        let (a, mut a_rx) = endpoint(&connector).await;
        let (b, mut b_rx) = endpoint(&connector).await;
        assert_eq!(connector.connections_created(), 2);

        let a_channel = a.create_data_channel("jsonChannel").await.unwrap();
        let offer = a.create_offer().await.unwrap();
        a.set_local_description(offer.clone()).await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        b.set_local_description(answer.clone()).await.unwrap();
        a.set_remote_description(answer).await.unwrap();

        let a_candidate = first_candidate(&mut a_rx);
        let b_candidate = first_candidate(&mut b_rx);
        b.add_ice_candidate(a_candidate).await.unwrap();
        a.add_ice_candidate(b_candidate).await.unwrap();

        let mut b_channel = None;
        let mut b_open = false;
        while let Ok(event) = b_rx.try_recv() {
            match event {
                PlatformEvent::DataChannel(ch) => b_channel = Some(ch),
                PlatformEvent::ChannelOpen => b_open = true,
                _ => {}
            }
        }
        let b_channel = b_channel.expect("answerer receives the channel");
        assert!(b_open);
        assert_eq!(b_channel.label(), "jsonChannel");

        a_channel.send_text("hello".into()).await.unwrap();
        assert!(matches!(b_rx.try_recv(), Ok(PlatformEvent::Message(t)) if t == "hello"));

        b_channel.send_text("back".into()).await.unwrap();
        let mut got = None;
        while let Ok(event) = a_rx.try_recv() {
            if let PlatformEvent::Message(t) = event {
                got = Some(t);
            }
        }
        assert_eq!(got.as_deref(), Some("back"));

        a_channel.close().await.unwrap();
        assert!(matches!(b_rx.try_recv(), Ok(PlatformEvent::ChannelClosed)));
        assert!(matches!(
            b_channel.send_text("late".into()).await,
            Err(ConnectionError::ChannelNotOpen)
        ));
    }

    #[tokio::test]
    async fn closed_connection_refuses_work() {
        let connector = MemoryConnector::new();
        let (a, _rx) = endpoint(&connector).await;
        a.close().await.unwrap();
        a.close().await.unwrap();
        assert!(a.create_offer().await.is_err());
    }
}
