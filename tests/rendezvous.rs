use std::time::Duration;

use serde_json::json;
use tandem::config::RendezvousConfig;
use tandem::rendezvous::{ClientEvent, RendezvousClient, RendezvousServer, RoomName, RoomState, ServerEvent};
use tokio::net::TcpListener;

async fn start_server() -> (String, tandem::rendezvous::RoomManagerHandle) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = RendezvousServer::new(RendezvousConfig::default());
    let handle = server.handle();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    (format!("ws://{}", addr), handle)
}

async fn next(client: &mut RendezvousClient) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("timed out waiting for server event")
        .expect("rendezvous connection closed")
}

async fn nothing_pending(client: &mut RendezvousClient) {
    let got = tokio::time::timeout(Duration::from_millis(100), client.recv()).await;
    assert!(got.is_err(), "unexpected event: {:?}", got);
}

fn join(room: &str) -> ClientEvent {
    ClientEvent::Join { room: room.into() }
}

#[tokio::test]
async fn first_creates_second_joins_third_is_full() {
    let (url, handle) = start_server().await;
    let mut a = RendezvousClient::connect(&url).await.unwrap();
    let mut b = RendezvousClient::connect(&url).await.unwrap();
    let mut c = RendezvousClient::connect(&url).await.unwrap();

    a.send(join("r1")).unwrap();
    assert_eq!(next(&mut a).await, ServerEvent::Created { room: "r1".into() });

    b.send(join("r1")).unwrap();
    assert_eq!(next(&mut b).await, ServerEvent::Joined { room: "r1".into() });

    c.send(join("r1")).unwrap();
    assert_eq!(next(&mut c).await, ServerEvent::Full { room: "r1".into() });

    assert_eq!(
        handle.room_state(RoomName::from("r1")).await.unwrap(),
        RoomState::Full
    );
    // nobody else hears about the rejected join
    nothing_pending(&mut a).await;
    nothing_pending(&mut b).await;
}

#[tokio::test]
async fn signaling_is_relayed_to_the_other_member_only() {
    let (url, _handle) = start_server().await;
    let mut a = RendezvousClient::connect(&url).await.unwrap();
    let mut b = RendezvousClient::connect(&url).await.unwrap();

    a.send(join("r1")).unwrap();
    next(&mut a).await;
    b.send(join("r1")).unwrap();
    next(&mut b).await;

    b.send(ClientEvent::Ready { room: "r1".into() }).unwrap();
    assert_eq!(next(&mut a).await, ServerEvent::Ready);

    let sdp = json!({"type": "offer", "sdp": "v=0\r\n"});
    a.send(ClientEvent::Offer {
        sdp: sdp.clone(),
        room: "r1".into(),
    })
    .unwrap();
    assert_eq!(next(&mut b).await, ServerEvent::Offer { sdp });

    let candidate = json!({"candidate": "candidate:1 1 udp 1 192.0.2.1 9 typ host", "sdpMid": "0"});
    b.send(ClientEvent::IceCandidate {
        candidate: candidate.clone(),
        room: "r1".into(),
    })
    .unwrap();
    assert_eq!(next(&mut a).await, ServerEvent::IceCandidate { candidate });

    nothing_pending(&mut a).await;
    nothing_pending(&mut b).await;
}

#[tokio::test]
async fn leave_and_disconnect_notify_the_remaining_member() {
    let (url, handle) = start_server().await;
    let mut a = RendezvousClient::connect(&url).await.unwrap();
    let mut b = RendezvousClient::connect(&url).await.unwrap();

    a.send(join("r1")).unwrap();
    next(&mut a).await;
    b.send(join("r1")).unwrap();
    next(&mut b).await;

    b.send(ClientEvent::Leave { room: "r1".into() }).unwrap();
    assert_eq!(next(&mut a).await, ServerEvent::Leave);
    assert_eq!(
        handle.room_state(RoomName::from("r1")).await.unwrap(),
        RoomState::WaitingForPeer
    );

    // the slot is free again
    let mut c = RendezvousClient::connect(&url).await.unwrap();
    c.send(join("r1")).unwrap();
    assert_eq!(next(&mut c).await, ServerEvent::Joined { room: "r1".into() });

    drop(c);
    assert_eq!(next(&mut a).await, ServerEvent::Leave);

    a.send(ClientEvent::Leave { room: "r1".into() }).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        handle.room_state(RoomName::from("r1")).await.unwrap(),
        RoomState::Empty
    );
}

#[tokio::test]
async fn garbage_frames_get_an_error_reply() {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    let (url, _handle) = start_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws.send(Message::text("{not json")).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_owned(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {:?}", other),
            }
        }
    })
    .await
    .unwrap();

    let event: ServerEvent = serde_json::from_str(&reply).unwrap();
    assert!(matches!(event, ServerEvent::Error { .. }));
}

#[tokio::test]
async fn server_broadcast_reaches_every_member() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let server = std::sync::Arc::new(RendezvousServer::new(RendezvousConfig::default()));
    let serving = server.clone();
    tokio::spawn(async move {
        let _ = serving.serve(listener).await;
    });

    let mut a = RendezvousClient::connect(&url).await.unwrap();
    let mut b = RendezvousClient::connect(&url).await.unwrap();
    a.send(join("r1")).unwrap();
    next(&mut a).await;
    b.send(join("r1")).unwrap();
    next(&mut b).await;

    server.broadcast_event("r1", ServerEvent::Ready).await;
    assert_eq!(next(&mut a).await, ServerEvent::Ready);
    assert_eq!(next(&mut b).await, ServerEvent::Ready);
}

#[tokio::test]
async fn startup_failures_surface_as_transport_errors() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap();

    let server = RendezvousServer::new(RendezvousConfig {
        bind_addr: addr.to_string(),
        ..RendezvousConfig::default()
    });
    let err = server.run().await.unwrap_err();
    assert!(matches!(err, tandem::Error::Io(_)));
    assert_eq!(err.kind(), tandem::ErrorKind::Transport);

    drop(taken);
    let err = match RendezvousClient::connect(&format!("ws://{}", addr)).await {
        Ok(_) => panic!("connected to a closed port"),
        Err(e) => e,
    };
    assert!(matches!(err, tandem::Error::Rendezvous(_)));
    assert_eq!(err.kind(), tandem::ErrorKind::Transport);
}
