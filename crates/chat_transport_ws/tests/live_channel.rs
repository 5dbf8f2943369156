use std::sync::Arc;

use chat_contract::{ChannelTransport, ChatEvent, EventHandler, EventKind, SENTINEL_ID};
use chat_transport_ws::{WsTransport, WsTransportConfig};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{accept_async, tungstenite::Message};

fn allow_local_integration() -> bool {
    std::env::var("CHAT_TRANSPORT_ALLOW_LOCAL_INTEGRATION")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

async fn wait_for(signal: &mut chat_contract::ConnectSignal, expected: bool) {
    timeout(Duration::from_secs(5), signal.wait_for(|live| *live == expected))
        .await
        .expect("liveness should change in time")
        .expect("liveness sender alive");
}

#[tokio::test]
async fn live_channel_exchanges_frames_with_server() {
    if !allow_local_integration() {
        return;
    }

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("local TCP listener should bind");
    let addr = listener.local_addr().expect("listener address");
    let (received_tx, mut received_rx) = mpsc::unbounded_channel::<String>();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.expect("accept");
        let mut socket = accept_async(socket).await.expect("websocket handshake");
        while let Some(Ok(frame)) = socket.next().await {
            let Message::Text(text) = frame else {
                continue;
            };
            let _ = received_tx.send(text.clone());
            if text.contains("send_message") {
                socket
                    .send(Message::Text(
                        r#"{"event":"messageBroadcast","data":{"id":"r-1","senderId":"agent","text":"pong","channelId":"00000000-0000-0000-0000-000000000000"}}"#
                            .to_string(),
                    ))
                    .await
                    .expect("send broadcast");
                socket
                    .send(Message::Text(r#"{"event":"messageComplete","data":{}}"#.to_string()))
                    .await
                    .expect("send complete");
                socket.close(None).await.expect("close");
                break;
            }
        }
    });

    let transport = WsTransport::new(format!("http://{addr}"), WsTransportConfig::default());
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ChatEvent>();
    for kind in EventKind::ALL {
        let events_tx = events_tx.clone();
        let handler: EventHandler = Arc::new(move |event: &ChatEvent| {
            let _ = events_tx.send(event.clone());
        });
        transport.subscribe(kind, handler);
    }

    let mut signal = transport.connect("user-1", SENTINEL_ID);
    wait_for(&mut signal, true).await;
    assert!(transport.is_connected());

    let reused = transport.connect("user-1", SENTINEL_ID);
    assert!(*reused.borrow());

    transport.join_room("session-1");
    transport.join_channel(SENTINEL_ID, SENTINEL_ID);
    transport
        .send(&chat_contract::OutboundMessage {
            message_id: "m-1".to_string(),
            sender_id: "user-1".to_string(),
            sender_name: "You".to_string(),
            text: "ping".to_string(),
            channel_id: SENTINEL_ID.to_string(),
            room_id: "session-1".to_string(),
            server_id: SENTINEL_ID.to_string(),
            source: chat_contract::CLIENT_SOURCE.to_string(),
            created_at: 1,
        })
        .expect("send while live");

    let first = received_rx.recv().await.expect("room frame");
    assert!(first.contains("room_joining"));
    assert!(first.contains("\"entityId\":\"user-1\""));
    let second = received_rx.recv().await.expect("channel frame");
    assert!(second.contains("channel_joining"));

    let broadcast = timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .expect("broadcast in time")
        .expect("broadcast");
    assert!(matches!(broadcast, ChatEvent::MessageBroadcast(ref message) if message.text == "pong"));
    let complete = timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .expect("complete in time")
        .expect("complete");
    assert_eq!(complete.kind(), EventKind::MessageComplete);

    wait_for(&mut signal, false).await;
    assert!(!transport.is_connected());
    server.await.expect("server task");
}

#[tokio::test]
async fn live_channel_reports_refused_connection_as_not_live() {
    if !allow_local_integration() {
        return;
    }

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("local TCP listener should bind");
    let addr = listener.local_addr().expect("listener address");
    drop(listener);

    let transport = WsTransport::new(
        format!("http://{addr}"),
        WsTransportConfig::default().with_connect_timeout(Duration::from_secs(10)),
    );
    let mut signal = transport.connect("user-1", SENTINEL_ID);
    timeout(Duration::from_secs(2), signal.changed())
        .await
        .expect("refusal should be reported before the connect timeout")
        .expect("liveness sender alive");
    assert!(!*signal.borrow());
    assert!(!transport.is_connected());
}
