use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use huddle_relay::{serve, BroadcastScope, RelayConfig, RelayState};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay(scope: BroadcastScope) -> (SocketAddr, RelayState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
    let addr = listener.local_addr().expect("local addr");
    let state = RelayState::new(&RelayConfig {
        scope,
        ..RelayConfig::default()
    });
    let server_state = state.clone();
    tokio::spawn(async move {
        serve(listener, server_state, std::future::pending())
            .await
            .expect("relay serve");
    });
    (addr, state)
}

async fn connect(addr: SocketAddr, state: &RelayState, expected_open: usize) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/"))
        .await
        .expect("connect to relay");
    wait_for_channels(state, expected_open).await;
    client
}

async fn wait_for_channels(state: &RelayState, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while state.registry().len() != expected {
        if Instant::now() >= deadline {
            panic!(
                "expected {expected} open channels, relay has {}",
                state.registry().len()
            );
        }
        sleep(Duration::from_millis(10)).await;
    }
}

async fn next_text(client: &mut Client) -> String {
    loop {
        let frame = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for relay message")
            .expect("relay closed the channel")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return text;
        }
    }
}

async fn assert_silent(client: &mut Client) {
    if let Ok(Some(Ok(Message::Text(text)))) =
        timeout(Duration::from_millis(200), client.next()).await
    {
        panic!("unexpected delivery: {text}");
    }
}

const ANNOUNCE_A: &str = r#"{"from":"a","dest":"all","displayName":"Ana"}"#;

#[test_timeout::tokio_timeout_test(20)]
async fn broadcast_reaches_every_other_channel() {
    let (addr, state) = start_relay(BroadcastScope::ExcludeSender).await;
    let mut a = connect(addr, &state, 1).await;
    let mut b = connect(addr, &state, 2).await;
    let mut c = connect(addr, &state, 3).await;

    a.send(Message::Text(ANNOUNCE_A.into())).await.unwrap();

    assert_eq!(next_text(&mut b).await, ANNOUNCE_A);
    assert_eq!(next_text(&mut c).await, ANNOUNCE_A);
    assert_silent(&mut a).await;
}

#[test_timeout::tokio_timeout_test(20)]
async fn include_scope_echoes_back_to_sender() {
    let (addr, state) = start_relay(BroadcastScope::IncludeSender).await;
    let mut a = connect(addr, &state, 1).await;
    let mut b = connect(addr, &state, 2).await;

    a.send(Message::Text(ANNOUNCE_A.into())).await.unwrap();

    assert_eq!(next_text(&mut a).await, ANNOUNCE_A);
    assert_eq!(next_text(&mut b).await, ANNOUNCE_A);
}

#[test_timeout::tokio_timeout_test(20)]
async fn malformed_message_is_dropped_and_channel_survives() {
    let (addr, state) = start_relay(BroadcastScope::ExcludeSender).await;
    let mut a = connect(addr, &state, 1).await;
    let mut b = connect(addr, &state, 2).await;

    a.send(Message::Text("{not json".into())).await.unwrap();
    a.send(Message::Text(r#"{"from":"a","dest":"all","ice":{"candidate":"c"}}"#.into()))
        .await
        .unwrap();
    assert_silent(&mut b).await;

    a.send(Message::Text(ANNOUNCE_A.into())).await.unwrap();
    assert_eq!(next_text(&mut b).await, ANNOUNCE_A);
    assert_eq!(state.registry().len(), 2);
}

#[test_timeout::tokio_timeout_test(20)]
async fn binary_json_frames_are_relayed_as_text() {
    let (addr, state) = start_relay(BroadcastScope::ExcludeSender).await;
    let mut a = connect(addr, &state, 1).await;
    let mut b = connect(addr, &state, 2).await;

    a.send(Message::Binary(ANNOUNCE_A.as_bytes().to_vec()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut b).await, ANNOUNCE_A);
}

#[test_timeout::tokio_timeout_test(20)]
async fn closed_channel_leaves_the_registry_and_others_keep_flowing() {
    let (addr, state) = start_relay(BroadcastScope::ExcludeSender).await;
    let mut a = connect(addr, &state, 1).await;
    let b = connect(addr, &state, 2).await;
    let mut c = connect(addr, &state, 3).await;

    drop(b);
    wait_for_channels(&state, 2).await;

    a.send(Message::Text(ANNOUNCE_A.into())).await.unwrap();
    assert_eq!(next_text(&mut c).await, ANNOUNCE_A);

    a.close(None).await.unwrap();
    wait_for_channels(&state, 1).await;
}

#[test_timeout::tokio_timeout_test(20)]
async fn health_reports_open_channels() {
    let (addr, state) = start_relay(BroadcastScope::ExcludeSender).await;
    let _a = connect(addr, &state, 1).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: relay\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains(r#""channels":1"#), "{response}");
}
