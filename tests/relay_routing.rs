use std::sync::Arc;
use std::time::Duration;

use browser_bridge::comms::relay::{self, RelayState};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay() -> (String, Arc<RelayState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());
    let state = Arc::new(RelayState::new());
    tokio::spawn(relay::serve_on(listener, state.clone()));
    (url, state)
}

async fn connect(url: &str) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

async fn send(ws: &mut Client, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

async fn register(url: &str, role: &str) -> Client {
    let mut ws = connect(url).await;
    send(&mut ws, json!({"type": role})).await;
    ws
}

/// Next JSON text frame, or `None` once the relay closed the socket.
async fn next_json(ws: &mut Client) -> Option<Value> {
    loop {
        match timeout(Duration::from_secs(2), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => return None,
            Ok(Some(Ok(_))) => continue,
            Err(_) => panic!("no frame within 2s"),
        }
    }
}

async fn assert_silent(ws: &mut Client) {
    let got = timeout(Duration::from_millis(300), ws.next()).await;
    assert!(got.is_err(), "unexpected frame: {got:?}");
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("relay state never settled");
}

#[tokio::test]
async fn unknown_role_is_disconnected() {
    let (url, state) = start_relay().await;
    let mut ws = register(&url, "robot").await;
    assert_eq!(next_json(&mut ws).await, None);
    assert!(!state.browser_connected().await);
    assert_eq!(state.agent_count().await, 0);
}

#[tokio::test]
async fn non_json_first_frame_is_disconnected() {
    let (url, _state) = start_relay().await;
    let mut ws = connect(&url).await;
    ws.send(Message::Text("hello".into())).await.unwrap();
    assert_eq!(next_json(&mut ws).await, None);
}

#[tokio::test]
async fn control_frames_before_registration_are_skipped() {
    let (url, state) = start_relay().await;
    let mut ws = connect(&url).await;
    ws.send(Message::Ping(Vec::new().into())).await.unwrap();
    send(&mut ws, json!({"type": "browser"})).await;

    let relay = state.clone();
    wait_until(|| {
        let relay = relay.clone();
        async move { relay.browser_connected().await }
    })
    .await;
}

#[tokio::test]
async fn bare_keepalive_is_swallowed_but_pong_result_is_forwarded() {
    let (url, state) = start_relay().await;
    let mut browser = register(&url, "browser").await;
    let mut agent = register(&url, "agent").await;
    let relay = state.clone();
    wait_until(|| {
        let relay = relay.clone();
        async move { relay.browser_connected().await && relay.agent_count().await == 1 }
    })
    .await;

    send(&mut browser, json!({"pong": true})).await;
    send(&mut browser, json!({"id": "z", "success": true, "pong": true})).await;

    assert_eq!(
        next_json(&mut agent).await,
        Some(json!({"id": "z", "success": true, "pong": true}))
    );
    assert_silent(&mut agent).await;
}

#[tokio::test]
async fn newer_browser_replaces_older_one() {
    let (url, state) = start_relay().await;
    let mut old = register(&url, "browser").await;
    let relay = state.clone();
    wait_until(|| {
        let relay = relay.clone();
        async move { relay.browser_connected().await }
    })
    .await;

    let mut new = register(&url, "browser").await;
    let mut agent = register(&url, "agent").await;
    let relay = state.clone();
    wait_until(|| {
        let relay = relay.clone();
        async move { relay.agent_count().await == 1 }
    })
    .await;
    // Registration is processed per socket; give the second browser a moment.
    sleep(Duration::from_millis(100)).await;

    let command = json!({"id": 1, "action": "ping"});
    send(&mut agent, command.clone()).await;
    assert_eq!(next_json(&mut new).await, Some(command));
    assert_silent(&mut old).await;

    // The old browser leaving must not unregister the new one.
    old.close(None).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert!(state.browser_connected().await);

    let command = json!({"id": 2, "action": "ping"});
    send(&mut agent, command.clone()).await;
    assert_eq!(next_json(&mut new).await, Some(command));
}
