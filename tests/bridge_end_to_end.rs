use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use browser_bridge::agent::{ConnectionManager, ConnectionSettings, ConnectionState};
use browser_bridge::commands::Dispatcher;
use browser_bridge::comms::controller;
use browser_bridge::comms::relay::{self, RelayState};
use browser_bridge::host::{BrowserHost, HostError, PageFunction, ScriptWorld, Tab};
use browser_bridge::transport::{Command, WsConnector};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// A page with a focused search box and nothing at (10, 20).
struct SearchPage;

#[async_trait]
impl BrowserHost for SearchPage {
    async fn active_tab(&self) -> Result<Option<Tab>, HostError> {
        Ok(Some(Tab::new("tab-1")))
    }

    async fn run_in_page(
        &self,
        _tab: &Tab,
        world: ScriptWorld,
        function: &PageFunction,
    ) -> Result<Value, HostError> {
        if function.source.contains("elementFromPoint") {
            return Ok(json!({"success": false, "error": "No element"}));
        }
        if function.args == [json!("hello")] {
            assert_eq!(world, ScriptWorld::Main);
            return Ok(json!({"success": true, "tag": "INPUT", "elementId": "q", "className": ""}));
        }
        Ok(json!({"title": "Search", "url": "https://search.test/"}))
    }

    async fn navigate(&self, _tab: &Tab, _url: &str) -> Result<(), HostError> {
        Ok(())
    }
}

async fn start_relay() -> (String, Arc<RelayState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());
    let state = Arc::new(RelayState::new());
    tokio::spawn(relay::serve_on(listener, state.clone()));
    (url, state)
}

fn start_bridge(url: &str) -> tokio::sync::watch::Receiver<ConnectionState> {
    let manager = ConnectionManager::new(
        Arc::new(WsConnector),
        Dispatcher::new(Arc::new(SearchPage)),
        ConnectionSettings {
            url: url.to_string(),
            reconnect_delay: Duration::from_millis(100),
            keepalive_interval: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(2),
        },
    );
    let state = manager.subscribe();
    tokio::spawn(async move { manager.run().await });
    state
}

async fn wait_for_browser(state: &RelayState) {
    for _ in 0..100 {
        if state.browser_connected().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("bridge never registered with the relay");
}

async fn send(url: &str, command: Value) -> Value {
    let command: Command = serde_json::from_value(command).unwrap();
    let result = controller::send_command(url, &command, Duration::from_secs(5))
        .await
        .expect("result");
    serde_json::to_value(result).unwrap()
}

#[tokio::test]
async fn click_on_empty_point_fails_with_correlated_id() {
    let (url, relay_state) = start_relay().await;
    let _bridge = start_bridge(&url);
    wait_for_browser(&relay_state).await;

    let result = send(
        &url,
        json!({"id": "1", "action": "click", "params": {"x": 10, "y": 20}}),
    )
    .await;
    assert_eq!(result, json!({"id": "1", "success": false, "error": "No element"}));
}

#[tokio::test]
async fn type_into_focused_input() {
    let (url, relay_state) = start_relay().await;
    let _bridge = start_bridge(&url);
    wait_for_browser(&relay_state).await;

    let result = send(
        &url,
        json!({"id": "2", "action": "type", "params": {"text": "hello"}}),
    )
    .await;
    assert_eq!(result["id"], "2");
    assert_eq!(result["success"], true);
    assert_eq!(result["tag"], "INPUT");
}

#[tokio::test]
async fn ping_result_is_not_mistaken_for_keepalive() {
    let (url, relay_state) = start_relay().await;
    let bridge = start_bridge(&url);
    wait_for_browser(&relay_state).await;
    assert_eq!(*bridge.borrow(), ConnectionState::Connected);

    let result = send(&url, json!({"id": 77, "action": "ping"})).await;
    assert_eq!(result, json!({"id": 77, "success": true, "pong": true}));

    let dom = send(&url, json!({"id": "d", "action": "get_dom"})).await;
    assert_eq!(dom["dom"]["title"], "Search");
}

#[tokio::test]
async fn controller_reports_missing_browser() {
    let (url, _relay_state) = start_relay().await;

    let command = Command::new("x", "ping", json!({}));
    let err = controller::send_command(&url, &command, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Browser not connected"), "{err:#}");
}

#[tokio::test]
async fn bridge_connects_once_relay_appears() {
    // Reserve a port, release it, and start the bridge before anything listens.
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = reserved.local_addr().unwrap();
    drop(reserved);
    let url = format!("ws://{addr}/");

    let _bridge = start_bridge(&url);
    tokio::time::sleep(Duration::from_millis(250)).await;

    let listener = TcpListener::bind(addr).await.unwrap();
    let state = Arc::new(RelayState::new());
    tokio::spawn(relay::serve_on(listener, state.clone()));
    wait_for_browser(&state).await;

    let result = send(&url, json!({"id": "late", "action": "ping"})).await;
    assert_eq!(result["success"], true);
}
