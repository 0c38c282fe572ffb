//! Automation server that bridges and controllers both connect to.
//!
//! One registered browser, any number of agents. Agent frames go to the
//! browser; browser frames (except keep-alives) go to every agent.

use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::transport::{ClientRole, KeepAlive, Registration};

type Outbox = mpsc::UnboundedSender<String>;
type SharedState = Arc<RelayState>;

#[derive(Debug, Default)]
pub struct RelayState {
    browser: RwLock<Option<(u64, Outbox)>>,
    agents: RwLock<HashMap<u64, Outbox>>,
    next_client: AtomicU64,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn browser_connected(&self) -> bool {
        self.browser.read().await.is_some()
    }

    pub async fn agent_count(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Returns false when no browser is registered or it has gone away.
    async fn forward_to_browser(&self, text: String) -> bool {
        let mut guard = self.browser.write().await;
        let Some((_, outbox)) = guard.as_ref() else {
            return false;
        };
        if outbox.send(text).is_ok() {
            return true;
        }
        *guard = None;
        false
    }

    async fn broadcast_to_agents(&self, text: &str) {
        let mut agents = self.agents.write().await;
        agents.retain(|_, outbox| outbox.send(text.to_string()).is_ok());
    }

    async fn clear_browser(&self, client: u64) {
        let mut guard = self.browser.write().await;
        if matches!(guard.as_ref(), Some((id, _)) if *id == client) {
            *guard = None;
        }
    }
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "browser_connected": state.browser_connected().await,
        "agents": state.agent_count().await,
    }))
}

async fn ws_handler(State(state): State<SharedState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay_socket(state, socket))
}

async fn relay_socket(state: SharedState, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    let role = loop {
        match stream.next().await {
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Text(text))) => {
                break serde_json::from_str::<Registration>(text.as_str())
                    .ok()
                    .map(|r| r.role)
            }
            _ => break None,
        }
    };
    let Some(role) = role else {
        warn!("client did not register as browser or agent, closing");
        let _ = sink.send(Message::Close(None)).await;
        return;
    };

    let client = state.next_client.fetch_add(1, Ordering::SeqCst);
    let (outbox, mut inbox) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(text) = inbox.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    match role {
        ClientRole::Browser => {
            info!(client, "browser connected");
            *state.browser.write().await = Some((client, outbox));
            while let Some(Ok(msg)) = stream.next().await {
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let keepalive = serde_json::from_str::<Value>(text.as_str())
                    .map(|v| KeepAlive::matches(&v))
                    .unwrap_or(false);
                if keepalive {
                    debug!(client, "browser keep-alive");
                    continue;
                }
                state.broadcast_to_agents(text.as_str()).await;
            }
            state.clear_browser(client).await;
            warn!(client, "browser disconnected");
        }
        ClientRole::Agent => {
            info!(client, "agent connected");
            state.agents.write().await.insert(client, outbox.clone());
            while let Some(Ok(msg)) = stream.next().await {
                let text = match msg {
                    Message::Text(text) => text.as_str().to_owned(),
                    Message::Close(_) => break,
                    _ => continue,
                };
                if state.forward_to_browser(text).await {
                    debug!(client, "forwarded command to browser");
                } else {
                    warn!(client, "no browser connected to receive command");
                    let _ = outbox.send(json!({"error": "Browser not connected"}).to_string());
                }
            }
            state.agents.write().await.remove(&client);
            info!(client, "agent disconnected");
        }
    }

    writer.abort();
}

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve on an already-bound listener.
pub async fn serve_on(listener: TcpListener, state: SharedState) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("relay listening on {}", addr);
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

pub async fn serve(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, Arc::new(RelayState::new())).await
}
