//! [`BrowserHost`] backed by the Chrome DevTools Protocol.
//!
//! Tabs are discovered over the debugger's HTTP endpoint (`/json/list`) and
//! each capability call opens a short-lived WebSocket to the tab's own
//! debugger URL.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use super::{BrowserHost, HostError, PageFunction, ScriptWorld, Tab};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ISOLATED_WORLD_NAME: &str = "browser-bridge";

#[derive(Debug, Serialize)]
struct CdpRequest<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct CdpResponse {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<CdpErrorBody>,
}

#[derive(Debug, Deserialize)]
struct CdpErrorBody {
    code: i64,
    message: String,
}

/// Open DevTools windows are listed as page targets too.
const DEVTOOLS_SCHEME: &str = "devtools://";

/// Entry of `/json/list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetEntry {
    id: String,
    #[serde(rename = "type")]
    target_type: String,
    #[serde(default)]
    url: String,
    web_socket_debugger_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CdpHost {
    endpoint: String,
    http: reqwest::Client,
    call_timeout: Duration,
}

impl CdpHost {
    /// `endpoint` is the debugger's HTTP root, e.g. `http://127.0.0.1:9222`.
    pub fn new(endpoint: &str, call_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            call_timeout,
        }
    }

    async fn list_targets(&self) -> Result<Vec<TargetEntry>, HostError> {
        let url = format!("{}/json/list", self.endpoint);
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(HostError::Unavailable(format!(
                "{} returned {}",
                url,
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }

    async fn open(&self, tab: &Tab) -> Result<PageSocket, HostError> {
        let url = tab.debugger_url.as_deref().ok_or_else(|| {
            HostError::Unavailable(format!("tab {} has no debugger url", tab.id))
        })?;
        PageSocket::connect(url, self.call_timeout).await
    }
}

#[async_trait]
impl BrowserHost for CdpHost {
    async fn active_tab(&self) -> Result<Option<Tab>, HostError> {
        // Chrome lists page targets most recently focused first.
        let tab = self
            .list_targets()
            .await?
            .into_iter()
            .find(|t| t.target_type == "page" && !t.url.starts_with(DEVTOOLS_SCHEME))
            .map(|t| {
                debug!(tab = %t.id, url = %t.url, "resolved active tab");
                Tab {
                    id: t.id,
                    debugger_url: t.web_socket_debugger_url,
                }
            });
        Ok(tab)
    }

    async fn run_in_page(
        &self,
        tab: &Tab,
        world: ScriptWorld,
        function: &PageFunction,
    ) -> Result<Value, HostError> {
        let mut socket = self.open(tab).await?;
        let mut params = json!({
            "expression": function.to_expression(),
            "returnByValue": true,
            "awaitPromise": true,
        });
        if world == ScriptWorld::Isolated {
            let context_id = socket.isolated_context().await?;
            params["contextId"] = json!(context_id);
        }
        let outcome = socket.call("Runtime.evaluate", params).await;
        socket.close().await;
        evaluation_value(outcome?)
    }

    async fn navigate(&self, tab: &Tab, url: &str) -> Result<(), HostError> {
        let mut socket = self.open(tab).await?;
        let outcome = socket.call("Page.navigate", json!({ "url": url })).await;
        socket.close().await;
        if let Some(err) = outcome?.get("errorText").and_then(Value::as_str) {
            warn!(tab = %tab.id, url = %url, error = %err, "navigation reported an error");
        }
        Ok(())
    }
}

/// Unwrap a `Runtime.evaluate` result, mapping thrown exceptions to
/// [`HostError::Script`] with the exception's message.
fn evaluation_value(result: Value) -> Result<Value, HostError> {
    if let Some(details) = result.get("exceptionDetails") {
        let message = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .and_then(Value::as_str)
            .and_then(|d| d.lines().next())
            .map(exception_message)
            .or_else(|| details.get("text").and_then(Value::as_str))
            .unwrap_or("Script error");
        return Err(HostError::Script(message.to_string()));
    }
    Ok(result
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

/// `"TypeError: x is null"` → `"x is null"`.
fn exception_message(line: &str) -> &str {
    match line.split_once(": ") {
        Some((name, rest)) if name.ends_with("Error") && !name.contains(' ') => rest,
        _ => line,
    }
}

struct PageSocket {
    stream: WsStream,
    next_id: u64,
    call_timeout: Duration,
}

impl PageSocket {
    async fn connect(url: &str, call_timeout: Duration) -> Result<Self, HostError> {
        let (stream, _) = tokio::time::timeout(call_timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| HostError::Timeout(format!("debugger connection to {url}")))??;
        Ok(Self {
            stream,
            next_id: 1,
            call_timeout,
        })
    }

    async fn call(&mut self, method: &str, params: Value) -> Result<Value, HostError> {
        let id = self.next_id;
        self.next_id += 1;

        let text = serde_json::to_string(&CdpRequest { id, method, params })?;
        trace!(frame = %text, "cdp send");
        self.stream.send(Message::Text(text.into())).await?;

        tokio::time::timeout(self.call_timeout, self.response_for(id))
            .await
            .map_err(|_| HostError::Timeout(method.to_string()))?
    }

    async fn response_for(&mut self, id: u64) -> Result<Value, HostError> {
        while let Some(msg) = self.stream.next().await {
            let text = match msg? {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let resp: CdpResponse = match serde_json::from_str(text.as_str()) {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(error = %e, "unparseable cdp frame");
                    continue;
                }
            };
            // Events and replies to other calls carry a different id.
            if resp.id != Some(id) {
                continue;
            }
            if let Some(err) = resp.error {
                return Err(HostError::Protocol {
                    code: err.code,
                    message: err.message,
                });
            }
            return Ok(resp.result.unwrap_or(Value::Null));
        }
        Err(HostError::Unavailable("debugger connection closed".into()))
    }

    async fn isolated_context(&mut self) -> Result<i64, HostError> {
        let tree = self.call("Page.getFrameTree", json!({})).await?;
        let frame_id = tree
            .pointer("/frameTree/frame/id")
            .and_then(Value::as_str)
            .ok_or_else(|| HostError::InvalidResponse("frame tree without a top frame".into()))?
            .to_string();
        let world = self
            .call(
                "Page.createIsolatedWorld",
                json!({ "frameId": frame_id, "worldName": ISOLATED_WORLD_NAME }),
            )
            .await?;
        world
            .get("executionContextId")
            .and_then(Value::as_i64)
            .ok_or_else(|| HostError::InvalidResponse("isolated world without a context id".into()))
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
