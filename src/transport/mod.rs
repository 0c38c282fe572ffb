pub mod websocket;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use websocket::WsConnector;

fn empty_params() -> Value {
    serde_json::json!({})
}

/// A request from the automation server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Opaque correlation token, echoed back unchanged.
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub action: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

impl Command {
    pub fn new(id: impl Into<Value>, action: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            params,
        }
    }

    /// Decode one text frame. Anything that is not a JSON object with
    /// correctly typed fields is rejected.
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// The single terminal reply to a [`Command`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub id: Value,
    #[serde(default)]
    pub success: bool,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn success(payload: Map<String, Value>) -> Self {
        Self {
            id: Value::Null,
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            id: Value::Null,
            success: false,
            payload: Map::new(),
            error: Some(error.into()),
        }
    }

    /// Success carrying a single named payload field.
    pub fn success_with(key: &str, value: Value) -> Self {
        let mut payload = Map::new();
        payload.insert(key.to_string(), value);
        Self::success(payload)
    }

    /// Interpret the object a page function returned. `success` and `error`
    /// are lifted out, any `id` is dropped, the rest becomes payload.
    pub fn from_page_value(value: Value) -> Self {
        let Value::Object(mut fields) = value else {
            return Self::failure("Unexpected page result");
        };
        fields.remove("id");
        let success = fields
            .remove("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let error = fields
            .remove("error")
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()));
        Self {
            id: Value::Null,
            success,
            payload: fields,
            error,
        }
    }

    /// Overwrite the correlation id.
    pub fn with_id(mut self, id: Value) -> Self {
        self.id = id;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    Browser,
    Agent,
}

/// First frame on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    #[serde(rename = "type")]
    pub role: ClientRole,
}

impl Registration {
    pub fn new(role: ClientRole) -> Self {
        Self { role }
    }
}

/// Traffic-only frame sent while connected and idle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAlive {
    pub pong: bool,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self { pong: true }
    }
}

impl KeepAlive {
    /// A keep-alive is `pong: true` with no correlation id; a ping Result
    /// also carries `pong` but always has an id.
    pub fn matches(value: &Value) -> bool {
        value.get("pong").and_then(Value::as_bool) == Some(true) && value.get("id").is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(String),
    Closed,
    Error(String),
}

/// One live socket. Owned exclusively by whoever opened it.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, text: String) -> Result<()>;

    /// Next inbound event. Must be cancel-safe; returns `Closed` forever once
    /// the peer has gone away.
    async fn next_event(&mut self) -> TransportEvent;

    fn is_open(&self) -> bool;

    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>>;
}

/// Serialize and send in one step.
pub async fn send_json<T: Serialize + Sync>(conn: &mut dyn Connection, message: &T) -> Result<()> {
    let text = serde_json::to_string(message)?;
    conn.send(text).await
}
