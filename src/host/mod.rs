//! Browser capabilities the dispatcher consumes.
//!
//! The bridge never touches the DOM itself. It asks the host for the active
//! tab, runs page functions inside that tab and tells it to navigate.

pub mod cdp;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use cdp::CdpHost;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("{0}")]
    Script(String),

    #[error("Browser not available: {0}")]
    Unavailable(String),

    #[error("Protocol error: {message} (code {code})")]
    Protocol { code: i64, message: String },

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for HostError {
    fn from(e: reqwest::Error) -> Self {
        HostError::Unavailable(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for HostError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        HostError::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for HostError {
    fn from(e: serde_json::Error) -> Self {
        HostError::InvalidResponse(e.to_string())
    }
}

/// The active tab of the focused window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
    pub id: String,
    /// Per-tab control endpoint, when the host exposes one.
    pub debugger_url: Option<String>,
}

impl Tab {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            debugger_url: None,
        }
    }
}

/// Which script context a page function runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptWorld {
    /// Separate global scope sharing the page's DOM.
    Isolated,
    /// The page's own top-level scripts.
    Main,
}

/// JavaScript function source plus the JSON arguments it is called with.
#[derive(Debug, Clone, PartialEq)]
pub struct PageFunction {
    pub source: String,
    pub args: Vec<Value>,
}

impl PageFunction {
    pub fn new(source: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            source: source.into(),
            args,
        }
    }

    /// Self-invoking expression, e.g. `(function (x) {..})(10)`.
    pub fn to_expression(&self) -> String {
        let args = self
            .args
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        format!("({})({})", self.source, args)
    }
}

#[async_trait]
pub trait BrowserHost: Send + Sync {
    async fn active_tab(&self) -> Result<Option<Tab>, HostError>;

    /// Run `function` in the tab and return its (awaited) return value.
    async fn run_in_page(
        &self,
        tab: &Tab,
        world: ScriptWorld,
        function: &PageFunction,
    ) -> Result<Value, HostError>;

    /// Start loading `url`; does not wait for the load to finish.
    async fn navigate(&self, tab: &Tab, url: &str) -> Result<(), HostError>;
}
