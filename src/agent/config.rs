use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const SERVER_URL_ENV: &str = "BRIDGE_SERVER_URL";
const CDP_ENDPOINT_ENV: &str = "BRIDGE_CDP_ENDPOINT";

fn default_server_url() -> String {
    "ws://127.0.0.1:9223".to_string()
}
fn default_reconnect_delay() -> u64 {
    5
}
fn default_keepalive_interval() -> u64 {
    20
}
fn default_cdp_endpoint() -> String {
    "http://127.0.0.1:9222".to_string()
}
fn default_cdp_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Automation server the bridge registers with.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,
    /// Limit on a single connect attempt, WebSocket handshake included.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// HTTP root of the browser's remote debugging endpoint.
    #[serde(default = "default_cdp_endpoint")]
    pub cdp_endpoint: String,
    #[serde(default = "default_cdp_timeout")]
    pub cdp_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            reconnect_delay_secs: default_reconnect_delay(),
            keepalive_interval_secs: default_keepalive_interval(),
            connect_timeout_secs: default_connect_timeout(),
            cdp_endpoint: default_cdp_endpoint(),
            cdp_timeout_secs: default_cdp_timeout(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        let cfg: Config = serde_json::from_str(&raw).context("parsing JSON")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read `path` if it exists, fall back to defaults otherwise, then apply
    /// environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let mut cfg = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            self.server_url = url;
        }
        if let Ok(endpoint) = std::env::var(CDP_ENDPOINT_ENV) {
            self.cdp_endpoint = endpoint;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.reconnect_delay_secs == 0 {
            bail!("reconnect_delay_secs must be greater than zero");
        }
        if self.keepalive_interval_secs == 0 {
            bail!("keepalive_interval_secs must be greater than zero");
        }
        if self.connect_timeout_secs == 0 {
            bail!("connect_timeout_secs must be greater than zero");
        }
        if self.cdp_timeout_secs == 0 {
            bail!("cdp_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn cdp_timeout(&self) -> Duration {
        Duration::from_secs(self.cdp_timeout_secs)
    }
}
