//! One-shot controller: register as an agent, send a command, wait for its
//! Result.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

use crate::transport::{
    send_json, ActionResult, ClientRole, Command, Connection, Connector, Registration,
    TransportEvent, WsConnector,
};

pub async fn send_command(url: &str, command: &Command, timeout: Duration) -> Result<ActionResult> {
    send_command_with(&WsConnector, url, command, timeout).await
}

pub async fn send_command_with(
    connector: &dyn Connector,
    url: &str,
    command: &Command,
    timeout: Duration,
) -> Result<ActionResult> {
    let mut conn = connector.connect(url).await?;
    send_json(conn.as_mut(), &Registration::new(ClientRole::Agent))
        .await
        .context("registering as agent")?;
    send_json(conn.as_mut(), command)
        .await
        .context("sending command")?;
    debug!(command_id = %command.id, action = %command.action, "command sent");

    let outcome = tokio::time::timeout(timeout, wait_for_result(conn.as_mut(), &command.id))
        .await
        .map_err(|_| anyhow!("no result for command {} within {}s", command.id, timeout.as_secs()));
    conn.close().await;
    outcome?
}

async fn wait_for_result(conn: &mut dyn Connection, id: &Value) -> Result<ActionResult> {
    loop {
        match conn.next_event().await {
            TransportEvent::Message(text) => {
                let value: Value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(error = %e, "ignoring undecodable frame");
                        continue;
                    }
                };
                match value.get("id") {
                    Some(got) if got == id => {
                        return serde_json::from_value(value).context("decoding result");
                    }
                    Some(_) => debug!("ignoring result for another command"),
                    None => {
                        if let Some(err) = value.get("error").and_then(Value::as_str) {
                            bail!("relay error: {err}");
                        }
                    }
                }
            }
            TransportEvent::Closed => bail!("connection closed before a result arrived"),
            TransportEvent::Error(e) => bail!("connection error: {e}"),
        }
    }
}
