use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::info;

use crate::agent::config::Config;
use crate::agent::connection::{ConnectionManager, ConnectionSettings};
use crate::commands::Dispatcher;
use crate::host::CdpHost;
use crate::transport::WsConnector;

pub async fn run(config_path: String) -> Result<()> {
    let cfg = Config::load(&config_path)?;
    info!(
        server = %cfg.server_url,
        cdp = %cfg.cdp_endpoint,
        "browser bridge starting"
    );

    let host = Arc::new(CdpHost::new(&cfg.cdp_endpoint, cfg.cdp_timeout()));
    let manager = ConnectionManager::new(
        Arc::new(WsConnector),
        Dispatcher::new(host),
        ConnectionSettings::from(&cfg),
    );

    // The manager never returns; Ctrl+C is the only way out.
    tokio::select! {
        _ = manager.run() => {}
        res = signal::ctrl_c() => {
            res?;
            info!("shutdown signal received, stopping bridge");
        }
    }

    Ok(())
}
