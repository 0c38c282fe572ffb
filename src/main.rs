use std::time::Duration;

use anyhow::{Context, Result};
use browser_bridge::agent;
use browser_bridge::comms::{controller, relay};
use browser_bridge::transport::Command;
use browser_bridge::utils;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "browser-bridge", version, about = "Remote-control bridge for a web browser")]
struct AppCli {
    /// Config file path (defaults apply when it does not exist)
    #[arg(short, long, default_value = "bridge.json", global = true)]
    config: String,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the automation server that bridges and controllers connect to
    Relay {
        #[arg(long, default_value_t = 9223)]
        port: u16,
    },
    /// Send one command through the automation server and print the result
    Send {
        /// Action name, e.g. click, type, navigate, get_dom, ping
        action: String,
        /// Action parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
        /// Correlation id (random when omitted)
        #[arg(long)]
        id: Option<String>,
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

// Single-threaded: socket events, timers and actions share one queue.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = AppCli::parse();
    utils::logging::init(&args.log_level);

    match args.command {
        Some(Commands::Relay { port }) => {
            info!("Starting relay on port {port}");
            relay::serve(port).await?;
        }
        Some(Commands::Send {
            action,
            params,
            id,
            timeout_secs,
        }) => {
            let cfg = agent::Config::load(&args.config)?;
            let params = serde_json::from_str(&params).context("parsing --params as JSON")?;
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let command = Command::new(id, action, params);
            let result = controller::send_command(
                &cfg.server_url,
                &command,
                Duration::from_secs(timeout_secs),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        None => {
            // Default: run the bridge
            agent::daemon::run(args.config).await?;
        }
    }

    Ok(())
}
