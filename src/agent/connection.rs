//! Owns the one socket to the automation server.
//!
//! `Disconnected → Connecting → Connected → Disconnected → …` forever, with a
//! constant reconnect delay. While connected the manager registers once,
//! emits keep-alives on a fixed interval and hands incoming commands to the
//! [`Dispatcher`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::agent::config::Config;
use crate::commands::Dispatcher;
use crate::transport::{
    send_json, ActionResult, ClientRole, Command, Connection, Connector, KeepAlive, Registration,
    TransportEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub url: String,
    pub reconnect_delay: Duration,
    pub keepalive_interval: Duration,
    /// Upper bound on one connect attempt, handshake included.
    pub connect_timeout: Duration,
}

impl From<&Config> for ConnectionSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            url: cfg.server_url.clone(),
            reconnect_delay: cfg.reconnect_delay(),
            keepalive_interval: cfg.keepalive_interval(),
            connect_timeout: cfg.connect_timeout(),
        }
    }
}

/// A finished action, tagged with the connection it arrived on.
struct Completed {
    generation: u64,
    result: ActionResult,
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    dispatcher: Dispatcher,
    settings: ConnectionSettings,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, dispatcher: Dispatcher, settings: ConnectionSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            dispatcher,
            settings,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "connection state changed");
        }
    }

    /// Runs until the task is dropped. There is no retry limit.
    pub async fn run(&self) {
        let (completed_tx, mut completed_rx) = mpsc::unbounded_channel();
        let mut generation = 0u64;

        loop {
            self.set_state(ConnectionState::Connecting);
            info!(url = %self.settings.url, "connecting to automation server");

            let attempt = timeout(
                self.settings.connect_timeout,
                self.connector.connect(&self.settings.url),
            );
            match attempt.await {
                Ok(Ok(conn)) => {
                    generation += 1;
                    info!(generation, "connected");
                    self.serve(conn, generation, &completed_tx, &mut completed_rx)
                        .await;
                }
                Ok(Err(e)) => warn!(error = %format!("{e:#}"), "connection attempt failed"),
                Err(_) => warn!(
                    timeout_secs = self.settings.connect_timeout.as_secs(),
                    "connection attempt timed out"
                ),
            }

            self.set_state(ConnectionState::Disconnected);
            info!(
                delay_secs = self.settings.reconnect_delay.as_secs(),
                "disconnected, retrying"
            );
            sleep(self.settings.reconnect_delay).await;
        }
    }

    async fn serve(
        &self,
        mut conn: Box<dyn Connection>,
        generation: u64,
        completed_tx: &mpsc::UnboundedSender<Completed>,
        completed_rx: &mut mpsc::UnboundedReceiver<Completed>,
    ) {
        if let Err(e) = send_json(conn.as_mut(), &Registration::new(ClientRole::Browser)).await {
            warn!(error = %format!("{e:#}"), "registration failed");
            conn.close().await;
            return;
        }
        self.set_state(ConnectionState::Connected);

        let period = self.settings.keepalive_interval;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = conn.next_event() => match event {
                    TransportEvent::Message(text) => self.on_message(&text, generation, completed_tx),
                    TransportEvent::Closed => {
                        info!(generation, "connection closed");
                        break;
                    }
                    TransportEvent::Error(e) => {
                        warn!(generation, error = %e, "connection error");
                        break;
                    }
                },
                _ = keepalive.tick() => {
                    if conn.is_open() {
                        if let Err(e) = send_json(conn.as_mut(), &KeepAlive::default()).await {
                            warn!(error = %format!("{e:#}"), "keep-alive send failed");
                            break;
                        }
                        trace!("keep-alive sent");
                    }
                }
                Some(done) = completed_rx.recv() => {
                    if done.generation != generation || !conn.is_open() {
                        debug!(command_id = %done.result.id, "connection gone, dropping result");
                        continue;
                    }
                    if let Err(e) = send_json(conn.as_mut(), &done.result).await {
                        warn!(command_id = %done.result.id, error = %format!("{e:#}"), "result send failed");
                        break;
                    }
                }
            }
        }

        conn.close().await;
    }

    /// Decode a frame and run its action on a separate task so other events
    /// keep flowing while the browser works.
    fn on_message(&self, text: &str, generation: u64, completed_tx: &mpsc::UnboundedSender<Completed>) {
        let command = match Command::decode(text) {
            Ok(command) => command,
            Err(e) => {
                error!(error = %e, frame = %text, "dropping undecodable message");
                return;
            }
        };
        debug!(command_id = %command.id, action = %command.action, "command received");

        let dispatcher = self.dispatcher.clone();
        let tx = completed_tx.clone();
        tokio::spawn(async move {
            let result = dispatcher.handle(&command).await;
            let _ = tx.send(Completed { generation, result });
        });
    }
}
