use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use super::{Connection, Connector, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens text-message WebSocket connections with `tokio_tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("connecting to {url}"))?;
        debug!(url = %url, status = %response.status(), "websocket handshake complete");
        Ok(Box::new(WsConnection::new(stream)))
    }
}

pub struct WsConnection {
    stream: WsStream,
    open: bool,
}

impl WsConnection {
    fn new(stream: WsStream) -> Self {
        Self { stream, open: true }
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, text: String) -> Result<()> {
        trace!(frame = %text, "ws send");
        if let Err(e) = self.stream.send(Message::Text(text.into())).await {
            self.open = false;
            return Err(e).context("websocket send");
        }
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        if !self.open {
            return TransportEvent::Closed;
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Message(text.as_str().to_owned()),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "close frame received");
                    self.open = false;
                    return TransportEvent::Closed;
                }
                // Pings are answered by tungstenite on the next read/write.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.open = false;
                    return TransportEvent::Error(e.to_string());
                }
                None => {
                    self.open = false;
                    return TransportEvent::Closed;
                }
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            let _ = self.stream.close(None).await;
        }
    }
}
