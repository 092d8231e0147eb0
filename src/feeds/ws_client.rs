//! WebSocket connection for one venue stream

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

use crate::core::{Error, MessageHandler, Result, Transport};

const KEEPALIVE: &str = "keepalive";

/// Outbound side of a [`WsClient`]: frames are queued and written by the
/// connection task, so `send` never blocks on the network.
#[derive(Debug, Clone)]
pub struct WsTransport {
    tx: flume::Sender<String>,
}

impl Transport for WsTransport {
    fn send(&self, frame: String) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| Error::Communication("WebSocket connection is gone".to_string()))
    }
}

/// WebSocket client feeding text frames to a [`MessageHandler`]
pub struct WsClient {
    name: String,
    ws_url: String,
    outbound: flume::Receiver<String>,
}

impl WsClient {
    pub fn new(name: impl Into<String>, ws_url: impl Into<String>) -> (Self, WsTransport) {
        let (tx, outbound) = flume::unbounded();
        let client = Self {
            name: name.into(),
            ws_url: ws_url.into(),
            outbound,
        };
        (client, WsTransport { tx })
    }

    /// Connect and run the message loop until the server closes the
    /// connection or every transport handle is dropped.
    pub async fn run(&self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        info!(stream = %self.name, url = %self.ws_url, "Connecting to WebSocket");

        let (ws_stream, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        info!(stream = %self.name, "Connected to WebSocket");

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.on_text(handler.as_ref(), &text),
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await
                                .map_err(|e| Error::WebSocket(e.to_string()))?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(stream = %self.name, ?frame, "WebSocket closed");
                            break;
                        }
                        Some(Err(e)) => {
                            error!(stream = %self.name, "WebSocket error: {}", e);
                            return Err(Error::WebSocket(e.to_string()));
                        }
                        None => break,
                        _ => {}
                    }
                }
                frame = self.outbound.recv_async() => {
                    match frame {
                        Ok(frame) => {
                            write.send(Message::Text(frame)).await
                                .map_err(|e| Error::WebSocket(e.to_string()))?;
                        }
                        Err(_) => {
                            debug!(stream = %self.name, "All transports dropped, closing");
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn on_text(&self, handler: &dyn MessageHandler, text: &str) {
        if text == KEEPALIVE {
            trace!(stream = %self.name, "Keepalive");
            return;
        }
        // Per-message failures are isolated; the handler has already
        // reported them, the connection carries on.
        if let Err(e) = handler.process_data(text) {
            warn!(stream = %self.name, "Failed to handle message: {}", e);
        }
    }
}
