//! The channel underneath a connection.
//!
//! A [`Connector`] dials an endpoint and hands back a [`Link`]: an outbound
//! queue of text frames and an inbound stream of [`Inbound`] events. The
//! manager never touches sockets directly, which keeps it testable with an
//! in-memory connector.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

use crate::error::ConnectionError;

/// Something that arrived on (or happened to) an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(String),
    Error(String),
    Closed,
}

/// An open, handshaken channel.
///
/// Dropping `outbound` asks the transport to close the channel.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Factory for new links. `connect` resolves only once the handshake has
/// completed, i.e. the returned link is OPEN.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &str) -> Result<Link, ConnectionError>;
}

/// WebSocket transport (`ws://` and `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<Link, ConnectionError> {
        let (stream, _) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;

        let (mut write, mut read) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Inbound>();

        // Writer: outbound frames until the manager drops its sender, then a Close frame
        let writer_events = in_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = write.send(WsMessage::Text(frame)).await {
                    let _ = writer_events.send(Inbound::Error(e.to_string()));
                    return;
                }
            }
            let _ = write.send(WsMessage::Close(None)).await;
            let _ = write.close().await;
        });

        // Reader: text frames in arrival order, then exactly one terminal event
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if in_tx.send(Inbound::Frame(text)).is_err() {
                            return;
                        }
                    }
                    Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if in_tx.send(Inbound::Frame(text)).is_err() {
                                return;
                            }
                        }
                        Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {} // ping/pong handled by tungstenite
                    Err(e) => {
                        let _ = in_tx.send(Inbound::Error(e.to_string()));
                        return;
                    }
                }
            }
            let _ = in_tx.send(Inbound::Closed);
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
