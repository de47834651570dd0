//! Relay socket abstraction.
//!
//! The routing transport talks to the relay through a text-frame duplex
//! produced by a [`Connector`]. The production connector opens a WebSocket;
//! tests plug in an in-memory relay.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::TransportError;

/// Frame queued for the socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// A text frame.
    Text(String),
    /// Start a graceful close.
    Close,
}

/// Event produced by the socket reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text frame arrived.
    Text(String),
    /// The socket closed.
    Closed,
    /// The socket failed.
    Error(String),
}

/// An open relay socket.
///
/// Dropping both halves releases the socket; a reader that sees its
/// receiver dropped stops, and the writer stops when `outbound` is dropped.
#[derive(Debug)]
pub struct SocketConnection {
    /// Writer half.
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    /// Reader half. `None` from `recv` means the socket is gone.
    pub inbound: mpsc::UnboundedReceiver<SocketEvent>,
}

impl SocketConnection {
    /// Create a connected pair: the socket handed to the transport, and the
    /// opposite ends for whoever implements the remote side.
    pub fn pair() -> (
        Self,
        mpsc::UnboundedReceiver<OutboundFrame>,
        mpsc::UnboundedSender<SocketEvent>,
    ) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        (Self { outbound, inbound }, outbound_rx, inbound_tx)
    }
}

/// Opens relay sockets.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a socket to `url`. Returns once the socket is open.
    async fn connect(&self, url: &str) -> Result<SocketConnection, TransportError>;
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for Arc<C> {
    async fn connect(&self, url: &str) -> Result<SocketConnection, TransportError> {
        (**self).connect(url).await
    }
}

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;

#[cfg(feature = "websocket")]
mod websocket {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;
    use tracing::{debug, warn};

    use super::*;

    /// Bound on sending the close frame to an unresponsive relay.
    const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

    /// Connector opening `ws://` / `wss://` relay sockets.
    #[derive(Debug, Clone, Default)]
    pub struct WebSocketConnector;

    impl WebSocketConnector {
        /// Create a new connector.
        pub fn new() -> Self {
            Self
        }
    }

    #[async_trait]
    impl Connector for WebSocketConnector {
        async fn connect(&self, url: &str) -> Result<SocketConnection, TransportError> {
            debug!(url, "opening relay websocket");
            let (stream, _) = connect_async(url)
                .await
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
            let (mut write, mut read) = stream.split();

            let (socket, mut outbound_rx, inbound_tx) = SocketConnection::pair();

            // Writer. A dropped socket still gets a close frame.
            tokio::spawn(async move {
                loop {
                    let result = match outbound_rx.recv().await {
                        Some(OutboundFrame::Text(text)) => write.send(Message::Text(text)).await,
                        Some(OutboundFrame::Close) | None => {
                            let _ = timeout(CLOSE_TIMEOUT, write.send(Message::Close(None))).await;
                            break;
                        }
                    };
                    if let Err(e) = result {
                        warn!("relay websocket write failed: {}", e);
                        break;
                    }
                }
                debug!("relay websocket writer stopped");
            });

            // Reader. Stops once the transport releases the socket, even if
            // the relay never sends another frame.
            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        next = read.next() => next,
                        _ = inbound_tx.closed() => break,
                    };
                    let event = match next {
                        Some(Ok(Message::Text(text))) => SocketEvent::Text(text),
                        Some(Ok(Message::Close(_))) | None => {
                            let _ = inbound_tx.send(SocketEvent::Closed);
                            break;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            let _ = inbound_tx.send(SocketEvent::Error(e.to_string()));
                            break;
                        }
                    };
                    if inbound_tx.send(event).is_err() {
                        break;
                    }
                }
                debug!("relay websocket reader stopped");
            });

            Ok(socket)
        }
    }
}
