//! In-process connector.
//!
//! Every successful [`MemoryConnector::connect`] hands the far end of the
//! new connection to the caller as a [`MemoryPeer`], which plays the part
//! of the server: it can push frames, read what the client sent, drop the
//! connection or inject a read error. Refusing connections is a switch on
//! the connector.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use url::Url;

use crate::traits::{
    Connection, ConnectionSink, ConnectionStream, Connector, Incoming, TransportError,
};

type InboundItem = Result<Incoming, TransportError>;

/// Connector whose connections terminate in the same process.
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

struct Shared {
    available: AtomicBool,
    attempts: AtomicUsize,
    peers_tx: mpsc::UnboundedSender<MemoryPeer>,
    peers_rx: Mutex<mpsc::UnboundedReceiver<MemoryPeer>>,
}

impl MemoryConnector {
    /// Create a connector that accepts connections.
    #[must_use]
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                available: AtomicBool::new(true),
                attempts: AtomicUsize::new(0),
                peers_tx,
                peers_rx: Mutex::new(peers_rx),
            }),
        }
    }

    /// Accept or refuse subsequent connection attempts.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Number of connection attempts made so far, successful or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the server side of the next accepted connection.
    pub async fn next_peer(&self) -> Option<MemoryPeer> {
        self.shared.peers_rx.lock().await.recv().await
    }

    /// Take the server side of an already accepted connection, if any.
    pub fn try_next_peer(&self) -> Option<MemoryPeer> {
        self.shared.peers_rx.try_lock().ok()?.try_recv().ok()
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &Url) -> Result<Connection, TransportError> {
        let attempt = self.shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.shared.available.load(Ordering::SeqCst) {
            debug!(url = %url, attempt, "Memory connector refusing connection");
            return Err(TransportError::ConnectFailed("endpoint unreachable".into()));
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            url: url.clone(),
            outbound: outbound_rx,
            inbound: Some(inbound_tx),
        };
        self.shared
            .peers_tx
            .send(peer)
            .map_err(|_| TransportError::ConnectFailed("connector dropped".into()))?;

        debug!(url = %url, attempt, "Memory connection opened");

        Ok(Connection::new(
            Box::new(MemorySink {
                outbound: Some(outbound_tx),
            }),
            Box::new(MemoryStream { inbound: inbound_rx }),
        ))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Server side of an in-memory connection.
pub struct MemoryPeer {
    /// The URL the client connected to.
    pub url: Url,
    outbound: mpsc::UnboundedReceiver<String>,
    inbound: Option<mpsc::UnboundedSender<InboundItem>>,
}

impl MemoryPeer {
    /// Push a text frame to the client.
    ///
    /// Returns `false` if the connection is gone.
    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.push(Ok(Incoming::Text(text.into())))
    }

    /// Push a binary frame to the client.
    pub fn push_binary(&self, data: impl Into<Vec<u8>>) -> bool {
        self.push(Ok(Incoming::Binary(data.into())))
    }

    /// Make the client's next read fail.
    pub fn push_error(&self, message: impl Into<String>) -> bool {
        self.push(Err(TransportError::ReceiveFailed(message.into())))
    }

    fn push(&self, item: InboundItem) -> bool {
        self.inbound
            .as_ref()
            .map(|tx| tx.send(item).is_ok())
            .unwrap_or(false)
    }

    /// Wait for the next text frame sent by the client.
    ///
    /// Returns `None` once the client closed its write half.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Take a text frame sent by the client without waiting.
    pub fn try_recv_text(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }

    /// Close the connection from the server side.
    ///
    /// The client's reader sees a clean end of stream once it has drained
    /// any frames pushed before.
    pub fn close(&mut self) {
        self.inbound = None;
    }
}

struct MemorySink {
    outbound: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl ConnectionSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let tx = self.outbound.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(text).map_err(|_| {
            TransportError::SendFailed("peer dropped the connection".into())
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.outbound
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }
}

struct MemoryStream {
    inbound: mpsc::UnboundedReceiver<InboundItem>,
}

#[async_trait]
impl ConnectionStream for MemoryStream {
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        match self.inbound.recv().await {
            Some(Ok(incoming)) => Ok(Some(incoming)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}
