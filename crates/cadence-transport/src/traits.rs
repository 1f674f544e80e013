//! Connection abstraction traits for Cadence.
//!
//! These traits define the interface every connector must provide, so the
//! presence channel never depends on a concrete socket implementation.

use async_trait::async_trait;
use cadence_protocol::{codec, Frame};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use url::Url;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection, used in log fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let counter = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection attempt timed out.
    #[error("Connection timed out")]
    Timeout,

    /// The endpoint could not be reached or refused the handshake.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The channel address could not be derived.
    #[error("Invalid channel URL: {0}")]
    InvalidUrl(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] cadence_protocol::ProtocolError),
}

/// A message read off a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary(Vec<u8>),
}

/// Opens connections to a channel endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`.
    ///
    /// Resolves once the connection is open and ready to carry frames.
    async fn connect(&self, url: &Url) -> Result<Connection, TransportError>;

    /// Get the connector name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}

/// Write half of an open connection.
#[async_trait]
pub trait ConnectionSink: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the write half is still open.
    fn is_open(&self) -> bool;

    /// Encode and send a protocol frame.
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let text = codec::encode(frame)?;
        self.send_text(text).await
    }
}

/// Read half of an open connection.
#[async_trait]
pub trait ConnectionStream: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError>;
}

/// An open connection, split into its two halves.
pub struct Connection {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Write half.
    pub sink: Box<dyn ConnectionSink>,
    /// Read half.
    pub stream: Box<dyn ConnectionStream>,
}

impl Connection {
    /// Assemble a connection from its halves.
    #[must_use]
    pub fn new(sink: Box<dyn ConnectionSink>, stream: Box<dyn ConnectionStream>) -> Self {
        Self {
            id: ConnectionId::generate(),
            sink,
            stream,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("open", &self.sink.is_open())
            .finish()
    }
}
