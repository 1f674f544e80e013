//! # cadence-transport
//!
//! Connection abstraction for the Cadence presence channel.
//!
//! - **WebSocket** - the production connector, built on tokio-tungstenite
//! - **Memory** - an in-process connector whose far end is driven by the
//!   caller, used by tests and local demos
//!
//! ## Connection Abstraction
//!
//! A [`Connector`] opens a [`Connection`], which is already split into a
//! write half and a read half so the channel manager can send status
//! updates while a reader task is parked on the stream.
//!
//! ```rust,ignore
//! use cadence_transport::{channel_url, Connector, WebSocketConnector};
//!
//! let url = channel_url("https://learn.example.com", "/ws/presence")?;
//! let mut conn = WebSocketConnector::default().connect(&url).await?;
//! while let Ok(Some(incoming)) = conn.stream.recv().await {
//!     // Process frame
//! }
//! ```

pub mod endpoint;
pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use endpoint::channel_url;
pub use memory::{MemoryConnector, MemoryPeer};
pub use traits::{
    Connection, ConnectionId, ConnectionSink, ConnectionStream, Connector, Incoming,
    TransportError,
};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketConnector};
