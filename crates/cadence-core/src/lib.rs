//! # cadence-core
//!
//! Presence channel manager, listener fan-out and connectivity tracking
//! for the Cadence client.
//!
//! - **PresenceChannel** - one realtime connection with bounded reconnection
//! - **ListenerRegistry** - synchronous fan-out with per-listener isolation
//! - **ReconnectPolicy** - fixed delay, bounded attempts
//! - **Connectivity** - the platform-reported online flag
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │  Connector  │────▶│ PresenceChannel │────▶│ message listeners│
//! └─────────────┘     └─────────────────┘     └──────────────────┘
//!                        │          │
//!                        ▼          ▼
//!               ┌──────────────┐  ┌─────────────────────┐
//!               │ReconnectTimer│  │connection listeners │
//!               └──────────────┘  └─────────────────────┘
//! ```

pub mod connectivity;
pub mod listeners;
pub mod presence;
pub mod reconnect;

pub use connectivity::{Connectivity, ConnectivityWatcher, Transition};
pub use listeners::{DispatchReport, ListenerRegistry, Subscription};
pub use presence::{
    ChannelError, ConnectionState, PresenceChannel, PresenceConfig, SEND_TIMEOUT,
};
pub use reconnect::{ReconnectPolicy, ReconnectTimer};
