//! # cadence-protocol
//!
//! Frame definitions for the Cadence presence channel.
//!
//! Frames travel as JSON text objects carrying a `type` discriminator.
//! The client only ever emits its own activity status; everything the
//! server pushes is surfaced to listeners as an [`InboundMessage`].
//!
//! ## Example
//!
//! ```rust
//! use cadence_protocol::{codec, ActivityStatus, Frame};
//!
//! let text = codec::encode(&Frame::user_status(ActivityStatus::Away)).unwrap();
//! assert_eq!(text, r#"{"type":"user_status","status":"away"}"#);
//!
//! let inbound = codec::decode(r#"{"type":"user_status","user_id":"42","status":"online"}"#).unwrap();
//! let update = inbound.status_update().unwrap();
//! assert_eq!(update.user_id, "42");
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{ActivityStatus, Frame, InboundMessage, StatusUpdate};
