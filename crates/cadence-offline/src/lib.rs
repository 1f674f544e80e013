//! # cadence-offline
//!
//! Offline-first request layer for the Cadence client.
//!
//! - **OfflineLayer** - read-through cache and write-through queue
//! - **Store** - single-writer access to persisted key/value storage
//! - **HttpClient** - reqwest-backed remote writes and JSON fetches
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────┐
//!   read_through ─▶│              │──▶ fetcher ──▶ network
//!                  │ OfflineLayer │
//!  write_through ─▶│              │──▶ RemoteWriter ──▶ network
//!                  └──────────────┘
//!                     │        │
//!                     ▼        ▼
//!            ┌──────────────┐ ┌──────────────┐
//!            │ResponseCache │ │ PendingQueue │
//!            └──────────────┘ └──────────────┘
//!                     │        │
//!                     ▼        ▼
//!                  ┌──────────────┐
//!                  │    Store     │
//!                  └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use cadence_core::Connectivity;
//! use cadence_offline::{HttpClient, Method, OfflineConfig, OfflineLayer, Store};
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let http = Arc::new(HttpClient::new("https://learn.example.com", Duration::from_secs(15))?);
//! let layer = OfflineLayer::new(
//!     Connectivity::online(),
//!     Store::memory(),
//!     http.clone(),
//!     OfflineConfig::default(),
//! );
//!
//! let courses: Option<serde_json::Value> = layer
//!     .read_through("/api/courses", || http.fetch_json("/api/courses"), 10)
//!     .await;
//!
//! let result = layer
//!     .write_through("/api/notes", Method::Post, json!({"text": "hello"}))
//!     .await;
//! # let _ = (courses, result);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod layer;
pub mod queue;
pub mod remote;
pub mod storage;

pub use cache::{CacheEntry, ResponseCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use layer::{
    OfflineConfig, OfflineLayer, ReadOutcome, ReadSource, ReplayReport, WriteResult,
    DEFAULT_WRITE_TIMEOUT,
};
pub use queue::{PendingQueue, PendingRequest};
pub use remote::{HttpClient, Method, RemoteError, RemoteWriter, WriteRequest, WriteResponse};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError, Store};
