//! Durable queue of writes awaiting delivery.
//!
//! The queue is one JSON array under [`PENDING_KEY`], oldest first. Every
//! change is a read-modify-write through [`Store::update`].

use crate::remote::Method;
use crate::storage::{StorageError, Store};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

/// Storage key of the pending array.
pub const PENDING_KEY: &str = "pending-requests";

/// A write that could not be delivered yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    /// Unique id, also used as the idempotency key on replay.
    pub id: String,
    /// Target endpoint.
    pub endpoint: String,
    /// HTTP method.
    pub method: Method,
    /// Request body.
    pub payload: Value,
    /// Enqueue time, in epoch milliseconds.
    pub created_at: u64,
}

impl PendingRequest {
    /// Create a request with a fresh random id.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, method: Method, payload: Value, created_at: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            endpoint: endpoint.into(),
            method,
            payload,
            created_at,
        }
    }
}

/// The pending write queue.
#[derive(Debug, Clone)]
pub struct PendingQueue {
    store: Store,
}

impl PendingQueue {
    /// Create a queue over `store`.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Append a request.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read or written.
    pub fn push(&self, request: PendingRequest) -> Result<(), StorageError> {
        let id = request.id.clone();
        let len = self.store.update(PENDING_KEY, |queue: &mut Vec<PendingRequest>| {
            queue.push(request);
            queue.len()
        })?;
        debug!(id = %id, pending = len, "Queued write");
        Ok(())
    }

    /// Remove the request with `id`.
    ///
    /// Returns `true` if it was queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read or written.
    pub fn remove(&self, id: &str) -> Result<bool, StorageError> {
        self.store
            .update(PENDING_KEY, |queue: &mut Vec<PendingRequest>| {
                let before = queue.len();
                queue.retain(|r| r.id != id);
                queue.len() != before
            })
    }

    /// All queued requests, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn list(&self) -> Result<Vec<PendingRequest>, StorageError> {
        Ok(self.store.read(PENDING_KEY)?.unwrap_or_default())
    }

    /// Number of queued requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn len(&self) -> Result<usize, StorageError> {
        self.list().map(|q| q.len())
    }

    /// Whether the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        self.len().map(|n| n == 0)
    }

    /// Whether a request with `id` is queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn contains(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.list()?.iter().any(|r| r.id == id))
    }
}
