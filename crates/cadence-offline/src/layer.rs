//! The offline request layer.
//!
//! Reads go to the network while online and fall back to the soft-TTL
//! cache. Writes go to the network while online and otherwise land in the
//! durable pending queue, which is replayed when connectivity returns.
//! Nothing here returns an error to the caller: failures are logged and
//! turned into `None` or a queued [`WriteResult`].

use crate::cache::ResponseCache;
use crate::clock::{Clock, SystemClock};
use crate::queue::{PendingQueue, PendingRequest};
use crate::remote::{Method, RemoteError, RemoteWriter, WriteRequest};
use crate::storage::Store;
use cadence_core::{Connectivity, Transition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default bound on a direct write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// Offline layer configuration.
#[derive(Debug, Clone)]
pub struct OfflineConfig {
    /// Bound on a direct or replayed write. `None` waits indefinitely.
    pub write_timeout: Option<Duration>,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
        }
    }
}

/// Where a read's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// Fresh from the fetcher.
    Network,
    /// From the cache; `stale` when past its time-to-live.
    Cache { stale: bool },
    /// Nothing available.
    Missing,
}

/// A read result with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome<T> {
    pub value: Option<T>,
    pub source: ReadSource,
}

impl<T> ReadOutcome<T> {
    fn missing() -> Self {
        Self {
            value: None,
            source: ReadSource::Missing,
        }
    }
}

/// Result of [`OfflineLayer::write_through`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    /// The remote accepted the write.
    pub success: bool,
    /// The write was queued for later delivery.
    pub offline: bool,
    /// Id of the queued write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl WriteResult {
    fn delivered() -> Self {
        Self {
            success: true,
            offline: false,
            id: None,
        }
    }

    fn queued(id: String) -> Self {
        Self {
            success: false,
            offline: true,
            id: Some(id),
        }
    }
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Writes delivered and removed from the queue.
    pub delivered: usize,
    /// Writes attempted and kept.
    pub failed: usize,
    /// Queue size after the pass.
    pub remaining: usize,
    /// The pass stopped early because connectivity dropped.
    pub interrupted: bool,
}

struct LayerInner {
    connectivity: Connectivity,
    cache: ResponseCache,
    queue: PendingQueue,
    writer: Arc<dyn RemoteWriter>,
    clock: Arc<dyn Clock>,
    config: OfflineConfig,
    replaying: Mutex<()>,
}

/// Offline-first reads and writes.
///
/// Clones share the same cache, queue and connectivity flag.
#[derive(Clone)]
pub struct OfflineLayer {
    inner: Arc<LayerInner>,
}

impl OfflineLayer {
    /// Create a layer on the system clock.
    #[must_use]
    pub fn new(
        connectivity: Connectivity,
        store: Store,
        writer: Arc<dyn RemoteWriter>,
        config: OfflineConfig,
    ) -> Self {
        Self::with_clock(connectivity, store, writer, config, Arc::new(SystemClock))
    }

    /// Create a layer with an explicit clock.
    #[must_use]
    pub fn with_clock(
        connectivity: Connectivity,
        store: Store,
        writer: Arc<dyn RemoteWriter>,
        config: OfflineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(LayerInner {
                connectivity,
                cache: ResponseCache::new(store.clone(), Arc::clone(&clock)),
                queue: PendingQueue::new(store),
                writer,
                clock,
                config,
                replaying: Mutex::new(()),
            }),
        }
    }

    /// The connectivity flag this layer follows.
    #[must_use]
    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    /// The response cache.
    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    /// Read `endpoint`, preferring the network.
    ///
    /// Online, the fetcher runs and a success is cached for `ttl_minutes`.
    /// Offline, or when the fetcher fails, the cached value is returned
    /// even if expired. `None` means nothing is available.
    pub async fn read_through<T, F, Fut, E>(
        &self,
        endpoint: &str,
        fetcher: F,
        ttl_minutes: u64,
    ) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.read_through_detailed(endpoint, fetcher, ttl_minutes)
            .await
            .value
    }

    /// Like [`read_through`](Self::read_through), also reporting where the
    /// value came from.
    pub async fn read_through_detailed<T, F, Fut, E>(
        &self,
        endpoint: &str,
        fetcher: F,
        ttl_minutes: u64,
    ) -> ReadOutcome<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        if !self.inner.connectivity.is_online() {
            debug!(endpoint, "Offline, reading from cache");
            return self.read_cached(endpoint);
        }

        match fetcher().await {
            Ok(value) => {
                self.store_response(endpoint, &value, ttl_minutes);
                ReadOutcome {
                    value: Some(value),
                    source: ReadSource::Network,
                }
            }
            Err(e) => {
                debug!(endpoint, error = %e, "Fetch failed, falling back to cache");
                self.read_cached(endpoint)
            }
        }
    }

    fn store_response<T: Serialize>(&self, endpoint: &str, value: &T, ttl_minutes: u64) {
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(endpoint, error = %e, "Response not cacheable");
                return;
            }
        };

        let ttl = Duration::from_secs(ttl_minutes.saturating_mul(60));
        if let Err(e) = self.inner.cache.put(endpoint, payload, ttl) {
            warn!(endpoint, error = %e, "Failed to cache response");
        }
    }

    fn read_cached<T: DeserializeOwned>(&self, endpoint: &str) -> ReadOutcome<T> {
        let entry = match self.inner.cache.get(endpoint) {
            Ok(Some(entry)) => entry,
            Ok(None) => return ReadOutcome::missing(),
            Err(e) => {
                warn!(endpoint, error = %e, "Cache read failed");
                return ReadOutcome::missing();
            }
        };

        let stale = entry.is_expired_at(self.inner.clock.now_millis());
        match serde_json::from_value(entry.payload) {
            Ok(value) => {
                debug!(endpoint, stale, "Served from cache");
                ReadOutcome {
                    value: Some(value),
                    source: ReadSource::Cache { stale },
                }
            }
            Err(e) => {
                warn!(endpoint, error = %e, "Cached payload does not match requested type");
                ReadOutcome::missing()
            }
        }
    }

    /// Write `payload` to `endpoint`, queueing it if it cannot be delivered
    /// now.
    pub async fn write_through(&self, endpoint: &str, method: Method, payload: Value) -> WriteResult {
        if self.inner.connectivity.is_online() {
            let request = WriteRequest::new(endpoint, method, payload.clone());
            match self.deliver(&request).await {
                Ok(()) => return WriteResult::delivered(),
                Err(e) => debug!(endpoint, %method, error = %e, "Direct write failed, queueing"),
            }
        } else {
            debug!(endpoint, %method, "Offline, queueing write");
        }

        let request = PendingRequest::new(endpoint, method, payload, self.inner.clock.now_millis());
        let id = request.id.clone();
        if let Err(e) = self.inner.queue.push(request) {
            error!(endpoint, id = %id, error = %e, "Failed to persist pending write");
        }
        WriteResult::queued(id)
    }

    async fn deliver(&self, request: &WriteRequest) -> Result<(), RemoteError> {
        let write = self.inner.writer.write(request);
        let response = match self.inner.config.write_timeout {
            Some(limit) => tokio::time::timeout(limit, write)
                .await
                .map_err(|_| RemoteError::Timeout)??,
            None => write.await?,
        };

        if response.is_success() {
            Ok(())
        } else {
            Err(RemoteError::Status(response.status))
        }
    }

    /// Number of queued writes.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.queue.len().unwrap_or_else(|e| {
            warn!(error = %e, "Pending queue unreadable");
            0
        })
    }

    /// Whether any write is queued.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending_count() > 0
    }

    /// Snapshot of the queued writes, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingRequest> {
        self.inner.queue.list().unwrap_or_else(|e| {
            warn!(error = %e, "Pending queue unreadable");
            Vec::new()
        })
    }

    /// Whether the write with `id` is still queued.
    #[must_use]
    pub fn is_pending(&self, id: &str) -> bool {
        self.inner.queue.contains(id).unwrap_or_else(|e| {
            warn!(error = %e, "Pending queue unreadable");
            false
        })
    }

    /// Deliver queued writes, oldest first.
    ///
    /// Delivered writes leave the queue; failed ones stay for the next pass.
    /// The pass stops early if connectivity drops. Concurrent calls run one
    /// after the other.
    pub async fn replay_pending(&self) -> ReplayReport {
        let _guard = self.inner.replaying.lock().await;
        let mut report = ReplayReport::default();

        for pending in self.pending() {
            if !self.inner.connectivity.is_online() {
                debug!("Connectivity lost, pausing replay");
                report.interrupted = true;
                break;
            }
            // Another path may have delivered it while we waited.
            if !self.is_pending(&pending.id) {
                continue;
            }

            match self.deliver(&WriteRequest::replay(&pending)).await {
                Ok(()) => {
                    if let Err(e) = self.inner.queue.remove(&pending.id) {
                        error!(id = %pending.id, error = %e, "Delivered write could not be dequeued");
                    }
                    report.delivered += 1;
                    debug!(id = %pending.id, endpoint = %pending.endpoint, "Replayed write");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(id = %pending.id, endpoint = %pending.endpoint, error = %e, "Replay failed");
                }
            }
        }

        report.remaining = self.pending_count();
        info!(
            delivered = report.delivered,
            failed = report.failed,
            remaining = report.remaining,
            interrupted = report.interrupted,
            "Replay finished"
        );
        report
    }

    /// Replay the queue on every offline to online transition.
    ///
    /// The task runs until the returned handle is aborted.
    pub fn spawn_replay_on_reconnect(&self) -> JoinHandle<()> {
        self.spawn_replay_on_reconnect_with(|_| {})
    }

    /// Like [`spawn_replay_on_reconnect`](Self::spawn_replay_on_reconnect),
    /// handing the report of every pass to `on_report`.
    ///
    /// A pass cut short by a connectivity drop resumes as soon as the flag
    /// reads online again, even if the drop was too brief to surface as a
    /// transition.
    pub fn spawn_replay_on_reconnect_with<F>(&self, on_report: F) -> JoinHandle<()>
    where
        F: Fn(&ReplayReport) + Send + 'static,
    {
        let layer = self.clone();
        let mut watcher = self.inner.connectivity.watch();

        tokio::spawn(async move {
            while let Some(transition) = watcher.next_transition().await {
                if transition != Transition::WentOnline {
                    continue;
                }
                while layer.has_pending() {
                    let report = layer.replay_pending().await;
                    on_report(&report);
                    if !report.interrupted {
                        break;
                    }
                    layer.inner.connectivity.wait_for_online().await;
                }
            }
        })
    }
}
