//! Wiring of the presence channel and the offline layer.
//!
//! The runtime owns both components and the connectivity flag they share.
//! When the flag goes back online it re-arms the presence channel and
//! replays the pending queue.

use crate::commands::{Command, HELP};
use crate::config::Config;
use crate::metrics;
use crate::probe::Probe;
use anyhow::{Context, Result};
use cadence_core::{Connectivity, PresenceChannel, Subscription, Transition};
use cadence_offline::{FileStorage, HttpClient, OfflineLayer, ReadSource, RemoteWriter, Store};
use cadence_transport::{Connector, WebSocketConfig, WebSocketConnector};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Replaceable collaborators of a [`Runtime`].
pub struct Parts {
    pub connector: Arc<dyn Connector>,
    pub store: Store,
    /// `None` writes through the runtime's HTTP client.
    pub writer: Option<Arc<dyn RemoteWriter>>,
}

/// What the command loop should do after a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Output(String),
    Quit,
}

/// The running client.
pub struct Runtime {
    config: Config,
    connectivity: Connectivity,
    presence: PresenceChannel,
    offline: OfflineLayer,
    http: Arc<HttpClient>,
    subscriptions: Vec<Subscription>,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Build a runtime from configuration: WebSocket presence, file or
    /// memory storage and HTTP writes.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be opened or the origin is not a
    /// valid URL.
    pub fn from_config(config: Config) -> Result<Self> {
        let store = match config.storage_path() {
            Some(path) => Store::new(
                FileStorage::open(&path)
                    .with_context(|| format!("Failed to open storage: {}", path.display()))?,
            ),
            None => Store::memory(),
        };

        let connector = WebSocketConnector::new(WebSocketConfig {
            connect_timeout: Duration::from_millis(config.presence.connect_timeout_ms),
        });

        Self::with_parts(
            config,
            Connectivity::online(),
            Parts {
                connector: Arc::new(connector),
                store,
                writer: None,
            },
        )
    }

    /// Build a runtime from explicit parts.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin is not a valid URL.
    pub fn with_parts(config: Config, connectivity: Connectivity, parts: Parts) -> Result<Self> {
        let timeout = config
            .offline_config()
            .write_timeout
            .unwrap_or(Duration::from_secs(60));
        let http = Arc::new(
            HttpClient::new(&config.origin, timeout)
                .with_context(|| format!("Invalid origin: {}", config.origin))?,
        );
        let writer: Arc<dyn RemoteWriter> = match parts.writer {
            Some(writer) => writer,
            None => http.clone() as Arc<dyn RemoteWriter>,
        };

        let presence = PresenceChannel::new(config.presence_config(), parts.connector);
        let offline = OfflineLayer::new(
            connectivity.clone(),
            parts.store,
            writer,
            config.offline_config(),
        );

        Ok(Self {
            config,
            connectivity,
            presence,
            offline,
            http,
            subscriptions: Vec::new(),
            tasks: Vec::new(),
        })
    }

    /// The presence channel.
    #[must_use]
    pub fn presence(&self) -> &PresenceChannel {
        &self.presence
    }

    /// The offline layer.
    #[must_use]
    pub fn offline(&self) -> &OfflineLayer {
        &self.offline
    }

    /// Register listeners, start background tasks and open the presence
    /// channel.
    pub async fn start(&mut self) -> Result<()> {
        self.subscriptions.push(self.presence.on_message(|message| {
            metrics::record_message(message.kind());
            match message.status_update() {
                Some(update) => {
                    info!(user = %update.user_id, status = %update.status, "Status update")
                }
                None => debug!(kind = %message.kind(), "Message"),
            }
        }));

        // The listener holds a clone of the channel; `shutdown` unsubscribes
        // it to release the cycle.
        let presence = self.presence.clone();
        self.subscriptions
            .push(self.presence.on_connection_change(move |connected| {
                metrics::record_connection_change(*connected, presence.reconnect_attempts());
            }));

        if self.config.probe.enabled {
            let probe = Probe::new(
                &self.config.origin,
                Duration::from_millis(self.config.probe.interval_ms),
                Duration::from_millis(self.config.probe.timeout_ms),
            )?;
            info!(addr = %probe.target(), "Starting connectivity probe");
            self.tasks.push(probe.spawn(self.connectivity.clone()));
        }

        self.tasks.push(self.spawn_supervisor());
        self.tasks.push(
            self.offline
                .spawn_replay_on_reconnect_with(|report| metrics::record_replay(report)),
        );
        metrics::set_pending(self.offline.pending_count());

        if self.connectivity.is_online() {
            if let Err(e) = self.presence.connect().await {
                warn!(error = %e, "Initial presence connect failed");
            }
            if self.offline.has_pending() {
                metrics::record_replay(&self.offline.replay_pending().await);
            }
        }
        Ok(())
    }

    /// Reopen the presence channel whenever connectivity comes back.
    fn spawn_supervisor(&self) -> JoinHandle<()> {
        let presence = self.presence.clone();
        let mut watcher = self.connectivity.watch();

        tokio::spawn(async move {
            while let Some(transition) = watcher.next_transition().await {
                match transition {
                    Transition::WentOnline => {
                        info!("Back online");
                        presence.reset_reconnect();
                        if let Err(e) = presence.connect().await {
                            debug!(error = %e, "Reconnect after connectivity change failed");
                        }
                    }
                    Transition::WentOffline => info!("Offline, writes will be queued"),
                }
            }
        })
    }

    /// Execute one command.
    pub async fn handle(&self, command: Command) -> Reply {
        let output = match command {
            Command::Status(status) => {
                if !self.presence.is_connected() {
                    warn!(%status, "Presence channel not connected, status not sent");
                }
                self.presence.send(status).await;
                format!("status {status}")
            }
            Command::Get {
                endpoint,
                ttl_minutes,
            } => {
                let ttl = ttl_minutes.unwrap_or(self.config.offline.ttl_minutes);
                let http = Arc::clone(&self.http);
                let fetch_endpoint = endpoint.clone();
                let outcome = self
                    .offline
                    .read_through_detailed(
                        &endpoint,
                        || async move { http.fetch_json::<Value>(&fetch_endpoint).await },
                        ttl,
                    )
                    .await;

                let source = match outcome.source {
                    ReadSource::Network => "network",
                    ReadSource::Cache { stale: false } => "cache",
                    ReadSource::Cache { stale: true } => "stale cache",
                    ReadSource::Missing => "missing",
                };
                metrics::record_read(source);
                match outcome.value {
                    Some(value) => format!("[{source}] {value}"),
                    None => "no data available".to_string(),
                }
            }
            Command::Write {
                method,
                endpoint,
                payload,
            } => {
                let result = self.offline.write_through(&endpoint, method, payload).await;
                metrics::record_write(result.offline);
                metrics::set_pending(self.offline.pending_count());
                match result.id {
                    Some(id) if result.offline => format!("queued {id}"),
                    _ => "delivered".to_string(),
                }
            }
            Command::Pending => {
                let pending = self.offline.pending();
                if pending.is_empty() {
                    "no pending writes".to_string()
                } else {
                    pending
                        .iter()
                        .map(|p| format!("{} {} {}", p.id, p.method, p.endpoint))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            Command::Replay => {
                let report = self.offline.replay_pending().await;
                metrics::record_replay(&report);
                format!(
                    "delivered {}, failed {}, remaining {}",
                    report.delivered, report.failed, report.remaining
                )
            }
            Command::SetOnline(online) => {
                self.connectivity.set_online(online);
                let label = if online { "online" } else { "offline" };
                label.to_string()
            }
            Command::State => format!(
                "connection {:?}, reconnect attempts {}{}, network {}, pending {}",
                self.presence.state(),
                self.presence.reconnect_attempts(),
                if self.presence.reconnect_exhausted() {
                    " (exhausted)"
                } else {
                    ""
                },
                if self.connectivity.is_online() {
                    "online"
                } else {
                    "offline"
                },
                self.offline.pending_count(),
            ),
            Command::Help => HELP.to_string(),
            Command::Quit => return Reply::Quit,
        };
        Reply::Output(output)
    }

    /// Stop background tasks and close the presence channel.
    pub async fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.presence.disconnect().await;
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        info!("Client stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cadence_offline::{RemoteError, WriteRequest, WriteResponse};
    use cadence_transport::{MemoryConnector, MemoryPeer};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingWriter {
        seen: Mutex<Vec<WriteRequest>>,
    }

    #[async_trait]
    impl RemoteWriter for RecordingWriter {
        async fn write(&self, request: &WriteRequest) -> Result<WriteResponse, RemoteError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(WriteResponse::status(200))
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        // Nothing listens here; reads fall back to the cache.
        config.origin = "http://127.0.0.1:9".to_string();
        config.probe.enabled = false;
        config.offline.storage_path = String::new();
        config
    }

    async fn started(online: bool) -> (Runtime, MemoryConnector, Arc<RecordingWriter>) {
        let connector = MemoryConnector::new();
        let writer = Arc::new(RecordingWriter::default());
        let mut runtime = Runtime::with_parts(
            test_config(),
            Connectivity::new(online),
            Parts {
                connector: Arc::new(connector.clone()),
                store: Store::memory(),
                writer: Some(writer.clone() as Arc<dyn RemoteWriter>),
            },
        )
        .unwrap();
        runtime.start().await.unwrap();
        (runtime, connector, writer)
    }

    async fn output(runtime: &Runtime, line: &str) -> String {
        match runtime.handle(line.parse().unwrap()).await {
            Reply::Output(text) => text,
            Reply::Quit => panic!("unexpected quit"),
        }
    }

    async fn next_text(peer: &mut MemoryPeer) -> String {
        tokio::time::timeout(Duration::from_secs(1), peer.recv_text())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_connects_and_sends_status() {
        let (runtime, connector, _) = started(true).await;
        assert!(runtime.presence().is_connected());

        let mut peer = connector.next_peer().await.unwrap();
        assert!(next_text(&mut peer).await.contains("online"));

        assert_eq!(output(&runtime, "status away").await, "status away");
        assert!(next_text(&mut peer).await.contains("away"));

        runtime.shutdown().await;
        assert!(next_text(&mut peer).await.contains("offline"));
    }

    #[tokio::test]
    async fn test_offline_write_replays_when_back_online() {
        let (runtime, connector, writer) = started(false).await;
        assert_eq!(connector.attempts(), 0);

        let reply = output(&runtime, r#"post /api/notes {"text": "draft"}"#).await;
        assert!(reply.starts_with("queued "));
        assert_eq!(runtime.offline().pending_count(), 1);

        assert_eq!(output(&runtime, "online").await, "online");
        tokio::time::timeout(Duration::from_secs(2), async {
            while runtime.offline().has_pending() || !runtime.presence().is_connected() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let seen = writer.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].endpoint, "/api/notes");
        assert!(seen[0].idempotency_key.is_some());
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_get_without_network_or_cache() {
        let (runtime, _, _) = started(false).await;
        assert_eq!(output(&runtime, "get /api/courses").await, "no data available");
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_state_and_quit() {
        let (runtime, _, _) = started(false).await;
        let state = output(&runtime, "state").await;
        assert!(state.contains("Disconnected"));
        assert!(state.contains("network offline"));
        assert!(state.contains("pending 0"));

        assert_eq!(runtime.handle(Command::Quit).await, Reply::Quit);
        runtime.shutdown().await;
    }
}
