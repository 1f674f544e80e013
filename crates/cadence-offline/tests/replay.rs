//! Queue durability and replay on reconnect.

use async_trait::async_trait;
use cadence_core::Connectivity;
use cadence_offline::{
    FileStorage, Method, OfflineConfig, OfflineLayer, RemoteError, RemoteWriter, ReplayReport,
    Store, WriteRequest, WriteResponse,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

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

/// Goes offline after its first delivery.
struct FlakyWriter {
    connectivity: Connectivity,
    seen: Mutex<usize>,
}

#[async_trait]
impl RemoteWriter for FlakyWriter {
    async fn write(&self, _: &WriteRequest) -> Result<WriteResponse, RemoteError> {
        *self.seen.lock().unwrap() += 1;
        self.connectivity.set_online(false);
        Ok(WriteResponse::status(200))
    }
}

/// Drops connectivity on its first delivery and restores it right after.
struct BlipWriter {
    connectivity: Connectivity,
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl RemoteWriter for BlipWriter {
    async fn write(&self, request: &WriteRequest) -> Result<WriteResponse, RemoteError> {
        let first = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(request.endpoint.clone());
            seen.len() == 1
        };
        if first {
            self.connectivity.set_online(false);
            let connectivity = self.connectivity.clone();
            tokio::spawn(async move {
                connectivity.set_online(true);
            });
        }
        Ok(WriteResponse::status(200))
    }
}

fn file_layer(
    path: &std::path::Path,
    connectivity: &Connectivity,
    writer: Arc<dyn RemoteWriter>,
) -> OfflineLayer {
    OfflineLayer::new(
        connectivity.clone(),
        Store::new(FileStorage::open(path).unwrap()),
        writer,
        OfflineConfig::default(),
    )
}

#[tokio::test]
async fn queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cadence.json");
    let connectivity = Connectivity::offline();

    let id = {
        let layer = file_layer(&path, &connectivity, Arc::new(RecordingWriter::default()));
        let result = layer
            .write_through("/api/notes", Method::Post, json!({"text": "draft"}))
            .await;
        result.id.unwrap()
    };

    let writer = Arc::new(RecordingWriter::default());
    let layer = file_layer(&path, &connectivity, writer.clone());
    assert!(layer.is_pending(&id));

    connectivity.set_online(true);
    let report = layer.replay_pending().await;
    assert_eq!(report.delivered, 1);
    assert_eq!(report.remaining, 0);

    let seen = writer.seen.lock().unwrap();
    assert_eq!(seen[0].payload, json!({"text": "draft"}));
    assert_eq!(seen[0].idempotency_key.as_deref(), Some(id.as_str()));
}

#[tokio::test]
async fn cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cadence.json");
    let connectivity = Connectivity::online();

    {
        let layer = file_layer(&path, &connectivity, Arc::new(RecordingWriter::default()));
        layer
            .read_through("/api/courses", || async { Ok::<_, String>(json!(["rust"])) }, 10)
            .await;
    }

    connectivity.set_online(false);
    let layer = file_layer(&path, &connectivity, Arc::new(RecordingWriter::default()));
    let value: Option<serde_json::Value> = layer
        .read_through("/api/courses", || async { Ok::<_, String>(json!([])) }, 10)
        .await;
    assert_eq!(value, Some(json!(["rust"])));
}

#[tokio::test]
async fn reconnect_triggers_replay() {
    let connectivity = Connectivity::offline();
    let writer = Arc::new(RecordingWriter::default());
    let layer = OfflineLayer::new(
        connectivity.clone(),
        Store::memory(),
        writer.clone(),
        OfflineConfig::default(),
    );

    layer.write_through("/a", Method::Post, json!(1)).await;
    layer.write_through("/b", Method::Post, json!(2)).await;
    let task = layer.spawn_replay_on_reconnect();

    connectivity.set_online(true);
    tokio::time::timeout(Duration::from_secs(2), async {
        while layer.has_pending() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let endpoints: Vec<_> = writer
        .seen
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.endpoint.clone())
        .collect();
    assert_eq!(endpoints, vec!["/a", "/b"]);
    task.abort();
}

#[tokio::test]
async fn replay_stops_when_connectivity_drops() {
    let connectivity = Connectivity::offline();
    let writer = Arc::new(FlakyWriter {
        connectivity: connectivity.clone(),
        seen: Mutex::new(0),
    });
    let layer = OfflineLayer::new(
        connectivity.clone(),
        Store::memory(),
        writer.clone(),
        OfflineConfig::default(),
    );

    for endpoint in ["/1", "/2", "/3"] {
        layer.write_through(endpoint, Method::Post, json!({})).await;
    }

    connectivity.set_online(true);
    let report = layer.replay_pending().await;

    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.remaining, 2);
    assert!(report.interrupted);
    assert_eq!(*writer.seen.lock().unwrap(), 1);
}

#[tokio::test]
async fn replay_resumes_after_brief_outage() {
    let connectivity = Connectivity::offline();
    let writer = Arc::new(BlipWriter {
        connectivity: connectivity.clone(),
        seen: Mutex::new(Vec::new()),
    });
    let layer = OfflineLayer::new(
        connectivity.clone(),
        Store::memory(),
        writer.clone(),
        OfflineConfig::default(),
    );

    for endpoint in ["/1", "/2", "/3"] {
        layer.write_through(endpoint, Method::Post, json!({})).await;
    }

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    let task = layer.spawn_replay_on_reconnect_with(move |report| {
        sink.lock().unwrap().push(*report);
    });

    connectivity.set_online(true);
    let settled = || reports.lock().unwrap().last().is_some_and(|r: &ReplayReport| !r.interrupted);
    tokio::time::timeout(Duration::from_secs(2), async {
        while layer.has_pending() || !settled() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue must drain once connectivity is back");

    assert_eq!(*writer.seen.lock().unwrap(), vec!["/1", "/2", "/3"]);
    let reports = reports.lock().unwrap().clone();
    assert!(reports.first().is_some_and(|r| r.interrupted && r.delivered == 1));
    assert!(reports.last().is_some_and(|r| !r.interrupted && r.remaining == 0));
    task.abort();
}
