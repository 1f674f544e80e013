//! Reachability probe driving the connectivity flag.
//!
//! The probe opens a TCP connection to the origin at a fixed interval and
//! reports the result through [`Connectivity::set_online`].

use anyhow::{anyhow, Context, Result};
use cadence_core::Connectivity;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::trace;
use url::Url;

/// Periodic TCP reachability probe.
#[derive(Debug, Clone)]
pub struct Probe {
    target: String,
    interval: Duration,
    timeout: Duration,
}

impl Probe {
    /// Create a probe for `origin`.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin has no host or known port.
    pub fn new(origin: &str, interval: Duration, timeout: Duration) -> Result<Self> {
        Ok(Self {
            target: target_from_origin(origin)?,
            interval,
            timeout,
        })
    }

    /// The `host:port` being probed.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Probe once.
    pub async fn check(&self) -> bool {
        let reachable = matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await,
            Ok(Ok(_))
        );
        trace!(target = %self.target, reachable, "Probe");
        reachable
    }

    /// Probe forever, writing each result to `connectivity`.
    pub fn spawn(self, connectivity: Connectivity) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                connectivity.set_online(self.check().await);
                tokio::time::sleep(self.interval).await;
            }
        })
    }
}

/// `host:port` of an origin URL, using the scheme's default port.
///
/// # Errors
///
/// Returns an error if the origin does not parse or lacks a host or port.
pub fn target_from_origin(origin: &str) -> Result<String> {
    let url = Url::parse(origin).with_context(|| format!("Invalid origin: {origin}"))?;
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("Origin has no host: {origin}"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow!("Origin has no port: {origin}"))?;
    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_target_from_origin() {
        assert_eq!(
            target_from_origin("https://learn.example.com").unwrap(),
            "learn.example.com:443"
        );
        assert_eq!(
            target_from_origin("http://localhost:3000/app").unwrap(),
            "localhost:3000"
        );
        assert!(target_from_origin("not a url").is_err());
    }

    #[tokio::test]
    async fn test_probe_tracks_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let probe = Probe::new(
            &format!("http://{addr}"),
            Duration::from_millis(10),
            Duration::from_millis(500),
        )
        .unwrap();
        assert!(probe.check().await);

        drop(listener);
        assert!(!probe.check().await);
    }

    #[tokio::test]
    async fn test_spawn_sets_connectivity() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connectivity = Connectivity::online();
        let probe = Probe::new(
            &format!("http://{addr}"),
            Duration::from_millis(10),
            Duration::from_millis(500),
        )
        .unwrap();
        let task = probe.spawn(connectivity.clone());

        let mut watcher = connectivity.watch();
        tokio::time::timeout(Duration::from_secs(2), watcher.next_transition())
            .await
            .unwrap();
        assert!(!connectivity.is_online());
        task.abort();
    }
}
