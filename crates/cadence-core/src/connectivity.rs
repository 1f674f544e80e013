//! Platform-reported connectivity.
//!
//! A single online/offline flag shared by every component that needs to
//! react to network availability. Whoever knows the platform state (a
//! reachability probe, an OS hook, a test) writes it; readers either poll
//! [`Connectivity::is_online`] or follow transitions through a
//! [`ConnectivityWatcher`].

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// A change of the connectivity flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The platform reports the network as available again.
    WentOnline,
    /// The platform reports the network as unavailable.
    WentOffline,
}

/// Shared online/offline flag.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    /// Create a flag with the given initial value.
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Create a flag that starts online.
    #[must_use]
    pub fn online() -> Self {
        Self::new(true)
    }

    /// Create a flag that starts offline.
    #[must_use]
    pub fn offline() -> Self {
        Self::new(false)
    }

    /// Current value of the flag.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the flag.
    ///
    /// Returns `true` if the value changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }

    /// Raw receiver for the flag.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Follow transitions starting from the current value.
    #[must_use]
    pub fn watch(&self) -> ConnectivityWatcher {
        let mut rx = self.tx.subscribe();
        let last = *rx.borrow_and_update();
        ConnectivityWatcher { rx, last }
    }

    /// Wait until the flag reads online.
    pub async fn wait_for_online(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|online| *online).await;
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::online()
    }
}

/// Yields connectivity transitions.
///
/// Flips that happen faster than the watcher is polled coalesce: an
/// offline/online round trip that is never observed yields nothing.
#[derive(Debug)]
pub struct ConnectivityWatcher {
    rx: watch::Receiver<bool>,
    last: bool,
}

impl ConnectivityWatcher {
    /// Wait for the next transition.
    ///
    /// Returns `None` once every [`Connectivity`] handle is dropped.
    pub async fn next_transition(&mut self) -> Option<Transition> {
        loop {
            self.rx.changed().await.ok()?;
            let online = *self.rx.borrow_and_update();
            if online != self.last {
                self.last = online;
                return Some(if online {
                    Transition::WentOnline
                } else {
                    Transition::WentOffline
                });
            }
        }
    }

    /// The last value this watcher observed.
    #[must_use]
    pub fn last(&self) -> bool {
        self.last
    }
}
