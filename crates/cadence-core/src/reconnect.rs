//! Reconnection policy and the single outstanding reconnect timer.

use std::time::Duration;
use tokio::task::JoinHandle;

/// Default delay between reconnect attempts (milliseconds).
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;

/// Default number of automatic reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Fixed-delay, bounded reconnection policy.
///
/// Every attempt waits the same `delay`; there is no backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before each attempt.
    pub delay: Duration,
    /// Attempts allowed between two successful opens.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }

    /// A policy that never reconnects.
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(Duration::ZERO, 0)
    }

    /// Whether another attempt may be scheduled after `attempts` attempts.
    #[must_use]
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            DEFAULT_MAX_RECONNECT_ATTEMPTS,
        )
    }
}

/// Slot holding at most one armed reconnect timer.
///
/// Arming always aborts the timer already held. Each arm hands out a
/// ticket; the timer task presents it when it fires, and only proceeds if
/// it is still the armed timer.
#[derive(Debug, Default)]
pub struct ReconnectTimer {
    armed: Option<(u64, JoinHandle<()>)>,
    issued: u64,
}

impl ReconnectTimer {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the ticket for the next timer.
    ///
    /// The ticket is needed inside the timer task, before the task's
    /// handle exists; pass both to [`arm`](Self::arm) afterwards.
    pub fn next_ticket(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    /// Store a timer, aborting any timer already armed.
    pub fn arm(&mut self, ticket: u64, handle: JoinHandle<()>) {
        self.cancel();
        self.armed = Some((ticket, handle));
    }

    /// Abort the armed timer, if any.
    ///
    /// Returns `true` if a timer was armed.
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Called by a firing timer: release the slot if `ticket` still holds it.
    ///
    /// Returns `false` if the timer was cancelled or replaced meanwhile, in
    /// which case it must not act.
    pub fn fire(&mut self, ticket: u64) -> bool {
        match &self.armed {
            Some((armed, _)) if *armed == ticket => {
                // Dropping the handle detaches the running task.
                self.armed = None;
                true
            }
            _ => false,
        }
    }

    /// Check if a timer is armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}
