//! Reconnection behaviour of the presence channel, driven on paused time.

use cadence_core::{ConnectionState, PresenceChannel, PresenceConfig, ReconnectPolicy};
use cadence_transport::MemoryConnector;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DELAY: Duration = Duration::from_millis(3_000);

fn setup() -> (MemoryConnector, PresenceChannel, Arc<Mutex<Vec<bool>>>) {
    let connector = MemoryConnector::new();
    let channel = PresenceChannel::new(
        PresenceConfig::new("http://localhost:3000"),
        Arc::new(connector.clone()),
    );

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&transitions);
    channel.on_connection_change(move |connected| sink.lock().unwrap().push(*connected));

    (connector, channel, transitions)
}

/// Sleep just past the next reconnect deadline.
async fn past_next_attempt() {
    tokio::time::sleep(DELAY + Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_attempts_are_bounded() {
    let (connector, channel, transitions) = setup();
    connector.set_available(false);

    assert!(channel.connect().await.is_err());
    assert_eq!(connector.attempts(), 1);
    assert!(channel.reconnect_pending());

    let mut last = 0;
    for expected in 1..=5 {
        past_next_attempt().await;
        let attempts = channel.reconnect_attempts();
        assert_eq!(attempts, expected);
        assert!(attempts >= last, "counter must not decrease between opens");
        last = attempts;
        assert_eq!(connector.attempts() as u32, expected + 1);
    }

    assert!(channel.reconnect_exhausted());
    assert!(!channel.reconnect_pending());
    assert_eq!(channel.state(), ConnectionState::Disconnected);

    // No further automatic retry.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), 6);
    assert_eq!(channel.reconnect_attempts(), 5);

    // Every failed attempt looked the same to listeners.
    assert_eq!(*transitions.lock().unwrap(), vec![false; 6]);
}

#[tokio::test(start_paused = true)]
async fn successful_open_resets_counter() {
    let (connector, channel, transitions) = setup();
    connector.set_available(false);

    let _ = channel.connect().await;
    past_next_attempt().await;
    past_next_attempt().await;
    assert_eq!(channel.reconnect_attempts(), 2);

    connector.set_available(true);
    past_next_attempt().await;

    assert!(channel.is_connected());
    assert_eq!(channel.reconnect_attempts(), 0);
    assert_eq!(
        *transitions.lock().unwrap(),
        vec![false, false, false, true]
    );
}

#[tokio::test(start_paused = true)]
async fn remote_close_reconnects_after_fixed_delay() {
    let (connector, channel, transitions) = setup();

    channel.connect().await.unwrap();
    let mut peer = connector.next_peer().await.unwrap();
    peer.close();

    tokio::time::sleep(DELAY - Duration::from_millis(1)).await;
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert_eq!(connector.attempts(), 1);
    assert!(channel.reconnect_pending());

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert!(channel.is_connected());
    assert_eq!(connector.attempts(), 2);
    assert_eq!(channel.reconnect_attempts(), 0);
    assert_eq!(*transitions.lock().unwrap(), vec![true, false, true]);

    // The new connection announces itself again.
    let mut peer = connector.next_peer().await.unwrap();
    assert!(peer.recv_text().await.unwrap().contains("online"));
}

#[tokio::test(start_paused = true)]
async fn read_error_is_treated_as_close() {
    let (connector, channel, transitions) = setup();

    channel.connect().await.unwrap();
    let peer = connector.next_peer().await.unwrap();
    peer.push_error("connection reset");

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert_eq!(*transitions.lock().unwrap(), vec![true, false]);

    past_next_attempt().await;
    assert!(channel.is_connected());
}

#[tokio::test(start_paused = true)]
async fn only_one_reconnect_timer_is_outstanding() {
    let (connector, channel, _) = setup();
    connector.set_available(false);

    let _ = channel.connect().await;
    tokio::time::sleep(Duration::from_millis(1_000)).await;

    // A manual attempt replaces the armed timer instead of adding one.
    let _ = channel.connect().await;
    assert_eq!(connector.attempts(), 2);

    tokio::time::sleep(Duration::from_millis(2_001)).await;
    assert_eq!(connector.attempts(), 2, "replaced timer must not fire");

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(connector.attempts(), 3);
    assert_eq!(channel.reconnect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect() {
    let (connector, channel, transitions) = setup();
    connector.set_available(false);

    let _ = channel.connect().await;
    assert!(channel.reconnect_pending());

    channel.disconnect().await;
    assert!(!channel.reconnect_pending());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.attempts(), 1);
    // Not connected when disconnect ran, so only the failed attempt reported.
    assert_eq!(*transitions.lock().unwrap(), vec![false]);
}

#[tokio::test(start_paused = true)]
async fn disconnect_does_not_trigger_reconnect() {
    let (connector, channel, _) = setup();

    channel.connect().await.unwrap();
    let _peer = connector.next_peer().await.unwrap();
    channel.disconnect().await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(channel.state(), ConnectionState::Disconnected);

    // A later connect starts clean.
    channel.connect().await.unwrap();
    assert!(channel.is_connected());
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn reset_after_exhaustion_allows_new_attempts() {
    let connector = MemoryConnector::new();
    let channel = PresenceChannel::new(
        PresenceConfig::new("http://localhost:3000")
            .with_reconnect(ReconnectPolicy::new(Duration::from_millis(100), 1)),
        Arc::new(connector.clone()),
    );
    connector.set_available(false);

    let _ = channel.connect().await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(channel.reconnect_exhausted());
    assert_eq!(connector.attempts(), 2);

    connector.set_available(true);
    channel.reset_reconnect();
    assert!(!channel.reconnect_exhausted());
    assert_eq!(channel.reconnect_attempts(), 0);

    channel.connect().await.unwrap();
    assert!(channel.is_connected());
}
