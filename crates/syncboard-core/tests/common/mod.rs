//! Common test utilities for `Syncboard` integration tests.

#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use syncboard_core::config::{Config, NetworkConfig};
use syncboard_core::network::{Network, NetworkEvents};
use syncboard_core::protocol::WireMessage;
use syncboard_core::session::Session;

/// Upper bound for anything that should converge.
pub const SETTLE: Duration = Duration::from_secs(5);

/// Network settings for tests: ephemeral port, fast polling.
pub fn test_network_config() -> NetworkConfig {
    NetworkConfig {
        port: 0,
        poll_interval: Duration::from_millis(20),
        connect_timeout: Duration::from_secs(2),
        ..NetworkConfig::default()
    }
}

/// Full configuration for test sessions.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.network = test_network_config();
    config.session.persist_connections = false;
    config
}

/// Loopback address for a listener bound to the wildcard address.
pub fn loopback(bound: SocketAddr) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, bound.port()))
}

/// Start an engine and return it with its dialable loopback address.
pub fn start_network(events: Arc<dyn NetworkEvents>) -> (Network, SocketAddr) {
    let network = Network::new(test_network_config(), events);
    let bound = network.start().expect("Failed to start network engine");
    (network, loopback(bound))
}

/// Start a session and return it with its dialable address as a string.
pub fn start_session() -> (Session, String) {
    let session = Session::new(&test_config());
    let bound = session.start().expect("Failed to start session");
    (session, loopback(bound).to_string())
}

/// Poll `condition` until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until `network` tracks exactly `count` live links.
pub async fn wait_for_peers(network: &Network, count: usize) {
    assert!(
        wait_until(SETTLE, || network.live_peers().len() == count).await,
        "expected {count} live peers, have {:?}",
        network.live_peers()
    );
}

/// Wait until `network` holds `expected` as its clipboard value.
pub async fn wait_for_clipboard(network: &Network, expected: &[u8]) {
    assert!(
        wait_until(SETTLE, || network.current_clipboard().data == expected).await,
        "clipboard never became {:?}, is {:?}",
        String::from_utf8_lossy(expected),
        String::from_utf8_lossy(&network.current_clipboard().data)
    );
}

/// Records every notification the engine raises.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    pub connected: Mutex<Vec<SocketAddr>>,
    pub disconnected: Mutex<Vec<SocketAddr>>,
    pub received: AtomicUsize,
}

impl RecordingEvents {
    pub fn connected_count(&self) -> usize {
        self.connected.lock().unwrap().len()
    }

    pub fn disconnected_count(&self) -> usize {
        self.disconnected.lock().unwrap().len()
    }

    pub fn received_count(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }
}

impl NetworkEvents for RecordingEvents {
    fn peer_connected(&self, addr: SocketAddr) {
        self.connected.lock().unwrap().push(addr);
    }

    fn peer_disconnected(&self, addr: SocketAddr) {
        self.disconnected.lock().unwrap().push(addr);
    }

    fn message_received(&self, _addr: SocketAddr, _message: &WireMessage) {
        self.received.fetch_add(1, Ordering::SeqCst);
    }
}
