//! Session façade.
//!
//! A [`Session`] ties one [`Network`] to a [`ConnectionRegistry`] and is the
//! only surface a front-end needs. It translates user intents (connect,
//! accept, cancel, disconnect, delete) into registry transitions and
//! transport commands, and applies the engine's notifications to the
//! registry.
//!
//! Operations that name an address without a record, or a record in the
//! wrong state, are logged and ignored. Only outbound connection failures
//! and local setup errors reach the caller.
//!
//! ## Inbound connections
//!
//! | Prior status | After the remote connects |
//! |--------------|---------------------------|
//! | no record | new record, alias = address, `Request` |
//! | `NotConnected` | `Request` |
//! | `Pending` | `Connected` |
//! | `Request`, `Connected` | unchanged |
//!
//! A lost link moves the record back to `NotConnected`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::config::Config;
use crate::connection::{
    clamp_alias, parse_host_address, ConnectionRecord, ConnectionRegistry, ConnectionStatus,
};
use crate::error::{Error, Result};
use crate::network::{peer_ipv4, ClipboardEntry, Network, NetworkEvents};
use crate::protocol::DataType;
use crate::DEFAULT_PORT;

type SharedRegistry = Arc<Mutex<ConnectionRegistry>>;

fn lock(registry: &SharedRegistry) -> MutexGuard<'_, ConnectionRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Applies engine notifications to the registry.
struct SessionEvents {
    registry: SharedRegistry,
}

impl NetworkEvents for SessionEvents {
    fn peer_connected(&self, addr: SocketAddr) {
        let Some(ip) = peer_ipv4(addr) else {
            tracing::warn!("Ignoring connection from non-IPv4 peer {}", addr);
            return;
        };

        let mut registry = lock(&self.registry);
        match registry.get_mut(ip) {
            Some(record) => match record.status {
                ConnectionStatus::NotConnected => {
                    record.status = ConnectionStatus::Request;
                    tracing::info!("{} ({}) wants to connect", ip, record.alias);
                }
                ConnectionStatus::Pending => {
                    record.status = ConnectionStatus::Connected;
                    tracing::info!("{} ({}) connected", ip, record.alias);
                }
                ConnectionStatus::Request | ConnectionStatus::Connected => {
                    tracing::debug!("Extra link from {} ({})", ip, record.status);
                }
            },
            None => {
                let alias = ip.to_string();
                match registry.create(&alias, SocketAddrV4::new(ip, DEFAULT_PORT)) {
                    Ok(record) => {
                        record.status = ConnectionStatus::Request;
                        tracing::info!("{} wants to connect", ip);
                    }
                    Err(e) => tracing::warn!("{}", e),
                }
            }
        }
    }

    fn peer_disconnected(&self, addr: SocketAddr) {
        let Some(ip) = peer_ipv4(addr) else {
            return;
        };

        if let Some(record) = lock(&self.registry).get_mut(ip) {
            if record.status != ConnectionStatus::NotConnected {
                tracing::info!("Lost connection to {} ({})", ip, record.alias);
                record.status = ConnectionStatus::NotConnected;
            }
        }
    }
}

/// Connection registry plus transport engine.
#[derive(Debug)]
pub struct Session {
    registry: SharedRegistry,
    network: Network,
}

impl Session {
    /// Create a session from configuration. Nothing is bound until
    /// [`start`](Self::start).
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let registry: SharedRegistry = Arc::new(Mutex::new(ConnectionRegistry::new()));
        let events = Arc::new(SessionEvents {
            registry: Arc::clone(&registry),
        });

        Self {
            network: Network::new(config.network.clone(), events),
            registry,
        }
    }

    /// Start the transport engine. Returns the bound listening address.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine was already started or its port
    /// cannot be bound.
    pub fn start(&self) -> Result<SocketAddr> {
        self.network.start()
    }

    /// Stop the transport engine and close every link.
    pub async fn stop(&self) {
        self.network.stop().await;
    }

    /// The transport engine.
    #[must_use]
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Snapshot of every record, in creation order.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionRecord> {
        lock(&self.registry).iter().cloned().collect()
    }

    /// Snapshot of the record for `address`, if any.
    #[must_use]
    pub fn get_connection(&self, address: &str) -> Option<ConnectionRecord> {
        let ip = resolve(address)?;
        lock(&self.registry).get(ip).cloned()
    }

    /// Create a record for `address`, mark it `Pending` and dial the peer.
    ///
    /// If a record for the address already exists, this logs and does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if `address` is not an IPv4 address, or if the peer
    /// cannot be reached; the record then falls back to `NotConnected`.
    pub async fn new_connection(&self, alias: &str, address: &str) -> Result<()> {
        let target = parse_host_address(address)?;

        {
            let mut registry = lock(&self.registry);
            match registry.create(alias, target) {
                Ok(record) => record.status = ConnectionStatus::Pending,
                Err(e) => {
                    tracing::warn!("{}", e);
                    return Ok(());
                }
            }
        }

        tracing::info!("Requesting connection to {} ({})", target, clamp_alias(alias));
        self.dial(target).await
    }

    /// Ask a known, `NotConnected` peer to connect again.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer cannot be reached; the record then falls
    /// back to `NotConnected`.
    pub async fn request_connection(&self, address: &str) -> Result<()> {
        let Some(ip) = resolve(address) else {
            return Ok(());
        };

        let target = {
            let mut registry = lock(&self.registry);
            let Some(record) = registry.get_mut(ip) else {
                tracing::warn!("Cannot request connection: {}", Error::UnknownConnection(ip));
                return Ok(());
            };
            if record.status != ConnectionStatus::NotConnected {
                tracing::warn!("Cannot request connection to {}: {}", ip, record.status);
                return Ok(());
            }
            record.status = ConnectionStatus::Pending;
            record.socket_addr()
        };

        tracing::info!("Requesting connection to {}", target);
        self.dial(target).await
    }

    /// Accept a peer's request: `Request` becomes `Connected`.
    pub fn accept_connection(&self, address: &str) {
        if self
            .transition(address, ConnectionStatus::Request, ConnectionStatus::Connected)
            .is_some()
        {
            tracing::info!("Accepted connection from {}", address.trim());
        }
    }

    /// Withdraw our outstanding request: `Pending` becomes `NotConnected`.
    ///
    /// Any link already open to the peer is left alone.
    pub fn cancel_request(&self, address: &str) {
        if self
            .transition(address, ConnectionStatus::Pending, ConnectionStatus::NotConnected)
            .is_some()
        {
            tracing::info!("Cancelled request to {}", address.trim());
        }
    }

    /// Close every link to a connected peer: `Connected` becomes
    /// `NotConnected`.
    ///
    /// The peer learns about it as a lost link.
    pub fn disconnect(&self, address: &str) {
        if let Some(ip) = self.transition(
            address,
            ConnectionStatus::Connected,
            ConnectionStatus::NotConnected,
        ) {
            tracing::info!("Disconnecting from {}", ip);
            self.network.disconnect(IpAddr::V4(ip), None);
        }
    }

    /// Forget a peer, disconnecting first if it is connected.
    pub fn delete_connection(&self, address: &str) {
        let Some(ip) = resolve(address) else {
            return;
        };

        let connected = lock(&self.registry)
            .get(ip)
            .map(|record| record.status == ConnectionStatus::Connected);

        match connected {
            None => tracing::warn!("Cannot delete: {}", Error::UnknownConnection(ip)),
            Some(connected) => {
                if connected {
                    self.disconnect(address);
                }
                if let Some(record) = lock(&self.registry).delete(ip) {
                    tracing::info!("Deleted connection to {} ({})", ip, record.alias);
                }
            }
        }
    }

    /// Rename a peer. The alias is truncated to 15 characters.
    pub fn update_alias(&self, address: &str, alias: &str) {
        let Some(ip) = resolve(address) else {
            return;
        };

        match lock(&self.registry).get_mut(ip) {
            Some(record) => record.alias = clamp_alias(alias),
            None => tracing::warn!("Cannot rename: {}", Error::UnknownConnection(ip)),
        }
    }

    /// Bytes of the current clipboard value.
    #[must_use]
    pub fn clipboard_data(&self) -> Vec<u8> {
        self.network.current_clipboard().data.clone()
    }

    /// Kind of the current clipboard value.
    #[must_use]
    pub fn clipboard_data_type(&self) -> DataType {
        self.network.current_clipboard().data_type
    }

    /// Peer the current clipboard value came from (None = set locally).
    #[must_use]
    pub fn clipboard_data_owner(&self) -> Option<SocketAddr> {
        self.network.current_clipboard().owner
    }

    /// Set the clipboard locally and broadcast it to every live peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] if `data` exceeds the configured
    /// payload limit. The clipboard is left unchanged in that case.
    pub fn set_clipboard_data(&self, data: Vec<u8>, data_type: DataType) -> Result<()> {
        self.network.broadcast(data, data_type)
    }

    /// Watch clipboard changes.
    #[must_use]
    pub fn subscribe_clipboard(&self) -> watch::Receiver<Arc<ClipboardEntry>> {
        self.network.subscribe_clipboard()
    }

    /// Add stored records for addresses not already known.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_connections(&self, path: &Path) -> Result<usize> {
        let stored = ConnectionRegistry::load_from(path)?;

        let mut registry = lock(&self.registry);
        let mut added = 0;
        for record in stored.iter() {
            if registry.create(&record.alias, record.socket_addr()).is_ok() {
                added += 1;
            }
        }

        tracing::debug!("Loaded {} connections from {}", added, path.display());
        Ok(added)
    }

    /// Write every record to `path`. Statuses are not stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_connections(&self, path: &Path) -> Result<()> {
        let snapshot = lock(&self.registry).clone();
        snapshot.save_to(path)
    }

    /// Dial a record already marked `Pending`, reverting it on failure.
    async fn dial(&self, target: SocketAddrV4) -> Result<()> {
        let result = self.network.connect(SocketAddr::V4(target)).await;

        if result.is_err() {
            if let Some(record) = lock(&self.registry).get_mut(*target.ip()) {
                if record.status == ConnectionStatus::Pending {
                    record.status = ConnectionStatus::NotConnected;
                }
            }
        }

        result
    }

    /// Move the record for `address` from `from` to `to`.
    ///
    /// Returns the record's address if the transition happened.
    fn transition(
        &self,
        address: &str,
        from: ConnectionStatus,
        to: ConnectionStatus,
    ) -> Option<Ipv4Addr> {
        let ip = resolve(address)?;

        let mut registry = lock(&self.registry);
        let Some(record) = registry.get_mut(ip) else {
            tracing::warn!("{}", Error::UnknownConnection(ip));
            return None;
        };

        if record.status != from {
            tracing::warn!(
                "Connection to {} is {}, expected {}; ignoring",
                ip,
                record.status,
                from
            );
            return None;
        }

        record.status = to;
        Some(ip)
    }
}

/// Parse a user-supplied address, logging if it is invalid.
fn resolve(address: &str) -> Option<Ipv4Addr> {
    match parse_host_address(address) {
        Ok(addr) => Some(*addr.ip()),
        Err(e) => {
            tracing::warn!("{}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PEER: &str = "10.0.0.7";

    fn peer_addr() -> SocketAddr {
        "10.0.0.7:51000".parse().unwrap()
    }

    fn new_session() -> Session {
        let mut config = Config::default();
        config.network.port = 0;
        Session::new(&config)
    }

    fn events(session: &Session) -> SessionEvents {
        SessionEvents {
            registry: Arc::clone(&session.registry),
        }
    }

    fn status(session: &Session, address: &str) -> Option<ConnectionStatus> {
        session.get_connection(address).map(|record| record.status)
    }

    #[test]
    fn test_inbound_from_unknown_creates_request() {
        let session = new_session();
        events(&session).peer_connected(peer_addr());

        let record = session.get_connection(PEER).unwrap();
        assert_eq!(record.status, ConnectionStatus::Request);
        assert_eq!(record.alias, PEER);
        assert_eq!(record.port, DEFAULT_PORT);
    }

    #[test]
    fn test_accept_then_disconnect() {
        let session = new_session();
        events(&session).peer_connected(peer_addr());

        session.accept_connection(PEER);
        assert_eq!(status(&session, PEER), Some(ConnectionStatus::Connected));

        events(&session).peer_connected(peer_addr());
        assert_eq!(status(&session, PEER), Some(ConnectionStatus::Connected));

        session.disconnect(PEER);
        assert_eq!(status(&session, PEER), Some(ConnectionStatus::NotConnected));
    }

    #[test]
    fn test_inbound_for_pending_connects() {
        let session = new_session();
        lock(&session.registry)
            .create("desk", parse_host_address(PEER).unwrap())
            .unwrap()
            .status = ConnectionStatus::Pending;

        events(&session).peer_connected(peer_addr());
        assert_eq!(status(&session, PEER), Some(ConnectionStatus::Connected));
    }

    #[test]
    fn test_cancel_request_only_from_pending() {
        let session = new_session();
        lock(&session.registry)
            .create("desk", parse_host_address(PEER).unwrap())
            .unwrap()
            .status = ConnectionStatus::Pending;

        session.accept_connection(PEER);
        assert_eq!(status(&session, PEER), Some(ConnectionStatus::Pending));

        session.cancel_request(PEER);
        assert_eq!(status(&session, PEER), Some(ConnectionStatus::NotConnected));
    }

    #[tokio::test]
    async fn test_request_connection_only_from_not_connected() {
        let session = new_session();
        events(&session).peer_connected(peer_addr());

        session.request_connection(PEER).await.unwrap();
        assert_eq!(status(&session, PEER), Some(ConnectionStatus::Request));

        session.accept_connection(PEER);
        session.request_connection(PEER).await.unwrap();
        assert_eq!(status(&session, PEER), Some(ConnectionStatus::Connected));

        session.request_connection("10.0.0.99").await.unwrap();
        assert!(session.get_connection("10.0.0.99").is_none());
        assert!(session.network().live_peers().is_empty());
    }

    #[test]
    fn test_lost_link_resets_status() {
        let session = new_session();
        events(&session).peer_connected(peer_addr());
        session.accept_connection(PEER);

        events(&session).peer_disconnected(peer_addr());
        assert_eq!(status(&session, PEER), Some(ConnectionStatus::NotConnected));
    }

    #[test]
    fn test_unknown_address_operations_are_noops() {
        let session = new_session();
        events(&session).peer_connected(peer_addr());
        let before = session.connections();

        session.accept_connection("10.0.0.99");
        session.cancel_request("10.0.0.99");
        session.disconnect("10.0.0.99");
        session.delete_connection("10.0.0.99");
        session.update_alias("10.0.0.99", "ghost");
        session.accept_connection("not an address");

        assert_eq!(session.connections(), before);
        assert!(session.get_connection("10.0.0.99").is_none());
    }

    #[test]
    fn test_delete_and_rename() {
        let session = new_session();
        events(&session).peer_connected(peer_addr());

        session.update_alias(PEER, "living-room-laptop");
        assert_eq!(session.get_connection(PEER).unwrap().alias, "living-room-lap");

        session.delete_connection(PEER);
        assert!(session.get_connection(PEER).is_none());
        assert!(session.connections().is_empty());
    }

    #[test]
    fn test_set_clipboard_records_local_value() {
        let session = new_session();
        session.set_clipboard_data(b"copied text".to_vec(), DataType::Text).unwrap();

        assert_eq!(session.clipboard_data(), b"copied text");
        assert_eq!(session.clipboard_data_type(), DataType::Text);
        assert_eq!(session.clipboard_data_owner(), None);
    }

    #[test]
    fn test_connections_roundtrip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("connections.json");

        let session = new_session();
        events(&session).peer_connected(peer_addr());
        session.update_alias(PEER, "desk");
        session.save_connections(&path).unwrap();

        let restored = new_session();
        events(&restored).peer_connected("10.0.0.8:50000".parse().unwrap());
        assert_eq!(restored.load_connections(&path).unwrap(), 1);

        let records = restored.connections();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].alias, "desk");
        assert_eq!(records[1].status, ConnectionStatus::NotConnected);

        assert_eq!(restored.load_connections(&path).unwrap(), 0);
    }
}
