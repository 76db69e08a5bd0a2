//! Connection records and the connection registry.
//!
//! A [`ConnectionRecord`] is this device's belief about one peer: the alias
//! the user gave it, its IPv4 address, the port to dial, and where the
//! connection handshake currently stands. The [`ConnectionRegistry`] keeps
//! those records in creation order, one per address.
//!
//! ## Status
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `NotConnected` | No link, nothing in flight |
//! | `Pending` | We asked the peer to connect and wait for it to accept |
//! | `Request` | The peer asked us to connect and waits for us to accept |
//! | `Connected` | Link accepted |

use std::fmt;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::{DEFAULT_PORT, MAX_ALIAS_LENGTH};

/// Where a connection handshake stands, from this device's point of view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No link, nothing in flight
    #[default]
    NotConnected,
    /// We asked to connect, waiting for the remote to accept
    Pending,
    /// The remote asked to connect, waiting for us to accept
    Request,
    /// Link accepted
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotConnected => "not connected",
            Self::Pending => "pending",
            Self::Request => "request",
            Self::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// Local belief about one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Display alias (at most 15 characters)
    pub alias: String,
    /// Peer address, the record's identity
    pub address: Ipv4Addr,
    /// Port to dial when we initiate
    #[serde(default = "default_port")]
    pub port: u16,
    /// Current status (never persisted)
    #[serde(skip)]
    pub status: ConnectionStatus,
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ConnectionRecord {
    /// Create a record in the `NotConnected` state.
    #[must_use]
    pub fn new(alias: &str, address: SocketAddrV4) -> Self {
        Self {
            alias: clamp_alias(alias),
            address: *address.ip(),
            port: address.port(),
            status: ConnectionStatus::NotConnected,
        }
    }

    /// Socket address to dial for this peer.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.address, self.port)
    }
}

impl fmt::Display for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) Status: {}", self.address, self.alias, self.status)
    }
}

/// Truncate an alias to [`MAX_ALIAS_LENGTH`] characters.
#[must_use]
pub fn clamp_alias(alias: &str) -> String {
    let alias = alias.trim();
    if alias.chars().count() > MAX_ALIAS_LENGTH {
        tracing::debug!("Alias '{}' truncated to {} characters", alias, MAX_ALIAS_LENGTH);
    }
    alias.chars().take(MAX_ALIAS_LENGTH).collect()
}

/// On-disk form of the registry.
#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    /// Format version
    version: u32,
    /// Records in creation order
    connections: Vec<ConnectionRecord>,
}

/// Ordered directory of connection records keyed by address.
#[derive(Debug, Default, Clone)]
pub struct ConnectionRegistry {
    records: Vec<ConnectionRecord>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new `NotConnected` record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateConnection`] if a record for this address
    /// already exists; the existing record is left untouched.
    pub fn create(&mut self, alias: &str, address: SocketAddrV4) -> Result<&mut ConnectionRecord> {
        if self.get(*address.ip()).is_some() {
            return Err(Error::DuplicateConnection(*address.ip()));
        }
        self.records.push(ConnectionRecord::new(alias, address));
        let last = self.records.len() - 1;
        Ok(&mut self.records[last])
    }

    /// Look up the record for an address.
    #[must_use]
    pub fn get(&self, address: Ipv4Addr) -> Option<&ConnectionRecord> {
        self.records.iter().find(|r| r.address == address)
    }

    /// Look up the record for an address, mutably.
    pub fn get_mut(&mut self, address: Ipv4Addr) -> Option<&mut ConnectionRecord> {
        self.records.iter_mut().find(|r| r.address == address)
    }

    /// Remove the record for an address. No-op if absent.
    pub fn delete(&mut self, address: Ipv4Addr) -> Option<ConnectionRecord> {
        let index = self.records.iter().position(|r| r.address == address)?;
        Some(self.records.remove(index))
    }

    /// Records in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &ConnectionRecord> {
        self.records.iter()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Load a registry from a JSON file. A missing file yields an empty registry.
    ///
    /// Every loaded record starts out `NotConnected`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let file = fs::File::open(path).map_err(|e| {
            Error::RegistryError(format!(
                "Failed to open connection list at {}: {}",
                path.display(),
                e
            ))
        })?;

        let db: RegistryFile = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            Error::RegistryError(format!(
                "Failed to parse connection list at {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut registry = Self::new();
        for record in db.connections {
            let address = record.socket_addr();
            if let Err(e) = registry.create(&record.alias, address) {
                tracing::warn!("Skipping stored connection: {}", e);
            }
        }
        Ok(registry)
    }

    /// Write the registry to a JSON file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::RegistryError(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = fs::File::create(path).map_err(|e| {
            Error::RegistryError(format!(
                "Failed to create connection list at {}: {}",
                path.display(),
                e
            ))
        })?;

        let db = RegistryFile {
            version: 1,
            connections: self.records.clone(),
        };

        serde_json::to_writer_pretty(BufWriter::new(file), &db)
            .map_err(|e| Error::RegistryError(format!("Failed to write connection list: {e}")))
    }
}

/// Parse a host address string into a `SocketAddrV4`.
///
/// Accepts formats:
/// - `IP` (e.g., `192.168.1.100`) - uses default port 24749
/// - `IP:PORT` (e.g., `192.168.1.100:30000`) - uses specified port
///
/// # Examples
///
/// ```
/// use syncboard_core::connection::parse_host_address;
///
/// let addr = parse_host_address("192.168.1.100").unwrap();
/// assert_eq!(addr.port(), 24749);
///
/// let addr = parse_host_address("192.168.1.100:30000").unwrap();
/// assert_eq!(addr.port(), 30000);
/// ```
///
/// # Errors
///
/// Returns an error if the host string cannot be parsed.
pub fn parse_host_address(host: &str) -> Result<SocketAddrV4> {
    let host = host.trim();

    if let Ok(addr) = host.parse::<SocketAddrV4>() {
        return Ok(addr);
    }

    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(SocketAddrV4::new(ip, DEFAULT_PORT));
    }

    Err(Error::InvalidAddress(format!(
        "'{host}'. Use IP or IP:PORT (e.g., 192.168.1.100 or 192.168.1.100:24749)"
    )))
}
