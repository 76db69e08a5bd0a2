//! Error types for Syncboard.
//!
//! Most failures in Syncboard are absorbed by the background loops and only
//! show up as connection status changes. The variants here cover what does
//! reach a caller: outbound connect failures, local setup problems and
//! malformed input.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use thiserror::Error;

/// A specialized `Result` type for Syncboard operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Syncboard.
#[derive(Error, Debug)]
pub enum Error {
    /// Outbound connection could not be established (E001)
    #[error("failed to connect to {addr}: {source}")]
    ConnectionFailed {
        /// Address we tried to reach
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// Outbound connection did not complete in time (E002)
    #[error("connection to {0} timed out")]
    ConnectTimeout(SocketAddr),

    /// Listening socket could not be bound (E003)
    #[error("failed to listen on port {port}: {source}")]
    BindFailed {
        /// Requested port
        port: u16,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// Engine was already started once
    #[error("network engine already started")]
    AlreadyStarted,

    /// Engine is not running
    #[error("network engine is not running")]
    NotRunning,

    /// Address string could not be parsed
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A record for this address already exists
    #[error("a connection to {0} already exists")]
    DuplicateConnection(Ipv4Addr),

    /// No record for this address
    #[error("no connection to {0} exists")]
    UnknownConnection(Ipv4Addr),

    /// Malformed frame on the wire
    #[error("invalid protocol message: {0}")]
    ProtocolError(String),

    /// Frame payload exceeds the configured limit
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Connection list could not be read or written
    #[error("connection registry error: {0}")]
    RegistryError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::ConnectionFailed { .. } => Some("E001"),
            Self::ConnectTimeout(_) => Some("E002"),
            Self::BindFailed { .. } => Some("E003"),
            _ => None,
        }
    }

    /// Returns whether this error is recoverable (can be retried).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::ConnectTimeout(_)
        )
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::ConnectionFailed { .. } | Self::ConnectTimeout(_) => Some(
                "Make sure syncboard is running on the other device and that\n\
                 its port (default 24749) is reachable from this network.",
            ),
            Self::BindFailed { .. } => Some(
                "Another program (or another syncboard) is using this port.\n\
                 Pick a different one with --port or in config.toml.",
            ),
            _ => None,
        }
    }
}
