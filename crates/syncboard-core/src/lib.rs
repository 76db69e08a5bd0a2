//! # Syncboard Core Library
//!
//! `syncboard-core` keeps one shared clipboard value synchronized between a
//! set of peers on the local network.
//!
//! ## Features
//!
//! - **Peer-to-peer**: every peer both listens for and opens connections
//! - **Broadcast sync**: a clipboard update is pushed to every connected peer
//! - **Explicit connection lifecycle**: request, accept, cancel, disconnect
//! - **Single-owner I/O loop**: one task owns every live socket
//!
//! ## Modules
//!
//! - [`config`] - Configuration management
//! - [`connection`] - Connection records, statuses and the connection registry
//! - [`network`] - Transport engine (acceptor and connection-management loops)
//! - [`protocol`] - Wire message framing
//! - [`session`] - Session façade consumed by front-ends
//!
//! ## Example
//!
//! ```rust,ignore
//! use syncboard_core::config::Config;
//! use syncboard_core::session::Session;
//!
//! let session = Session::new(&Config::load()?);
//! session.start()?;
//! session.new_connection("laptop", "192.168.1.20").await?;
//! session.set_clipboard_data(b"hello".to_vec(), DataType::Text);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod connection;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire protocol version (major, minor)
pub const PROTOCOL_VERSION: (u8, u8) = (1, 0);

/// Default listening port (TCP)
pub const DEFAULT_PORT: u16 = 24749;

/// Default bounded wait for accept and readiness checks, in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

/// Default number of bytes requested per socket read
pub const DEFAULT_RECV_SIZE: usize = 4096;

/// Maximum alias length in characters
pub const MAX_ALIAS_LENGTH: usize = 15;
