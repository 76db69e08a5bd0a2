//! One live socket to a peer.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::config::NetworkConfig;
use crate::error::Result;
use crate::protocol::{self, WireMessage};

/// A live connection to one peer.
///
/// Only the connection-management loop holds `PeerLink`s, so nothing here
/// needs to be shared across tasks.
#[derive(Debug)]
pub struct PeerLink {
    stream: TcpStream,
    peer_addr: SocketAddr,
    /// Raw bytes not yet consumed as frames
    buffer: Vec<u8>,
    recv_size: usize,
    max_payload: usize,
    send_timeout: Duration,
}

impl PeerLink {
    /// Wrap an established stream.
    #[must_use]
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, config: &NetworkConfig) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }

        Self {
            stream,
            peer_addr,
            buffer: Vec::with_capacity(config.recv_buffer_size),
            recv_size: config.recv_buffer_size.max(1),
            max_payload: config.max_payload_size,
            send_timeout: config.send_timeout,
        }
    }

    /// Address of the remote end.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Number of buffered bytes not yet returned as messages.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Wait until the socket may have data to read.
    pub async fn readable(&self) -> io::Result<()> {
        self.stream.readable().await
    }

    /// Non-blocking read of up to one buffer's worth of bytes.
    ///
    /// Returns `false` once the connection is lost: the peer closed it or the
    /// read failed. A read with nothing available yet is not a loss.
    pub fn receive(&mut self) -> bool {
        self.buffer.reserve(self.recv_size);
        match self.stream.try_read_buf(&mut self.buffer) {
            Ok(0) => {
                tracing::debug!("Peer {} closed the connection", self.peer_addr);
                false
            }
            Ok(n) => {
                tracing::trace!("Read {} bytes from {}", n, self.peer_addr);
                true
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
            Err(e) => {
                tracing::debug!("Read from {} failed: {}", self.peer_addr, e);
                false
            }
        }
    }

    /// Take the next complete message out of the receive buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffered bytes are not a valid frame.
    pub fn next_message(&mut self) -> Result<Option<WireMessage>> {
        protocol::decode_frame(&mut self.buffer, self.max_payload)
    }

    /// Write one message in full.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded or the write fails.
    pub async fn send(&mut self, message: &WireMessage) -> Result<()> {
        let frame = message.encode()?;
        self.send_frame(&frame).await
    }

    /// Write an already encoded frame in full.
    ///
    /// A peer that stops reading fills the socket buffer; the write gives up
    /// after the configured send timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or times out.
    pub async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        match tokio::time::timeout(self.send_timeout, self.stream.write_all(frame)).await {
            Ok(written) => written.map_err(Into::into),
            Err(_) => {
                tracing::debug!(
                    "Write of {} bytes to {} timed out after {:?}",
                    frame.len(),
                    self.peer_addr,
                    self.send_timeout
                );
                Err(io::Error::from(io::ErrorKind::TimedOut).into())
            }
        }
    }

    /// Shut the socket down and release it.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!("Shutdown of link to {} failed: {}", self.peer_addr, e);
        }
    }
}
