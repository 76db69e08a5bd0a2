//! Transport engine.
//!
//! A [`Network`] listens for inbound TCP connections, dials outbound ones on
//! request, broadcasts clipboard updates to every live peer and records the
//! most recent update, local or received.
//!
//! ## Tasks
//!
//! Starting the engine spawns two tasks:
//!
//! - The **acceptor** waits on the listening socket with a bounded timeout,
//!   reports each inbound connection through [`NetworkEvents::peer_connected`]
//!   and hands the new link to the connection manager.
//! - The **connection manager** is the only owner of live links. Each
//!   iteration it, in order, sends queued outbound messages to every link,
//!   waits (bounded) for one readable link and reads from it, adopts newly
//!   queued links and applies queued disconnect requests.
//!
//! Every other thread of control talks to the manager through unbounded
//! queues, so no lock guards the link set.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use syncboard_core::config::NetworkConfig;
//! use syncboard_core::network::Network;
//! use syncboard_core::protocol::DataType;
//!
//! let network = Network::new(NetworkConfig::default(), Arc::new(()));
//! network.start()?;
//! network.connect("192.168.1.20:24749".parse()?).await?;
//! network.broadcast(b"hello".to_vec(), DataType::Text)?;
//! network.stop().await;
//! ```

mod link;

pub use link::PeerLink;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::select_all;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::protocol::{DataType, WireMessage};

/// Pending-connection backlog of the listening socket
const LISTEN_BACKLOG: i32 = 5;

/// Notifications raised by the engine's background tasks.
///
/// Handlers run on the engine's tasks and must not block.
pub trait NetworkEvents: Send + Sync + 'static {
    /// An inbound connection was accepted.
    fn peer_connected(&self, _addr: SocketAddr) {}

    /// A live link was lost: the peer closed it or a read or send failed.
    ///
    /// Not raised for links closed by [`Network::disconnect`] or
    /// [`Network::stop`].
    fn peer_disconnected(&self, _addr: SocketAddr) {}

    /// A clipboard update arrived from a peer.
    fn message_received(&self, _addr: SocketAddr, _message: &WireMessage) {}
}

impl NetworkEvents for () {}

/// The most recent clipboard value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClipboardEntry {
    /// Clipboard bytes
    pub data: Vec<u8>,
    /// Kind of data
    pub data_type: DataType,
    /// Peer the value came from (None = set locally)
    pub owner: Option<SocketAddr>,
}

/// Request to close live links matching an address.
#[derive(Debug, Clone, Copy)]
struct DisconnectRequest {
    ip: IpAddr,
    /// Only close the link with this remote port (None = all links to `ip`)
    port: Option<u16>,
}

impl DisconnectRequest {
    fn matches(&self, addr: SocketAddr) -> bool {
        addr.ip() == self.ip && self.port.is_none_or(|port| port == addr.port())
    }
}

impl fmt::Display for DisconnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.ip, port),
            None => write!(f, "{}", self.ip),
        }
    }
}

/// Receiving ends of the manager's request queues.
struct ManagerQueues {
    outbound: mpsc::UnboundedReceiver<WireMessage>,
    links: mpsc::UnboundedReceiver<PeerLink>,
    disconnects: mpsc::UnboundedReceiver<DisconnectRequest>,
}

enum EngineState {
    /// Not started yet; the queues wait for the manager
    Idle(ManagerQueues),
    Running {
        local_addr: SocketAddr,
        acceptor: JoinHandle<()>,
        manager: JoinHandle<()>,
    },
    Stopped,
}

/// Peer-to-peer clipboard transport.
pub struct Network {
    config: NetworkConfig,
    /// Generation identifier stamped on every outgoing message
    uid: u32,
    sequence: AtomicU64,
    events: Arc<dyn NetworkEvents>,
    running: Arc<AtomicBool>,
    clipboard: Arc<watch::Sender<Arc<ClipboardEntry>>>,
    peers: Arc<watch::Sender<Vec<SocketAddr>>>,
    outbound_tx: mpsc::UnboundedSender<WireMessage>,
    link_tx: mpsc::UnboundedSender<PeerLink>,
    disconnect_tx: mpsc::UnboundedSender<DisconnectRequest>,
    state: Mutex<EngineState>,
}

impl Network {
    /// Create an engine. Nothing is bound until [`start`](Self::start).
    pub fn new(config: NetworkConfig, events: Arc<dyn NetworkEvents>) -> Self {
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (link_tx, links) = mpsc::unbounded_channel();
        let (disconnect_tx, disconnects) = mpsc::unbounded_channel();
        let (clipboard, _) = watch::channel(Arc::new(ClipboardEntry::default()));
        let (peers, _) = watch::channel(Vec::new());

        Self {
            config,
            uid: rand::random(),
            sequence: AtomicU64::new(0),
            events,
            running: Arc::new(AtomicBool::new(false)),
            clipboard: Arc::new(clipboard),
            peers: Arc::new(peers),
            outbound_tx,
            link_tx,
            disconnect_tx,
            state: Mutex::new(EngineState::Idle(ManagerQueues {
                outbound,
                links,
                disconnects,
            })),
        }
    }

    /// Bind the listening socket and spawn the acceptor and connection
    /// manager. Returns the bound address.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] if the engine was started before,
    /// or [`Error::BindFailed`] if the port cannot be bound. A failed bind
    /// leaves the engine startable.
    pub fn start(&self) -> Result<SocketAddr> {
        let mut state = self.lock_state();
        let queues = match std::mem::replace(&mut *state, EngineState::Stopped) {
            EngineState::Idle(queues) => queues,
            other => {
                *state = other;
                return Err(Error::AlreadyStarted);
            }
        };

        let (listener, local_addr) = match bind_listener(self.config.port) {
            Ok(bound) => bound,
            Err(e) => {
                *state = EngineState::Idle(queues);
                return Err(e);
            }
        };

        self.running.store(true, Ordering::SeqCst);

        let acceptor = tokio::spawn(accept_loop(Acceptor {
            listener,
            running: Arc::clone(&self.running),
            events: Arc::clone(&self.events),
            link_tx: self.link_tx.clone(),
            config: self.config.clone(),
        }));

        let manager = tokio::spawn(
            ConnectionManager {
                links: Vec::new(),
                queues,
                running: Arc::clone(&self.running),
                events: Arc::clone(&self.events),
                clipboard: Arc::clone(&self.clipboard),
                peers: Arc::clone(&self.peers),
                poll_interval: self.config.poll_interval,
            }
            .run(),
        );

        *state = EngineState::Running {
            local_addr,
            acceptor,
            manager,
        };

        tracing::info!("Network engine listening on {} (uid {:08x})", local_addr, self.uid);
        Ok(local_addr)
    }

    /// Stop both tasks and close every live link.
    ///
    /// Returns once both tasks have exited. No-op if the engine is not
    /// running.
    pub async fn stop(&self) {
        let handles = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, EngineState::Stopped) {
                EngineState::Running {
                    acceptor, manager, ..
                } => Some((acceptor, manager)),
                other => {
                    *state = other;
                    None
                }
            }
        };

        let Some((acceptor, manager)) = handles else {
            return;
        };

        self.running.store(false, Ordering::SeqCst);

        for (name, handle) in [("acceptor", acceptor), ("connection manager", manager)] {
            if let Err(e) = handle.await {
                tracing::warn!("Network {} task failed: {}", name, e);
            }
        }

        tracing::info!("Network engine stopped");
    }

    /// Dial a peer and queue the new link for the connection manager.
    ///
    /// [`NetworkEvents::peer_connected`] is not raised for outbound links.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`] or [`Error::ConnectTimeout`] if
    /// the peer cannot be reached, and [`Error::NotRunning`] if the engine
    /// has been stopped.
    pub async fn connect(&self, addr: SocketAddr) -> Result<()> {
        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                tracing::warn!("Failed to connect to {}: {}", addr, source);
                return Err(Error::ConnectionFailed { addr, source });
            }
            Err(_) => {
                tracing::warn!("Connection to {} timed out", addr);
                return Err(Error::ConnectTimeout(addr));
            }
        };

        let peer_addr = stream.peer_addr().unwrap_or(addr);
        tracing::info!("Connected to {}", peer_addr);

        self.link_tx
            .send(PeerLink::new(stream, peer_addr, &self.config))
            .map_err(|_| Error::NotRunning)
    }

    /// Close every live link to `ip`, or only the one with remote `port`.
    ///
    /// Applied asynchronously by the connection manager. No-op if nothing
    /// matches.
    pub fn disconnect(&self, ip: IpAddr, port: Option<u16>) {
        let request = DisconnectRequest { ip, port };
        tracing::debug!("Queueing disconnect from {}", request);
        if self.disconnect_tx.send(request).is_err() {
            tracing::debug!("Disconnect from {} dropped: engine stopped", request);
        }
    }

    /// Record a local clipboard update and queue it for every live peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] if `data` exceeds the configured
    /// `max_payload_size`. Nothing is recorded or sent in that case.
    pub fn broadcast(&self, data: Vec<u8>, data_type: DataType) -> Result<()> {
        if data.len() > self.config.max_payload_size || u32::try_from(data.len()).is_err() {
            tracing::warn!(
                "Not sharing {} bytes: limit is {} bytes",
                data.len(),
                self.config.max_payload_size
            );
            return Err(Error::PayloadTooLarge(data.len()));
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let message = WireMessage::new(data.clone(), data_type).stamped(self.uid, sequence);

        self.clipboard.send_replace(Arc::new(ClipboardEntry {
            data,
            data_type,
            owner: None,
        }));

        tracing::debug!(
            "Outbound: {} bytes of {} (seq {})",
            message.payload.len(),
            data_type,
            sequence
        );

        if self.outbound_tx.send(message).is_err() {
            tracing::debug!("Broadcast not sent: engine stopped");
        }
        Ok(())
    }

    /// Most recent clipboard value, local or received.
    #[must_use]
    pub fn current_clipboard(&self) -> Arc<ClipboardEntry> {
        self.clipboard.borrow().clone()
    }

    /// Watch clipboard changes.
    #[must_use]
    pub fn subscribe_clipboard(&self) -> watch::Receiver<Arc<ClipboardEntry>> {
        self.clipboard.subscribe()
    }

    /// Remote addresses of the live links, as of the manager's last change.
    #[must_use]
    pub fn live_peers(&self) -> Vec<SocketAddr> {
        self.peers.borrow().clone()
    }

    /// Address the listener is bound to, if running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.lock_state() {
            EngineState::Running { local_addr, .. } => Some(*local_addr),
            _ => None,
        }
    }

    /// Generation identifier stamped on outgoing messages.
    #[must_use]
    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// Whether the background tasks are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("uid", &format_args!("{:08x}", self.uid))
            .field("local_addr", &self.local_addr())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// The IPv4 address behind a peer address, unwrapping IPv4-mapped IPv6.
#[must_use]
pub fn peer_ipv4(addr: SocketAddr) -> Option<Ipv4Addr> {
    match addr.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(ip) => ip.to_ipv4_mapped(),
    }
}

fn bind_listener(port: u16) -> Result<(TcpListener, SocketAddr)> {
    let bind = || -> std::io::Result<(TcpListener, SocketAddr)> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;

        let listener = TcpListener::from_std(socket.into())?;
        let local_addr = listener.local_addr()?;
        Ok((listener, local_addr))
    };

    bind().map_err(|source| Error::BindFailed { port, source })
}

struct Acceptor {
    listener: TcpListener,
    running: Arc<AtomicBool>,
    events: Arc<dyn NetworkEvents>,
    link_tx: mpsc::UnboundedSender<PeerLink>,
    config: NetworkConfig,
}

async fn accept_loop(acceptor: Acceptor) {
    tracing::debug!("Acceptor started");

    while acceptor.running.load(Ordering::SeqCst) {
        match timeout(acceptor.config.poll_interval, acceptor.listener.accept()).await {
            Err(_) => {}
            Ok(Ok((stream, peer_addr))) => {
                tracing::info!("Connection from {}", peer_addr);
                acceptor.events.peer_connected(peer_addr);

                let link = PeerLink::new(stream, peer_addr, &acceptor.config);
                if acceptor.link_tx.send(link).is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("Failed to accept connection: {}", e);
            }
        }
    }

    tracing::debug!("Acceptor stopped");
}

/// Sole owner of the live links.
struct ConnectionManager {
    links: Vec<PeerLink>,
    queues: ManagerQueues,
    running: Arc<AtomicBool>,
    events: Arc<dyn NetworkEvents>,
    clipboard: Arc<watch::Sender<Arc<ClipboardEntry>>>,
    peers: Arc<watch::Sender<Vec<SocketAddr>>>,
    poll_interval: Duration,
}

impl ConnectionManager {
    async fn run(mut self) {
        tracing::debug!("Connection manager started");

        while self.running.load(Ordering::SeqCst) {
            self.flush_outbound().await;
            self.poll_links().await;
            self.adopt_links();
            self.apply_disconnects().await;
        }

        for link in std::mem::take(&mut self.links) {
            link.close().await;
        }
        self.publish_peers();

        tracing::debug!("Connection manager stopped");
    }

    /// Send every queued message to every live link.
    ///
    /// A message that cannot be encoded is dropped; the links stay up.
    async fn flush_outbound(&mut self) {
        while let Ok(message) = self.queues.outbound.try_recv() {
            let frame = match message.encode() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(
                        "Dropping outbound message (seq {}): {}",
                        message.sequence_number,
                        e
                    );
                    continue;
                }
            };

            let mut failed = Vec::new();
            for (index, link) in self.links.iter_mut().enumerate() {
                if let Err(e) = link.send_frame(&frame).await {
                    tracing::warn!("Failed to send to {}: {}", link.peer_addr(), e);
                    failed.push(index);
                }
            }

            for index in failed.into_iter().rev() {
                self.drop_link(index).await;
            }
        }
    }

    /// Wait up to one poll interval for a readable link and read from it.
    async fn poll_links(&mut self) {
        if self.links.is_empty() {
            tokio::time::sleep(self.poll_interval).await;
            return;
        }

        let ready = {
            let readiness = self.links.iter().map(|link| Box::pin(link.readable()));
            timeout(self.poll_interval, select_all(readiness))
                .await
                .map(|(result, index, _)| (result, index))
        };

        let Ok((readiness, index)) = ready else {
            return;
        };

        if readiness.is_err() || !self.links[index].receive() {
            tracing::info!("Lost connection to {}", self.links[index].peer_addr());
            self.drop_link(index).await;
            return;
        }

        loop {
            match self.links[index].next_message() {
                Ok(Some(message)) => self.deliver(self.links[index].peer_addr(), message),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        "Dropping {} after invalid frame: {}",
                        self.links[index].peer_addr(),
                        e
                    );
                    self.drop_link(index).await;
                    break;
                }
            }
        }
    }

    fn deliver(&self, from: SocketAddr, message: WireMessage) {
        tracing::debug!(
            "Inbound: {} bytes of {} from {} (uid {:08x}, seq {})",
            message.payload.len(),
            message.data_type,
            from,
            message.uid,
            message.sequence_number
        );

        self.events.message_received(from, &message);

        self.clipboard.send_replace(Arc::new(ClipboardEntry {
            data: message.payload,
            data_type: message.data_type,
            owner: Some(from),
        }));
    }

    fn adopt_links(&mut self) {
        let mut adopted = false;
        while let Ok(link) = self.queues.links.try_recv() {
            tracing::debug!("Tracking link to {}", link.peer_addr());
            self.links.push(link);
            adopted = true;
        }

        if adopted {
            self.publish_peers();
        }
    }

    async fn apply_disconnects(&mut self) {
        while let Ok(request) = self.queues.disconnects.try_recv() {
            let (closing, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.links)
                .into_iter()
                .partition(|link| request.matches(link.peer_addr()));
            self.links = kept;

            if closing.is_empty() {
                tracing::debug!("No live link to {}", request);
                continue;
            }

            for link in closing {
                tracing::info!("Disconnected from {}", link.peer_addr());
                link.close().await;
            }
            self.publish_peers();
        }
    }

    /// Tear down a lost link and report it.
    async fn drop_link(&mut self, index: usize) {
        let link = self.links.remove(index);
        let addr = link.peer_addr();
        link.close().await;
        self.publish_peers();
        self.events.peer_disconnected(addr);
    }

    fn publish_peers(&self) {
        let addrs = self.links.iter().map(PeerLink::peer_addr).collect();
        self.peers.send_replace(addrs);
    }
}
