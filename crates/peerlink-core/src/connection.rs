//! Point-to-point peer connection.
//!
//! A [`PeerConnection`] owns everything for one link to one peer:
//! - the accept socket (server role) or pending connect (client role),
//! - the active socket once a peer is attached,
//! - a send queue filled by the application and drained by the dispatch loop,
//! - a receive queue filled by the dispatch loop and drained by the application,
//! - the dispatch thread itself.
//!
//! Setup runs on short-lived background threads and reports failures through
//! the error handler. Once `Connected`, [`PeerConnection::run_work_async`]
//! starts the single dispatch thread (see [`crate::dispatch`]). Application
//! calls only touch the in-memory queues and never block on the socket.
//!
//! Every setup attempt is stamped with a generation number. `close()` bumps
//! it, so an accept or connect that completes after the connection was closed
//! is discarded instead of installed.

use crate::config::{PeerConfig, ReconnectPolicy};
use crate::dispatch::Dispatcher;
use crate::error::{ConnectionError, Error, ErrorCategory, Result};
use crate::packet_queue::PacketQueue;
use crate::state::{ConnectionState, Role};
use peerlink_transport::{
    ConnectCancel, TcpAcceptor, TcpConnector, TransportStats, TransportStatsRecorder,
    shutdown_stream,
};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Callback receiving asynchronous connection failures
pub type ErrorHandler = Arc<dyn Fn(ConnectionError) + Send + Sync>;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the caller and the background threads.
///
/// Lock order: `state` before any socket slot. The error handler is never
/// invoked while a lock is held.
pub(crate) struct Shared {
    pub(crate) state: Mutex<ConnectionState>,
    pub(crate) active: Mutex<Option<Arc<TcpStream>>>,
    acceptor: Mutex<Option<Arc<TcpAcceptor>>>,
    connecting: Mutex<Option<ConnectCancel>>,
    pub(crate) send_queue: Mutex<PacketQueue>,
    pub(crate) recv_queue: Mutex<PacketQueue>,
    pub(crate) running: AtomicBool,
    generation: AtomicU64,
    error_handler: Mutex<Option<ErrorHandler>>,
    pub(crate) stats: TransportStatsRecorder,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            active: Mutex::new(None),
            acceptor: Mutex::new(None),
            connecting: Mutex::new(None),
            send_queue: Mutex::new(PacketQueue::new()),
            recv_queue: Mutex::new(PacketQueue::new()),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            error_handler: Mutex::new(None),
            stats: TransportStatsRecorder::new(),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Deliver an asynchronous failure to the error handler.
    pub(crate) fn report(&self, err: ConnectionError) {
        warn!("Connection {}", err);
        let handler = lock(&self.error_handler).clone();
        if let Some(handler) = handler {
            handler(err);
        }
    }

    /// Make `stream` the active socket if its setup attempt is still current.
    fn install(&self, generation: u64, stream: TcpStream) -> bool {
        let mut state = lock(&self.state);
        if !self.is_current(generation) || *state != ConnectionState::Connecting {
            shutdown_stream(&stream);
            return false;
        }

        lock(&self.connecting).take();
        *lock(&self.active) = Some(Arc::new(stream));
        *state = ConnectionState::Connected;
        true
    }

    /// Return a failed setup attempt to `Disconnected` if it is still current.
    fn abandon_setup(&self, generation: u64) {
        let mut state = lock(&self.state);
        if self.is_current(generation) && *state == ConnectionState::Connecting {
            self.release_sockets();
            *state = ConnectionState::Disconnected;
        }
    }

    /// Tear down after the dispatch loop failed.
    pub(crate) fn fail_dispatch(&self, generation: u64, err: Error) {
        self.running.store(false, Ordering::Release);
        {
            let mut state = lock(&self.state);
            if self.is_current(generation) && *state == ConnectionState::Connected {
                self.release_sockets();
                *state = ConnectionState::Disconnected;
                info!("Connection torn down after dispatch failure");
            }
        }
        self.report(ConnectionError::new(ErrorCategory::Dispatch, err));
    }

    /// Shut down and drop every socket, ignoring already-closed errors.
    fn release_sockets(&self) {
        if let Some(stream) = lock(&self.active).take() {
            shutdown_stream(&stream);
        }
        if let Some(acceptor) = lock(&self.acceptor).take() {
            acceptor.shutdown();
        }
        if let Some(cancel) = lock(&self.connecting).take() {
            cancel.cancel();
        }
    }
}

/// One end of a point-to-point packet link
///
/// # Example
///
/// ```no_run
/// use peerlink_core::{PeerConfig, PeerConnection};
/// use std::thread;
/// use std::time::Duration;
///
/// let server = PeerConnection::server(PeerConfig::default())?;
/// server.start_server(54321)?;
///
/// let client = PeerConnection::client(PeerConfig::default())?;
/// client.connect_async("127.0.0.1:54321".parse().unwrap())?;
///
/// while !(server.is_connected() && client.is_connected()) {
///     thread::sleep(Duration::from_millis(10));
/// }
/// server.run_work_async()?;
/// client.run_work_async()?;
///
/// client.send(&42i32.to_le_bytes())?;
/// loop {
///     if let Some(packet) = server.receive()? {
///         assert_eq!(packet, 42i32.to_le_bytes());
///         break;
///     }
///     thread::sleep(Duration::from_millis(10));
/// }
///
/// client.close();
/// server.close();
/// # Ok::<(), peerlink_core::Error>(())
/// ```
pub struct PeerConnection {
    role: Role,
    config: PeerConfig,
    shared: Arc<Shared>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl PeerConnection {
    /// Create a disconnected connection for `role`.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` if `config` does not validate.
    pub fn new(role: Role, config: PeerConfig) -> Result<Self> {
        config.validate()?;

        debug!(
            "Creating {} connection (packet size {}, {:?} framing)",
            role, config.packet_size, config.framing
        );

        Ok(Self {
            role,
            config,
            shared: Arc::new(Shared::new()),
            dispatch: Mutex::new(None),
        })
    }

    /// Create a server-role connection.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` if `config` does not validate.
    pub fn server(config: PeerConfig) -> Result<Self> {
        Self::new(Role::Server, config)
    }

    /// Create a client-role connection.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` if `config` does not validate.
    pub fn client(config: PeerConfig) -> Result<Self> {
        Self::new(Role::Client, config)
    }

    /// Install `handler` and return the connection.
    #[must_use]
    pub fn with_error_handler<F>(self, handler: F) -> Self
    where
        F: Fn(ConnectionError) + Send + Sync + 'static,
    {
        self.set_error_handler(handler);
        self
    }

    /// Replace the handler receiving start, accept, connect and dispatch errors.
    ///
    /// The handler runs on the background thread that hit the failure. It may
    /// call back into this connection, including `close()`.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(ConnectionError) + Send + Sync + 'static,
    {
        *lock(&self.shared.error_handler) = Some(Arc::new(handler));
    }

    // ============ Setup ============

    /// Listen on `0.0.0.0:port` and accept one peer in the background.
    ///
    /// Bind failures go to the error handler as [`ErrorCategory::Start`],
    /// accept failures as [`ErrorCategory::Accept`]; either leaves the
    /// connection `Disconnected`.
    ///
    /// # Errors
    /// Returns `Error::RoleMismatch` for a client connection and
    /// `Error::InvalidState` unless the connection is `Disconnected`.
    pub fn start_server(&self, port: u16) -> Result<()> {
        self.start_server_on(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }

    /// Like [`PeerConnection::start_server`] with an explicit bind address.
    ///
    /// # Errors
    /// Returns `Error::RoleMismatch` for a client connection and
    /// `Error::InvalidState` unless the connection is `Disconnected`.
    pub fn start_server_on(&self, addr: SocketAddr) -> Result<()> {
        self.require_role(Role::Server, "start_server")?;
        let generation = self.begin_setup("start_server")?;

        let acceptor = match TcpAcceptor::bind(addr, &self.config.transport) {
            Ok(acceptor) => Arc::new(acceptor),
            Err(e) => {
                self.shared.abandon_setup(generation);
                self.shared
                    .report(ConnectionError::new(ErrorCategory::Start, e));
                return Ok(());
            }
        };

        {
            let _state = lock(&self.shared.state);
            if !self.shared.is_current(generation) {
                acceptor.shutdown();
                return Ok(());
            }
            *lock(&self.shared.acceptor) = Some(acceptor.clone());
        }

        info!("Server waiting for a peer on {}", acceptor.local_addr());

        let shared = self.shared.clone();
        let transport = self.config.transport.clone();
        let spawned = thread::Builder::new()
            .name("peerlink-accept".to_string())
            .spawn(move || match acceptor.accept(&transport) {
                Ok((stream, peer)) => {
                    if shared.install(generation, stream) {
                        info!("Server: peer {} connected", peer);
                    } else {
                        debug!("Discarding connection from {} accepted after close", peer);
                    }
                }
                Err(e) => {
                    shared.abandon_setup(generation);
                    shared.report(ConnectionError::new(ErrorCategory::Accept, e));
                }
            });

        if let Err(e) = spawned {
            self.shared.abandon_setup(generation);
            self.shared
                .report(ConnectionError::new(ErrorCategory::Accept, e));
        }

        Ok(())
    }

    /// Connect to `endpoint` in the background.
    ///
    /// Failures go to the error handler as [`ErrorCategory::Connect`] and leave
    /// the connection `Disconnected`, ready for another attempt.
    ///
    /// # Errors
    /// Returns `Error::RoleMismatch` for a server connection and
    /// `Error::InvalidState` unless the connection is `Disconnected`.
    pub fn connect_async(&self, endpoint: SocketAddr) -> Result<()> {
        self.require_role(Role::Client, "connect_async")?;
        let generation = self.begin_setup("connect_async")?;

        let connector = match TcpConnector::new(endpoint, &self.config.transport) {
            Ok(connector) => connector,
            Err(e) => {
                self.shared.abandon_setup(generation);
                self.shared
                    .report(ConnectionError::new(ErrorCategory::Connect, e));
                return Ok(());
            }
        };

        match connector.cancel_handle() {
            Ok(cancel) => {
                let _state = lock(&self.shared.state);
                if !self.shared.is_current(generation) {
                    return Ok(());
                }
                *lock(&self.shared.connecting) = Some(cancel);
            }
            Err(e) => warn!("Connect to {} cannot be interrupted: {}", endpoint, e),
        }

        info!("Client connecting to {}", endpoint);

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("peerlink-connect".to_string())
            .spawn(move || match connector.connect() {
                Ok(stream) => {
                    if shared.install(generation, stream) {
                        info!("Client: connected to {}", endpoint);
                    } else {
                        debug!("Discarding connection to {} completed after close", endpoint);
                    }
                }
                Err(e) => {
                    shared.abandon_setup(generation);
                    shared.report(ConnectionError::new(ErrorCategory::Connect, e));
                }
            });

        if let Err(e) = spawned {
            self.shared.abandon_setup(generation);
            self.shared
                .report(ConnectionError::new(ErrorCategory::Connect, e));
        }

        Ok(())
    }

    // ============ Dispatch ============

    /// Start the dispatch loop with the configured poll interval.
    ///
    /// # Errors
    /// Returns `Error::InvalidState` unless `Connected`, and
    /// `Error::DispatchRunning` if a loop is already running.
    pub fn run_work_async(&self) -> Result<()> {
        self.run_work_async_with(self.config.poll_interval)
    }

    /// Start the dispatch loop, sleeping `poll_interval` between cycles.
    ///
    /// # Errors
    /// Returns `Error::InvalidState` unless `Connected`, and
    /// `Error::DispatchRunning` if a loop is already running.
    pub fn run_work_async_with(&self, poll_interval: Duration) -> Result<()> {
        if self.shared.running.load(Ordering::Acquire) {
            return Err(Error::DispatchRunning);
        }

        // A loop that stopped on its own may still be inside the error handler.
        self.join_dispatch();

        let (stream, generation) = {
            let state = lock(&self.shared.state);
            if *state != ConnectionState::Connected {
                return Err(Error::InvalidState {
                    operation: "run_work_async",
                    state: *state,
                });
            }
            if self.shared.running.swap(true, Ordering::AcqRel) {
                return Err(Error::DispatchRunning);
            }
            let stream = lock(&self.shared.active).clone();
            (stream, self.shared.generation.load(Ordering::Acquire))
        };

        let Some(stream) = stream else {
            self.shared.running.store(false, Ordering::Release);
            return Err(Error::InvalidState {
                operation: "run_work_async",
                state: ConnectionState::Disconnected,
            });
        };

        let dispatcher = Dispatcher::new(
            self.shared.clone(),
            stream,
            generation,
            &self.config,
            poll_interval,
        );

        let handle = thread::Builder::new()
            .name("peerlink-dispatch".to_string())
            .spawn(move || dispatcher.run())
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                Error::Io(e)
            })?;

        *lock(&self.dispatch) = Some(handle);
        Ok(())
    }

    // ============ Data ============

    /// Queue `data` as one packet for the dispatch loop to send.
    ///
    /// Returns the number of bytes queued. Never blocks on the socket.
    ///
    /// # Errors
    /// Returns `Error::InvalidPacketSize` if `data` is empty or longer than the
    /// packet-size limit (checked first), and `Error::InvalidState` unless
    /// `Connected`. The send queue is unchanged on error.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        let max = self.config.packet_size;
        if data.is_empty() || data.len() > max {
            return Err(Error::InvalidPacketSize {
                size: data.len(),
                max,
            });
        }
        self.require_connected("send")?;

        Ok(lock(&self.shared.send_queue).enqueue(data))
    }

    /// Take the next received packet, or `None` if nothing has arrived.
    ///
    /// Packets that arrived before the connection went down stay readable
    /// until a new setup starts.
    ///
    /// # Errors
    /// Returns `Error::InvalidState` unless `Connected` or packets remain queued.
    pub fn receive(&self) -> Result<Option<Vec<u8>>> {
        let mut queue = self.received_queue()?;
        match queue.peek_size() {
            Some(size) if size > 0 => Ok(queue.dequeue_vec()),
            _ => Ok(None),
        }
    }

    /// Copy the next received packet into `buf`, returning its length.
    ///
    /// # Errors
    /// Returns `Error::InvalidState` unless `Connected` or packets remain
    /// queued, and `Error::BufferTooSmall` (leaving the packet queued) if
    /// `buf` is too short.
    pub fn receive_into(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        let mut queue = self.received_queue()?;
        match queue.peek_size() {
            Some(size) if size > 0 => queue.dequeue(buf),
            _ => Ok(None),
        }
    }

    // ============ Lifecycle ============

    /// Stop the dispatch loop and release all sockets.
    ///
    /// Joins the dispatch thread before any socket is touched, so no queue is
    /// modified by this connection's background threads once `close` returns.
    /// Pending accept/connect attempts are interrupted. Calling `close` again
    /// is a no-op.
    ///
    /// A dispatch thread blocked writing to a peer that stopped reading holds
    /// `close` for up to the transport's `write_timeout`; with no write
    /// timeout it waits until the peer reads or drops the connection.
    pub fn close(&self) {
        let previous = {
            let state = lock(&self.shared.state);
            self.shared.generation.fetch_add(1, Ordering::AcqRel);
            self.shared.running.store(false, Ordering::Release);
            *state
        };

        self.join_dispatch();

        let next = match self.config.reconnect {
            ReconnectPolicy::Reusable => ConnectionState::Disconnected,
            ReconnectPolicy::Terminal => ConnectionState::Closed,
        };

        let mut state = lock(&self.shared.state);
        self.shared.release_sockets();
        if *state != next {
            info!("Closed {} connection ({} -> {})", self.role, previous, next);
            *state = next;
        }
    }

    /// Alias for [`PeerConnection::close`].
    pub fn disconnect(&self) {
        self.close();
    }

    fn join_dispatch(&self) {
        let Some(handle) = lock(&self.dispatch).take() else {
            return;
        };

        if handle.thread().id() == thread::current().id() {
            debug!("Dispatch thread stopping itself; not joining");
            return;
        }

        if let Err(e) = handle.join() {
            error!("Dispatch thread panicked: {:?}", e);
        }
    }

    // ============ Status ============

    /// Returns `true` once a peer socket is attached
    pub fn is_connected(&self) -> bool {
        *lock(&self.shared.state) == ConnectionState::Connected
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    /// Role fixed at construction
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns `true` for the server role
    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    /// Returns `true` while the dispatch loop runs
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Configuration fixed at construction
    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    /// Listening address (server) or local end of the active socket
    pub fn local_addr(&self) -> Option<SocketAddr> {
        if let Some(acceptor) = lock(&self.shared.acceptor).as_ref() {
            return Some(acceptor.local_addr());
        }
        lock(&self.shared.active)
            .as_ref()
            .and_then(|stream| stream.local_addr().ok())
    }

    /// Remote end of the active socket
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        lock(&self.shared.active)
            .as_ref()
            .and_then(|stream| stream.peer_addr().ok())
    }

    /// Packets waiting to be sent
    pub fn pending_send(&self) -> usize {
        lock(&self.shared.send_queue).len()
    }

    /// Packets waiting to be received by the application
    pub fn pending_receive(&self) -> usize {
        lock(&self.shared.recv_queue).len()
    }

    /// Traffic counters for the lifetime of this connection
    pub fn stats(&self) -> TransportStats {
        self.shared.stats.snapshot()
    }

    // ============ Helpers ============

    fn require_role(&self, role: Role, operation: &'static str) -> Result<()> {
        if self.role != role {
            return Err(Error::RoleMismatch {
                operation,
                role: self.role,
            });
        }
        Ok(())
    }

    fn require_connected(&self, operation: &'static str) -> Result<()> {
        let state = *lock(&self.shared.state);
        if state != ConnectionState::Connected {
            return Err(Error::InvalidState { operation, state });
        }
        Ok(())
    }

    /// Receive queue, available while connected or while it still holds packets.
    fn received_queue(&self) -> Result<MutexGuard<'_, PacketQueue>> {
        let state = lock(&self.shared.state);
        let queue = lock(&self.shared.recv_queue);
        if *state != ConnectionState::Connected && queue.is_empty() {
            return Err(Error::InvalidState {
                operation: "receive",
                state: *state,
            });
        }
        Ok(queue)
    }

    /// Move to `Connecting` and return the generation of this attempt.
    fn begin_setup(&self, operation: &'static str) -> Result<u64> {
        let mut state = lock(&self.shared.state);
        if !state.can_start() {
            return Err(Error::InvalidState {
                operation,
                state: *state,
            });
        }

        lock(&self.shared.send_queue).clear();
        lock(&self.shared.recv_queue).clear();
        *state = ConnectionState::Connecting;

        Ok(self.shared.generation.load(Ordering::Acquire))
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("role", &self.role)
            .field("state", &self.state())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
