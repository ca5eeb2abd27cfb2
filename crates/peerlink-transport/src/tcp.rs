//! TCP listener and connector setup.
//!
//! Thin accept/connect wrappers used by the connection engine. Sockets are
//! created through `socket2` so buffer sizes, address reuse and connect
//! timeouts can be applied before the socket is handed over as a plain
//! [`TcpStream`].
//!
//! Both the acceptor and the connector can be interrupted from another thread:
//! shutting down a socket that is blocked in `accept(2)` or `connect(2)` makes
//! the blocked call return an error, which is the only cancellation mechanism
//! the blocking socket API offers.

use crate::TransportConfig;
use crate::transport::{TransportError, TransportResult};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use tracing::{debug, trace};

fn new_stream_socket(addr: &SocketAddr, config: &TransportConfig) -> io::Result<Socket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    if let Some(size) = config.recv_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }
    if let Some(size) = config.send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }

    Ok(socket)
}

fn into_stream(socket: Socket, config: &TransportConfig) -> io::Result<TcpStream> {
    let stream: TcpStream = socket.into();
    stream.set_nodelay(config.nodelay)?;
    stream.set_write_timeout(config.write_timeout)?;
    Ok(stream)
}

/// Listening socket for the server role.
///
/// # Examples
/// ```no_run
/// use peerlink_transport::{TcpAcceptor, TransportConfig};
/// use std::net::SocketAddr;
///
/// let config = TransportConfig::default();
/// let addr: SocketAddr = "0.0.0.0:54321".parse().unwrap();
/// let acceptor = TcpAcceptor::bind(addr, &config).unwrap();
/// let (stream, peer) = acceptor.accept(&config).unwrap();
/// println!("{} connected", peer);
/// # drop(stream);
/// ```
#[derive(Debug)]
pub struct TcpAcceptor {
    socket: Socket,
    local_addr: SocketAddr,
}

impl TcpAcceptor {
    /// Bind and listen on `addr`.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the socket cannot be created,
    /// bound or put into the listening state.
    pub fn bind(addr: SocketAddr, config: &TransportConfig) -> TransportResult<Self> {
        let bind_failed = |source| TransportError::BindFailed { addr, source };

        let socket = new_stream_socket(&addr, config).map_err(bind_failed)?;
        socket.set_reuse_address(true).map_err(bind_failed)?;
        socket.bind(&addr.into()).map_err(bind_failed)?;
        socket.listen(config.listen_backlog).map_err(bind_failed)?;

        let local_addr = socket
            .local_addr()
            .map_err(bind_failed)?
            .as_socket()
            .unwrap_or(addr);

        debug!("Listening on {}", local_addr);

        Ok(Self { socket, local_addr })
    }

    /// Block until a peer connects.
    ///
    /// # Errors
    /// Returns `TransportError::AcceptFailed` if `accept(2)` fails, including
    /// when [`TcpAcceptor::shutdown`] interrupts the wait.
    pub fn accept(&self, config: &TransportConfig) -> TransportResult<(TcpStream, SocketAddr)> {
        let (socket, peer) = self.socket.accept().map_err(TransportError::AcceptFailed)?;
        let peer = peer.as_socket().ok_or_else(|| {
            TransportError::AcceptFailed(io::Error::new(
                io::ErrorKind::InvalidData,
                "peer address is not an IP socket address",
            ))
        })?;
        let stream = into_stream(socket, config).map_err(TransportError::AcceptFailed)?;

        debug!("Accepted connection from {}", peer);
        Ok((stream, peer))
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop listening and wake any thread blocked in [`TcpAcceptor::accept`].
    pub fn shutdown(&self) {
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            trace!("Listener shutdown on {}: {}", self.local_addr, e);
        }
    }
}

/// Client-side socket waiting to be connected.
#[derive(Debug)]
pub struct TcpConnector {
    socket: Socket,
    addr: SocketAddr,
    config: TransportConfig,
}

impl TcpConnector {
    /// Create an unconnected socket for `addr`.
    ///
    /// # Errors
    /// Returns `TransportError::ConnectFailed` if the socket cannot be created.
    pub fn new(addr: SocketAddr, config: &TransportConfig) -> TransportResult<Self> {
        let socket = new_stream_socket(&addr, config)
            .map_err(|source| TransportError::ConnectFailed { addr, source })?;

        Ok(Self {
            socket,
            addr,
            config: config.clone(),
        })
    }

    /// Handle that can abort a pending [`TcpConnector::connect`] from another thread.
    ///
    /// # Errors
    /// Returns an error if the socket descriptor cannot be duplicated.
    pub fn cancel_handle(&self) -> TransportResult<ConnectCancel> {
        Ok(ConnectCancel(self.socket.try_clone()?))
    }

    /// Connect, blocking until the handshake completes or fails.
    ///
    /// # Errors
    /// Returns `TransportError::ConnectFailed` on refusal, timeout or cancellation.
    pub fn connect(self) -> TransportResult<TcpStream> {
        let addr = self.addr;
        let connect_failed = |source| TransportError::ConnectFailed { addr, source };
        let target = SockAddr::from(addr);

        match self.config.connect_timeout {
            Some(timeout) => self.socket.connect_timeout(&target, timeout),
            None => self.socket.connect(&target),
        }
        .map_err(connect_failed)?;

        let stream = into_stream(self.socket, &self.config).map_err(connect_failed)?;
        debug!("Connected to {}", addr);
        Ok(stream)
    }
}

/// Duplicate of a connecting socket used to interrupt the connect.
#[derive(Debug)]
pub struct ConnectCancel(Socket);

impl ConnectCancel {
    /// Abort the pending connect, if any.
    pub fn cancel(&self) {
        if let Err(e) = self.0.shutdown(Shutdown::Both) {
            trace!("Connect cancel: {}", e);
        }
    }
}

/// Shut down both directions of `stream`, ignoring already-closed errors.
pub fn shutdown_stream(stream: &TcpStream) {
    match stream.shutdown(Shutdown::Both) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
        Err(e) => trace!("Stream shutdown: {}", e),
    }
}
