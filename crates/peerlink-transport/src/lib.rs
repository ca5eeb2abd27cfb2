//! # peerlink Transport
//!
//! TCP transport layer for peerlink.
//!
//! This crate provides:
//! - Listener bind/accept and client connect built on `socket2`
//! - Zero-timeout readiness polling for a connected stream
//! - Transport error types and lock-free traffic statistics

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod readiness;
pub mod tcp;
pub mod transport;

pub use readiness::{poll_readable, poll_writable};
pub use tcp::{ConnectCancel, TcpAcceptor, TcpConnector, shutdown_stream};
pub use transport::{TransportError, TransportResult, TransportStats, TransportStatsRecorder};

use std::time::Duration;

/// Default bound on a blocking write to a peer that has stopped reading
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Disable Nagle's algorithm on connected streams
    pub nodelay: bool,
    /// Pending-connection backlog for listeners
    pub listen_backlog: i32,
    /// Upper bound for a client connect attempt (`None` = OS default)
    pub connect_timeout: Option<Duration>,
    /// Upper bound for one blocking write on a connected stream
    /// (`None` = block until the peer drains its receive window)
    pub write_timeout: Option<Duration>,
    /// Receive buffer size (`None` = OS default)
    pub recv_buffer_size: Option<usize>,
    /// Send buffer size (`None` = OS default)
    pub send_buffer_size: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            listen_backlog: 1,
            connect_timeout: None,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            recv_buffer_size: None,
            send_buffer_size: None,
        }
    }
}
