//! Transport errors and traffic statistics.
//!
//! The connection engine records every packet it writes to or reads from the
//! socket here, so callers can observe traffic without touching the queues.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Creating, binding or listening on the accept socket failed
    #[error("Failed to bind to {addr}: {source}")]
    BindFailed {
        /// Address the listener was bound to
        addr: SocketAddr,
        /// Underlying system failure
        #[source]
        source: io::Error,
    },

    /// Waiting for an incoming connection failed
    #[error("Accept failed: {0}")]
    AcceptFailed(#[source] io::Error),

    /// Connecting to the remote endpoint failed
    #[error("Connection to {addr} failed: {source}")]
    ConnectFailed {
        /// Remote endpoint
        addr: SocketAddr,
        /// Underlying system failure
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    /// The underlying system failure
    pub fn io_error(&self) -> &io::Error {
        match self {
            Self::Io(e) | Self::AcceptFailed(e) => e,
            Self::BindFailed { source, .. } | Self::ConnectFailed { source, .. } => source,
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total packets sent
    pub packets_sent: u64,
    /// Total packets received
    pub packets_received: u64,
    /// Send errors
    pub send_errors: u64,
    /// Receive errors
    pub recv_errors: u64,
}

/// Lock-free statistics shared between the dispatch thread and readers.
#[derive(Debug, Default)]
pub struct TransportStatsRecorder {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    send_errors: AtomicU64,
    recv_errors: AtomicU64,
}

impl TransportStatsRecorder {
    /// Create a recorder with all counters at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful packet send
    pub fn record_send(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successfully received packet
    pub fn record_recv(&self, bytes: usize) {
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a send error
    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a receive error
    pub fn record_recv_error(&self) {
        self.recv_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of all counters
    pub fn snapshot(&self) -> TransportStats {
        TransportStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_recorder() {
        let stats = TransportStatsRecorder::new();
        assert_eq!(stats.snapshot(), TransportStats::default());

        stats.record_send(100);
        stats.record_recv(200);
        stats.record_send_error();
        stats.record_recv_error();

        let snap = stats.snapshot();
        assert_eq!(snap.bytes_sent, 100);
        assert_eq!(snap.packets_sent, 1);
        assert_eq!(snap.bytes_received, 200);
        assert_eq!(snap.packets_received, 1);
        assert_eq!(snap.send_errors, 1);
        assert_eq!(snap.recv_errors, 1);
    }

    #[test]
    fn test_stats_multiple_operations() {
        let stats = TransportStatsRecorder::new();

        for i in 1..=10 {
            stats.record_send(100);
            assert_eq!(stats.snapshot().packets_sent, i);
            assert_eq!(stats.snapshot().bytes_sent, i * 100);
        }

        for i in 1..=5 {
            stats.record_recv(50);
            assert_eq!(stats.snapshot().packets_received, i);
            assert_eq!(stats.snapshot().bytes_received, i * 50);
        }
    }

    #[test]
    fn test_transport_error_display() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();

        let err = TransportError::BindFailed {
            addr,
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().contains("Failed to bind to 127.0.0.1:9"));

        let err = TransportError::ConnectFailed {
            addr,
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(err.to_string().contains("Connection to 127.0.0.1:9 failed"));

        let err = TransportError::AcceptFailed(io::Error::from(io::ErrorKind::InvalidInput));
        assert!(err.to_string().starts_with("Accept failed"));
    }

    #[test]
    fn test_transport_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test");
        let transport_err = TransportError::from(io_err);

        assert!(matches!(transport_err, TransportError::Io(_)));
        assert_eq!(transport_err.io_error().kind(), io::ErrorKind::Other);
    }
}
