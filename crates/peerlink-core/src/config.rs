//! Peer connection configuration

use crate::error::{Error, Result};
use crate::framing::Framing;
use peerlink_transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default packet-size limit in bytes
pub const DEFAULT_PACKET_SIZE: usize = 1024;

/// Largest packet-size limit a connection accepts (16 MiB)
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Default pause between dispatch cycles
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What `close()` leaves behind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectPolicy {
    /// Return to `Disconnected`; setup may be repeated
    #[default]
    Reusable,
    /// Move to `Closed`; the connection cannot be used again
    Terminal,
}

/// Peer connection configuration
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Largest packet `send` accepts and the receive read size
    pub packet_size: usize,

    /// Pause between dispatch cycles
    pub poll_interval: Duration,

    /// Wire framing
    pub framing: Framing,

    /// Behaviour of `close()`
    pub reconnect: ReconnectPolicy,

    /// Report a 0-byte read on a readable socket as a dispatch error instead
    /// of treating it as "no data yet"
    pub eof_is_disconnect: bool,

    /// Socket options
    pub transport: TransportConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            framing: Framing::default(),
            reconnect: ReconnectPolicy::default(),
            eof_is_disconnect: false,
            transport: TransportConfig::default(),
        }
    }
}

impl PeerConfig {
    /// Set the packet-size limit
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Set the dispatch poll interval
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the wire framing
    #[must_use]
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Set the reconnect policy
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Treat end of stream as a disconnect
    #[must_use]
    pub fn with_eof_is_disconnect(mut self, enabled: bool) -> Self {
        self.eof_is_disconnect = enabled;
        self
    }

    /// Bound client connect attempts
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.transport.connect_timeout = Some(timeout);
        self
    }

    /// Bound each blocking socket write (`None` waits for the peer indefinitely)
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transport.write_timeout = timeout;
        self
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if a value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.packet_size == 0 || self.packet_size > MAX_PACKET_SIZE {
            return Err(Error::InvalidConfig(format!(
                "packet size must be between 1 and {} bytes, got {}",
                MAX_PACKET_SIZE, self.packet_size
            )));
        }

        if self.transport.listen_backlog < 1 {
            return Err(Error::InvalidConfig(format!(
                "listen backlog must be at least 1, got {}",
                self.transport.listen_backlog
            )));
        }

        if self.transport.connect_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidConfig(
                "connect timeout must be non-zero".to_string(),
            ));
        }

        if self.transport.write_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidConfig(
                "write timeout must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}
