//! Error types for peerlink connections.
//!
//! Synchronous API misuse is returned directly as an [`Error`]. Failures that
//! happen on background threads (binding, accepting, connecting, dispatching)
//! cannot be returned to the caller, so they are wrapped in a
//! [`ConnectionError`] tagged with an [`ErrorCategory`] and handed to the
//! connection's error handler.
//!
//! # Example
//!
//! ```
//! use peerlink_core::{ConnectionError, ErrorCategory, ErrorKind};
//!
//! fn on_error(err: ConnectionError) {
//!     match err.category {
//!         ErrorCategory::Start | ErrorCategory::Accept => eprintln!("server setup: {}", err),
//!         ErrorCategory::Connect => eprintln!("connect failed, may retry: {}", err),
//!         ErrorCategory::Dispatch => {
//!             if err.error.kind() == ErrorKind::Protocol {
//!                 eprintln!("peer sent malformed data: {}", err);
//!             }
//!         }
//!     }
//! }
//! # let _ = on_error;
//! ```

use crate::state::{ConnectionState, Role};
use peerlink_transport::TransportError;
use std::io;
use thiserror::Error;

/// Errors produced by queues, framing and peer connections
#[derive(Debug, Error)]
pub enum Error {
    // ============ Configuration Errors ============
    /// Packet length outside `[1, max]`
    #[error("invalid packet size {size} (allowed 1..={max})")]
    InvalidPacketSize {
        /// Offending length
        size: usize,
        /// Configured packet-size limit
        max: usize,
    },

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Destination buffer cannot hold the head packet
    #[error("buffer too small: packet needs {needed} bytes, buffer holds {available}")]
    BufferTooSmall {
        /// Size of the head packet
        needed: usize,
        /// Length of the supplied buffer
        available: usize,
    },

    // ============ State Errors ============
    /// Operation not valid in the current connection state
    #[error("{operation} not allowed while {state}")]
    InvalidState {
        /// Rejected operation
        operation: &'static str,
        /// State at the time of the call
        state: ConnectionState,
    },

    /// Operation belongs to the other role
    #[error("{operation} not available to a {role} connection")]
    RoleMismatch {
        /// Rejected operation
        operation: &'static str,
        /// Role the connection was built with
        role: Role,
    },

    /// A dispatch loop is already running for this connection
    #[error("dispatch loop already running")]
    DispatchRunning,

    // ============ Transport Errors ============
    /// Socket setup failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Socket read/write/poll failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // ============ Protocol Errors ============
    /// Frame header announced a length outside `[1, max]`
    #[error("invalid frame length {length} (allowed 1..={max})")]
    InvalidFrameLength {
        /// Announced payload length
        length: usize,
        /// Configured packet-size limit
        max: usize,
    },

    /// Readable socket returned end of stream
    #[error("peer closed the connection")]
    PeerClosed,
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad argument or configuration value
    Configuration,
    /// Operation outside its valid connection state or role
    State,
    /// System-level socket failure
    Transport,
    /// Malformed or ambiguous data on the wire
    Protocol,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPacketSize { .. } | Self::InvalidConfig(_) | Self::BufferTooSmall { .. } => {
                ErrorKind::Configuration
            }
            Self::InvalidState { .. } | Self::RoleMismatch { .. } | Self::DispatchRunning => {
                ErrorKind::State
            }
            Self::Transport(_) | Self::Io(_) => ErrorKind::Transport,
            Self::InvalidFrameLength { .. } | Self::PeerClosed => ErrorKind::Protocol,
        }
    }

    /// Underlying system failure, if this error carries one
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::Transport(e) => Some(e.io_error()),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Which background activity produced a [`ConnectionError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Creating, binding or listening on the accept socket
    Start,
    /// Waiting for the peer on the accept socket
    Accept,
    /// Client connect attempt
    Connect,
    /// Dispatch loop send/receive
    Dispatch,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Accept => "accept",
            Self::Connect => "connect",
            Self::Dispatch => "dispatch",
        };
        f.write_str(name)
    }
}

/// Asynchronous failure delivered to a connection's error handler
#[derive(Debug, Error)]
#[error("{category} error: {error}")]
pub struct ConnectionError {
    /// Activity that failed
    pub category: ErrorCategory,
    /// The failure itself
    #[source]
    pub error: Error,
}

impl ConnectionError {
    pub(crate) fn new(category: ErrorCategory, error: impl Into<Error>) -> Self {
        Self {
            category,
            error: error.into(),
        }
    }
}

/// Result type for peerlink operations
pub type Result<T> = std::result::Result<T, Error>;
