//! # peerlink Core
//!
//! Point-to-point packet exchange between exactly two peers over TCP.
//!
//! This crate provides:
//! - Append-only packet queues decoupling the application from the socket
//! - Length-prefixed (or legacy raw) framing over the byte stream
//! - The peer connection state machine with background accept/connect
//! - A single-threaded dispatch loop moving packets between queues and socket
//! - Error types and categorised asynchronous error reporting
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     Application thread                         │
//! │        send() ──► send queue        receive queue ──► receive()│
//! ├───────────────────────────────────────────────────────────────┤
//! │                     Dispatch thread                            │
//! │   poll writable ─► drain send queue ─► frame ─► write          │
//! │   poll readable ─► read ─► deframe ─► fill receive queue       │
//! ├───────────────────────────────────────────────────────────────┤
//! │                     TCP socket (peerlink-transport)            │
//! └───────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
mod dispatch;
pub mod error;
pub mod framing;
pub mod packet_queue;
pub mod state;

pub use config::{
    DEFAULT_PACKET_SIZE, DEFAULT_POLL_INTERVAL, MAX_PACKET_SIZE, PeerConfig, ReconnectPolicy,
};
pub use connection::{ErrorHandler, PeerConnection};
pub use error::{ConnectionError, Error, ErrorCategory, ErrorKind, Result};
pub use framing::{FRAME_HEADER_SIZE, FrameCodec, Framing};
pub use packet_queue::PacketQueue;
pub use state::{ConnectionState, Role};

pub use peerlink_transport::{TransportConfig, TransportStats};
