//! Connection roles and lifecycle states.
//!
//! ```text
//!                start_server / connect_async
//!  DISCONNECTED ─────────────────────────────▶ CONNECTING
//!     ▲   ▲                                         │
//!     │   │ setup error                             │ accept / connect ok
//!     │   └─────────────────────────────────────────┤
//!     │                                             ▼
//!     │  close (reusable) / dispatch error      CONNECTED
//!     └─────────────────────────────────────────────┤
//!                                                   │ close (terminal)
//!                                                   ▼
//!                                                 CLOSED
//! ```
//!
//! Transitions themselves live in [`crate::connection`].

use serde::{Deserialize, Serialize};

/// Which side of the link a connection plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Listens and accepts exactly one peer
    Server,
    /// Connects to a listening peer
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Client => f.write_str("client"),
        }
    }
}

/// Lifecycle state of a [`crate::PeerConnection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No socket is held; setup may start
    #[default]
    Disconnected,
    /// Accept or connect is running on a background thread
    Connecting,
    /// Peer socket installed; data operations are allowed
    Connected,
    /// Closed under the terminal reconnect policy; no further use
    Closed,
}

impl ConnectionState {
    /// Setup (`start_server` / `connect_async`) may begin from this state
    pub fn can_start(self) -> bool {
        self == Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
