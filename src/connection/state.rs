use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle of one gateway connection.
///
/// ```text
/// disconnected ─► connecting ─► connected ─► authenticating ─► authenticated
///                     │             │              │                 │
///                     └──► error ◄──┴──────────────┴─────────────────┘
///                            │
///                            ├─► reconnecting ─► connecting ...
///                            └─► closed   (reconnect attempts exhausted)
/// ```
///
/// `disconnect()` returns any state to `disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
    Error,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    /// Transport is open and usable.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            ConnectionState::Connected
                | ConnectionState::Authenticating
                | ConnectionState::Authenticated
        )
    }

    /// States in which the registry reuses a connection as-is.
    pub fn is_live(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Authenticated)
    }

    /// States from which `connect()` may be issued.
    pub fn can_connect(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Closed | ConnectionState::Error
        )
    }

    /// Allowed transitions. `Disconnected` is reachable from everywhere
    /// (explicit disconnect or a clean close by the gateway).
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        if next == Disconnected {
            return self != Disconnected;
        }
        matches!(
            (self, next),
            (Disconnected | Closed | Error, Connecting)
                | (Reconnecting, Connecting)
                | (Connecting, Connected | Error)
                | (Connected, Authenticating | Error)
                | (Authenticating, Authenticated | Error)
                | (Authenticated, Error)
                | (Error, Reconnecting | Closed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Error => "error",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One emitted transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub previous: ConnectionState,
    pub current: ConnectionState,
}

/// Counters and timestamps of one connection object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub connected_at: Option<DateTime<Utc>>,
    pub authenticated_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub reconnect_attempts: u32,
    pub errors: u64,
}
