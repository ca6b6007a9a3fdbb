//! Session connection state.

use std::fmt;

/// Where a session is in its lifecycle.
///
/// ```text
/// Disconnected ─▶ Connecting ─▶ AwaitingChallenge ─▶ AwaitingProof ─▶ Authenticated ─▶ Joined
///                     ▲                                                                │
///                     └──────────────── reconnect ◀──────── Lost ◀────────────────────┘
/// ```
///
/// A login session stops at `Authenticated`; a world session reaches
/// `Joined` once the realm accepts its session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingChallenge,
    AwaitingProof,
    Authenticated,
    Joined,
    Lost,
}

impl ConnectionState {
    /// Whether a handshake is in flight.
    pub fn is_handshaking(self) -> bool {
        matches!(self, Self::AwaitingChallenge | Self::AwaitingProof)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingChallenge => "awaiting challenge",
            Self::AwaitingProof => "awaiting proof",
            Self::Authenticated => "authenticated",
            Self::Joined => "joined",
            Self::Lost => "lost",
        };
        f.write_str(name)
    }
}
