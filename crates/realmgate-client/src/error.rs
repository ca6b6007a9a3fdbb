//! Session and bot error types.

use std::time::Duration;

use realmgate_auth::{AuthError, JoinError};
use realmgate_config::ConfigError;
use realmgate_movement::MovementError;
use realmgate_net::{CipherError, Opcode, PacketError, TransportError};

/// Errors surfaced by [`LoginSession`](crate::LoginSession),
/// [`WorldSession`](crate::WorldSession) and the bot binary.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Configuration could not be loaded or is out of range.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The login directory handshake failed.
    #[error("login failed: {0}")]
    Login(#[from] AuthError),

    /// The realm join handshake failed.
    #[error("realm join failed: {0}")]
    Join(#[from] JoinError),

    /// A packet could not be queued.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A packet payload could not be encoded or decoded.
    #[error("bad packet {opcode}: {source}")]
    Packet {
        opcode: Opcode,
        #[source]
        source: PacketError,
    },

    /// The session cipher could not be keyed.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// Movement settings were rejected.
    #[error(transparent)]
    Movement(#[from] MovementError),

    /// The configured realm is not in the realm list.
    #[error("realm {0:?} is not listed")]
    UnknownRealm(String),

    /// The realm list is empty.
    #[error("the login directory lists no realms")]
    NoRealms,

    /// A malformed packet arrived and the grace period elapsed.
    #[error("connection terminated after a malformed packet")]
    Terminated,

    /// A handler dropped the connection without a more specific cause.
    #[error("connection closed by handler for {0}")]
    HandlerDisconnect(Opcode),

    /// A world operation was attempted before the avatar entered the world.
    #[error("avatar is not in the world")]
    NotInWorld,

    /// A phase did not complete in time.
    #[error("timed out after {elapsed:?} waiting for {phase}")]
    Timeout {
        phase: &'static str,
        elapsed: Duration,
    },
}

impl BotError {
    /// Whether the server refused us with a result code, as opposed to a
    /// transport or protocol failure.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Login(AuthError::Rejected(_)) | Self::Join(JoinError::Rejected(_))
        )
    }

    /// Process exit code for the bot binary.
    pub fn exit_code(&self) -> u8 {
        if self.is_rejection() { 2 } else { 1 }
    }
}
