//! Authentication for realm sessions.
//!
//! - [`srp6`]: the SRP6 exchange against the login directory.
//! - [`handshake`]: client and server login state machines.
//! - [`join`]: proving the login session key to a realm server.
//! - [`pending`]: realm-side key lookups against the directory.
//! - [`messages`]: the wire messages for all of the above.

pub mod handshake;
pub mod join;
pub mod messages;
pub mod pending;
pub mod srp6;

pub use handshake::{
    AccountRecord, AccountStatus, AccountStore, AuthError, AuthHandshake, HandshakeState,
    LogonServerHandshake, MemoryAccountStore, ProofVerdict,
};
pub use join::{JoinClient, JoinError, JoinState, JoinVerifier, SEED_LEN, connection_key};
pub use messages::{JoinResult, LogonResult, RealmInfo, RealmList};
pub use pending::{PendingAuthRequest, SessionDirectory, SessionKeyRequester};
pub use srp6::{SessionKey, SrpClient, SrpError, SrpServer, compute_verifier};
