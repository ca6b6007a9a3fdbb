//! Login directory handshake state machines.
//!
//! Both halves are transport-free: they consume decoded messages and return
//! the messages to send, so a session can drive them from packet handlers and
//! a test can drive them directly.
//!
//! ```text
//! client: Idle ─start─▶ AwaitingChallenge ─challenge─▶ AwaitingProof ─result─▶ Authenticated
//!                                   └──────────── any error ────────────────▶ Failed
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::messages::{
    ChallengeParams, LogonChallenge, LogonHello, LogonProof, LogonProofResult, LogonResult,
    PROTOCOL_VERSION,
};
use crate::srp6::{
    Bignum, GENERATOR, PRIVATE_KEY_LEN, PendingSessionKey, SALT_LEN, SessionKey, SrpClient,
    SrpError, SrpServer, compute_verifier, prime_le, random_salt,
};

/// Client handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    AwaitingChallenge,
    AwaitingProof,
    Authenticated,
    Failed,
}

/// Why a login attempt did not authenticate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// A message arrived in the wrong phase.
    #[error("unexpected message in state {state:?}")]
    UnexpectedState {
        /// Phase the handshake was in.
        state: HandshakeState,
    },
    /// The directory answered with a non-success result code.
    #[error("login rejected: {0}")]
    Rejected(LogonResult),
    /// A success reply without its mandatory fields.
    #[error("success reply is missing its payload")]
    MissingPayload,
    /// SRP6 verification failed.
    #[error(transparent)]
    Srp(#[from] SrpError),
}

impl AuthError {
    /// Whether the failure is a protocol violation rather than a rejection.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client half of the login handshake.
pub struct AuthHandshake {
    identity: String,
    password: String,
    private_key: Option<[u8; PRIVATE_KEY_LEN]>,
    state: HandshakeState,
    pending: Option<PendingSessionKey>,
}

impl std::fmt::Debug for AuthHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthHandshake")
            .field("identity", &self.identity)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl AuthHandshake {
    pub fn new(identity: &str, password: &str) -> Self {
        Self {
            identity: identity.to_string(),
            password: password.to_string(),
            private_key: None,
            state: HandshakeState::Idle,
            pending: None,
        }
    }

    /// Use a fixed private exponent instead of a random one.
    pub fn with_private_key(mut self, private_key: [u8; PRIVATE_KEY_LEN]) -> Self {
        self.private_key = Some(private_key);
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Reset to `Idle`, e.g. after a reconnect. Any half-finished exchange is
    /// discarded.
    pub fn reset(&mut self) {
        self.state = HandshakeState::Idle;
        self.pending = None;
    }

    fn fail(&mut self, error: AuthError) -> AuthError {
        tracing::error!(identity = %self.identity, "Login handshake failed: {error}");
        self.state = HandshakeState::Failed;
        self.pending = None;
        error
    }

    fn expect(&mut self, state: HandshakeState) -> Result<(), AuthError> {
        if self.state != state {
            let actual = self.state;
            return Err(self.fail(AuthError::UnexpectedState { state: actual }));
        }
        Ok(())
    }

    /// `Idle → AwaitingChallenge`: produce the hello packet.
    pub fn start(&mut self) -> Result<LogonHello, AuthError> {
        self.expect(HandshakeState::Idle)?;
        self.state = HandshakeState::AwaitingChallenge;
        tracing::info!(identity = %self.identity, "Sending logon hello");
        Ok(LogonHello {
            protocol_version: PROTOCOL_VERSION,
            identity: self.identity.clone(),
        })
    }

    /// `AwaitingChallenge → AwaitingProof`: answer the SRP6 challenge.
    pub fn on_challenge(&mut self, challenge: &LogonChallenge) -> Result<LogonProof, AuthError> {
        self.expect(HandshakeState::AwaitingChallenge)?;
        if challenge.result != LogonResult::Success {
            return Err(self.fail(AuthError::Rejected(challenge.result)));
        }
        let Some(params) = &challenge.params else {
            return Err(self.fail(AuthError::MissingPayload));
        };

        let client = match self.private_key {
            Some(key) => SrpClient::with_private_key(&self.identity, &self.password, key),
            None => SrpClient::new(&self.identity, &self.password),
        };
        let (proof, pending) = client
            .process_challenge(
                &params.server_public,
                params.generator,
                &params.modulus,
                &params.salt,
            )
            .map_err(|e| self.fail(e.into()))?;

        self.pending = Some(pending);
        self.state = HandshakeState::AwaitingProof;
        tracing::debug!("Challenge answered, awaiting proof result");
        Ok(LogonProof {
            client_public: proof.public_key,
            client_proof: proof.proof,
        })
    }

    /// `AwaitingProof → Authenticated`: verify `M2` and release the key.
    pub fn on_proof_result(&mut self, reply: &LogonProofResult) -> Result<SessionKey, AuthError> {
        self.expect(HandshakeState::AwaitingProof)?;
        if reply.result != LogonResult::Success {
            return Err(self.fail(AuthError::Rejected(reply.result)));
        }
        let (Some(server_proof), Some(pending)) = (reply.server_proof, self.pending.take()) else {
            return Err(self.fail(AuthError::MissingPayload));
        };
        let key = pending
            .verify(&server_proof)
            .map_err(|e| self.fail(e.into()))?;

        self.state = HandshakeState::Authenticated;
        tracing::info!(identity = %self.identity, "Authenticated");
        Ok(key)
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Standing of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Active,
    Banned,
    Suspended,
}

/// What a directory stores per account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub salt: [u8; SALT_LEN],
    pub verifier: Bignum,
    pub status: AccountStatus,
}

impl AccountRecord {
    /// Active account with a fresh salt.
    pub fn register(identity: &str, password: &str) -> Self {
        let salt = random_salt();
        Self {
            verifier: compute_verifier(identity, password, &salt),
            salt,
            status: AccountStatus::Active,
        }
    }
}

/// Account lookup used by the server handshake.
pub trait AccountStore: Send + Sync {
    /// Find an account by identity (case-insensitive).
    fn lookup(&self, identity: &str) -> Option<AccountRecord>;
}

/// In-memory [`AccountStore`].
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<HashMap<String, AccountRecord>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: &str, record: AccountRecord) {
        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity.to_ascii_uppercase(), record);
    }

    /// Register an active account with a fresh salt.
    pub fn register(&self, identity: &str, password: &str) {
        self.insert(identity, AccountRecord::register(identity, password));
    }
}

impl AccountStore for MemoryAccountStore {
    fn lookup(&self, identity: &str) -> Option<AccountRecord> {
        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&identity.to_ascii_uppercase())
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Server verdict on a [`LogonProof`].
#[derive(Debug, Clone)]
pub struct ProofVerdict {
    /// Reply to send.
    pub reply: LogonProofResult,
    /// The shared key, on success.
    pub key: Option<SessionKey>,
}

/// Server half of the login handshake, one per connection.
#[derive(Debug, Default)]
pub struct LogonServerHandshake {
    identity: Option<String>,
    server: Option<SrpServer>,
    private_key: Option<[u8; PRIVATE_KEY_LEN]>,
}

impl LogonServerHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed private exponent instead of a random one.
    pub fn with_private_key(mut self, private_key: [u8; PRIVATE_KEY_LEN]) -> Self {
        self.private_key = Some(private_key);
        self
    }

    /// Identity named by the hello, once received.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Answer a hello. Unknown, banned and suspended accounts and foreign
    /// protocol versions get the matching result code and no parameters.
    pub fn on_hello(&mut self, hello: &LogonHello, store: &dyn AccountStore) -> LogonChallenge {
        let rejected = |result| LogonChallenge {
            result,
            params: None,
        };
        if hello.protocol_version != PROTOCOL_VERSION {
            return rejected(LogonResult::VersionInvalid);
        }
        let Some(record) = store.lookup(&hello.identity) else {
            return rejected(LogonResult::UnknownAccount);
        };
        match record.status {
            AccountStatus::Active => {}
            AccountStatus::Banned => return rejected(LogonResult::Banned),
            AccountStatus::Suspended => return rejected(LogonResult::Suspended),
        }

        let server = match self.private_key {
            Some(key) => {
                SrpServer::with_private_key(&hello.identity, record.salt, &record.verifier, key)
            }
            None => SrpServer::new(&hello.identity, record.salt, &record.verifier),
        };
        let server = match server {
            Ok(server) => server,
            Err(e) => {
                tracing::error!("Cannot start SRP6 exchange: {e}");
                return rejected(LogonResult::Busy);
            }
        };

        let params = ChallengeParams {
            server_public: *server.public_key(),
            generator: GENERATOR,
            modulus: prime_le(),
            salt: record.salt,
        };
        self.identity = Some(hello.identity.clone());
        self.server = Some(server);
        LogonChallenge {
            result: LogonResult::Success,
            params: Some(params),
        }
    }

    /// Verify the client's proof. A proof without a preceding challenge, or
    /// one that does not verify, yields `IncorrectPassword`.
    pub fn on_proof(&mut self, proof: &LogonProof) -> ProofVerdict {
        let failed = ProofVerdict {
            reply: LogonProofResult {
                result: LogonResult::IncorrectPassword,
                server_proof: None,
            },
            key: None,
        };
        let Some(server) = self.server.take() else {
            return failed;
        };
        match server.verify_client(&proof.client_public, &proof.client_proof) {
            Ok(session) => ProofVerdict {
                reply: LogonProofResult {
                    result: LogonResult::Success,
                    server_proof: Some(session.proof),
                },
                key: Some(session.key),
            },
            Err(e) => {
                tracing::warn!(identity = ?self.identity, "Proof rejected: {e}");
                failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(identity: &str, password: &str, status: AccountStatus) -> MemoryAccountStore {
        let store = MemoryAccountStore::new();
        let mut record = AccountRecord::register(identity, password);
        record.status = status;
        store.insert(identity, record);
        store
    }

    #[test]
    fn test_full_login_yields_matching_keys() {
        let store = store_with("alice", "wonderland", AccountStatus::Active);
        let mut client = AuthHandshake::new("alice", "wonderland");
        let mut server = LogonServerHandshake::new();

        let hello = client.start().unwrap();
        assert_eq!(client.state(), HandshakeState::AwaitingChallenge);

        let challenge = server.on_hello(&hello, &store);
        let proof = client.on_challenge(&challenge).unwrap();
        assert_eq!(client.state(), HandshakeState::AwaitingProof);

        let verdict = server.on_proof(&proof);
        let key = client.on_proof_result(&verdict.reply).unwrap();
        assert_eq!(client.state(), HandshakeState::Authenticated);
        assert_eq!(Some(key), verdict.key);
    }

    #[test]
    fn test_wrong_password_rejected_with_reason() {
        let store = store_with("alice", "wonderland", AccountStatus::Active);
        let mut client = AuthHandshake::new("alice", "looking-glass");
        let mut server = LogonServerHandshake::new();

        let challenge = server.on_hello(&client.start().unwrap(), &store);
        let proof = client.on_challenge(&challenge).unwrap();
        let verdict = server.on_proof(&proof);
        assert_eq!(verdict.reply.result, LogonResult::IncorrectPassword);
        assert!(verdict.key.is_none());

        let err = client.on_proof_result(&verdict.reply).unwrap_err();
        assert_eq!(err, AuthError::Rejected(LogonResult::IncorrectPassword));
        assert!(!err.is_protocol_violation());
        assert_eq!(client.state(), HandshakeState::Failed);
    }

    #[test]
    fn test_banned_account_surfaces_code() {
        let store = store_with("mallory", "pw", AccountStatus::Banned);
        let mut client = AuthHandshake::new("mallory", "pw");
        let mut server = LogonServerHandshake::new();

        let challenge = server.on_hello(&client.start().unwrap(), &store);
        assert_eq!(challenge.params, None);
        assert_eq!(
            client.on_challenge(&challenge),
            Err(AuthError::Rejected(LogonResult::Banned))
        );
    }

    #[test]
    fn test_unknown_account_and_version() {
        let store = MemoryAccountStore::new();
        let mut server = LogonServerHandshake::new();
        let hello = LogonHello {
            protocol_version: PROTOCOL_VERSION,
            identity: "nobody".into(),
        };
        assert_eq!(
            server.on_hello(&hello, &store).result,
            LogonResult::UnknownAccount
        );

        let old = LogonHello {
            protocol_version: PROTOCOL_VERSION - 1,
            ..hello
        };
        assert_eq!(
            server.on_hello(&old, &store).result,
            LogonResult::VersionInvalid
        );
    }

    #[test]
    fn test_downgraded_group_is_fatal() {
        let store = store_with("alice", "wonderland", AccountStatus::Active);
        let mut client = AuthHandshake::new("alice", "wonderland");
        let mut server = LogonServerHandshake::new();

        let mut challenge = server.on_hello(&client.start().unwrap(), &store);
        if let Some(params) = challenge.params.as_mut() {
            params.generator = 2;
        }
        let err = client.on_challenge(&challenge).unwrap_err();
        assert!(err.is_protocol_violation());
        assert_eq!(client.state(), HandshakeState::Failed);
    }

    #[test]
    fn test_forged_server_proof_is_fatal() {
        let store = store_with("alice", "wonderland", AccountStatus::Active);
        let mut client = AuthHandshake::new("alice", "wonderland");
        let mut server = LogonServerHandshake::new();

        let challenge = server.on_hello(&client.start().unwrap(), &store);
        let proof = client.on_challenge(&challenge).unwrap();
        let mut verdict = server.on_proof(&proof);
        if let Some(m2) = verdict.reply.server_proof.as_mut() {
            m2[5] ^= 0xFF;
        }
        assert_eq!(
            client.on_proof_result(&verdict.reply),
            Err(AuthError::Srp(SrpError::ServerProofMismatch))
        );
    }

    #[test]
    fn test_replayed_challenge_rejected() {
        let store = store_with("alice", "wonderland", AccountStatus::Active);
        let mut client = AuthHandshake::new("alice", "wonderland");
        let mut server = LogonServerHandshake::new();

        let challenge = server.on_hello(&client.start().unwrap(), &store);
        client.on_challenge(&challenge).unwrap();
        assert_eq!(
            client.on_challenge(&challenge),
            Err(AuthError::UnexpectedState {
                state: HandshakeState::AwaitingProof
            })
        );
    }

    #[test]
    fn test_proof_without_challenge_fails() {
        let mut server = LogonServerHandshake::new();
        let verdict = server.on_proof(&LogonProof {
            client_public: [1; 32],
            client_proof: [0; 20],
        });
        assert_eq!(verdict.reply.result, LogonResult::IncorrectPassword);
    }
}
