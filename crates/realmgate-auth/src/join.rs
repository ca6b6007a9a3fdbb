//! Realm join handshake.
//!
//! The realm proves nothing; the client proves it holds the session key `K`
//! from the login directory without sending it:
//!
//! ```text
//! S→C  AuthChallenge { serverSeed }
//! C→S  AuthSession   { I, clientSeed, digest = H(I ‖ clientSeed ‖ serverSeed ‖ K) }
//! S→C  AuthResponse  { result }                         (plaintext)
//! both install HMAC-SHA1(K, label ‖ clientSeed ‖ serverSeed) as the cipher key
//! ```

use rand::RngCore;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

use realmgate_net::{CipherError, hmac_sha1};

use crate::messages::{AuthChallenge, AuthResponse, AuthSession, JoinResult};
use crate::srp6::{DIGEST_LEN, Digest20, SessionKey};

/// Length of both join seeds.
pub const SEED_LEN: usize = 16;

const WORLD_CONNECTION_LABEL: &[u8] = b"realmgate world connection";

/// Errors from the join handshake.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// A message arrived in the wrong phase.
    #[error("unexpected message in join state {0:?}")]
    UnexpectedState(JoinState),
    /// The realm refused the session.
    #[error("realm rejected the session: {0}")]
    Rejected(JoinResult),
    /// The client digest did not verify.
    #[error("session digest mismatch")]
    DigestMismatch,
    /// The connection key could not be derived.
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// Fresh random seed.
pub fn random_seed() -> [u8; SEED_LEN] {
    let mut seed = [0u8; SEED_LEN];
    rand::rng().fill_bytes(&mut seed);
    seed
}

/// `H(I ‖ clientSeed ‖ serverSeed ‖ K)`, with `I` upper-cased.
pub fn compute_join_digest(
    identity: &str,
    client_seed: &[u8; SEED_LEN],
    server_seed: &[u8; SEED_LEN],
    key: &SessionKey,
) -> Digest20 {
    let mut hasher = Sha1::new();
    hasher.update(identity.to_ascii_uppercase().as_bytes());
    hasher.update(client_seed);
    hasher.update(server_seed);
    hasher.update(key.as_bytes());
    hasher.finalize().into()
}

/// Whether `digest` proves knowledge of `key`. Constant time.
pub fn verify_join_digest(
    identity: &str,
    client_seed: &[u8; SEED_LEN],
    server_seed: &[u8; SEED_LEN],
    key: &SessionKey,
    digest: &[u8; DIGEST_LEN],
) -> bool {
    let expected = compute_join_digest(identity, client_seed, server_seed, key);
    bool::from(expected[..].ct_eq(&digest[..]))
}

/// Cipher key material for one realm connection. Both seeds are bound in,
/// so a reconnect with the same `K` starts a fresh keystream.
pub fn connection_key(
    key: &SessionKey,
    client_seed: &[u8; SEED_LEN],
    server_seed: &[u8; SEED_LEN],
) -> Result<[u8; DIGEST_LEN], CipherError> {
    let mut message = Vec::with_capacity(WORLD_CONNECTION_LABEL.len() + 2 * SEED_LEN);
    message.extend_from_slice(WORLD_CONNECTION_LABEL);
    message.extend_from_slice(client_seed);
    message.extend_from_slice(server_seed);
    hmac_sha1(key.as_bytes(), &message)
}

/// Client join phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    AwaitingChallenge,
    AwaitingResponse,
    Joined,
    Failed,
}

/// Client half of the join handshake.
#[derive(Debug)]
pub struct JoinClient {
    identity: String,
    key: SessionKey,
    client_seed: Option<[u8; SEED_LEN]>,
    /// `(clientSeed, serverSeed)` of the exchange in flight.
    seeds: Option<([u8; SEED_LEN], [u8; SEED_LEN])>,
    state: JoinState,
}

impl JoinClient {
    pub fn new(identity: &str, key: SessionKey) -> Self {
        Self {
            identity: identity.to_string(),
            key,
            client_seed: None,
            seeds: None,
            state: JoinState::AwaitingChallenge,
        }
    }

    /// Use a fixed client seed instead of a random one.
    pub fn with_client_seed(mut self, seed: [u8; SEED_LEN]) -> Self {
        self.client_seed = Some(seed);
        self
    }

    pub fn state(&self) -> JoinState {
        self.state
    }

    /// Start over on a fresh connection.
    pub fn reset(&mut self) {
        self.seeds = None;
        self.state = JoinState::AwaitingChallenge;
    }

    /// Answer the realm's challenge.
    pub fn on_challenge(&mut self, challenge: &AuthChallenge) -> Result<AuthSession, JoinError> {
        if self.state != JoinState::AwaitingChallenge {
            return Err(self.fail(JoinError::UnexpectedState(self.state)));
        }
        let client_seed = self.client_seed.unwrap_or_else(random_seed);
        let digest = compute_join_digest(
            &self.identity,
            &client_seed,
            &challenge.server_seed,
            &self.key,
        );
        self.seeds = Some((client_seed, challenge.server_seed));
        self.state = JoinState::AwaitingResponse;
        tracing::debug!(identity = %self.identity, "Answering realm challenge");
        Ok(AuthSession {
            identity: self.identity.clone(),
            client_seed,
            digest,
        })
    }

    /// Handle the verdict; on success returns the connection cipher key.
    pub fn on_response(&mut self, response: &AuthResponse) -> Result<[u8; DIGEST_LEN], JoinError> {
        if self.state != JoinState::AwaitingResponse {
            return Err(self.fail(JoinError::UnexpectedState(self.state)));
        }
        if response.result != JoinResult::Ok {
            return Err(self.fail(JoinError::Rejected(response.result)));
        }
        let Some((client_seed, server_seed)) = self.seeds else {
            return Err(self.fail(JoinError::UnexpectedState(self.state)));
        };
        let key = connection_key(&self.key, &client_seed, &server_seed)
            .map_err(|e| self.fail(e.into()))?;
        self.state = JoinState::Joined;
        tracing::info!(identity = %self.identity, "Joined realm");
        Ok(key)
    }

    fn fail(&mut self, error: JoinError) -> JoinError {
        tracing::error!(identity = %self.identity, "Realm join failed: {error}");
        self.state = JoinState::Failed;
        error
    }
}

/// Realm half of the join handshake, one per connection.
#[derive(Debug, Clone)]
pub struct JoinVerifier {
    server_seed: [u8; SEED_LEN],
}

impl JoinVerifier {
    /// Verifier with a fresh random seed.
    pub fn new() -> Self {
        Self::with_seed(random_seed())
    }

    pub fn with_seed(server_seed: [u8; SEED_LEN]) -> Self {
        Self { server_seed }
    }

    pub fn server_seed(&self) -> &[u8; SEED_LEN] {
        &self.server_seed
    }

    /// The opening packet.
    pub fn challenge(&self) -> AuthChallenge {
        AuthChallenge {
            server_seed: self.server_seed,
        }
    }

    /// Check `session` against the key obtained out of band.
    pub fn verify(&self, session: &AuthSession, key: &SessionKey) -> Result<(), JoinError> {
        if verify_join_digest(
            &session.identity,
            &session.client_seed,
            &self.server_seed,
            key,
            &session.digest,
        ) {
            Ok(())
        } else {
            tracing::warn!(identity = %session.identity, "Join digest mismatch");
            Err(JoinError::DigestMismatch)
        }
    }

    /// Cipher key for the connection `session` arrived on.
    pub fn connection_key(
        &self,
        session: &AuthSession,
        key: &SessionKey,
    ) -> Result<[u8; DIGEST_LEN], CipherError> {
        connection_key(key, &session.client_seed, &self.server_seed)
    }
}

impl Default for JoinVerifier {
    fn default() -> Self {
        Self::new()
    }
}
