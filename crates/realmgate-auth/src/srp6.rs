//! SRP6 password-authenticated key exchange.
//!
//! All big integers travel as 32 little-endian bytes and every hash is SHA-1.
//! Identity and password are upper-cased (ASCII) before hashing so the same
//! credentials always produce the same verifier.
//!
//! ```text
//! x  = H(salt ‖ H(I ":" P))          v = g^x
//! A  = g^a                           B = k·v + g^b
//! u  = H(A ‖ B)
//! S  = (B − k·g^x)^(a + u·x)        (client)
//!    = (A · v^u)^b                   (server)
//! K  = interleave(H(even bytes of S), H(odd bytes of S))
//! M1 = H(H(N) ⊕ H(g) ‖ H(I) ‖ salt ‖ A ‖ B ‖ K)
//! M2 = H(A ‖ M1 ‖ K)
//! ```
//!
//! The client never sees `K` directly: [`SrpClient::process_challenge`]
//! hands back a [`PendingSessionKey`] that yields a [`SessionKey`] only once
//! the server's `M2` has been verified.

use std::fmt;

use num_bigint::BigUint;
use rand::RngCore;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

/// Width of every big integer on the wire.
pub const BIGNUM_LEN: usize = 32;
/// Salt length.
pub const SALT_LEN: usize = 32;
/// SHA-1 digest length; also the proof length.
pub const DIGEST_LEN: usize = 20;
/// Session key length.
pub const SESSION_KEY_LEN: usize = 40;
/// Length of the random private exponents `a` and `b`.
pub const PRIVATE_KEY_LEN: usize = 19;

/// Generator `g`.
pub const GENERATOR: u8 = 7;
/// Multiplier `k`.
pub const MULTIPLIER: u8 = 3;

/// Safe prime `N`, big-endian.
const PRIME_BE: [u8; BIGNUM_LEN] = [
    0x89, 0x4B, 0x64, 0x5E, 0x89, 0xE1, 0x53, 0x5B, 0xBD, 0xAD, 0x5B, 0x8B, 0x29, 0x06, 0x50, 0x53,
    0x08, 0x01, 0xB1, 0x8E, 0xBF, 0xBF, 0x5E, 0x8F, 0xAB, 0x3C, 0x82, 0x87, 0x2A, 0x3E, 0x9B, 0xB7,
];

/// A 32-byte little-endian big integer.
pub type Bignum = [u8; BIGNUM_LEN];
/// A SHA-1 digest.
pub type Digest20 = [u8; DIGEST_LEN];

/// Errors raised by the SRP6 computations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SrpError {
    /// The peer's `g` or `N` differs from the compiled-in group.
    #[error("server offered a different SRP6 group ({field})")]
    GroupMismatch {
        /// Which parameter differed.
        field: &'static str,
    },
    /// `A` or `B` is congruent to zero modulo `N`.
    #[error("peer public key is zero modulo N")]
    ZeroPublicKey,
    /// The scrambling parameter `u` is zero.
    #[error("scrambling parameter is zero")]
    ZeroScrambler,
    /// The shared secret `S` is zero.
    #[error("shared secret is zero")]
    ZeroSecret,
    /// The client proof `M1` did not match.
    #[error("client proof mismatch")]
    ClientProofMismatch,
    /// The server proof `M2` did not match.
    #[error("server proof mismatch")]
    ServerProofMismatch,
    /// A computed value does not fit the wire width.
    #[error("value exceeds {BIGNUM_LEN} bytes")]
    Overflow,
}

// ---------------------------------------------------------------------------
// Group and helpers
// ---------------------------------------------------------------------------

fn prime() -> BigUint {
    BigUint::from_bytes_be(&PRIME_BE)
}

/// `N` as it appears on the wire.
pub fn prime_le() -> Bignum {
    let mut le = PRIME_BE;
    le.reverse();
    le
}

fn sha1(parts: &[&[u8]]) -> Digest20 {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn is_zero(value: &BigUint) -> bool {
    value.bits() == 0
}

fn to_bignum(value: &BigUint) -> Result<Bignum, SrpError> {
    let bytes = value.to_bytes_le();
    if bytes.len() > BIGNUM_LEN {
        return Err(SrpError::Overflow);
    }
    let mut out = [0u8; BIGNUM_LEN];
    out[..bytes.len()].copy_from_slice(&bytes);
    Ok(out)
}

fn from_le(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_le(bytes)
}

fn random_private_key() -> [u8; PRIVATE_KEY_LEN] {
    let mut key = [0u8; PRIVATE_KEY_LEN];
    rand::rng().fill_bytes(&mut key);
    key
}

/// Fresh random salt for a new account.
pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

fn normalize(value: &str) -> String {
    value.to_ascii_uppercase()
}

fn private_exponent(identity: &str, password: &str, salt: &[u8; SALT_LEN]) -> BigUint {
    let credentials = format!("{}:{}", normalize(identity), normalize(password));
    let inner = sha1(&[credentials.as_bytes()]);
    from_le(&sha1(&[salt, &inner]))
}

/// The verifier `v = g^x` a directory stores instead of the password.
pub fn compute_verifier(identity: &str, password: &str, salt: &[u8; SALT_LEN]) -> Bignum {
    let x = private_exponent(identity, password, salt);
    let v = BigUint::from(GENERATOR).modpow(&x, &prime());
    // v < N, which is exactly BIGNUM_LEN bytes wide.
    to_bignum(&v).unwrap_or_default()
}

/// Derive the 40-byte session key from the shared secret.
pub fn interleave(secret: &Bignum) -> [u8; SESSION_KEY_LEN] {
    let even: Vec<u8> = secret.iter().step_by(2).copied().collect();
    let odd: Vec<u8> = secret.iter().skip(1).step_by(2).copied().collect();
    let even_hash = sha1(&[even.as_slice()]);
    let odd_hash = sha1(&[odd.as_slice()]);

    let mut key = [0u8; SESSION_KEY_LEN];
    for i in 0..DIGEST_LEN {
        key[2 * i] = even_hash[i];
        key[2 * i + 1] = odd_hash[i];
    }
    key
}

fn scrambler(a: &Bignum, b: &Bignum) -> Result<BigUint, SrpError> {
    let u = from_le(&sha1(&[a, b]));
    if is_zero(&u) {
        return Err(SrpError::ZeroScrambler);
    }
    Ok(u)
}

fn client_proof(
    identity: &str,
    salt: &[u8; SALT_LEN],
    a: &Bignum,
    b: &Bignum,
    key: &[u8; SESSION_KEY_LEN],
) -> Digest20 {
    let n_hash = sha1(&[&prime_le()]);
    let g_hash = sha1(&[&[GENERATOR]]);
    let mut group_hash = [0u8; DIGEST_LEN];
    for (out, (n, g)) in group_hash.iter_mut().zip(n_hash.iter().zip(g_hash.iter())) {
        *out = n ^ g;
    }
    let identity_hash = sha1(&[normalize(identity).as_bytes()]);
    sha1(&[&group_hash, &identity_hash, salt, a, b, key])
}

fn server_proof(a: &Bignum, m1: &Digest20, key: &[u8; SESSION_KEY_LEN]) -> Digest20 {
    sha1(&[a, m1, key])
}

fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    bool::from(a.ct_eq(b))
}

// ---------------------------------------------------------------------------
// SessionKey
// ---------------------------------------------------------------------------

/// A verified 40-byte session key.
#[derive(Clone)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    /// Wrap key bytes received from a trusted authority.
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw key.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        ct_eq(&self.0, &other.0)
    }
}

impl Eq for SessionKey {}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// `A` and `M1`, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProof {
    /// Client public key `A`.
    pub public_key: Bignum,
    /// Client proof `M1`.
    pub proof: Digest20,
}

/// Session key held back until the server proves knowledge of it.
pub struct PendingSessionKey {
    key: [u8; SESSION_KEY_LEN],
    expected_m2: Digest20,
}

impl PendingSessionKey {
    /// Check the server's `M2` and release the key.
    pub fn verify(self, server_proof: &Digest20) -> Result<SessionKey, SrpError> {
        if !ct_eq(&self.expected_m2, server_proof) {
            return Err(SrpError::ServerProofMismatch);
        }
        Ok(SessionKey(self.key))
    }
}

impl fmt::Debug for PendingSessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PendingSessionKey(..)")
    }
}

/// Client half of the exchange.
pub struct SrpClient {
    identity: String,
    password: String,
    private_key: BigUint,
}

impl SrpClient {
    /// Client with a fresh random private exponent.
    pub fn new(identity: &str, password: &str) -> Self {
        Self::with_private_key(identity, password, random_private_key())
    }

    /// Client with a caller-chosen private exponent.
    pub fn with_private_key(
        identity: &str,
        password: &str,
        private_key: [u8; PRIVATE_KEY_LEN],
    ) -> Self {
        Self {
            identity: identity.to_string(),
            password: password.to_string(),
            private_key: from_le(&private_key),
        }
    }

    /// Answer the server challenge.
    ///
    /// Rejects a foreign group, `B ≡ 0 (mod N)`, `u = 0` and `S = 0`; all are
    /// fatal protocol errors.
    pub fn process_challenge(
        &self,
        server_public: &Bignum,
        generator: u8,
        modulus: &Bignum,
        salt: &[u8; SALT_LEN],
    ) -> Result<(ClientProof, PendingSessionKey), SrpError> {
        if generator != GENERATOR {
            return Err(SrpError::GroupMismatch { field: "g" });
        }
        if !ct_eq(modulus, &prime_le()) {
            return Err(SrpError::GroupMismatch { field: "N" });
        }

        let n = prime();
        let b = from_le(server_public) % &n;
        if is_zero(&b) {
            return Err(SrpError::ZeroPublicKey);
        }

        let g = BigUint::from(GENERATOR);
        let a_public = to_bignum(&g.modpow(&self.private_key, &n))?;
        let u = scrambler(&a_public, server_public)?;
        let x = private_exponent(&self.identity, &self.password, salt);

        let kv = (BigUint::from(MULTIPLIER) * g.modpow(&x, &n)) % &n;
        let base = (b + &n - kv) % &n;
        let exponent = &self.private_key + u * x;
        let secret = base.modpow(&exponent, &n);
        if is_zero(&secret) {
            return Err(SrpError::ZeroSecret);
        }

        let key = interleave(&to_bignum(&secret)?);
        let m1 = client_proof(&self.identity, salt, &a_public, server_public, &key);
        let expected_m2 = server_proof(&a_public, &m1, &key);

        Ok((
            ClientProof {
                public_key: a_public,
                proof: m1,
            },
            PendingSessionKey { key, expected_m2 },
        ))
    }
}

impl fmt::Debug for SrpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrpClient")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Result of a verified client proof.
#[derive(Debug, Clone)]
pub struct ServerSession {
    /// Shared session key.
    pub key: SessionKey,
    /// Server proof `M2` to send back.
    pub proof: Digest20,
}

/// Server half of the exchange, for one login attempt.
pub struct SrpServer {
    identity: String,
    salt: [u8; SALT_LEN],
    verifier: BigUint,
    private_key: BigUint,
    public_key: Bignum,
}

impl SrpServer {
    /// Server with a fresh random private exponent.
    pub fn new(identity: &str, salt: [u8; SALT_LEN], verifier: &Bignum) -> Result<Self, SrpError> {
        Self::with_private_key(identity, salt, verifier, random_private_key())
    }

    /// Server with a caller-chosen private exponent.
    pub fn with_private_key(
        identity: &str,
        salt: [u8; SALT_LEN],
        verifier: &Bignum,
        private_key: [u8; PRIVATE_KEY_LEN],
    ) -> Result<Self, SrpError> {
        let n = prime();
        let v = from_le(verifier);
        let b = from_le(&private_key);
        let public =
            (BigUint::from(MULTIPLIER) * &v + BigUint::from(GENERATOR).modpow(&b, &n)) % &n;
        Ok(Self {
            identity: identity.to_string(),
            salt,
            verifier: v,
            private_key: b,
            public_key: to_bignum(&public)?,
        })
    }

    /// Server public key `B`.
    pub fn public_key(&self) -> &Bignum {
        &self.public_key
    }

    /// The account salt.
    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    /// Verify the client's `A` and `M1` in constant time.
    pub fn verify_client(
        &self,
        client_public: &Bignum,
        client_proof_m1: &Digest20,
    ) -> Result<ServerSession, SrpError> {
        let n = prime();
        let a = from_le(client_public) % &n;
        if is_zero(&a) {
            return Err(SrpError::ZeroPublicKey);
        }
        let u = scrambler(client_public, &self.public_key)?;

        let secret = (a * self.verifier.modpow(&u, &n)).modpow(&self.private_key, &n);
        if is_zero(&secret) {
            return Err(SrpError::ZeroSecret);
        }

        let key = interleave(&to_bignum(&secret)?);
        let expected = client_proof(
            &self.identity,
            &self.salt,
            client_public,
            &self.public_key,
            &key,
        );
        if !ct_eq(&expected, client_proof_m1) {
            return Err(SrpError::ClientProofMismatch);
        }

        Ok(ServerSession {
            proof: server_proof(client_public, client_proof_m1, &key),
            key: SessionKey(key),
        })
    }
}

impl fmt::Debug for SrpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrpServer")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
