//! Post-handshake stream cipher.
//!
//! Each direction of a connection gets its own RC4 keystream whose key is
//! `HMAC-SHA1(direction label, key material)`. The first
//! [`KEYSTREAM_DROP`] bytes of every keystream are discarded. Key material is
//! the SRP6 session key on the login connection and a per-connection key
//! derived from it on realm connections.

use std::fmt;

use hmac::{Hmac, Mac};
use rc4::consts::U20;
use rc4::{KeyInit, Rc4, StreamCipher};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Number of initial keystream bytes thrown away.
pub const KEYSTREAM_DROP: usize = 1024;

const CLIENT_TO_SERVER: &[u8] = b"realmgate client->server";
const SERVER_TO_CLIENT: &[u8] = b"realmgate server->client";

/// Which end of the connection a cipher instance belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherRole {
    /// Encrypts client→server, decrypts server→client.
    Client,
    /// Encrypts server→client, decrypts client→server.
    Server,
}

/// Errors raised while keying a cipher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    /// No key material was supplied.
    #[error("cipher key material is empty")]
    EmptyKey,
    /// The derived key did not fit the cipher.
    #[error("invalid cipher key length")]
    InvalidKeyLength,
}

/// `HMAC-SHA1(key, data)`.
pub fn hmac_sha1(key: &[u8], data: &[u8]) -> Result<[u8; 20], CipherError> {
    let mut mac =
        <HmacSha1 as Mac>::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

fn keystream(label: &[u8], key_material: &[u8]) -> Result<Rc4<U20>, CipherError> {
    let key = hmac_sha1(label, key_material)?;
    let mut rc4 = Rc4::<U20>::new_from_slice(&key).map_err(|_| CipherError::InvalidKeyLength)?;
    let mut discard = [0u8; KEYSTREAM_DROP];
    rc4.apply_keystream(&mut discard);
    Ok(rc4)
}

/// Bidirectional cipher state for one connection.
pub struct SessionCipher {
    outbound: Rc4<U20>,
    inbound: Rc4<U20>,
}

impl SessionCipher {
    /// Key both directions from `key_material`.
    pub fn new(key_material: &[u8], role: CipherRole) -> Result<Self, CipherError> {
        if key_material.is_empty() {
            return Err(CipherError::EmptyKey);
        }
        let (out_label, in_label) = match role {
            CipherRole::Client => (CLIENT_TO_SERVER, SERVER_TO_CLIENT),
            CipherRole::Server => (SERVER_TO_CLIENT, CLIENT_TO_SERVER),
        };
        Ok(Self {
            outbound: keystream(out_label, key_material)?,
            inbound: keystream(in_label, key_material)?,
        })
    }

    /// Encrypt an outbound body in place.
    pub fn encrypt(&mut self, body: &mut [u8]) {
        self.outbound.apply_keystream(body);
    }

    /// Decrypt an inbound body in place.
    pub fn decrypt(&mut self, body: &mut [u8]) {
        self.inbound.apply_keystream(body);
    }
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCipher").finish_non_exhaustive()
    }
}
