//! Login, realm-join and upstream session-key messages.
//!
//! Login directory connection:
//!
//! | opcode | direction | message |
//! |---|---|---|
//! | `0x0001` | C→S | [`LogonHello`] |
//! | `0x0002` | S→C | [`LogonChallenge`] |
//! | `0x0003` | C→S | [`LogonProof`] |
//! | `0x0004` | S→C | [`LogonProofResult`] |
//! | `0x0010` | C→S | [`RealmListRequest`] |
//! | `0x0011` | S→C | [`RealmList`] |
//!
//! Realm connection: `0x01EC` [`AuthChallenge`], `0x01ED` [`AuthSession`],
//! `0x01EE` [`AuthResponse`]. Realm → directory: `0x0020`
//! [`SessionKeyQuery`], `0x0021` [`SessionKeyReply`].

use std::fmt;

use realmgate_net::{Opcode, PacketError, PacketReader, PacketWriter, WireMessage};

use crate::join::SEED_LEN;
use crate::srp6::{Bignum, DIGEST_LEN, Digest20, SALT_LEN, SESSION_KEY_LEN};

/// Login protocol revision this crate speaks.
pub const PROTOCOL_VERSION: u8 = 3;

// ---------------------------------------------------------------------------
// Result codes
// ---------------------------------------------------------------------------

/// Login directory result code. Unknown codes are kept verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogonResult {
    Success,
    Banned,
    UnknownAccount,
    IncorrectPassword,
    AlreadyOnline,
    Busy,
    VersionInvalid,
    Suspended,
    Other(u8),
}

impl LogonResult {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Success,
            0x03 => Self::Banned,
            0x04 => Self::UnknownAccount,
            0x05 => Self::IncorrectPassword,
            0x06 => Self::AlreadyOnline,
            0x08 => Self::Busy,
            0x09 => Self::VersionInvalid,
            0x0C => Self::Suspended,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0x00,
            Self::Banned => 0x03,
            Self::UnknownAccount => 0x04,
            Self::IncorrectPassword => 0x05,
            Self::AlreadyOnline => 0x06,
            Self::Busy => 0x08,
            Self::VersionInvalid => 0x09,
            Self::Suspended => 0x0C,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for LogonResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} (0x{:02X})", self.code())
    }
}

/// Realm join result code. Unknown codes are kept verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinResult {
    Ok,
    Failed,
    Reject,
    BadProof,
    Unavailable,
    SystemError,
    UnknownAccount,
    SessionExpired,
    Other(u8),
}

impl JoinResult {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x0C => Self::Ok,
            0x0D => Self::Failed,
            0x0E => Self::Reject,
            0x0F => Self::BadProof,
            0x10 => Self::Unavailable,
            0x11 => Self::SystemError,
            0x15 => Self::UnknownAccount,
            0x17 => Self::SessionExpired,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0x0C,
            Self::Failed => 0x0D,
            Self::Reject => 0x0E,
            Self::BadProof => 0x0F,
            Self::Unavailable => 0x10,
            Self::SystemError => 0x11,
            Self::UnknownAccount => 0x15,
            Self::SessionExpired => 0x17,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for JoinResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} (0x{:02X})", self.code())
    }
}

// ---------------------------------------------------------------------------
// Login directory
// ---------------------------------------------------------------------------

/// First client packet: who is logging in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogonHello {
    pub protocol_version: u8,
    pub identity: String,
}

impl WireMessage for LogonHello {
    const OPCODE: Opcode = Opcode(0x0001);

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError> {
        writer.put_u8(self.protocol_version).put_str_u8(&self.identity)?;
        Ok(())
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        Ok(Self {
            protocol_version: reader.read_u8()?,
            identity: reader.read_str_u8()?,
        })
    }
}

/// Group parameters and salt offered by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeParams {
    pub server_public: Bignum,
    pub generator: u8,
    pub modulus: Bignum,
    pub salt: [u8; SALT_LEN],
}

/// Directory reply to [`LogonHello`]. Parameters are present only on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogonChallenge {
    pub result: LogonResult,
    pub params: Option<ChallengeParams>,
}

impl WireMessage for LogonChallenge {
    const OPCODE: Opcode = Opcode(0x0002);

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError> {
        writer.put_u8(self.result.code());
        if let Some(params) = &self.params {
            writer
                .put_bytes(&params.server_public)
                .put_u8(params.generator)
                .put_bytes(&params.modulus)
                .put_bytes(&params.salt);
        }
        Ok(())
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        let result = LogonResult::from_code(reader.read_u8()?);
        let params = if result == LogonResult::Success {
            Some(ChallengeParams {
                server_public: reader.read_array()?,
                generator: reader.read_u8()?,
                modulus: reader.read_array()?,
                salt: reader.read_array()?,
            })
        } else {
            None
        };
        Ok(Self { result, params })
    }
}

/// Client public key and proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogonProof {
    pub client_public: Bignum,
    pub client_proof: Digest20,
}

impl WireMessage for LogonProof {
    const OPCODE: Opcode = Opcode(0x0003);

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError> {
        writer
            .put_bytes(&self.client_public)
            .put_bytes(&self.client_proof);
        Ok(())
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        Ok(Self {
            client_public: reader.read_array()?,
            client_proof: reader.read_array()?,
        })
    }
}

/// Directory verdict on [`LogonProof`]; carries `M2` on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogonProofResult {
    pub result: LogonResult,
    pub server_proof: Option<Digest20>,
}

impl WireMessage for LogonProofResult {
    const OPCODE: Opcode = Opcode(0x0004);

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError> {
        writer.put_u8(self.result.code());
        if let Some(proof) = &self.server_proof {
            writer.put_bytes(proof);
        }
        Ok(())
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        let result = LogonResult::from_code(reader.read_u8()?);
        let server_proof = if result == LogonResult::Success {
            Some(reader.read_array::<DIGEST_LEN>()?)
        } else {
            None
        };
        Ok(Self {
            result,
            server_proof,
        })
    }
}

/// Ask for the realm list. Sent encrypted after authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RealmListRequest;

impl WireMessage for RealmListRequest {
    const OPCODE: Opcode = Opcode(0x0010);

    fn encode(&self, _writer: &mut PacketWriter) -> Result<(), PacketError> {
        Ok(())
    }

    fn decode(_reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        Ok(Self)
    }
}

/// One realm entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RealmInfo {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub population: f32,
}

/// Realms the account may join.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RealmList {
    pub realms: Vec<RealmInfo>,
}

impl RealmList {
    /// Case-insensitive lookup by realm name.
    pub fn find(&self, name: &str) -> Option<&RealmInfo> {
        self.realms
            .iter()
            .find(|realm| realm.name.eq_ignore_ascii_case(name))
    }
}

impl WireMessage for RealmList {
    const OPCODE: Opcode = Opcode(0x0011);

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError> {
        let count = u16::try_from(self.realms.len()).map_err(|_| PacketError::FieldTooLong {
            len: self.realms.len(),
            max: usize::from(u16::MAX),
        })?;
        writer.put_u16(count);
        for realm in &self.realms {
            writer.put_str_u8(&realm.name)?.put_str_u8(&realm.host)?;
            writer.put_u16(realm.port).put_f32(realm.population);
        }
        Ok(())
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        let count = reader.read_u16()?;
        let mut realms = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            realms.push(RealmInfo {
                name: reader.read_str_u8()?,
                host: reader.read_str_u8()?,
                port: reader.read_u16()?,
                population: reader.read_f32()?,
            });
        }
        Ok(Self { realms })
    }
}

// ---------------------------------------------------------------------------
// Realm join
// ---------------------------------------------------------------------------

/// Realm server's opening packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub server_seed: [u8; SEED_LEN],
}

impl WireMessage for AuthChallenge {
    const OPCODE: Opcode = Opcode(0x01EC);

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError> {
        writer.put_bytes(&self.server_seed);
        Ok(())
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        Ok(Self {
            server_seed: reader.read_array()?,
        })
    }
}

/// Client proof of the session key obtained at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub identity: String,
    pub client_seed: [u8; SEED_LEN],
    pub digest: Digest20,
}

impl WireMessage for AuthSession {
    const OPCODE: Opcode = Opcode(0x01ED);

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError> {
        writer.put_str_u8(&self.identity)?;
        writer.put_bytes(&self.client_seed).put_bytes(&self.digest);
        Ok(())
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        Ok(Self {
            identity: reader.read_str_u8()?,
            client_seed: reader.read_array()?,
            digest: reader.read_array()?,
        })
    }
}

/// Realm verdict on [`AuthSession`]. Always sent in plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthResponse {
    pub result: JoinResult,
}

impl WireMessage for AuthResponse {
    const OPCODE: Opcode = Opcode(0x01EE);

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError> {
        writer.put_u8(self.result.code());
        Ok(())
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        Ok(Self {
            result: JoinResult::from_code(reader.read_u8()?),
        })
    }
}

// ---------------------------------------------------------------------------
// Upstream session-key lookup
// ---------------------------------------------------------------------------

/// Realm → directory: fetch the session key for a joining account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeyQuery {
    pub request_id: u32,
    pub identity: String,
}

impl WireMessage for SessionKeyQuery {
    const OPCODE: Opcode = Opcode(0x0020);

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError> {
        writer.put_u32(self.request_id).put_str_u8(&self.identity)?;
        Ok(())
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        Ok(Self {
            request_id: reader.read_u32()?,
            identity: reader.read_str_u8()?,
        })
    }
}

/// Directory → realm: the account's session key, if it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeyReply {
    pub request_id: u32,
    pub result: JoinResult,
    pub key: Option<[u8; SESSION_KEY_LEN]>,
}

impl WireMessage for SessionKeyReply {
    const OPCODE: Opcode = Opcode(0x0021);

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError> {
        writer.put_u32(self.request_id).put_u8(self.result.code());
        if let Some(key) = &self.key {
            writer.put_bytes(key);
        }
        Ok(())
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        let request_id = reader.read_u32()?;
        let result = JoinResult::from_code(reader.read_u8()?);
        let key = if result == JoinResult::Ok {
            Some(reader.read_array()?)
        } else {
            None
        };
        Ok(Self {
            request_id,
            result,
            key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srp6::prime_le;

    #[test]
    fn test_failed_challenge_has_no_parameters() {
        let msg = LogonChallenge {
            result: LogonResult::Banned,
            params: None,
        };
        let payload = msg.to_payload().unwrap();
        assert_eq!(payload, vec![0x03]);
        assert_eq!(LogonChallenge::from_payload(&payload).unwrap(), msg);
    }

    #[test]
    fn test_successful_challenge_layout() {
        let msg = LogonChallenge {
            result: LogonResult::Success,
            params: Some(ChallengeParams {
                server_public: [0xBB; 32],
                generator: 7,
                modulus: prime_le(),
                salt: [0x55; 32],
            }),
        };
        let payload = msg.to_payload().unwrap();
        assert_eq!(payload.len(), 1 + 32 + 1 + 32 + 32);
        assert_eq!(payload[33], 7);
        assert_eq!(LogonChallenge::from_payload(&payload).unwrap(), msg);
    }

    #[test]
    fn test_truncated_success_challenge_rejected() {
        assert!(matches!(
            LogonChallenge::from_payload(&[0x00, 0xBB]),
            Err(PacketError::Truncated { .. })
        ));
    }

    #[test]
    fn test_unknown_result_code_kept_verbatim() {
        let reply = LogonProofResult::from_payload(&[0x42]).unwrap();
        assert_eq!(reply.result, LogonResult::Other(0x42));
        assert_eq!(reply.result.code(), 0x42);
        assert_eq!(JoinResult::from_code(0x99).code(), 0x99);
    }

    #[test]
    fn test_realm_list_lookup_ignores_case() {
        let list = RealmList {
            realms: vec![RealmInfo {
                name: "Silverpine".into(),
                host: "127.0.0.1".into(),
                port: 8085,
                population: 0.5,
            }],
        };
        let decoded = RealmList::from_payload(&list.to_payload().unwrap()).unwrap();
        assert_eq!(decoded.find("SILVERPINE").map(|r| r.port), Some(8085));
        assert!(decoded.find("Stormreaver").is_none());
    }

    #[test]
    fn test_session_key_reply_without_key_on_failure() {
        let reply = SessionKeyReply {
            request_id: 9,
            result: JoinResult::UnknownAccount,
            key: None,
        };
        let payload = reply.to_payload().unwrap();
        assert_eq!(payload.len(), 5);
        assert_eq!(SessionKeyReply::from_payload(&payload).unwrap(), reply);
    }
}
