//! Server-side framed stream.
//!
//! [`FramedPeer`] is the accepting end of a connection: it speaks the same
//! framing and cipher as [`TransportConnector`](crate::TransportConnector) but
//! with plain `async` send/receive calls. Upstream authorities and scripted
//! test servers are built on it.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::cipher::{CipherError, CipherRole, SessionCipher};
use crate::framing::{self, FrameConfig, FrameError};
use crate::packet::{Opcode, PacketError, WireMessage};

/// Errors from a [`FramedPeer`].
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Framing or I/O failure.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// Payload did not decode.
    #[error(transparent)]
    Packet(#[from] PacketError),
    /// Cipher could not be keyed.
    #[error(transparent)]
    Cipher(#[from] CipherError),
    /// A body too short to carry an opcode.
    #[error("malformed frame body")]
    Malformed,
    /// The peer sent a different packet than the one awaited.
    #[error("expected opcode {expected}, got {actual}")]
    UnexpectedOpcode {
        /// Opcode awaited.
        expected: Opcode,
        /// Opcode received.
        actual: Opcode,
    },
}

/// A framed, optionally encrypted stream.
pub struct FramedPeer<S = TcpStream> {
    stream: S,
    role: CipherRole,
    config: FrameConfig,
    cipher: Option<SessionCipher>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedPeer<S> {
    /// Wrap `stream`; `role` selects which keystream encrypts outbound bodies
    /// once a cipher is installed.
    pub fn new(stream: S, role: CipherRole) -> Self {
        Self {
            stream,
            role,
            config: FrameConfig::default(),
            cipher: None,
        }
    }

    /// Key the cipher; applies to every frame sent or received afterwards.
    pub fn install_cipher(&mut self, key_material: &[u8]) -> Result<(), PeerError> {
        self.cipher = Some(SessionCipher::new(key_material, self.role)?);
        Ok(())
    }

    /// Whether a cipher is installed.
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Send one packet.
    pub async fn send(&mut self, opcode: Opcode, payload: &[u8]) -> Result<(), PeerError> {
        let mut body = framing::encode_body(opcode, payload);
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.encrypt(&mut body);
        }
        framing::write_frame(&mut self.stream, &body, &self.config).await?;
        Ok(())
    }

    /// Encode and send a typed message.
    pub async fn send_message<M: WireMessage>(&mut self, message: &M) -> Result<(), PeerError> {
        let payload = message.to_payload()?;
        self.send(M::OPCODE, &payload).await
    }

    /// Write a frame whose body is sent verbatim: no opcode is added and the
    /// cipher is bypassed.
    pub async fn send_raw_body(&mut self, body: &[u8]) -> Result<(), PeerError> {
        framing::write_frame(&mut self.stream, body, &self.config).await?;
        Ok(())
    }

    /// Receive one packet.
    pub async fn recv(&mut self) -> Result<(Opcode, Vec<u8>), PeerError> {
        let mut body = framing::read_frame(&mut self.stream, &self.config).await?;
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.decrypt(&mut body);
        }
        framing::split_body(body).ok_or(PeerError::Malformed)
    }

    /// Receive one packet and decode it as `M`.
    pub async fn recv_message<M: WireMessage>(&mut self) -> Result<M, PeerError> {
        let (opcode, payload) = self.recv().await?;
        if opcode != M::OPCODE {
            return Err(PeerError::UnexpectedOpcode {
                expected: M::OPCODE,
                actual: opcode,
            });
        }
        Ok(M::from_payload(&payload)?)
    }

    /// Flush and shut down the write half.
    pub async fn shutdown(&mut self) -> Result<(), PeerError> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| PeerError::Frame(FrameError::Io(e)))
    }

    /// Unwrap the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PacketReader, PacketWriter};
    use tokio::io::duplex;

    #[derive(Debug, PartialEq)]
    struct Ping(u32);

    impl WireMessage for Ping {
        const OPCODE: Opcode = Opcode(0x01DC);

        fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError> {
            writer.put_u32(self.0);
            Ok(())
        }

        fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
            Ok(Self(reader.read_u32()?))
        }
    }

    #[tokio::test]
    async fn test_encrypted_message_exchange() {
        let (a, b) = duplex(4096);
        let mut client = FramedPeer::new(a, CipherRole::Client);
        let mut server = FramedPeer::new(b, CipherRole::Server);
        client.install_cipher(b"key").unwrap();
        server.install_cipher(b"key").unwrap();

        client.send_message(&Ping(7)).await.unwrap();
        assert_eq!(server.recv_message::<Ping>().await.unwrap(), Ping(7));
        server.send_message(&Ping(8)).await.unwrap();
        assert_eq!(client.recv_message::<Ping>().await.unwrap(), Ping(8));
    }

    #[tokio::test]
    async fn test_unexpected_opcode_reported() {
        let (a, b) = duplex(4096);
        let mut client = FramedPeer::new(a, CipherRole::Client);
        let mut server = FramedPeer::new(b, CipherRole::Server);

        client.send(Opcode(0x0001), &[]).await.unwrap();
        assert!(matches!(
            server.recv_message::<Ping>().await,
            Err(PeerError::UnexpectedOpcode {
                expected: Opcode(0x01DC),
                actual: Opcode(0x0001)
            })
        ));
    }

    #[tokio::test]
    async fn test_short_raw_body_is_malformed() {
        let (a, b) = duplex(4096);
        let mut client = FramedPeer::new(a, CipherRole::Client);
        let mut server = FramedPeer::new(b, CipherRole::Server);

        client.send_raw_body(&[0x42]).await.unwrap();
        assert!(matches!(server.recv().await, Err(PeerError::Malformed)));
    }
}
