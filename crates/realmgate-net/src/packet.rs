//! Packet payload codec.
//!
//! Every payload is a flat little-endian byte sequence:
//!
//! ```text
//! integers / f32   fixed width, little-endian
//! short string     [len: u8][utf-8 bytes]       (no terminator)
//! long string      [len: u16 LE][utf-8 bytes]
//! fixed arrays     raw bytes, length agreed by both sides
//! ```
//!
//! Message types implement [`WireMessage`] to bind an [`Opcode`] to an
//! encoder/decoder pair.

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};

/// Fixed-width identifier of a packet's meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(pub u16);

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Errors produced while encoding or decoding a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// The payload ended before the field was complete.
    #[error("packet truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the field required.
        needed: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },
    /// A string field was not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    /// A variable-length field does not fit its length prefix.
    #[error("field of {len} bytes exceeds the {max}-byte limit")]
    FieldTooLong {
        /// Actual length.
        len: usize,
        /// Maximum the prefix can express.
        max: usize,
    },
    /// Bytes remained after the last field of a message.
    #[error("{0} trailing bytes after packet body")]
    TrailingBytes(usize),
    /// A field carried a value outside its domain.
    #[error("invalid value {value} for field `{field}`")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Offending raw value.
        value: u64,
    },
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Append-only payload builder.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `u8`.
    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    /// Append a little-endian `u16`.
    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16_le(value);
        self
    }

    /// Append a little-endian `u32`.
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32_le(value);
        self
    }

    /// Append a little-endian `u64`.
    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64_le(value);
        self
    }

    /// Append a little-endian `f32`.
    pub fn put_f32(&mut self, value: f32) -> &mut Self {
        self.buf.put_f32_le(value);
        self
    }

    /// Append raw bytes with no length prefix.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    /// Append a `u8`-length-prefixed string.
    pub fn put_str_u8(&mut self, value: &str) -> Result<&mut Self, PacketError> {
        let len = u8::try_from(value.len()).map_err(|_| PacketError::FieldTooLong {
            len: value.len(),
            max: usize::from(u8::MAX),
        })?;
        self.buf.put_u8(len);
        self.buf.put_slice(value.as_bytes());
        Ok(self)
    }

    /// Append a `u16`-length-prefixed string.
    pub fn put_str_u16(&mut self, value: &str) -> Result<&mut Self, PacketError> {
        let len = u16::try_from(value.len()).map_err(|_| PacketError::FieldTooLong {
            len: value.len(),
            max: usize::from(u16::MAX),
        })?;
        self.buf.put_u16_le(len);
        self.buf.put_slice(value.as_bytes());
        Ok(self)
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the writer and return the payload.
    pub fn finish(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Bounds-checked cursor over a received payload.
#[derive(Debug)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
}

impl<'a> PacketReader<'a> {
    /// Start reading at the beginning of `payload`.
    pub fn new(payload: &'a [u8]) -> Self {
        Self { buf: payload }
    }

    fn need(&self, needed: usize) -> Result<(), PacketError> {
        if self.buf.remaining() < needed {
            return Err(PacketError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    /// Read a `u8`.
    pub fn read_u8(&mut self) -> Result<u8, PacketError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, PacketError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, PacketError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    /// Read a little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, PacketError> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    /// Read a little-endian `f32`.
    pub fn read_f32(&mut self) -> Result<f32, PacketError> {
        self.need(4)?;
        Ok(self.buf.get_f32_le())
    }

    /// Read `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], PacketError> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Read a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], PacketError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Read a `u8`-length-prefixed string.
    pub fn read_str_u8(&mut self) -> Result<String, PacketError> {
        let len = usize::from(self.read_u8()?);
        self.read_utf8(len)
    }

    /// Read a `u16`-length-prefixed string.
    pub fn read_str_u16(&mut self) -> Result<String, PacketError> {
        let len = usize::from(self.read_u16()?);
        self.read_utf8(len)
    }

    fn read_utf8(&mut self, len: usize) -> Result<String, PacketError> {
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| PacketError::InvalidUtf8)
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Fail if any bytes remain unread.
    pub fn expect_end(&self) -> Result<(), PacketError> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(PacketError::TrailingBytes(n)),
        }
    }
}

// ---------------------------------------------------------------------------
// WireMessage
// ---------------------------------------------------------------------------

/// A packet type with a fixed opcode and a payload codec.
pub trait WireMessage: Sized {
    /// Opcode carried in the frame header.
    const OPCODE: Opcode;

    /// Append this message's fields.
    fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError>;

    /// Parse the message's fields.
    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError>;

    /// Encode into a standalone payload.
    fn to_payload(&self) -> Result<Vec<u8>, PacketError> {
        let mut writer = PacketWriter::new();
        self.encode(&mut writer)?;
        Ok(writer.finish())
    }

    /// Decode a complete payload, rejecting trailing bytes.
    fn from_payload(payload: &[u8]) -> Result<Self, PacketError> {
        let mut reader = PacketReader::new(payload);
        let message = Self::decode(&mut reader)?;
        reader.expect_end()?;
        Ok(message)
    }
}
