//! The [`Deserializable`] trait, the [`Cursor`] reader, and primitive impls.

use std::fmt;

// ─── Error ───────────────────────────────────────────────────────────────────

/// Errors that can occur while reading TL data.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Ran out of bytes before the value was fully read.
    UnexpectedEof,
    /// Decoded a constructor ID that doesn't match any expected variant.
    UnexpectedConstructor {
        /// The offending constructor ID.
        id: u32,
    },
    /// A byte-string started with the forbidden length marker `0xff`.
    InvalidLengthMarker,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of buffer"),
            Self::UnexpectedConstructor { id } => {
                write!(f, "unexpected constructor id: {id:#010x}")
            }
            Self::InvalidLengthMarker => write!(f, "string length marker 0xff is forbidden"),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for deserialization.
pub type Result<T> = std::result::Result<T, Error>;

// ─── Cursor ──────────────────────────────────────────────────────────────────

/// A zero-copy cursor over an in-memory byte slice.
///
/// Narrower than `std::io::Cursor`: only the three error cases above can
/// occur, so callers never have to reason about a wide I/O error surface.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Create a cursor positioned at the start of `buf`.
    pub fn from_slice(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current byte offset.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Remaining bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Read a single byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        match self.buf.get(self.pos).copied() {
            Some(b) => {
                self.pos += 1;
                Ok(b)
            }
            None => Err(Error::UnexpectedEof),
        }
    }

    /// Read exactly `out.len()` bytes into `out`.
    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        let end = self.pos + out.len();
        if end > self.buf.len() {
            return Err(Error::UnexpectedEof);
        }
        out.copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    /// Borrow the next `n` bytes without copying.
    pub fn read_raw(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(Error::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Consume all remaining bytes into `out`, returning how many were read.
    pub fn read_to_end(&mut self, out: &mut Vec<u8>) -> usize {
        let slice = &self.buf[self.pos..];
        out.extend_from_slice(slice);
        self.pos = self.buf.len();
        slice.len()
    }

    /// Read a TL byte-string (1- or 4-byte length header, padded to a
    /// 4-byte boundary counted from the start of the field).
    ///
    /// A leading length byte of `0xff` is not a valid encoding and fails
    /// with [`Error::InvalidLengthMarker`].
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let first = self.read_byte()?;
        let (len, header) = match first {
            0xff => return Err(Error::InvalidLengthMarker),
            0xfe => {
                let a = self.read_byte()? as usize;
                let b = self.read_byte()? as usize;
                let c = self.read_byte()? as usize;
                (a | (b << 8) | (c << 16), 4)
            }
            n => (n as usize, 1),
        };

        let mut data = vec![0u8; len];
        self.read_exact(&mut data)?;

        let padding = (4 - ((header + len) % 4)) % 4;
        for _ in 0..padding {
            self.read_byte()?;
        }
        Ok(data)
    }

    /// Read a long byte-string: 4-byte little-endian length, then exactly
    /// that many payload bytes, no padding.
    pub fn read_long_bytes(&mut self) -> Result<Vec<u8>> {
        let len = u32::deserialize(self)? as usize;
        let mut data = vec![0u8; len];
        self.read_exact(&mut data)?;
        Ok(data)
    }
}

/// Alias used by hand-written codecs: `Buffer<'_, '_>`.
pub type Buffer<'a, 'b> = &'a mut Cursor<'b>;

// ─── Deserializable ──────────────────────────────────────────────────────────

/// Deserialize a value from TL binary format.
pub trait Deserializable: Sized {
    /// Read `Self` from `buf`, advancing its position.
    fn deserialize(buf: Buffer) -> Result<Self>;

    /// Convenience: deserialize from a byte slice.
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::from_slice(bytes);
        Self::deserialize(&mut cursor)
    }
}

// ─── Primitives ──────────────────────────────────────────────────────────────

impl Deserializable for i32 {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 4];
        buf.read_exact(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }
}

impl Deserializable for u32 {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 4];
        buf.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }
}

impl Deserializable for i64 {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 8];
        buf.read_exact(&mut b)?;
        Ok(i64::from_le_bytes(b))
    }
}

impl Deserializable for u64 {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 8];
        buf.read_exact(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }
}

impl Deserializable for [u8; 16] {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 16];
        buf.read_exact(&mut b)?;
        Ok(b)
    }
}

impl Deserializable for [u8; 32] {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 32];
        buf.read_exact(&mut b)?;
        Ok(b)
    }
}

// ─── Vectors ─────────────────────────────────────────────────────────────────

/// Boxed `Vector<T>` — constructor ID `0x1cb5c415` then count then items.
///
/// Byte strings deliberately do not get a `Vec<u8>` impl (it would collide
/// with this one); use [`Cursor::read_bytes`] instead.
impl<T: Deserializable> Deserializable for Vec<T> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != crate::serialize::VECTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        let len = i32::deserialize(buf)? as usize;
        (0..len).map(|_| T::deserialize(buf)).collect()
    }
}
