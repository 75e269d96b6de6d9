//! Wire codec for the few consensus structures this node parses and the
//! byte forms it hashes: little-endian integers, CompactSize counts and raw
//! 32-byte hashes. Fixed-width artifact records do not come through here;
//! they encode straight into arrays at their definition sites.

use crate::Hash256;

/// Largest CompactSize this node accepts. Anything claiming more data than
/// a block can hold is garbage input, not a big block.
const MAX_COUNT: u64 = 0x0200_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Input ended mid-structure.
    Short,
    /// A CompactSize used a wider encoding than its value needs.
    NonCanonicalCount,
    /// A CompactSize larger than any valid block.
    OversizedCount,
    /// Bytes left over after the outermost structure.
    Trailing,
    Invalid(&'static str),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Short => write!(f, "input ended mid-structure"),
            WireError::NonCanonicalCount => write!(f, "non-canonical CompactSize"),
            WireError::OversizedCount => write!(f, "CompactSize exceeds maximum"),
            WireError::Trailing => write!(f, "trailing bytes after decode"),
            WireError::Invalid(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for WireError {}

/// Drains a byte slice from the front.
pub struct ByteReader<'a> {
    rest: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { rest: bytes }
    }

    pub fn done(&self) -> bool {
        self.rest.is_empty()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.rest.len() < len {
            return Err(WireError::Short);
        }
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        Ok(head)
    }

    pub fn byte(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn flag(&mut self) -> Result<bool, WireError> {
        Ok(self.byte()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("take length")))
    }

    pub fn u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("take length")))
    }

    pub fn i32(&mut self) -> Result<i32, WireError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().expect("take length")))
    }

    pub fn u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().expect("take length")))
    }

    pub fn i64(&mut self) -> Result<i64, WireError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().expect("take length")))
    }

    pub fn hash(&mut self) -> Result<Hash256, WireError> {
        Ok(self.take(32)?.try_into().expect("take length"))
    }

    /// A CompactSize count, canonical form only.
    pub fn count(&mut self) -> Result<usize, WireError> {
        let value = match self.byte()? {
            tag @ 0x00..=0xfc => u64::from(tag),
            0xfd => {
                let value = u64::from(self.u16()?);
                if value < 0xfd {
                    return Err(WireError::NonCanonicalCount);
                }
                value
            }
            0xfe => {
                let value = u64::from(self.u32()?);
                if value < 0x1_0000 {
                    return Err(WireError::NonCanonicalCount);
                }
                value
            }
            0xff => {
                let value = self.u64()?;
                if value < 0x1_0000_0000 {
                    return Err(WireError::NonCanonicalCount);
                }
                value
            }
        };
        if value > MAX_COUNT {
            return Err(WireError::OversizedCount);
        }
        usize::try_from(value).map_err(|_| WireError::OversizedCount)
    }

    pub fn var_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.count()?;
        Ok(self.take(len)?.to_vec())
    }
}

/// Accumulates a wire-form byte string.
#[derive(Default)]
pub struct ByteWriter {
    out: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity),
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.out
    }

    pub fn byte(&mut self, value: u8) {
        self.out.push(value);
    }

    pub fn flag(&mut self, value: bool) {
        self.out.push(u8::from(value));
    }

    pub fn u16(&mut self, value: u16) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    pub fn u32(&mut self, value: u32) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    pub fn i32(&mut self, value: i32) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    pub fn u64(&mut self, value: u64) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    pub fn i64(&mut self, value: i64) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    pub fn hash(&mut self, value: &Hash256) {
        self.out.extend_from_slice(value);
    }

    pub fn raw(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    pub fn count(&mut self, value: usize) {
        let value = value as u64;
        if value < 0xfd {
            self.byte(value as u8);
        } else if value <= 0xffff {
            self.byte(0xfd);
            self.u16(value as u16);
        } else if value <= 0xffff_ffff {
            self.byte(0xfe);
            self.u32(value as u32);
        } else {
            self.byte(0xff);
            self.u64(value);
        }
    }

    pub fn var_bytes(&mut self, bytes: &[u8]) {
        self.count(bytes.len());
        self.raw(bytes);
    }
}

/// Structures with the same wire form on both sides.
pub trait Wire: Sized {
    fn put(&self, writer: &mut ByteWriter);
    fn parse(reader: &mut ByteReader) -> Result<Self, WireError>;
}

pub fn to_bytes<T: Wire>(value: &T) -> Vec<u8> {
    let mut writer = ByteWriter::new();
    value.put(&mut writer);
    writer.finish()
}

pub fn from_bytes<T: Wire>(bytes: &[u8]) -> Result<T, WireError> {
    let mut reader = ByteReader::new(bytes);
    let value = T::parse(&mut reader)?;
    if !reader.done() {
        return Err(WireError::Trailing);
    }
    Ok(value)
}
