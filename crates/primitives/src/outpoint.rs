//! Transaction outpoint type.

use crate::encoding::{ByteReader, ByteWriter, Wire, WireError};
use crate::Hash256;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct OutPoint {
    pub hash: Hash256,
    pub index: u32,
}

impl OutPoint {
    pub fn null() -> Self {
        Self {
            hash: [0u8; 32],
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.hash == [0u8; 32] && self.index == u32::MAX
    }
}

impl Wire for OutPoint {
    fn put(&self, writer: &mut ByteWriter) {
        writer.hash(&self.hash);
        writer.u32(self.index);
    }

    fn parse(reader: &mut ByteReader) -> Result<Self, WireError> {
        Ok(Self {
            hash: reader.hash()?,
            index: reader.u32()?,
        })
    }
}
