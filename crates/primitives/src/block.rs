//! Block header and block types.

use crate::encoding::{ByteReader, ByteWriter, Wire, WireError};
use crate::hash::sha256d;
use crate::transaction::Transaction;
use crate::Hash256;

/// Serialized size of a block header.
pub const HEADER_SIZE: usize = 80;

#[derive(Clone, Debug, PartialEq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(HEADER_SIZE);
        writer.i32(self.version);
        writer.hash(&self.prev_block);
        writer.hash(&self.merkle_root);
        writer.u32(self.time);
        writer.u32(self.bits);
        writer.u32(self.nonce);
        writer.finish()
    }

    pub fn hash(&self) -> Hash256 {
        sha256d(&self.encode())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = ByteReader::new(bytes);
        let header = Self::parse_from(&mut reader)?;
        if !reader.done() {
            return Err(WireError::Trailing);
        }
        Ok(header)
    }

    pub fn parse_from(reader: &mut ByteReader) -> Result<Self, WireError> {
        Ok(Self {
            version: reader.i32()?,
            prev_block: reader.hash()?,
            merkle_root: reader.hash()?,
            time: reader.u32()?,
            bits: reader.u32()?,
            nonce: reader.u32()?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.raw(&self.header.encode());
        writer.count(self.transactions.len());
        for tx in &self.transactions {
            tx.put(&mut writer);
        }
        writer.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = ByteReader::new(bytes);
        let header = BlockHeader::parse_from(&mut reader)?;
        let count = reader.count()?;
        let mut transactions = Vec::with_capacity(count);
        for _ in 0..count {
            transactions.push(Transaction::parse(&mut reader)?);
        }
        if !reader.done() {
            return Err(WireError::Trailing);
        }
        Ok(Self {
            header,
            transactions,
        })
    }
}
