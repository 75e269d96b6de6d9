//! Reverse (undo) data: what each block's inputs spent.
//!
//! For every non-coinbase transaction the rev record carries one entry per
//! input with the creation height, coinbase flag, amount and script of the
//! spent output. `revNNNNN.dat` containers use the same framing as block
//! containers; the payload is the block hash followed by the encoded record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use utbridge_primitives::encoding::{ByteReader, ByteWriter, WireError};
use utbridge_primitives::Hash256;

use crate::blockfiles;
use crate::error::BridgeError;

const BLOCK_REV_VERSION: u8 = 1;

#[derive(Clone, Debug, PartialEq)]
pub struct InputRev {
    /// Chain height the spent output was created at.
    pub height: i32,
    pub coinbase: bool,
    pub amount: i64,
    pub pk_script: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TxRev {
    pub inputs: Vec<InputRev>,
}

/// One entry per non-coinbase transaction, in block order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockRev {
    pub txs: Vec<TxRev>,
}

impl BlockRev {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.byte(BLOCK_REV_VERSION);
        writer.u32(self.txs.len() as u32);
        for tx in &self.txs {
            writer.u32(tx.inputs.len() as u32);
            for input in &tx.inputs {
                writer.i32(input.height);
                writer.flag(input.coinbase);
                writer.i64(input.amount);
                writer.var_bytes(&input.pk_script);
            }
        }
        writer.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = ByteReader::new(bytes);
        let version = reader.byte()?;
        if version != BLOCK_REV_VERSION {
            return Err(WireError::Invalid("unsupported block rev version"));
        }
        let tx_count = reader.u32()? as usize;
        let mut txs = Vec::with_capacity(tx_count);
        for _ in 0..tx_count {
            let input_count = reader.u32()? as usize;
            let mut inputs = Vec::with_capacity(input_count);
            for _ in 0..input_count {
                inputs.push(InputRev {
                    height: reader.i32()?,
                    coinbase: reader.flag()?,
                    amount: reader.i64()?,
                    pk_script: reader.var_bytes()?,
                });
            }
            txs.push(TxRev { inputs });
        }
        if !reader.done() {
            return Err(WireError::Trailing);
        }
        Ok(Self { txs })
    }
}

/// Where block readers get their reverse data from.
pub trait RevSource {
    fn block_rev(&mut self, blockhash: &Hash256) -> Result<BlockRev, BridgeError>;
}

/// Rev containers on disk, indexed by block hash on first open.
pub struct RevFileSource {
    dir: PathBuf,
    magic: [u8; 4],
    index: HashMap<Hash256, (u32, u32)>,
}

impl RevFileSource {
    pub fn open(dir: &Path, magic: [u8; 4]) -> Result<Self, BridgeError> {
        let mut index = HashMap::new();
        let mut file_num = 0u32;
        loop {
            let path = blockfiles::rev_file_path(dir, file_num);
            if !path.exists() {
                break;
            }
            for (offset, payload) in scan_records(&path, magic)? {
                if payload.len() < 32 {
                    return Err(BridgeError::Integrity(format!(
                        "rev record at byte {offset} of {} has no block hash",
                        path.display()
                    )));
                }
                let mut blockhash = [0u8; 32];
                blockhash.copy_from_slice(&payload[..32]);
                index.insert(blockhash, (file_num, offset));
            }
            file_num += 1;
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            magic,
            index,
        })
    }
}

impl RevSource for RevFileSource {
    fn block_rev(&mut self, blockhash: &Hash256) -> Result<BlockRev, BridgeError> {
        let (file_num, offset) = self.index.get(blockhash).copied().ok_or_else(|| {
            BridgeError::Integrity("no reverse data for block".to_string())
        })?;
        let path = blockfiles::rev_file_path(&self.dir, file_num);
        let payload = blockfiles::read_record_at(&path, offset, self.magic)?;
        if payload.len() < 32 {
            return Err(BridgeError::Integrity(format!(
                "rev record at byte {offset} of {} has no block hash",
                path.display()
            )));
        }
        Ok(BlockRev::decode(&payload[32..])?)
    }
}

fn scan_records(path: &Path, magic: [u8; 4]) -> Result<Vec<(u32, Vec<u8>)>, BridgeError> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut records = Vec::new();
    let mut offset: u32 = 0;
    loop {
        let mut magic_bytes = [0u8; 4];
        match file.read_exact(&mut magic_bytes) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        }
        if magic_bytes != magic {
            break;
        }
        let mut size_bytes = [0u8; 4];
        file.read_exact(&mut size_bytes)?;
        let size = u32::from_le_bytes(size_bytes);
        let mut payload = vec![0u8; size as usize];
        file.read_exact(&mut payload)?;
        records.push((offset, payload));
        offset = offset.checked_add(size + blockfiles::RECORD_OVERHEAD).ok_or_else(|| {
            BridgeError::Integrity(format!(
                "rev container {} exceeds the 4 GiB offset range",
                path.display()
            ))
        })?;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_rev_roundtrip() {
        let rev = BlockRev {
            txs: vec![
                TxRev {
                    inputs: vec![InputRev {
                        height: 12,
                        coinbase: true,
                        amount: 5_000_000_000,
                        pk_script: vec![0x51],
                    }],
                },
                TxRev { inputs: Vec::new() },
            ],
        };
        let encoded = rev.encode();
        assert_eq!(BlockRev::decode(&encoded).expect("decode"), rev);
    }

    #[test]
    fn rejects_trailing_bytes() {
        let rev = BlockRev::default();
        let mut encoded = rev.encode();
        encoded.push(0x00);
        assert!(BlockRev::decode(&encoded).is_err());
    }
}
