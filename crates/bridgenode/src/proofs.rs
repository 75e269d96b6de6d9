//! The proof stream and its offset table.
//!
//! Proof records are `[u32 BE height+1 | u32 BE length | payload]` in strict
//! height order, where the stored value is the historical one-based height.
//! The offset table holds the starting byte of each record as a u32, giving
//! O(1) seek-by-height. Both files are owned by one actor and the offset
//! record is written before the byte cursor advances, so the table can never
//! run behind the stream.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::BridgeError;

pub const PROOF_OFFSET_SIZE: u64 = 4;
const PROOF_HEADER_SIZE: u32 = 8;

pub struct ProofWriter {
    proof_file: File,
    offset_file: File,
    p_offset: u32,
    records: u32,
}

impl ProofWriter {
    pub fn open(proof_path: &Path, offset_path: &Path) -> Result<Self, BridgeError> {
        let proof_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(proof_path)?;
        let offset_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(offset_path)?;

        let proof_len = proof_file.metadata()?.len();
        let p_offset = u32::try_from(proof_len).map_err(|_| {
            BridgeError::Integrity(format!(
                "proof file {} exceeds the 4 GiB offset range",
                proof_path.display()
            ))
        })?;
        let offset_len = offset_file.metadata()?.len();
        if offset_len % PROOF_OFFSET_SIZE != 0 {
            return Err(BridgeError::Integrity(format!(
                "proof offset file {} is {offset_len} bytes, not a record multiple",
                offset_path.display()
            )));
        }

        Ok(Self {
            proof_file,
            offset_file,
            p_offset,
            records: (offset_len / PROOF_OFFSET_SIZE) as u32,
        })
    }

    /// Heights already present, i.e. the next height expected is this + 1.
    pub fn records(&self) -> u32 {
        self.records
    }

    pub fn p_offset(&self) -> u32 {
        self.p_offset
    }

    /// Appends the proof for a 1-based chain height: offset record first,
    /// then the proof record.
    pub fn append(&mut self, height: i32, proof: &[u8]) -> Result<(), BridgeError> {
        self.offset_file.write_all(&self.p_offset.to_be_bytes())?;

        let length = u32::try_from(proof.len())
            .map_err(|_| BridgeError::Integrity(format!("oversized proof at height {height}")))?;
        let mut record = Vec::with_capacity(PROOF_HEADER_SIZE as usize + proof.len());
        record.extend_from_slice(&(height as u32).to_be_bytes());
        record.extend_from_slice(&length.to_be_bytes());
        record.extend_from_slice(proof);
        self.proof_file.write_all(&record)?;

        self.p_offset = self
            .p_offset
            .checked_add(PROOF_HEADER_SIZE + length)
            .ok_or_else(|| {
                BridgeError::Integrity("proof file exceeds the 4 GiB offset range".to_string())
            })?;
        self.records += 1;
        Ok(())
    }

    pub fn sync(&self) -> Result<(), BridgeError> {
        self.proof_file.sync_data()?;
        self.offset_file.sync_data()?;
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProofRecord {
    /// The stored one-based height field.
    pub height: u32,
    pub proof: Vec<u8>,
}

/// O(1) read of the proof for a 1-based chain height, through the offset
/// table.
pub fn read_proof(
    proof_path: &Path,
    offset_path: &Path,
    height: i32,
) -> Result<ProofRecord, BridgeError> {
    if height < 1 {
        return Err(BridgeError::Integrity(format!(
            "proof lookup for invalid height {height}"
        )));
    }
    let mut offset_file = File::open(offset_path)?;
    offset_file.seek(SeekFrom::Start((height as u64 - 1) * PROOF_OFFSET_SIZE))?;
    let mut offset_bytes = [0u8; 4];
    offset_file.read_exact(&mut offset_bytes)?;
    let offset = u32::from_be_bytes(offset_bytes);

    let mut proof_file = File::open(proof_path)?;
    proof_file.seek(SeekFrom::Start(u64::from(offset)))?;
    let mut header = [0u8; 8];
    proof_file.read_exact(&mut header)?;
    let stored_height = u32::from_be_bytes(header[..4].try_into().expect("split"));
    let length = u32::from_be_bytes(header[4..].try_into().expect("split"));
    if stored_height != height as u32 {
        return Err(BridgeError::Integrity(format!(
            "proof record at byte {offset} is for height {stored_height}, wanted {height}"
        )));
    }
    let mut proof = vec![0u8; length as usize];
    proof_file.read_exact(&mut proof)?;
    Ok(ProofRecord {
        height: stored_height,
        proof,
    })
}
