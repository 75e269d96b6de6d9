//! The accumulator oracle boundary and leaf hashing.
//!
//! The driver treats proof generation as total on valid inputs; any failure
//! here signals a logic bug or corrupt accumulator state and is fatal.

use utbridge_primitives::encoding::{ByteWriter, Wire};
use utbridge_primitives::{sha256d, Hash256, OutPoint};

#[derive(Debug)]
pub struct AccumulatorError {
    pub message: String,
}

impl AccumulatorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AccumulatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AccumulatorError {}

/// A block's membership proof, opaque to everything but the oracle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockProof {
    pub targets: Vec<u64>,
    pub hashes: Vec<Hash256>,
}

impl BlockProof {
    /// The byte form sunk into the proof stream.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.u32(self.targets.len() as u32);
        for target in &self.targets {
            writer.u64(*target);
        }
        writer.u32(self.hashes.len() as u32);
        for hash in &self.hashes {
            writer.hash(hash);
        }
        writer.finish()
    }
}

pub trait Accumulator {
    fn prove_block(&mut self, dels: &[Hash256]) -> Result<BlockProof, AccumulatorError>;
    fn verify_block_proof(&self, proof: &BlockProof) -> bool;
    fn modify(&mut self, adds: &[Hash256], targets: &[u64]) -> Result<(), AccumulatorError>;
}

/// Everything that identifies a UTXO as an accumulator leaf.
///
/// The creating block hash is deliberately absent: the delete side only has
/// the prevout and the reverse data, and both sides must hash identically.
#[derive(Clone, Debug, PartialEq)]
pub struct LeafData {
    pub outpoint: OutPoint,
    pub height: i32,
    pub coinbase: bool,
    pub amount: i64,
    pub pk_script: Vec<u8>,
}

impl LeafData {
    pub fn leaf_hash(&self) -> Hash256 {
        let mut writer = ByteWriter::new();
        self.outpoint.put(&mut writer);
        writer.i32(self.height);
        writer.flag(self.coinbase);
        writer.i64(self.amount);
        writer.var_bytes(&self.pk_script);
        sha256d(&writer.finish())
    }
}
