//! Core block/transaction types and consensus serialization.

pub mod block;
pub mod encoding;
pub mod hash;
pub mod outpoint;
pub mod transaction;

pub use block::{Block, BlockHeader, HEADER_SIZE};
pub use hash::{sha256, sha256d};
pub use outpoint::OutPoint;
pub use transaction::{Transaction, TxIn, TxOut};

/// 32-byte hash in on-disk (little-endian) byte order.
pub type Hash256 = [u8; 32];

pub const ZERO_HASH: Hash256 = [0u8; 32];
