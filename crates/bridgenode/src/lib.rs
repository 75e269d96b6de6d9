//! Bridge-node indexing core.
//!
//! Ingests the unordered `blk*.dat` container files of a Bitcoin-like chain
//! and produces the ordered artifacts proof verifiers need: a block-location
//! index, a miniature-txid index with per-height offsets, and a proof stream
//! with its offset table.

pub mod accumulator;
pub mod blockfiles;
pub mod blockreader;
pub mod config;
pub mod driver;
pub mod error;
pub mod locations;
pub mod orderer;
pub mod proofs;
pub mod rev;
pub mod ttldb;
pub mod txids;

pub use config::{BridgeConfig, Network};
pub use driver::{Driver, StopSignal};
pub use error::BridgeError;

/// Depth of every bounded hand-off queue in the pipeline.
pub const QUEUE_DEPTH: usize = 10;
