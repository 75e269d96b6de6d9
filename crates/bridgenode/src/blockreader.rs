//! Height-ordered block production.
//!
//! Walks the location index, decodes each block out of its container, pairs
//! it with reverse data and the per-block skip lists, and hands the bundle
//! downstream over a bounded queue.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;

use utbridge_log::log_debug;
use utbridge_primitives::{Block, Hash256};

use crate::blockfiles;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::locations::LocationReader;
use crate::rev::{BlockRev, RevSource};

/// A block in chain order with everything the splitter needs.
#[derive(Clone, Debug)]
pub struct BlockAndRev {
    /// 1-based chain height.
    pub height: i32,
    pub block: Block,
    pub rev: BlockRev,
    pub blockhash: Hash256,
    /// Input positions (block-wide, coinbase inputs counted) spending an
    /// output created in this same block. Strictly ascending.
    pub inskip: Vec<u32>,
    /// Output positions (block-wide) created and spent within this block.
    /// Strictly ascending.
    pub outskip: Vec<u32>,
}

/// Derives the same-block-spend skip lists for one block.
pub fn dedupe_block(block: &Block) -> (Vec<u32>, Vec<u32>) {
    // First pass: where does each transaction's output run start.
    let mut first_output = std::collections::HashMap::new();
    let mut output_cursor: u32 = 0;
    for (tx_index, tx) in block.transactions.iter().enumerate() {
        first_output.insert(tx.txid(), (tx_index, output_cursor));
        output_cursor += tx.outputs.len() as u32;
    }

    let mut inskip = Vec::new();
    let mut outskip = Vec::new();
    let mut input_cursor: u32 = 0;
    for (tx_index, tx) in block.transactions.iter().enumerate() {
        if tx_index == 0 {
            input_cursor += tx.inputs.len() as u32;
            continue;
        }
        for input in &tx.inputs {
            if let Some(&(creator_index, creator_start)) = first_output.get(&input.prevout.hash) {
                // A spend can only reference an earlier transaction.
                if creator_index < tx_index {
                    inskip.push(input_cursor);
                    outskip.push(creator_start + input.prevout.index);
                }
            }
            input_cursor += 1;
        }
    }
    outskip.sort_unstable();
    (inskip, outskip)
}

/// Spawns the reader thread producing heights `start_height + 1 ..= last`.
///
/// The sender closing early is a normal shutdown; any other failure is
/// returned through the join handle.
pub fn spawn(
    config: &BridgeConfig,
    start_height: i32,
    last_height: i32,
    mut rev_source: Box<dyn RevSource + Send>,
    tx: Sender<Arc<BlockAndRev>>,
) -> JoinHandle<Result<(), BridgeError>> {
    let block_dir = config.block_dir.clone();
    let index_path = config.location_index_path();
    let magic = config.network.magic();

    thread::spawn(move || {
        let mut locations = LocationReader::open(&index_path)?;
        for height in start_height + 1..=last_height {
            let location = locations.get(height)?;
            let payload =
                blockfiles::read_block_at(&block_dir, location.file_num, location.offset, magic)?;
            let block = Block::decode(&payload)?;
            let blockhash = block.header.hash();
            let rev = rev_source.block_rev(&blockhash)?;
            check_rev_shape(&block, &rev, height)?;
            let (inskip, outskip) = dedupe_block(&block);
            let bundle = Arc::new(BlockAndRev {
                height,
                block,
                rev,
                blockhash,
                inskip,
                outskip,
            });
            if tx.send(bundle).is_err() {
                log_debug!("block reader stopping at height {height}: queue closed");
                return Ok(());
            }
        }
        Ok(())
    })
}

/// Reverse data must carry one entry per non-coinbase transaction and one
/// per input; the splitter and the del builder index into it directly.
fn check_rev_shape(block: &Block, rev: &BlockRev, height: i32) -> Result<(), BridgeError> {
    if rev.txs.len() + 1 != block.transactions.len() {
        return Err(BridgeError::Integrity(format!(
            "reverse data at height {height} covers {} transactions, block has {}",
            rev.txs.len(),
            block.transactions.len().saturating_sub(1)
        )));
    }
    for (tx_index, tx) in block.transactions.iter().enumerate().skip(1) {
        let rev_inputs = rev.txs[tx_index - 1].inputs.len();
        if rev_inputs != tx.inputs.len() {
            return Err(BridgeError::Integrity(format!(
                "reverse data at height {height} tx {tx_index} covers {rev_inputs} inputs, \
                 transaction has {}",
                tx.inputs.len()
            )));
        }
    }
    Ok(())
}
