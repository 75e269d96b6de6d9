//! The miniature-txid index and its lookup pipeline.
//!
//! Three workers coupled by bounded queues: the splitter turns each block
//! into a write side (its transactions' short txids) and a lookup side (its
//! inputs as short outpoints); the sort-writer appends sorted 8-byte records
//! to the txid file plus one offset record per height; the lookup worker
//! binary-searches earlier height slices to recover each spent output's
//! position within its creating block.
//!
//! The sort-writer and lookup worker MUST stay single instances each: both
//! files are extended in strict height order, and the lookup may only touch
//! a height slice once the writer has signalled it complete.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use utbridge_log::log_warn;
use utbridge_primitives::Hash256;

use crate::blockreader::BlockAndRev;
use crate::error::BridgeError;
use crate::QUEUE_DEPTH;

/// Every record in the txid file is this wide.
pub const MINI_TX_SIZE: u64 = 8;
/// Offset-table records are u64 miniTx record indices.
pub const TXID_OFFSET_SIZE: u64 = 8;
/// How much of a txid survives into the index.
pub const PREFIX_LEN: usize = 6;

/// A transaction collapsed to its txid prefix and the block-wide position of
/// its first retained output.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MiniTx {
    pub prefix: [u8; PREFIX_LEN],
    pub starts_at: u16,
}

impl MiniTx {
    pub fn from_txid(txid: &Hash256, starts_at: u16) -> Self {
        let mut prefix = [0u8; PREFIX_LEN];
        prefix.copy_from_slice(&txid[..PREFIX_LEN]);
        Self { prefix, starts_at }
    }

    pub fn encode(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..PREFIX_LEN].copy_from_slice(&self.prefix);
        out[PREFIX_LEN..].copy_from_slice(&self.starts_at.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8; 8]) -> Self {
        let mut prefix = [0u8; PREFIX_LEN];
        prefix.copy_from_slice(&bytes[..PREFIX_LEN]);
        Self {
            prefix,
            starts_at: u16::from_be_bytes([bytes[6], bytes[7]]),
        }
    }

    /// Records sort as their big-endian 8-byte interpretation.
    pub fn sort_key(&self) -> u64 {
        u64::from_be_bytes(self.encode())
    }
}

/// A spent output in short form: who created it, which output it was, and
/// the height the creating transaction confirmed at (from reverse data).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MiniIn {
    pub prefix: [u8; PREFIX_LEN],
    pub idx: u16,
    pub height: i32,
}

pub struct WriteBlock {
    pub create_height: i32,
    pub mini_txs: Vec<MiniTx>,
}

pub struct LookupBlock {
    pub destroy_height: i32,
    pub spent_txos: Vec<MiniIn>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TtlResult {
    pub create_height: i32,
    pub index_within_block: u16,
}

#[derive(Clone, Debug)]
pub struct TtlResultBlock {
    pub destroy_height: i32,
    pub results: Vec<TtlResult>,
}

/// Splits one block into its write side and lookup side.
///
/// `starts_at` counts retained outputs only: every output bumps the running
/// count, and outputs on the outskip list take it back down before the next
/// transaction is recorded. Coinbase inputs and inskip'd inputs produce no
/// lookup entries.
pub fn split_block(bnr: &BlockAndRev) -> (WriteBlock, LookupBlock) {
    let transactions = &bnr.block.transactions;
    let mut mini_txs = Vec::with_capacity(transactions.len());
    let mut spent_txos = Vec::new();

    let mut retained: u16 = 0;
    let mut outskip_pos = 0usize;
    let mut inskip_pos = 0usize;
    let mut output_in_block: u32 = 0;
    let mut input_in_block: u32 = 0;

    for (tx_index, tx) in transactions.iter().enumerate() {
        mini_txs.push(MiniTx::from_txid(&tx.txid(), retained));

        retained += tx.outputs.len() as u16;
        for _ in &tx.outputs {
            if outskip_pos < bnr.outskip.len() && bnr.outskip[outskip_pos] == output_in_block {
                outskip_pos += 1;
                retained -= 1;
            }
            output_in_block += 1;
        }

        if tx_index == 0 {
            // Coinbase inputs create nothing to look up.
            input_in_block += tx.inputs.len() as u32;
            continue;
        }
        for (input_index, input) in tx.inputs.iter().enumerate() {
            if inskip_pos < bnr.inskip.len() && bnr.inskip[inskip_pos] == input_in_block {
                inskip_pos += 1;
                input_in_block += 1;
                continue;
            }
            input_in_block += 1;

            let rev_input = &bnr.rev.txs[tx_index - 1].inputs[input_index];
            let mut prefix = [0u8; PREFIX_LEN];
            prefix.copy_from_slice(&input.prevout.hash[..PREFIX_LEN]);
            spent_txos.push(MiniIn {
                prefix,
                idx: input.prevout.index as u16,
                height: rev_input.height,
            });
        }
    }

    (
        WriteBlock {
            create_height: bnr.height,
            mini_txs,
        },
        LookupBlock {
            destroy_height: bnr.height,
            spent_txos,
        },
    )
}

/// The splitter/sort-writer/lookup trio plus their queues.
pub struct TtlPipeline {
    block_tx: Option<Sender<Arc<BlockAndRev>>>,
    splitter: JoinHandle<()>,
    writer: JoinHandle<Result<(), BridgeError>>,
    lookup: JoinHandle<Result<(), BridgeError>>,
}

impl TtlPipeline {
    /// Opens the txid files and spawns the three workers. `already_written`
    /// is how many heights the offset file already covers: write blocks at
    /// or below it only re-issue the lookup hand-off, so a restarted run
    /// never duplicates records.
    pub fn spawn(
        txid_path: &Path,
        offset_path: &Path,
        already_written: i32,
        result_tx: Sender<TtlResultBlock>,
    ) -> Result<Self, BridgeError> {
        let write_txid = OpenOptions::new()
            .create(true)
            .append(true)
            .open(txid_path)?;
        let write_offset = OpenOptions::new()
            .create(true)
            .append(true)
            .open(offset_path)?;
        let start_offset = write_txid.metadata()?.len() / MINI_TX_SIZE;
        let read_txid = File::open(txid_path)?;
        let read_offset = File::open(offset_path)?;

        let (block_tx, block_rx) = bounded::<Arc<BlockAndRev>>(QUEUE_DEPTH);
        let (write_tx, write_rx) = bounded::<WriteBlock>(QUEUE_DEPTH);
        let (lookup_tx, lookup_rx) = bounded::<LookupBlock>(QUEUE_DEPTH);
        let (go_tx, go_rx) = bounded::<()>(QUEUE_DEPTH);

        let splitter = thread::spawn(move || splitter_worker(block_rx, write_tx, lookup_tx));
        let writer = thread::spawn(move || {
            sort_writer_worker(
                write_rx,
                go_tx,
                start_offset,
                already_written,
                write_txid,
                write_offset,
            )
        });
        let lookup =
            thread::spawn(move || lookup_worker(lookup_rx, go_rx, result_tx, read_txid, read_offset));

        Ok(Self {
            block_tx: Some(block_tx),
            splitter,
            writer,
            lookup,
        })
    }

    /// Hands one block to the splitter. `false` means the pipeline is gone;
    /// call [`TtlPipeline::close`] to learn why.
    pub fn send(&self, block: Arc<BlockAndRev>) -> bool {
        match &self.block_tx {
            Some(tx) => tx.send(block).is_ok(),
            None => false,
        }
    }

    /// Closes the intake and drains the workers, surfacing the first error.
    pub fn close(mut self) -> Result<(), BridgeError> {
        self.block_tx.take();
        self.splitter
            .join()
            .map_err(|_| BridgeError::Integrity("splitter worker panicked".to_string()))?;
        self.writer
            .join()
            .map_err(|_| BridgeError::Integrity("sort-writer worker panicked".to_string()))??;
        self.lookup
            .join()
            .map_err(|_| BridgeError::Integrity("lookup worker panicked".to_string()))??;
        Ok(())
    }
}

fn splitter_worker(
    rx: Receiver<Arc<BlockAndRev>>,
    write_tx: Sender<WriteBlock>,
    lookup_tx: Sender<LookupBlock>,
) {
    while let Ok(bundle) = rx.recv() {
        let (write_block, lookup_block) = split_block(&bundle);
        if write_tx.send(write_block).is_err() {
            break;
        }
        if lookup_tx.send(lookup_block).is_err() {
            break;
        }
    }
}

fn sort_writer_worker(
    rx: Receiver<WriteBlock>,
    go_tx: Sender<()>,
    mut start_offset: u64,
    already_written: i32,
    mut txid_file: File,
    mut offset_file: File,
) -> Result<(), BridgeError> {
    while let Ok(mut write_block) = rx.recv() {
        if write_block.create_height <= already_written {
            // Height already on disk from an earlier run; the lookup
            // hand-off is still owed.
            if go_tx.send(()).is_err() {
                break;
            }
            continue;
        }

        offset_file.write_all(&start_offset.to_be_bytes())?;
        start_offset += write_block.mini_txs.len() as u64;

        write_block.mini_txs.sort_unstable_by_key(MiniTx::sort_key);
        let mut buf = Vec::with_capacity(write_block.mini_txs.len() * MINI_TX_SIZE as usize);
        for mini in &write_block.mini_txs {
            buf.extend_from_slice(&mini.encode());
        }
        txid_file.write_all(&buf)?;
        txid_file.flush()?;
        offset_file.flush()?;

        if go_tx.send(()).is_err() {
            break;
        }
    }
    txid_file.sync_data()?;
    offset_file.sync_data()?;
    Ok(())
}

fn lookup_worker(
    rx: Receiver<LookupBlock>,
    go_rx: Receiver<()>,
    result_tx: Sender<TtlResultBlock>,
    mut txid_file: File,
    mut offset_file: File,
) -> Result<(), BridgeError> {
    let mut seek_height: i32 = 0;
    let mut height_offset = 0u64;
    let mut next_offset = 0u64;

    loop {
        // One completion signal per height grants access to its slice.
        if go_rx.recv().is_err() {
            break;
        }
        let Ok(mut lookup_block) = rx.recv() else {
            break;
        };

        // Sorting the spends by creating height localises file seeks.
        lookup_block.spent_txos.sort_by_key(|mini| mini.height);

        let mut results = Vec::with_capacity(lookup_block.spent_txos.len());
        for stxo in &lookup_block.spent_txos {
            if stxo.height != seek_height {
                (height_offset, next_offset) = read_slice_bounds(&mut offset_file, stxo.height)?;
                seek_height = stxo.height;
            }
            let position = search_slice(&mut txid_file, stxo, height_offset, next_offset)?;
            results.push(TtlResult {
                create_height: stxo.height,
                index_within_block: position,
            });
        }

        let done = TtlResultBlock {
            destroy_height: lookup_block.destroy_height,
            results,
        };
        if result_tx.send(done).is_err() {
            break;
        }
    }
    Ok(())
}

/// Slice bounds for a height, in miniTx record units. The record after the
/// height's own always exists: the writer signals only after appending it.
fn read_slice_bounds(offset_file: &mut File, height: i32) -> Result<(u64, u64), BridgeError> {
    if height < 1 {
        return Err(BridgeError::Integrity(format!(
            "lookup for invalid creating height {height}"
        )));
    }
    offset_file.seek(SeekFrom::Start((height as u64 - 1) * TXID_OFFSET_SIZE))?;
    let mut bytes = [0u8; 16];
    offset_file.read_exact(&mut bytes)?;
    let start = u64::from_be_bytes(bytes[..8].try_into().expect("split"));
    let next = u64::from_be_bytes(bytes[8..].try_into().expect("split"));
    if next < start {
        return Err(BridgeError::Integrity(format!(
            "txid offset inversion at height {height}: {next} < {start}"
        )));
    }
    Ok((start, next))
}

fn read_mini_record(file: &mut File, position: u64) -> Result<[u8; 8], BridgeError> {
    file.seek(SeekFrom::Start(position * MINI_TX_SIZE))?;
    let mut record = [0u8; 8];
    file.read_exact(&mut record)?;
    Ok(record)
}

fn record_prefix(record: &[u8; 8]) -> [u8; PREFIX_LEN] {
    let mut prefix = [0u8; PREFIX_LEN];
    prefix.copy_from_slice(&record[..PREFIX_LEN]);
    prefix
}

/// Prefix as a u64 with the low two bytes zero, the search comparand.
fn prefix_key(prefix: [u8; PREFIX_LEN]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes[..PREFIX_LEN].copy_from_slice(&prefix);
    u64::from_be_bytes(bytes)
}

/// Binary search for a prefix within one height's slice. A miss means the
/// reverse data disagrees with the indexed outputs and is not recoverable.
fn search_slice(
    txid_file: &mut File,
    mini: &MiniIn,
    start: u64,
    end: u64,
) -> Result<u16, BridgeError> {
    if start == end {
        return Err(missing_prefix(mini));
    }
    let target = prefix_key(mini.prefix);
    let mut bottom = start;
    let mut top = end;
    loop {
        let guess = (top + bottom) / 2;
        let record = read_mini_record(txid_file, guess)?;
        let guess_prefix = record_prefix(&record);
        if guess_prefix == mini.prefix {
            return resolve_match(txid_file, mini, guess, start, end, record);
        }
        if prefix_key(guess_prefix) > target {
            if top == guess {
                return Err(missing_prefix(mini));
            }
            top = guess;
        } else {
            if bottom == guess {
                return Err(missing_prefix(mini));
            }
            bottom = guess;
        }
    }
}

/// Widens a hit to the run of equal-prefix records and takes the first.
/// Two transactions sharing 48 prefix bits in one block is astronomically
/// unlikely; when it happens the choice is logged.
fn resolve_match(
    txid_file: &mut File,
    mini: &MiniIn,
    hit: u64,
    start: u64,
    end: u64,
    mut record: [u8; 8],
) -> Result<u16, BridgeError> {
    let mut position = hit;
    while position > start {
        let prev = read_mini_record(txid_file, position - 1)?;
        if record_prefix(&prev) != mini.prefix {
            break;
        }
        position -= 1;
        record = prev;
    }

    let mut duplicate = position != hit;
    if !duplicate && position + 1 < end {
        let next = read_mini_record(txid_file, position + 1)?;
        duplicate = record_prefix(&next) == mini.prefix;
    }
    if duplicate {
        log_warn!(
            "duplicate txid prefix {:02x?} in height {} slice; using first match",
            mini.prefix,
            mini.height
        );
    }

    let starts_at = u16::from_be_bytes([record[6], record[7]]);
    Ok(starts_at.wrapping_add(mini.idx))
}

fn missing_prefix(mini: &MiniIn) -> BridgeError {
    BridgeError::Integrity(format!(
        "txid prefix {:02x?} idx {} not found in height {} slice",
        mini.prefix, mini.idx, mini.height
    ))
}
