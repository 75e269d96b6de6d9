#![allow(dead_code)]

use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use utbridge_bridgenode::accumulator::{Accumulator, AccumulatorError, BlockProof};
use utbridge_bridgenode::blockreader::{dedupe_block, BlockAndRev};
use utbridge_bridgenode::driver::block_adds_dels;
use utbridge_bridgenode::rev::{BlockRev, InputRev, TxRev};
use utbridge_primitives::{
    Block, BlockHeader, Hash256, OutPoint, Transaction, TxIn, TxOut, ZERO_HASH,
};

/// Regtest magic, what every synthetic container uses.
pub const MAGIC: [u8; 4] = [0xfa, 0xbf, 0xb5, 0xda];

pub fn temp_dir(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("utbridge_{tag}_{nanos}"));
    std::fs::create_dir_all(&dir).expect("mkdir");
    dir
}

pub fn coinbase(height: i32, output_values: &[i64]) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            prevout: OutPoint::null(),
            // Height in the scriptSig keeps every coinbase txid unique.
            script_sig: height.to_le_bytes().to_vec(),
            sequence: u32::MAX,
        }],
        outputs: output_values
            .iter()
            .map(|&value| TxOut {
                value,
                script_pubkey: vec![0x51],
            })
            .collect(),
        lock_time: 0,
    }
}

pub fn spend_tx(prevouts: Vec<OutPoint>, output_values: &[i64]) -> Transaction {
    Transaction {
        version: 1,
        inputs: prevouts
            .into_iter()
            .map(|prevout| TxIn {
                prevout,
                script_sig: Vec::new(),
                sequence: u32::MAX,
            })
            .collect(),
        outputs: output_values
            .iter()
            .map(|&value| TxOut {
                value,
                script_pubkey: vec![0x52],
            })
            .collect(),
        lock_time: 0,
    }
}

/// Grows a hash-linked chain of full blocks plus matching reverse data,
/// then lays them out as container files.
pub struct ChainBuilder {
    pub blocks: Vec<Block>,
    pub revs: Vec<BlockRev>,
    tip: Hash256,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            revs: Vec::new(),
            tip: ZERO_HASH,
        }
    }

    pub fn height(&self) -> i32 {
        self.blocks.len() as i32
    }

    pub fn tip(&self) -> Hash256 {
        self.tip
    }

    /// The outpoint for an existing output plus the reverse-data entry a
    /// spend of it must carry.
    pub fn outpoint(&self, height: i32, tx_index: usize, output_index: u32) -> (OutPoint, InputRev) {
        let block = &self.blocks[height as usize - 1];
        let tx = &block.transactions[tx_index];
        let output = &tx.outputs[output_index as usize];
        (
            OutPoint {
                hash: tx.txid(),
                index: output_index,
            },
            InputRev {
                height,
                coinbase: tx_index == 0,
                amount: output.value,
                pk_script: output.script_pubkey.clone(),
            },
        )
    }

    /// Appends a block. `rev_inputs` holds one entry per non-coinbase
    /// transaction, one `InputRev` per input, same order as the block.
    pub fn add_block(&mut self, transactions: Vec<Transaction>, rev_inputs: Vec<Vec<InputRev>>) {
        assert_eq!(transactions.len(), rev_inputs.len() + 1, "rev shape");
        let height = self.height() + 1;
        let header = BlockHeader {
            version: 1,
            prev_block: self.tip,
            merkle_root: transactions[0].txid(),
            time: 1_600_000_000 + height as u32,
            bits: 0x207f_ffff,
            nonce: height as u32,
        };
        let block = Block {
            header,
            transactions,
        };
        self.tip = block.header.hash();
        self.blocks.push(block);
        self.revs.push(BlockRev {
            txs: rev_inputs
                .into_iter()
                .map(|inputs| TxRev { inputs })
                .collect(),
        });
    }

    pub fn add_coinbase_block(&mut self, output_values: &[i64]) {
        let height = self.height() + 1;
        self.add_block(vec![coinbase(height, output_values)], Vec::new());
    }

    /// One coinbase plus one transaction spending the listed outputs.
    pub fn add_spend_block(&mut self, spends: &[(i32, usize, u32)], output_values: &[i64]) {
        let height = self.height() + 1;
        let mut prevouts = Vec::new();
        let mut rev_inputs = Vec::new();
        for &(spend_height, tx_index, output_index) in spends {
            let (outpoint, rev) = self.outpoint(spend_height, tx_index, output_index);
            prevouts.push(outpoint);
            rev_inputs.push(rev);
        }
        self.add_block(
            vec![coinbase(height, &[50]), spend_tx(prevouts, output_values)],
            vec![rev_inputs],
        );
    }

    /// The splitter-ready bundle for one height, as the block reader would
    /// produce it.
    pub fn bundle(&self, height: i32) -> BlockAndRev {
        let block = self.blocks[height as usize - 1].clone();
        let rev = self.revs[height as usize - 1].clone();
        let blockhash = block.header.hash();
        let (inskip, outskip) = dedupe_block(&block);
        BlockAndRev {
            height,
            block,
            rev,
            blockhash,
            inskip,
            outskip,
        }
    }

    /// Writes `blk*.dat`/`rev*.dat` pairs, `blocks_per_file` blocks to a
    /// container, in the physical order given by `layout` (chain order when
    /// empty).
    pub fn write_containers(&self, dir: &Path, blocks_per_file: usize, layout: &[usize]) {
        let order: Vec<usize> = if layout.is_empty() {
            (0..self.blocks.len()).collect()
        } else {
            layout.to_vec()
        };
        assert_eq!(order.len(), self.blocks.len(), "layout covers the chain");
        self.write_ordered(dir, blocks_per_file, &order);
    }

    /// Writes only the first `count` blocks, in chain order, as a node that
    /// has not seen the rest yet would have.
    pub fn write_first(&self, dir: &Path, count: usize, blocks_per_file: usize) {
        let order: Vec<usize> = (0..count).collect();
        self.write_ordered(dir, blocks_per_file, &order);
    }

    fn write_ordered(&self, dir: &Path, blocks_per_file: usize, order: &[usize]) {
        for (file_num, chunk) in order.chunks(blocks_per_file).enumerate() {
            let mut blk_bytes = Vec::new();
            let mut rev_bytes = Vec::new();
            for &block_index in chunk {
                let block = &self.blocks[block_index];
                append_record(&mut blk_bytes, &block.encode());

                let mut rev_payload = Vec::new();
                rev_payload.extend_from_slice(&block.header.hash());
                rev_payload.extend_from_slice(&self.revs[block_index].encode());
                append_record(&mut rev_bytes, &rev_payload);
            }
            write_file(dir, &format!("blk{file_num:05}.dat"), &blk_bytes);
            write_file(dir, &format!("rev{file_num:05}.dat"), &rev_bytes);
        }
    }
}

fn append_record(bytes: &mut Vec<u8>, payload: &[u8]) {
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(payload);
}

fn write_file(dir: &Path, name: &str, bytes: &[u8]) {
    let mut file = File::create(dir.join(name)).expect("create container");
    file.write_all(bytes).expect("write container");
}

/// A stand-in accumulator that tracks the leaf set, so inconsistent add and
/// delete hashing surfaces as a prove failure.
pub struct MockForest {
    pub leaves: HashSet<Hash256>,
    pending_dels: Vec<Hash256>,
    proves: usize,
    pub fail_at_prove: Option<usize>,
}

impl MockForest {
    pub fn new() -> Self {
        Self {
            leaves: HashSet::new(),
            pending_dels: Vec::new(),
            proves: 0,
            fail_at_prove: None,
        }
    }

    /// Rebuilds the forest state a run left behind by replaying the proven
    /// prefix of the chain, the way a real accumulator restores a snapshot.
    pub fn replayed(chain: &ChainBuilder, through_height: i32) -> Self {
        let mut forest = Self::new();
        for height in 1..=through_height {
            let bundle = chain.bundle(height);
            let (adds, dels) = block_adds_dels(&bundle);
            for del in &dels {
                forest.leaves.remove(del);
            }
            for add in adds {
                forest.leaves.insert(add);
            }
        }
        forest
    }
}

impl Accumulator for MockForest {
    fn prove_block(&mut self, dels: &[Hash256]) -> Result<BlockProof, AccumulatorError> {
        self.proves += 1;
        if self.fail_at_prove == Some(self.proves) {
            return Err(AccumulatorError::new("injected prove failure"));
        }
        for del in dels {
            if !self.leaves.contains(del) {
                return Err(AccumulatorError::new("spent leaf not in the forest"));
            }
        }
        self.pending_dels = dels.to_vec();
        Ok(BlockProof {
            targets: (0..dels.len() as u64).collect(),
            hashes: dels.to_vec(),
        })
    }

    fn verify_block_proof(&self, proof: &BlockProof) -> bool {
        proof.hashes.iter().all(|hash| self.leaves.contains(hash))
    }

    fn modify(&mut self, adds: &[Hash256], _targets: &[u64]) -> Result<(), AccumulatorError> {
        for del in std::mem::take(&mut self.pending_dels) {
            self.leaves.remove(&del);
        }
        for add in adds {
            self.leaves.insert(*add);
        }
        Ok(())
    }
}
