//! The one-shot pipeline driver.
//!
//! Owns the height cursor: orders the containers, then walks blocks in chain
//! order, feeding the txid pipeline, the accumulator oracle and the proof
//! stream. Single-threaded itself; everything concurrent hangs off bounded
//! queues it created.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;

use utbridge_log::{log_error, log_info, log_warn};
use utbridge_primitives::{Hash256, OutPoint};
use utbridge_storage::KeyValueStore;

use crate::accumulator::{Accumulator, LeafData};
use crate::blockreader::{self, BlockAndRev};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::locations::{location_record_count, read_last_location_height};
use crate::orderer;
use crate::proofs::ProofWriter;
use crate::rev::RevFileSource;
use crate::ttldb::{ttl_writer_worker, ResumeState, TtlDb};
use crate::txids::{TtlPipeline, TXID_OFFSET_SIZE};
use crate::QUEUE_DEPTH;

/// How long cooperative shutdown may take before the process is killed.
pub const SHUTDOWN_WATCHDOG: Duration = Duration::from_secs(10);

/// Shared stop flag, checked between blocks. The signal-handling shell owns
/// the other end.
#[derive(Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DriverSummary {
    /// Blocks fully proven, i.e. the next run starts at this + 1.
    pub height: i32,
    /// Highest height in the location index.
    pub last_location_height: u32,
}

pub struct Driver<S, A> {
    config: BridgeConfig,
    store: Arc<S>,
    accumulator: A,
    stop: StopSignal,
}

impl<S, A> Driver<S, A>
where
    S: KeyValueStore + 'static,
    A: Accumulator,
{
    pub fn new(config: BridgeConfig, store: Arc<S>, accumulator: A) -> Self {
        Self {
            config,
            store,
            accumulator,
            stop: StopSignal::new(),
        }
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn run(mut self) -> Result<DriverSummary, BridgeError> {
        self.config.check_network_magic()?;
        self.config.ensure_dirs()?;
        self.reconcile_ordering_artifacts()?;

        let (tip, indexed) = orderer::resume_tip(&self.config)?;
        let outcome = orderer::build_location_index(&self.config, tip, indexed, &self.stop)?;
        if outcome.interrupted {
            self.reconcile_ordering_artifacts()?;
            return Ok(DriverSummary {
                height: 0,
                last_location_height: 0,
            });
        }
        let last_height = outcome.last_height as i32;

        // Artifact census. The txid files may legitimately run ahead of the
        // proof stream after a crash; the writer skips those heights.
        let txid_blocks = txid_offset_records(&self.config)?;
        let mut proof_writer = ProofWriter::open(
            &self.config.proof_file_path(),
            &self.config.proof_offset_path(),
        )?;
        let proof_blocks = proof_writer.records() as i32;
        if txid_blocks < proof_blocks {
            return Err(BridgeError::Integrity(format!(
                "txid index covers {txid_blocks} heights but the proof stream covers \
                 {proof_blocks}; delete the artifacts and rebuild"
            )));
        }
        let db = TtlDb::new(Arc::clone(&self.store));
        match db.load_state()? {
            Some(state)
                if state.height != proof_blocks || state.p_offset != proof_writer.p_offset() =>
            {
                log_warn!(
                    "resume state ({}, {}) disagrees with artifacts ({}, {}); trusting artifacts",
                    state.height,
                    state.p_offset,
                    proof_blocks,
                    proof_writer.p_offset()
                );
            }
            _ => {}
        }
        log_info!("resuming at height {proof_blocks}, chain indexed to {last_height}");

        let rev_source = RevFileSource::open(&self.config.block_dir, self.config.network.magic())?;
        let (block_tx, block_rx) = bounded::<Arc<BlockAndRev>>(QUEUE_DEPTH);
        let reader = blockreader::spawn(
            &self.config,
            proof_blocks,
            last_height,
            Box::new(rev_source),
            block_tx,
        );

        let (result_tx, result_rx) = bounded(QUEUE_DEPTH);
        let pipeline = TtlPipeline::spawn(
            &self.config.txid_file_path(),
            &self.config.txid_offset_path(),
            txid_blocks,
            result_tx,
        )?;
        let ttl_writer = thread::spawn(move || ttl_writer_worker(result_rx, db));

        let mut height = proof_blocks;
        let mut failure: Option<BridgeError> = None;
        while height < last_height {
            if self.stop.is_stopped() {
                log_info!("stop requested at height {height}");
                break;
            }
            let Ok(bundle) = block_rx.recv() else {
                // The reader died early; its join below has the error.
                break;
            };
            if !pipeline.send(Arc::clone(&bundle)) {
                break;
            }

            let (adds, dels) = block_adds_dels(&bundle);
            let proof = match self.accumulator.prove_block(&dels) {
                Ok(proof) => proof,
                Err(err) => {
                    failure = Some(BridgeError::Proof(format!(
                        "prove_block failed at height {}: {err}",
                        bundle.height
                    )));
                    break;
                }
            };
            if !self.accumulator.verify_block_proof(&proof) {
                failure = Some(BridgeError::Proof(format!(
                    "verify_block_proof failed at height {}",
                    bundle.height
                )));
                break;
            }
            if let Err(err) = proof_writer.append(bundle.height, &proof.to_bytes()) {
                failure = Some(err);
                break;
            }
            if let Err(err) = self.accumulator.modify(&adds, &proof.targets) {
                failure = Some(BridgeError::Proof(format!(
                    "modify failed at height {}: {err}",
                    bundle.height
                )));
                break;
            }

            height += 1;
            if height % 10_000 == 0 {
                log_info!("proofs built through height {height}");
            }
        }

        // Cooperative drain, fenced by the hard watchdog.
        let (done_tx, done_rx) = bounded::<()>(1);
        let watchdog = thread::spawn(move || {
            if done_rx.recv_timeout(SHUTDOWN_WATCHDOG).is_err() {
                log_error!(
                    "shutdown hung past {}s; force-terminating, artifacts may be corrupt",
                    SHUTDOWN_WATCHDOG.as_secs()
                );
                std::process::exit(1);
            }
        });

        drop(block_rx);
        let reader_result = reader
            .join()
            .map_err(|_| BridgeError::Integrity("block reader panicked".to_string()))
            .and_then(|inner| inner);
        let pipeline_result = pipeline.close();
        let ttl_result = ttl_writer
            .join()
            .map_err(|_| BridgeError::Integrity("ttl writer panicked".to_string()))
            .and_then(|inner| inner);
        let sync_result = proof_writer.sync();

        let db = TtlDb::new(Arc::clone(&self.store));
        let state = ResumeState {
            height,
            p_offset: proof_writer.p_offset(),
        };
        if let Err(err) = db.save_state(state) {
            log_warn!("failed to persist resume state: {err}");
        }

        let _ = done_tx.send(());
        let _ = watchdog.join();

        if let Some(err) = failure
            .or(reader_result.err())
            .or(pipeline_result.err())
            .or(ttl_result.err())
            .or(sync_result.err())
        {
            return Err(err);
        }

        log_info!("done at height {height}");
        Ok(DriverSummary {
            height,
            last_location_height: outcome.last_height,
        })
    }

    /// A location index whose record count disagrees with the last-height
    /// file is a torn ordering pass (crash or stop mid-pass). The partial
    /// artifacts are unusable; delete them so the next pass rebuilds from
    /// the containers.
    fn reconcile_ordering_artifacts(&self) -> Result<(), BridgeError> {
        let records = location_record_count(&self.config.location_index_path())?;
        let recorded = read_last_location_height(&self.config.last_location_height_path())?;
        if records != recorded {
            log_warn!(
                "location index holds {records} records but the last-height file says \
                 {recorded}; removing partial ordering artifacts"
            );
            std::fs::remove_dir_all(self.config.offset_dir())?;
            std::fs::create_dir_all(self.config.offset_dir())?;
        }
        Ok(())
    }
}

fn txid_offset_records(config: &BridgeConfig) -> Result<i32, BridgeError> {
    match std::fs::metadata(config.txid_offset_path()) {
        Ok(meta) => Ok((meta.len() / TXID_OFFSET_SIZE) as i32),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(err) => Err(err.into()),
    }
}

/// The accumulator's view of one block: leaf hashes to add (retained,
/// spendable outputs) and to delete (spent outputs, reconstructed from the
/// prevouts and reverse data). Same-block pairs cancel via the skip lists
/// and never reach the oracle.
pub fn block_adds_dels(bnr: &BlockAndRev) -> (Vec<Hash256>, Vec<Hash256>) {
    let mut adds = Vec::new();
    let mut dels = Vec::new();
    let mut outskip_pos = 0usize;
    let mut inskip_pos = 0usize;
    let mut output_in_block: u32 = 0;
    let mut input_in_block: u32 = 0;

    for (tx_index, tx) in bnr.block.transactions.iter().enumerate() {
        let txid = tx.txid();
        for (output_index, output) in tx.outputs.iter().enumerate() {
            let skipped =
                outskip_pos < bnr.outskip.len() && bnr.outskip[outskip_pos] == output_in_block;
            if skipped {
                outskip_pos += 1;
            }
            output_in_block += 1;
            if skipped || output.is_unspendable() {
                continue;
            }
            adds.push(
                LeafData {
                    outpoint: OutPoint {
                        hash: txid,
                        index: output_index as u32,
                    },
                    height: bnr.height,
                    coinbase: tx_index == 0,
                    amount: output.value,
                    pk_script: output.script_pubkey.clone(),
                }
                .leaf_hash(),
            );
        }

        if tx_index == 0 {
            input_in_block += tx.inputs.len() as u32;
            continue;
        }
        for (input_index, input) in tx.inputs.iter().enumerate() {
            let skipped =
                inskip_pos < bnr.inskip.len() && bnr.inskip[inskip_pos] == input_in_block;
            input_in_block += 1;
            if skipped {
                inskip_pos += 1;
                continue;
            }
            let rev_input = &bnr.rev.txs[tx_index - 1].inputs[input_index];
            dels.push(
                LeafData {
                    outpoint: input.prevout.clone(),
                    height: rev_input.height,
                    coinbase: rev_input.coinbase,
                    amount: rev_input.amount,
                    pk_script: rev_input.pk_script.clone(),
                }
                .leaf_hash(),
            );
        }
    }
    (adds, dels)
}
