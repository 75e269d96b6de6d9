//! Durable TTL values and resumption metadata.
//!
//! Each spent output yields one record: (creating height, position within
//! the creating block) maps to the height it was destroyed at. One writer
//! commits one batch per block.

use crossbeam_channel::Receiver;

use utbridge_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::error::BridgeError;
use crate::txids::TtlResultBlock;

const META_STATE_KEY: &[u8] = b"bridge:state";

/// The driver's clean-shutdown checkpoint: blocks fully proven and the proof
/// file byte cursor. Advisory; artifact sizes win on disagreement.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResumeState {
    pub height: i32,
    pub p_offset: u32,
}

impl ResumeState {
    pub fn encode(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0..4].copy_from_slice(&(self.height as u32).to_be_bytes());
        out[4..8].copy_from_slice(&self.p_offset.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 8 {
            return None;
        }
        let height = u32::from_be_bytes(bytes[0..4].try_into().ok()?) as i32;
        let p_offset = u32::from_be_bytes(bytes[4..8].try_into().ok()?);
        Some(Self { height, p_offset })
    }
}

pub fn ttl_key(create_height: i32, index_within_block: u16) -> [u8; 6] {
    let mut key = [0u8; 6];
    key[0..4].copy_from_slice(&(create_height as u32).to_be_bytes());
    key[4..6].copy_from_slice(&index_within_block.to_be_bytes());
    key
}

pub struct TtlDb<S> {
    store: S,
}

impl<S> TtlDb<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> TtlDb<S> {
    pub fn write_block(&self, block: &TtlResultBlock) -> Result<(), StoreError> {
        if block.results.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        batch.reserve(block.results.len());
        for result in &block.results {
            batch.put(
                Column::Ttl,
                ttl_key(result.create_height, result.index_within_block),
                (block.destroy_height as u32).to_be_bytes(),
            );
        }
        self.store.write_batch(&batch)
    }

    /// Destroy height for an output, if it has been spent.
    pub fn get(&self, create_height: i32, index_within_block: u16) -> Result<Option<i32>, StoreError> {
        let bytes = match self
            .store
            .get(Column::Ttl, &ttl_key(create_height, index_within_block))?
        {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        if bytes.len() != 4 {
            return Err(StoreError::Backend("invalid ttl entry".to_string()));
        }
        Ok(Some(
            u32::from_be_bytes(bytes[..4].try_into().expect("len checked")) as i32,
        ))
    }

    pub fn load_state(&self) -> Result<Option<ResumeState>, StoreError> {
        let bytes = match self.store.get(Column::Meta, META_STATE_KEY)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        ResumeState::decode(&bytes)
            .ok_or_else(|| StoreError::Backend("invalid resume state".to_string()))
            .map(Some)
    }

    pub fn save_state(&self, state: ResumeState) -> Result<(), StoreError> {
        self.store.put(Column::Meta, META_STATE_KEY, &state.encode())
    }
}

/// Drains TTL result blocks until the lookup worker closes the queue.
pub fn ttl_writer_worker<S: KeyValueStore>(
    rx: Receiver<TtlResultBlock>,
    db: TtlDb<S>,
) -> Result<(), BridgeError> {
    while let Ok(block) = rx.recv() {
        db.write_block(&block)?;
    }
    Ok(())
}
