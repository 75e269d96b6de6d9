use std::path::Path;
use std::time::{Duration, Instant};

use fjall::{Batch, Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};

use crate::{Column, KeyValueStore, StoreError, WriteBatch, WriteOp};

const SLOW_COMMIT_THRESHOLD: Duration = Duration::from_millis(500);

/// Embedded key/value backend: one fjall partition per column.
pub struct FjallStore {
    keyspace: Keyspace,
    ttl: PartitionHandle,
    meta: PartitionHandle,
}

impl FjallStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let keyspace = Config::new(path).open().map_err(store_err)?;
        let ttl = open_partition(&keyspace, Column::Ttl)?;
        let meta = open_partition(&keyspace, Column::Meta)?;
        Ok(Self {
            keyspace,
            ttl,
            meta,
        })
    }

    fn part(&self, column: Column) -> &PartitionHandle {
        match column {
            Column::Ttl => &self.ttl,
            Column::Meta => &self.meta,
        }
    }
}

fn open_partition(keyspace: &Keyspace, column: Column) -> Result<PartitionHandle, StoreError> {
    keyspace
        .open_partition(column.as_str(), PartitionCreateOptions::default())
        .map_err(store_err)
}

impl KeyValueStore for FjallStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self.part(column).get(key).map_err(store_err)?;
        Ok(value.map(|slice| slice.to_vec()))
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.part(column).insert(key, value).map_err(store_err)
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.part(column).remove(key).map_err(store_err)
    }

    fn scan_prefix(
        &self,
        column: Column,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.part(column)
            .prefix(prefix)
            .map(|entry| {
                entry
                    .map(|(key, value)| (key.to_vec(), value.to_vec()))
                    .map_err(store_err)
            })
            .collect()
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let mut pending = Batch::with_capacity(self.keyspace.clone(), batch.len())
            .durability(Some(PersistMode::Buffer));
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    pending.insert(self.part(*column), key.as_slice(), value.as_slice());
                }
                WriteOp::Delete { column, key } => {
                    pending.remove(self.part(*column), key.as_slice());
                }
            }
        }
        pending.commit().map_err(store_err)?;

        if started.elapsed() >= SLOW_COMMIT_THRESHOLD {
            utbridge_log::log_warn!(
                "Warning: slow ttl batch commit: {}ms for {} ops",
                started.elapsed().as_millis(),
                batch.len(),
            );
        }
        Ok(())
    }
}

fn store_err(err: fjall::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}
