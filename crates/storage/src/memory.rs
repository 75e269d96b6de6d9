use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{Column, KeyValueStore, StoreError, WriteBatch, WriteOp};

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// One ordered table per column. This system only has the TTL values and
/// the bridge metadata.
#[derive(Default)]
struct Tables {
    ttl: Table,
    meta: Table,
}

impl Tables {
    fn table(&self, column: Column) -> &Table {
        match column {
            Column::Ttl => &self.ttl,
            Column::Meta => &self.meta,
        }
    }

    fn table_mut(&mut self, column: Column) -> &mut Table {
        match column {
            Column::Ttl => &mut self.ttl,
            Column::Meta => &mut self.meta,
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.inner.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.inner.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_string())
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.read()?.table(column).get(key).cloned())
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.write()?
            .table_mut(column)
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.write()?.table_mut(column).remove(key);
        Ok(())
    }

    fn scan_prefix(
        &self,
        column: Column,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let guard = self.read()?;
        Ok(guard
            .table(column)
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut guard = self.write()?;
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    guard
                        .table_mut(*column)
                        .insert(key.as_slice().to_vec(), value.as_slice().to_vec());
                }
                WriteOp::Delete { column, key } => {
                    guard.table_mut(*column).remove(key.as_slice());
                }
            }
        }
        Ok(())
    }
}
