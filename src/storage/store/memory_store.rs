//! An in-memory store.

use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::storage::{
    ByteRange, MaybeBytes, ReadableStorageTraits, StorageError, StoreKey, WritableStorageTraits,
};

/// An in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data_map: RwLock<BTreeMap<StoreKey, Vec<u8>>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReadableStorageTraits for MemoryStore {
    fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        let data_map = self.data_map.read();
        Ok(data_map.get(key).cloned())
    }

    fn get_partial_values_key(
        &self,
        key: &StoreKey,
        byte_ranges: &[ByteRange],
    ) -> Result<Option<Vec<Vec<u8>>>, StorageError> {
        let data_map = self.data_map.read();
        let Some(data) = data_map.get(key) else {
            return Ok(None);
        };
        let size = data.len() as u64;
        let mut out = Vec::with_capacity(byte_ranges.len());
        for byte_range in byte_ranges {
            let end = byte_range.end(size);
            if byte_range.offset > end || end > size {
                return Err(StorageError::InvalidByteRange {
                    key: key.clone(),
                    byte_range: *byte_range,
                    size,
                });
            }
            let start = usize::try_from(byte_range.offset).unwrap();
            let end = usize::try_from(end).unwrap();
            out.push(data[start..end].to_vec());
        }
        Ok(Some(out))
    }

    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        let data_map = self.data_map.read();
        Ok(data_map.get(key).map(|data| data.len() as u64))
    }
}

impl WritableStorageTraits for MemoryStore {
    fn set(&self, key: &StoreKey, value: &[u8]) -> Result<(), StorageError> {
        let mut data_map = self.data_map.write();
        data_map.insert(key.clone(), value.to_vec());
        Ok(())
    }

    fn erase(&self, key: &StoreKey) -> Result<bool, StorageError> {
        let mut data_map = self.data_map.write();
        Ok(data_map.remove(key).is_some())
    }
}
