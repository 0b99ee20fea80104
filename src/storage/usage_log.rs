//! A storage adapter which logs storage manager calls.

use std::{
    io::Write,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use itertools::Itertools;

use crate::storage::{
    ByteRange, MaybeBytes, ReadableStorageTraits, StorageError, StoreKey, StoreKeyRange,
};

/// The usage log storage adapter. Logs storage manager calls.
///
/// Each call is logged as one sequenced summary line. The batched
/// [`get_partial_values`](ReadableStorageTraits::get_partial_values) entry
/// reports how many byte ranges were requested over how many attribute
/// files and how many bytes came back, which is usually what matters when
/// inspecting the tile access pattern of a read query.
///
/// ### Example (log to stderr)
/// ```rust
/// # use std::sync::{Arc, Mutex};
/// # use tilestore::storage::store::MemoryStore;
/// # use tilestore::storage::usage_log::UsageLogStorageAdapter;
/// let store = Arc::new(MemoryStore::new());
/// let log_writer = Arc::new(Mutex::new(std::io::stderr()));
/// let store = Arc::new(UsageLogStorageAdapter::new(store, log_writer, || {
///     "[read] ".to_string()
/// }));
/// ```
pub struct UsageLogStorageAdapter<TStorage: ?Sized> {
    handle: Arc<Mutex<dyn Write + Send + Sync>>,
    prefix_func: fn() -> String,
    calls: AtomicU64,
    storage: Arc<TStorage>,
}

impl<TStorage: ?Sized> core::fmt::Debug for UsageLogStorageAdapter<TStorage> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "usage log ({} calls)", self.calls.load(Ordering::Relaxed))
    }
}

impl<TStorage: ?Sized> UsageLogStorageAdapter<TStorage> {
    /// Create a new usage log storage adapter.
    pub fn new(
        storage: Arc<TStorage>,
        handle: Arc<Mutex<dyn Write + Send + Sync>>,
        prefix_func: fn() -> String,
    ) -> Self {
        Self {
            handle,
            prefix_func,
            calls: AtomicU64::new(0),
            storage,
        }
    }

    /// The number of storage manager calls logged so far.
    #[must_use]
    pub fn call_num(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn log_line(&self, line: &str) -> Result<(), StorageError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        let mut handle = self.handle.lock().unwrap();
        writeln!(handle, "{}#{call} {line}", (self.prefix_func)())?;
        Ok(())
    }
}

/// Summarize the outcome of a single-value retrieval.
fn value_summary(result: &Result<MaybeBytes, StorageError>) -> String {
    match result {
        Ok(Some(value)) => format!("{} bytes", value.len()),
        Ok(None) => "missing".to_string(),
        Err(err) => format!("error ({err})"),
    }
}

impl<TStorage: ?Sized + ReadableStorageTraits> ReadableStorageTraits
    for UsageLogStorageAdapter<TStorage>
{
    fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        let result = self.storage.get(key);
        self.log_line(&format!("get {key}: {}", value_summary(&result)))?;
        result
    }

    fn get_partial_values_key(
        &self,
        key: &StoreKey,
        byte_ranges: &[ByteRange],
    ) -> Result<Option<Vec<Vec<u8>>>, StorageError> {
        let result = self.storage.get_partial_values_key(key, byte_ranges);
        let outcome = match &result {
            Ok(Some(values)) => {
                format!("{} bytes", values.iter().map(Vec::len).sum::<usize>())
            }
            Ok(None) => "missing".to_string(),
            Err(err) => format!("error ({err})"),
        };
        self.log_line(&format!(
            "read {key} ({} ranges): {outcome}",
            byte_ranges.len()
        ))?;
        result
    }

    fn get_partial_values(
        &self,
        key_ranges: &[StoreKeyRange],
    ) -> Result<Vec<MaybeBytes>, StorageError> {
        let result = self.storage.get_partial_values(key_ranges);
        let key_num = key_ranges.iter().map(|kr| &kr.key).unique().count();
        let outcome = match &result {
            Ok(values) => {
                let fetched: usize = values.iter().flatten().map(Vec::len).sum();
                let missing = values.iter().filter(|value| value.is_none()).count();
                if missing == 0 {
                    format!("{fetched} bytes")
                } else {
                    format!("{fetched} bytes, {missing} missing")
                }
            }
            Err(err) => format!("error ({err})"),
        };
        self.log_line(&format!(
            "batch read: {} ranges over {key_num} keys: {outcome}",
            key_ranges.len()
        ))?;
        result
    }

    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        let result = self.storage.size_key(key);
        let outcome = match &result {
            Ok(Some(size)) => format!("{size} bytes"),
            Ok(None) => "missing".to_string(),
            Err(err) => format!("error ({err})"),
        };
        self.log_line(&format!("size {key}: {outcome}"))?;
        result
    }
}
