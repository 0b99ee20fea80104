//! The storage manager abstraction.
//!
//! The reader delegates all tile I/O (and any decompression) to a storage
//! manager implementing [`ReadableStorageTraits`]. Tile requests are
//! batched into a single [`get_partial_values`](ReadableStorageTraits::get_partial_values)
//! call per read so that implementations may parallelise across tiles; the
//! reader does not rely on any particular completion order.
//!
//! [`MemoryStore`](store::MemoryStore) is an in-memory implementation, and
//! [`UsageLogStorageAdapter`](usage_log::UsageLogStorageAdapter) wraps any
//! storage manager and logs its calls.

pub mod store;
pub mod usage_log;

use derive_more::{Display, From};
use itertools::Itertools;
use thiserror::Error;

/// A byte offset.
pub type ByteOffset = u64;

/// A byte length.
pub type ByteLength = u64;

/// The bytes of a stored value, or [`None`] if the key is not found.
pub type MaybeBytes = Option<Vec<u8>>;

/// A byte range within a stored value.
///
/// If the byte length is [`None`], the range reads to the end of the value.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
#[display("{offset}..{length:?}")]
pub struct ByteRange {
    /// The byte offset of the range start.
    pub offset: ByteOffset,
    /// The length of the range in bytes.
    pub length: Option<ByteLength>,
}

impl ByteRange {
    /// Create a new byte range.
    #[must_use]
    pub fn new(offset: ByteOffset, length: Option<ByteLength>) -> Self {
        Self { offset, length }
    }

    /// Return the exclusive end of the range within a value of `size` bytes.
    #[must_use]
    pub fn end(&self, size: u64) -> u64 {
        self.length.map_or(size, |length| self.offset + length)
    }
}

/// A storage key.
///
/// A non-empty string which does not start or end with `/`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display)]
pub struct StoreKey(String);

/// An invalid store key.
#[derive(Debug, From, Error)]
#[error("invalid store key {_0}")]
pub struct StoreKeyError(String);

impl StoreKey {
    /// Create a new store key from `key`.
    ///
    /// # Errors
    /// Returns a [`StoreKeyError`] if `key` is not valid according to
    /// [`StoreKey::validate()`].
    pub fn new(key: impl Into<String>) -> Result<Self, StoreKeyError> {
        let key = key.into();
        if Self::validate(&key) {
            Ok(Self(key))
        } else {
            Err(StoreKeyError(key))
        }
    }

    /// Create a new store key from `key` without validation.
    ///
    /// # Safety
    /// `key` is not validated, so this can result in an invalid store key.
    #[must_use]
    pub unsafe fn new_unchecked(key: impl Into<String>) -> Self {
        let key = key.into();
        debug_assert!(Self::validate(&key));
        Self(key)
    }

    /// Extracts a string slice of the underlying key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validates a key: a key is a non-empty string which does not start or
    /// end with a `/` character.
    #[must_use]
    pub fn validate(key: &str) -> bool {
        !key.starts_with('/') && !key.ends_with('/') && !key.is_empty()
    }
}

impl TryFrom<&str> for StoreKey {
    type Error = StoreKeyError;

    fn try_from(key: &str) -> Result<Self, Self::Error> {
        Self::new(key)
    }
}

/// A [`StoreKey`] and [`ByteRange`].
#[derive(Clone, Eq, PartialEq, Debug, Display)]
#[display("{key}: {byte_range}")]
pub struct StoreKeyRange {
    /// The key.
    pub key: StoreKey,
    /// The byte range within the value at the key.
    pub byte_range: ByteRange,
}

impl StoreKeyRange {
    /// Create a new store key range.
    #[must_use]
    pub fn new(key: StoreKey, byte_range: ByteRange) -> Self {
        Self { key, byte_range }
    }
}

/// A storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// An invalid store key.
    #[error(transparent)]
    InvalidStoreKey(#[from] StoreKeyError),
    /// A byte range outside the value at a key.
    #[error("invalid byte range {byte_range} for {key} with {size} bytes")]
    InvalidByteRange {
        /// The key.
        key: StoreKey,
        /// The requested byte range.
        byte_range: ByteRange,
        /// The size of the value at the key.
        size: u64,
    },
    /// A key expected to exist was not found.
    #[error("key {_0} was not found")]
    KeyNotFound(StoreKey),
    /// Any other error.
    #[error("{_0}")]
    Other(String),
}

impl From<&str> for StorageError {
    fn from(err: &str) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<String> for StorageError {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}

/// Readable storage traits.
pub trait ReadableStorageTraits: Send + Sync {
    /// Retrieve the value (bytes) associated with a given [`StoreKey`].
    ///
    /// Returns [`None`] if the key is not found.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        Ok(self
            .get_partial_values_key(key, &[ByteRange::new(0, None)])?
            .map(|mut v| v.remove(0)))
    }

    /// Retrieve partial bytes from a list of byte ranges for a store key.
    ///
    /// Returns [`None`] if the key is not found.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn get_partial_values_key(
        &self,
        key: &StoreKey,
        byte_ranges: &[ByteRange],
    ) -> Result<Option<Vec<Vec<u8>>>, StorageError>;

    /// Retrieve partial bytes from a list of [`StoreKeyRange`].
    ///
    /// The output contains one value per key range, in order; a value is
    /// [`None`] for a missing key. Implementations may service the ranges
    /// in any internal order (including in parallel).
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn get_partial_values(
        &self,
        key_ranges: &[StoreKeyRange],
    ) -> Result<Vec<MaybeBytes>, StorageError> {
        // Group consecutive ranges on the same key into one call.
        let mut out: Vec<MaybeBytes> = Vec::with_capacity(key_ranges.len());
        for (key, group) in &key_ranges.iter().chunk_by(|kr| &kr.key) {
            let byte_ranges: Vec<ByteRange> = group.map(|kr| kr.byte_range).collect();
            match self.get_partial_values_key(key, &byte_ranges)? {
                Some(values) => out.extend(values.into_iter().map(Some)),
                None => out.extend(byte_ranges.iter().map(|_| None)),
            }
        }
        Ok(out)
    }

    /// Return the size in bytes of the value at `key`.
    ///
    /// Returns [`None`] if the key is not found.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError>;
}

/// Writable storage traits.
///
/// The read path itself never writes; this trait exists so that the engine's
/// write path and test fixtures can populate a store.
pub trait WritableStorageTraits: Send + Sync {
    /// Store `value` at `key`.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn set(&self, key: &StoreKey, value: &[u8]) -> Result<(), StorageError>;

    /// Erase the value at `key`, returning true if it existed.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn erase(&self, key: &StoreKey) -> Result<bool, StorageError>;
}
