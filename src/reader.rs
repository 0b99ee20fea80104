//! Read queries.
//!
//! A [`Reader`] executes read queries against one array: it is configured
//! with an [`ArraySchema`], the [`FragmentMetadata`] list of the array
//! (ordered oldest to newest), a storage manager, a [`Subarray`], a
//! [`Layout`], and per-attribute buffer sizes.
//!
//! On [`init`](Reader::init), the subarray is split into partitions whose
//! results are guaranteed to fit in the user buffers. Each
//! [`read`](Reader::read) call executes the current partition into the
//! caller's [`QueryBuffers`] and advances to the next partition; the query
//! is complete when [`done`](Reader::done) returns true.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use tilestore::reader::{AttributeBufferMut, QueryBuffers, Reader};
//! # use tilestore::storage::store::MemoryStore;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let (schema, fragments): (Arc<tilestore::schema::ArraySchema>, Vec<_>) = unimplemented!();
//! let mut reader = Reader::new();
//! reader.set_array_schema(schema);
//! reader.set_fragment_metadata(fragments);
//! reader.set_storage_manager(Arc::new(MemoryStore::new()));
//! reader.set_buffers(&["a"], &[1024])?;
//! reader.set_subarray(None)?;
//! reader.init()?;
//! let mut a = vec![0u8; 1024];
//! while !reader.done() {
//!     let mut buffers = QueryBuffers::new(vec![AttributeBufferMut::new(&mut a)]);
//!     reader.read(&mut buffers)?;
//!     // consume buffers.sizes()[0].buffer_size bytes of `a`
//! }
//! # Ok(())
//! # }
//! ```

mod copy;
mod dense;
mod overlap;
mod read_state;
mod sparse;

use std::sync::Arc;

use thiserror::Error;

use crate::{
    datatype::{with_coordinate, DatatypeMismatchError},
    fragment::FragmentMetadata,
    schema::{domain::rect_overlap, ArraySchema, ArrayType, AttributeId, Layout},
    storage::{ReadableStorageTraits, StorageError},
    subarray::Subarray,
    tile::TileCreateError,
};

use read_state::ReadState;

/// The status of a completed [`Reader::read`] call.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ReadStatus {
    /// The current partition was fully executed.
    Completed,
    /// A buffer filled mid-partition. The partition was not advanced; the
    /// caller either re-submits with larger buffers or accepts the partial
    /// results and treats the remaining partitions as the continuation.
    Incomplete,
}

/// The user buffers of one attribute for one [`Reader::read`] call.
#[derive(Debug)]
pub struct AttributeBufferMut<'a> {
    /// The attribute buffer. For a variable-sized attribute, this is the
    /// offsets buffer (`u64` byte offsets into the values buffer).
    pub buffer: &'a mut [u8],
    /// The values buffer of a variable-sized attribute.
    pub buffer_var: Option<&'a mut [u8]>,
}

impl<'a> AttributeBufferMut<'a> {
    /// Create the buffer of a fixed-sized attribute (or the coordinates
    /// pseudo-attribute).
    #[must_use]
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            buffer_var: None,
        }
    }

    /// Create the offsets and values buffers of a variable-sized attribute.
    #[must_use]
    pub fn new_var(offsets: &'a mut [u8], values: &'a mut [u8]) -> Self {
        Self {
            buffer: offsets,
            buffer_var: Some(values),
        }
    }
}

/// The number of bytes written into the buffers of one attribute.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct BufferSizes {
    /// Bytes written into the attribute (or offsets) buffer.
    pub buffer_size: u64,
    /// Bytes written into the values buffer of a variable-sized attribute.
    pub buffer_var_size: u64,
}

/// The user buffers for one [`Reader::read`] call, one entry per registered
/// attribute in [`Reader::set_buffers`] order.
#[derive(Debug)]
pub struct QueryBuffers<'a> {
    buffers: Vec<AttributeBufferMut<'a>>,
    sizes: Vec<BufferSizes>,
}

impl<'a> QueryBuffers<'a> {
    /// Create a new set of query buffers.
    #[must_use]
    pub fn new(buffers: Vec<AttributeBufferMut<'a>>) -> Self {
        let sizes = vec![BufferSizes::default(); buffers.len()];
        Self { buffers, sizes }
    }

    /// Return the bytes written per attribute by the last
    /// [`Reader::read`] call.
    #[must_use]
    pub fn sizes(&self) -> &[BufferSizes] {
        &self.sizes
    }

    fn len(&self) -> usize {
        self.buffers.len()
    }

    fn reset_sizes(&mut self) {
        self.sizes.fill(BufferSizes::default());
    }

    pub(crate) fn entry_mut(
        &mut self,
        i: usize,
    ) -> (&mut AttributeBufferMut<'a>, &mut BufferSizes) {
        let Self { buffers, sizes } = self;
        (&mut buffers[i], &mut sizes[i])
    }
}

/// A read query error.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// No array schema was set.
    #[error("no array schema set")]
    MissingArraySchema,
    /// No storage manager was set.
    #[error("no storage manager set")]
    MissingStorageManager,
    /// No buffers were set.
    #[error("no buffers set")]
    MissingBuffers,
    /// The reader was not initialized.
    #[error("the reader is not initialized")]
    NotInitialized,
    /// An attribute name not present in the schema.
    #[error("unknown attribute {_0}")]
    UnknownAttribute(String),
    /// An attribute named more than once.
    #[error("duplicate attribute {_0}")]
    DuplicateAttribute(String),
    /// A buffer (size) count not matching the registered attributes.
    #[error("got {got} buffers, expected {expected}")]
    InvalidBufferCount {
        /// The number of buffers given.
        got: usize,
        /// The number of buffers expected.
        expected: usize,
    },
    /// A single buffer for a variable-sized attribute.
    #[error("attribute {_0} expects offsets and values buffers")]
    MissingVarBuffer(String),
    /// Offsets and values buffers for a fixed-sized attribute.
    #[error("attribute {_0} expects a single buffer")]
    UnexpectedVarBuffer(String),
    /// A subarray dimensionality not matching the array.
    #[error("subarray dimensionality {_0} does not match the array dimensionality {_1}")]
    IncompatibleSubarrayDimensionality(usize, usize),
    /// A subarray not contained in the array domain.
    #[error("subarray is not contained in the array domain")]
    SubarrayOutOfDomain,
    /// A datatype inconsistent with the schema domain type.
    #[error(transparent)]
    DatatypeMismatch(#[from] DatatypeMismatchError),
    /// A single cell cannot fit the buffers; partitioning cannot progress.
    #[error("a single cell of attribute {attribute} cannot fit the buffer of {buffer_size} bytes")]
    BufferTooSmall {
        /// The attribute name.
        attribute: String,
        /// The buffer size in bytes.
        buffer_size: u64,
    },
    /// A mid-query buffer size smaller than the initial size.
    #[error("buffer size {got} is smaller than the initial buffer size {initial}")]
    InvalidResetBufferSize {
        /// The buffer size given.
        got: u64,
        /// The initial buffer size the partitions were computed against.
        initial: u64,
    },
    /// An error from the storage manager.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// An invalid tile read from storage.
    #[error(transparent)]
    TileCreate(#[from] TileCreateError),
    /// An internal invariant was violated; this signals a bug.
    #[error("internal invariant violated: {_0}")]
    Internal(&'static str),
    /// An error while executing a subarray partition.
    #[error("read error in subarray partition {idx}: {source}")]
    Partition {
        /// The partition index.
        idx: usize,
        /// The underlying error.
        #[source]
        source: Box<ReaderError>,
    },
}

/// Borrowed collaborators of one read call.
pub(crate) struct ReadContext<'a, TStorage: ?Sized> {
    pub schema: &'a ArraySchema,
    pub fragments: &'a [Arc<FragmentMetadata>],
    pub storage: &'a TStorage,
    pub layout: Layout,
    pub attributes: &'a [AttributeId],
}

/// Processes read queries against one array.
///
/// See the [module documentation](self) for usage.
#[derive(Debug)]
pub struct Reader<TStorage: ?Sized> {
    schema: Option<Arc<ArraySchema>>,
    fragments: Vec<Arc<FragmentMetadata>>,
    storage: Option<Arc<TStorage>>,
    layout: Layout,
    attributes: Vec<String>,
    attr_ids: Vec<AttributeId>,
    initial_buffer_sizes: Vec<u64>,
    subarray: Option<Subarray>,
    read_state: Option<ReadState>,
}

impl<TStorage: ?Sized> Reader<TStorage> {
    /// Create a new reader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema: None,
            fragments: Vec::new(),
            storage: None,
            layout: Layout::RowMajor,
            attributes: Vec::new(),
            attr_ids: Vec::new(),
            initial_buffer_sizes: Vec::new(),
            subarray: None,
            read_state: None,
        }
    }

    /// Set the array schema. Resets the read state.
    pub fn set_array_schema(&mut self, schema: Arc<ArraySchema>) {
        self.schema = Some(schema);
        self.subarray = None;
        self.attributes.clear();
        self.attr_ids.clear();
        self.initial_buffer_sizes.clear();
        self.read_state = None;
    }

    /// Set the fragment metadata, ordered oldest to newest. Resets the read
    /// state.
    pub fn set_fragment_metadata(&mut self, fragments: Vec<Arc<FragmentMetadata>>) {
        self.fragments = fragments;
        self.read_state = None;
    }

    /// Set the storage manager.
    pub fn set_storage_manager(&mut self, storage: Arc<TStorage>) {
        self.storage = Some(storage);
    }

    /// Set the cell layout of the query results. Resets the read state.
    pub fn set_layout(&mut self, layout: Layout) {
        self.layout = layout;
        self.read_state = None;
    }

    /// Set the query subarray, or the entire array domain if `subarray` is
    /// [`None`]. Resets the read state.
    ///
    /// # Errors
    /// Returns a [`ReaderError`] if no schema is set, or the subarray
    /// datatype or dimensionality does not match the schema, or the
    /// subarray is not contained in the array domain.
    pub fn set_subarray(&mut self, subarray: Option<&Subarray>) -> Result<(), ReaderError> {
        let schema = self.schema.as_ref().ok_or(ReaderError::MissingArraySchema)?;
        let domain = schema.domain();
        match subarray {
            Some(subarray) => {
                if subarray.dim_num() != domain.dim_num() {
                    return Err(ReaderError::IncompatibleSubarrayDimensionality(
                        subarray.dim_num(),
                        domain.dim_num(),
                    ));
                }
                with_coordinate!(
                    domain.datatype(),
                    |T| {
                        let bounds = domain.bounds::<T>()?;
                        let sub = subarray.to_vec::<T>()?;
                        let (overlap, contained) = rect_overlap(&bounds, &sub);
                        if !(overlap && contained) {
                            return Err(ReaderError::SubarrayOutOfDomain);
                        }
                        Ok(())
                    },
                    Err(ReaderError::Internal("non-numeric domain datatype"))
                )?;
                self.subarray = Some(subarray.clone());
            }
            None => {
                let full = with_coordinate!(
                    domain.datatype(),
                    |T| {
                        let bounds = domain.bounds::<T>()?;
                        Ok(unsafe { Subarray::new_unchecked(&bounds) })
                    },
                    Err(ReaderError::Internal("non-numeric domain datatype"))
                )?;
                self.subarray = Some(full);
            }
        }
        self.read_state = None;
        Ok(())
    }

    /// Register the query attributes and their buffer sizes.
    ///
    /// `attributes` may include the coordinates pseudo-attribute
    /// [`COORDS_NAME`](crate::schema::COORDS_NAME). `buffer_sizes` holds one
    /// size per fixed-sized attribute and two (offsets, values) per
    /// variable-sized attribute, in attribute order.
    ///
    /// While a query is in progress, the attribute set must be unchanged
    /// and each size must be at least the corresponding initial size (the
    /// subarray partitions were computed against the initial sizes);
    /// otherwise the reader is re-registered from scratch.
    ///
    /// # Errors
    /// Returns a [`ReaderError`] if no schema is set, an attribute is
    /// unknown or duplicated, the size count does not match, or a mid-query
    /// size is smaller than its initial size.
    pub fn set_buffers(
        &mut self,
        attributes: &[&str],
        buffer_sizes: &[u64],
    ) -> Result<(), ReaderError> {
        let schema = self.schema.as_ref().ok_or(ReaderError::MissingArraySchema)?;
        let mut attr_ids = Vec::with_capacity(attributes.len());
        let mut expected = 0;
        for (i, name) in attributes.iter().enumerate() {
            if attributes[..i].contains(name) {
                return Err(ReaderError::DuplicateAttribute((*name).to_string()));
            }
            let id = schema
                .attribute_id(name)
                .ok_or_else(|| ReaderError::UnknownAttribute((*name).to_string()))?;
            expected += if schema.attribute(id).is_some_and(crate::schema::Attribute::is_var) {
                2
            } else {
                1
            };
            attr_ids.push(id);
        }
        if buffer_sizes.len() != expected {
            return Err(ReaderError::InvalidBufferCount {
                got: buffer_sizes.len(),
                expected,
            });
        }
        let same_attributes = self
            .attributes
            .iter()
            .map(String::as_str)
            .eq(attributes.iter().copied());
        if self.read_state.is_some() && same_attributes {
            // Buffer size reset mid-query.
            for (got, initial) in std::iter::zip(buffer_sizes, &self.initial_buffer_sizes) {
                if got < initial {
                    return Err(ReaderError::InvalidResetBufferSize {
                        got: *got,
                        initial: *initial,
                    });
                }
            }
        } else {
            self.attributes = attributes.iter().map(ToString::to_string).collect();
            self.attr_ids = attr_ids;
            self.initial_buffer_sizes = buffer_sizes.to_vec();
            self.read_state = None;
        }
        Ok(())
    }

    /// Return the array schema, if set.
    #[must_use]
    pub fn array_schema(&self) -> Option<&Arc<ArraySchema>> {
        self.schema.as_ref()
    }

    /// Return the cell layout of the query results.
    #[must_use]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Return the number of fragments involved in the query.
    #[must_use]
    pub fn fragment_num(&self) -> usize {
        self.fragments.len()
    }

    /// Return the fragment names, ordered oldest to newest.
    #[must_use]
    pub fn fragment_names(&self) -> Vec<&str> {
        self.fragments.iter().map(|f| f.name()).collect()
    }

    /// Return the name of the most recent fragment, if any.
    #[must_use]
    pub fn last_fragment_name(&self) -> Option<&str> {
        self.fragments.last().map(|f| f.name())
    }

    /// Return the registered attribute names.
    #[must_use]
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Return the query subarray, if set.
    #[must_use]
    pub fn subarray(&self) -> Option<&Subarray> {
        self.subarray.as_ref()
    }

    /// Return true if all subarray partitions have been processed.
    #[must_use]
    pub fn done(&self) -> bool {
        self.read_state.as_ref().is_some_and(ReadState::done)
    }

    /// Advance the read state to the next subarray partition.
    pub fn next_subarray_partition(&mut self) {
        if let Some(read_state) = &mut self.read_state {
            read_state.advance();
        }
    }

    /// Finalize the reader, releasing the read state.
    pub fn finalize(&mut self) {
        self.read_state = None;
    }
}

impl<TStorage: ?Sized> Default for Reader<TStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl<TStorage: ?Sized + ReadableStorageTraits> Reader<TStorage> {
    /// Initialize the reader: validate its configuration and compute the
    /// subarray partitions.
    ///
    /// If no subarray was set, the entire array domain is used.
    ///
    /// # Errors
    /// Returns a [`ReaderError`] if the schema, storage manager or buffers
    /// are missing, or partitioning fails with
    /// [`ReaderError::BufferTooSmall`].
    pub fn init(&mut self) -> Result<(), ReaderError> {
        if self.subarray.is_none() {
            self.set_subarray(None)?;
        }
        let schema = self.schema.as_ref().ok_or(ReaderError::MissingArraySchema)?;
        if self.storage.is_none() {
            return Err(ReaderError::MissingStorageManager);
        }
        if self.attributes.is_empty() {
            return Err(ReaderError::MissingBuffers);
        }
        let subarray = self
            .subarray
            .clone()
            .ok_or(ReaderError::Internal("subarray not set"))?;
        let entries = read_state::buffer_size_entries(
            schema,
            &self.attr_ids,
            &self.initial_buffer_sizes,
        );
        let partitions = with_coordinate!(
            schema.domain().datatype(),
            |T| {
                let sub = subarray.to_vec::<T>()?;
                read_state::compute_subarray_partitions::<T>(
                    schema,
                    &self.fragments,
                    &entries,
                    self.layout,
                    &sub,
                )
            },
            Err(ReaderError::Internal("non-numeric domain datatype"))
        )?;
        self.read_state = Some(ReadState::new(subarray, partitions));
        Ok(())
    }

    /// Execute the current subarray partition into `buffers`.
    ///
    /// On [`ReadStatus::Completed`] the partition cursor advances. On
    /// [`ReadStatus::Incomplete`] a buffer filled mid-partition and the
    /// partition is not advanced. `buffers.sizes()` reports the bytes
    /// written; partial writes before an error are left intact.
    ///
    /// # Errors
    /// Returns a [`ReaderError`] if the reader is not initialized, the
    /// buffers do not match the registered attributes, a buffer is smaller
    /// than its initial size, or the partition fails (wrapped in
    /// [`ReaderError::Partition`]).
    pub fn read(&mut self, buffers: &mut QueryBuffers<'_>) -> Result<ReadStatus, ReaderError> {
        let schema = self
            .schema
            .clone()
            .ok_or(ReaderError::MissingArraySchema)?;
        let storage = self
            .storage
            .clone()
            .ok_or(ReaderError::MissingStorageManager)?;
        self.validate_buffers(&schema, buffers)?;
        buffers.reset_sizes();
        let Some(read_state) = &self.read_state else {
            return Err(ReaderError::NotInitialized);
        };
        let Some(partition) = read_state.current() else {
            return Ok(ReadStatus::Completed);
        };
        let partition = partition.clone();
        let idx = read_state.idx();

        let ctx = ReadContext {
            schema: &schema,
            fragments: &self.fragments,
            storage: &*storage,
            layout: self.layout,
            attributes: &self.attr_ids,
        };
        let status = with_coordinate!(
            schema.domain().datatype(),
            |T| {
                match schema.array_type() {
                    ArrayType::Dense => dense::dense_read::<T, TStorage>(&ctx, &partition, buffers),
                    ArrayType::Sparse => {
                        sparse::sparse_read::<T, TStorage>(&ctx, &partition, buffers)
                    }
                }
            },
            Err(ReaderError::Internal("non-numeric domain datatype"))
        )
        .map_err(|source| ReaderError::Partition {
            idx,
            source: Box::new(source),
        })?;

        if status == ReadStatus::Completed {
            self.next_subarray_partition();
        }
        Ok(status)
    }

    /// Check `buffers` against the registered attributes and the initial
    /// buffer sizes (the reset rule).
    fn validate_buffers(
        &self,
        schema: &ArraySchema,
        buffers: &QueryBuffers<'_>,
    ) -> Result<(), ReaderError> {
        if buffers.len() != self.attr_ids.len() {
            return Err(ReaderError::InvalidBufferCount {
                got: buffers.len(),
                expected: self.attr_ids.len(),
            });
        }
        let mut size_idx = 0;
        for (i, id) in self.attr_ids.iter().enumerate() {
            let var = schema.attribute(*id).is_some_and(crate::schema::Attribute::is_var);
            let entry = &buffers.buffers[i];
            if var && entry.buffer_var.is_none() {
                return Err(ReaderError::MissingVarBuffer(self.attributes[i].clone()));
            }
            if !var && entry.buffer_var.is_some() {
                return Err(ReaderError::UnexpectedVarBuffer(self.attributes[i].clone()));
            }
            let initial = self.initial_buffer_sizes[size_idx];
            if (entry.buffer.len() as u64) < initial {
                return Err(ReaderError::InvalidResetBufferSize {
                    got: entry.buffer.len() as u64,
                    initial,
                });
            }
            size_idx += 1;
            if let Some(buffer_var) = &entry.buffer_var {
                let initial = self.initial_buffer_sizes[size_idx];
                if (buffer_var.len() as u64) < initial {
                    return Err(ReaderError::InvalidResetBufferSize {
                        got: buffer_var.len() as u64,
                        initial,
                    });
                }
                size_idx += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datatype::Datatype,
        fill_value::FillValue,
        schema::{Attribute, Domain},
        storage::store::MemoryStore,
    };

    fn schema() -> Arc<ArraySchema> {
        Arc::new(
            ArraySchema::new(
                ArrayType::Dense,
                Domain::new::<i32>(&[1, 10], &[5]).unwrap(),
                Layout::RowMajor,
                Layout::RowMajor,
                vec![Attribute::new("a", Datatype::Int32, FillValue::from(-1i32)).unwrap()],
            )
            .unwrap(),
        )
    }

    #[test]
    fn reader_configuration_errors() {
        let mut reader = Reader::<MemoryStore>::new();
        assert!(matches!(
            reader.set_subarray(None),
            Err(ReaderError::MissingArraySchema)
        ));
        assert!(matches!(
            reader.set_buffers(&["a"], &[4]),
            Err(ReaderError::MissingArraySchema)
        ));

        reader.set_array_schema(schema());
        assert!(matches!(
            reader.set_buffers(&["b"], &[4]),
            Err(ReaderError::UnknownAttribute(_))
        ));
        assert!(matches!(
            reader.set_buffers(&["a", "a"], &[4, 4]),
            Err(ReaderError::DuplicateAttribute(_))
        ));
        assert!(matches!(
            reader.set_buffers(&["a"], &[4, 4]),
            Err(ReaderError::InvalidBufferCount { got: 2, expected: 1 })
        ));
        reader.set_buffers(&["a"], &[40]).unwrap();

        // Missing storage manager.
        assert!(matches!(reader.init(), Err(ReaderError::MissingStorageManager)));
        reader.set_storage_manager(Arc::new(MemoryStore::new()));
        reader.init().unwrap();
        assert!(!reader.done());
    }

    #[test]
    fn reader_subarray_validation() {
        let mut reader = Reader::<MemoryStore>::new();
        reader.set_array_schema(schema());
        assert!(matches!(
            reader.set_subarray(Some(&Subarray::new::<i32>(&[0, 5]).unwrap())),
            Err(ReaderError::SubarrayOutOfDomain)
        ));
        assert!(matches!(
            reader.set_subarray(Some(&Subarray::new::<i64>(&[1, 5]).unwrap())),
            Err(ReaderError::DatatypeMismatch(_))
        ));
        assert!(matches!(
            reader.set_subarray(Some(&Subarray::new::<i32>(&[1, 5, 1, 5]).unwrap())),
            Err(ReaderError::IncompatibleSubarrayDimensionality(2, 1))
        ));
        reader
            .set_subarray(Some(&Subarray::new::<i32>(&[3, 7]).unwrap()))
            .unwrap();
        assert_eq!(reader.subarray().unwrap().to_vec::<i32>().unwrap(), [3, 7]);

        // A full-domain subarray.
        reader.set_subarray(None).unwrap();
        assert_eq!(reader.subarray().unwrap().to_vec::<i32>().unwrap(), [1, 10]);
    }

    #[test]
    fn reader_accessors() {
        let mut reader = Reader::<MemoryStore>::new();
        assert!(reader.array_schema().is_none());
        assert_eq!(reader.layout(), Layout::RowMajor);
        assert_eq!(reader.fragment_num(), 0);
        assert!(reader.last_fragment_name().is_none());
        assert!(!reader.done());

        reader.set_array_schema(schema());
        reader.set_layout(Layout::GlobalOrder);
        reader.set_buffers(&["a"], &[40]).unwrap();
        assert_eq!(reader.layout(), Layout::GlobalOrder);
        assert_eq!(reader.attributes(), &["a".to_string()]);

        let frag0 = Arc::new(
            crate::fragment::FragmentMetadata::new_dense::<i32>("frag0", &schema(), &[1, 5])
                .unwrap(),
        );
        let frag1 = Arc::new(
            crate::fragment::FragmentMetadata::new_dense::<i32>("frag1", &schema(), &[6, 10])
                .unwrap(),
        );
        reader.set_fragment_metadata(vec![frag0, frag1]);
        assert_eq!(reader.fragment_num(), 2);
        assert_eq!(reader.fragment_names(), vec!["frag0", "frag1"]);
        assert_eq!(reader.last_fragment_name(), Some("frag1"));

        // finalize releases the read state.
        reader.set_storage_manager(Arc::new(MemoryStore::new()));
        reader.init().unwrap();
        reader.finalize();
        let mut buffer = vec![0u8; 40];
        let mut buffers = QueryBuffers::new(vec![AttributeBufferMut::new(&mut buffer)]);
        assert!(matches!(
            reader.read(&mut buffers),
            Err(ReaderError::NotInitialized)
        ));
    }

    #[test]
    fn reader_buffer_reset_rule() {
        let mut reader = Reader::<MemoryStore>::new();
        reader.set_array_schema(schema());
        reader.set_storage_manager(Arc::new(MemoryStore::new()));
        reader.set_buffers(&["a"], &[40]).unwrap();
        reader.init().unwrap();

        // Larger sizes are accepted mid-query, smaller are not.
        reader.set_buffers(&["a"], &[48]).unwrap();
        assert!(matches!(
            reader.set_buffers(&["a"], &[20]),
            Err(ReaderError::InvalidResetBufferSize { got: 20, initial: 40 })
        ));

        // A too-small buffer passed to read is also rejected.
        let mut small = vec![0u8; 20];
        let mut buffers = QueryBuffers::new(vec![AttributeBufferMut::new(&mut small)]);
        assert!(matches!(
            reader.read(&mut buffers),
            Err(ReaderError::InvalidResetBufferSize { got: 20, initial: 40 })
        ));
    }
}
