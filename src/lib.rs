//! A Rust library implementing the read path of a fragment-based storage
//! engine for multidimensional arrays.
//!
//! A logical array is a dense or sparse N-dimensional grid of cells carrying
//! values for one or more named attributes. On disk the array is partitioned
//! into immutable, time-ordered *fragments*; each fragment stores cells in
//! fixed-size *tiles* per attribute. A read query names a *subarray* (a
//! hyper-rectangle in the index domain), a cell [`Layout`](schema::Layout)
//! for the output, and a set of user buffers, and receives the merged,
//! deduplicated, ordered cell values for the subarray across all fragments.
//!
//! The best place to start is [`reader::Reader`].
//!
//! ## Highlights
//! - Subarray partitioning with incomplete-query semantics: results are
//!   produced under caller-chosen memory bounds over successive
//!   [`read`](reader::Reader::read) calls.
//! - Strict fragment precedence: among cells at the same coordinate, the cell
//!   from the most recent fragment wins; unwritten dense cells are filled
//!   with per-attribute fill values.
//! - Row-major, column-major and global-order result layouts for both dense
//!   and sparse arrays.
//! - Storage-agnostic tile I/O behind [`storage::ReadableStorageTraits`],
//!   with an in-memory store and a usage-log adapter included.
//!
//! ## Out of scope
//! The write path, tile compression (the storage manager hands the reader
//! decompressed tile bytes), predicate pushdown, and caching of tile bytes
//! across queries.

#![warn(unused_variables)]
#![warn(dead_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod datatype;
pub mod fill_value;
pub mod fragment;
pub mod reader;
pub mod schema;
pub mod storage;
pub mod subarray;
pub mod tile;

/// Re-export [`bytemuck`].
pub use bytemuck;
