//! In-memory tiles.
//!
//! A [`Tile`] is a typed block of cells read from storage. The storage
//! manager hands the reader decompressed tile bytes; no codec logic lives
//! here. Variable-sized attributes use a pair of tiles
//! ([`AttributeTiles`]): an offsets tile of absolute `u64` byte offsets and
//! a values tile holding the concatenated cell values.

use thiserror::Error;

use crate::datatype::{convert_from_bytes_slice, Coordinate, Datatype, DatatypeMismatchError};

/// A typed block of cells in memory.
#[derive(Clone, Debug)]
pub struct Tile {
    datatype: Datatype,
    cell_size: u64,
    buffer: Vec<u8>,
}

/// A tile creation error.
#[derive(Clone, Debug, Error)]
pub enum TileCreateError {
    /// A cell size of zero.
    #[error("tile cell size must be non-zero")]
    ZeroCellSize,
    /// A buffer size that is not a multiple of the cell size.
    #[error("tile buffer of {size} bytes is not a multiple of the cell size {cell_size}")]
    IncompatibleBufferSize {
        /// The buffer size in bytes.
        size: usize,
        /// The cell size in bytes.
        cell_size: u64,
    },
}

impl Tile {
    /// Create a new tile over `buffer`.
    ///
    /// # Errors
    /// Returns a [`TileCreateError`] if `cell_size` is zero or does not
    /// divide the buffer size.
    pub fn new(
        datatype: Datatype,
        cell_size: u64,
        buffer: Vec<u8>,
    ) -> Result<Self, TileCreateError> {
        if cell_size == 0 {
            return Err(TileCreateError::ZeroCellSize);
        }
        if buffer.len() as u64 % cell_size != 0 {
            return Err(TileCreateError::IncompatibleBufferSize {
                size: buffer.len(),
                cell_size,
            });
        }
        Ok(Self {
            datatype,
            cell_size,
            buffer,
        })
    }

    /// Return the tile datatype.
    #[must_use]
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// Return the cell size in bytes.
    #[must_use]
    pub fn cell_size(&self) -> u64 {
        self.cell_size
    }

    /// Return the number of cells in the tile.
    #[must_use]
    pub fn cell_num(&self) -> u64 {
        self.buffer.len() as u64 / self.cell_size
    }

    /// Return the size of the tile in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.buffer.len() as u64
    }

    /// Return the tile bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Return the bytes of the cell at `pos`.
    ///
    /// # Panics
    /// Panics if `pos` is out of range.
    #[must_use]
    pub fn cell_bytes(&self, pos: u64) -> &[u8] {
        let cell_size = usize::try_from(self.cell_size).unwrap();
        let start = usize::try_from(pos * self.cell_size).unwrap();
        &self.buffer[start..start + cell_size]
    }

    /// Return the tile values as a vector of `T`.
    ///
    /// # Errors
    /// Returns a [`DatatypeMismatchError`] if `T` does not match the tile
    /// datatype.
    pub fn typed<T: Coordinate>(&self) -> Result<Vec<T>, DatatypeMismatchError> {
        if T::DATATYPE == self.datatype {
            Ok(convert_from_bytes_slice(&self.buffer))
        } else {
            Err(DatatypeMismatchError {
                got: T::DATATYPE,
                expected: self.datatype,
            })
        }
    }

    /// Return the tile values as a vector of `u64` offsets.
    ///
    /// Intended for the offsets tile of a variable-sized attribute.
    ///
    /// # Errors
    /// Returns a [`DatatypeMismatchError`] if the tile datatype is not
    /// [`Datatype::UInt64`].
    pub fn offsets(&self) -> Result<Vec<u64>, DatatypeMismatchError> {
        self.typed::<u64>()
    }
}

/// The tile(s) holding one attribute of one overlapping tile.
///
/// For fixed-sized attributes (and the coordinates pseudo-attribute),
/// `tile` holds the cell values and `tile_var` is [`None`]. For
/// variable-sized attributes, `tile` is the offsets tile and `tile_var` the
/// values tile.
#[derive(Clone, Debug)]
pub struct AttributeTiles {
    /// The value tile, or the offsets tile of a variable-sized attribute.
    pub tile: Tile,
    /// The values tile of a variable-sized attribute.
    pub tile_var: Option<Tile>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::transmute_to_bytes;

    #[test]
    fn tile_create() {
        let values: Vec<i32> = vec![10, 11, 12];
        let tile = Tile::new(Datatype::Int32, 4, transmute_to_bytes(&values).to_vec()).unwrap();
        assert_eq!(tile.datatype(), Datatype::Int32);
        assert_eq!(tile.cell_size(), 4);
        assert_eq!(tile.cell_num(), 3);
        assert_eq!(tile.size(), 12);
        assert_eq!(tile.cell_bytes(1), 11i32.to_ne_bytes());
        assert_eq!(tile.typed::<i32>().unwrap(), values);
        assert!(tile.typed::<i64>().is_err());

        assert!(matches!(
            Tile::new(Datatype::Int32, 0, vec![]),
            Err(TileCreateError::ZeroCellSize)
        ));
        assert!(matches!(
            Tile::new(Datatype::Int32, 4, vec![0; 5]),
            Err(TileCreateError::IncompatibleBufferSize { size: 5, cell_size: 4 })
        ));
    }

    #[test]
    fn tile_offsets() {
        let offsets: Vec<u64> = vec![0, 8, 16];
        let tile = Tile::new(Datatype::UInt64, 8, transmute_to_bytes(&offsets).to_vec()).unwrap();
        assert_eq!(tile.offsets().unwrap(), offsets);
    }
}
