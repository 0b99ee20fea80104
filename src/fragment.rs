//! Fragment metadata.
//!
//! A fragment is an immutable, time-ordered write unit of an array. Its
//! metadata records where each attribute tile lives on storage, the minimum
//! bounding rectangle (MBR) of each sparse tile, and the region a dense
//! fragment covers. The reader consumes a list of fragments ordered oldest
//! to newest; among cells at the same coordinate, the fragment with the
//! larger index wins.

use thiserror::Error;

use crate::{
    datatype::{
        convert_from_bytes_slice, convert_to_bytes_vec, Coordinate, Datatype,
        DatatypeMismatchError,
    },
    schema::{
        domain::{rect_overlap, tile_coords_of},
        ArraySchema, AttributeId,
    },
    storage::StoreKey,
};

/// The byte extent of one tile within its attribute file.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct TileLocation {
    /// The byte offset of the tile.
    pub offset: u64,
    /// The size of the tile in bytes.
    pub size: u64,
}

#[derive(Clone, Debug, Default)]
struct FragmentAttributeTiles {
    tiles: Vec<TileLocation>,
    var_tiles: Vec<TileLocation>,
}

/// The metadata of one fragment.
#[derive(Clone, Debug)]
pub struct FragmentMetadata {
    name: String,
    dense: bool,
    datatype: Datatype,
    dim_num: usize,
    domain: Vec<u8>,
    tile_num: u64,
    mbrs: Vec<u8>,
    tile_cell_num: Vec<u64>,
    attr_tiles: Vec<FragmentAttributeTiles>,
}

/// A fragment metadata creation error.
#[derive(Clone, Debug, Error)]
pub enum FragmentCreateError {
    /// An invalid fragment name.
    #[error("invalid fragment name {_0}")]
    InvalidName(String),
    /// A datatype mismatch against the array schema.
    #[error(transparent)]
    DatatypeMismatch(#[from] DatatypeMismatchError),
    /// A dense fragment for a sparse array or vice versa.
    #[error("fragment kind does not match the array type")]
    IncompatibleKind,
    /// A fragment domain outside the array domain.
    #[error("fragment domain is not contained in the array domain")]
    OutOfDomain,
    /// An MBR list whose length does not match the tile count.
    #[error("MBR list of {_0} values does not match {_1} tiles")]
    IncompatibleMbrLength(usize, usize),
    /// A tile table whose length does not match the tile count.
    #[error("tile table of {_0} entries does not match {_1} tiles")]
    IncompatibleTileCount(usize, u64),
    /// An attribute identifier outside the schema.
    #[error("attribute identifier is out of range")]
    UnknownAttribute,
}

impl FragmentMetadata {
    /// Create the metadata of a dense fragment covering `domain` (inclusive
    /// `[lo, hi]` bounds per dimension, the region the fragment wrote).
    ///
    /// The fragment stores one physical tile per global tile of the array
    /// tiling its domain touches, in the schema tile order; each physical
    /// tile holds the full tile capacity, with cells outside the fragment
    /// domain padded (they are never addressed by a read).
    ///
    /// # Errors
    /// Returns a [`FragmentCreateError`] if the array is not dense, `T` does
    /// not match the schema domain datatype, or `domain` is not contained in
    /// the array domain.
    pub fn new_dense<T: Coordinate>(
        name: impl Into<String>,
        schema: &ArraySchema,
        domain: &[T],
    ) -> Result<Self, FragmentCreateError> {
        let name = Self::validate_name(name)?;
        if !schema.dense() {
            return Err(FragmentCreateError::IncompatibleKind);
        }
        let bounds = schema.domain().bounds::<T>()?;
        let extents = schema.domain().tile_extents::<T>()?;
        if domain.len() != bounds.len() {
            return Err(FragmentCreateError::OutOfDomain);
        }
        let (overlap, contained) = rect_overlap(&bounds, domain);
        if !(overlap && contained) {
            return Err(FragmentCreateError::OutOfDomain);
        }
        let tile_lo = tile_coords_of(
            &domain.chunks_exact(2).map(|b| b[0]).collect::<Vec<_>>(),
            &bounds,
            &extents,
        );
        let tile_hi = tile_coords_of(
            &domain.chunks_exact(2).map(|b| b[1]).collect::<Vec<_>>(),
            &bounds,
            &extents,
        );
        let tile_num = std::iter::zip(&tile_hi, &tile_lo)
            .map(|(hi, lo)| hi - lo + 1)
            .product();
        let attr_slots = schema.attribute_num() + 1;
        Ok(Self {
            name,
            dense: true,
            datatype: T::DATATYPE,
            dim_num: schema.dim_num(),
            domain: convert_to_bytes_vec(domain),
            tile_num,
            mbrs: Vec::new(),
            tile_cell_num: Vec::new(),
            attr_tiles: vec![FragmentAttributeTiles::default(); attr_slots],
        })
    }

    /// Create the metadata of a sparse fragment.
    ///
    /// `mbrs` is the flattened per-tile minimum bounding rectangle list
    /// (`[lo, hi]` per dimension per tile) and `tile_cell_num` the number of
    /// cells stored in each tile.
    ///
    /// # Errors
    /// Returns a [`FragmentCreateError`] if `T` does not match the schema
    /// domain datatype or the MBR list does not match the tile count.
    pub fn new_sparse<T: Coordinate>(
        name: impl Into<String>,
        schema: &ArraySchema,
        mbrs: &[T],
        tile_cell_num: Vec<u64>,
    ) -> Result<Self, FragmentCreateError> {
        let name = Self::validate_name(name)?;
        if T::DATATYPE != schema.domain().datatype() {
            return Err(FragmentCreateError::DatatypeMismatch(
                DatatypeMismatchError {
                    got: T::DATATYPE,
                    expected: schema.domain().datatype(),
                },
            ));
        }
        let tile_num = tile_cell_num.len();
        if mbrs.len() != tile_num * 2 * schema.dim_num() {
            return Err(FragmentCreateError::IncompatibleMbrLength(
                mbrs.len(),
                tile_num,
            ));
        }
        let attr_slots = schema.attribute_num() + 1;
        Ok(Self {
            name,
            dense: false,
            datatype: T::DATATYPE,
            dim_num: schema.dim_num(),
            domain: Vec::new(),
            tile_num: tile_num as u64,
            mbrs: convert_to_bytes_vec(mbrs),
            tile_cell_num,
            attr_tiles: vec![FragmentAttributeTiles::default(); attr_slots],
        })
    }

    fn validate_name(name: impl Into<String>) -> Result<String, FragmentCreateError> {
        let name = name.into();
        if StoreKey::validate(&name) && !name.contains('/') {
            Ok(name)
        } else {
            Err(FragmentCreateError::InvalidName(name))
        }
    }

    /// Set the tile byte locations of an attribute (the offsets tiles for a
    /// variable-sized attribute, or the coordinate tiles for
    /// [`AttributeId::COORDS`]).
    ///
    /// # Errors
    /// Returns a [`FragmentCreateError`] if the attribute slot is out of
    /// range or the table length does not match the tile count.
    pub fn set_attribute_tiles(
        &mut self,
        attr: AttributeId,
        tiles: Vec<TileLocation>,
    ) -> Result<(), FragmentCreateError> {
        if tiles.len() as u64 != self.tile_num {
            return Err(FragmentCreateError::IncompatibleTileCount(
                tiles.len(),
                self.tile_num,
            ));
        }
        let slot = attr.slot(self.attr_tiles.len() - 1);
        self.attr_tiles
            .get_mut(slot)
            .ok_or(FragmentCreateError::UnknownAttribute)?
            .tiles = tiles;
        Ok(())
    }

    /// Set the values-tile byte locations of a variable-sized attribute.
    ///
    /// # Errors
    /// Returns a [`FragmentCreateError`] if the attribute slot is out of
    /// range or the table length does not match the tile count.
    pub fn set_attribute_var_tiles(
        &mut self,
        attr: AttributeId,
        tiles: Vec<TileLocation>,
    ) -> Result<(), FragmentCreateError> {
        if tiles.len() as u64 != self.tile_num {
            return Err(FragmentCreateError::IncompatibleTileCount(
                tiles.len(),
                self.tile_num,
            ));
        }
        let slot = attr.slot(self.attr_tiles.len() - 1);
        self.attr_tiles
            .get_mut(slot)
            .ok_or(FragmentCreateError::UnknownAttribute)?
            .var_tiles = tiles;
        Ok(())
    }

    /// Return the fragment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return true if the fragment is dense.
    #[must_use]
    pub fn dense(&self) -> bool {
        self.dense
    }

    /// Return the domain datatype.
    #[must_use]
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// Return the number of dimensions.
    #[must_use]
    pub fn dim_num(&self) -> usize {
        self.dim_num
    }

    /// Return the number of tiles.
    #[must_use]
    pub fn tile_num(&self) -> u64 {
        self.tile_num
    }

    /// Return the inclusive bounds of the region a dense fragment covers.
    ///
    /// # Errors
    /// Returns a [`DatatypeMismatchError`] if `T` does not match the
    /// fragment datatype.
    pub fn domain_bounds<T: Coordinate>(&self) -> Result<Vec<T>, DatatypeMismatchError> {
        self.check_datatype::<T>()?;
        Ok(convert_from_bytes_slice(&self.domain))
    }

    /// Return the MBR of the sparse tile at `tile_idx`.
    ///
    /// # Errors
    /// Returns a [`DatatypeMismatchError`] if `T` does not match the
    /// fragment datatype.
    ///
    /// # Panics
    /// Panics if `tile_idx` is out of range or the fragment is dense.
    pub fn mbr<T: Coordinate>(&self, tile_idx: u64) -> Result<Vec<T>, DatatypeMismatchError> {
        self.check_datatype::<T>()?;
        let values_per_mbr = 2 * self.dim_num;
        let start = usize::try_from(tile_idx).unwrap() * values_per_mbr * self.datatype.size() as usize;
        let end = start + values_per_mbr * self.datatype.size() as usize;
        Ok(convert_from_bytes_slice(&self.mbrs[start..end]))
    }

    /// Return the number of cells stored in the tile at `tile_idx`.
    ///
    /// # Panics
    /// Panics if `tile_idx` is out of range for a sparse fragment.
    #[must_use]
    pub fn cell_num(&self, tile_idx: u64) -> u64 {
        if self.dense {
            0
        } else {
            self.tile_cell_num[usize::try_from(tile_idx).unwrap()]
        }
    }

    /// Return the byte location of an attribute tile, or [`None`] if the
    /// table was not set.
    #[must_use]
    pub fn tile_location(&self, attr: AttributeId, tile_idx: u64) -> Option<TileLocation> {
        let slot = attr.slot(self.attr_tiles.len() - 1);
        self.attr_tiles
            .get(slot)?
            .tiles
            .get(usize::try_from(tile_idx).ok()?)
            .copied()
    }

    /// Return the byte location of a variable-sized attribute values tile,
    /// or [`None`] if the table was not set.
    #[must_use]
    pub fn var_tile_location(&self, attr: AttributeId, tile_idx: u64) -> Option<TileLocation> {
        let slot = attr.slot(self.attr_tiles.len() - 1);
        self.attr_tiles
            .get(slot)?
            .var_tiles
            .get(usize::try_from(tile_idx).ok()?)
            .copied()
    }

    /// Return the storage key of an attribute file.
    #[must_use]
    pub fn attribute_key(&self, attr: AttributeId) -> StoreKey {
        let key = match attr.index() {
            Some(i) => format!("{}/a{i}", self.name),
            None => format!("{}/coords", self.name),
        };
        unsafe { StoreKey::new_unchecked(key) }
    }

    /// Return the storage key of a variable-sized attribute values file.
    ///
    /// # Panics
    /// Panics if `attr` is the coordinates pseudo-attribute.
    #[must_use]
    pub fn attribute_var_key(&self, attr: AttributeId) -> StoreKey {
        let i = attr.index().expect("coordinates are not variable-sized");
        unsafe { StoreKey::new_unchecked(format!("{}/a{i}_var", self.name)) }
    }

    fn check_datatype<T: Coordinate>(&self) -> Result<(), DatatypeMismatchError> {
        if T::DATATYPE == self.datatype {
            Ok(())
        } else {
            Err(DatatypeMismatchError {
                got: T::DATATYPE,
                expected: self.datatype,
            })
        }
    }
}
