//! Overlapping tiles, coordinates and cell ranges.
//!
//! The overlap planner enumerates, per fragment, the tiles intersecting the
//! query subarray. Overlapping tiles are kept in an arena
//! ([`OverlappingTileVec`]); [`OverlappingCoords`] and
//! [`OverlappingCellRange`] refer to tiles by arena index, so their
//! lifetimes are tied to the arena of the read call that produced them.

use std::sync::Arc;

use crate::{
    datatype::{Coordinate, Datatype},
    fragment::FragmentMetadata,
    schema::{domain::rect_overlap, ArraySchema, AttributeId},
    storage::{ByteRange, ReadableStorageTraits, StorageError, StoreKeyRange},
    tile::{AttributeTiles, Tile},
};

use super::ReaderError;

/// Information about a tile overlapping the query subarray (across all
/// attributes).
#[derive(Debug)]
pub(crate) struct OverlappingTile {
    /// The index of the fragment the tile belongs to.
    pub fragment_idx: usize,
    /// The tile index in the fragment.
    pub tile_idx: u64,
    /// True if the tile is entirely contained in the subarray.
    pub full_overlap: bool,
    /// Attribute tiles by attribute slot; the coordinates pseudo-attribute
    /// occupies the last slot.
    attr_tiles: Vec<Option<AttributeTiles>>,
}

impl OverlappingTile {
    pub fn new(fragment_idx: usize, tile_idx: u64, attr_slots: usize, full_overlap: bool) -> Self {
        Self {
            fragment_idx,
            tile_idx,
            full_overlap,
            attr_tiles: (0..attr_slots).map(|_| None).collect(),
        }
    }

    /// The tiles of an attribute, or [`None`] if they have not been read.
    pub fn attr_tiles(&self, attr: AttributeId) -> Option<&AttributeTiles> {
        self.attr_tiles[attr.slot(self.attr_tiles.len() - 1)].as_ref()
    }

    fn slot_mut(&mut self, attr: AttributeId) -> &mut Option<AttributeTiles> {
        let slot = attr.slot(self.attr_tiles.len() - 1);
        &mut self.attr_tiles[slot]
    }

    #[cfg(test)]
    pub(crate) fn set_attr_tiles_for_test(&mut self, attr: AttributeId, tiles: AttributeTiles) {
        *self.slot_mut(attr) = Some(tiles);
    }
}

/// The tile arena of one read call.
pub(crate) type OverlappingTileVec = Vec<OverlappingTile>;

/// A cell range belonging to a particular overlapping tile.
///
/// `tile` is an arena index; [`None`] marks an "empty" cell range to be
/// filled with the attribute fill value. `start` and `end` are inclusive
/// cell positions in the source tile.
#[derive(Clone, Eq, PartialEq, Debug)]
pub(crate) struct OverlappingCellRange {
    pub tile: Option<usize>,
    pub start: u64,
    pub end: u64,
}

/// A list of cell ranges.
pub(crate) type OverlappingCellRangeList = Vec<OverlappingCellRange>;

/// The coordinates of one cell of a sparse overlapping tile.
#[derive(Clone, Debug)]
pub(crate) struct OverlappingCoords<T: Coordinate> {
    /// The arena index of the overlapping tile the coordinates belong to.
    pub tile: usize,
    /// The index of the fragment the coordinates belong to.
    pub fragment_idx: usize,
    /// The coordinates.
    pub coords: Vec<T>,
    /// The tile coordinates of the cell in the array tiling (computed only
    /// for global order sorting).
    pub tile_coords: Option<Vec<u64>>,
    /// The position of the coordinates in their tile.
    pub pos: u64,
    /// False if the coordinates lost deduplication and must be skipped.
    pub valid: bool,
}

impl<T: Coordinate> OverlappingCoords<T> {
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn valid(&self) -> bool {
        self.valid
    }
}

/// Enumerate the sparse tiles overlapping `subarray`, fragment order
/// outermost, fragment-internal tile order innermost.
///
/// Dense fragments are skipped; dense reads cover them with per-fragment
/// cell range iterators instead.
pub(crate) fn compute_overlapping_tiles<T: Coordinate>(
    subarray: &[T],
    fragments: &[Arc<FragmentMetadata>],
    attr_slots: usize,
) -> Result<OverlappingTileVec, ReaderError> {
    let mut tiles = Vec::new();
    for (fragment_idx, fragment) in fragments.iter().enumerate() {
        if fragment.dense() {
            continue;
        }
        for tile_idx in 0..fragment.tile_num() {
            let mbr = fragment.mbr::<T>(tile_idx)?;
            let (overlap, full_overlap) = rect_overlap(subarray, &mbr);
            if overlap {
                tiles.push(OverlappingTile::new(
                    fragment_idx,
                    tile_idx,
                    attr_slots,
                    full_overlap,
                ));
            }
        }
    }
    Ok(tiles)
}

/// Read the tiles of `attributes` for every overlapping tile that does not
/// have them yet, batched into a single storage manager request.
pub(crate) fn read_tiles<TStorage: ?Sized + ReadableStorageTraits>(
    storage: &TStorage,
    schema: &ArraySchema,
    fragments: &[Arc<FragmentMetadata>],
    tiles: &mut OverlappingTileVec,
    attributes: &[AttributeId],
) -> Result<(), ReaderError> {
    // (arena index, attribute, is the values tile of a var attribute)
    let mut targets: Vec<(usize, AttributeId, bool)> = Vec::new();
    let mut requests: Vec<StoreKeyRange> = Vec::new();
    for (i, tile) in tiles.iter().enumerate() {
        let fragment = &fragments[tile.fragment_idx];
        for attr in attributes {
            if tile.attr_tiles(*attr).is_some() {
                continue;
            }
            let location = fragment
                .tile_location(*attr, tile.tile_idx)
                .ok_or(ReaderError::Internal("missing tile location"))?;
            requests.push(StoreKeyRange::new(
                fragment.attribute_key(*attr),
                ByteRange::new(location.offset, Some(location.size)),
            ));
            targets.push((i, *attr, false));
            if schema
                .attribute(*attr)
                .is_some_and(crate::schema::Attribute::is_var)
            {
                let location = fragment
                    .var_tile_location(*attr, tile.tile_idx)
                    .ok_or(ReaderError::Internal("missing values tile location"))?;
                requests.push(StoreKeyRange::new(
                    fragment.attribute_var_key(*attr),
                    ByteRange::new(location.offset, Some(location.size)),
                ));
                targets.push((i, *attr, true));
            }
        }
    }
    if requests.is_empty() {
        return Ok(());
    }

    let values = storage.get_partial_values(&requests)?;
    for (((i, attr, var), request), bytes) in
        std::iter::zip(std::iter::zip(targets, requests), values)
    {
        let bytes = bytes.ok_or_else(|| StorageError::KeyNotFound(request.key.clone()))?;
        let (datatype, cell_size) = tile_layout(schema, attr, var);
        let tile = Tile::new(datatype, cell_size, bytes)?;
        let slot = tiles[i].slot_mut(attr);
        if var {
            slot.as_mut()
                .ok_or(ReaderError::Internal("values tile read before offsets"))?
                .tile_var = Some(tile);
        } else {
            *slot = Some(AttributeTiles {
                tile,
                tile_var: None,
            });
        }
    }
    Ok(())
}

/// The datatype and cell size of a tile of `attr`.
fn tile_layout(schema: &ArraySchema, attr: AttributeId, var: bool) -> (Datatype, u64) {
    match schema.attribute(attr) {
        // The coordinates pseudo-attribute.
        None => (schema.domain().datatype(), schema.coords_size()),
        Some(attribute) => {
            if var {
                // The values tile of a var attribute.
                (attribute.datatype(), attribute.datatype().size())
            } else {
                match attribute.cell_size() {
                    Some(cell_size) => (attribute.datatype(), cell_size),
                    // The offsets tile of a var attribute.
                    None => (Datatype::UInt64, 8),
                }
            }
        }
    }
}
