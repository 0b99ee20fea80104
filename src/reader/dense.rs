//! Dense reads.
//!
//! A dense read traverses the partition subarray in the requested layout as
//! *cell slabs*: maximal runs of cells that stay inside one global tile and
//! are contiguous in the tile's cell order. Per slab, the covered
//! sub-intervals of each dense fragment are merged with newest-fragment
//! precedence into fragment-attributed [`DenseCellRange`]s; coordinates
//! from sparse fragments newer than the attributed fragment replace single
//! cells. The resulting cell ranges drive the copy engine, with unwritten
//! cells filled from the attribute fill values.

use std::collections::HashMap;
use std::sync::Arc;

use itertools::izip;

use crate::{
    datatype::{transmute_to_bytes, Coordinate},
    fragment::FragmentMetadata,
    schema::{
        domain::{
            cell_pos_in_tile, ravel_indices, rect_intersection, slab_coords, tile_bounds,
            tile_coords_of, tile_extent_cells,
        },
        AttributeId, Layout,
    },
    storage::ReadableStorageTraits,
    subarray::Subarray,
};

use super::{
    copy::{copy_fixed_cells, copy_var_cells},
    overlap::{
        compute_overlapping_tiles, read_tiles, OverlappingCellRange, OverlappingCellRangeList,
        OverlappingCoords, OverlappingTile, OverlappingTileVec,
    },
    sparse::{compute_overlapping_coords, compute_tile_coordinates, dedup_coords, sort_coords},
    QueryBuffers, ReadContext, ReadStatus, ReaderError,
};

/// A maximal run of cells within one global tile, contiguous in the tile's
/// cell order, produced by traversing a subarray in the requested layout.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CellSlab<T: Coordinate> {
    /// The tile coordinates of the global tile the slab lies in.
    pub tile_coords: Vec<u64>,
    /// The position of the first slab cell in the tile's cell order.
    pub start_pos: u64,
    /// The number of cells in the slab.
    pub num: u64,
    /// The coordinates of the first slab cell.
    pub start_coords: Vec<T>,
    /// The dimension the slab runs along.
    pub advance_dim: usize,
}

/// Iterates the cell slabs of a region in row-major or col-major order.
///
/// Slabs run along the fastest-varying dimension of the traversal order and
/// break at tile boundaries. When the traversal order is orthogonal to the
/// tile cell order (and the region is multidimensional), slabs degenerate
/// to single cells, which keeps tile-local positions contiguous.
struct RegionSlabIter<T: Coordinate> {
    region: Vec<T>,
    bounds: Vec<T>,
    extents: Vec<T>,
    tile_shape: Vec<u64>,
    cell_order: Layout,
    traversal: Layout,
    advance_dim: usize,
    contig: bool,
    cursor: Option<Vec<T>>,
}

impl<T: Coordinate> RegionSlabIter<T> {
    fn new(
        region: Vec<T>,
        bounds: Vec<T>,
        extents: Vec<T>,
        tile_shape: Vec<u64>,
        traversal: Layout,
        cell_order: Layout,
    ) -> Self {
        debug_assert_ne!(traversal, Layout::GlobalOrder);
        let dim_num = extents.len();
        let advance_dim = if traversal == Layout::ColMajor {
            0
        } else {
            dim_num - 1
        };
        let contig = dim_num == 1 || traversal == cell_order;
        let cursor = Some(region.chunks_exact(2).map(|b| b[0]).collect());
        Self {
            region,
            bounds,
            extents,
            tile_shape,
            cell_order,
            traversal,
            advance_dim,
            contig,
            cursor,
        }
    }
}

impl<T: Coordinate> Iterator for RegionSlabIter<T> {
    type Item = CellSlab<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.cursor.take()?;
        let ad = self.advance_dim;
        let tile_coords = tile_coords_of(&cur, &self.bounds, &self.extents);
        let tile_lo: Vec<T> = izip!(&tile_coords, self.bounds.chunks_exact(2), &self.tile_shape)
            .map(|(t, b, cells)| b[0].add_offset(t * cells))
            .collect();
        let tile_hi_ad = tile_lo[ad].add_offset(self.tile_shape[ad] - 1);
        let region_hi_ad = self.region[2 * ad + 1];
        let end = if tile_hi_ad < region_hi_ad {
            tile_hi_ad
        } else {
            region_hi_ad
        };
        let num = if self.contig {
            end.offset_from(cur[ad]) + 1
        } else {
            1
        };
        let start_pos = cell_pos_in_tile(&cur, &tile_lo, &self.tile_shape, self.cell_order);
        let slab = CellSlab {
            tile_coords,
            start_pos,
            num,
            start_coords: cur.clone(),
            advance_dim: ad,
        };

        // Advance the cursor past the slab in traversal order.
        let dim_num = self.extents.len();
        let order: Vec<usize> = if self.traversal == Layout::ColMajor {
            (0..dim_num).collect()
        } else {
            (0..dim_num).rev().collect()
        };
        let consumed = cur[ad].add_offset(num - 1);
        let mut next = cur;
        for (k, &d) in order.iter().enumerate() {
            let hi = self.region[2 * d + 1];
            let v = if k == 0 { consumed } else { next[d] };
            if v < hi {
                next[d] = v.step_up();
                self.cursor = Some(next);
                return Some(slab);
            }
            next[d] = self.region[2 * d];
        }
        self.cursor = None;
        Some(slab)
    }
}

struct GlobalState<T: Coordinate> {
    subarray: Vec<T>,
    bounds: Vec<T>,
    extents: Vec<T>,
    tile_shape: Vec<u64>,
    cell_order: Layout,
    tile_order: Layout,
    tile_lo: Vec<u64>,
    tile_hi: Vec<u64>,
    tile_cursor: Option<Vec<u64>>,
}

/// Iterates the cell slabs of a subarray in the requested layout.
///
/// For [`Layout::GlobalOrder`], tiles are visited in the schema tile order
/// and the intersection of the subarray with each tile is traversed in the
/// cell order.
pub(crate) struct CellSlabIter<T: Coordinate> {
    inner: Option<RegionSlabIter<T>>,
    global: Option<GlobalState<T>>,
}

impl<T: Coordinate> CellSlabIter<T> {
    pub fn new(
        subarray: &[T],
        bounds: &[T],
        extents: &[T],
        layout: Layout,
        cell_order: Layout,
        tile_order: Layout,
    ) -> Self {
        let tile_shape: Vec<u64> = extents.iter().map(|e| tile_extent_cells(*e)).collect();
        if layout == Layout::GlobalOrder {
            let lows: Vec<T> = subarray.chunks_exact(2).map(|b| b[0]).collect();
            let highs: Vec<T> = subarray.chunks_exact(2).map(|b| b[1]).collect();
            let tile_lo = tile_coords_of(&lows, bounds, extents);
            let tile_hi = tile_coords_of(&highs, bounds, extents);
            Self {
                inner: None,
                global: Some(GlobalState {
                    subarray: subarray.to_vec(),
                    bounds: bounds.to_vec(),
                    extents: extents.to_vec(),
                    tile_shape,
                    cell_order,
                    tile_order,
                    tile_cursor: Some(tile_lo.clone()),
                    tile_lo,
                    tile_hi,
                }),
            }
        } else {
            Self {
                inner: Some(RegionSlabIter::new(
                    subarray.to_vec(),
                    bounds.to_vec(),
                    extents.to_vec(),
                    tile_shape,
                    layout,
                    cell_order,
                )),
                global: None,
            }
        }
    }

    /// Build the slab iterator of the next global-order tile. Returns false
    /// when all tiles have been visited.
    fn next_region(&mut self) -> bool {
        let Some(global) = &mut self.global else {
            return false;
        };
        let Some(tile_coords) = global.tile_cursor.clone() else {
            return false;
        };
        let tile_rect: Vec<T> = izip!(
            &tile_coords,
            global.bounds.chunks_exact(2),
            &global.tile_shape
        )
        .flat_map(|(t, b, cells)| {
            let lo = b[0].add_offset(t * cells);
            [lo, lo.add_offset(cells - 1)]
        })
        .collect();
        // Tiles in the rectangular tile range always intersect the subarray.
        let region = rect_intersection(&global.subarray, &tile_rect)
            .unwrap_or_else(|| global.subarray.clone());

        // Advance the tile odometer in tile order.
        let dim_num = global.extents.len();
        let order: Vec<usize> = if global.tile_order == Layout::ColMajor {
            (0..dim_num).collect()
        } else {
            (0..dim_num).rev().collect()
        };
        let mut next = tile_coords;
        global.tile_cursor = 'advance: {
            for &d in &order {
                if next[d] < global.tile_hi[d] {
                    next[d] += 1;
                    break 'advance Some(next);
                }
                next[d] = global.tile_lo[d];
            }
            None
        };

        self.inner = Some(RegionSlabIter::new(
            region,
            global.bounds.clone(),
            global.extents.clone(),
            global.tile_shape.clone(),
            global.cell_order,
            global.cell_order,
        ));
        true
    }
}

impl<T: Coordinate> Iterator for CellSlabIter<T> {
    type Item = CellSlab<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(inner) = &mut self.inner {
                if let Some(slab) = inner.next() {
                    return Some(slab);
                }
                self.inner = None;
            }
            if !self.next_region() {
                return None;
            }
        }
    }
}

/// A cell range produced by the dense range merge.
///
/// `start` and `end` are inclusive positions in the global tile's
/// cell-order linearization; `fragment_idx` of [`None`] means no fragment
/// wrote the range and it must be filled with the fill value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct DenseCellRange {
    pub fragment_idx: Option<usize>,
    pub tile_coords: Vec<u64>,
    pub start: u64,
    pub end: u64,
}

/// A sub-interval of one slab covered by one dense fragment.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct FragInterval {
    fragment_idx: usize,
    start: u64,
    end: u64,
}

/// Compute, per dense fragment, the sub-interval of slab positions the
/// fragment covers.
fn dense_fragment_intervals<T: Coordinate>(
    slab: &CellSlab<T>,
    fragments: &[Arc<FragmentMetadata>],
) -> Result<Vec<FragInterval>, ReaderError> {
    let ad = slab.advance_dim;
    let slab_end_coord = slab.start_coords[ad].add_offset(slab.num - 1);
    let mut intervals = Vec::new();
    for (fragment_idx, fragment) in fragments.iter().enumerate() {
        if !fragment.dense() {
            continue;
        }
        let domain = fragment.domain_bounds::<T>()?;
        let covered = slab
            .start_coords
            .iter()
            .enumerate()
            .all(|(d, c)| d == ad || (*c >= domain[2 * d] && *c <= domain[2 * d + 1]));
        if !covered {
            continue;
        }
        let lo = if domain[2 * ad] > slab.start_coords[ad] {
            domain[2 * ad]
        } else {
            slab.start_coords[ad]
        };
        let hi = if domain[2 * ad + 1] < slab_end_coord {
            domain[2 * ad + 1]
        } else {
            slab_end_coord
        };
        if lo > hi {
            continue;
        }
        intervals.push(FragInterval {
            fragment_idx,
            start: slab.start_pos + lo.offset_from(slab.start_coords[ad]),
            end: slab.start_pos + hi.offset_from(slab.start_coords[ad]),
        });
    }
    Ok(intervals)
}

/// Merge the per-fragment intervals of one slab into fragment-attributed
/// cell ranges with newest-fragment precedence.
///
/// The emitted ranges tile the slab interval exactly: no gaps, no overlaps.
/// Positions covered by no fragment are attributed to `fragment_idx = None`.
fn compute_dense_cell_ranges<T: Coordinate>(
    slab: &CellSlab<T>,
    intervals: &[FragInterval],
    out: &mut Vec<DenseCellRange>,
) {
    let slab_end = slab.start_pos + slab.num - 1;
    let mut pos = slab.start_pos;
    while pos <= slab_end {
        let winner = intervals
            .iter()
            .filter(|itv| itv.start <= pos && pos <= itv.end)
            .max_by_key(|itv| itv.fragment_idx);
        let (fragment_idx, mut stop) = match winner {
            None => {
                let next = intervals
                    .iter()
                    .filter(|itv| itv.start > pos)
                    .map(|itv| itv.start)
                    .min()
                    .unwrap_or(slab_end + 1);
                (None, next - 1)
            }
            Some(winner) => (Some(winner.fragment_idx), winner.end),
        };
        if stop > slab_end {
            stop = slab_end;
        }
        if let Some(winner_idx) = fragment_idx {
            // A newer fragment starting inside the range truncates it.
            for itv in intervals {
                if itv.fragment_idx > winner_idx && itv.start > pos && itv.start <= stop {
                    stop = itv.start - 1;
                }
            }
        }
        out.push(DenseCellRange {
            fragment_idx,
            tile_coords: slab.tile_coords.clone(),
            start: pos,
            end: stop,
        });
        pos = stop + 1;
    }
}

/// The tile index of the global tile at `tile_coords` within a dense
/// fragment, under the schema tile order.
fn dense_tile_index<T: Coordinate>(
    fragment: &FragmentMetadata,
    bounds: &[T],
    extents: &[T],
    tile_order: Layout,
    tile_coords: &[u64],
) -> Result<u64, ReaderError> {
    let domain = fragment.domain_bounds::<T>()?;
    let lows: Vec<T> = domain.chunks_exact(2).map(|b| b[0]).collect();
    let highs: Vec<T> = domain.chunks_exact(2).map(|b| b[1]).collect();
    let tile_lo = tile_coords_of(&lows, bounds, extents);
    let tile_hi = tile_coords_of(&highs, bounds, extents);
    let mut rel = Vec::with_capacity(tile_coords.len());
    let mut shape = Vec::with_capacity(tile_coords.len());
    for (tc, lo, hi) in izip!(tile_coords, &tile_lo, &tile_hi) {
        if tc < lo || tc > hi {
            return Err(ReaderError::Internal(
                "cell range outside the fragment tile domain",
            ));
        }
        rel.push(tc - lo);
        shape.push(hi - lo + 1);
    }
    Ok(ravel_indices(&rel, &shape, tile_order))
}

/// Shared context of the dense conversion pass.
struct DenseConversion<'a, T: Coordinate> {
    fragments: &'a [Arc<FragmentMetadata>],
    bounds: &'a [T],
    extents: &'a [T],
    tile_order: Layout,
    attr_slots: usize,
    subarray: &'a [T],
}

impl<T: Coordinate> DenseConversion<'_, T> {
    /// The arena index of the overlapping tile for `(fragment_idx, slab
    /// tile)`, created on first use.
    fn tile_arena_idx(
        &self,
        fragment_idx: usize,
        slab_tile_coords: &[u64],
        tiles: &mut OverlappingTileVec,
        tile_map: &mut HashMap<(usize, u64), usize>,
    ) -> Result<usize, ReaderError> {
        let fragment = &self.fragments[fragment_idx];
        let tile_idx = dense_tile_index(
            fragment,
            self.bounds,
            self.extents,
            self.tile_order,
            slab_tile_coords,
        )?;
        if let Some(idx) = tile_map.get(&(fragment_idx, tile_idx)) {
            return Ok(*idx);
        }
        let bounds_tile = tile_bounds(slab_tile_coords, self.bounds, self.extents);
        let (_, full_overlap) = crate::schema::domain::rect_overlap(self.subarray, &bounds_tile);
        let idx = tiles.len();
        tiles.push(OverlappingTile::new(
            fragment_idx,
            tile_idx,
            self.attr_slots,
            full_overlap,
        ));
        tile_map.insert((fragment_idx, tile_idx), idx);
        Ok(idx)
    }

    fn push_range(
        &self,
        fragment_idx: Option<usize>,
        slab_tile_coords: &[u64],
        start: u64,
        end: u64,
        tiles: &mut OverlappingTileVec,
        tile_map: &mut HashMap<(usize, u64), usize>,
        cell_ranges: &mut OverlappingCellRangeList,
    ) -> Result<(), ReaderError> {
        let tile = match fragment_idx {
            None => None,
            Some(fragment_idx) => {
                Some(self.tile_arena_idx(fragment_idx, slab_tile_coords, tiles, tile_map)?)
            }
        };
        cell_ranges.push(OverlappingCellRange { tile, start, end });
        Ok(())
    }
}

/// Convert the dense cell ranges of one slab into [`OverlappingCellRange`]s,
/// interleaving sparse-fragment coordinates.
///
/// A coordinate at position `p` within a range replaces the cell at `p`
/// when its fragment is newer than the range's attribution (a fill range is
/// always older); coordinates from older fragments are dropped.
#[allow(clippy::too_many_arguments)]
fn interleave_and_convert<T: Coordinate>(
    conversion: &DenseConversion<'_, T>,
    slab: &CellSlab<T>,
    dense_ranges: &[DenseCellRange],
    coords: &mut [OverlappingCoords<T>],
    coords_cursor: &mut usize,
    tiles: &mut OverlappingTileVec,
    tile_map: &mut HashMap<(usize, u64), usize>,
    cell_ranges: &mut OverlappingCellRangeList,
) -> Result<(), ReaderError> {
    let ad = slab.advance_dim;
    let slab_end_coord = slab.start_coords[ad].add_offset(slab.num - 1);
    for range in dense_ranges {
        let mut start = range.start;
        while *coords_cursor < coords.len() {
            let coord = &mut coords[*coords_cursor];
            if !coord.valid() {
                *coords_cursor += 1;
                continue;
            }
            if !coord_in_slab(coord, slab, slab_end_coord) {
                break;
            }
            let pos = slab.start_pos + coord.coords[ad].offset_from(slab.start_coords[ad]);
            if pos > range.end {
                break;
            }
            if pos < start {
                return Err(ReaderError::Internal("unordered sparse coordinate"));
            }
            let newer = range.fragment_idx.map_or(true, |f| coord.fragment_idx > f);
            if newer {
                if pos > start {
                    conversion.push_range(
                        range.fragment_idx,
                        &range.tile_coords,
                        start,
                        pos - 1,
                        tiles,
                        tile_map,
                        cell_ranges,
                    )?;
                }
                cell_ranges.push(OverlappingCellRange {
                    tile: Some(coord.tile),
                    start: coord.pos,
                    end: coord.pos,
                });
                start = pos + 1;
            } else {
                coord.invalidate();
            }
            *coords_cursor += 1;
        }
        if start <= range.end {
            conversion.push_range(
                range.fragment_idx,
                &range.tile_coords,
                start,
                range.end,
                tiles,
                tile_map,
                cell_ranges,
            )?;
        }
    }
    Ok(())
}

/// True if `coord` lies on `slab`: equal to the slab start on every fixed
/// dimension and within the slab's span along the advance dimension.
fn coord_in_slab<T: Coordinate>(
    coord: &OverlappingCoords<T>,
    slab: &CellSlab<T>,
    slab_end_coord: T,
) -> bool {
    let ad = slab.advance_dim;
    coord.coords.iter().enumerate().all(|(d, v)| {
        if d == ad {
            *v >= slab.start_coords[ad] && *v <= slab_end_coord
        } else {
            *v == slab.start_coords[d]
        }
    })
}

/// Fill the coordinates buffer with the cell coordinates of the subarray in
/// the requested layout, synthesized by slab fill.
#[allow(clippy::too_many_arguments)]
fn fill_coords<T: Coordinate>(
    subarray: &[T],
    bounds: &[T],
    extents: &[T],
    layout: Layout,
    cell_order: Layout,
    tile_order: Layout,
    buffer: &mut [u8],
    buffer_size: &mut u64,
) -> ReadStatus {
    let coords_size = subarray.len() / 2 * std::mem::size_of::<T>();
    let mut offset = usize::try_from(*buffer_size).unwrap();
    for slab in CellSlabIter::<T>::new(subarray, bounds, extents, layout, cell_order, tile_order) {
        let remaining_cells = ((buffer.len() - offset) / coords_size) as u64;
        let fit = slab.num.min(remaining_cells);
        if fit > 0 {
            let coords = slab_coords(&slab.start_coords, fit, slab.advance_dim);
            let bytes = transmute_to_bytes(&coords);
            buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
            offset += bytes.len();
        }
        if fit < slab.num {
            *buffer_size = offset as u64;
            return ReadStatus::Incomplete;
        }
    }
    *buffer_size = offset as u64;
    ReadStatus::Completed
}

/// Execute one partition of a dense read.
pub(crate) fn dense_read<T: Coordinate, TStorage: ?Sized + ReadableStorageTraits>(
    ctx: &ReadContext<'_, TStorage>,
    partition: &Subarray,
    buffers: &mut QueryBuffers<'_>,
) -> Result<ReadStatus, ReaderError> {
    let subarray = partition.to_vec::<T>()?;
    let domain = ctx.schema.domain();
    let bounds = domain.bounds::<T>()?;
    let extents = domain.tile_extents::<T>()?;
    let cell_order = ctx.schema.cell_order();
    let tile_order = ctx.schema.tile_order();
    let attr_slots = ctx.schema.attribute_num() + 1;

    // Coordinates from sparse fragments intersecting the partition.
    let mut tiles = compute_overlapping_tiles::<T>(&subarray, ctx.fragments, attr_slots)?;
    let mut tile_map: HashMap<(usize, u64), usize> = tiles
        .iter()
        .enumerate()
        .map(|(i, t)| ((t.fragment_idx, t.tile_idx), i))
        .collect();
    let mut coords: Vec<OverlappingCoords<T>> = Vec::new();
    if !tiles.is_empty() {
        read_tiles(
            ctx.storage,
            ctx.schema,
            ctx.fragments,
            &mut tiles,
            &[AttributeId::COORDS],
        )?;
        coords = compute_overlapping_coords::<T>(&subarray, &tiles, domain.dim_num())?;
        if ctx.layout == Layout::GlobalOrder {
            compute_tile_coordinates(&bounds, &extents, &mut coords);
        }
        sort_coords(ctx.layout, cell_order, tile_order, &mut coords);
        dedup_coords(&mut coords);
    }

    // Merge per-fragment cell ranges per slab and convert to overlapping
    // cell ranges, interleaving the sparse coordinates.
    let conversion = DenseConversion {
        fragments: ctx.fragments,
        bounds: &bounds,
        extents: &extents,
        tile_order,
        attr_slots,
        subarray: &subarray,
    };
    let mut cell_ranges = OverlappingCellRangeList::new();
    let mut coords_cursor = 0;
    let mut dense_ranges = Vec::new();
    for slab in CellSlabIter::<T>::new(
        &subarray, &bounds, &extents, ctx.layout, cell_order, tile_order,
    ) {
        let intervals = dense_fragment_intervals(&slab, ctx.fragments)?;
        dense_ranges.clear();
        compute_dense_cell_ranges(&slab, &intervals, &mut dense_ranges);
        interleave_and_convert(
            &conversion,
            &slab,
            &dense_ranges,
            &mut coords,
            &mut coords_cursor,
            &mut tiles,
            &mut tile_map,
            &mut cell_ranges,
        )?;
    }

    // Read the value tiles of the requested attributes and copy.
    let value_attrs: Vec<AttributeId> = ctx
        .attributes
        .iter()
        .copied()
        .filter(|attr| !attr.is_coords())
        .collect();
    read_tiles(ctx.storage, ctx.schema, ctx.fragments, &mut tiles, &value_attrs)?;

    let mut status = ReadStatus::Completed;
    for (i, attr) in ctx.attributes.iter().enumerate() {
        let (entry, sizes) = buffers.entry_mut(i);
        let attr_status = if attr.is_coords() {
            fill_coords::<T>(
                &subarray,
                &bounds,
                &extents,
                ctx.layout,
                cell_order,
                tile_order,
                entry.buffer,
                &mut sizes.buffer_size,
            )
        } else {
            let attribute = ctx
                .schema
                .attribute(*attr)
                .ok_or(ReaderError::Internal("unknown attribute identifier"))?;
            match attribute.cell_size() {
                Some(cell_size) => copy_fixed_cells(
                    &tiles,
                    *attr,
                    cell_size,
                    Some(attribute.fill_value()),
                    &cell_ranges,
                    entry.buffer,
                    &mut sizes.buffer_size,
                )?,
                None => {
                    let buffer_var = entry
                        .buffer_var
                        .as_deref_mut()
                        .ok_or(ReaderError::Internal("missing values buffer"))?;
                    copy_var_cells(
                        &tiles,
                        *attr,
                        Some(attribute.fill_value()),
                        &cell_ranges,
                        entry.buffer,
                        &mut sizes.buffer_size,
                        buffer_var,
                        &mut sizes.buffer_var_size,
                    )?
                }
            }
        };
        if attr_status == ReadStatus::Incomplete {
            status = ReadStatus::Incomplete;
        }
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slab(
        tile_coords: Vec<u64>,
        start_pos: u64,
        num: u64,
        start_coords: Vec<i32>,
        advance_dim: usize,
    ) -> CellSlab<i32> {
        CellSlab {
            tile_coords,
            start_pos,
            num,
            start_coords,
            advance_dim,
        }
    }

    #[test]
    fn slab_iter_1d() {
        // Domain [1,10], tile extent 5, subarray [3,7].
        let slabs: Vec<_> =
            CellSlabIter::<i32>::new(&[3, 7], &[1, 10], &[5], Layout::RowMajor, Layout::RowMajor, Layout::RowMajor)
                .collect();
        assert_eq!(
            slabs,
            vec![
                slab(vec![0], 2, 3, vec![3], 0),
                slab(vec![1], 0, 2, vec![6], 0),
            ]
        );
    }

    #[test]
    fn slab_iter_2d_row_major() {
        // Domain [1,4]x[1,4], extents 2x2, subarray [1,2]x[1,4], row-major.
        let slabs: Vec<_> = CellSlabIter::<i32>::new(
            &[1, 2, 1, 4],
            &[1, 4, 1, 4],
            &[2, 2],
            Layout::RowMajor,
            Layout::RowMajor,
            Layout::RowMajor,
        )
        .collect();
        assert_eq!(
            slabs,
            vec![
                slab(vec![0, 0], 0, 2, vec![1, 1], 1),
                slab(vec![0, 1], 0, 2, vec![1, 3], 1),
                slab(vec![0, 0], 2, 2, vec![2, 1], 1),
                slab(vec![0, 1], 2, 2, vec![2, 3], 1),
            ]
        );
    }

    #[test]
    fn slab_iter_2d_col_major_layout_over_row_major_tiles() {
        // Orthogonal traversal degenerates to unit slabs.
        let slabs: Vec<_> = CellSlabIter::<i32>::new(
            &[1, 2, 1, 2],
            &[1, 4, 1, 4],
            &[2, 2],
            Layout::ColMajor,
            Layout::RowMajor,
            Layout::RowMajor,
        )
        .collect();
        assert_eq!(
            slabs,
            vec![
                slab(vec![0, 0], 0, 1, vec![1, 1], 0),
                slab(vec![0, 0], 2, 1, vec![2, 1], 0),
                slab(vec![0, 0], 1, 1, vec![1, 2], 0),
                slab(vec![0, 0], 3, 1, vec![2, 2], 0),
            ]
        );
    }

    #[test]
    fn slab_iter_global_order() {
        // Subarray [1,4]x[1,4] over 2x2 tiles: whole tiles in tile order.
        let slabs: Vec<_> = CellSlabIter::<i32>::new(
            &[1, 4, 1, 4],
            &[1, 4, 1, 4],
            &[2, 2],
            Layout::GlobalOrder,
            Layout::RowMajor,
            Layout::RowMajor,
        )
        .collect();
        assert_eq!(slabs.len(), 8);
        // The first tile's rows come before any other tile's.
        assert_eq!(slabs[0], slab(vec![0, 0], 0, 2, vec![1, 1], 1));
        assert_eq!(slabs[1], slab(vec![0, 0], 2, 2, vec![2, 1], 1));
        assert_eq!(slabs[2], slab(vec![0, 1], 0, 2, vec![1, 3], 1));
        assert_eq!(slabs[7], slab(vec![1, 1], 2, 2, vec![4, 3], 1));
    }

    #[test]
    fn range_merge_newest_fragment_wins() {
        // Slab positions 0..=9; fragment 0 covers all, fragment 1 covers
        // 3..=5.
        let s = slab(vec![0], 0, 10, vec![1], 0);
        let intervals = vec![
            FragInterval {
                fragment_idx: 0,
                start: 0,
                end: 9,
            },
            FragInterval {
                fragment_idx: 1,
                start: 3,
                end: 5,
            },
        ];
        let mut out = Vec::new();
        compute_dense_cell_ranges(&s, &intervals, &mut out);
        let summary: Vec<_> = out
            .iter()
            .map(|r| (r.fragment_idx, r.start, r.end))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Some(0), 0, 2),
                (Some(1), 3, 5),
                (Some(0), 6, 9),
            ]
        );
    }

    #[test]
    fn range_merge_fills_holes() {
        // Fragment 0 covers positions 2..=3 of 0..=5 only.
        let s = slab(vec![0], 0, 6, vec![1], 0);
        let intervals = vec![FragInterval {
            fragment_idx: 0,
            start: 2,
            end: 3,
        }];
        let mut out = Vec::new();
        compute_dense_cell_ranges(&s, &intervals, &mut out);
        let summary: Vec<_> = out
            .iter()
            .map(|r| (r.fragment_idx, r.start, r.end))
            .collect();
        assert_eq!(
            summary,
            vec![(None, 0, 1), (Some(0), 2, 3), (None, 4, 5)]
        );
    }

    #[test]
    fn range_merge_covers_exactly() {
        // Overlapping fragments in various orders: the union must be exact.
        let s = slab(vec![0], 10, 10, vec![1], 0);
        let intervals = vec![
            FragInterval {
                fragment_idx: 2,
                start: 12,
                end: 14,
            },
            FragInterval {
                fragment_idx: 0,
                start: 10,
                end: 19,
            },
            FragInterval {
                fragment_idx: 1,
                start: 14,
                end: 17,
            },
        ];
        let mut out = Vec::new();
        compute_dense_cell_ranges(&s, &intervals, &mut out);
        let mut pos = 10;
        for range in &out {
            assert_eq!(range.start, pos);
            assert!(range.end >= range.start);
            pos = range.end + 1;
        }
        assert_eq!(pos, 20);
        let summary: Vec<_> = out
            .iter()
            .map(|r| (r.fragment_idx, r.start, r.end))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Some(0), 10, 11),
                (Some(2), 12, 14),
                (Some(1), 15, 17),
                (Some(0), 18, 19),
            ]
        );
    }
}
