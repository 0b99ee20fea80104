//! Sparse reads.
//!
//! A sparse read materializes the coordinates of every cell in an
//! overlapping tile that lies in the subarray, sorts them into the
//! requested layout, deduplicates them with newest-fragment precedence, and
//! coalesces the surviving coordinates into cell ranges for the copy
//! engine.

use std::cmp::Ordering;

use rayon::prelude::*;

use crate::{
    datatype::Coordinate,
    schema::{
        domain::{rect_contains_coords, tile_coords_of},
        AttributeId, Layout,
    },
    storage::ReadableStorageTraits,
    subarray::Subarray,
};

use super::{
    copy::{copy_fixed_cells, copy_var_cells},
    overlap::{
        compute_overlapping_tiles, read_tiles, OverlappingCellRange, OverlappingCellRangeList,
        OverlappingCoords, OverlappingTileVec,
    },
    QueryBuffers, ReadContext, ReadStatus, ReaderError,
};

/// Materialize the coordinates of the overlapping tiles that lie in
/// `subarray`. For a `full_overlap` tile, all cells qualify.
pub(crate) fn compute_overlapping_coords<T: Coordinate>(
    subarray: &[T],
    tiles: &OverlappingTileVec,
    dim_num: usize,
) -> Result<Vec<OverlappingCoords<T>>, ReaderError> {
    let mut coords = Vec::new();
    for (tile_ref, tile) in tiles.iter().enumerate() {
        let attr_tiles = tile
            .attr_tiles(AttributeId::COORDS)
            .ok_or(ReaderError::Internal("coordinate tile not read"))?;
        let values: Vec<T> = attr_tiles.tile.typed()?;
        for (pos, cell) in values.chunks_exact(dim_num).enumerate() {
            if tile.full_overlap || rect_contains_coords(subarray, cell) {
                coords.push(OverlappingCoords {
                    tile: tile_ref,
                    fragment_idx: tile.fragment_idx,
                    coords: cell.to_vec(),
                    tile_coords: None,
                    pos: pos as u64,
                    valid: true,
                });
            }
        }
    }
    Ok(coords)
}

/// Compute the array tile coordinates of each overlapping coordinate
/// (required for global order sorting).
pub(crate) fn compute_tile_coordinates<T: Coordinate>(
    bounds: &[T],
    extents: &[T],
    coords: &mut [OverlappingCoords<T>],
) {
    coords.par_iter_mut().for_each(|coord| {
        coord.tile_coords = Some(tile_coords_of(&coord.coords, bounds, extents));
    });
}

/// Compare coordinates in `order`: row-major compares the first dimension
/// most significant, col-major the last.
fn cmp_coords<T: Coordinate>(a: &[T], b: &[T], order: Layout) -> Ordering {
    let dim_num = a.len();
    for i in 0..dim_num {
        let d = if order == Layout::ColMajor {
            dim_num - 1 - i
        } else {
            i
        };
        match a[d].partial_cmp(&b[d]).unwrap_or(Ordering::Equal) {
            Ordering::Equal => {}
            ordering => return ordering,
        }
    }
    Ordering::Equal
}

fn cmp_indices(a: &[u64], b: &[u64], order: Layout) -> Ordering {
    let dim_num = a.len().min(b.len());
    for i in 0..dim_num {
        let d = if order == Layout::ColMajor {
            dim_num - 1 - i
        } else {
            i
        };
        match a[d].cmp(&b[d]) {
            Ordering::Equal => {}
            ordering => return ordering,
        }
    }
    Ordering::Equal
}

/// Sort the coordinates into the requested layout.
///
/// Equal coordinates are ordered by fragment index (then tile, then
/// position), which makes the subsequent dedup stable and total.
pub(crate) fn sort_coords<T: Coordinate>(
    layout: Layout,
    cell_order: Layout,
    tile_order: Layout,
    coords: &mut Vec<OverlappingCoords<T>>,
) {
    coords.par_sort_unstable_by(|a, b| {
        let primary = match layout {
            Layout::RowMajor | Layout::ColMajor => cmp_coords(&a.coords, &b.coords, layout),
            Layout::GlobalOrder => cmp_indices(
                a.tile_coords.as_deref().unwrap_or(&[]),
                b.tile_coords.as_deref().unwrap_or(&[]),
                tile_order,
            )
            .then_with(|| cmp_coords(&a.coords, &b.coords, cell_order)),
        };
        primary
            .then_with(|| a.fragment_idx.cmp(&b.fragment_idx))
            .then_with(|| a.tile.cmp(&b.tile))
            .then_with(|| a.pos.cmp(&b.pos))
    });
}

/// Deduplicate sorted coordinates, giving preference to the largest
/// fragment index. Losers are marked invalid.
pub(crate) fn dedup_coords<T: Coordinate>(coords: &mut [OverlappingCoords<T>]) {
    for i in 1..coords.len() {
        if coords[i].coords == coords[i - 1].coords {
            // Sorted with the fragment index ascending last, so the
            // earlier of two equal coordinates is the older one.
            coords[i - 1].invalidate();
        }
    }
}

/// Coalesce maximal runs of valid coordinates that share a source tile and
/// have strictly consecutive in-tile positions into cell ranges.
pub(crate) fn compute_cell_ranges<T: Coordinate>(
    coords: &[OverlappingCoords<T>],
) -> OverlappingCellRangeList {
    let mut cell_ranges = OverlappingCellRangeList::new();
    let mut valid = coords.iter().filter(|c| c.valid());
    let Some(first) = valid.next() else {
        return cell_ranges;
    };
    let (mut tile, mut start, mut end) = (first.tile, first.pos, first.pos);
    for coord in valid {
        if coord.tile == tile && coord.pos == end + 1 {
            end = coord.pos;
        } else {
            cell_ranges.push(OverlappingCellRange {
                tile: Some(tile),
                start,
                end,
            });
            tile = coord.tile;
            start = coord.pos;
            end = coord.pos;
        }
    }
    cell_ranges.push(OverlappingCellRange {
        tile: Some(tile),
        start,
        end,
    });
    cell_ranges
}

/// Execute one partition of a sparse read.
pub(crate) fn sparse_read<T: Coordinate, TStorage: ?Sized + ReadableStorageTraits>(
    ctx: &ReadContext<'_, TStorage>,
    partition: &Subarray,
    buffers: &mut QueryBuffers<'_>,
) -> Result<ReadStatus, ReaderError> {
    let subarray = partition.to_vec::<T>()?;
    let domain = ctx.schema.domain();
    let attr_slots = ctx.schema.attribute_num() + 1;

    let mut tiles = compute_overlapping_tiles::<T>(&subarray, ctx.fragments, attr_slots)?;
    if tiles.is_empty() {
        return Ok(ReadStatus::Completed);
    }
    read_tiles(
        ctx.storage,
        ctx.schema,
        ctx.fragments,
        &mut tiles,
        &[AttributeId::COORDS],
    )?;
    let mut coords = compute_overlapping_coords::<T>(&subarray, &tiles, domain.dim_num())?;
    if ctx.layout == Layout::GlobalOrder {
        let bounds = domain.bounds::<T>()?;
        let extents = domain.tile_extents::<T>()?;
        compute_tile_coordinates(&bounds, &extents, &mut coords);
    }
    sort_coords(ctx.layout, ctx.schema.cell_order(), ctx.schema.tile_order(), &mut coords);
    dedup_coords(&mut coords);
    if !coords.iter().any(OverlappingCoords::valid) {
        return Ok(ReadStatus::Completed);
    }
    let cell_ranges = compute_cell_ranges(&coords);

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
            copy_fixed_cells(
                &tiles,
                *attr,
                ctx.schema.coords_size(),
                None,
                &cell_ranges,
                entry.buffer,
                &mut sizes.buffer_size,
            )?
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

    fn coords(
        tile: usize,
        fragment_idx: usize,
        coords: Vec<i32>,
        pos: u64,
    ) -> OverlappingCoords<i32> {
        OverlappingCoords {
            tile,
            fragment_idx,
            coords,
            tile_coords: None,
            pos,
            valid: true,
        }
    }

    #[test]
    fn sort_row_and_col_major() {
        let mut list = vec![
            coords(0, 0, vec![2, 1], 0),
            coords(0, 0, vec![1, 2], 1),
            coords(0, 0, vec![1, 1], 2),
        ];
        sort_coords(Layout::RowMajor, Layout::RowMajor, Layout::RowMajor, &mut list);
        let order: Vec<_> = list.iter().map(|c| c.coords.clone()).collect();
        assert_eq!(order, vec![vec![1, 1], vec![1, 2], vec![2, 1]]);

        sort_coords(Layout::ColMajor, Layout::RowMajor, Layout::RowMajor, &mut list);
        let order: Vec<_> = list.iter().map(|c| c.coords.clone()).collect();
        assert_eq!(order, vec![vec![1, 1], vec![2, 1], vec![1, 2]]);
    }

    #[test]
    fn sort_global_order() {
        // 4x4 domain, 2x2 tiles: (3,1) is in tile (1,0) which follows all
        // of tile (0,0) and (0,1) in row-major tile order.
        let mut list = vec![
            coords(0, 0, vec![3, 1], 0),
            coords(0, 0, vec![1, 3], 1),
            coords(0, 0, vec![2, 2], 2),
        ];
        compute_tile_coordinates(&[1, 4, 1, 4], &[2, 2], &mut list);
        sort_coords(Layout::GlobalOrder, Layout::RowMajor, Layout::RowMajor, &mut list);
        let order: Vec<_> = list.iter().map(|c| c.coords.clone()).collect();
        assert_eq!(order, vec![vec![2, 2], vec![1, 3], vec![3, 1]]);
    }

    #[test]
    fn dedup_keeps_newest_fragment() {
        let mut list = vec![
            coords(0, 0, vec![2, 2], 0),
            coords(1, 1, vec![2, 2], 0),
            coords(1, 1, vec![3, 3], 1),
        ];
        sort_coords(Layout::RowMajor, Layout::RowMajor, Layout::RowMajor, &mut list);
        dedup_coords(&mut list);
        let valid: Vec<_> = list
            .iter()
            .filter(|c| c.valid())
            .map(|c| (c.fragment_idx, c.coords.clone()))
            .collect();
        assert_eq!(valid, vec![(1, vec![2, 2]), (1, vec![3, 3])]);
    }

    #[test]
    fn cell_ranges_coalesce_consecutive_positions() {
        let list = vec![
            coords(0, 0, vec![1, 1], 0),
            coords(0, 0, vec![1, 2], 1),
            coords(0, 0, vec![1, 3], 2),
            // A gap in positions breaks the run.
            coords(0, 0, vec![2, 2], 5),
            // A different tile breaks the run.
            coords(1, 1, vec![3, 1], 6),
        ];
        let cell_ranges = compute_cell_ranges(&list);
        assert_eq!(
            cell_ranges,
            vec![
                OverlappingCellRange {
                    tile: Some(0),
                    start: 0,
                    end: 2
                },
                OverlappingCellRange {
                    tile: Some(0),
                    start: 5,
                    end: 5
                },
                OverlappingCellRange {
                    tile: Some(1),
                    start: 6,
                    end: 6
                },
            ]
        );
    }
}
