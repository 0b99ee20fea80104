//! The read state and subarray partitioner.
//!
//! For some subarray, the user buffers may not be able to hold the entire
//! result. Given the subarray and the initial buffer sizes,
//! [`compute_subarray_partitions`] decomposes the subarray into partitions
//! such that the results of each partition can certainly fit in the user
//! buffers. The [`ReadState`] holds the partition list and the index of the
//! partition to be processed next.

use std::sync::Arc;

use crate::{
    datatype::Coordinate,
    fragment::FragmentMetadata,
    schema::{
        domain::{rect_intersection, tile_coords_of, tile_extent_cells},
        ArraySchema, AttributeId, Layout, COORDS_NAME,
    },
    subarray::Subarray,
};

use super::ReaderError;

/// The state of an in-progress read query.
#[derive(Clone, Debug)]
pub(crate) struct ReadState {
    /// The original subarray set by the user.
    #[allow(dead_code)]
    subarray: Subarray,
    /// The subarray partitions.
    partitions: Vec<Subarray>,
    /// The index of the partition to be processed next.
    idx: usize,
}

impl ReadState {
    pub fn new(subarray: Subarray, partitions: Vec<Subarray>) -> Self {
        Self {
            subarray,
            partitions,
            idx: 0,
        }
    }

    /// True if all partitions have been processed.
    pub fn done(&self) -> bool {
        self.idx >= self.partitions.len()
    }

    /// The partition to be processed next.
    pub fn current(&self) -> Option<&Subarray> {
        self.partitions.get(self.idx)
    }

    pub fn idx(&self) -> usize {
        self.idx
    }

    pub fn advance(&mut self) {
        if !self.done() {
            self.idx += 1;
        }
    }
}

/// The registered buffer sizes of one attribute.
#[derive(Clone, Debug)]
pub(crate) struct BufferSizeEntry {
    pub attr: AttributeId,
    /// The size of the attribute (or offsets) buffer in bytes.
    pub size: u64,
    /// The size of the values buffer of a variable-sized attribute.
    pub var_size: Option<u64>,
}

/// Pair the registered attributes with their flat buffer size list.
pub(crate) fn buffer_size_entries(
    schema: &ArraySchema,
    attr_ids: &[AttributeId],
    buffer_sizes: &[u64],
) -> Vec<BufferSizeEntry> {
    let mut entries = Vec::with_capacity(attr_ids.len());
    let mut i = 0;
    for attr in attr_ids {
        let var = schema
            .attribute(*attr)
            .is_some_and(crate::schema::Attribute::is_var);
        let size = buffer_sizes[i];
        i += 1;
        let var_size = if var {
            let var_size = buffer_sizes[i];
            i += 1;
            Some(var_size)
        } else {
            None
        };
        entries.push(BufferSizeEntry {
            attr: *attr,
            size,
            var_size,
        });
    }
    entries
}

/// An upper bound of the result size of one attribute over one partition.
#[derive(Copy, Clone, Debug, Default)]
struct SizeEstimate {
    /// Bound of the attribute (or offsets) buffer bytes.
    fixed: u64,
    /// Bound of the values buffer bytes of a variable-sized attribute.
    var: u64,
}

/// Compute the partitions of `subarray` such that the result of each
/// partition fits in the registered buffers.
///
/// Dense fixed-size results are bounded exactly by the partition cell
/// count. Sparse cell counts and stored variable-size values are
/// apportioned by the fraction of each tile's cells the partition covers;
/// skewed tiles can beat that estimate, in which case the read reports
/// [`ReadStatus::Incomplete`](super::ReadStatus::Incomplete) instead of
/// overflowing.
///
/// The subarray is bisected recursively along the slowest-varying dimension
/// of the requested layout (so that the concatenation of partition results
/// equals an unbounded read), with the split point snapped to a tile
/// boundary when one lies strictly inside the range. Empty partitions are
/// dropped.
///
/// # Errors
/// Returns [`ReaderError::BufferTooSmall`] if an unsplittable partition
/// still exceeds a buffer size.
pub(crate) fn compute_subarray_partitions<T: Coordinate>(
    schema: &ArraySchema,
    fragments: &[Arc<FragmentMetadata>],
    entries: &[BufferSizeEntry],
    layout: Layout,
    subarray: &[T],
) -> Result<Vec<Subarray>, ReaderError> {
    let bounds = schema.domain().bounds::<T>()?;
    let extents = schema.domain().tile_extents::<T>()?;
    let mut partitions = Vec::new();
    partition_recursive(
        schema, fragments, entries, layout, subarray, &bounds, &extents, &mut partitions,
    )?;
    Ok(partitions)
}

#[allow(clippy::too_many_arguments)]
fn partition_recursive<T: Coordinate>(
    schema: &ArraySchema,
    fragments: &[Arc<FragmentMetadata>],
    entries: &[BufferSizeEntry],
    layout: Layout,
    current: &[T],
    bounds: &[T],
    extents: &[T],
    partitions: &mut Vec<Subarray>,
) -> Result<(), ReaderError> {
    let (cell_bound, estimates) = estimate_result_sizes(schema, fragments, entries, current)?;
    if cell_bound == 0 {
        // No results; drop the partition.
        return Ok(());
    }
    let violation = std::iter::zip(entries, &estimates).find(|(entry, estimate)| {
        estimate.fixed > entry.size || entry.var_size.is_some_and(|s| estimate.var > s)
    });
    let Some((entry, estimate)) = violation else {
        partitions.push(unsafe { Subarray::new_unchecked(current) });
        return Ok(());
    };
    let Some((left, right)) = split_subarray(current, layout, schema.tile_order(), bounds, extents)
    else {
        let attribute = entry
            .attr
            .index()
            .and_then(|i| schema.attributes().get(i))
            .map_or(COORDS_NAME, crate::schema::Attribute::name);
        let buffer_size = if estimate.fixed > entry.size {
            entry.size
        } else {
            entry.var_size.unwrap_or(entry.size)
        };
        return Err(ReaderError::BufferTooSmall {
            attribute: attribute.to_string(),
            buffer_size,
        });
    };
    partition_recursive(
        schema, fragments, entries, layout, &left, bounds, extents, partitions,
    )?;
    partition_recursive(
        schema, fragments, entries, layout, &right, bounds, extents, partitions,
    )
}

/// Estimate, per registered attribute, an upper bound of the result size
/// over `partition`. Returns the cell count bound alongside.
fn estimate_result_sizes<T: Coordinate>(
    schema: &ArraySchema,
    fragments: &[Arc<FragmentMetadata>],
    entries: &[BufferSizeEntry],
    partition: &[T],
) -> Result<(u64, Vec<SizeEstimate>), ReaderError> {
    let dense = schema.dense();
    let has_var = entries.iter().any(|e| e.var_size.is_some());

    let mut cell_bound: u64 = if dense {
        partition
            .chunks_exact(2)
            .map(|b| T::cell_extent(b[0], b[1]))
            .product()
    } else {
        0
    };
    // Stored bytes of variable-sized values in tiles overlapping the
    // partition, per entry.
    let mut var_stored = vec![0u64; entries.len()];

    for fragment in fragments {
        if fragment.dense() {
            if !has_var {
                continue;
            }
            sum_dense_var_tiles(schema, fragment, entries, partition, &mut var_stored)?;
        } else {
            for tile_idx in 0..fragment.tile_num() {
                let mbr = fragment.mbr::<T>(tile_idx)?;
                let Some(intersection) = rect_intersection(partition, &mbr) else {
                    continue;
                };
                let inter_cells = rect_cells::<T>(&intersection);
                let mbr_cells = rect_cells::<T>(&mbr);
                if !dense {
                    cell_bound += proportional(fragment.cell_num(tile_idx), inter_cells, mbr_cells);
                }
                for (entry, stored) in std::iter::zip(entries, var_stored.iter_mut()) {
                    if entry.var_size.is_some() {
                        if let Some(location) = fragment.var_tile_location(entry.attr, tile_idx) {
                            *stored += proportional(location.size, inter_cells, mbr_cells);
                        }
                    }
                }
            }
        }
    }

    let estimates = entries
        .iter()
        .zip(&var_stored)
        .map(|(entry, stored)| {
            let attribute = schema.attribute(entry.attr);
            match attribute {
                // The coordinates pseudo-attribute.
                None => SizeEstimate {
                    fixed: cell_bound * schema.coords_size(),
                    var: 0,
                },
                Some(attribute) => match attribute.cell_size() {
                    Some(cell_size) => SizeEstimate {
                        fixed: cell_bound * cell_size,
                        var: 0,
                    },
                    None => SizeEstimate {
                        fixed: cell_bound * 8,
                        var: *stored,
                    },
                },
            }
        })
        .collect();
    Ok((cell_bound, estimates))
}

/// Add the stored values-tile sizes of a dense fragment's tiles overlapping
/// `partition` to `var_stored`.
fn sum_dense_var_tiles<T: Coordinate>(
    schema: &ArraySchema,
    fragment: &FragmentMetadata,
    entries: &[BufferSizeEntry],
    partition: &[T],
    var_stored: &mut [u64],
) -> Result<(), ReaderError> {
    let bounds = schema.domain().bounds::<T>()?;
    let extents = schema.domain().tile_extents::<T>()?;
    let domain = fragment.domain_bounds::<T>()?;
    let Some(region) = crate::schema::domain::rect_intersection(&domain, partition) else {
        return Ok(());
    };
    let lows: Vec<T> = region.chunks_exact(2).map(|b| b[0]).collect();
    let highs: Vec<T> = region.chunks_exact(2).map(|b| b[1]).collect();
    let t_lo = tile_coords_of(&lows, &bounds, &extents);
    let t_hi = tile_coords_of(&highs, &bounds, &extents);
    let frag_lows: Vec<T> = domain.chunks_exact(2).map(|b| b[0]).collect();
    let frag_highs: Vec<T> = domain.chunks_exact(2).map(|b| b[1]).collect();
    let f_lo = tile_coords_of(&frag_lows, &bounds, &extents);
    let f_hi = tile_coords_of(&frag_highs, &bounds, &extents);
    let shape: Vec<u64> = std::iter::zip(&f_hi, &f_lo).map(|(h, l)| h - l + 1).collect();

    let tile_shape: Vec<u64> = extents.iter().map(|e| tile_extent_cells(*e)).collect();
    let capacity: u64 = tile_shape.iter().product();

    // Walk the tile coordinates of the fragment overlapping the region.
    let mut tc = t_lo.clone();
    loop {
        let rel: Vec<u64> = std::iter::zip(&tc, &f_lo).map(|(t, l)| t - l).collect();
        let tile_idx =
            crate::schema::domain::ravel_indices(&rel, &shape, schema.tile_order());
        // Cells of the tile within the region.
        let mut inter_cells = 1u64;
        for (t, b, cells, r) in itertools::izip!(
            &tc,
            bounds.chunks_exact(2),
            &tile_shape,
            region.chunks_exact(2)
        ) {
            let tile_lo = b[0].add_offset(t * cells);
            let tile_hi = tile_lo.add_offset(cells - 1);
            let lo = if tile_lo > r[0] { tile_lo } else { r[0] };
            let hi = if tile_hi < r[1] { tile_hi } else { r[1] };
            inter_cells *= if lo > hi { 0 } else { T::cell_extent(lo, hi) };
        }
        for (entry, stored) in std::iter::zip(entries, var_stored.iter_mut()) {
            if entry.var_size.is_some() {
                if let Some(location) = fragment.var_tile_location(entry.attr, tile_idx) {
                    *stored += proportional(location.size, inter_cells, capacity);
                }
            }
        }
        // Advance the tile odometer.
        let mut dim = tc.len();
        loop {
            if dim == 0 {
                return Ok(());
            }
            dim -= 1;
            if tc[dim] < t_hi[dim] {
                tc[dim] += 1;
                break;
            }
            tc[dim] = t_lo[dim];
        }
    }
}

/// The number of cells of an inclusive hyper-rectangle.
fn rect_cells<T: Coordinate>(rect: &[T]) -> u64 {
    rect.chunks_exact(2)
        .map(|b| T::cell_extent(b[0], b[1]))
        .product()
}

/// A cells-weighted share of `size`, rounded up.
///
/// Stored values-tile sizes are apportioned by the fraction of the tile's
/// cells a partition covers. This is not a strict upper bound when cell
/// sizes are uneven; a shortfall surfaces as an incomplete read.
#[allow(clippy::cast_possible_truncation)]
fn proportional(size: u64, inter_cells: u64, total_cells: u64) -> u64 {
    if total_cells == 0 || inter_cells >= total_cells {
        return size;
    }
    ((u128::from(size) * u128::from(inter_cells) + u128::from(total_cells) - 1)
        / u128::from(total_cells)) as u64
}

/// Bisect `current` along the slowest-varying dimension of `layout` with
/// extent greater than one cell, snapping the split point to a tile
/// boundary when one lies strictly inside. Returns [`None`] if the
/// subarray cannot be split further.
fn split_subarray<T: Coordinate>(
    current: &[T],
    layout: Layout,
    tile_order: Layout,
    bounds: &[T],
    extents: &[T],
) -> Option<(Vec<T>, Vec<T>)> {
    let dim_num = current.len() / 2;
    let order: Vec<usize> = match layout {
        Layout::RowMajor => (0..dim_num).collect(),
        Layout::ColMajor => (0..dim_num).rev().collect(),
        Layout::GlobalOrder => match tile_order {
            Layout::ColMajor => (0..dim_num).rev().collect(),
            _ => (0..dim_num).collect(),
        },
    };
    for dim in order {
        let lo = current[2 * dim];
        let hi = current[2 * dim + 1];
        if lo >= hi {
            continue;
        }
        let mut mid = T::midpoint(lo, hi);
        if T::DATATYPE.is_integer() {
            // Snap to the end of the tile containing the midpoint.
            let cells = tile_extent_cells(extents[dim]);
            let tile = mid.tile_index(bounds[2 * dim], extents[dim]);
            let tile_end = bounds[2 * dim].add_offset((tile + 1) * cells - 1);
            if tile_end >= lo && tile_end < hi {
                mid = tile_end;
            }
        }
        if mid < lo || mid >= hi {
            mid = T::midpoint(lo, hi);
        }
        let mut left = current.to_vec();
        let mut right = current.to_vec();
        left[2 * dim + 1] = mid;
        right[2 * dim] = mid.step_up();
        return Some((left, right));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datatype::Datatype,
        fill_value::FillValue,
        schema::{ArrayType, Attribute, Domain},
    };

    fn dense_schema_2d() -> ArraySchema {
        ArraySchema::new(
            ArrayType::Dense,
            Domain::new::<i32>(&[1, 100, 1, 100], &[10, 10]).unwrap(),
            Layout::RowMajor,
            Layout::RowMajor,
            vec![Attribute::new("a", Datatype::Int32, FillValue::from(-1i32)).unwrap()],
        )
        .unwrap()
    }

    #[test]
    fn read_state_transitions() {
        let subarray = Subarray::new::<i32>(&[1, 10]).unwrap();
        let partitions = vec![
            Subarray::new::<i32>(&[1, 5]).unwrap(),
            Subarray::new::<i32>(&[6, 10]).unwrap(),
        ];
        let mut state = ReadState::new(subarray, partitions);
        assert!(!state.done());
        assert_eq!(state.idx(), 0);
        assert_eq!(state.current().unwrap().to_vec::<i32>().unwrap(), [1, 5]);
        state.advance();
        assert_eq!(state.current().unwrap().to_vec::<i32>().unwrap(), [6, 10]);
        state.advance();
        assert!(state.done());
        assert!(state.current().is_none());
        state.advance();
        assert!(state.done());
    }

    #[test]
    fn partitions_cover_the_subarray() {
        let schema = dense_schema_2d();
        // 100x100 int32 cells = 40000 bytes; a 10000 byte buffer needs >= 4
        // partitions.
        let entries = vec![BufferSizeEntry {
            attr: AttributeId(0),
            size: 10000,
            var_size: None,
        }];
        let partitions = compute_subarray_partitions::<i32>(
            &schema,
            &[],
            &entries,
            Layout::RowMajor,
            &[1, 100, 1, 100],
        )
        .unwrap();
        assert!(partitions.len() >= 4);

        // Partitions tile the subarray in row-major order of their starts.
        let mut cells = 0;
        let mut prev_start = 0i64;
        for partition in &partitions {
            let bounds = partition.to_vec::<i32>().unwrap();
            let num: u64 = bounds
                .chunks_exact(2)
                .map(|b| u64::try_from(b[1] - b[0] + 1).unwrap())
                .product();
            assert!(num * 4 <= 10000);
            cells += num;
            let start = i64::from(bounds[0]) * 1000 + i64::from(bounds[2]);
            assert!(start >= prev_start);
            prev_start = start;
        }
        assert_eq!(cells, 100 * 100);
    }

    #[test]
    fn partition_buffer_too_small() {
        let schema = dense_schema_2d();
        let entries = vec![BufferSizeEntry {
            attr: AttributeId(0),
            size: 2,
            var_size: None,
        }];
        // A single int32 cell does not fit 2 bytes.
        assert!(matches!(
            compute_subarray_partitions::<i32>(
                &schema,
                &[],
                &entries,
                Layout::RowMajor,
                &[1, 100, 1, 100],
            ),
            Err(ReaderError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn split_snaps_to_tile_boundaries() {
        let bounds = [1i32, 100, 1, 100];
        let extents = [10i32, 10];
        let (left, right) = split_subarray(
            &[1i32, 100, 1, 100],
            Layout::RowMajor,
            Layout::RowMajor,
            &bounds,
            &extents,
        )
        .unwrap();
        // The midpoint 50 is already a tile end.
        assert_eq!(left, vec![1, 50, 1, 100]);
        assert_eq!(right, vec![51, 100, 1, 100]);

        // Col-major splits the last dimension first.
        let (left, right) = split_subarray(
            &[1i32, 100, 1, 100],
            Layout::ColMajor,
            Layout::RowMajor,
            &bounds,
            &extents,
        )
        .unwrap();
        assert_eq!(left, vec![1, 100, 1, 50]);
        assert_eq!(right, vec![1, 100, 51, 100]);

        // A singleton cell cannot be split.
        assert!(split_subarray(
            &[5i32, 5, 7, 7],
            Layout::RowMajor,
            Layout::RowMajor,
            &bounds,
            &extents
        )
        .is_none());
    }
}
