//! Array domains and coordinate math.
//!
//! A [`Domain`] holds the inclusive per-dimension bounds and tile extents of
//! an array, stored as raw native-endian bytes with typed accessors. The
//! free functions in this module are the coordinate arithmetic the read path
//! is built on: hyper-rectangle overlap and intersection, row/col-major
//! (de)linearisation, and tile coordinate math.

use itertools::izip;
use thiserror::Error;

use crate::datatype::{
    convert_from_bytes_slice, convert_to_bytes_vec, Coordinate, Datatype, DatatypeMismatchError,
};

use super::Layout;

/// The domain of an array.
///
/// Bounds are stored as `[lo, hi]` (inclusive) pairs per dimension, tile
/// extents as one positive value per dimension, all of the domain
/// [`Datatype`].
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Domain {
    datatype: Datatype,
    dim_num: usize,
    bounds: Vec<u8>,
    tile_extents: Vec<u8>,
}

/// A domain creation error.
#[derive(Copy, Clone, Debug, Error)]
pub enum DomainCreateError {
    /// The domain has no dimensions.
    #[error("domain must have at least one dimension")]
    ZeroDimensions,
    /// The bounds length is not twice the number of tile extents.
    #[error("domain bounds length {_0} does not match 2 x {_1} dimensions")]
    IncompatibleBoundsLength(usize, usize),
    /// A bound or tile extent is not finite.
    #[error("domain bounds and tile extents must be finite")]
    NonFinite,
    /// A lower bound exceeds its upper bound.
    #[error("domain lower bound exceeds upper bound in dimension {_0}")]
    InvertedBounds(usize),
    /// A tile extent is not positive.
    #[error("tile extent must be positive in dimension {_0}")]
    NonPositiveTileExtent(usize),
}

impl Domain {
    /// Create a new domain from inclusive `bounds` (`[lo, hi]` per
    /// dimension) and per-dimension `tile_extents`.
    ///
    /// # Errors
    /// Returns a [`DomainCreateError`] if the inputs are empty or of
    /// mismatched length, any value is non-finite, a lower bound exceeds its
    /// upper bound, or a tile extent is not positive.
    pub fn new<T: Coordinate>(bounds: &[T], tile_extents: &[T]) -> Result<Self, DomainCreateError> {
        if tile_extents.is_empty() {
            return Err(DomainCreateError::ZeroDimensions);
        }
        if bounds.len() != 2 * tile_extents.len() {
            return Err(DomainCreateError::IncompatibleBoundsLength(
                bounds.len(),
                tile_extents.len(),
            ));
        }
        if bounds.iter().chain(tile_extents).any(|v| !v.is_finite()) {
            return Err(DomainCreateError::NonFinite);
        }
        for (dim, pair) in bounds.chunks_exact(2).enumerate() {
            if pair[0] > pair[1] {
                return Err(DomainCreateError::InvertedBounds(dim));
            }
        }
        for (dim, extent) in tile_extents.iter().enumerate() {
            if *extent <= T::zero() {
                return Err(DomainCreateError::NonPositiveTileExtent(dim));
            }
        }
        Ok(Self {
            datatype: T::DATATYPE,
            dim_num: tile_extents.len(),
            bounds: convert_to_bytes_vec(bounds),
            tile_extents: convert_to_bytes_vec(tile_extents),
        })
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

    /// Return the inclusive `[lo, hi]` bounds per dimension.
    ///
    /// # Errors
    /// Returns a [`DatatypeMismatchError`] if `T` does not match the domain
    /// datatype.
    pub fn bounds<T: Coordinate>(&self) -> Result<Vec<T>, DatatypeMismatchError> {
        self.check_datatype::<T>()?;
        Ok(convert_from_bytes_slice(&self.bounds))
    }

    /// Return the tile extent per dimension.
    ///
    /// # Errors
    /// Returns a [`DatatypeMismatchError`] if `T` does not match the domain
    /// datatype.
    pub fn tile_extents<T: Coordinate>(&self) -> Result<Vec<T>, DatatypeMismatchError> {
        self.check_datatype::<T>()?;
        Ok(convert_from_bytes_slice(&self.tile_extents))
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

/// Check whether the inclusive hyper-rectangles `a` and `b` overlap, and
/// whether `a` contains `b`.
///
/// Both rectangles are `[lo, hi]` pairs per dimension. Returns
/// `(overlap, a_contains_b)`.
#[must_use]
pub fn rect_overlap<T: Coordinate>(a: &[T], b: &[T]) -> (bool, bool) {
    debug_assert_eq!(a.len(), b.len());
    let mut overlap = true;
    let mut a_contains_b = true;
    for (a, b) in std::iter::zip(a.chunks_exact(2), b.chunks_exact(2)) {
        if a[0] > b[1] || a[1] < b[0] {
            overlap = false;
        }
        if b[0] < a[0] || b[1] > a[1] {
            a_contains_b = false;
        }
    }
    (overlap, overlap && a_contains_b)
}

/// Return the intersection of two inclusive hyper-rectangles, or [`None`]
/// if they do not overlap.
#[must_use]
pub fn rect_intersection<T: Coordinate>(a: &[T], b: &[T]) -> Option<Vec<T>> {
    debug_assert_eq!(a.len(), b.len());
    let mut out = Vec::with_capacity(a.len());
    for (a, b) in std::iter::zip(a.chunks_exact(2), b.chunks_exact(2)) {
        let lo = if a[0] > b[0] { a[0] } else { b[0] };
        let hi = if a[1] < b[1] { a[1] } else { b[1] };
        if lo > hi {
            return None;
        }
        out.push(lo);
        out.push(hi);
    }
    Some(out)
}

/// Return true if `coords` lies within the inclusive hyper-rectangle `rect`.
#[must_use]
pub fn rect_contains_coords<T: Coordinate>(rect: &[T], coords: &[T]) -> bool {
    debug_assert_eq!(rect.len(), 2 * coords.len());
    izip!(coords, rect.chunks_exact(2)).all(|(c, b)| *c >= b[0] && *c <= b[1])
}

/// Ravel ND indices to a linearised index over `shape` in `order`.
///
/// # Panics
/// Panics if `order` is [`Layout::GlobalOrder`].
#[must_use]
pub fn ravel_indices(indices: &[u64], shape: &[u64], order: Layout) -> u64 {
    debug_assert_eq!(indices.len(), shape.len());
    let mut index: u64 = 0;
    let mut count = 1;
    match order {
        Layout::RowMajor => {
            for (i, s) in std::iter::zip(indices, shape).rev() {
                index += i * count;
                count *= s;
            }
        }
        Layout::ColMajor => {
            for (i, s) in std::iter::zip(indices, shape) {
                index += i * count;
                count *= s;
            }
        }
        Layout::GlobalOrder => panic!("ravel_indices requires a row-major or col-major order"),
    }
    index
}

/// Unravel a linearised index over `shape` in `order` to ND indices.
///
/// # Panics
/// Panics if `order` is [`Layout::GlobalOrder`].
#[must_use]
pub fn unravel_index(mut index: u64, shape: &[u64], order: Layout) -> Vec<u64> {
    let mut indices = vec![0; shape.len()];
    match order {
        Layout::RowMajor => {
            for (i, s) in std::iter::zip(indices.iter_mut(), shape).rev() {
                *i = index % s;
                index /= s;
            }
        }
        Layout::ColMajor => {
            for (i, s) in std::iter::zip(indices.iter_mut(), shape) {
                *i = index % s;
                index /= s;
            }
        }
        Layout::GlobalOrder => panic!("unravel_index requires a row-major or col-major order"),
    }
    indices
}

/// Return the number of unit cells spanned by the tile extent `extent`.
#[must_use]
pub fn tile_extent_cells<T: Coordinate>(extent: T) -> u64 {
    extent.offset_from(T::zero())
}

/// Return the tile coordinates of the cell at `coords` in a domain with
/// inclusive `bounds` and `tile_extents`.
#[must_use]
pub fn tile_coords_of<T: Coordinate>(coords: &[T], bounds: &[T], tile_extents: &[T]) -> Vec<u64> {
    izip!(coords, bounds.chunks_exact(2), tile_extents)
        .map(|(c, b, e)| c.tile_index(b[0], *e))
        .collect()
}

/// Return the inclusive bounds of the tile at `tile_coords` in a domain
/// with inclusive `bounds` and `tile_extents`, clamped to the domain.
#[must_use]
pub fn tile_bounds<T: Coordinate>(tile_coords: &[u64], bounds: &[T], tile_extents: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(bounds.len());
    for (tc, b, e) in izip!(tile_coords, bounds.chunks_exact(2), tile_extents) {
        let cells = tile_extent_cells(*e);
        let lo = b[0].add_offset(tc * cells);
        let hi = lo.add_offset(cells - 1);
        out.push(lo);
        out.push(if hi < b[1] { hi } else { b[1] });
    }
    out
}

/// Return the position of `coords` within the tile anchored at `tile_lo`
/// with per-dimension cell counts `tile_shape`, under `cell_order`.
#[must_use]
pub fn cell_pos_in_tile<T: Coordinate>(
    coords: &[T],
    tile_lo: &[T],
    tile_shape: &[u64],
    cell_order: Layout,
) -> u64 {
    let rel: Vec<u64> = std::iter::zip(coords, tile_lo)
        .map(|(c, lo)| c.offset_from(*lo))
        .collect();
    ravel_indices(&rel, tile_shape, cell_order)
}

/// Return the coordinates of `num` successive cells starting at `start`,
/// advancing along dimension `dim`.
#[must_use]
pub fn slab_coords<T: Coordinate>(start: &[T], num: u64, dim: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(start.len() * usize::try_from(num).unwrap_or(0));
    for k in 0..num {
        for (d, c) in start.iter().enumerate() {
            out.push(if d == dim { c.add_offset(k) } else { *c });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_create() {
        assert!(Domain::new::<i32>(&[1, 10, 1, 20], &[5, 5]).is_ok());
        assert!(matches!(
            Domain::new::<i32>(&[], &[]),
            Err(DomainCreateError::ZeroDimensions)
        ));
        assert!(matches!(
            Domain::new::<i32>(&[1, 10], &[5, 5]),
            Err(DomainCreateError::IncompatibleBoundsLength(2, 2))
        ));
        assert!(matches!(
            Domain::new::<i32>(&[10, 1], &[5]),
            Err(DomainCreateError::InvertedBounds(0))
        ));
        assert!(matches!(
            Domain::new::<i32>(&[1, 10], &[0]),
            Err(DomainCreateError::NonPositiveTileExtent(0))
        ));
        assert!(matches!(
            Domain::new::<f64>(&[1.0, f64::INFINITY], &[5.0]),
            Err(DomainCreateError::NonFinite)
        ));

        let domain = Domain::new::<i32>(&[1, 10, 1, 20], &[5, 10]).unwrap();
        assert_eq!(domain.datatype(), Datatype::Int32);
        assert_eq!(domain.dim_num(), 2);
        assert_eq!(domain.bounds::<i32>().unwrap(), vec![1, 10, 1, 20]);
        assert_eq!(domain.tile_extents::<i32>().unwrap(), vec![5, 10]);
        assert!(domain.bounds::<i64>().is_err());
    }

    #[test]
    fn rect_math() {
        let a = [1i32, 10, 1, 10];
        let b = [3i32, 5, 2, 4];
        assert_eq!(rect_overlap(&a, &b), (true, true));
        assert_eq!(rect_overlap(&b, &a), (true, false));
        assert_eq!(rect_overlap(&a, &[11i32, 12, 1, 2]), (false, false));
        assert_eq!(
            rect_intersection(&a, &[5i32, 15, 0, 3]),
            Some(vec![5, 10, 1, 3])
        );
        assert_eq!(rect_intersection(&a, &[11i32, 12, 1, 2]), None);
        assert!(rect_contains_coords(&a, &[1i32, 10]));
        assert!(!rect_contains_coords(&a, &[0i32, 10]));
    }

    #[test]
    fn ravel_unravel() {
        // 0  1  2  3
        // 4  5  6  7
        // 8  9 10 11
        assert_eq!(ravel_indices(&[1, 2], &[3, 4], Layout::RowMajor), 6);
        assert_eq!(ravel_indices(&[1, 2], &[3, 4], Layout::ColMajor), 7);
        assert_eq!(unravel_index(6, &[3, 4], Layout::RowMajor), vec![1, 2]);
        assert_eq!(unravel_index(7, &[3, 4], Layout::ColMajor), vec![1, 2]);
        for pos in 0..12 {
            assert_eq!(
                ravel_indices(&unravel_index(pos, &[3, 4], Layout::RowMajor), &[3, 4], Layout::RowMajor),
                pos
            );
        }
    }

    #[test]
    fn tile_math() {
        let bounds = [1i32, 10, 1, 20];
        let extents = [5i32, 10];
        assert_eq!(tile_coords_of(&[3i32, 12], &bounds, &extents), vec![0, 1]);
        assert_eq!(tile_coords_of(&[6i32, 10], &bounds, &extents), vec![1, 0]);
        assert_eq!(tile_bounds(&[0, 1], &bounds, &extents), vec![1, 5, 11, 20]);
        assert_eq!(tile_bounds(&[1, 0], &bounds, &extents), vec![6, 10, 1, 10]);
        // Clamped to the domain upper bound.
        let bounds = [1i32, 8];
        assert_eq!(tile_bounds(&[1], &bounds, &[5i32]), vec![6, 8]);
        assert_eq!(
            cell_pos_in_tile(&[7i32, 13], &[6, 11], &[5, 10], Layout::RowMajor),
            12
        );
        assert_eq!(
            cell_pos_in_tile(&[7i32, 13], &[6, 11], &[5, 10], Layout::ColMajor),
            11
        );
    }

    #[test]
    fn slab_fill() {
        assert_eq!(
            slab_coords(&[3i32, 1], 3, 1),
            vec![3, 1, 3, 2, 3, 3]
        );
        assert_eq!(
            slab_coords(&[3i32, 1], 3, 0),
            vec![3, 1, 4, 1, 5, 1]
        );
    }
}
