//! Query subarrays.
//!
//! A [`Subarray`] is a hyper-rectangle in the index domain of an array,
//! stored as raw native-endian bytes of its datatype so that the reader can
//! carry subarrays and their partitions without being generic over the
//! domain type.

use thiserror::Error;

use crate::datatype::{
    convert_from_bytes_slice, convert_to_bytes_vec, Coordinate, Datatype, DatatypeMismatchError,
    with_coordinate,
};

/// A query subarray.
///
/// Bounds are inclusive `[lo, hi]` pairs per dimension, in dimension order.
#[derive(Clone, PartialEq, Debug)]
pub struct Subarray {
    datatype: Datatype,
    dim_num: usize,
    bounds: Vec<u8>,
}

/// A subarray creation error.
#[derive(Copy, Clone, Debug, Error)]
pub enum SubarrayCreateError {
    /// An empty or odd-length bounds list.
    #[error("subarray bounds must be non-empty [lo, hi] pairs, got {_0} values")]
    IncompatibleBoundsLength(usize),
    /// A non-finite bound.
    #[error("subarray bounds must be finite")]
    NonFinite,
    /// A lower bound exceeds its upper bound.
    #[error("subarray lower bound exceeds upper bound in dimension {_0}")]
    InvertedBounds(usize),
}

impl Subarray {
    /// Create a new subarray from inclusive `[lo, hi]` bounds per dimension.
    ///
    /// # Errors
    /// Returns a [`SubarrayCreateError`] if `bounds` is empty or of odd
    /// length, contains a non-finite value, or has a lower bound exceeding
    /// its upper bound.
    pub fn new<T: Coordinate>(bounds: &[T]) -> Result<Self, SubarrayCreateError> {
        if bounds.is_empty() || bounds.len() % 2 != 0 {
            return Err(SubarrayCreateError::IncompatibleBoundsLength(bounds.len()));
        }
        if bounds.iter().any(|v| !v.is_finite()) {
            return Err(SubarrayCreateError::NonFinite);
        }
        for (dim, pair) in bounds.chunks_exact(2).enumerate() {
            if pair[0] > pair[1] {
                return Err(SubarrayCreateError::InvertedBounds(dim));
            }
        }
        Ok(unsafe { Self::new_unchecked(bounds) })
    }

    /// Create a new subarray from inclusive `[lo, hi]` bounds per dimension.
    ///
    /// # Safety
    /// `bounds` must be non-empty `[lo, hi]` pairs of finite values with
    /// `lo <= hi`.
    #[must_use]
    pub unsafe fn new_unchecked<T: Coordinate>(bounds: &[T]) -> Self {
        debug_assert!(!bounds.is_empty() && bounds.len() % 2 == 0);
        Self {
            datatype: T::DATATYPE,
            dim_num: bounds.len() / 2,
            bounds: convert_to_bytes_vec(bounds),
        }
    }

    /// Return the subarray datatype.
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
    /// Returns a [`DatatypeMismatchError`] if `T` does not match the
    /// subarray datatype.
    pub fn to_vec<T: Coordinate>(&self) -> Result<Vec<T>, DatatypeMismatchError> {
        if T::DATATYPE == self.datatype {
            Ok(convert_from_bytes_slice(&self.bounds))
        } else {
            Err(DatatypeMismatchError {
                got: T::DATATYPE,
                expected: self.datatype,
            })
        }
    }
}

impl core::fmt::Display for Subarray {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        with_coordinate!(
            self.datatype,
            |T| {
                let bounds = convert_from_bytes_slice::<T>(&self.bounds);
                let mut first = true;
                for pair in bounds.chunks_exact(2) {
                    if !first {
                        write!(f, " x ")?;
                    }
                    first = false;
                    write!(f, "[{}, {}]", pair[0], pair[1])?;
                }
                Ok(())
            },
            write!(f, "[invalid subarray datatype]")
        )
    }
}
