//! Cell datatypes and generic coordinate arithmetic.
//!
//! A [`Datatype`] is the runtime tag shared by array domains, attribute
//! values, and tile payloads. The [`Coordinate`] trait covers the numeric
//! primitives a domain can use and carries the arithmetic the read path is
//! generic over: stepping, bisection for subarray partitioning, and the
//! tile/cell offset math used by dense reads.

use num::traits::float::FloatCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A cell datatype.
///
/// Domains are restricted to the numeric datatypes; [`Datatype::Char`] is
/// attribute-only (typically for variable-sized string attributes).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum Datatype {
    /// A signed 8-bit integer.
    Int8,
    /// A signed 16-bit integer.
    Int16,
    /// A signed 32-bit integer.
    Int32,
    /// A signed 64-bit integer.
    Int64,
    /// An unsigned 8-bit integer.
    UInt8,
    /// An unsigned 16-bit integer.
    UInt16,
    /// An unsigned 32-bit integer.
    UInt32,
    /// An unsigned 64-bit integer.
    UInt64,
    /// A 32-bit floating point number.
    Float32,
    /// A 64-bit floating point number.
    Float64,
    /// An 8-bit character.
    Char,
}

impl Datatype {
    /// Return the size of one value of this datatype in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        match self {
            Self::Int8 | Self::UInt8 | Self::Char => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Return true if this is a signed or unsigned integer datatype.
    #[must_use]
    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
        )
    }

    /// Return true if this is a floating point datatype.
    #[must_use]
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Return the identifier of the datatype.
    #[must_use]
    pub const fn identifier(&self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Char => "char",
        }
    }
}

impl core::fmt::Display for Datatype {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

/// A datatype mismatch error.
///
/// Returned by typed accessors when the requested Rust type does not match
/// the runtime [`Datatype`].
#[derive(Copy, Clone, Debug, Error)]
#[error("datatype mismatch: got {got}, expected {expected}")]
pub struct DatatypeMismatchError {
    /// The datatype of the typed access.
    pub got: Datatype,
    /// The datatype of the underlying data.
    pub expected: Datatype,
}

/// A numeric primitive usable as an array domain coordinate.
///
/// Implemented for the eight integer primitives and `f32`/`f64`. The
/// `offset_from`/`add_offset`/`cell_extent` helpers follow floor semantics;
/// they are exact for integer domains, which are the only domains dense
/// arrays admit (see [`ArraySchema::new`](crate::schema::ArraySchema::new)).
pub trait Coordinate:
    bytemuck::Pod
    + PartialOrd
    + PartialEq
    + Copy
    + Send
    + Sync
    + core::fmt::Display
    + core::fmt::Debug
    + num::Zero
    + 'static
{
    /// The runtime tag corresponding to `Self`.
    const DATATYPE: Datatype;

    /// Return true if the value is finite (always true for integers).
    fn is_finite(self) -> bool;

    /// The smallest representable value greater than `self` (saturating).
    fn step_up(self) -> Self;

    /// The largest representable value smaller than `self` (saturating).
    fn step_down(self) -> Self;

    /// A midpoint of the inclusive interval `[lo, hi]` suitable for
    /// bisection: `lo <= midpoint < hi` whenever `lo < hi`.
    fn midpoint(lo: Self, hi: Self) -> Self;

    /// The index of the tile containing `self`, for tiles of size `extent`
    /// anchored at `lo`: `floor((self - lo) / extent)`.
    fn tile_index(self, lo: Self, extent: Self) -> u64;

    /// The number of whole unit cells from `lo` to `self` (floor).
    fn offset_from(self, lo: Self) -> u64;

    /// `self` advanced by `offset` unit cells.
    fn add_offset(self, offset: u64) -> Self;

    /// The number of unit cells in the inclusive interval `[lo, hi]`.
    fn cell_extent(lo: Self, hi: Self) -> u64 {
        hi.offset_from(lo) + 1
    }
}

macro_rules! coordinate_integer {
    ($type:ty, $datatype:expr) => {
        impl Coordinate for $type {
            const DATATYPE: Datatype = $datatype;

            fn is_finite(self) -> bool {
                true
            }

            fn step_up(self) -> Self {
                self.saturating_add(1)
            }

            fn step_down(self) -> Self {
                self.saturating_sub(1)
            }

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            fn midpoint(lo: Self, hi: Self) -> Self {
                ((i128::from(lo) + i128::from(hi)).div_euclid(2)) as $type
            }

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            fn tile_index(self, lo: Self, extent: Self) -> u64 {
                ((i128::from(self) - i128::from(lo)) / i128::from(extent)) as u64
            }

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            fn offset_from(self, lo: Self) -> u64 {
                (i128::from(self) - i128::from(lo)) as u64
            }

            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            fn add_offset(self, offset: u64) -> Self {
                (i128::from(self) + i128::from(offset)) as $type
            }
        }
    };
}

coordinate_integer!(i8, Datatype::Int8);
coordinate_integer!(i16, Datatype::Int16);
coordinate_integer!(i32, Datatype::Int32);
coordinate_integer!(i64, Datatype::Int64);
coordinate_integer!(u8, Datatype::UInt8);
coordinate_integer!(u16, Datatype::UInt16);
coordinate_integer!(u32, Datatype::UInt32);
coordinate_integer!(u64, Datatype::UInt64);

macro_rules! coordinate_float {
    ($type:ty, $bits:ty, $datatype:expr) => {
        impl Coordinate for $type {
            const DATATYPE: Datatype = $datatype;

            fn is_finite(self) -> bool {
                FloatCore::is_finite(self)
            }

            fn step_up(self) -> Self {
                const SIGN: $bits = 1 << (<$bits>::BITS - 1);
                if FloatCore::is_nan(self) || self == <$type>::INFINITY {
                    return self;
                }
                let bits = self.to_bits();
                if bits & SIGN == 0 {
                    <$type>::from_bits(bits + 1)
                } else if bits == SIGN {
                    // -0.0 steps up to the smallest positive subnormal.
                    <$type>::from_bits(1)
                } else {
                    <$type>::from_bits(bits - 1)
                }
            }

            fn step_down(self) -> Self {
                const SIGN: $bits = 1 << (<$bits>::BITS - 1);
                if FloatCore::is_nan(self) || self == <$type>::NEG_INFINITY {
                    return self;
                }
                let bits = self.to_bits();
                if bits & SIGN != 0 {
                    <$type>::from_bits(bits + 1)
                } else if bits == 0 {
                    // 0.0 steps down to the largest negative subnormal.
                    <$type>::from_bits(SIGN | 1)
                } else {
                    <$type>::from_bits(bits - 1)
                }
            }

            fn midpoint(lo: Self, hi: Self) -> Self {
                let mid = lo + (hi - lo) / 2.0;
                if mid < hi {
                    mid
                } else {
                    lo
                }
            }

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            fn tile_index(self, lo: Self, extent: Self) -> u64 {
                FloatCore::floor((self - lo) / extent) as u64
            }

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            fn offset_from(self, lo: Self) -> u64 {
                FloatCore::floor(self - lo) as u64
            }

            #[allow(clippy::cast_precision_loss)]
            fn add_offset(self, offset: u64) -> Self {
                self + offset as $type
            }
        }
    };
}

coordinate_float!(f32, u32, Datatype::Float32);
coordinate_float!(f64, u64, Datatype::Float64);

/// Dispatch a generic expression on the [`Coordinate`] type matching a
/// [`Datatype`]; the fallback arm handles non-coordinate datatypes.
macro_rules! with_coordinate {
    ($datatype:expr, |$type:ident| $body:expr, $fallback:expr) => {
        match $datatype {
            $crate::datatype::Datatype::Int8 => {
                type $type = i8;
                $body
            }
            $crate::datatype::Datatype::Int16 => {
                type $type = i16;
                $body
            }
            $crate::datatype::Datatype::Int32 => {
                type $type = i32;
                $body
            }
            $crate::datatype::Datatype::Int64 => {
                type $type = i64;
                $body
            }
            $crate::datatype::Datatype::UInt8 => {
                type $type = u8;
                $body
            }
            $crate::datatype::Datatype::UInt16 => {
                type $type = u16;
                $body
            }
            $crate::datatype::Datatype::UInt32 => {
                type $type = u32;
                $body
            }
            $crate::datatype::Datatype::UInt64 => {
                type $type = u64;
                $body
            }
            $crate::datatype::Datatype::Float32 => {
                type $type = f32;
                $body
            }
            $crate::datatype::Datatype::Float64 => {
                type $type = f64;
                $body
            }
            $crate::datatype::Datatype::Char => $fallback,
        }
    };
}

pub(crate) use with_coordinate;

/// Convert from `&[u8]` to `Vec<T>`.
#[must_use]
pub fn convert_from_bytes_slice<T: bytemuck::Pod>(from: &[u8]) -> Vec<T> {
    bytemuck::allocation::pod_collect_to_vec(from)
}

/// Convert from `&[T]` to `Vec<u8>`.
#[must_use]
pub fn convert_to_bytes_vec<T: bytemuck::NoUninit>(from: &[T]) -> Vec<u8> {
    bytemuck::allocation::pod_collect_to_vec(from)
}

/// Transmute from `&[T]` to `&[u8]`.
#[must_use]
pub fn transmute_to_bytes<T: bytemuck::NoUninit>(from: &[T]) -> &[u8] {
    bytemuck::must_cast_slice(from)
}
