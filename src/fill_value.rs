//! Attribute fill values.
//!
//! A [`FillValue`] provides the value returned for cells of a dense array
//! that no fragment has written.

/// The fill value of an attribute.
///
/// Stores the native-endian bytes of one cell value. For variable-sized
/// attributes the fill value is the byte sequence emitted for each unwritten
/// cell.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct FillValue(Vec<u8>);

impl core::fmt::Display for FillValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl From<Vec<u8>> for FillValue {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for FillValue {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

macro_rules! fill_value_from_primitive {
    ($type:ty) => {
        impl From<$type> for FillValue {
            fn from(value: $type) -> Self {
                Self(value.to_ne_bytes().to_vec())
            }
        }
    };
}

fill_value_from_primitive!(u8);
fill_value_from_primitive!(u16);
fill_value_from_primitive!(u32);
fill_value_from_primitive!(u64);
fill_value_from_primitive!(i8);
fill_value_from_primitive!(i16);
fill_value_from_primitive!(i32);
fill_value_from_primitive!(i64);
fill_value_from_primitive!(f32);
fill_value_from_primitive!(f64);

impl FillValue {
    /// Create a new fill value from `bytes`.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Return the byte representation of the fill value.
    #[must_use]
    pub fn as_ne_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Return the size of the fill value in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_value_from_primitives() {
        assert_eq!(FillValue::from(-1i32).as_ne_bytes(), (-1i32).to_ne_bytes());
        assert_eq!(FillValue::from(1.5f64).as_ne_bytes(), 1.5f64.to_ne_bytes());
        assert_eq!(FillValue::from(0u8).size(), 1);
        assert_eq!(FillValue::from(vec![1, 2, 3]).size(), 3);
        assert_eq!(
            FillValue::new(vec![0, 1]),
            FillValue::from([0u8, 1u8].as_slice())
        );
    }
}
