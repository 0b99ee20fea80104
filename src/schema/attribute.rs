//! Array attributes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{datatype::Datatype, fill_value::FillValue};

/// The number of values stored per cell of an attribute.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum CellValNum {
    /// A fixed number of values per cell (at least one).
    Fixed(u64),
    /// A variable number of values per cell.
    Var,
}

/// A named value column of an array.
#[derive(Clone, Debug)]
pub struct Attribute {
    name: String,
    datatype: Datatype,
    cell_val_num: CellValNum,
    fill_value: FillValue,
}

/// An attribute creation error.
#[derive(Clone, Debug, Error)]
pub enum AttributeCreateError {
    /// A fixed cell value number of zero.
    #[error("attribute {_0} has a fixed cell value number of zero")]
    ZeroCellValNum(String),
    /// The fill value size does not match the cell size.
    #[error("attribute {name} fill value has {fill_size} bytes, expected {cell_size}")]
    IncompatibleFillValue {
        /// The attribute name.
        name: String,
        /// The size of the given fill value in bytes.
        fill_size: usize,
        /// The fixed cell size of the attribute in bytes.
        cell_size: u64,
    },
}

impl Attribute {
    /// Create a new fixed-size attribute holding one value per cell.
    ///
    /// # Errors
    /// Returns an [`AttributeCreateError`] if the fill value size does not
    /// match the datatype size.
    pub fn new(
        name: impl Into<String>,
        datatype: Datatype,
        fill_value: FillValue,
    ) -> Result<Self, AttributeCreateError> {
        Self::new_with_cell_val_num(name, datatype, CellValNum::Fixed(1), fill_value)
    }

    /// Create a new variable-sized attribute.
    ///
    /// The fill value is the byte sequence emitted for each unwritten cell.
    #[must_use]
    pub fn new_var(name: impl Into<String>, datatype: Datatype, fill_value: FillValue) -> Self {
        Self {
            name: name.into(),
            datatype,
            cell_val_num: CellValNum::Var,
            fill_value,
        }
    }

    /// Create a new attribute with an explicit [`CellValNum`].
    ///
    /// # Errors
    /// Returns an [`AttributeCreateError`] if the cell value number is
    /// `Fixed(0)` or a fixed-size fill value does not match the cell size.
    pub fn new_with_cell_val_num(
        name: impl Into<String>,
        datatype: Datatype,
        cell_val_num: CellValNum,
        fill_value: FillValue,
    ) -> Result<Self, AttributeCreateError> {
        let name = name.into();
        if let CellValNum::Fixed(n) = cell_val_num {
            if n == 0 {
                return Err(AttributeCreateError::ZeroCellValNum(name));
            }
            let cell_size = n * datatype.size();
            if fill_value.size() as u64 != cell_size {
                return Err(AttributeCreateError::IncompatibleFillValue {
                    name,
                    fill_size: fill_value.size(),
                    cell_size,
                });
            }
        }
        Ok(Self {
            name,
            datatype,
            cell_val_num,
            fill_value,
        })
    }

    /// Return the attribute name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the attribute datatype.
    #[must_use]
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// Return the number of values per cell.
    #[must_use]
    pub fn cell_val_num(&self) -> CellValNum {
        self.cell_val_num
    }

    /// Return true if the attribute is variable-sized.
    #[must_use]
    pub fn is_var(&self) -> bool {
        matches!(self.cell_val_num, CellValNum::Var)
    }

    /// Return the cell size in bytes, or [`None`] for a variable-sized
    /// attribute.
    #[must_use]
    pub fn cell_size(&self) -> Option<u64> {
        match self.cell_val_num {
            CellValNum::Fixed(n) => Some(n * self.datatype.size()),
            CellValNum::Var => None,
        }
    }

    /// Return the fill value.
    #[must_use]
    pub fn fill_value(&self) -> &FillValue {
        &self.fill_value
    }
}

/// A compact identifier of an attribute within an [`ArraySchema`](super::ArraySchema).
///
/// The cell coordinates participate in reads as a pseudo-attribute with the
/// reserved identifier [`AttributeId::COORDS`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct AttributeId(pub(crate) usize);

impl AttributeId {
    /// The reserved identifier of the cell coordinates pseudo-attribute.
    pub const COORDS: Self = Self(usize::MAX);

    /// Return true if this is the coordinates pseudo-attribute.
    #[must_use]
    pub fn is_coords(self) -> bool {
        self == Self::COORDS
    }

    /// Return the index of the attribute in the schema attribute list, or
    /// [`None`] for the coordinates pseudo-attribute.
    #[must_use]
    pub fn index(self) -> Option<usize> {
        if self.is_coords() {
            None
        } else {
            Some(self.0)
        }
    }

    /// The tile slot of this attribute, with the coordinates pseudo-attribute
    /// occupying the last of `attribute_num + 1` slots.
    pub(crate) fn slot(self, attribute_num: usize) -> usize {
        if self.is_coords() {
            attribute_num
        } else {
            self.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_create() {
        let attr = Attribute::new("a", Datatype::Int32, FillValue::from(-1i32)).unwrap();
        assert_eq!(attr.name(), "a");
        assert_eq!(attr.datatype(), Datatype::Int32);
        assert_eq!(attr.cell_size(), Some(4));
        assert!(!attr.is_var());

        assert!(Attribute::new("a", Datatype::Int32, FillValue::from(0u8)).is_err());
        assert!(matches!(
            Attribute::new_with_cell_val_num(
                "a",
                Datatype::Int32,
                CellValNum::Fixed(0),
                FillValue::from(-1i32)
            ),
            Err(AttributeCreateError::ZeroCellValNum(_))
        ));

        let var = Attribute::new_var("v", Datatype::Char, FillValue::from(vec![b'?']));
        assert!(var.is_var());
        assert_eq!(var.cell_size(), None);
    }

    #[test]
    fn attribute_id_slots() {
        let id = AttributeId(1);
        assert_eq!(id.index(), Some(1));
        assert_eq!(id.slot(3), 1);
        assert!(AttributeId::COORDS.is_coords());
        assert_eq!(AttributeId::COORDS.index(), None);
        assert_eq!(AttributeId::COORDS.slot(3), 3);
    }
}
