//! Array schemas.
//!
//! An [`ArraySchema`] describes the logical shape of an array: whether it is
//! dense or sparse, its [`Domain`] (dimension bounds and tile extents), the
//! cell and tile orders, and its [`Attribute`] list.

pub mod attribute;
pub mod domain;

pub use attribute::{Attribute, AttributeCreateError, AttributeId, CellValNum};
pub use domain::{Domain, DomainCreateError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::datatype::Datatype;

/// The name under which the cell coordinates participate in a read query as
/// a pseudo-attribute.
pub const COORDS_NAME: &str = "__coords";

/// The kind of an array.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum ArrayType {
    /// Every cell in the domain exists; unwritten cells read as fill values.
    Dense,
    /// Only written cells exist.
    Sparse,
}

/// An ordering of cells.
///
/// Schemas use [`Layout::RowMajor`] or [`Layout::ColMajor`] for their cell
/// and tile orders; read queries may additionally request
/// [`Layout::GlobalOrder`] (tile order outermost, cell order within tiles).
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum Layout {
    /// The last dimension varies fastest.
    RowMajor,
    /// The first dimension varies fastest.
    ColMajor,
    /// The array global order: tile order outermost, cell order innermost.
    GlobalOrder,
}

/// An array schema.
#[derive(Clone, Debug)]
pub struct ArraySchema {
    array_type: ArrayType,
    domain: Domain,
    cell_order: Layout,
    tile_order: Layout,
    attributes: Vec<Attribute>,
}

/// An array schema creation error.
#[derive(Clone, Debug, Error)]
pub enum ArraySchemaCreateError {
    /// A cell or tile order of [`Layout::GlobalOrder`].
    #[error("cell and tile orders must be row-major or col-major")]
    InvalidOrder,
    /// A dense array with a non-integer domain.
    #[error("dense arrays require an integer domain, got {_0}")]
    NonIntegerDenseDomain(Datatype),
    /// An empty attribute list.
    #[error("array schema must have at least one attribute")]
    NoAttributes,
    /// A duplicate or reserved attribute name.
    #[error("invalid attribute name {_0}")]
    InvalidAttributeName(String),
}

impl ArraySchema {
    /// Create a new array schema.
    ///
    /// # Errors
    /// Returns an [`ArraySchemaCreateError`] if the cell or tile order is
    /// [`Layout::GlobalOrder`], the array is dense with a non-integer
    /// domain, the attribute list is empty, or an attribute name is
    /// duplicated or reserved.
    pub fn new(
        array_type: ArrayType,
        domain: Domain,
        cell_order: Layout,
        tile_order: Layout,
        attributes: Vec<Attribute>,
    ) -> Result<Self, ArraySchemaCreateError> {
        if cell_order == Layout::GlobalOrder || tile_order == Layout::GlobalOrder {
            return Err(ArraySchemaCreateError::InvalidOrder);
        }
        if array_type == ArrayType::Dense && !domain.datatype().is_integer() {
            return Err(ArraySchemaCreateError::NonIntegerDenseDomain(
                domain.datatype(),
            ));
        }
        if attributes.is_empty() {
            return Err(ArraySchemaCreateError::NoAttributes);
        }
        for (i, attribute) in attributes.iter().enumerate() {
            let name = attribute.name();
            if name == COORDS_NAME
                || attributes[..i].iter().any(|a| a.name() == name)
            {
                return Err(ArraySchemaCreateError::InvalidAttributeName(
                    name.to_string(),
                ));
            }
        }
        Ok(Self {
            array_type,
            domain,
            cell_order,
            tile_order,
            attributes,
        })
    }

    /// Return the array type.
    #[must_use]
    pub fn array_type(&self) -> ArrayType {
        self.array_type
    }

    /// Return true if the array is dense.
    #[must_use]
    pub fn dense(&self) -> bool {
        self.array_type == ArrayType::Dense
    }

    /// Return the domain.
    #[must_use]
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Return the number of dimensions.
    #[must_use]
    pub fn dim_num(&self) -> usize {
        self.domain.dim_num()
    }

    /// Return the cell order within tiles.
    #[must_use]
    pub fn cell_order(&self) -> Layout {
        self.cell_order
    }

    /// Return the order of tiles in the array global order.
    #[must_use]
    pub fn tile_order(&self) -> Layout {
        self.tile_order
    }

    /// Return the attributes.
    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Return the number of attributes (excluding the coordinates
    /// pseudo-attribute).
    #[must_use]
    pub fn attribute_num(&self) -> usize {
        self.attributes.len()
    }

    /// Return the identifier of the attribute named `name`, or
    /// [`AttributeId::COORDS`] for [`COORDS_NAME`].
    #[must_use]
    pub fn attribute_id(&self, name: &str) -> Option<AttributeId> {
        if name == COORDS_NAME {
            Some(AttributeId::COORDS)
        } else {
            self.attributes
                .iter()
                .position(|a| a.name() == name)
                .map(AttributeId)
        }
    }

    /// Return the attribute with identifier `id`, or [`None`] for the
    /// coordinates pseudo-attribute or an out of range identifier.
    #[must_use]
    pub fn attribute(&self, id: AttributeId) -> Option<&Attribute> {
        id.index().and_then(|i| self.attributes.get(i))
    }

    /// Return the size in bytes of one cell's coordinates.
    #[must_use]
    pub fn coords_size(&self) -> u64 {
        self.domain.dim_num() as u64 * self.domain.datatype().size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fill_value::FillValue;

    fn attribute() -> Attribute {
        Attribute::new("a", Datatype::Int32, FillValue::from(-1i32)).unwrap()
    }

    #[test]
    fn schema_create() {
        let domain = Domain::new::<i32>(&[1, 10], &[5]).unwrap();
        let schema = ArraySchema::new(
            ArrayType::Dense,
            domain.clone(),
            Layout::RowMajor,
            Layout::RowMajor,
            vec![attribute()],
        )
        .unwrap();
        assert!(schema.dense());
        assert_eq!(schema.dim_num(), 1);
        assert_eq!(schema.attribute_num(), 1);
        assert_eq!(schema.coords_size(), 4);
        assert_eq!(schema.attribute_id("a"), Some(AttributeId(0)));
        assert_eq!(schema.attribute_id(COORDS_NAME), Some(AttributeId::COORDS));
        assert_eq!(schema.attribute_id("b"), None);
        assert!(schema.attribute(AttributeId(0)).is_some());
        assert!(schema.attribute(AttributeId::COORDS).is_none());

        assert!(matches!(
            ArraySchema::new(
                ArrayType::Dense,
                domain.clone(),
                Layout::GlobalOrder,
                Layout::RowMajor,
                vec![attribute()],
            ),
            Err(ArraySchemaCreateError::InvalidOrder)
        ));
        assert!(matches!(
            ArraySchema::new(
                ArrayType::Dense,
                domain.clone(),
                Layout::RowMajor,
                Layout::RowMajor,
                vec![],
            ),
            Err(ArraySchemaCreateError::NoAttributes)
        ));
        assert!(matches!(
            ArraySchema::new(
                ArrayType::Dense,
                domain,
                Layout::RowMajor,
                Layout::RowMajor,
                vec![attribute(), attribute()],
            ),
            Err(ArraySchemaCreateError::InvalidAttributeName(_))
        ));
    }

    #[test]
    fn schema_dense_requires_integer_domain() {
        let domain = Domain::new::<f64>(&[0.0, 1.0], &[0.5]).unwrap();
        assert!(matches!(
            ArraySchema::new(
                ArrayType::Dense,
                domain.clone(),
                Layout::RowMajor,
                Layout::RowMajor,
                vec![attribute()],
            ),
            Err(ArraySchemaCreateError::NonIntegerDenseDomain(
                Datatype::Float64
            ))
        ));
        assert!(ArraySchema::new(
            ArrayType::Sparse,
            domain,
            Layout::RowMajor,
            Layout::RowMajor,
            vec![attribute()],
        )
        .is_ok());
    }

    #[test]
    fn layout_serde() {
        let json = serde_json::to_string(&Layout::RowMajor).unwrap();
        assert_eq!(serde_json::from_str::<Layout>(&json).unwrap(), Layout::RowMajor);
    }
}
