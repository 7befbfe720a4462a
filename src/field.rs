//! Gridded field data and the quantity it carries.
//!
//! # Layout
//! `data` is row-major over `(x, y, z)` with the component index varying
//! fastest:
//!
//! ```text
//! offset = ((x * ny + y) * nz + z) * n + c
//! ```
//!
//! The payload is an `Arc<[f64]>` so a cached field and every caller holding
//! it share one allocation.  It is never mutated after construction.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FieldError, Result};

/// Number of values stored per grid point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldQuantity {
    /// One entry per field position.
    Scalar,
    /// Three entries per field position.
    Vector,
}

impl FieldQuantity {
    #[inline]
    pub fn components(self) -> usize {
        match self {
            FieldQuantity::Scalar => 1,
            FieldQuantity::Vector => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldQuantity::Scalar => "scalar",
            FieldQuantity::Vector => "vector",
        }
    }
}

impl FromStr for FieldQuantity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scalar" => Ok(FieldQuantity::Scalar),
            "vector" => Ok(FieldQuantity::Vector),
            other    => Err(format!("unknown field quantity '{other}'")),
        }
    }
}

/// Raw three-dimensional field data.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldData {
    header:     String,
    dimensions: [usize; 3],
    size:       [f64; 3],
    data:       Arc<[f64]>,
}

impl FieldData {
    pub fn new(
        header:     impl Into<String>,
        dimensions: [usize; 3],
        size:       [f64; 3],
        data:       impl Into<Arc<[f64]>>,
    ) -> Self {
        Self {
            header: header.into(),
            dimensions,
            size,
            data: data.into(),
        }
    }

    pub fn header(&self) -> &str { &self.header }

    pub fn dimensions(&self) -> [usize; 3] { self.dimensions }

    /// Physical extent as `(x, y, z-or-thickness)`.
    pub fn size(&self) -> [f64; 3] { self.size }

    pub fn data(&self) -> &Arc<[f64]> { &self.data }

    /// Number of grid points, `nx * ny * nz`.
    pub fn points(&self) -> usize {
        self.dimensions.iter().product()
    }

    /// Flat offset of the first component of point `(x, y, z)`.
    #[inline]
    pub fn offset(&self, x: usize, y: usize, z: usize, components: usize) -> usize {
        let [_, ny, nz] = self.dimensions;
        ((x * ny + y) * nz + z) * components
    }

    /// Component slice at a grid point, or `None` outside the grid.
    pub fn value_at(&self, x: usize, y: usize, z: usize, quantity: FieldQuantity) -> Option<&[f64]> {
        let [nx, ny, nz] = self.dimensions;
        if x >= nx || y >= ny || z >= nz {
            return None;
        }
        let n = quantity.components();
        let start = self.offset(x, y, z, n);
        self.data.get(start..start + n)
    }

    /// Expected payload length for `quantity`, `None` on overflow.
    pub fn expected_len(dimensions: [usize; 3], quantity: FieldQuantity) -> Option<usize> {
        dimensions
            .iter()
            .try_fold(quantity.components(), |acc, &d| acc.checked_mul(d))
    }

    /// Check that the payload length matches dimensions × component count.
    pub fn validate(&self, quantity: FieldQuantity) -> Result<()> {
        let expected = Self::expected_len(self.dimensions, quantity).ok_or_else(|| {
            FieldError::MalformedHeader(format!("dimensions {:?} overflow", self.dimensions))
        })?;
        if self.data.len() != expected {
            return Err(FieldError::SizeMismatch { expected, found: self.data.len() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_is_row_major_component_fastest() {
        let data: Vec<f64> = (0..2 * 3 * 4 * 3).map(|v| v as f64).collect();
        let f = FieldData::new("h", [2, 3, 4], [1.0, 1.0, 1.0], data);
        assert_eq!(f.offset(1, 2, 3, 3), ((1 * 3 + 2) * 4 + 3) * 3);
        assert_eq!(f.value_at(1, 2, 3, FieldQuantity::Vector), Some(&[69.0, 70.0, 71.0][..]));
        assert_eq!(f.value_at(2, 0, 0, FieldQuantity::Vector), None);
    }

    #[test]
    fn test_validate_reports_mismatch() {
        let f = FieldData::new("h", [2, 2, 1], [1.0, 1.0, 1.0], vec![0.0; 4]);
        assert!(f.validate(FieldQuantity::Scalar).is_ok());
        match f.validate(FieldQuantity::Vector) {
            Err(FieldError::SizeMismatch { expected, found }) => {
                assert_eq!(expected, 12);
                assert_eq!(found, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_quantity_from_str() {
        assert_eq!("Vector".parse::<FieldQuantity>(), Ok(FieldQuantity::Vector));
        assert_eq!("scalar".parse::<FieldQuantity>(), Ok(FieldQuantity::Scalar));
        assert!("tensor".parse::<FieldQuantity>().is_err());
    }

    #[test]
    fn test_clones_share_payload() {
        let f = FieldData::new("h", [1, 1, 1], [1.0, 1.0, 1.0], vec![3.0]);
        let g = f.clone();
        assert!(Arc::ptr_eq(f.data(), g.data()));
    }
}
