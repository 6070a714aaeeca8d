// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::types::{variant::Variant, variant_type_id::*, StatusCode};

/// An array of values of one type, with optional dimensions when it is a matrix.
///
/// `values` of `None` is a null array, which is distinct from an empty one. Multi dimension
/// values are flattened with the higher rank dimensions first, so an array with dimensions
/// [2,2,2] is stored as [0,0,0], [0,0,1], [0,1,0], [0,1,1], [1,0,0], [1,0,1], [1,1,0], [1,1,1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Array {
    pub value_type: VariantTypeId,
    pub values: Option<Vec<Variant>>,
    pub dimensions: Option<Vec<u32>>,
}

impl Array {
    pub fn new_single<V>(value_type: VariantTypeId, values: V) -> Result<Array, StatusCode>
    where
        V: Into<Vec<Variant>>,
    {
        let array = Array {
            value_type,
            values: Some(values.into()),
            dimensions: None,
        };
        array.validate().map(|_| array)
    }

    pub fn new_multi<V, D>(
        value_type: VariantTypeId,
        values: V,
        dimensions: D,
    ) -> Result<Array, StatusCode>
    where
        V: Into<Vec<Variant>>,
        D: Into<Vec<u32>>,
    {
        let array = Array {
            value_type,
            values: Some(values.into()),
            dimensions: Some(dimensions.into()),
        };
        array.validate().map(|_| array)
    }

    /// A null array of the type
    pub fn null(value_type: VariantTypeId) -> Array {
        Array {
            value_type,
            values: None,
            dimensions: None,
        }
    }

    pub fn is_null(&self) -> bool {
        self.values.is_none()
    }

    pub fn len(&self) -> usize {
        self.values.as_ref().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> &[Variant] {
        self.values.as_deref().unwrap_or(&[])
    }

    pub fn has_dimensions(&self) -> bool {
        self.dimensions.as_ref().map(|d| !d.is_empty()).unwrap_or(false)
    }

    pub fn encoding_mask(&self) -> u8 {
        let mut encoding_mask = self.value_type.encoding_mask() | EncodingMask::ARRAY_VALUES_BIT;
        if self.has_dimensions() {
            encoding_mask |= EncodingMask::ARRAY_DIMENSIONS_BIT;
        }
        encoding_mask
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Checks the element type, that nothing is nested and the dimensions cover every value
    pub fn validate(&self) -> Result<(), StatusCode> {
        if self.value_type == VariantTypeId::Empty {
            error!("Invalid array type supplied");
            return Err(StatusCode::BadDecodingError);
        }
        let values = self.values();
        if values.iter().any(|v| matches!(v, Variant::Array(_))) {
            error!("Variant array contains nested array");
            return Err(StatusCode::BadDecodingError);
        }
        // Variant typed arrays hold any mix of scalar variants
        if self.value_type != VariantTypeId::Variant
            && values.iter().any(|v| v.type_id() != self.value_type)
        {
            error!(
                "Variant array's type is expected to be {:?} but found other types in it",
                self.value_type
            );
            return Err(StatusCode::BadDecodingError);
        }
        if let Some(ref dimensions) = self.dimensions {
            let mut length = 1usize;
            for d in dimensions {
                length = length
                    .checked_mul(*d as usize)
                    .ok_or(StatusCode::BadDecodingError)?;
            }
            if !dimensions.is_empty() && length != values.len() {
                error!(
                    "Array dimensions {:?} do not match array length {}",
                    dimensions,
                    values.len()
                );
                return Err(StatusCode::BadDecodingError);
            }
        }
        Ok(())
    }
}
