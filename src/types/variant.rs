// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `Variant`.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::types::{
    array::*,
    byte_string::ByteString,
    date_time::DateTime,
    encoding::*,
    extension_object::ExtensionObject,
    guid::Guid,
    localized_text::LocalizedText,
    node_id::{ExpandedNodeId, NodeId},
    qualified_name::QualifiedName,
    status_code::StatusCode,
    string::{UAString, XmlElement},
    variant_type_id::*,
    DataValue, DiagnosticInfo,
};

/// A `Variant` holds built-in OPC UA data types, including single and multi dimensional arrays,
/// data values and extension objects.
///
/// Larger types are boxed to keep the size of the enum down, since variants are moved around a
/// lot and are stored in arrays.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub enum Variant {
    /// Empty type has no value. It is equivalent to a Null value (part 6 5.1.6)
    #[default]
    Empty,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(UAString),
    DateTime(Box<DateTime>),
    Guid(Box<Guid>),
    StatusCode(StatusCode),
    ByteString(ByteString),
    XmlElement(XmlElement),
    QualifiedName(Box<QualifiedName>),
    LocalizedText(Box<LocalizedText>),
    NodeId(Box<NodeId>),
    ExpandedNodeId(Box<ExpandedNodeId>),
    ExtensionObject(Box<ExtensionObject>),
    Variant(Box<Variant>),
    DataValue(Box<DataValue>),
    DiagnosticInfo(Box<DiagnosticInfo>),
    /// Single or multi dimension array of one type. Nested arrays are rejected.
    Array(Box<Array>),
}

/// Whether a variant holds a scalar, a one dimensional array or a matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRank {
    Scalar,
    Array,
    Matrix,
}

macro_rules! from_scalar_impl {
    ( $t:ty, $variant:ident ) => {
        impl From<$t> for Variant {
            fn from(v: $t) -> Self {
                Variant::$variant(v)
            }
        }
    };
    ( $t:ty, $variant:ident, boxed ) => {
        impl From<$t> for Variant {
            fn from(v: $t) -> Self {
                Variant::$variant(Box::new(v))
            }
        }
    };
}

from_scalar_impl!(bool, Boolean);
from_scalar_impl!(i8, SByte);
from_scalar_impl!(u8, Byte);
from_scalar_impl!(i16, Int16);
from_scalar_impl!(u16, UInt16);
from_scalar_impl!(i32, Int32);
from_scalar_impl!(u32, UInt32);
from_scalar_impl!(i64, Int64);
from_scalar_impl!(u64, UInt64);
from_scalar_impl!(f32, Float);
from_scalar_impl!(f64, Double);
from_scalar_impl!(UAString, String);
from_scalar_impl!(StatusCode, StatusCode);
from_scalar_impl!(ByteString, ByteString);
from_scalar_impl!(DateTime, DateTime, boxed);
from_scalar_impl!(Guid, Guid, boxed);
from_scalar_impl!(QualifiedName, QualifiedName, boxed);
from_scalar_impl!(LocalizedText, LocalizedText, boxed);
from_scalar_impl!(NodeId, NodeId, boxed);
from_scalar_impl!(ExpandedNodeId, ExpandedNodeId, boxed);
from_scalar_impl!(ExtensionObject, ExtensionObject, boxed);
from_scalar_impl!(DataValue, DataValue, boxed);
from_scalar_impl!(DiagnosticInfo, DiagnosticInfo, boxed);
from_scalar_impl!(Array, Array, boxed);

impl From<()> for Variant {
    fn from(_: ()) -> Self {
        Variant::Empty
    }
}

impl<'a> From<&'a str> for Variant {
    fn from(value: &'a str) -> Self {
        Variant::String(UAString::from(value))
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::String(UAString::from(value))
    }
}

macro_rules! from_vec_impl {
    ( $t:ty, $type_id:ident ) => {
        impl From<Vec<$t>> for Variant {
            fn from(v: Vec<$t>) -> Self {
                Variant::Array(Box::new(Array {
                    value_type: VariantTypeId::$type_id,
                    values: Some(v.into_iter().map(Variant::from).collect()),
                    dimensions: None,
                }))
            }
        }

        impl<'a> From<&'a [$t]> for Variant {
            fn from(v: &'a [$t]) -> Self {
                Variant::from(v.to_vec())
            }
        }
    };
}

from_vec_impl!(bool, Boolean);
from_vec_impl!(i8, SByte);
from_vec_impl!(u8, Byte);
from_vec_impl!(i16, Int16);
from_vec_impl!(u16, UInt16);
from_vec_impl!(i32, Int32);
from_vec_impl!(u32, UInt32);
from_vec_impl!(i64, Int64);
from_vec_impl!(u64, UInt64);
from_vec_impl!(f32, Float);
from_vec_impl!(f64, Double);
from_vec_impl!(String, String);
from_vec_impl!(UAString, String);

macro_rules! try_from_variant_impl {
    ( $t:ty, $variant:ident ) => {
        impl TryFrom<&Variant> for $t {
            type Error = StatusCode;

            fn try_from(value: &Variant) -> Result<Self, Self::Error> {
                match value {
                    Variant::$variant(v) => Ok(v.clone()),
                    _ => Err(StatusCode::BadTypeMismatch),
                }
            }
        }

        impl TryFrom<&Variant> for Vec<$t> {
            type Error = StatusCode;

            fn try_from(value: &Variant) -> Result<Self, Self::Error> {
                match value {
                    Variant::Array(array) => array
                        .values()
                        .iter()
                        .map(<$t>::try_from)
                        .collect(),
                    _ => Err(StatusCode::BadTypeMismatch),
                }
            }
        }
    };
}

try_from_variant_impl!(bool, Boolean);
try_from_variant_impl!(i8, SByte);
try_from_variant_impl!(u8, Byte);
try_from_variant_impl!(i16, Int16);
try_from_variant_impl!(u16, UInt16);
try_from_variant_impl!(i32, Int32);
try_from_variant_impl!(u32, UInt32);
try_from_variant_impl!(i64, Int64);
try_from_variant_impl!(u64, UInt64);
try_from_variant_impl!(f32, Float);
try_from_variant_impl!(f64, Double);
try_from_variant_impl!(UAString, String);

/// Matches every variant, applying `$body` to the single value held by all but `Empty` and
/// `Array`.
macro_rules! on_value {
    ($value:expr, $v:ident => $body:expr, empty => $empty:expr, array => $array:expr) => {
        match $value {
            Variant::Empty => $empty,
            Variant::Array(_) => $array,
            Variant::Boolean($v) => $body,
            Variant::SByte($v) => $body,
            Variant::Byte($v) => $body,
            Variant::Int16($v) => $body,
            Variant::UInt16($v) => $body,
            Variant::Int32($v) => $body,
            Variant::UInt32($v) => $body,
            Variant::Int64($v) => $body,
            Variant::UInt64($v) => $body,
            Variant::Float($v) => $body,
            Variant::Double($v) => $body,
            Variant::String($v) => $body,
            Variant::DateTime($v) => $body,
            Variant::Guid($v) => $body,
            Variant::StatusCode($v) => $body,
            Variant::ByteString($v) => $body,
            Variant::XmlElement($v) => $body,
            Variant::QualifiedName($v) => $body,
            Variant::LocalizedText($v) => $body,
            Variant::NodeId($v) => $body,
            Variant::ExpandedNodeId($v) => $body,
            Variant::ExtensionObject($v) => $body,
            Variant::Variant($v) => $body,
            Variant::DataValue($v) => $body,
            Variant::DiagnosticInfo($v) => $body,
        }
    };
}

impl BinaryEncoder<Variant> for Variant {
    fn byte_len(&self) -> usize {
        1 + match self {
            Variant::Array(array) => {
                let mut size = 4 + array
                    .values()
                    .iter()
                    .map(|v| Variant::byte_len_element(v, array.value_type))
                    .sum::<usize>();
                if array.has_dimensions() {
                    size += byte_len_array(&array.dimensions);
                }
                size
            }
            value => Variant::byte_len_value(value),
        }
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        // Encoding mask includes the array bits if applicable
        let mut size = write_u8(stream, self.encoding_mask())?;
        size += match self {
            Variant::Array(array) => {
                let mut size = match array.values {
                    None => write_i32(stream, -1)?,
                    Some(ref values) => {
                        let mut size = write_i32(stream, values.len() as i32)?;
                        for value in values {
                            size += Variant::encode_element(stream, value, array.value_type)?;
                        }
                        size
                    }
                };
                if array.has_dimensions() {
                    // Dimensions are encoded as Int32 even though they are exposed as UInt32
                    size += write_array(stream, &array.dimensions)?;
                }
                size
            }
            value => Variant::encode_value(stream, value)?,
        };
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let encoding_mask = u8::decode(stream, decoding_options)?;
        let value_type = VariantTypeId::from_encoding_mask(encoding_mask)?;

        if encoding_mask & EncodingMask::ARRAY_VALUES_BIT == 0 {
            if encoding_mask & EncodingMask::ARRAY_DIMENSIONS_BIT != 0 {
                error!("Array dimensions bit specified without any values");
                return Err(StatusCode::BadDecodingError);
            }
            return Variant::decode_value(stream, value_type, decoding_options);
        }

        let array_length = i32::decode(stream, decoding_options)?;
        let values = if array_length == -1 {
            None
        } else if array_length < -1 {
            error!("Invalid array_length {}", array_length);
            return Err(StatusCode::BadDecodingError);
        } else if array_length as usize > decoding_options.max_array_length {
            error!(
                "Array length {} exceeds decoding limit {}",
                array_length, decoding_options.max_array_length
            );
            return Err(StatusCode::BadEncodingLimitsExceeded);
        } else {
            let mut values = Vec::with_capacity(array_length as usize);
            for _ in 0..array_length {
                values.push(Variant::decode_element(stream, value_type, decoding_options)?);
            }
            Some(values)
        };

        let dimensions = if encoding_mask & EncodingMask::ARRAY_DIMENSIONS_BIT != 0 {
            let dimensions: Option<Vec<i32>> = read_array(stream, decoding_options)?;
            match dimensions {
                Some(dimensions) if dimensions.iter().all(|d| *d > 0) => {
                    Some(dimensions.into_iter().map(|d| d as u32).collect())
                }
                _ => {
                    error!("Invalid array dimensions");
                    return Err(StatusCode::BadDecodingError);
                }
            }
        } else {
            None
        };

        let array = Array {
            value_type,
            values,
            dimensions,
        };
        // Validation rejects malformed data without panicking
        array.validate()?;
        Ok(Variant::Array(Box::new(array)))
    }
}

/// This implementation is mainly for debugging / convenience purposes, to eliminate some of the
/// noise in common types from using the Debug trait.
impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Variant::Empty => write!(f, "null"),
            Variant::SByte(v) => write!(f, "{}", v),
            Variant::Byte(v) => write!(f, "{}", v),
            Variant::Int16(v) => write!(f, "{}", v),
            Variant::UInt16(v) => write!(f, "{}", v),
            Variant::Int32(v) => write!(f, "{}", v),
            Variant::UInt32(v) => write!(f, "{}", v),
            Variant::Int64(v) => write!(f, "{}", v),
            Variant::UInt64(v) => write!(f, "{}", v),
            Variant::Float(v) => write!(f, "{}", v),
            Variant::Double(v) => write!(f, "{}", v),
            Variant::Boolean(v) => write!(f, "{}", v),
            Variant::String(ref v) => write!(f, "{}", v),
            Variant::Guid(ref v) => write!(f, "{}", v),
            Variant::DateTime(ref v) => write!(f, "{}", v),
            Variant::NodeId(ref v) => write!(f, "{}", v),
            Variant::ExpandedNodeId(ref v) => write!(f, "{}", v),
            Variant::StatusCode(ref v) => write!(f, "{}", v),
            Variant::LocalizedText(ref v) => write!(f, "{}", v),
            Variant::QualifiedName(ref v) => write!(f, "{}", v),
            Variant::Variant(ref v) => write!(f, "Variant({})", v),
            value => write!(f, "{:?}", value),
        }
    }
}

impl Variant {
    /// Length of a value without the encoding mask
    fn byte_len_value(value: &Variant) -> usize {
        // Arrays are never nested
        on_value!(value, v => v.byte_len(), empty => 0, array => 0)
    }

    fn encode_value<S: Write>(stream: &mut S, value: &Variant) -> EncodingResult<usize> {
        on_value!(value, v => v.encode(stream), empty => Ok(0), array => {
            error!("Nested arrays cannot be encoded");
            Err(StatusCode::BadEncodingError)
        })
    }

    /// Elements of a variant typed array are full variants with a mask of their own
    fn byte_len_element(value: &Variant, value_type: VariantTypeId) -> usize {
        if value_type == VariantTypeId::Variant {
            value.byte_len()
        } else {
            Variant::byte_len_value(value)
        }
    }

    fn encode_element<S: Write>(
        stream: &mut S,
        value: &Variant,
        value_type: VariantTypeId,
    ) -> EncodingResult<usize> {
        if value_type == VariantTypeId::Variant {
            value.encode(stream)
        } else {
            Variant::encode_value(stream, value)
        }
    }

    fn decode_element<S: Read>(
        stream: &mut S,
        value_type: VariantTypeId,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Variant> {
        if value_type == VariantTypeId::Variant {
            let _depth_lock = decoding_options.depth_lock()?;
            Variant::decode(stream, decoding_options)
        } else {
            Variant::decode_value(stream, value_type, decoding_options)
        }
    }

    /// Reads a single value of the type, without the encoding mask
    fn decode_value<S: Read>(
        stream: &mut S,
        value_type: VariantTypeId,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Variant> {
        macro_rules! decoded {
            ($t:ty) => {
                Variant::from(<$t>::decode(stream, decoding_options)?)
            };
        }
        let value = match value_type {
            VariantTypeId::Empty => Variant::Empty,
            VariantTypeId::Boolean => decoded!(bool),
            VariantTypeId::SByte => decoded!(i8),
            VariantTypeId::Byte => decoded!(u8),
            VariantTypeId::Int16 => decoded!(i16),
            VariantTypeId::UInt16 => decoded!(u16),
            VariantTypeId::Int32 => decoded!(i32),
            VariantTypeId::UInt32 => decoded!(u32),
            VariantTypeId::Int64 => decoded!(i64),
            VariantTypeId::UInt64 => decoded!(u64),
            VariantTypeId::Float => decoded!(f32),
            VariantTypeId::Double => decoded!(f64),
            VariantTypeId::String => decoded!(UAString),
            VariantTypeId::DateTime => decoded!(DateTime),
            VariantTypeId::Guid => decoded!(Guid),
            VariantTypeId::StatusCode => decoded!(StatusCode),
            VariantTypeId::ByteString => decoded!(ByteString),
            // Shares the representation of String, so From would pick the wrong variant
            VariantTypeId::XmlElement => {
                Variant::XmlElement(XmlElement::decode(stream, decoding_options)?)
            }
            VariantTypeId::QualifiedName => decoded!(QualifiedName),
            VariantTypeId::LocalizedText => decoded!(LocalizedText),
            VariantTypeId::NodeId => decoded!(NodeId),
            VariantTypeId::ExpandedNodeId => decoded!(ExpandedNodeId),
            VariantTypeId::ExtensionObject => decoded!(ExtensionObject),
            VariantTypeId::Variant => {
                // Nested variants are depth checked to prevent deep recursion
                let _depth_lock = decoding_options.depth_lock()?;
                Variant::Variant(Box::new(Variant::decode(stream, decoding_options)?))
            }
            VariantTypeId::DataValue => decoded!(DataValue),
            VariantTypeId::DiagnosticInfo => decoded!(DiagnosticInfo),
        };
        Ok(value)
    }

    /// Returns the encoding mask with the array bits set for arrays
    pub fn encoding_mask(&self) -> u8 {
        match self {
            Variant::Array(array) => array.encoding_mask(),
            value => value.type_id().encoding_mask(),
        }
    }

    /// Returns the type of the value. For arrays this is the element type.
    pub fn type_id(&self) -> VariantTypeId {
        match self {
            Variant::Empty => VariantTypeId::Empty,
            Variant::Boolean(_) => VariantTypeId::Boolean,
            Variant::SByte(_) => VariantTypeId::SByte,
            Variant::Byte(_) => VariantTypeId::Byte,
            Variant::Int16(_) => VariantTypeId::Int16,
            Variant::UInt16(_) => VariantTypeId::UInt16,
            Variant::Int32(_) => VariantTypeId::Int32,
            Variant::UInt32(_) => VariantTypeId::UInt32,
            Variant::Int64(_) => VariantTypeId::Int64,
            Variant::UInt64(_) => VariantTypeId::UInt64,
            Variant::Float(_) => VariantTypeId::Float,
            Variant::Double(_) => VariantTypeId::Double,
            Variant::String(_) => VariantTypeId::String,
            Variant::DateTime(_) => VariantTypeId::DateTime,
            Variant::Guid(_) => VariantTypeId::Guid,
            Variant::StatusCode(_) => VariantTypeId::StatusCode,
            Variant::ByteString(_) => VariantTypeId::ByteString,
            Variant::XmlElement(_) => VariantTypeId::XmlElement,
            Variant::QualifiedName(_) => VariantTypeId::QualifiedName,
            Variant::LocalizedText(_) => VariantTypeId::LocalizedText,
            Variant::NodeId(_) => VariantTypeId::NodeId,
            Variant::ExpandedNodeId(_) => VariantTypeId::ExpandedNodeId,
            Variant::ExtensionObject(_) => VariantTypeId::ExtensionObject,
            Variant::Variant(_) => VariantTypeId::Variant,
            Variant::DataValue(_) => VariantTypeId::DataValue,
            Variant::DiagnosticInfo(_) => VariantTypeId::DiagnosticInfo,
            Variant::Array(array) => array.value_type,
        }
    }

    pub fn rank(&self) -> ValueRank {
        match self {
            Variant::Array(array) if array.has_dimensions() => ValueRank::Matrix,
            Variant::Array(_) => ValueRank::Array,
            _ => ValueRank::Scalar,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Variant::Empty)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Variant::Array(_))
    }

    pub fn is_numeric(&self) -> bool {
        !self.is_array() && self.type_id().is_numeric()
    }

    /// Tests that the variant is in a valid state, which only matters for arrays
    pub fn is_valid(&self) -> bool {
        match self {
            Variant::Array(array) => array.is_valid(),
            _ => true,
        }
    }

    /// Converts a numeric scalar to an i32 where the value fits, e.g. to read an enumeration
    /// that a server may report with any integer type.
    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Variant::SByte(v) => Some(i32::from(v)),
            Variant::Byte(v) => Some(i32::from(v)),
            Variant::Int16(v) => Some(i32::from(v)),
            Variant::UInt16(v) => Some(i32::from(v)),
            Variant::Int32(v) => Some(v),
            Variant::UInt32(v) => i32::try_from(v).ok(),
            Variant::Int64(v) => i32::try_from(v).ok(),
            Variant::UInt64(v) => i32::try_from(v).ok(),
            _ => None,
        }
    }

    /// Converts a numeric scalar to an u32 where the value fits
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Variant::Byte(v) => Some(u32::from(v)),
            Variant::UInt16(v) => Some(u32::from(v)),
            Variant::UInt32(v) => Some(v),
            Variant::SByte(v) => u32::try_from(v).ok(),
            Variant::Int16(v) => u32::try_from(v).ok(),
            Variant::Int32(v) => u32::try_from(v).ok(),
            Variant::Int64(v) => u32::try_from(v).ok(),
            Variant::UInt64(v) => u32::try_from(v).ok(),
            _ => None,
        }
    }

    /// Converts a numeric scalar to an f64, possibly losing precision for 64-bit integers
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Variant::SByte(v) => Some(f64::from(v)),
            Variant::Byte(v) => Some(f64::from(v)),
            Variant::Int16(v) => Some(f64::from(v)),
            Variant::UInt16(v) => Some(f64::from(v)),
            Variant::Int32(v) => Some(f64::from(v)),
            Variant::UInt32(v) => Some(f64::from(v)),
            Variant::Int64(v) => Some(v as f64),
            Variant::UInt64(v) => Some(v as f64),
            Variant::Float(v) => Some(f64::from(v)),
            Variant::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the data type node of the variant's value, or of its elements for an array
    pub fn data_type(&self) -> NodeId {
        self.type_id().data_type()
    }
}
