// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::fmt;

use crate::types::{node_ids::DataTypeId, Identifier, NodeId, StatusCode};

/// The type of a variant's value without its payload. The discriminant is the built-in type id
/// carried in the low 6 bits of the variant encoding mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariantTypeId {
    Empty = 0,
    Boolean = 1,
    SByte = 2,
    Byte = 3,
    Int16 = 4,
    UInt16 = 5,
    Int32 = 6,
    UInt32 = 7,
    Int64 = 8,
    UInt64 = 9,
    Float = 10,
    Double = 11,
    String = 12,
    DateTime = 13,
    Guid = 14,
    ByteString = 15,
    XmlElement = 16,
    NodeId = 17,
    ExpandedNodeId = 18,
    StatusCode = 19,
    QualifiedName = 20,
    LocalizedText = 21,
    ExtensionObject = 22,
    DataValue = 23,
    Variant = 24,
    DiagnosticInfo = 25,
}

pub(crate) struct EncodingMask;

impl EncodingMask {
    /// Bits holding the built-in type id
    pub const TYPE_ID_MASK: u8 = 0x3f;
    /// Bit indicates an array with dimensions
    pub const ARRAY_DIMENSIONS_BIT: u8 = 1 << 6;
    /// Bit indicates an array with values
    pub const ARRAY_VALUES_BIT: u8 = 1 << 7;
}

impl fmt::Display for VariantTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl VariantTypeId {
    const ALL: [VariantTypeId; 26] = [
        VariantTypeId::Empty,
        VariantTypeId::Boolean,
        VariantTypeId::SByte,
        VariantTypeId::Byte,
        VariantTypeId::Int16,
        VariantTypeId::UInt16,
        VariantTypeId::Int32,
        VariantTypeId::UInt32,
        VariantTypeId::Int64,
        VariantTypeId::UInt64,
        VariantTypeId::Float,
        VariantTypeId::Double,
        VariantTypeId::String,
        VariantTypeId::DateTime,
        VariantTypeId::Guid,
        VariantTypeId::ByteString,
        VariantTypeId::XmlElement,
        VariantTypeId::NodeId,
        VariantTypeId::ExpandedNodeId,
        VariantTypeId::StatusCode,
        VariantTypeId::QualifiedName,
        VariantTypeId::LocalizedText,
        VariantTypeId::ExtensionObject,
        VariantTypeId::DataValue,
        VariantTypeId::Variant,
        VariantTypeId::DiagnosticInfo,
    ];

    pub fn encoding_mask(&self) -> u8 {
        *self as u8
    }

    /// Extracts the type from an encoding mask, ignoring the array bits. Reserved type ids
    /// are an unsupported type.
    pub fn from_encoding_mask(encoding_mask: u8) -> Result<Self, StatusCode> {
        let type_id = encoding_mask & EncodingMask::TYPE_ID_MASK;
        Self::ALL.get(type_id as usize).copied().ok_or_else(|| {
            error!("UnsupportedType, built-in type id {} is reserved", type_id);
            StatusCode::BadDataTypeIdUnknown
        })
    }

    /// The name used in the tagged dynamic representation
    pub fn name(&self) -> &'static str {
        match self {
            VariantTypeId::Empty => "Null",
            VariantTypeId::Boolean => "Boolean",
            VariantTypeId::SByte => "SByte",
            VariantTypeId::Byte => "Byte",
            VariantTypeId::Int16 => "Int16",
            VariantTypeId::UInt16 => "UInt16",
            VariantTypeId::Int32 => "Int32",
            VariantTypeId::UInt32 => "UInt32",
            VariantTypeId::Int64 => "Int64",
            VariantTypeId::UInt64 => "UInt64",
            VariantTypeId::Float => "Float",
            VariantTypeId::Double => "Double",
            VariantTypeId::String => "String",
            VariantTypeId::DateTime => "DateTime",
            VariantTypeId::Guid => "Guid",
            VariantTypeId::ByteString => "ByteString",
            VariantTypeId::XmlElement => "XmlElement",
            VariantTypeId::NodeId => "NodeId",
            VariantTypeId::ExpandedNodeId => "ExpandedNodeId",
            VariantTypeId::StatusCode => "StatusCode",
            VariantTypeId::QualifiedName => "QualifiedName",
            VariantTypeId::LocalizedText => "LocalizedText",
            VariantTypeId::ExtensionObject => "ExtensionObject",
            VariantTypeId::DataValue => "DataValue",
            VariantTypeId::Variant => "Variant",
            VariantTypeId::DiagnosticInfo => "DiagnosticInfo",
        }
    }

    pub fn from_name(name: &str) -> Option<VariantTypeId> {
        Self::ALL.iter().find(|t| t.name() == name).copied()
    }

    /// Tests and returns true if the type is numeric
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            VariantTypeId::SByte
                | VariantTypeId::Byte
                | VariantTypeId::Int16
                | VariantTypeId::UInt16
                | VariantTypeId::Int32
                | VariantTypeId::UInt32
                | VariantTypeId::Int64
                | VariantTypeId::UInt64
                | VariantTypeId::Float
                | VariantTypeId::Double
        )
    }

    /// The data type node of the type. Structures and variants map to their abstract types.
    pub fn data_type(&self) -> NodeId {
        match self {
            VariantTypeId::Empty | VariantTypeId::Variant => DataTypeId::BaseDataType.into(),
            VariantTypeId::ExtensionObject => DataTypeId::Structure.into(),
            type_id => NodeId::new(0, *type_id as u32),
        }
    }
}

impl TryFrom<&NodeId> for VariantTypeId {
    type Error = ();

    fn try_from(value: &NodeId) -> Result<Self, Self::Error> {
        match value.identifier {
            Identifier::Numeric(type_id) if value.namespace == 0 => {
                if type_id == DataTypeId::BaseDataType as u32 {
                    Ok(VariantTypeId::Variant)
                } else if type_id == DataTypeId::Structure as u32 {
                    Ok(VariantTypeId::ExtensionObject)
                } else if (1..=25).contains(&type_id) {
                    Self::ALL.get(type_id as usize).copied().ok_or(())
                } else {
                    Err(())
                }
            }
            _ => Err(()),
        }
    }
}

#[test]
fn reserved_type_ids_are_unsupported() {
    assert_eq!(
        VariantTypeId::from_encoding_mask(0x80 | 6),
        Ok(VariantTypeId::Int32)
    );
    assert_eq!(
        VariantTypeId::from_encoding_mask(26),
        Err(StatusCode::BadDataTypeIdUnknown)
    );
    assert_eq!(
        VariantTypeId::from_encoding_mask(63),
        Err(StatusCode::BadDataTypeIdUnknown)
    );
}
