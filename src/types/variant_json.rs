// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Conversion of `Variant` to and from a dynamic JSON value.
//!
//! Values that plain JSON reads back as the same type map onto plain JSON. Those are booleans,
//! `Int64`, finite `Double` and strings, plus arrays of them. Everything else is written as a
//! tagged object `{"Type": "<name>", "Body": <value>}`, using the names of `VariantTypeId`, so
//! an `Int32` or a `Float` keeps its type. Non-finite numbers use the tagged form with the
//! bodies `"NaN"`, `"Infinity"` and `"-Infinity"`. Other arrays are
//! `{"Type": "Array", "ElementType": "<name>", "Body": [..]}`, with a body of `null` for a null
//! array, and matrices `{"Type": "Matrix", "ElementType": "<name>", "Body": {"Dimensions": [..],
//! "Values": [..]}}`. Elements of a typed array or matrix drop their own tag when the element
//! type already pins it.

use std::str::FromStr;

use serde_json::{json, Map, Number, Value};

use crate::types::{
    array::Array, byte_string::ByteString, date_time::DateTime,
    extension_object::{ExtensionObject, ExtensionObjectEncoding},
    guid::Guid, localized_text::LocalizedText,
    node_id::{ExpandedNodeId, NodeId},
    qualified_name::QualifiedName,
    status_code::StatusCode,
    string::UAString,
    variant::Variant,
    variant_type_id::VariantTypeId,
    DataValue,
};

const FIELD_TYPE: &str = "Type";
const FIELD_BODY: &str = "Body";
const FIELD_ELEMENT_TYPE: &str = "ElementType";
const FIELD_DIMENSIONS: &str = "Dimensions";
const FIELD_VALUES: &str = "Values";

const TYPE_ARRAY: &str = "Array";
const TYPE_MATRIX: &str = "Matrix";

/// Error for conversions that have no representation on one side or the other
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DynamicError {
    #[error("type {0} has no dynamic representation")]
    Unsupported(String),
    #[error("invalid dynamic value: {0}")]
    Invalid(String),
}

impl From<DynamicError> for StatusCode {
    fn from(_: DynamicError) -> Self {
        StatusCode::BadTypeMismatch
    }
}

/// Conversion into the dynamic representation
pub trait ToDynamic {
    fn to_dynamic(&self) -> Result<Value, DynamicError>;
}

/// Conversion from the dynamic representation
pub trait FromDynamic: Sized {
    fn from_dynamic(value: &Value) -> Result<Self, DynamicError>;
}

fn tagged(type_name: &str, body: Value) -> Value {
    let mut map = Map::new();
    map.insert(FIELD_TYPE.into(), Value::String(type_name.into()));
    map.insert(FIELD_BODY.into(), body);
    Value::Object(map)
}

fn float_body(v: f64) -> Value {
    if v.is_nan() {
        Value::String("NaN".into())
    } else if v == f64::INFINITY {
        Value::String("Infinity".into())
    } else if v == f64::NEG_INFINITY {
        Value::String("-Infinity".into())
    } else {
        Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn parse_float_body(body: &Value) -> Result<f64, DynamicError> {
    match body {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| DynamicError::Invalid(format!("{} is not a number", n))),
        Value::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            s => f64::from_str(s).map_err(|_| DynamicError::Invalid(format!("{} is not a number", s))),
        },
        body => Err(DynamicError::Invalid(format!("{} is not a number", body))),
    }
}

fn expect_str(body: &Value) -> Result<&str, DynamicError> {
    body.as_str()
        .ok_or_else(|| DynamicError::Invalid(format!("{} is not a string", body)))
}

fn expect_object(body: &Value) -> Result<&Map<String, Value>, DynamicError> {
    body.as_object()
        .ok_or_else(|| DynamicError::Invalid(format!("{} is not an object", body)))
}

fn field<'a>(map: &'a Map<String, Value>, name: &str) -> &'a Value {
    map.get(name).unwrap_or(&Value::Null)
}

fn optional_string(body: &Value) -> UAString {
    body.as_str().map(UAString::from).unwrap_or_else(UAString::null)
}

fn string_body(s: &UAString) -> Value {
    s.value()
        .as_ref()
        .map(|s| Value::String(s.clone()))
        .unwrap_or(Value::Null)
}

impl ToDynamic for DataValue {
    fn to_dynamic(&self) -> Result<Value, DynamicError> {
        let mut map = Map::new();
        if let Some(ref value) = self.value {
            map.insert("Value".into(), value.to_dynamic()?);
        }
        if let Some(status) = self.status {
            map.insert("Status".into(), json!(status.bits()));
        }
        if let Some(ref ts) = self.source_timestamp {
            map.insert("SourceTimestamp".into(), json!(ts.to_string()));
        }
        if let Some(ps) = self.source_picoseconds {
            map.insert("SourcePicoseconds".into(), json!(ps));
        }
        if let Some(ref ts) = self.server_timestamp {
            map.insert("ServerTimestamp".into(), json!(ts.to_string()));
        }
        if let Some(ps) = self.server_picoseconds {
            map.insert("ServerPicoseconds".into(), json!(ps));
        }
        Ok(Value::Object(map))
    }
}

impl FromDynamic for DataValue {
    fn from_dynamic(value: &Value) -> Result<Self, DynamicError> {
        let map = expect_object(value)?;
        let timestamp = |name: &str| -> Result<Option<DateTime>, DynamicError> {
            match map.get(name) {
                None | Some(Value::Null) => Ok(None),
                Some(v) => DateTime::from_str(expect_str(v)?)
                    .map(Some)
                    .map_err(|_| DynamicError::Invalid(format!("{} is not a date", v))),
            }
        };
        Ok(DataValue {
            value: match map.get("Value") {
                None => None,
                Some(v) => Some(Variant::from_dynamic(v)?),
            },
            status: map
                .get("Status")
                .and_then(|v| v.as_u64())
                .map(|v| StatusCode::from_u32(v as u32)),
            source_timestamp: timestamp("SourceTimestamp")?,
            source_picoseconds: map
                .get("SourcePicoseconds")
                .and_then(|v| v.as_u64())
                .map(|v| v as u16),
            server_timestamp: timestamp("ServerTimestamp")?,
            server_picoseconds: map
                .get("ServerPicoseconds")
                .and_then(|v| v.as_u64())
                .map(|v| v as u16),
        })
    }
}

impl ToDynamic for Variant {
    fn to_dynamic(&self) -> Result<Value, DynamicError> {
        let value = match self {
            Variant::Empty => Value::Null,
            Variant::Boolean(v) => json!(v),
            Variant::SByte(v) => tagged("SByte", json!(v)),
            Variant::Byte(v) => tagged("Byte", json!(v)),
            Variant::Int16(v) => tagged("Int16", json!(v)),
            Variant::UInt16(v) => tagged("UInt16", json!(v)),
            Variant::Int32(v) => tagged("Int32", json!(v)),
            Variant::UInt32(v) => tagged("UInt32", json!(v)),
            Variant::Int64(v) => json!(v),
            Variant::UInt64(v) => tagged("UInt64", json!(v)),
            Variant::Float(v) => tagged("Float", float_body(f64::from(*v))),
            Variant::Double(v) if v.is_finite() => float_body(*v),
            Variant::Double(v) => tagged("Double", float_body(*v)),
            Variant::String(v) => string_body(v),
            Variant::XmlElement(v) => tagged("XmlElement", string_body(v)),
            Variant::DateTime(v) => tagged("DateTime", json!(v.to_string())),
            Variant::Guid(v) => tagged("Guid", json!(v.to_string())),
            Variant::StatusCode(v) => tagged(
                "StatusCode",
                json!({ "Code": v.bits(), "Symbol": v.name() }),
            ),
            Variant::ByteString(v) => tagged(
                "ByteString",
                if v.is_null() {
                    Value::Null
                } else {
                    json!(v.as_base64())
                },
            ),
            Variant::NodeId(v) => tagged("NodeId", json!(v.to_string())),
            Variant::ExpandedNodeId(v) => tagged("ExpandedNodeId", json!(v.to_string())),
            Variant::QualifiedName(v) => tagged(
                "QualifiedName",
                json!({ "NamespaceIndex": v.namespace_index, "Name": string_body(&v.name) }),
            ),
            Variant::LocalizedText(v) => tagged(
                "LocalizedText",
                json!({ "Locale": string_body(&v.locale), "Text": string_body(&v.text) }),
            ),
            Variant::ExtensionObject(v) => {
                let (encoding, body) = match v.body {
                    ExtensionObjectEncoding::None => (0, Value::Null),
                    ExtensionObjectEncoding::ByteString(ref b) => (1, json!(b.as_base64())),
                    ExtensionObjectEncoding::XmlElement(ref x) => (2, string_body(x)),
                };
                tagged(
                    "ExtensionObject",
                    json!({ "TypeId": v.node_id.to_string(), "Encoding": encoding, "Body": body }),
                )
            }
            Variant::DataValue(v) => tagged("DataValue", v.to_dynamic()?),
            Variant::Variant(v) => tagged("Variant", v.to_dynamic()?),
            Variant::DiagnosticInfo(_) => {
                return Err(DynamicError::Unsupported("DiagnosticInfo".into()));
            }
            Variant::Array(array) => array_to_dynamic(array)?,
        };
        Ok(value)
    }
}

/// The element inside a typed array, untagged when it is a plain number. Elements of a variant
/// array keep their tags.
fn element_to_dynamic(value_type: VariantTypeId, value: &Variant) -> Result<Value, DynamicError> {
    if value_type == VariantTypeId::Variant {
        return value.to_dynamic();
    }
    let body = match value {
        Variant::SByte(v) => json!(v),
        Variant::Byte(v) => json!(v),
        Variant::Int16(v) => json!(v),
        Variant::UInt16(v) => json!(v),
        Variant::Int32(v) => json!(v),
        Variant::UInt32(v) => json!(v),
        Variant::UInt64(v) => json!(v),
        Variant::Float(v) if v.is_finite() => float_body(f64::from(*v)),
        value => value.to_dynamic()?,
    };
    Ok(body)
}

/// True when a bare JSON array of the values reads back as the same array.
fn is_plain_array(array: &Array, values: &[Variant]) -> bool {
    match array.value_type {
        VariantTypeId::Boolean | VariantTypeId::Int64 | VariantTypeId::Double => {
            !values.is_empty()
        }
        VariantTypeId::String => {
            !values.is_empty()
                && values
                    .iter()
                    .all(|v| matches!(v, Variant::String(s) if !s.is_null()))
        }
        _ => false,
    }
}

fn array_to_dynamic(array: &Array) -> Result<Value, DynamicError> {
    let typed = |type_name: &str, body: Value| {
        let mut map = Map::new();
        map.insert(FIELD_TYPE.into(), json!(type_name));
        map.insert(FIELD_ELEMENT_TYPE.into(), json!(array.value_type.name()));
        map.insert(FIELD_BODY.into(), body);
        Value::Object(map)
    };
    let Some(ref values) = array.values else {
        return Ok(typed(TYPE_ARRAY, Value::Null));
    };
    if array.has_dimensions() {
        let values = values
            .iter()
            .map(|v| element_to_dynamic(array.value_type, v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(typed(
            TYPE_MATRIX,
            json!({ "Dimensions": array.dimensions, "Values": values }),
        ))
    } else if is_plain_array(array, values) {
        let values = values
            .iter()
            .map(|v| v.to_dynamic())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Array(values))
    } else {
        let values = values
            .iter()
            .map(|v| element_to_dynamic(array.value_type, v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(typed(TYPE_ARRAY, Value::Array(values)))
    }
}

impl FromDynamic for Variant {
    fn from_dynamic(value: &Value) -> Result<Self, DynamicError> {
        match value {
            Value::Null => Ok(Variant::Empty),
            Value::Bool(v) => Ok(Variant::Boolean(*v)),
            Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Ok(Variant::Int64(v))
                } else if let Some(v) = n.as_u64() {
                    Ok(Variant::UInt64(v))
                } else {
                    Ok(Variant::Double(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            Value::String(s) => Ok(Variant::from(s.as_str())),
            Value::Array(values) => {
                let values = values
                    .iter()
                    .map(Variant::from_dynamic)
                    .collect::<Result<Vec<_>, _>>()?;
                array_from_values(None, values, None)
            }
            Value::Object(map) => tagged_from_dynamic(map),
        }
    }
}

/// Builds an array, inferring the element type from the values when it is not named. Mixed
/// values become a variant array.
fn array_from_values(
    element_type: Option<VariantTypeId>,
    values: Vec<Variant>,
    dimensions: Option<Vec<u32>>,
) -> Result<Variant, DynamicError> {
    let value_type = element_type.unwrap_or_else(|| {
        let first = values.first().map(|v| v.type_id());
        match first {
            Some(t) if t != VariantTypeId::Empty && values.iter().all(|v| v.type_id() == t) => t,
            _ => VariantTypeId::Variant,
        }
    });
    let values = values
        .into_iter()
        .map(|v| coerce(v, value_type))
        .collect::<Result<Vec<_>, _>>()?;
    let array = Array {
        value_type,
        values: Some(values),
        dimensions,
    };
    array
        .validate()
        .map_err(|_| DynamicError::Invalid("array values do not match their type".into()))?;
    Ok(Variant::from(array))
}

fn tagged_from_dynamic(map: &Map<String, Value>) -> Result<Variant, DynamicError> {
    let type_name = expect_str(field(map, FIELD_TYPE))?;
    let body = field(map, FIELD_BODY);
    let element_type = || -> Result<VariantTypeId, DynamicError> {
        let name = expect_str(field(map, FIELD_ELEMENT_TYPE))?;
        VariantTypeId::from_name(name).ok_or_else(|| DynamicError::Unsupported(name.into()))
    };

    let invalid = |what: &str| DynamicError::Invalid(format!("{} is not a valid {}", body, what));

    let variant = match type_name {
        TYPE_ARRAY => match body {
            Value::Null => Variant::from(Array::null(element_type()?)),
            Value::Array(values) => {
                let values = values
                    .iter()
                    .map(Variant::from_dynamic)
                    .collect::<Result<Vec<_>, _>>()?;
                array_from_values(Some(element_type()?), values, None)?
            }
            _ => return Err(invalid("array")),
        },
        TYPE_MATRIX => {
            let matrix = expect_object(body)?;
            let dimensions = field(matrix, FIELD_DIMENSIONS)
                .as_array()
                .ok_or_else(|| invalid("matrix"))?
                .iter()
                .map(|d| d.as_u64().map(|d| d as u32).ok_or_else(|| invalid("dimension")))
                .collect::<Result<Vec<_>, _>>()?;
            let values = field(matrix, FIELD_VALUES)
                .as_array()
                .ok_or_else(|| invalid("matrix"))?
                .iter()
                .map(Variant::from_dynamic)
                .collect::<Result<Vec<_>, _>>()?;
            array_from_values(Some(element_type()?), values, Some(dimensions))?
        }
        type_name => {
            let type_id = VariantTypeId::from_name(type_name)
                .ok_or_else(|| DynamicError::Unsupported(type_name.into()))?;
            match type_id {
                VariantTypeId::Float => Variant::Float(parse_float_body(body)? as f32),
                VariantTypeId::Double => Variant::Double(parse_float_body(body)?),
                VariantTypeId::XmlElement => Variant::XmlElement(optional_string(body)),
                VariantTypeId::DateTime => Variant::from(
                    DateTime::from_str(expect_str(body)?).map_err(|_| invalid("date"))?,
                ),
                VariantTypeId::Guid => {
                    Variant::from(Guid::from_str(expect_str(body)?).map_err(|_| invalid("guid"))?)
                }
                VariantTypeId::StatusCode => {
                    let code = expect_object(body)?
                        .get("Code")
                        .and_then(|c| c.as_u64())
                        .ok_or_else(|| invalid("status code"))?;
                    Variant::from(StatusCode::from_u32(code as u32))
                }
                VariantTypeId::ByteString => match body {
                    Value::Null => Variant::from(ByteString::null()),
                    body => Variant::from(
                        ByteString::from_base64(expect_str(body)?)
                            .ok_or_else(|| invalid("base64 string"))?,
                    ),
                },
                VariantTypeId::NodeId => Variant::from(
                    NodeId::from_str(expect_str(body)?).map_err(|_| invalid("node id"))?,
                ),
                VariantTypeId::ExpandedNodeId => Variant::from(
                    ExpandedNodeId::from_str(expect_str(body)?)
                        .map_err(|_| invalid("expanded node id"))?,
                ),
                VariantTypeId::QualifiedName => {
                    let qn = expect_object(body)?;
                    let namespace_index = field(qn, "NamespaceIndex").as_u64().unwrap_or(0);
                    Variant::from(QualifiedName::new(
                        namespace_index as u16,
                        optional_string(field(qn, "Name")),
                    ))
                }
                VariantTypeId::LocalizedText => {
                    let lt = expect_object(body)?;
                    Variant::from(LocalizedText {
                        locale: optional_string(field(lt, "Locale")),
                        text: optional_string(field(lt, "Text")),
                    })
                }
                VariantTypeId::ExtensionObject => {
                    let eo = expect_object(body)?;
                    let node_id = NodeId::from_str(expect_str(field(eo, "TypeId"))?)
                        .map_err(|_| invalid("extension object"))?;
                    let body = match field(eo, "Encoding").as_u64() {
                        Some(1) => ExtensionObjectEncoding::ByteString(
                            ByteString::from_base64(expect_str(field(eo, "Body"))?)
                                .ok_or_else(|| invalid("extension object"))?,
                        ),
                        Some(2) => ExtensionObjectEncoding::XmlElement(optional_string(field(
                            eo, "Body",
                        ))),
                        _ => ExtensionObjectEncoding::None,
                    };
                    Variant::from(ExtensionObject { node_id, body })
                }
                VariantTypeId::DataValue => Variant::from(DataValue::from_dynamic(body)?),
                VariantTypeId::Variant => Variant::Variant(Box::new(Variant::from_dynamic(body)?)),
                VariantTypeId::DiagnosticInfo => {
                    return Err(DynamicError::Unsupported(type_name.into()))
                }
                // Plain values may also be tagged to pin their type
                type_id => coerce(Variant::from_dynamic(body)?, type_id)?,
            }
        }
    };
    Ok(variant)
}

/// Converts a value decoded from a plain JSON value to the requested type, failing when the
/// value does not fit.
pub fn coerce(value: Variant, type_id: VariantTypeId) -> Result<Variant, DynamicError> {
    if value.type_id() == type_id || type_id == VariantTypeId::Variant {
        return Ok(value);
    }
    let description = format!("{} cannot be converted to {}", value, type_id);
    let mismatch = || DynamicError::Invalid(description.clone());
    macro_rules! integer {
        ( $t:ty, $variant:ident ) => {
            match value {
                Variant::Int64(v) => <$t>::try_from(v).map(Variant::$variant).map_err(|_| mismatch()),
                Variant::UInt64(v) => <$t>::try_from(v).map(Variant::$variant).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            }
        };
    }
    match type_id {
        VariantTypeId::SByte => integer!(i8, SByte),
        VariantTypeId::Byte => integer!(u8, Byte),
        VariantTypeId::Int16 => integer!(i16, Int16),
        VariantTypeId::UInt16 => integer!(u16, UInt16),
        VariantTypeId::Int32 => integer!(i32, Int32),
        VariantTypeId::UInt32 => integer!(u32, UInt32),
        VariantTypeId::Int64 => integer!(i64, Int64),
        VariantTypeId::UInt64 => integer!(u64, UInt64),
        VariantTypeId::Float => value
            .as_f64()
            .map(|v| Variant::Float(v as f32))
            .ok_or_else(mismatch),
        VariantTypeId::Double => value.as_f64().map(Variant::Double).ok_or_else(mismatch),
        VariantTypeId::String => match value {
            Variant::Empty => Ok(Variant::String(UAString::null())),
            _ => Err(mismatch()),
        },
        VariantTypeId::XmlElement => match value {
            Variant::String(s) => Ok(Variant::XmlElement(s)),
            Variant::Empty => Ok(Variant::XmlElement(UAString::null())),
            _ => Err(mismatch()),
        },
        VariantTypeId::NodeId => match value {
            Variant::String(ref s) => NodeId::from_str(s.as_ref())
                .map(Variant::from)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        _ => Err(mismatch()),
    }
}
