// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! `NodeId` and `ExpandedNodeId`, their binary encoding and their text form
//! `svr=<index>;ns=<index>;<kind>=<value>`.

use std::{
    fmt,
    io::{Read, Write},
    str::FromStr,
};

use regex::{Captures, Regex};

use crate::types::{
    byte_string::ByteString,
    encoding::*,
    guid::Guid,
    node_ids::{DataTypeId, ObjectId, ReferenceTypeId, VariableId},
    status_code::StatusCode,
    string::*,
};

#[derive(Eq, PartialEq, Clone, Debug, Hash, Serialize, Deserialize)]
pub enum Identifier {
    Numeric(u32),
    String(UAString),
    Guid(Guid),
    ByteString(ByteString),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Identifier::Numeric(v) => write!(f, "i={}", v),
            Identifier::String(v) => write!(f, "s={}", v),
            Identifier::Guid(v) => write!(f, "g={:?}", v),
            Identifier::ByteString(v) => write!(f, "b={}", v.as_base64()),
        }
    }
}

impl FromStr for Identifier {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s.split_once('=').ok_or(())?;
        match kind {
            "i" => value.parse::<u32>().map(Identifier::Numeric).map_err(|_| ()),
            "s" => Ok(Identifier::String(value.into())),
            "g" => Guid::from_str(value).map(Identifier::Guid),
            "b" => ByteString::from_base64(value)
                .map(Identifier::ByteString)
                .ok_or(()),
            _ => Err(()),
        }
    }
}

macro_rules! identifier_from {
    ($($ty:ty => $variant:ident),*) => {
        $(
            impl From<$ty> for Identifier {
                fn from(v: $ty) -> Self {
                    Identifier::$variant(v.into())
                }
            }
        )*
    };
}

identifier_from!(
    u32 => Numeric,
    &str => String,
    String => String,
    UAString => String,
    Guid => Guid,
    ByteString => ByteString
);

/// How the identifier is laid out on the wire. Numeric ids take the smallest form that fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    TwoByte = 0x0,
    FourByte = 0x1,
    Numeric = 0x2,
    String = 0x3,
    Guid = 0x4,
    ByteString = 0x5,
}

impl Encoding {
    /// Only the low nibble names the encoding, `ExpandedNodeId` keeps flags in the high bits.
    fn from_bits(bits: u8) -> Option<Encoding> {
        Some(match bits & 0x0f {
            0x0 => Encoding::TwoByte,
            0x1 => Encoding::FourByte,
            0x2 => Encoding::Numeric,
            0x3 => Encoding::String,
            0x4 => Encoding::Guid,
            0x5 => Encoding::ByteString,
            _ => return None,
        })
    }
}

const HAS_NAMESPACE_URI: u8 = 0x80;
const HAS_SERVER_INDEX: u8 = 0x40;

#[derive(PartialEq, Eq, Clone, Debug, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: Identifier,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.namespace {
            0 => write!(f, "{}", self.identifier),
            ns => write!(f, "ns={};{}", ns, self.identifier),
        }
    }
}

impl NodeId {
    pub fn new<T>(namespace: u16, value: T) -> NodeId
    where
        T: Into<Identifier>,
    {
        NodeId {
            namespace,
            identifier: value.into(),
        }
    }

    /// Namespace 0, numeric 0.
    pub fn null() -> NodeId {
        NodeId::new(0, 0u32)
    }

    pub fn is_null(&self) -> bool {
        self.namespace == 0 && matches!(self.identifier, Identifier::Numeric(0))
    }

    pub fn objects_folder_id() -> NodeId {
        ObjectId::ObjectsFolder.into()
    }

    /// The well known object this id refers to. Only numeric ids in namespace 0 can be one.
    pub fn as_object_id(&self) -> Result<ObjectId, StatusCode> {
        match self.identifier {
            Identifier::Numeric(id) if self.namespace == 0 => {
                ObjectId::try_from(id).map_err(|_| StatusCode::BadNodeIdUnknown)
            }
            _ => Err(StatusCode::BadNodeIdUnknown),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.identifier, Identifier::Numeric(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self.identifier, Identifier::String(_))
    }

    pub fn is_guid(&self) -> bool {
        matches!(self.identifier, Identifier::Guid(_))
    }

    pub fn is_byte_string(&self) -> bool {
        matches!(self.identifier, Identifier::ByteString(_))
    }

    fn encoding(&self) -> Encoding {
        match self.identifier {
            Identifier::Numeric(v) if self.namespace == 0 && v <= u8::MAX as u32 => {
                Encoding::TwoByte
            }
            Identifier::Numeric(v) if self.namespace <= u8::MAX as u16 && v <= u16::MAX as u32 => {
                Encoding::FourByte
            }
            Identifier::Numeric(_) => Encoding::Numeric,
            Identifier::String(_) => Encoding::String,
            Identifier::Guid(_) => Encoding::Guid,
            Identifier::ByteString(_) => Encoding::ByteString,
        }
    }

    /// The encoding byte carries `flags` in its high bits.
    fn write<S: Write>(&self, stream: &mut S, flags: u8) -> EncodingResult<usize> {
        let encoding = self.encoding();
        let mut size = write_u8(stream, encoding as u8 | flags)?;
        size += match (&self.identifier, encoding) {
            (Identifier::Numeric(v), Encoding::TwoByte) => write_u8(stream, *v as u8)?,
            (Identifier::Numeric(v), Encoding::FourByte) => {
                write_u8(stream, self.namespace as u8)? + write_u16(stream, *v as u16)?
            }
            (identifier, _) => {
                write_u16(stream, self.namespace)?
                    + match identifier {
                        Identifier::Numeric(v) => write_u32(stream, *v)?,
                        Identifier::String(v) => v.encode(stream)?,
                        Identifier::Guid(v) => v.encode(stream)?,
                        Identifier::ByteString(v) => v.encode(stream)?,
                    }
            }
        };
        Ok(size)
    }

    fn read<S: Read>(
        stream: &mut S,
        bits: u8,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<NodeId> {
        let Some(encoding) = Encoding::from_bits(bits) else {
            error!("Node id has the unknown encoding {:#04x}", bits);
            return Err(StatusCode::BadDecodingError);
        };
        let node_id = match encoding {
            Encoding::TwoByte => NodeId::new(0, read_u8(stream)? as u32),
            Encoding::FourByte => {
                let namespace = read_u8(stream)? as u16;
                NodeId::new(namespace, read_u16(stream)? as u32)
            }
            encoding => {
                let namespace = read_u16(stream)?;
                let identifier: Identifier = match encoding {
                    Encoding::String => UAString::decode(stream, decoding_options)?.into(),
                    Encoding::Guid => Guid::decode(stream, decoding_options)?.into(),
                    Encoding::ByteString => ByteString::decode(stream, decoding_options)?.into(),
                    _ => read_u32(stream)?.into(),
                };
                NodeId::new(namespace, identifier)
            }
        };
        Ok(node_id)
    }
}

impl BinaryEncoder<NodeId> for NodeId {
    fn byte_len(&self) -> usize {
        match (&self.identifier, self.encoding()) {
            (_, Encoding::TwoByte) => 2,
            (_, Encoding::FourByte) => 4,
            (Identifier::Numeric(_), _) => 7,
            (Identifier::String(v), _) => 3 + v.byte_len(),
            (Identifier::Guid(v), _) => 3 + v.byte_len(),
            (Identifier::ByteString(v), _) => 3 + v.byte_len(),
        }
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        self.write(stream, 0)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let bits = read_u8(stream)?;
        NodeId::read(stream, bits, decoding_options)
    }
}

lazy_static! {
    /// `svr=` and `nsu=` are only valid in expanded node ids.
    static ref NODE_ID_TEXT: Option<Regex> = Regex::new(
        r"^(svr=(?P<svr>\d+);)?((ns=(?P<ns>\d+)|nsu=(?P<nsu>[^;]+));)?(?P<id>[isgb]=.+)$"
    )
    .ok();
}

fn node_id_captures(s: &str) -> Result<Captures<'_>, StatusCode> {
    NODE_ID_TEXT
        .as_ref()
        .and_then(|re| re.captures(s))
        .ok_or(StatusCode::BadNodeIdInvalid)
}

fn parse_capture<T: FromStr>(captures: &Captures, name: &str) -> Result<Option<T>, StatusCode> {
    captures
        .name(name)
        .map(|m| m.as_str().parse::<T>().map_err(|_| StatusCode::BadNodeIdInvalid))
        .transpose()
}

fn parse_identifier(captures: &Captures) -> Result<Identifier, StatusCode> {
    captures
        .name("id")
        .and_then(|m| Identifier::from_str(m.as_str()).ok())
        .ok_or(StatusCode::BadNodeIdInvalid)
}

/// `ns=<index>;<kind>=<value>` with `kind` one of `i`, `s`, `g` or `b`. Without `ns=` the
/// namespace is 0.
impl FromStr for NodeId {
    type Err = StatusCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = node_id_captures(s)?;
        if captures.name("svr").is_some() || captures.name("nsu").is_some() {
            return Err(StatusCode::BadNodeIdInvalid);
        }
        let namespace = parse_capture::<u16>(&captures, "ns")?.unwrap_or(0);
        Ok(NodeId::new(namespace, parse_identifier(&captures)?))
    }
}

impl From<&NodeId> for NodeId {
    fn from(v: &NodeId) -> Self {
        v.clone()
    }
}

impl From<NodeId> for String {
    fn from(v: NodeId) -> Self {
        v.to_string()
    }
}

impl<T> From<(u16, T)> for NodeId
where
    T: Into<Identifier>,
{
    fn from((namespace, value): (u16, T)) -> Self {
        NodeId::new(namespace, value)
    }
}

macro_rules! node_id_from_well_known {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for NodeId {
                fn from(v: $ty) -> Self {
                    NodeId::new(0, v as u32)
                }
            }
        )*
    };
}

node_id_from_well_known!(ObjectId, VariableId, DataTypeId, ReferenceTypeId);

impl Default for NodeId {
    fn default() -> Self {
        NodeId::null()
    }
}

/// A node id that may also name its namespace by URI and live on another server.
#[derive(PartialEq, Eq, Debug, Clone, Hash, Serialize, Deserialize)]
pub struct ExpandedNodeId {
    pub node_id: NodeId,
    /// Null unless the namespace is named by URI, the index in `node_id` is then ignored
    pub namespace_uri: UAString,
    /// 0 for the local server
    pub server_index: u32,
}

impl ExpandedNodeId {
    pub fn new<T>(value: T) -> ExpandedNodeId
    where
        T: Into<ExpandedNodeId>,
    {
        value.into()
    }

    pub fn null() -> ExpandedNodeId {
        NodeId::null().into()
    }

    pub fn is_null(&self) -> bool {
        self.node_id.is_null()
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if !self.namespace_uri.is_null() {
            flags |= HAS_NAMESPACE_URI;
        }
        if self.server_index != 0 {
            flags |= HAS_SERVER_INDEX;
        }
        flags
    }
}

impl BinaryEncoder<ExpandedNodeId> for ExpandedNodeId {
    fn byte_len(&self) -> usize {
        let flags = self.flags();
        let uri = if flags & HAS_NAMESPACE_URI != 0 {
            self.namespace_uri.byte_len()
        } else {
            0
        };
        let server = if flags & HAS_SERVER_INDEX != 0 { 4 } else { 0 };
        self.node_id.byte_len() + uri + server
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let flags = self.flags();
        let mut size = self.node_id.write(stream, flags)?;
        if flags & HAS_NAMESPACE_URI != 0 {
            size += self.namespace_uri.encode(stream)?;
        }
        if flags & HAS_SERVER_INDEX != 0 {
            size += write_u32(stream, self.server_index)?;
        }
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let bits = read_u8(stream)?;
        let node_id = NodeId::read(stream, bits, decoding_options)?;
        let namespace_uri = if bits & HAS_NAMESPACE_URI != 0 {
            UAString::decode(stream, decoding_options)?
        } else {
            UAString::null()
        };
        let server_index = if bits & HAS_SERVER_INDEX != 0 {
            read_u32(stream)?
        } else {
            0
        };
        Ok(ExpandedNodeId {
            node_id,
            namespace_uri,
            server_index,
        })
    }
}

impl From<NodeId> for ExpandedNodeId {
    fn from(node_id: NodeId) -> Self {
        ExpandedNodeId {
            node_id,
            namespace_uri: UAString::null(),
            server_index: 0,
        }
    }
}

impl From<&NodeId> for ExpandedNodeId {
    fn from(v: &NodeId) -> Self {
        v.clone().into()
    }
}

impl fmt::Display for ExpandedNodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "svr={};", self.server_index)?;
        if self.namespace_uri.is_empty() {
            write!(f, "{}", self.node_id)
        } else {
            // % and ; would end the uri early
            let uri = self
                .namespace_uri
                .as_ref()
                .replace('%', "%25")
                .replace(';', "%3b");
            write!(f, "nsu={};{}", uri, self.node_id.identifier)
        }
    }
}

/// `svr=<index>;` followed by either `ns=<index>;` or `nsu=<uri>;` and the identifier.
impl FromStr for ExpandedNodeId {
    type Err = StatusCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = node_id_captures(s)?;
        let server_index =
            parse_capture::<u32>(&captures, "svr")?.ok_or(StatusCode::BadNodeIdInvalid)?;
        let namespace = parse_capture::<u16>(&captures, "ns")?.unwrap_or(0);
        let namespace_uri = match captures.name("nsu") {
            Some(uri) => uri.as_str().replace("%3b", ";").replace("%25", "%").into(),
            None => UAString::null(),
        };
        Ok(ExpandedNodeId {
            node_id: NodeId::new(namespace, parse_identifier(&captures)?),
            namespace_uri,
            server_index,
        })
    }
}
