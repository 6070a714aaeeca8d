// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::io::{Cursor, Read, Write};

use crate::types::{
    byte_string::ByteString, encoding::*, node_id::NodeId, node_ids::ObjectId,
    status_code::StatusCode, string::XmlElement,
};

/// Body of an [`ExtensionObject`]. The binary form leads with 0, 1 or 2 for the variants in
/// declaration order.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub enum ExtensionObjectEncoding {
    None,
    ByteString(ByteString),
    XmlElement(XmlElement),
}

impl ExtensionObjectEncoding {
    fn tag(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::ByteString(_) => 1,
            Self::XmlElement(_) => 2,
        }
    }
}

/// A structure outside the built-in types, named by the node id of its encoding.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionObject {
    pub node_id: NodeId,
    pub body: ExtensionObjectEncoding,
}

impl Default for ExtensionObject {
    fn default() -> Self {
        Self::null()
    }
}

impl BinaryEncoder<ExtensionObject> for ExtensionObject {
    fn byte_len(&self) -> usize {
        let body = match &self.body {
            ExtensionObjectEncoding::None => 0,
            ExtensionObjectEncoding::ByteString(bytes) => bytes.byte_len(),
            ExtensionObjectEncoding::XmlElement(xml) => xml.byte_len(),
        };
        self.node_id.byte_len() + 1 + body
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let size = self.node_id.encode(stream)? + write_u8(stream, self.body.tag())?;
        let body = match &self.body {
            ExtensionObjectEncoding::None => 0,
            ExtensionObjectEncoding::ByteString(bytes) => bytes.encode(stream)?,
            ExtensionObjectEncoding::XmlElement(xml) => xml.encode(stream)?,
        };
        Ok(size + body)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let _depth_lock = decoding_options.depth_lock()?;
        let node_id = NodeId::decode(stream, decoding_options)?;
        let body = match read_u8(stream)? {
            0 => ExtensionObjectEncoding::None,
            1 => ExtensionObjectEncoding::ByteString(ByteString::decode(stream, decoding_options)?),
            2 => ExtensionObjectEncoding::XmlElement(XmlElement::decode(stream, decoding_options)?),
            tag => {
                error!("Extension object {} has an unknown body encoding {}", node_id, tag);
                return Err(StatusCode::BadDecodingError);
            }
        };
        Ok(ExtensionObject { node_id, body })
    }
}

impl ExtensionObject {
    pub fn null() -> ExtensionObject {
        ExtensionObject {
            node_id: NodeId::null(),
            body: ExtensionObjectEncoding::None,
        }
    }

    pub fn is_null(&self) -> bool {
        self.node_id.is_null()
    }

    /// True for a null object and for one without a body.
    pub fn is_empty(&self) -> bool {
        self.is_null() || self.body == ExtensionObjectEncoding::None
    }

    /// Fails unless the encoding id is a namespace 0 object id.
    pub fn object_id(&self) -> Result<ObjectId, StatusCode> {
        self.node_id.as_object_id()
    }

    /// Wraps `encodable` as a binary body under the given encoding id.
    pub fn from_encodable<N, T>(node_id: N, encodable: &T) -> ExtensionObject
    where
        N: Into<NodeId>,
        T: BinaryEncoder<T>,
    {
        ExtensionObject {
            node_id: node_id.into(),
            body: ExtensionObjectEncoding::ByteString(ByteString::from(encodable.encode_to_vec())),
        }
    }

    /// Decodes a binary body as `T`. The caller picks `T` from the encoding id, which is not
    /// checked here.
    pub fn decode_inner<T>(&self, decoding_options: &DecodingOptions) -> EncodingResult<T>
    where
        T: BinaryEncoder<T>,
    {
        let ExtensionObjectEncoding::ByteString(ByteString { value: Some(bytes) }) = &self.body
        else {
            error!("Extension object {} has no binary body to decode", self.node_id);
            return Err(StatusCode::BadDecodingError);
        };
        T::decode(&mut Cursor::new(bytes), decoding_options)
    }
}
