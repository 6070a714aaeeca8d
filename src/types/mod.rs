// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Built-in OPC UA types, their binary encoding and the service messages exchanged with a
//! server.

pub mod constants {
    /// Maximum number of elements in an array
    pub const MAX_ARRAY_LENGTH: usize = 100_000;
    /// Maximum size of a string in chars
    pub const MAX_STRING_LENGTH: usize = 65_535;
    /// Maximum size of a byte string in bytes
    pub const MAX_BYTE_STRING_LENGTH: usize = 65_535;
    /// Maximum size of a certificate to send
    pub const MAX_CERTIFICATE_LENGTH: usize = 32_767;
    /// Maximum size of a message in bytes. 0 is no limit.
    pub const MAX_MESSAGE_SIZE: usize = 65_535 * 16;
    /// Maximum number of chunks per message. 0 is no limit.
    pub const MAX_CHUNK_COUNT: usize = 16;
    /// Maximum nesting of variants, data values, extension objects and diagnostics while decoding
    pub const MAX_DECODING_DEPTH: usize = 10;
    /// URI supplied for the None security policy
    pub const SECURITY_POLICY_NONE_URI: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";
    /// String used as shorthand in config files, debug etc.for `None` security policy
    pub const SECURITY_POLICY_NONE: &str = "None";
}

pub mod array;
pub mod attribute;
pub mod basic_types;
pub mod byte_string;
pub mod data_value;
pub mod date_time;
pub mod diagnostic_info;
pub mod encoding;
pub mod extension_object;
pub mod guid;
pub mod localized_text;
pub mod node_id;
pub mod node_ids;
pub mod qualified_name;
pub mod service_types;
pub mod status_code;
pub mod string;
pub mod variant;
pub mod variant_json;
pub mod variant_type_id;

#[cfg(test)]
mod tests;

pub use self::{
    array::*, attribute::AttributeId, basic_types::IntegerId, byte_string::ByteString, data_value::DataValue,
    date_time::*, diagnostic_info::*, encoding::*, extension_object::*, guid::Guid,
    localized_text::LocalizedText, node_id::*, node_ids::*, qualified_name::QualifiedName,
    service_types::*, status_code::StatusCode, string::*, variant::*, variant_json::*,
    variant_type_id::*,
};
