// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    fmt,
    io::{Read, Write},
};

use crate::types::{
    encoding::{read_sized, write_sized, BinaryEncoder, DecodingOptions, EncodingResult},
    status_code::StatusCode,
};

/// An OPC UA String. It is UTF-8 text or null, and null is not the same thing as empty.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Default, Serialize, Deserialize)]
pub struct UAString {
    value: Option<String>,
}

/// XML fragments travel as plain strings.
pub type XmlElement = UAString;

impl UAString {
    pub fn null() -> UAString {
        UAString { value: None }
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Null counts as empty.
    pub fn is_empty(&self) -> bool {
        self.as_ref().is_empty()
    }

    /// Length in bytes, -1 when null.
    pub fn len(&self) -> isize {
        match &self.value {
            Some(value) => value.len() as isize,
            None => -1,
        }
    }

    pub fn value(&self) -> &Option<String> {
        &self.value
    }

    pub fn set_value(&mut self, value: Option<String>) {
        self.value = value;
    }
}

impl BinaryEncoder<UAString> for UAString {
    fn byte_len(&self) -> usize {
        4 + self.as_ref().len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_sized(stream, self.value.as_deref().map(str::as_bytes))
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let Some(bytes) = read_sized(stream, decoding_options.max_string_length, "String")? else {
            return Ok(UAString::null());
        };
        String::from_utf8(bytes).map(UAString::from).map_err(|e| {
            trace!("String is not UTF-8, {}", e);
            StatusCode::BadDecodingError
        })
    }
}

impl fmt::Display for UAString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value.as_deref().unwrap_or("[null]"))
    }
}

impl AsRef<str> for UAString {
    fn as_ref(&self) -> &str {
        self.value.as_deref().unwrap_or_default()
    }
}

impl PartialEq<str> for UAString {
    fn eq(&self, other: &str) -> bool {
        self.value.as_deref() == Some(other)
    }
}

impl From<Option<String>> for UAString {
    fn from(value: Option<String>) -> Self {
        UAString { value }
    }
}

impl From<String> for UAString {
    fn from(value: String) -> Self {
        Some(value).into()
    }
}

impl From<&String> for UAString {
    fn from(value: &String) -> Self {
        value.as_str().into()
    }
}

impl From<&str> for UAString {
    fn from(value: &str) -> Self {
        value.to_owned().into()
    }
}

impl From<UAString> for String {
    fn from(value: UAString) -> Self {
        value.value.unwrap_or_default()
    }
}
