// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::types::encoding::{
    read_sized, write_sized, BinaryEncoder, DecodingOptions, EncodingResult,
};

/// Opaque octets, or null. Nonces, certificates and signatures are all carried as these.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Default)]
pub struct ByteString {
    pub value: Option<Vec<u8>>,
}

impl ByteString {
    pub fn null() -> ByteString {
        ByteString { value: None }
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Null counts as empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    /// `number_of_bytes` bytes from the thread's random generator.
    pub fn random(number_of_bytes: usize) -> ByteString {
        use rand::RngCore;
        let mut bytes = vec![0u8; number_of_bytes];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes.into()
    }

    pub fn from_base64(data: &str) -> Option<ByteString> {
        STANDARD.decode(data).ok().map(ByteString::from)
    }

    pub fn as_base64(&self) -> String {
        STANDARD.encode(self)
    }
}

impl AsRef<[u8]> for ByteString {
    fn as_ref(&self) -> &[u8] {
        self.value.as_deref().unwrap_or_default()
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(value: Vec<u8>) -> Self {
        ByteString { value: Some(value) }
    }
}

impl<T> From<&T> for ByteString
where
    T: AsRef<[u8]> + ?Sized,
{
    fn from(value: &T) -> Self {
        value.as_ref().to_vec().into()
    }
}

impl BinaryEncoder<ByteString> for ByteString {
    fn byte_len(&self) -> usize {
        4 + self.len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_sized(stream, self.value.as_deref())
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        read_sized(stream, decoding_options.max_byte_string_length, "ByteString")
            .map(|value| ByteString { value })
    }
}

// Base64 text in JSON, null for null
impl Serialize for ByteString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value
            .as_ref()
            .map(|_| self.as_base64())
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ByteString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(ByteString::null()),
            Some(text) => ByteString::from_base64(&text)
                .ok_or_else(|| de::Error::custom("ByteString is not valid base64")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_not_null() {
        assert!(ByteString::null().is_null());
        assert!(ByteString::null().is_empty());
        let empty = ByteString::from(Vec::new());
        assert!(!empty.is_null());
        assert!(empty.is_empty());
    }

    #[test]
    fn base64_text() {
        let v = ByteString::from(&[0x0bu8, 0xad, 0xf0, 0x0d]);
        assert_eq!(v.as_base64(), "C63wDQ==");
        assert_eq!(ByteString::from_base64("C63wDQ=="), Some(v));
        assert_eq!(ByteString::from_base64("not base64!"), None);
    }

    #[test]
    fn json_null() {
        assert_eq!(serde_json::to_string(&ByteString::null()).unwrap(), "null");
        let v: ByteString = serde_json::from_str("\"AQI=\"").unwrap();
        assert_eq!(v.as_ref(), &[1u8, 2]);
    }
}
