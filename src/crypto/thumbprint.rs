// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Functionality for holding a message digest.
use crate::types::{status_code::StatusCode, ByteString};

/// The thumbprint holds a 20 byte representation of a certificate that can be used as a hash,
/// handshake comparison, a filename hint or similar purpose where a shortened representation
/// of a cert is required.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct Thumbprint {
    value: [u8; Thumbprint::THUMBPRINT_SIZE],
}

impl From<Thumbprint> for ByteString {
    fn from(value: Thumbprint) -> ByteString {
        ByteString::from(&value.value)
    }
}

impl Thumbprint {
    pub const THUMBPRINT_SIZE: usize = 20;

    /// Constructs a thumbprint from a message digest which is expected to be the proper length
    pub fn new(digest: &[u8]) -> Result<Thumbprint, StatusCode> {
        if digest.len() != Thumbprint::THUMBPRINT_SIZE {
            error!("Thumbprint is the wrong length, {}", digest.len());
            return Err(StatusCode::BadInvalidArgument);
        }
        let mut value = [0u8; Thumbprint::THUMBPRINT_SIZE];
        value.clone_from_slice(digest);
        Ok(Thumbprint { value })
    }

    pub fn as_byte_string(&self) -> ByteString {
        ByteString::from(&self.value)
    }

    /// Returns the thumbprint as a string using hexadecimal values for each byte
    pub fn as_hex_string(&self) -> String {
        self.value.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn value(&self) -> &[u8] {
        &self.value[..]
    }
}
