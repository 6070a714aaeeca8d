// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Nonces and serial numbers come from the thread local CSPRNG of `rand`.

use rand::RngCore;

use crate::types::byte_string::ByteString;

pub fn bytes(dst: &mut [u8]) {
    rand::thread_rng().fill_bytes(dst)
}

/// `len` random bytes, as used for nonces.
pub fn byte_string(len: usize) -> ByteString {
    let mut nonce = vec![0u8; len];
    bytes(&mut nonce);
    ByteString::from(nonce)
}
