// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Hashing functions used for producing and verifying digital signatures

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::types::status_code::StatusCode;

use super::SHA256_SIZE;

type HmacSha256 = Hmac<Sha256>;

/// Pseudo random `P_SHA256` implementation for creating pseudo random range of bytes from an input
///
/// https://tools.ietf.org/html/rfc5246
///
/// P_SHA256(secret, seed) = HMAC_SHA256(secret, A(1) + seed) +
///                          HMAC_SHA256(secret, A(2) + seed) + ...
///
/// Where A(n) is defined as:
///   A(0) = seed
///   A(n) = HMAC_SHA256(secret, A(n-1))
pub fn p_sha256(secret: &[u8], seed: &[u8], length: usize) -> Result<Vec<u8>, StatusCode> {
    let mut result = Vec::with_capacity(length + SHA256_SIZE);
    let mut hmac = Vec::with_capacity(SHA256_SIZE + seed.len());
    let mut a_last = seed.to_vec();

    while result.len() < length {
        let a_next = sign_sha256(secret, &a_last)?;
        hmac.clear();
        hmac.extend_from_slice(&a_next);
        hmac.extend_from_slice(seed);
        result.extend_from_slice(&sign_sha256(secret, &hmac)?);
        a_last = a_next;
    }

    result.truncate(length);
    Ok(result)
}

fn new_hmac(key: &[u8]) -> Result<HmacSha256, StatusCode> {
    HmacSha256::new_from_slice(key).map_err(|_| {
        error!("HMAC key of {} bytes was rejected", key.len());
        StatusCode::BadInvalidArgument
    })
}

fn sign_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, StatusCode> {
    let mut mac = new_hmac(key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn hmac_sha256(key: &[u8], data: &[u8], signature: &mut [u8]) -> Result<(), StatusCode> {
    if signature.len() == SHA256_SIZE {
        signature.copy_from_slice(&sign_sha256(key, data)?);
        Ok(())
    } else {
        error!(
            "Signature buffer length must be exactly {} bytes to receive hmac_sha256 signature",
            SHA256_SIZE
        );
        Err(StatusCode::BadInvalidArgument)
    }
}

/// Verify that the HMAC for the data block matches the supplied signature
pub fn verify_hmac_sha256(key: &[u8], data: &[u8], signature: &[u8]) -> bool {
    if signature.len() != SHA256_SIZE {
        return false;
    }
    match new_hmac(key) {
        Ok(mut mac) => {
            mac.update(data);
            mac.verify_slice(signature).is_ok()
        }
        Err(_) => false,
    }
}
