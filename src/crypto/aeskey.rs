// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! AES-CBC over whole blocks, as used for the symmetric encryption of chunks. Padding is the
//! chunker's business, so none is applied here.

use aes::cipher::{
    block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};

use crate::types::status_code::StatusCode;

use super::SecurityPolicy;

const AES_BLOCK_SIZE: usize = 16;

type EncryptResult = Result<usize, StatusCode>;

/// Which AES the policy uses.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Cipher {
    Aes128,
    Aes256,
}

impl Cipher {
    fn of(security_policy: SecurityPolicy) -> Option<Cipher> {
        match security_policy {
            SecurityPolicy::Aes128Sha256RsaOaep => Some(Cipher::Aes128),
            SecurityPolicy::Basic256Sha256 | SecurityPolicy::Aes256Sha256RsaPss => {
                Some(Cipher::Aes256)
            }
            _ => None,
        }
    }

    fn key_length(self) -> usize {
        match self {
            Cipher::Aes128 => 16,
            Cipher::Aes256 => 32,
        }
    }
}

fn encrypt_with<C: BlockEncryptMut + KeyIvInit>(
    key: &[u8],
    iv: &[u8],
    src: &[u8],
    dst: &mut [u8],
) -> EncryptResult {
    C::new_from_slices(key, iv)
        .map_err(|_| StatusCode::BadUnexpectedError)?
        .encrypt_padded_b2b_mut::<NoPadding>(src, dst)
        .map(|out| out.len())
        .map_err(|_| StatusCode::BadUnexpectedError)
}

fn decrypt_with<C: BlockDecryptMut + KeyIvInit>(
    key: &[u8],
    iv: &[u8],
    src: &[u8],
    dst: &mut [u8],
) -> EncryptResult {
    C::new_from_slices(key, iv)
        .map_err(|_| StatusCode::BadUnexpectedError)?
        .decrypt_padded_b2b_mut::<NoPadding>(src, dst)
        .map(|out| out.len())
        .map_err(|_| StatusCode::BadSecurityChecksFailed)
}

#[derive(Debug, Clone)]
pub struct AesKey {
    value: Vec<u8>,
    security_policy: SecurityPolicy,
}

impl AesKey {
    pub fn new(security_policy: SecurityPolicy, value: &[u8]) -> AesKey {
        AesKey {
            value: value.to_vec(),
            security_policy,
        }
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// 0 when the policy does not encrypt.
    pub fn block_size(&self) -> usize {
        self.cipher().map_or(0, |_| AES_BLOCK_SIZE)
    }

    pub fn iv_length(&self) -> usize {
        self.block_size()
    }

    pub fn key_length(&self) -> usize {
        self.cipher().map_or(0, Cipher::key_length)
    }

    fn cipher(&self) -> Option<Cipher> {
        Cipher::of(self.security_policy)
    }

    /// The cipher for a call with these buffers. `dst` needs a block of room past `src`.
    fn checked_cipher(&self, src: &[u8], iv: &[u8], dst: &[u8]) -> Result<Cipher, StatusCode> {
        let cipher = self.cipher().ok_or(StatusCode::BadSecurityPolicyRejected)?;
        let problem = if self.value.len() != cipher.key_length() {
            Some(format!("key is {} bytes", self.value.len()))
        } else if iv.len() != AES_BLOCK_SIZE {
            Some(format!("IV is {} bytes", iv.len()))
        } else if src.len() % AES_BLOCK_SIZE != 0 {
            Some(format!("{} bytes are not whole blocks", src.len()))
        } else if dst.len() < src.len() + AES_BLOCK_SIZE {
            Some(format!("output of {} bytes is too small for {}", dst.len(), src.len()))
        } else {
            None
        };
        match problem {
            Some(problem) => {
                error!("Cannot apply AES, {}", problem);
                Err(StatusCode::BadUnexpectedError)
            }
            None => Ok(cipher),
        }
    }

    pub fn encrypt(&self, src: &[u8], iv: &[u8], dst: &mut [u8]) -> EncryptResult {
        match self.checked_cipher(src, iv, dst)? {
            Cipher::Aes128 => encrypt_with::<cbc::Encryptor<aes::Aes128>>(&self.value, iv, src, dst),
            Cipher::Aes256 => encrypt_with::<cbc::Encryptor<aes::Aes256>>(&self.value, iv, src, dst),
        }
    }

    /// The IV is derived from the channel nonces like the key itself.
    pub fn decrypt(&self, src: &[u8], iv: &[u8], dst: &mut [u8]) -> EncryptResult {
        match self.checked_cipher(src, iv, dst)? {
            Cipher::Aes128 => decrypt_with::<cbc::Decryptor<aes::Aes128>>(&self.value, iv, src, dst),
            Cipher::Aes256 => decrypt_with::<cbc::Decryptor<aes::Aes256>>(&self.value, iv, src, dst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_and_key_sizes() {
        let key = AesKey::new(SecurityPolicy::Aes128Sha256RsaOaep, &[0u8; 16]);
        assert_eq!((key.block_size(), key.key_length()), (16, 16));
        let key = AesKey::new(SecurityPolicy::Aes256Sha256RsaPss, &[0u8; 32]);
        assert_eq!((key.block_size(), key.key_length()), (16, 32));
        let key = AesKey::new(SecurityPolicy::None, &[]);
        assert_eq!((key.block_size(), key.key_length()), (0, 0));
    }

    #[test]
    fn encrypt_then_decrypt() {
        let key = AesKey::new(SecurityPolicy::Basic256Sha256, &[7u8; 32]);
        let iv = [3u8; 16];
        let plain: Vec<u8> = (0u8..32).collect();
        let mut cipher = [0u8; 48];
        assert_eq!(key.encrypt(&plain, &iv, &mut cipher), Ok(32));
        assert_ne!(&cipher[..32], &plain[..]);
        let mut decrypted = [0u8; 48];
        assert_eq!(key.decrypt(&cipher[..32], &iv, &mut decrypted), Ok(32));
        assert_eq!(&decrypted[..32], &plain[..]);
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        let key = AesKey::new(SecurityPolicy::Basic256Sha256, &[0u8; 16]);
        let mut dst = [0u8; 48];
        assert_eq!(
            key.encrypt(&[0u8; 32], &[0u8; 16], &mut dst),
            Err(StatusCode::BadUnexpectedError)
        );
    }
}
