// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Asymmetric encryption / decryption, signing / verification wrapper.
use std::{
    fmt::{self, Debug, Formatter},
    path::Path,
};

use rsa::{
    pkcs1, pkcs1v15, pkcs8, pss,
    signature::{RandomizedSigner, SignatureEncoding, Verifier},
    traits::PublicKeyParts,
    Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey,
};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::types::status_code::StatusCode;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RsaPadding {
    Pkcs1,
    OaepSha1,
    OaepSha256,
}

#[derive(Debug)]
pub struct PKeyError;

impl fmt::Display for PKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PKeyError")
    }
}

impl std::error::Error for PKeyError {}

impl From<pkcs8::Error> for PKeyError {
    fn from(_err: pkcs8::Error) -> Self {
        PKeyError
    }
}

impl From<pkcs1::Error> for PKeyError {
    fn from(_err: pkcs1::Error) -> Self {
        PKeyError
    }
}

impl From<rsa::Error> for PKeyError {
    fn from(_err: rsa::Error) -> Self {
        PKeyError
    }
}

impl From<pkcs8::spki::Error> for PKeyError {
    fn from(_err: pkcs8::spki::Error) -> Self {
        PKeyError
    }
}

impl From<PKeyError> for StatusCode {
    fn from(_err: PKeyError) -> Self {
        StatusCode::BadSecurityChecksFailed
    }
}

/// This is a wrapper around an asymmetric key pair. Since the PKey is either
/// a public or private key so we have to differentiate that as well.
#[derive(Clone)]
pub struct PKey<T> {
    pub(crate) value: T,
}

/// A public key
pub type PublicKey = PKey<RsaPublicKey>;
// A private key
pub type PrivateKey = PKey<RsaPrivateKey>;

impl<T> Debug for PKey<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // This impl will not write out the key, but it exists to keep structs happy
        // that contain a key as a field
        write!(f, "[pkey]")
    }
}

pub trait KeySize {
    fn bit_length(&self) -> usize {
        self.size() * 8
    }

    /// Length in bytes
    fn size(&self) -> usize;

    fn calculate_cipher_text_size(&self, data_size: usize, padding: RsaPadding) -> usize {
        let plain_text_block_size = self.plain_text_block_size(padding);
        let block_count = if data_size % plain_text_block_size == 0 {
            data_size / plain_text_block_size
        } else {
            (data_size / plain_text_block_size) + 1
        };
        block_count * self.cipher_text_block_size()
    }

    /// The maximum plain text block per padding. PKCS#1 v1.5 is keyLength - 11, OAEP is
    /// keyLength - 2 * hashLength - 2.
    fn plain_text_block_size(&self, padding: RsaPadding) -> usize {
        match padding {
            RsaPadding::Pkcs1 => self.size() - 11,
            RsaPadding::OaepSha1 => self.size() - 42,
            RsaPadding::OaepSha256 => self.size() - 66,
        }
    }

    fn cipher_text_block_size(&self) -> usize {
        self.size()
    }
}

impl KeySize for PrivateKey {
    fn size(&self) -> usize {
        self.value.size()
    }
}

/// Copies a produced signature into the caller's buffer, which must be large enough.
fn copy_signature(signed: &[u8], signature: &mut [u8]) -> Result<usize, StatusCode> {
    if signature.len() < signed.len() {
        error!(
            "Signature buffer of {} bytes cannot hold a {} byte signature",
            signature.len(),
            signed.len()
        );
        return Err(StatusCode::BadInvalidArgument);
    }
    signature[..signed.len()].copy_from_slice(signed);
    Ok(signed.len())
}

impl PrivateKey {
    pub fn new(bit_length: u32) -> Result<PrivateKey, PKeyError> {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, bit_length as usize)?;
        Ok(PKey { value: key })
    }

    pub fn read_pem_file(path: &Path) -> Result<PrivateKey, PKeyError> {
        use pkcs1::DecodeRsaPrivateKey;
        use pkcs8::DecodePrivateKey;

        match RsaPrivateKey::read_pkcs8_pem_file(path) {
            Ok(value) => Ok(PKey { value }),
            Err(_) => Ok(PKey {
                value: RsaPrivateKey::read_pkcs1_pem_file(path)?,
            }),
        }
    }

    pub fn from_pem(bytes: &[u8]) -> Result<PrivateKey, PKeyError> {
        use pkcs1::DecodeRsaPrivateKey;
        use pkcs8::DecodePrivateKey;

        let pem = std::str::from_utf8(bytes).map_err(|_| PKeyError)?;
        match RsaPrivateKey::from_pkcs8_pem(pem) {
            Ok(value) => Ok(PKey { value }),
            Err(_) => Ok(PKey {
                value: RsaPrivateKey::from_pkcs1_pem(pem)?,
            }),
        }
    }

    /// Private key in PKCS#8 PEM form
    pub fn to_pem(&self) -> Result<String, PKeyError> {
        use pkcs8::EncodePrivateKey;
        let pem = self.value.to_pkcs8_pem(pkcs8::LineEnding::LF)?;
        Ok(pem.as_str().to_string())
    }

    pub fn to_der(&self) -> Result<pkcs8::SecretDocument, PKeyError> {
        use pkcs8::EncodePrivateKey;
        Ok(self.value.to_pkcs8_der()?)
    }

    pub fn public_key_to_info(&self) -> Result<SubjectPublicKeyInfoOwned, PKeyError> {
        use pkcs8::EncodePublicKey;
        let der = self.value.to_public_key().to_public_key_der()?;
        Ok(SubjectPublicKeyInfoOwned::try_from(der.as_bytes())?)
    }

    pub fn to_public_key(&self) -> PublicKey {
        PublicKey {
            value: self.value.to_public_key(),
        }
    }

    /// Signs the data using RSA-SHA256
    pub fn sign_sha256(&self, data: &[u8], signature: &mut [u8]) -> Result<usize, StatusCode> {
        let mut rng = rand::thread_rng();
        let signing_key = pkcs1v15::SigningKey::<sha2::Sha256>::new(self.value.clone());
        let signed = signing_key
            .try_sign_with_rng(&mut rng, data)
            .map_err(|_| StatusCode::BadUnexpectedError)?;
        copy_signature(&signed.to_vec(), signature)
    }

    /// Signs the data using RSA-SHA256-PSS
    pub fn sign_sha256_pss(&self, data: &[u8], signature: &mut [u8]) -> Result<usize, StatusCode> {
        let mut rng = rand::thread_rng();
        let signing_key = pss::BlindedSigningKey::<sha2::Sha256>::new(self.value.clone());
        let signed = signing_key
            .try_sign_with_rng(&mut rng, data)
            .map_err(|_| StatusCode::BadUnexpectedError)?;
        copy_signature(&signed.to_vec(), signature)
    }

    fn decrypt_block(&self, src: &[u8], padding: RsaPadding) -> rsa::errors::Result<Vec<u8>> {
        match padding {
            RsaPadding::Pkcs1 => self.value.decrypt(Pkcs1v15Encrypt, src),
            RsaPadding::OaepSha1 => self.value.decrypt(Oaep::new::<sha1::Sha1>(), src),
            RsaPadding::OaepSha256 => self.value.decrypt(Oaep::new::<sha2::Sha256>(), src),
        }
    }

    /// Decrypts data in src to dst using the specified padding and returning the size of the decrypted
    /// data in bytes or an error.
    pub fn private_decrypt(
        &self,
        src: &[u8],
        dst: &mut [u8],
        padding: RsaPadding,
    ) -> Result<usize, PKeyError> {
        let cipher_text_block_size = self.cipher_text_block_size();
        if src.len() % cipher_text_block_size != 0 {
            error!(
                "Cipher text of {} bytes is not a multiple of the key size",
                src.len()
            );
            return Err(PKeyError);
        }

        let mut dst_idx = 0;
        for block in src.chunks(cipher_text_block_size) {
            let decrypted = self.decrypt_block(block, padding)?;
            let end = dst_idx + decrypted.len();
            if end > dst.len() {
                return Err(PKeyError);
            }
            dst[dst_idx..end].copy_from_slice(&decrypted);
            dst_idx = end;
        }
        Ok(dst_idx)
    }
}

impl KeySize for PublicKey {
    fn size(&self) -> usize {
        self.value.size()
    }
}

impl PublicKey {
    /// Verifies the data using RSA-SHA256
    pub fn verify_sha256(&self, data: &[u8], signature: &[u8]) -> Result<bool, StatusCode> {
        let verifying_key = pkcs1v15::VerifyingKey::<sha2::Sha256>::new(self.value.clone());
        let signature =
            pkcs1v15::Signature::try_from(signature).map_err(|_| StatusCode::BadUnexpectedError)?;
        Ok(verifying_key.verify(data, &signature).is_ok())
    }

    /// Verifies the data using RSA-SHA256-PSS
    pub fn verify_sha256_pss(&self, data: &[u8], signature: &[u8]) -> Result<bool, StatusCode> {
        let verifying_key = pss::VerifyingKey::<sha2::Sha256>::new(self.value.clone());
        let signature =
            pss::Signature::try_from(signature).map_err(|_| StatusCode::BadUnexpectedError)?;
        Ok(verifying_key.verify(data, &signature).is_ok())
    }

    /// Verifies a PKCS#1 v1.5 SHA-1 signature. Only used when checking certificate signatures
    /// made by older issuers.
    pub fn verify_sha1(&self, data: &[u8], signature: &[u8]) -> Result<bool, StatusCode> {
        let verifying_key = pkcs1v15::VerifyingKey::<sha1::Sha1>::new(self.value.clone());
        let signature =
            pkcs1v15::Signature::try_from(signature).map_err(|_| StatusCode::BadUnexpectedError)?;
        Ok(verifying_key.verify(data, &signature).is_ok())
    }

    fn encrypt_block(&self, src: &[u8], padding: RsaPadding) -> rsa::errors::Result<Vec<u8>> {
        let mut rng = rand::thread_rng();
        match padding {
            RsaPadding::Pkcs1 => self.value.encrypt(&mut rng, Pkcs1v15Encrypt, src),
            RsaPadding::OaepSha1 => self
                .value
                .encrypt(&mut rng, Oaep::new::<sha1::Sha1>(), src),
            RsaPadding::OaepSha256 => self
                .value
                .encrypt(&mut rng, Oaep::new::<sha2::Sha256>(), src),
        }
    }

    /// Encrypts data from src to dst using the specified padding and returns the size of encrypted
    /// data in bytes or an error.
    pub fn public_encrypt(
        &self,
        src: &[u8],
        dst: &mut [u8],
        padding: RsaPadding,
    ) -> Result<usize, PKeyError> {
        let plain_text_block_size = self.plain_text_block_size(padding);
        let mut dst_idx = 0;
        for block in src.chunks(plain_text_block_size) {
            let encrypted = self.encrypt_block(block, padding)?;
            let end = dst_idx + encrypted.len();
            if end > dst.len() {
                return Err(PKeyError);
            }
            dst[dst_idx..end].copy_from_slice(&encrypted);
            dst_idx = end;
        }
        Ok(dst_idx)
    }
}
