// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The algorithms and key sizes a secure channel uses under each security policy.

use std::{fmt, ops::RangeInclusive, str::FromStr};

use crate::types::{constants, status_code::StatusCode, ByteString};

use super::{
    aeskey::AesKey,
    algorithms::*,
    hash,
    pkey::{PrivateKey, PublicKey, RsaPadding},
    random, SHA256_SIZE,
};

/// Sizes of the keys derived for a channel, in bytes. Only policies the client can actually
/// secure a channel with have them.
#[derive(Debug)]
struct DerivedKeys {
    signing: usize,
    encrypting: usize,
    block: usize,
}

#[derive(Debug)]
struct Profile {
    name: &'static str,
    uri: &'static str,
    symmetric_signature: &'static str,
    asymmetric_signature: &'static str,
    asymmetric_encryption: &'static str,
    /// Accepted RSA modulus, in bits
    asymmetric_key_bits: RangeInclusive<usize>,
    nonce_length: usize,
    derived_keys: Option<DerivedKeys>,
}

const KEYS_AES_256: Option<DerivedKeys> = Some(DerivedKeys {
    signing: 32,
    encrypting: 32,
    block: 16,
});

static NONE: Profile = Profile {
    name: constants::SECURITY_POLICY_NONE,
    uri: constants::SECURITY_POLICY_NONE_URI,
    symmetric_signature: "",
    asymmetric_signature: "",
    asymmetric_encryption: "",
    asymmetric_key_bits: 0..=usize::MAX,
    // Still used to sign user identity tokens over an unsecured channel
    nonce_length: 32,
    derived_keys: None,
};

static BASIC_256_SHA_256: Profile = Profile {
    name: "Basic256Sha256",
    uri: "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
    symmetric_signature: DSIG_HMAC_SHA256,
    asymmetric_signature: DSIG_RSA_SHA256,
    asymmetric_encryption: ENC_RSA_OAEP,
    asymmetric_key_bits: 2048..=4096,
    nonce_length: 32,
    derived_keys: KEYS_AES_256,
};

static AES_128_SHA_256_RSA_OAEP: Profile = Profile {
    name: "Aes128-Sha256-RsaOaep",
    uri: "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep",
    symmetric_signature: DSIG_HMAC_SHA256,
    asymmetric_signature: DSIG_RSA_SHA256,
    asymmetric_encryption: ENC_RSA_OAEP,
    asymmetric_key_bits: 2048..=4096,
    nonce_length: 32,
    derived_keys: Some(DerivedKeys {
        signing: 32,
        encrypting: 16,
        block: 16,
    }),
};

static AES_256_SHA_256_RSA_PSS: Profile = Profile {
    name: "Aes256-Sha256-RsaPss",
    uri: "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss",
    symmetric_signature: DSIG_HMAC_SHA256,
    asymmetric_signature: DSIG_RSA_PSS_SHA2_256,
    asymmetric_encryption: ENC_RSA_OAEP_SHA256,
    asymmetric_key_bits: 2048..=4096,
    nonce_length: 32,
    derived_keys: KEYS_AES_256,
};

// The SHA-1 policies are recognized so their endpoints can be reported and refused.

static BASIC_128_RSA_15: Profile = Profile {
    name: "Basic128Rsa15",
    uri: "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15",
    symmetric_signature: DSIG_HMAC_SHA1,
    asymmetric_signature: DSIG_RSA_SHA1,
    asymmetric_encryption: ENC_RSA_15,
    asymmetric_key_bits: 1024..=2048,
    nonce_length: 16,
    derived_keys: None,
};

static BASIC_256: Profile = Profile {
    name: "Basic256",
    uri: "http://opcfoundation.org/UA/SecurityPolicy#Basic256",
    symmetric_signature: DSIG_HMAC_SHA1,
    asymmetric_signature: DSIG_RSA_SHA1,
    asymmetric_encryption: ENC_RSA_OAEP,
    asymmetric_key_bits: 1024..=2048,
    nonce_length: 32,
    derived_keys: None,
};

static UNKNOWN: Profile = Profile {
    name: "Unknown",
    uri: "",
    symmetric_signature: "",
    asymmetric_signature: "",
    asymmetric_encryption: "",
    asymmetric_key_bits: 0..=usize::MAX,
    nonce_length: 32,
    derived_keys: None,
};

/// The security policy of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Copy)]
pub enum SecurityPolicy {
    Unknown,
    None,
    Aes128Sha256RsaOaep,
    Basic256Sha256,
    Aes256Sha256RsaPss,
    Basic128Rsa15,
    Basic256,
}

const KNOWN: [SecurityPolicy; 6] = [
    SecurityPolicy::None,
    SecurityPolicy::Basic256Sha256,
    SecurityPolicy::Aes128Sha256RsaOaep,
    SecurityPolicy::Aes256Sha256RsaPss,
    SecurityPolicy::Basic128Rsa15,
    SecurityPolicy::Basic256,
];

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

impl FromStr for SecurityPolicy {
    type Err = ();

    /// Takes the short name or the uri. Anything else is `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let policy = KNOWN
            .into_iter()
            .find(|p| p.profile().name == s || p.profile().uri == s)
            .unwrap_or_else(|| {
                error!("Security policy \"{}\" is not recognized", s);
                SecurityPolicy::Unknown
            });
        Ok(policy)
    }
}

impl From<SecurityPolicy> for String {
    fn from(v: SecurityPolicy) -> String {
        v.to_str().to_string()
    }
}

impl SecurityPolicy {
    fn profile(&self) -> &'static Profile {
        match self {
            SecurityPolicy::None => &NONE,
            SecurityPolicy::Basic256Sha256 => &BASIC_256_SHA_256,
            SecurityPolicy::Aes128Sha256RsaOaep => &AES_128_SHA_256_RSA_OAEP,
            SecurityPolicy::Aes256Sha256RsaPss => &AES_256_SHA_256_RSA_PSS,
            SecurityPolicy::Basic128Rsa15 => &BASIC_128_RSA_15,
            SecurityPolicy::Basic256 => &BASIC_256,
            SecurityPolicy::Unknown => &UNKNOWN,
        }
    }

    pub fn from_uri(uri: &str) -> SecurityPolicy {
        KNOWN
            .into_iter()
            .find(|p| p.profile().uri == uri)
            .unwrap_or_else(|| {
                error!("Security policy uri \"{}\" is not recognized", uri);
                SecurityPolicy::Unknown
            })
    }

    /// Empty for `Unknown`.
    pub fn to_uri(&self) -> &'static str {
        self.profile().uri
    }

    pub fn to_str(&self) -> &'static str {
        self.profile().name
    }

    /// True for `None` and every policy a channel can be secured with.
    pub fn is_supported(&self) -> bool {
        *self == SecurityPolicy::None || self.profile().derived_keys.is_some()
    }

    pub fn is_deprecated(&self) -> bool {
        matches!(self, SecurityPolicy::Basic128Rsa15 | SecurityPolicy::Basic256)
    }

    pub fn asymmetric_encryption_algorithm(&self) -> &'static str {
        self.profile().asymmetric_encryption
    }

    pub fn asymmetric_signature_algorithm(&self) -> &'static str {
        self.profile().asymmetric_signature
    }

    pub fn symmetric_signature_algorithm(&self) -> &'static str {
        self.profile().symmetric_signature
    }

    fn derived_keys(&self) -> Result<&'static DerivedKeys, StatusCode> {
        self.profile().derived_keys.as_ref().ok_or_else(|| {
            error!("Security policy {} cannot secure a channel", self);
            StatusCode::BadSecurityPolicyRejected
        })
    }

    /// AES block size, 0 when nothing is encrypted
    pub fn plain_block_size(&self) -> usize {
        self.derived_keys().map_or(0, |k| k.block)
    }

    /// HMAC size, 0 when nothing is signed
    pub fn symmetric_signature_size(&self) -> usize {
        if self.derived_keys().is_ok() {
            SHA256_SIZE
        } else {
            0
        }
    }

    pub fn derived_signature_key_size(&self) -> usize {
        self.derived_keys().map_or(0, |k| k.signing)
    }

    pub fn is_valid_keylength(&self, keylength: usize) -> bool {
        self.profile().asymmetric_key_bits.contains(&keylength)
    }

    pub fn secure_channel_nonce_length(&self) -> usize {
        self.profile().nonce_length
    }

    /// A fresh nonce of the policy's length, null for `None`.
    pub fn random_nonce(&self) -> ByteString {
        if *self == SecurityPolicy::None {
            ByteString::null()
        } else {
            random::byte_string(self.secure_channel_nonce_length())
        }
    }

    /// Derives the signing key, encrypting key and IV of one direction of the channel with
    /// P_SHA256, Part 6 section 6.7.5. Keys used to secure what the client sends have the
    /// server nonce as secret and the client nonce as seed, the other direction swaps them.
    pub fn make_secure_channel_keys(
        &self,
        secret: &[u8],
        seed: &[u8],
    ) -> Result<(Vec<u8>, AesKey, Vec<u8>), StatusCode> {
        let sizes = self.derived_keys()?;
        let total = sizes.signing + sizes.encrypting + sizes.block;
        let mut material = hash::p_sha256(secret, seed, total)?;
        material.truncate(total);

        let iv = material.split_off(sizes.signing + sizes.encrypting);
        let encrypting_key = material.split_off(sizes.signing);
        Ok((material, AesKey::new(*self, &encrypting_key), iv))
    }

    pub fn asymmetric_encryption_padding(&self) -> Result<RsaPadding, StatusCode> {
        self.derived_keys()?;
        Ok(match self {
            SecurityPolicy::Aes256Sha256RsaPss => RsaPadding::OaepSha256,
            _ => RsaPadding::OaepSha1,
        })
    }

    /// Signs with the private key and returns the size of the signature written.
    pub fn asymmetric_sign(
        &self,
        signing_key: &PrivateKey,
        data: &[u8],
        signature: &mut [u8],
    ) -> Result<usize, StatusCode> {
        self.derived_keys()?;
        if *self == SecurityPolicy::Aes256Sha256RsaPss {
            signing_key.sign_sha256_pss(data, signature)
        } else {
            signing_key.sign_sha256(data, signature)
        }
    }

    pub fn asymmetric_verify_signature(
        &self,
        verification_key: &PublicKey,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), StatusCode> {
        self.derived_keys()?;
        let verified = if *self == SecurityPolicy::Aes256Sha256RsaPss {
            verification_key.verify_sha256_pss(data, signature)?
        } else {
            verification_key.verify_sha256(data, signature)?
        };
        if !verified {
            error!("Asymmetric signature does not match");
            return Err(StatusCode::BadSecurityChecksFailed);
        }
        Ok(())
    }

    /// Returns the size written to `dst`, which must have room for the padded cipher text.
    pub fn asymmetric_encrypt(
        &self,
        encryption_key: &PublicKey,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, StatusCode> {
        let padding = self.asymmetric_encryption_padding()?;
        encryption_key
            .public_encrypt(src, dst, padding)
            .map_err(|_| StatusCode::BadUnexpectedError)
    }

    pub fn asymmetric_decrypt(
        &self,
        decryption_key: &PrivateKey,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, StatusCode> {
        let padding = self.asymmetric_encryption_padding()?;
        decryption_key
            .private_decrypt(src, dst, padding)
            .map_err(|_| {
                error!("Cannot decrypt with the private key");
                StatusCode::BadSecurityChecksFailed
            })
    }

    pub fn symmetric_sign(
        &self,
        key: &[u8],
        data: &[u8],
        signature: &mut [u8],
    ) -> Result<(), StatusCode> {
        self.derived_keys()?;
        trace!(
            "Signing {} bytes into a {} byte signature",
            data.len(),
            signature.len()
        );
        hash::hmac_sha256(key, data, signature)
    }

    pub fn symmetric_verify_signature(
        &self,
        key: &[u8],
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), StatusCode> {
        self.derived_keys()?;
        if hash::verify_hmac_sha256(key, data, signature) {
            Ok(())
        } else {
            error!("Symmetric signature does not match");
            Err(StatusCode::BadSecurityChecksFailed)
        }
    }

    pub fn symmetric_encrypt(
        &self,
        key: &AesKey,
        iv: &[u8],
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, StatusCode> {
        self.derived_keys()?;
        key.encrypt(src, iv, dst)
    }

    pub fn symmetric_decrypt(
        &self,
        key: &AesKey,
        iv: &[u8],
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, StatusCode> {
        self.derived_keys()?;
        key.decrypt(src, iv, dst)
    }
}
