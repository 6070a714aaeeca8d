// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Certificates, keys and the algorithms of each security policy. The client uses these to
//! decide whether to trust a server, to secure chunks and to prove possession of its keys when
//! activating a session.

use crate::types::{service_types::SignatureData, status_code::StatusCode, ByteString, UAString};

pub use {
    aeskey::*, certificate_store::*, hash::*, pkey::*, security_policy::*, thumbprint::*,
    user_identity::*, x509::*,
};

#[cfg(test)]
mod tests;

pub mod aeskey;
pub mod certificate_store;
pub mod hash;
pub mod pkey;
pub mod random;
pub mod security_policy;
pub mod thumbprint;
pub mod user_identity;
pub mod x509;

pub const SHA1_SIZE: usize = 20;
pub const SHA256_SIZE: usize = 32;

/// Algorithm URIs as they appear in security policies and signature data.
pub(crate) mod algorithms {
    pub const ENC_RSA_15: &str = "http://www.w3.org/2001/04/xmlenc#rsa-1_5";
    pub const ENC_RSA_OAEP: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep";
    pub const ENC_RSA_OAEP_SHA256: &str = "http://opcfoundation.org/UA/security/rsa-oaep-sha2-256";

    pub const DSIG_HMAC_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#hmac-sha1";
    pub const DSIG_HMAC_SHA256: &str = "http://www.w3.org/2000/09/xmldsig#hmac-sha256";

    pub const DSIG_RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
    pub const DSIG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
    pub const DSIG_RSA_PSS_SHA2_256: &str = "http://opcfoundation.org/UA/security/rsa-pss-sha2-256";
}

/// What a session signature covers: a certificate followed by a nonce.
fn signed_content(certificate: &[u8], nonce: &[u8]) -> Vec<u8> {
    [certificate, nonce].concat()
}

/// Signs `contained_cert` and `nonce` with `signing_key`, as the client does with the server's
/// certificate and nonce on ActivateSession. The signature is empty when there is nothing to
/// sign or the policy is None.
pub fn create_signature_data(
    signing_key: &PrivateKey,
    security_policy: SecurityPolicy,
    contained_cert: &ByteString,
    nonce: &ByteString,
) -> Result<SignatureData, StatusCode> {
    let nothing_to_sign = contained_cert.is_null() || nonce.is_null();
    let signature_data = match security_policy {
        SecurityPolicy::Unknown => {
            error!("Cannot sign with an unknown security policy");
            return Err(StatusCode::BadSecurityPolicyRejected);
        }
        SecurityPolicy::None => SignatureData {
            algorithm: UAString::null(),
            signature: ByteString::null(),
        },
        _ if nothing_to_sign => SignatureData {
            algorithm: UAString::null(),
            signature: ByteString::null(),
        },
        security_policy => {
            let content = signed_content(contained_cert.as_ref(), nonce.as_ref());
            let mut signature = vec![0u8; signing_key.size()];
            let size = security_policy.asymmetric_sign(signing_key, &content, &mut signature)?;
            signature.truncate(size);
            SignatureData {
                algorithm: UAString::from(security_policy.asymmetric_signature_algorithm()),
                signature: ByteString::from(signature),
            }
        }
    };
    trace!("Signature data {:?}", signature_data);
    Ok(signature_data)
}

/// Checks that `signing_cert`'s key produced `signature` over `contained_cert` and
/// `contained_nonce`.
pub fn verify_signature_data(
    signature: &SignatureData,
    security_policy: SecurityPolicy,
    signing_cert: &X509,
    contained_cert: &X509,
    contained_nonce: &[u8],
) -> StatusCode {
    let verify = || -> Result<(), StatusCode> {
        let verification_key = signing_cert.public_key().map_err(|err| {
            error!("Signing certificate has no usable public key");
            err
        })?;
        let contained_cert = contained_cert.as_byte_string()?;
        let content = signed_content(contained_cert.as_ref(), contained_nonce);
        security_policy.asymmetric_verify_signature(
            &verification_key,
            &content,
            signature.signature.as_ref(),
        )
    };
    match verify() {
        Ok(()) => StatusCode::Good,
        Err(status_code) => {
            error!("Signature does not verify, {}", status_code);
            status_code
        }
    }
}
