// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! User identity tokens for ActivateSession. Passwords are encrypted with the server's public
//! key unless the effective policy is None. Certificate identities come with a signature made
//! with the user's key.

use crate::types::{
    service_types::{SignatureData, UserNameIdentityToken, UserTokenPolicy, X509IdentityToken},
    status_code::StatusCode,
    ByteString, UAString,
};

use super::{KeySize, PrivateKey, RsaPadding, SecurityPolicy, X509};

/// A token policy that names no security policy inherits the channel's. One naming a policy
/// nobody knows counts as None.
fn effective_policy(channel: SecurityPolicy, token_policy: &UserTokenPolicy) -> SecurityPolicy {
    let uri = token_policy.security_policy_uri.as_ref();
    if uri.is_empty() {
        return channel;
    }
    match SecurityPolicy::from_uri(uri) {
        SecurityPolicy::Unknown => SecurityPolicy::None,
        policy => policy,
    }
}

pub fn make_user_name_identity_token(
    channel_security_policy: SecurityPolicy,
    user_token_policy: &UserTokenPolicy,
    nonce: &[u8],
    cert: &Option<X509>,
    user: &str,
    pass: &str,
) -> Result<UserNameIdentityToken, StatusCode> {
    let (password, encryption_algorithm) =
        match effective_policy(channel_security_policy, user_token_policy) {
            SecurityPolicy::Unknown => {
                error!("No user name token can be made for an unknown security policy");
                return Err(StatusCode::BadSecurityPolicyRejected);
            }
            SecurityPolicy::None => {
                if channel_security_policy == SecurityPolicy::None {
                    warn!("The password of user {} goes over the network in plain text", user);
                }
                (ByteString::from(pass.as_bytes()), UAString::null())
            }
            policy => {
                let Some(cert) = cert else {
                    error!("The password cannot be encrypted without the server certificate");
                    return Err(StatusCode::BadIdentityTokenInvalid);
                };
                let padding = policy.asymmetric_encryption_padding()?;
                (
                    legacy_password_encrypt(pass, nonce, cert, padding)?,
                    UAString::from(policy.asymmetric_encryption_algorithm()),
                )
            }
        };

    Ok(UserNameIdentityToken {
        policy_id: user_token_policy.policy_id.clone(),
        user_name: UAString::from(user),
        password,
        encryption_algorithm,
    })
}

/// The token carries the user's certificate. The signature over the server certificate and
/// nonce is made with the user's key, under Basic256Sha256 if the policy would be None.
pub fn make_x509_identity_token(
    channel_security_policy: SecurityPolicy,
    user_token_policy: &UserTokenPolicy,
    user_cert: &X509,
    user_key: &PrivateKey,
    server_cert: &ByteString,
    server_nonce: &ByteString,
) -> Result<(X509IdentityToken, SignatureData), StatusCode> {
    let signing_policy = match effective_policy(channel_security_policy, user_token_policy) {
        SecurityPolicy::None => SecurityPolicy::Basic256Sha256,
        policy => policy,
    };
    let signature =
        super::create_signature_data(user_key, signing_policy, server_cert, server_nonce)?;
    Ok((
        X509IdentityToken {
            policy_id: user_token_policy.policy_id.clone(),
            certificate_data: user_cert.as_byte_string()?,
        },
        signature,
    ))
}

/// The legacy secret is a little endian u32 length, then the password, then the server
/// nonce, encrypted with the key of the server's certificate.
pub fn legacy_password_encrypt(
    password: &str,
    server_nonce: &[u8],
    server_cert: &X509,
    padding: RsaPadding,
) -> Result<ByteString, StatusCode> {
    let secret_len = password.len() + server_nonce.len();
    let length = u32::try_from(secret_len).map_err(|_| StatusCode::BadEncodingError)?;
    let plaintext = [&length.to_le_bytes()[..], password.as_bytes(), server_nonce].concat();

    let public_key = server_cert.public_key()?;
    let mut cipher = vec![0u8; public_key.calculate_cipher_text_size(plaintext.len(), padding)];
    let written = public_key
        .public_encrypt(&plaintext, &mut cipher, padding)
        .map_err(|_| StatusCode::BadEncodingError)?;
    if written != cipher.len() {
        error!("Encrypted password is {} bytes instead of {}", written, cipher.len());
        return Err(StatusCode::BadEncodingError);
    }
    Ok(ByteString::from(cipher))
}

/// The inverse of [`legacy_password_encrypt`], as a server does it. Fails when the nonce in the
/// secret is not `server_nonce`.
pub fn legacy_password_decrypt(
    secret: &ByteString,
    server_nonce: &[u8],
    server_key: &PrivateKey,
    padding: RsaPadding,
) -> Result<String, StatusCode> {
    let Some(cipher) = secret.value.as_deref() else {
        return Err(StatusCode::BadDecodingError);
    };
    let mut plaintext = vec![0u8; cipher.len()];
    let len = server_key
        .private_decrypt(cipher, &mut plaintext, padding)
        .map_err(|_| StatusCode::BadDecodingError)?;
    plaintext.truncate(len);

    if plaintext.len() < 4 {
        return Err(StatusCode::BadDecodingError);
    }
    let (length, rest) = plaintext.split_at(4);
    let length = u32::from_le_bytes([length[0], length[1], length[2], length[3]]);
    if length as usize != rest.len() {
        return Err(StatusCode::BadDecodingError);
    }
    match rest.strip_suffix(server_nonce) {
        Some(password) => {
            String::from_utf8(password.to_vec()).map_err(|_| StatusCode::BadDecodingError)
        }
        None => Err(StatusCode::BadDecodingError),
    }
}
