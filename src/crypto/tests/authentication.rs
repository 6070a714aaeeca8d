use crate::types::{
    service_types::{UserTokenPolicy, UserTokenType},
    status_code::StatusCode,
    ByteString, UAString,
};

use crate::crypto::{
    self as crypto, legacy_password_decrypt, make_user_name_identity_token,
    make_x509_identity_token, random, tests::*, verify_signature_data, RsaPadding,
    SecurityPolicy, X509,
};

fn user_token_policy(security_policy_uri: UAString) -> UserTokenPolicy {
    UserTokenPolicy {
        policy_id: UAString::from("x"),
        token_type: UserTokenType::UserName,
        issued_token_type: UAString::null(),
        issuer_endpoint_url: UAString::null(),
        security_policy_uri,
    }
}

fn padding_for(encryption_algorithm: &UAString) -> RsaPadding {
    match encryption_algorithm.as_ref() {
        crypto::algorithms::ENC_RSA_OAEP => RsaPadding::OaepSha1,
        crypto::algorithms::ENC_RSA_OAEP_SHA256 => RsaPadding::OaepSha256,
        other => panic!("Unexpected algorithm {}", other),
    }
}

#[test]
fn user_name_identity_token_encrypted() {
    let password = String::from("abcdef123456");
    let nonce = random::byte_string(32);
    let (cert, pkey) = test_cert_a();
    let cert = Some(cert);

    // Plaintext since channel security policy is none, token policy is empty
    let token = make_user_name_identity_token(
        SecurityPolicy::None,
        &user_token_policy(UAString::null()),
        nonce.as_ref(),
        &cert,
        "user1",
        &password,
    )
    .unwrap();
    assert!(token.encryption_algorithm.is_null());
    assert_eq!(token.password.as_ref(), password.as_bytes());
    assert_eq!(token.user_name.as_ref(), "user1");
    assert_eq!(token.policy_id.as_ref(), "x");

    // Plaintext since the token policy is explicitly none
    let token = make_user_name_identity_token(
        SecurityPolicy::Basic256Sha256,
        &user_token_policy(UAString::from(SecurityPolicy::None.to_uri())),
        nonce.as_ref(),
        &cert,
        "user1",
        &password,
    )
    .unwrap();
    assert!(token.encryption_algorithm.is_null());
    assert_eq!(token.password.as_ref(), password.as_bytes());

    // Rsa-OAEP since channel security policy is none, token policy is Basic256Sha256
    let token = make_user_name_identity_token(
        SecurityPolicy::None,
        &user_token_policy(UAString::from(SecurityPolicy::Basic256Sha256.to_uri())),
        nonce.as_ref(),
        &cert,
        "user1",
        &password,
    )
    .unwrap();
    assert_eq!(
        token.encryption_algorithm.as_ref(),
        crypto::algorithms::ENC_RSA_OAEP
    );
    assert_ne!(token.password.as_ref(), password.as_bytes());
    let password1 = legacy_password_decrypt(
        &token.password,
        nonce.as_ref(),
        &pkey,
        padding_for(&token.encryption_algorithm),
    )
    .unwrap();
    assert_eq!(password, password1);

    // Rsa-OAEP-SHA256 since the channel is Aes256Sha256RsaPss and the token policy is empty
    let token = make_user_name_identity_token(
        SecurityPolicy::Aes256Sha256RsaPss,
        &user_token_policy(UAString::null()),
        nonce.as_ref(),
        &cert,
        "user1",
        &password,
    )
    .unwrap();
    assert_eq!(
        token.encryption_algorithm.as_ref(),
        crypto::algorithms::ENC_RSA_OAEP_SHA256
    );
    let password1 = legacy_password_decrypt(
        &token.password,
        nonce.as_ref(),
        &pkey,
        padding_for(&token.encryption_algorithm),
    )
    .unwrap();
    assert_eq!(password, password1);

    // The wrong nonce fails to decrypt
    let other_nonce = random::byte_string(32);
    assert!(legacy_password_decrypt(
        &token.password,
        other_nonce.as_ref(),
        &pkey,
        padding_for(&token.encryption_algorithm),
    )
    .is_err());
}

#[test]
fn user_name_identity_token_requires_cert() {
    let result = make_user_name_identity_token(
        SecurityPolicy::Basic256Sha256,
        &user_token_policy(UAString::null()),
        &[0u8; 32],
        &None,
        "user1",
        "pass",
    );
    assert_eq!(result.unwrap_err(), StatusCode::BadIdentityTokenInvalid);
}

#[test]
fn user_name_identity_token_deprecated_policy() {
    let (cert, _) = test_cert_a();
    let result = make_user_name_identity_token(
        SecurityPolicy::None,
        &user_token_policy(UAString::from(SecurityPolicy::Basic128Rsa15.to_uri())),
        &[0u8; 32],
        &Some(cert),
        "user1",
        "pass",
    );
    assert_eq!(result.unwrap_err(), StatusCode::BadSecurityPolicyRejected);
}

#[test]
fn x509_identity_token() {
    let (user_cert, user_key) = test_cert_a();
    let (server_cert, _) = test_cert_b();
    let server_nonce = random::byte_string(32);
    let server_cert_der = server_cert.as_byte_string().unwrap();

    let (token, signature) = make_x509_identity_token(
        SecurityPolicy::Basic256Sha256,
        &user_token_policy(UAString::null()),
        &user_cert,
        &user_key,
        &server_cert_der,
        &server_nonce,
    )
    .unwrap();
    assert_eq!(
        signature.algorithm.as_ref(),
        crypto::algorithms::DSIG_RSA_SHA256
    );

    // The server verifies using the cert held in the token
    let signing_cert = X509::from_byte_string(&token.certificate_data).unwrap();
    assert_eq!(signing_cert, user_cert);
    let result = verify_signature_data(
        &signature,
        SecurityPolicy::Basic256Sha256,
        &signing_cert,
        &server_cert,
        server_nonce.as_ref(),
    );
    assert_eq!(result, StatusCode::Good);

    let result = verify_signature_data(
        &signature,
        SecurityPolicy::Basic256Sha256,
        &signing_cert,
        &server_cert,
        &[0u8; 32],
    );
    assert!(result.is_bad());
}

#[test]
fn signature_data_null_for_none() {
    let (_, key) = test_cert_a();
    let signature = crypto::create_signature_data(
        &key,
        SecurityPolicy::None,
        &ByteString::from(vec![1u8, 2, 3]),
        &ByteString::from(vec![4u8, 5, 6]),
    )
    .unwrap();
    assert!(signature.algorithm.is_null());
    assert!(signature.signature.is_null());
}
