use std::str::FromStr;

use crate::types::status_code::StatusCode;

use crate::crypto::{random, SecurityPolicy};

fn nonce(security_policy: SecurityPolicy) -> Vec<u8> {
    let mut nonce = vec![0u8; security_policy.secure_channel_nonce_length()];
    random::bytes(&mut nonce);
    nonce
}

#[test]
fn policy_uris() {
    for security_policy in [
        SecurityPolicy::None,
        SecurityPolicy::Basic256Sha256,
        SecurityPolicy::Aes128Sha256RsaOaep,
        SecurityPolicy::Aes256Sha256RsaPss,
        SecurityPolicy::Basic128Rsa15,
        SecurityPolicy::Basic256,
    ] {
        assert_eq!(SecurityPolicy::from_uri(security_policy.to_uri()), security_policy);
        assert_eq!(
            SecurityPolicy::from_str(security_policy.to_str()).unwrap(),
            security_policy
        );
    }
    assert_eq!(SecurityPolicy::from_uri("urn:nothing"), SecurityPolicy::Unknown);
}

#[test]
fn supported_policies() {
    assert!(SecurityPolicy::None.is_supported());
    assert!(SecurityPolicy::Basic256Sha256.is_supported());
    assert!(SecurityPolicy::Aes128Sha256RsaOaep.is_supported());
    assert!(SecurityPolicy::Aes256Sha256RsaPss.is_supported());
    assert!(!SecurityPolicy::Basic128Rsa15.is_supported());
    assert!(!SecurityPolicy::Basic256.is_supported());
    assert!(SecurityPolicy::Basic128Rsa15.is_deprecated());
    assert!(!SecurityPolicy::Unknown.is_supported());
    assert_eq!(
        SecurityPolicy::Basic256Sha256.symmetric_signature_algorithm(),
        "http://www.w3.org/2000/09/xmldsig#hmac-sha256"
    );
    assert_eq!(SecurityPolicy::Basic256.symmetric_signature_size(), 0);
}

#[test]
fn key_lengths() {
    assert!(SecurityPolicy::Basic256Sha256.is_valid_keylength(2048));
    assert!(SecurityPolicy::Basic256Sha256.is_valid_keylength(4096));
    assert!(!SecurityPolicy::Basic256Sha256.is_valid_keylength(1024));
    assert!(!SecurityPolicy::Aes128Sha256RsaOaep.is_valid_keylength(8192));
    assert!(SecurityPolicy::None.is_valid_keylength(1024));
}

#[test]
fn derived_keys() {
    for (security_policy, encrypting_key_length) in [
        (SecurityPolicy::Aes128Sha256RsaOaep, 16),
        (SecurityPolicy::Basic256Sha256, 32),
        (SecurityPolicy::Aes256Sha256RsaPss, 32),
    ] {
        let local = nonce(security_policy);
        let remote = nonce(security_policy);
        let (signing_key, encrypting_key, iv) = security_policy
            .make_secure_channel_keys(&remote, &local)
            .unwrap();
        assert_eq!(signing_key.len(), security_policy.derived_signature_key_size());
        assert_eq!(encrypting_key.value().len(), encrypting_key_length);
        assert_eq!(iv.len(), 16);

        // Derivation is deterministic for the same nonces
        let (signing_key2, _, iv2) = security_policy
            .make_secure_channel_keys(&remote, &local)
            .unwrap();
        assert_eq!(signing_key, signing_key2);
        assert_eq!(iv, iv2);
    }
}

#[test]
fn deprecated_policies_have_no_keys() {
    for security_policy in [SecurityPolicy::Basic128Rsa15, SecurityPolicy::Basic256] {
        assert_eq!(
            security_policy
                .make_secure_channel_keys(&[0u8; 16], &[0u8; 16])
                .unwrap_err(),
            StatusCode::BadSecurityPolicyRejected
        );
    }
}

#[test]
fn symmetric_sign_and_encrypt_round_trip() {
    for security_policy in [
        SecurityPolicy::Aes128Sha256RsaOaep,
        SecurityPolicy::Basic256Sha256,
        SecurityPolicy::Aes256Sha256RsaPss,
    ] {
        let local = nonce(security_policy);
        let remote = nonce(security_policy);
        let (signing_key, encrypting_key, iv) = security_policy
            .make_secure_channel_keys(&remote, &local)
            .unwrap();

        let plaintext = (0..128u8).collect::<Vec<u8>>();

        let mut signature = vec![0u8; security_policy.symmetric_signature_size()];
        security_policy
            .symmetric_sign(&signing_key, &plaintext, &mut signature)
            .unwrap();

        let mut ciphertext = vec![0u8; plaintext.len() + 16];
        let size = security_policy
            .symmetric_encrypt(&encrypting_key, &iv, &plaintext, &mut ciphertext)
            .unwrap();
        assert_eq!(size, plaintext.len());

        let mut decrypted = vec![0u8; size + 16];
        let size = security_policy
            .symmetric_decrypt(&encrypting_key, &iv, &ciphertext[..size], &mut decrypted)
            .unwrap();
        assert_eq!(&decrypted[..size], &plaintext[..]);

        assert!(security_policy
            .symmetric_verify_signature(&signing_key, &decrypted[..size], &signature)
            .is_ok());

        // Tampering is detected
        decrypted[0] ^= 0xff;
        assert_eq!(
            security_policy
                .symmetric_verify_signature(&signing_key, &decrypted[..size], &signature)
                .unwrap_err(),
            StatusCode::BadSecurityChecksFailed
        );
    }
}
