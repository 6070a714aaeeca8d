use tempdir::TempDir;

use crate::crypto::{
    certificate_store::*,
    pkey::PrivateKey,
    x509::{AlternateNames, X509Data, X509},
};

const APPLICATION_URI: &str = "urn:testapplication";
const APPLICATION_HOSTNAME: &str = "testhost";

lazy_static! {
    // Key generation is slow so tests share a few certificates
    static ref TEST_CERT_A: (X509, PrivateKey) = make_test_cert(2048, "a");
    static ref TEST_CERT_B: (X509, PrivateKey) = make_test_cert(2048, "b");
    static ref TEST_CERT_1024: (X509, PrivateKey) = make_test_cert(1024, "short");
}

fn make_certificate_store() -> (TempDir, CertificateStore) {
    let tmp_dir = TempDir::new("pki").unwrap();
    let cert_store = CertificateStore::new(tmp_dir.path());
    assert!(cert_store.ensure_pki_path().is_ok());
    (tmp_dir, cert_store)
}

fn make_x509_data(key_size: u32, common_name: &str) -> X509Data {
    X509Data {
        key_size,
        common_name: common_name.to_string(),
        organization: "x.org".to_string(),
        organizational_unit: "x.org ops".to_string(),
        country: "EN".to_string(),
        state: "London".to_string(),
        alt_host_names: AlternateNames::from(vec![
            APPLICATION_URI.to_string(),
            "foo".to_string(),
            "foo2".to_string(),
            APPLICATION_HOSTNAME.to_string(),
            "foo3".to_string(),
        ]),
        certificate_duration_days: 60,
    }
}

fn make_test_cert(key_size: u32, common_name: &str) -> (X509, PrivateKey) {
    X509::cert_and_pkey(&make_x509_data(key_size, common_name)).unwrap()
}

fn test_cert_a() -> (X509, PrivateKey) {
    TEST_CERT_A.clone()
}

fn test_cert_b() -> (X509, PrivateKey) {
    TEST_CERT_B.clone()
}

fn test_cert_1024() -> (X509, PrivateKey) {
    TEST_CERT_1024.clone()
}

mod authentication;
mod crypto;
mod security_policy;
