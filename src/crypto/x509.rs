// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

// X509 certificate wrapper.

use std::{
    fmt::{self, Debug, Formatter},
    net::{Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

use chrono::{DateTime, Utc};
use rsa::{pkcs1v15, RsaPublicKey};
use x509_cert::{
    self as x509,
    builder::Error as BuilderError,
    der::{asn1, Decode, Encode},
    ext::pkix::name::{GeneralName, GeneralNames},
    name::Name,
    serial_number::SerialNumber,
};

use crate::types::{service_types::ApplicationDescription, status_code::StatusCode, ByteString};

use super::{
    pkey::{KeySize, PrivateKey, PublicKey},
    thumbprint::Thumbprint,
};

type ChronoUtc = DateTime<Utc>;

const DEFAULT_KEYSIZE: u32 = 2048;
const DEFAULT_COUNTRY: &str = "IE";
const DEFAULT_STATE: &str = "Dublin";

/// Subject alternative names to put in a certificate. The first entry is expected to be the
/// application uri, the remainder are IP addresses or DNS names.
#[derive(Debug, Clone)]
pub struct AlternateNames {
    pub names: x509::ext::pkix::SubjectAltName,
}

impl Default for AlternateNames {
    fn default() -> Self {
        Self::new()
    }
}

impl AlternateNames {
    pub fn new() -> Self {
        Self {
            names: x509::ext::pkix::SubjectAltName(GeneralNames::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.0.len()
    }

    pub fn add_uri(&mut self, uri: &str) {
        if let Ok(v) = asn1::Ia5String::new(uri) {
            self.names.0.push(GeneralName::UniformResourceIdentifier(v));
        }
    }

    pub fn add_ipv4(&mut self, ad: &Ipv4Addr) {
        if let Ok(v) = asn1::OctetString::new(ad.octets()) {
            self.names.0.push(GeneralName::IpAddress(v));
        }
    }

    pub fn add_ipv6(&mut self, ad: &Ipv6Addr) {
        if let Ok(v) = asn1::OctetString::new(ad.octets()) {
            self.names.0.push(GeneralName::IpAddress(v));
        }
    }

    pub fn add_dns(&mut self, v: &str) {
        if let Ok(v) = asn1::Ia5String::new(v) {
            self.names.0.push(GeneralName::DnsName(v));
        }
    }

    /// Adds an IP address if the value parses as one, otherwise a DNS name
    pub fn add_address(&mut self, v: &str) {
        if let Ok(ip) = v.parse::<Ipv4Addr>() {
            self.add_ipv4(&ip);
        } else if let Ok(ip) = v.parse::<Ipv6Addr>() {
            self.add_ipv6(&ip);
        } else {
            self.add_dns(v);
        }
    }

    pub fn add_addresses(&mut self, ads: &[String]) {
        ads.iter().for_each(|h| self.add_address(h));
    }

    fn convert_name(name: &GeneralName) -> Option<String> {
        match name {
            GeneralName::DnsName(val) => Some(val.to_string()),
            GeneralName::UniformResourceIdentifier(val) => Some(val.to_string()),
            GeneralName::IpAddress(val) => {
                let bytes = val.as_bytes();
                match bytes.len() {
                    4 => Some(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]).to_string()),
                    16 => {
                        let mut octets = [0u8; 16];
                        octets.copy_from_slice(bytes);
                        Some(Ipv6Addr::from(octets).to_string())
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = String> + '_ {
        self.names
            .0
            .iter()
            .map(|n| Self::convert_name(n).unwrap_or_default())
    }
}

impl From<Vec<String>> for AlternateNames {
    /// The first entry is the application uri
    fn from(source: Vec<String>) -> Self {
        let mut result = Self::new();
        let mut iter = source.iter();
        if let Some(application_uri) = iter.next() {
            result.add_uri(application_uri);
        }
        iter.for_each(|h| result.add_address(h));
        result
    }
}

pub struct X509Data {
    pub key_size: u32,
    pub common_name: String,
    pub organization: String,
    pub organizational_unit: String,
    pub country: String,
    pub state: String,
    /// Alternate names. The first entry is the application uri. IP addresses are expected to be
    /// in their canonical form since string comparison is used during validation.
    pub alt_host_names: AlternateNames,
    /// The number of days the certificate is valid for, from now.
    pub certificate_duration_days: u32,
}

impl From<(ApplicationDescription, Option<Vec<String>>)> for X509Data {
    fn from(v: (ApplicationDescription, Option<Vec<String>>)) -> Self {
        let (application_description, addresses) = v;
        let mut names = vec![application_description.application_uri.as_ref().to_string()];
        names.extend(addresses.unwrap_or_else(|| {
            vec![
                "localhost".to_string(),
                "127.0.0.1".to_string(),
                "::1".to_string(),
            ]
        }));
        let application_name = application_description.application_name.to_string();
        X509Data {
            key_size: DEFAULT_KEYSIZE,
            common_name: application_name.clone(),
            organization: application_name.clone(),
            organizational_unit: application_name,
            country: DEFAULT_COUNTRY.to_string(),
            state: DEFAULT_STATE.to_string(),
            alt_host_names: AlternateNames::from(names),
            certificate_duration_days: 365,
        }
    }
}

impl From<ApplicationDescription> for X509Data {
    fn from(v: ApplicationDescription) -> Self {
        X509Data::from((v, None))
    }
}

#[derive(Debug)]
pub struct X509Error;

impl fmt::Display for X509Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X509Error")
    }
}

impl std::error::Error for X509Error {}

impl From<x509::der::Error> for X509Error {
    fn from(_err: x509::der::Error) -> Self {
        X509Error
    }
}

impl From<X509Error> for StatusCode {
    fn from(_err: X509Error) -> Self {
        StatusCode::BadCertificateInvalid
    }
}

#[derive(Clone)]
pub struct X509 {
    value: x509::Certificate,
}

impl Debug for X509 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // This impl will not write out the cert, and exists to keep derive happy
        // on structs that contain an X509 instance
        write!(f, "[x509]")
    }
}

impl PartialEq for X509 {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl X509 {
    pub fn from_pem(data: &[u8]) -> Result<Self, X509Error> {
        use x509::der::DecodePem;
        Ok(X509 {
            value: x509::Certificate::from_pem(data)?,
        })
    }

    pub fn from_der(data: &[u8]) -> Result<Self, X509Error> {
        Ok(X509 {
            value: x509::Certificate::from_der(data)?,
        })
    }

    pub fn to_der(&self) -> Result<Vec<u8>, X509Error> {
        Ok(self.value.to_der()?)
    }

    /// Creates a self-signed X509v3 certificate and public/private key from the supplied creation
    /// args. The application instance cert requires subjectAltName to specify the application uri
    /// and the alternate hostnames / ip addresses that the host runs on.
    pub fn cert_and_pkey(x509_data: &X509Data) -> Result<(Self, PrivateKey), String> {
        let pkey = PrivateKey::new(x509_data.key_size)
            .map_err(|_| format!("Cannot create a {} bit key", x509_data.key_size))?;
        let cert = Self::from_pkey(&pkey, x509_data)?;
        Ok((cert, pkey))
    }

    fn append_to_name(name: &mut String, param: &str, data: &str) {
        if !data.is_empty() {
            if !name.is_empty() {
                name.push(',');
            }
            name.push_str(param);
            name.push('=');
            name.push_str(data);
        }
    }

    fn builder_error(e: BuilderError) -> String {
        match e {
            BuilderError::Asn1(_) => "Invalid der".to_string(),
            BuilderError::PublicKey(_) => "Invalid public key".to_string(),
            BuilderError::Signature(_) => "Invalid signature".to_string(),
            _ => "Invalid".to_string(),
        }
    }

    /// Creates a self-signed certificate for the key
    pub fn from_pkey(pkey: &PrivateKey, x509_data: &X509Data) -> Result<Self, String> {
        Self::create_from_pkey(pkey, x509_data, None).map_err(Self::builder_error)
    }

    /// Creates a certificate for the key that is signed by the issuer
    pub fn from_pkey_issued_by(
        pkey: &PrivateKey,
        x509_data: &X509Data,
        issuer: &X509,
        issuer_key: &PrivateKey,
    ) -> Result<Self, String> {
        Self::create_from_pkey(pkey, x509_data, Some((issuer, issuer_key)))
            .map_err(Self::builder_error)
    }

    fn create_from_pkey(
        pkey: &PrivateKey,
        x509_data: &X509Data,
        issuer: Option<(&X509, &PrivateKey)>,
    ) -> Result<Self, BuilderError> {
        use std::time::Duration;
        use x509::builder::{Builder, CertificateBuilder, Profile};
        use x509::ext::pkix::{ExtendedKeyUsage, KeyUsage, KeyUsages};
        use x509::time::Validity;

        let pub_key = pkey
            .public_key_to_info()
            .map_err(|_| BuilderError::Asn1(x509::der::ErrorKind::Failed.into()))?;

        let validity = Validity::from_now(Duration::new(
            86400 * x509_data.certificate_duration_days as u64,
            0,
        ))?;

        let signing_key = pkcs1v15::SigningKey::<sha2::Sha256>::new(
            issuer.map(|(_, k)| k).unwrap_or(pkey).value.clone(),
        );

        // A random positive serial number
        let mut serial = [0u8; 16];
        super::random::bytes(&mut serial);
        serial[0] &= 0x7f;
        let serial_number = SerialNumber::new(&serial)?;

        let subject = {
            let mut name = String::new();
            Self::append_to_name(&mut name, "CN", &x509_data.common_name);
            Self::append_to_name(&mut name, "O", &x509_data.organization);
            Self::append_to_name(&mut name, "OU", &x509_data.organizational_unit);
            Self::append_to_name(&mut name, "C", &x509_data.country);
            Self::append_to_name(&mut name, "ST", &x509_data.state);
            Name::from_str(&name)?
        };

        // Issuer and subject shall be the same for self-signed cert
        let profile = Profile::Manual {
            issuer: Some(
                issuer
                    .map(|(cert, _)| cert.subject().clone())
                    .unwrap_or_else(|| subject.clone()),
            ),
        };

        let mut builder = CertificateBuilder::new(
            profile,
            serial_number,
            validity,
            subject,
            pub_key,
            &signing_key,
        )?;

        let key_usage = KeyUsages::DigitalSignature
            | KeyUsages::NonRepudiation
            | KeyUsages::KeyEncipherment
            | KeyUsages::DataEncipherment
            | KeyUsages::KeyCertSign;
        builder.add_extension(&KeyUsage(key_usage))?;
        builder.add_extension(&ExtendedKeyUsage(vec![
            const_oid::db::rfc5280::ID_KP_CLIENT_AUTH,
            const_oid::db::rfc5280::ID_KP_SERVER_AUTH,
        ]))?;
        if !x509_data.alt_host_names.is_empty() {
            builder.add_extension(&x509_data.alt_host_names.names)?;
        }

        Ok(X509 {
            value: builder.build()?,
        })
    }

    pub fn from_byte_string(data: &ByteString) -> Result<X509, StatusCode> {
        match data.value.as_ref() {
            None => {
                error!("Cannot make certificate from null bytestring");
                Err(StatusCode::BadCertificateInvalid)
            }
            Some(der) => Self::from_der(der).map_err(|_| StatusCode::BadCertificateInvalid),
        }
    }

    /// Returns a ByteString representation of the cert which is DER encoded form of X509v3
    pub fn as_byte_string(&self) -> Result<ByteString, StatusCode> {
        Ok(ByteString::from(self.to_der()?))
    }

    pub fn public_key(&self) -> Result<PublicKey, StatusCode> {
        use x509::der::referenced::OwnedToRef;

        RsaPublicKey::try_from(
            self.value
                .tbs_certificate
                .subject_public_key_info
                .owned_to_ref(),
        )
        .map(|value| PublicKey { value })
        .map_err(|_| StatusCode::BadCertificateInvalid)
    }

    /// Returns the key length in bits (if possible)
    pub fn key_length(&self) -> Result<usize, X509Error> {
        self.public_key()
            .map(|k| k.bit_length())
            .map_err(|_| X509Error)
    }

    fn get_subject_entry(&self, oid: const_oid::ObjectIdentifier) -> Result<String, X509Error> {
        self.value
            .tbs_certificate
            .subject
            .0
            .iter()
            .flat_map(|rdn| rdn.0.iter())
            .find(|tv| tv.oid == oid)
            .map(|tv| {
                // The attribute value is a directory string, try the common encodings
                if let Ok(s) = tv.value.decode_as::<asn1::Utf8StringRef<'_>>() {
                    s.to_string()
                } else if let Ok(s) = tv.value.decode_as::<asn1::PrintableStringRef<'_>>() {
                    s.to_string()
                } else {
                    tv.to_string()
                }
            })
            .ok_or(X509Error)
    }

    // Produces a string such as "CN=foo,C=IE"
    pub fn subject_name(&self) -> String {
        self.value.tbs_certificate.subject.to_string()
    }

    /// Gets the common name out of the cert
    pub fn common_name(&self) -> Result<String, X509Error> {
        self.get_subject_entry(const_oid::db::rfc4519::COMMON_NAME)
    }

    pub(crate) fn issuer(&self) -> &Name {
        &self.value.tbs_certificate.issuer
    }

    pub(crate) fn subject(&self) -> &Name {
        &self.value.tbs_certificate.subject
    }

    pub(crate) fn serial_number(&self) -> &SerialNumber {
        &self.value.tbs_certificate.serial_number
    }

    /// A certificate is self-signed when its issuer is its subject
    pub fn is_self_signed(&self) -> bool {
        self.issuer() == self.subject()
    }

    /// Verifies that this certificate was signed by the key of the supplied issuer
    pub fn is_signed_by(&self, issuer: &X509) -> bool {
        let Ok(issuer_key) = issuer.public_key() else {
            return false;
        };
        let Ok(tbs) = self.value.tbs_certificate.to_der() else {
            return false;
        };
        verify_rsa_signature(
            &issuer_key,
            &self.value.signature_algorithm.oid,
            &tbs,
            self.value.signature.raw_bytes(),
        )
    }

    /// Tests if the certificate is valid for the supplied time using the not before and not
    /// after values on the cert.
    pub fn is_time_valid(&self, now: &ChronoUtc) -> StatusCode {
        match self.not_before() {
            Ok(not_before) if now < &not_before => {
                error!("Certificate < before date)");
                return StatusCode::BadCertificateTimeInvalid;
            }
            Ok(_) => {}
            Err(_) => {
                error!("Certificate has no before date");
                return StatusCode::BadCertificateInvalid;
            }
        }
        match self.not_after() {
            Ok(not_after) if now > &not_after => {
                error!("Certificate has expired (> after date)");
                StatusCode::BadCertificateTimeInvalid
            }
            Ok(_) => {
                trace!("Certificate is valid for this time");
                StatusCode::Good
            }
            Err(_) => {
                error!("Certificate has no after date");
                StatusCode::BadCertificateInvalid
            }
        }
    }

    fn get_alternate_names(&self) -> Option<GeneralNames> {
        use x509::ext::pkix::SubjectAltName;

        match self.value.tbs_certificate.get::<SubjectAltName>() {
            Ok(Some((_, names))) => Some(names.0),
            _ => None,
        }
    }

    /// Tests if the supplied hostname matches any of the dns alt subject name entries on the cert
    pub fn is_hostname_valid(&self, hostname: &str) -> StatusCode {
        trace!("is_hostname_valid against {} on cert", hostname);
        if hostname.is_empty() {
            error!("Hostname is empty");
            return StatusCode::BadCertificateHostNameInvalid;
        }
        let Some(subject_alt_names) = self.get_alternate_names() else {
            error!("Cert has no subject alt names at all");
            return StatusCode::BadCertificateHostNameInvalid;
        };
        let found = subject_alt_names
            .iter()
            // the application uri is not a host name
            .filter(|n| !matches!(n, GeneralName::UniformResourceIdentifier(_)))
            .filter_map(AlternateNames::convert_name)
            .any(|name| name.eq_ignore_ascii_case(hostname));
        if found {
            debug!("Certificate host name {} is good", hostname);
            StatusCode::Good
        } else {
            StatusCode::BadCertificateHostNameInvalid
        }
    }

    /// Tests if the supplied application uri matches the uri alt subject name entry on the cert
    pub fn is_application_uri_valid(&self, application_uri: &str) -> StatusCode {
        let Some(alt_names) = self.get_alternate_names() else {
            error!("Cert has no subject alt names at all");
            return StatusCode::BadCertificateUriInvalid;
        };
        let matches = alt_names.iter().any(|n| match n {
            GeneralName::UniformResourceIdentifier(uri) => uri.to_string() == application_uri,
            _ => false,
        });
        if matches {
            StatusCode::Good
        } else {
            error!(
                "Cert does not carry the application uri {}",
                application_uri
            );
            StatusCode::BadCertificateUriInvalid
        }
    }

    /// The thumbprint is the SHA1 digest of the DER form of the certificate. The hash is 160 bits
    /// (20 bytes) in length and is sent in some secure conversation headers.
    pub fn thumbprint(&self) -> Result<Thumbprint, StatusCode> {
        use sha1::Digest;

        let der = self.to_der()?;
        let digest = sha1::Sha1::digest(&der);
        Thumbprint::new(&digest)
    }

    fn time_to_chrono(time: &x509::time::Time) -> Result<ChronoUtc, X509Error> {
        let dur = time.to_unix_duration();
        ChronoUtc::from_timestamp(dur.as_secs() as i64, dur.subsec_nanos()).ok_or(X509Error)
    }

    pub fn not_before(&self) -> Result<ChronoUtc, X509Error> {
        Self::time_to_chrono(&self.value.tbs_certificate.validity.not_before)
    }

    pub fn not_after(&self) -> Result<ChronoUtc, X509Error> {
        Self::time_to_chrono(&self.value.tbs_certificate.validity.not_after)
    }
}

fn verify_rsa_signature(
    key: &PublicKey,
    algorithm: &const_oid::ObjectIdentifier,
    data: &[u8],
    signature: &[u8],
) -> bool {
    let verified = if *algorithm == const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION {
        key.verify_sha256(data, signature)
    } else if *algorithm == const_oid::db::rfc5912::SHA_1_WITH_RSA_ENCRYPTION {
        key.verify_sha1(data, signature)
    } else {
        warn!("Signature algorithm {} is not supported", algorithm);
        Ok(false)
    };
    verified.unwrap_or(false)
}

/// A certificate revocation list read from the issuers store
#[derive(Clone)]
pub struct RevocationList {
    value: x509::crl::CertificateList,
}

impl Debug for RevocationList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[crl]")
    }
}

impl RevocationList {
    pub fn from_der(data: &[u8]) -> Result<Self, X509Error> {
        Ok(RevocationList {
            value: x509::crl::CertificateList::from_der(data)?,
        })
    }

    pub(crate) fn issuer(&self) -> &Name {
        &self.value.tbs_cert_list.issuer
    }

    /// Verifies that the list was signed by the supplied issuer
    pub fn is_signed_by(&self, issuer: &X509) -> bool {
        let Ok(issuer_key) = issuer.public_key() else {
            return false;
        };
        let Ok(tbs) = self.value.tbs_cert_list.to_der() else {
            return false;
        };
        verify_rsa_signature(
            &issuer_key,
            &self.value.signature_algorithm.oid,
            &tbs,
            self.value.signature.raw_bytes(),
        )
    }

    /// Tests if this list was issued by the issuer of the certificate
    pub fn covers(&self, cert: &X509) -> bool {
        &self.value.tbs_cert_list.issuer == cert.issuer()
    }

    /// Tests if the certificate's serial number is listed
    pub fn is_revoked(&self, cert: &X509) -> bool {
        self.covers(cert)
            && self
                .value
                .tbs_cert_list
                .revoked_certificates
                .as_ref()
                .map(|revoked| {
                    revoked
                        .iter()
                        .any(|r| &r.serial_number == cert.serial_number())
                })
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cert(alt_host_names: AlternateNames) -> X509 {
        let args = X509Data {
            key_size: 2048,
            common_name: "x".to_string(),
            organization: "x.org".to_string(),
            organizational_unit: "x.org ops".to_string(),
            country: "EN".to_string(),
            state: "London".to_string(),
            alt_host_names,
            certificate_duration_days: 60,
        };
        X509::cert_and_pkey(&args).unwrap().0
    }

    /// This test checks that a cert will validate dns or ip entries in the subject alt host names
    #[test]
    fn alt_hostnames() {
        let alt_host_names = AlternateNames::from(vec![
            "urn:foo".to_string(),
            "host2".to_string(),
            "www.google.com".to_string(),
            "192.168.1.1".to_string(),
            "::1".to_string(),
        ]);
        let x509 = make_cert(alt_host_names.clone());

        assert!(!x509.is_hostname_valid("").is_good());
        // The application uri is not a hostname
        assert!(!x509.is_hostname_valid("urn:foo").is_good());
        assert!(!x509.is_hostname_valid("192.168.1.0").is_good());
        assert!(!x509.is_hostname_valid("www.cnn.com").is_good());
        assert!(!x509.is_hostname_valid("host1").is_good());

        alt_host_names.iter().skip(1).for_each(|n| {
            assert!(x509.is_hostname_valid(n.as_str()).is_good());
        });

        assert!(x509.is_application_uri_valid("urn:foo").is_good());
        assert!(!x509.is_application_uri_valid("urn:bar").is_good());
    }

    #[test]
    fn self_signed() {
        let x509 = make_cert(AlternateNames::from(vec!["urn:foo".to_string()]));
        assert!(x509.is_self_signed());
        assert!(x509.is_signed_by(&x509));
        assert_eq!(x509.common_name().unwrap(), "x");
        assert_eq!(x509.key_length().unwrap(), 2048);
    }

    #[test]
    fn der_round_trip() {
        let x509 = make_cert(AlternateNames::from(vec!["urn:foo".to_string()]));
        let der = x509.as_byte_string().unwrap();
        let x509_2 = X509::from_byte_string(&der).unwrap();
        assert_eq!(x509, x509_2);
        assert_eq!(x509.thumbprint().unwrap(), x509_2.thumbprint().unwrap());
        assert!(X509::from_byte_string(&ByteString::null()).is_err());
    }
}
