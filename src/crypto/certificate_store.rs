// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The PKI directory: the application's own certificate and key, and the server certificates
//! it has trusted or rejected.
//!
//! ```text
//! pki/
//!   own/cert.der
//!   private/private.pem
//!   trusted/    certificates accepted by an administrator, or automatically
//!   rejected/   certificates seen but not trusted
//!   issuers/    CA certificates and their revocation lists
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::types::status_code::StatusCode;

use super::{
    pkey::PrivateKey,
    security_policy::SecurityPolicy,
    x509::{RevocationList, X509Data, X509},
};

const OWN_CERTIFICATE_PATH: &str = "own/cert.der";
const OWN_PRIVATE_KEY_PATH: &str = "private/private.pem";
const TRUSTED_CERTS_DIR: &str = "trusted";
const REJECTED_CERTS_DIR: &str = "rejected";
const ISSUERS_DIR: &str = "issuers";

type Validation = Result<(), StatusCode>;

fn check(status_code: StatusCode) -> Validation {
    if status_code.is_bad() {
        Err(status_code)
    } else {
        Ok(())
    }
}

pub struct CertificateStore {
    own_certificate_path: PathBuf,
    own_private_key_path: PathBuf,
    pub(crate) pki_path: PathBuf,
    /// Only trust and key length are checked, not the issuer chain, revocation, validity
    /// period, hostname or application uri
    skip_verify_certs: bool,
    /// An unknown certificate goes into the trusted folder instead of the rejected one. It
    /// still has to pass validation.
    trust_unknown_certs: bool,
}

impl CertificateStore {
    /// A store rooted at `pki_path`. Only one running application should use a given path.
    pub fn new(pki_path: &Path) -> CertificateStore {
        CertificateStore {
            own_certificate_path: PathBuf::from(OWN_CERTIFICATE_PATH),
            own_private_key_path: PathBuf::from(OWN_PRIVATE_KEY_PATH),
            pki_path: pki_path.to_path_buf(),
            skip_verify_certs: false,
            trust_unknown_certs: false,
        }
    }

    /// Opens the store and loads the application certificate and key, creating them from
    /// `x509_data` when they cannot be read. The certificate and key are `None` when neither
    /// works out.
    pub fn new_with_x509_data<X>(
        pki_path: &Path,
        overwrite: bool,
        cert_path: Option<&Path>,
        pkey_path: Option<&Path>,
        x509_data: Option<X>,
    ) -> (CertificateStore, Option<X509>, Option<PrivateKey>)
    where
        X: Into<X509Data>,
    {
        let mut store = CertificateStore::new(pki_path);
        if let (Some(cert_path), Some(pkey_path)) = (cert_path, pkey_path) {
            store.own_certificate_path = cert_path.to_path_buf();
            store.own_private_key_path = pkey_path.to_path_buf();
        }
        if let Err(err) = store.ensure_pki_path() {
            error!(
                "Cannot prepare the PKI directory, the client has no application certificate, {}",
                err
            );
            return (store, None, None);
        }

        let loaded = store.read_own_cert_and_pkey().or_else(|err| match x509_data {
            Some(x509_data) => {
                info!("Creating the application certificate and private key");
                store.create_and_store_application_instance_cert(&x509_data.into(), overwrite)
            }
            None => Err(err),
        });
        match loaded {
            Ok((cert, pkey)) => (store, Some(cert), Some(pkey)),
            Err(err) => {
                error!("No application certificate and private key, {}", err);
                (store, None, None)
            }
        }
    }

    pub fn set_skip_verify_certs(&mut self, skip_verify_certs: bool) {
        self.skip_verify_certs = skip_verify_certs;
    }

    pub fn set_trust_unknown_certs(&mut self, trust_unknown_certs: bool) {
        self.trust_unknown_certs = trust_unknown_certs;
    }

    fn pki_dir(&self, name: impl AsRef<Path>) -> PathBuf {
        self.pki_path.join(name)
    }

    pub fn own_certificate_path(&self) -> PathBuf {
        self.pki_dir(&self.own_certificate_path)
    }

    pub fn own_private_key_path(&self) -> PathBuf {
        self.pki_dir(&self.own_private_key_path)
    }

    pub fn rejected_certs_dir(&self) -> PathBuf {
        self.pki_dir(REJECTED_CERTS_DIR)
    }

    pub fn trusted_certs_dir(&self) -> PathBuf {
        self.pki_dir(TRUSTED_CERTS_DIR)
    }

    pub fn issuer_certs_dir(&self) -> PathBuf {
        self.pki_dir(ISSUERS_DIR)
    }

    /// Creates the trusted, rejected and issuers folders.
    pub fn ensure_pki_path(&self) -> Result<(), String> {
        [TRUSTED_CERTS_DIR, REJECTED_CERTS_DIR, ISSUERS_DIR]
            .iter()
            .try_for_each(|dir| Self::ensure_dir(&self.pki_dir(dir)))
    }

    fn ensure_dir(path: &Path) -> Result<(), String> {
        if path.is_dir() {
            Ok(())
        } else if path.exists() {
            Err(format!("{} is not a directory", path.display()))
        } else {
            fs::create_dir_all(path).map_err(|e| format!("Cannot create {}, {}", path.display(), e))
        }
    }

    pub fn read_pkey(path: &Path) -> Result<PrivateKey, String> {
        PrivateKey::read_pem_file(path)
            .map_err(|_| format!("Cannot read a private key from {}", path.display()))
    }

    /// Reads a certificate, DER or PEM by its extension.
    pub fn read_cert(path: &Path) -> Result<X509, String> {
        let bytes =
            fs::read(path).map_err(|e| format!("Cannot read {}, {}", path.display(), e))?;
        let cert = match path.extension().and_then(|e| e.to_str()) {
            Some("der") => X509::from_der(&bytes),
            Some("pem") => X509::from_pem(&bytes),
            _ => return Err(format!("{} is not a .der or .pem file", path.display())),
        };
        cert.map_err(|_| format!("{} does not hold a certificate", path.display()))
    }

    pub fn read_own_cert_and_pkey(&self) -> Result<(X509, PrivateKey), String> {
        let cert = Self::read_cert(&self.own_certificate_path())?;
        let pkey = Self::read_pkey(&self.own_private_key_path())?;
        Ok((cert, pkey))
    }

    pub fn read_own_cert_and_pkey_optional(&self) -> (Option<X509>, Option<PrivateKey>) {
        match self.read_own_cert_and_pkey() {
            Ok((cert, key)) => (Some(cert), Some(key)),
            Err(_) => (None, None),
        }
    }

    /// Generates a self-signed application certificate and key pair and writes them to the
    /// store's own paths.
    pub fn create_and_store_application_instance_cert(
        &self,
        args: &X509Data,
        overwrite: bool,
    ) -> Result<(X509, PrivateKey), String> {
        let (cert, pkey) = X509::cert_and_pkey(args)?;
        Self::store_cert(&cert, &self.own_certificate_path(), overwrite)?;
        let pem = pkey
            .to_pem()
            .map_err(|_| "Cannot encode the private key".to_string())?;
        let pkey_path = self.own_private_key_path();
        info!("Writing the private key to {}", pkey_path.display());
        Self::write_to_file(pem.as_bytes(), &pkey_path, overwrite)?;
        Ok((cert, pkey))
    }

    /// "common name [thumbprint].der", or "thumbprint.der" when the certificate has no common
    /// name.
    pub fn cert_file_name(cert: &X509) -> Result<String, StatusCode> {
        let thumbprint = cert.thumbprint()?.as_hex_string();
        let common_name = cert
            .common_name()
            .map(|name| name.trim().replace('/', ""))
            .unwrap_or_default();
        Ok(if common_name.is_empty() {
            format!("{}.der", thumbprint)
        } else {
            format!("{} [{}].der", common_name, thumbprint)
        })
    }

    pub fn store_rejected_cert(&self, cert: &X509) -> Result<PathBuf, String> {
        self.store_in(cert, self.rejected_certs_dir())
    }

    pub fn store_trusted_cert(&self, cert: &X509) -> Result<PathBuf, String> {
        self.store_in(cert, self.trusted_certs_dir())
    }

    fn store_in(&self, cert: &X509, dir: PathBuf) -> Result<PathBuf, String> {
        let name = Self::cert_file_name(cert).map_err(|e| e.to_string())?;
        let path = dir.join(name);
        Self::store_cert(cert, &path, true)?;
        Ok(path)
    }

    fn store_cert(cert: &X509, path: &Path, overwrite: bool) -> Result<(), String> {
        let der = cert
            .to_der()
            .map_err(|_| "Cannot encode the certificate".to_string())?;
        info!("Writing certificate to {}", path.display());
        Self::write_to_file(&der, path, overwrite)
    }

    fn write_to_file(bytes: &[u8], path: &Path, overwrite: bool) -> Result<(), String> {
        if !overwrite && path.exists() {
            return Err(format!(
                "{} already exists and overwriting is not enabled",
                path.display()
            ));
        }
        if let Some(parent) = path.parent() {
            Self::ensure_dir(parent)?;
        }
        fs::write(path, bytes).map_err(|e| format!("Cannot write {}, {}", path.display(), e))
    }

    /// Validates a server certificate, and on most failures also files it in the rejected
    /// folder so an administrator can move it to the trusted one.
    pub fn validate_or_reject_application_instance_cert(
        &self,
        cert: &X509,
        security_policy: SecurityPolicy,
        hostname: Option<&str>,
        application_uri: Option<&str>,
    ) -> StatusCode {
        let status_code =
            self.validate_application_instance_cert(cert, security_policy, hostname, application_uri);
        // These are either fine, already filed, or leave nothing worth filing
        let filed = matches!(
            status_code,
            StatusCode::Good
                | StatusCode::BadUnexpectedError
                | StatusCode::BadSecurityChecksFailed
                | StatusCode::BadCertificateUntrusted
        );
        if !filed {
            if let Err(err) = self.store_rejected_cert(cert) {
                warn!("Cannot file the rejected certificate, {}", err);
            }
        }
        status_code
    }

    /// Validates a server certificate. The first failing check decides the result:
    ///
    /// 1. It is not in the rejected folder
    /// 2. It is in the trusted folder, or unknown certificates are trusted
    /// 3. A certificate that is not self-signed chains to an issuer in the store
    /// 4. Neither it nor its issuer is on a revocation list
    /// 5. It is within its validity period
    /// 6. It names the hostname
    /// 7. It names the application uri
    /// 8. Its key length suits the policy
    ///
    /// Steps 3 to 7 are skipped when certificate verification is off.
    pub fn validate_application_instance_cert(
        &self,
        cert: &X509,
        security_policy: SecurityPolicy,
        hostname: Option<&str>,
        application_uri: Option<&str>,
    ) -> StatusCode {
        match self.validate(cert, security_policy, hostname, application_uri) {
            Ok(()) => StatusCode::Good,
            Err(status_code) => status_code,
        }
    }

    fn validate(
        &self,
        cert: &X509,
        security_policy: SecurityPolicy,
        hostname: Option<&str>,
        application_uri: Option<&str>,
    ) -> Validation {
        let name = Self::cert_file_name(cert)?;
        debug!("Validating certificate {}", name);

        self.check_trust(cert, &name)?;

        if self.skip_verify_certs {
            debug!("Certificate {} is not verified further", name);
        } else {
            self.verify_issuer_chain(cert, &name)?;
            self.check_revocation(cert, &name)?;
            check(cert.is_time_valid(&chrono::Utc::now())).map_err(|e| {
                warn!("Certificate {} is outside its validity period", name);
                e
            })?;
            if let Some(hostname) = hostname {
                check(cert.is_hostname_valid(hostname)).map_err(|e| {
                    warn!("Certificate {} is not for host {}", name, hostname);
                    e
                })?;
            }
            if let Some(application_uri) = application_uri {
                check(cert.is_application_uri_valid(application_uri)).map_err(|e| {
                    warn!("Certificate {} is not for application {}", name, application_uri);
                    e
                })?;
            }
        }

        let key_length = cert.key_length().map_err(|_| {
            error!("Certificate {} has no readable key length", name);
            StatusCode::BadSecurityChecksFailed
        })?;
        if !security_policy.is_valid_keylength(key_length) {
            warn!(
                "Certificate {} has a {} bit key, which {} does not allow",
                name, key_length, security_policy
            );
            return Err(StatusCode::BadSecurityChecksFailed);
        }
        Ok(())
    }

    /// Steps 1 and 2. The trusted copy must be byte for byte the certificate presented, so a
    /// file renamed to match another's name is not trusted.
    fn check_trust(&self, cert: &X509, name: &str) -> Validation {
        let rejected_dir = self.rejected_certs_dir();
        let trusted_dir = self.trusted_certs_dir();
        for dir in [&rejected_dir, &trusted_dir] {
            if !dir.exists() {
                error!("Certificate folder {} does not exist", dir.display());
                return Err(StatusCode::BadUnexpectedError);
            }
        }
        if rejected_dir.join(name).exists() {
            warn!("Certificate {} is in the rejected folder", name);
            return Err(StatusCode::BadSecurityChecksFailed);
        }

        let trusted_path = trusted_dir.join(name);
        if !trusted_path.exists() {
            if !self.trust_unknown_certs {
                warn!("Certificate {} is unknown, filing it as rejected", name);
                let _ = self.store_rejected_cert(cert);
                return Err(StatusCode::BadCertificateUntrusted);
            }
            warn!("Certificate {} is unknown, trusting it as configured", name);
            let _ = self.store_trusted_cert(cert);
        }

        let same = Self::read_cert(&trusted_path)
            .ok()
            .and_then(|on_disk| Some(on_disk.to_der().ok()? == cert.to_der().ok()?))
            .unwrap_or(false);
        if !same {
            error!(
                "Trusted file {} does not hold the presented certificate",
                trusted_path.display()
            );
            return Err(StatusCode::BadUnexpectedError);
        }
        Ok(())
    }

    /// Certificates held as authorities: the issuers folder, then the trusted folder.
    fn authorities(&self) -> Vec<X509> {
        let mut certs = Self::read_certs_in_dir(&self.issuer_certs_dir());
        certs.extend(Self::read_certs_in_dir(&self.trusted_certs_dir()));
        certs
    }

    fn verify_issuer_chain(&self, cert: &X509, name: &str) -> Validation {
        if cert.is_self_signed() {
            if cert.is_signed_by(cert) {
                return Ok(());
            }
            warn!("Certificate {} is self-signed but its signature does not verify", name);
            return Err(StatusCode::BadCertificateInvalid);
        }
        let issuers: Vec<X509> = self
            .authorities()
            .into_iter()
            .filter(|issuer| issuer.subject() == cert.issuer())
            .collect();
        if issuers.is_empty() {
            warn!("No issuer of certificate {} is in the store", name);
            return Err(StatusCode::BadCertificateChainIncomplete);
        }
        match issuers.iter().find(|issuer| cert.is_signed_by(issuer)) {
            Some(issuer) => {
                trace!("Certificate {} is issued by {}", name, issuer.subject_name());
                Ok(())
            }
            None => {
                warn!("Certificate {} is not signed by its named issuer", name);
                Err(StatusCode::BadCertificateInvalid)
            }
        }
    }

    /// Only revocation lists signed by an authority in the store count.
    fn check_revocation(&self, cert: &X509, name: &str) -> Validation {
        let authorities = self.authorities();
        let crls: Vec<RevocationList> = Self::read_crls_in_dir(&self.issuer_certs_dir())
            .into_iter()
            .filter(|crl| {
                let signed = authorities
                    .iter()
                    .any(|a| a.subject() == crl.issuer() && crl.is_signed_by(a));
                if !signed {
                    warn!("Ignoring a revocation list no authority in the store signed");
                }
                signed
            })
            .collect();
        let revoked = |c: &X509| crls.iter().any(|crl| crl.is_revoked(c));

        if revoked(cert) {
            warn!("Certificate {} is revoked", name);
            return Err(StatusCode::BadCertificateRevoked);
        }
        let issuer_revoked = !cert.is_self_signed()
            && authorities
                .iter()
                .any(|issuer| issuer.subject() == cert.issuer() && revoked(issuer));
        if issuer_revoked {
            warn!("The issuer of certificate {} is revoked", name);
            return Err(StatusCode::BadCertificateIssuerRevoked);
        }
        Ok(())
    }

    fn files_with_extension<'a>(
        dir: &Path,
        extensions: &'a [&'a str],
    ) -> impl Iterator<Item = PathBuf> + 'a {
        fs::read_dir(dir)
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(move |path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| extensions.contains(&e))
            })
    }

    fn read_certs_in_dir(dir: &Path) -> Vec<X509> {
        Self::files_with_extension(dir, &["der", "pem"])
            .filter_map(|path| Self::read_cert(&path).ok())
            .collect()
    }

    fn read_crls_in_dir(dir: &Path) -> Vec<RevocationList> {
        Self::files_with_extension(dir, &["crl"])
            .filter_map(|path| {
                let crl = fs::read(&path)
                    .ok()
                    .and_then(|der| RevocationList::from_der(&der).ok());
                if crl.is_none() {
                    warn!("Cannot read revocation list {}", path.display());
                }
                crl
            })
            .collect()
    }
}
