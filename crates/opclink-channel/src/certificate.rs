// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Certificate contracts consumed by the secure channel.
//!
//! The channel needs three things from its host: our own certificate and
//! private key ([`CertificateProvider`]), a peer validator
//! ([`CertificateValidator`]), and a [`TrustStore`]. In-memory and
//! directory-backed stores are provided, along with a self-signed generator
//! for first-run setups.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::asn1::Ia5String;
use x509_cert::der::oid::AssociatedOid;
use x509_cert::der::{Decode, Encode};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::SubjectAltName;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;
use x509_cert::Certificate;

use opclink_types::{ByteString, StatusCode};

use crate::crypto::{random_nonce, sha1_digest};
use crate::error::{ChannelError, ChannelResult};

fn certificate_invalid<E>(_: E) -> ChannelError {
    ChannelError::Security(StatusCode::BAD_CERTIFICATE_INVALID)
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// =============================================================================
// X509Certificate
// =============================================================================

/// A DER-encoded X.509 certificate with the accessors the channel needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X509Certificate {
    der: Vec<u8>,
}

impl X509Certificate {
    /// Wraps DER bytes, verifying that they parse as a certificate.
    pub fn from_der(der: Vec<u8>) -> ChannelResult<Self> {
        Certificate::from_der(&der).map_err(certificate_invalid)?;
        Ok(Self { der })
    }

    /// The raw DER bytes.
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// The certificate as a wire byte string.
    pub fn as_byte_string(&self) -> ByteString {
        ByteString::from(self.der.as_slice())
    }

    /// SHA-1 thumbprint, used in asymmetric security headers.
    pub fn thumbprint(&self) -> Vec<u8> {
        sha1_digest(&self.der)
    }

    /// Thumbprint as a lowercase hex string (store keys, file names).
    pub fn thumbprint_hex(&self) -> String {
        hex_string(&self.thumbprint())
    }

    /// The RSA public key inside the certificate.
    pub fn public_key(&self) -> ChannelResult<RsaPublicKey> {
        let certificate = Certificate::from_der(&self.der).map_err(certificate_invalid)?;
        let spki_der = certificate
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(certificate_invalid)?;
        RsaPublicKey::from_public_key_der(&spki_der).map_err(certificate_invalid)
    }

    /// The application URI from the subject alternative name, if present.
    pub fn application_uri(&self) -> Option<String> {
        let certificate = Certificate::from_der(&self.der).ok()?;
        let extensions = certificate.tbs_certificate.extensions.as_ref()?;
        for extension in extensions {
            if extension.extn_id != SubjectAltName::OID {
                continue;
            }
            let san = SubjectAltName::from_der(extension.extn_value.as_bytes()).ok()?;
            for name in &san.0 {
                if let GeneralName::UniformResourceIdentifier(uri) = name {
                    return Some(uri.to_string());
                }
            }
        }
        None
    }

    /// Checks the validity window against the current time.
    pub fn is_time_valid(&self) -> bool {
        let Ok(certificate) = Certificate::from_der(&self.der) else {
            return false;
        };
        let validity = &certificate.tbs_certificate.validity;
        let now = SystemTime::now();
        validity.not_before.to_system_time() <= now && now <= validity.not_after.to_system_time()
    }
}

// =============================================================================
// Contracts
// =============================================================================

/// Our certificate paired with its private key.
#[derive(Clone)]
pub struct OwnIdentity {
    /// Our application instance certificate.
    pub certificate: X509Certificate,

    /// The matching private key.
    pub private_key: RsaPrivateKey,
}

impl std::fmt::Debug for OwnIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnIdentity")
            .field("certificate", &self.certificate.thumbprint_hex())
            .field("private_key", &"[redacted]")
            .finish()
    }
}

impl OwnIdentity {
    /// Loads identity from DER certificate bytes and a PKCS#8 PEM key.
    pub fn from_der_and_pem(certificate_der: Vec<u8>, key_pem: &str) -> ChannelResult<Self> {
        let certificate = X509Certificate::from_der(certificate_der)?;
        let private_key = RsaPrivateKey::from_pkcs8_pem(key_pem)
            .map_err(|_| ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED))?;
        Ok(Self {
            certificate,
            private_key,
        })
    }
}

/// Supplies the channel's own certificate and key.
pub trait CertificateProvider: Send + Sync {
    /// Our identity, or `None` when running without certificates.
    fn own_identity(&self) -> ChannelResult<Option<OwnIdentity>>;
}

/// A provider with a fixed, preloaded identity.
#[derive(Debug, Clone, Default)]
pub struct StaticCertificateProvider {
    identity: Option<OwnIdentity>,
}

impl StaticCertificateProvider {
    /// Provider with the given identity.
    pub fn new(identity: OwnIdentity) -> Self {
        Self {
            identity: Some(identity),
        }
    }

    /// Provider without any identity (policy None only).
    pub fn empty() -> Self {
        Self { identity: None }
    }
}

impl CertificateProvider for StaticCertificateProvider {
    fn own_identity(&self) -> ChannelResult<Option<OwnIdentity>> {
        Ok(self.identity.clone())
    }
}

/// Decides whether a peer certificate is acceptable.
pub trait CertificateValidator: Send + Sync {
    /// Accepts or rejects a peer certificate, with the rejection reason.
    fn validate(&self, certificate: &X509Certificate) -> Result<(), StatusCode>;
}

/// Accepts every certificate. For tests and explicitly configured
/// trust-all deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllValidator;

impl CertificateValidator for AcceptAllValidator {
    fn validate(&self, _certificate: &X509Certificate) -> Result<(), StatusCode> {
        Ok(())
    }
}

/// Validates against a [`TrustStore`] plus the time window.
pub struct StoreValidator {
    store: Arc<dyn TrustStore>,
}

impl StoreValidator {
    /// Validator backed by the given store.
    pub fn new(store: Arc<dyn TrustStore>) -> Self {
        Self { store }
    }
}

impl CertificateValidator for StoreValidator {
    fn validate(&self, certificate: &X509Certificate) -> Result<(), StatusCode> {
        if !certificate.is_time_valid() {
            return Err(StatusCode::BAD_CERTIFICATE_TIME_INVALID);
        }
        if !self.store.contains(&certificate.thumbprint_hex()) {
            return Err(StatusCode::BAD_CERTIFICATE_UNTRUSTED);
        }
        Ok(())
    }
}

// =============================================================================
// Trust stores
// =============================================================================

/// Holds the certificates the application trusts, keyed by hex thumbprint.
pub trait TrustStore: Send + Sync {
    /// Returns `true` when the thumbprint is trusted.
    fn contains(&self, thumbprint_hex: &str) -> bool;

    /// Adds a certificate to the store.
    fn insert(&self, certificate: &X509Certificate) -> ChannelResult<()>;

    /// Thumbprints of everything in the store.
    fn thumbprints(&self) -> Vec<String>;
}

/// An in-memory trust store.
#[derive(Debug, Default)]
pub struct MemoryTrustStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryTrustStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrustStore for MemoryTrustStore {
    fn contains(&self, thumbprint_hex: &str) -> bool {
        self.entries.read().contains_key(thumbprint_hex)
    }

    fn insert(&self, certificate: &X509Certificate) -> ChannelResult<()> {
        self.entries
            .write()
            .insert(certificate.thumbprint_hex(), certificate.as_der().to_vec());
        Ok(())
    }

    fn thumbprints(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

/// A trust store backed by a directory of `<thumbprint>.der` files.
#[derive(Debug)]
pub struct DirectoryTrustStore {
    directory: PathBuf,
}

impl DirectoryTrustStore {
    /// Opens (creating if needed) a directory-backed store.
    pub fn open(directory: impl Into<PathBuf>) -> ChannelResult<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    fn path_for(&self, thumbprint_hex: &str) -> PathBuf {
        self.directory.join(format!("{}.der", thumbprint_hex))
    }
}

impl TrustStore for DirectoryTrustStore {
    fn contains(&self, thumbprint_hex: &str) -> bool {
        self.path_for(thumbprint_hex).is_file()
    }

    fn insert(&self, certificate: &X509Certificate) -> ChannelResult<()> {
        std::fs::write(
            self.path_for(&certificate.thumbprint_hex()),
            certificate.as_der(),
        )?;
        Ok(())
    }

    fn thumbprints(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.directory) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                let name = path.file_stem()?.to_str()?;
                (path.extension()?.to_str()? == "der").then(|| name.to_string())
            })
            .collect()
    }
}

// =============================================================================
// Self-signed generation
// =============================================================================

/// Generates a self-signed application instance certificate on first run.
#[derive(Debug, Clone)]
pub struct SelfSignedGenerator {
    /// Subject common name.
    pub common_name: String,

    /// Application URI placed in the subject alternative name; must match
    /// the session's ApplicationDescription.
    pub application_uri: String,

    /// Host names placed in the subject alternative name.
    pub hostnames: Vec<String>,

    /// RSA modulus size in bits.
    pub key_size: usize,

    /// Validity period.
    pub validity: Duration,
}

impl SelfSignedGenerator {
    /// A generator with the conventional defaults: 2048-bit key, one year,
    /// `urn:<host>:<appname>` application URI.
    pub fn new(hostname: impl Into<String>, application_name: impl Into<String>) -> Self {
        let hostname = hostname.into();
        let application_name = application_name.into();
        Self {
            application_uri: format!("urn:{}:{}", hostname, application_name),
            common_name: application_name,
            hostnames: vec![hostname],
            key_size: 2048,
            validity: Duration::from_secs(365 * 24 * 3600),
        }
    }

    /// Generates the key pair and certificate.
    pub fn generate(&self) -> ChannelResult<OwnIdentity> {
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, self.key_size)
            .map_err(|_| ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED))?;
        let public_key = RsaPublicKey::from(&private_key);

        let mut serial_bytes = random_nonce(8);
        serial_bytes[0] &= 0x7F;
        serial_bytes[0] |= 0x01;
        let serial = SerialNumber::new(&serial_bytes).map_err(certificate_invalid)?;

        let validity = Validity::from_now(self.validity).map_err(certificate_invalid)?;
        let subject =
            Name::from_str(&format!("CN={}", self.common_name)).map_err(certificate_invalid)?;

        let spki_der = public_key
            .to_public_key_der()
            .map_err(certificate_invalid)?;
        let spki = SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes())
            .map_err(certificate_invalid)?;

        let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key.clone());
        let mut builder = CertificateBuilder::new(
            Profile::Manual { issuer: None },
            serial,
            validity,
            subject,
            spki,
            &signer,
        )
        .map_err(certificate_invalid)?;

        let mut names = vec![GeneralName::UniformResourceIdentifier(
            Ia5String::new(&self.application_uri).map_err(certificate_invalid)?,
        )];
        for hostname in &self.hostnames {
            names.push(GeneralName::DnsName(
                Ia5String::new(hostname).map_err(certificate_invalid)?,
            ));
        }
        builder
            .add_extension(&SubjectAltName(names))
            .map_err(certificate_invalid)?;

        let certificate = builder
            .build::<rsa::pkcs1v15::Signature>()
            .map_err(certificate_invalid)?;
        let der = certificate.to_der().map_err(certificate_invalid)?;

        Ok(OwnIdentity {
            certificate: X509Certificate::from_der(der)?,
            private_key,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
