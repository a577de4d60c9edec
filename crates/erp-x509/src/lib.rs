//! X.509 utilities shared by the signature engines.
//!
//! [`X509Certificate`] keeps two views of the same certificate: the
//! `openssl` handle for cryptographic operations and the decoded
//! `rasn-pkix` structure for byte-exact access to issuer, serial, and
//! extensions — in particular the admission extension carrying the
//! profession OIDs of a Telematikinfrastruktur certificate.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod admission;
mod trust;

pub use trust::{AcceptAllTrustStore, CertificateType, TrustStore, TslError, TslMode};

use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Public};
use openssl::x509::X509;
use std::path::Path;

/// Errors while handling certificates.
#[derive(Debug, thiserror::Error)]
pub enum X509Error {
    /// The DER or PEM input could not be parsed.
    #[error("cannot parse certificate: {0}")]
    Parse(String),
    /// A cryptographic operation failed.
    #[error("crypto failure: {0}")]
    Crypto(String),
    /// A trusted-certificate directory could not be read.
    #[error("cannot read trust directory {path}: {reason}")]
    TrustDir {
        /// The directory.
        path: String,
        /// Why reading failed.
        reason: String,
    },
}

impl From<openssl::error::ErrorStack> for X509Error {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Self::Crypto(err.to_string())
    }
}

/// A parsed certificate with both an `openssl` and an ASN.1 view.
#[derive(Debug, Clone)]
pub struct X509Certificate {
    handle: X509,
    decoded: rasn_pkix::Certificate,
    der: Vec<u8>,
}

impl X509Certificate {
    /// Parse from DER bytes.
    pub fn from_der(der: &[u8]) -> Result<Self, X509Error> {
        let handle = X509::from_der(der).map_err(|e| X509Error::Parse(e.to_string()))?;
        let decoded: rasn_pkix::Certificate =
            rasn::der::decode(der).map_err(|e| X509Error::Parse(e.to_string()))?;
        Ok(Self {
            handle,
            decoded,
            der: der.to_vec(),
        })
    }

    /// Parse from a PEM block.
    pub fn from_pem(pem: &[u8]) -> Result<Self, X509Error> {
        let handle = X509::from_pem(pem).map_err(|e| X509Error::Parse(e.to_string()))?;
        let der = handle.to_der()?;
        Self::from_der(&der)
    }

    /// The DER encoding.
    pub fn to_der(&self) -> &[u8] {
        &self.der
    }

    /// The `openssl` handle.
    pub fn as_openssl(&self) -> &X509 {
        &self.handle
    }

    /// The decoded ASN.1 certificate.
    pub fn decoded(&self) -> &rasn_pkix::Certificate {
        &self.decoded
    }

    /// Issuer name, DER-encoded (for ESS issuerSerial comparison).
    pub fn issuer(&self) -> &rasn_pkix::Name {
        &self.decoded.tbs_certificate.issuer
    }

    /// The certificate serial number.
    pub fn serial_number(&self) -> &rasn::types::Integer {
        &self.decoded.tbs_certificate.serial_number
    }

    /// The subject's public key.
    pub fn public_key(&self) -> Result<PKey<Public>, X509Error> {
        Ok(self.handle.public_key()?)
    }

    /// Digest of the DER encoding under the given algorithm.
    pub fn digest(&self, algorithm: MessageDigest) -> Result<Vec<u8>, X509Error> {
        Ok(openssl::hash::hash(algorithm, &self.der)?.to_vec())
    }

    /// Profession OIDs listed in the admission extension; empty when the
    /// certificate carries none.
    pub fn profession_oids(&self) -> Vec<String> {
        admission::profession_oids(&self.decoded)
    }

    /// Whether the admission extension lists at least one of the
    /// expected role OIDs.
    pub fn check_roles(&self, expected: &[&str]) -> bool {
        let present = self.profession_oids();
        present.iter().any(|oid| expected.contains(&oid.as_str()))
    }

    /// Whether `issuer` and `serial` match this certificate.
    pub fn matches_issuer_serial(
        &self,
        issuer: &rasn_pkix::Name,
        serial: &rasn::types::Integer,
    ) -> bool {
        self.issuer() == issuer && self.serial_number() == serial
    }
}

/// Load every certificate from a directory of `.pem`/`.crt`/`.der`
/// files, as configured through `CADES_BES_TRUSTED_CERT_DIR`.
pub fn load_trusted_certificates(dir: &Path) -> Result<Vec<X509Certificate>, X509Error> {
    let entries = std::fs::read_dir(dir).map_err(|e| X509Error::TrustDir {
        path: dir.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut certificates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| X509Error::TrustDir {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        let path = entry.path();
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let bytes = std::fs::read(&path).map_err(|e| X509Error::TrustDir {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let certificate = match extension {
            "pem" | "crt" => X509Certificate::from_pem(&bytes)?,
            "der" => X509Certificate::from_der(&bytes)?,
            _ => continue,
        };
        tracing::debug!(path = %path.display(), "loaded trust anchor");
        certificates.push(certificate);
    }
    Ok(certificates)
}
