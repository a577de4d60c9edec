//! The trust-store interface.
//!
//! Path building, TSL bookkeeping, and OCSP evaluation live in an
//! external collaborator. The signature engines only need this narrow
//! synchronous surface; snapshots handed out by an implementation stay
//! valid until dropped.

use crate::X509Certificate;
use std::collections::BTreeSet;

/// Trust domain a verification runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TslMode {
    /// The general trust-service status list.
    Tsl,
    /// The BNetzA-VL domain of qualified certificates.
    Bna,
}

/// Certificate usages the caller accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CertificateType {
    /// Qualified electronic signature of a healthcare professional.
    Qes,
    /// Encryption certificate of a healthcare professional.
    Encryption,
}

/// Error passed through unchanged from the trust store, including the
/// HTTP status the remote reported.
#[derive(Debug, Clone, thiserror::Error)]
#[error("trust store rejected certificate: {message} (status {http_status})")]
pub struct TslError {
    /// Human-readable description.
    pub message: String,
    /// Remote HTTP status to propagate to the caller.
    pub http_status: u16,
}

/// Certificate path and revocation validation.
///
/// `ocsp_response` carries the DER-encoded OCSP response embedded in a
/// CMS container, when one was present.
pub trait TrustStore {
    /// Validate path and revocation state of `certificate`.
    fn verify_certificate(
        &self,
        mode: TslMode,
        certificate: &X509Certificate,
        allowed_usage: &BTreeSet<CertificateType>,
        ocsp_response: Option<&[u8]>,
    ) -> Result<(), TslError>;
}

/// A trust store that accepts everything; test scaffolding only.
#[derive(Debug, Default)]
pub struct AcceptAllTrustStore {
    /// Records of the verification calls received.
    pub calls: std::sync::Mutex<Vec<(TslMode, bool)>>,
}

impl TrustStore for AcceptAllTrustStore {
    fn verify_certificate(
        &self,
        mode: TslMode,
        _certificate: &X509Certificate,
        _allowed_usage: &BTreeSet<CertificateType>,
        ocsp_response: Option<&[u8]>,
    ) -> Result<(), TslError> {
        self.calls
            .lock()
            .expect("trust store lock")
            .push((mode, ocsp_response.is_some()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsl_error_carries_remote_status() {
        let err = TslError {
            message: "certificate revoked".to_string(),
            http_status: 502,
        };
        assert!(err.to_string().contains("revoked"));
        assert!(err.to_string().contains("502"));
    }
}
