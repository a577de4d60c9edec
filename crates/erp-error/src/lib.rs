//! Unified error taxonomy with stable error codes for the e-prescription
//! processing core.
//!
//! Every boundary error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context. The HTTP layer translates errors via
//! [`ErrorCode::http_status`] and [`ErrorCode::operation_outcome_code`];
//! nothing inside the core attempts recovery.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// HttpStatus
// ---------------------------------------------------------------------------

/// Minimal HTTP status representation used at the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HttpStatus(pub u16);

impl HttpStatus {
    /// 400 Bad Request.
    pub const BAD_REQUEST: Self = Self(400);
    /// 401 Unauthorized.
    pub const UNAUTHORIZED: Self = Self(401);
    /// 500 Internal Server Error.
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);
}

impl fmt::Display for HttpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Profile repository loading errors (fatal at startup).
    Profile,
    /// FHIR document validation verdicts.
    Validation,
    /// CAdES-BES container and signature errors.
    Cades,
    /// Trust-store (TSL) errors passed through from the collaborator.
    TrustStore,
    /// Access-token errors.
    Jwt,
    /// Configuration errors.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Profile => "profile",
            Self::Validation => "validation",
            Self::Cades => "cades",
            Self::TrustStore => "trust_store",
            Self::Jwt => "jwt",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Profile --
    /// A StructureDefinition, CodeSystem, or ValueSet failed to load or
    /// resolve.
    ProfileLoadFailed,

    // -- Validation --
    /// The highest finding severity of a validation run was `error`.
    ValidationFailed,

    // -- CAdES-BES --
    /// A mandatory signed attribute is missing from a SignerInfo.
    CadesMissingAttribute,
    /// The ESS SigningCertificate hash does not match the signer certificate.
    CadesCertHashMismatch,
    /// No signer certificate could be located for a SignerInfo.
    CadesNoSignerCert,
    /// The container or its payload could not be decoded.
    CadesPayloadDecode,
    /// The signature value did not verify.
    CadesSignatureInvalid,
    /// The QES certificate carries none of the admitted profession OIDs.
    CadesUnexpectedProfessionOid,

    // -- Trust store --
    /// Certificate path or revocation validation failed in the trust store.
    TrustStoreRejected,

    // -- JWT --
    /// The token violates the compact-serialization format.
    JwtFormat,
    /// The token signature or algorithm is invalid.
    JwtSignature,
    /// The token is outside its validity window.
    JwtExpired,
    /// A required claim is missing or has the wrong type.
    JwtMissingClaim,
    /// The `aud` claim does not name this service.
    JwtBadAudience,

    // -- Config --
    /// Configuration file or value is invalid.
    ConfigInvalid,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ProfileLoadFailed => ErrorCategory::Profile,

            Self::ValidationFailed => ErrorCategory::Validation,

            Self::CadesMissingAttribute
            | Self::CadesCertHashMismatch
            | Self::CadesNoSignerCert
            | Self::CadesPayloadDecode
            | Self::CadesSignatureInvalid
            | Self::CadesUnexpectedProfessionOid => ErrorCategory::Cades,

            Self::TrustStoreRejected => ErrorCategory::TrustStore,

            Self::JwtFormat
            | Self::JwtSignature
            | Self::JwtExpired
            | Self::JwtMissingClaim
            | Self::JwtBadAudience => ErrorCategory::Jwt,

            Self::ConfigInvalid => ErrorCategory::Config,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProfileLoadFailed => "PROFILE_LOAD_FAILED",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::CadesMissingAttribute => "CADES_MISSING_ATTRIBUTE",
            Self::CadesCertHashMismatch => "CADES_CERT_HASH_MISMATCH",
            Self::CadesNoSignerCert => "CADES_NO_SIGNER_CERT",
            Self::CadesPayloadDecode => "CADES_PAYLOAD_DECODE",
            Self::CadesSignatureInvalid => "CADES_SIGNATURE_INVALID",
            Self::CadesUnexpectedProfessionOid => "CADES_UNEXPECTED_PROFESSION_OID",
            Self::TrustStoreRejected => "TRUST_STORE_REJECTED",
            Self::JwtFormat => "JWT_FORMAT",
            Self::JwtSignature => "JWT_SIGNATURE",
            Self::JwtExpired => "JWT_EXPIRED",
            Self::JwtMissingClaim => "JWT_MISSING_CLAIM",
            Self::JwtBadAudience => "JWT_BAD_AUDIENCE",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Internal => "INTERNAL",
        }
    }

    /// HTTP status the boundary reports for this code.
    ///
    /// Validation and signature problems are caller errors (400), token
    /// problems are authentication refusals (401). Trust-store rejections
    /// carry their own remote status and default to 400 here.
    pub fn http_status(&self) -> HttpStatus {
        match self.category() {
            ErrorCategory::Validation | ErrorCategory::Cades | ErrorCategory::TrustStore => {
                HttpStatus::BAD_REQUEST
            }
            ErrorCategory::Jwt => HttpStatus::UNAUTHORIZED,
            ErrorCategory::Profile | ErrorCategory::Config | ErrorCategory::Internal => {
                HttpStatus::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Taxonomy code reported in the outer error envelope, where one exists.
    ///
    /// All prescription-signature problems collapse to
    /// `"invalid_prescription"` at the boundary.
    pub fn operation_outcome_code(&self) -> Option<&'static str> {
        match self.category() {
            ErrorCategory::Cades | ErrorCategory::TrustStore => Some("invalid_prescription"),
            ErrorCategory::Validation => Some("invalid_resource"),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ErpError
// ---------------------------------------------------------------------------

/// Unified boundary error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use erp_error::{ErpError, ErrorCode};
///
/// let err = ErpError::new(ErrorCode::JwtExpired, "token expired")
///     .with_context("now", 1_700_000_100)
///     .with_context("exp", 1_700_000_000);
/// ```
pub struct ErpError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
    /// Status override for pass-through errors (trust-store remote status).
    pub status_override: Option<HttpStatus>,
}

impl ErpError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
            status_override: None,
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Override the HTTP status, e.g. with the remote status of a
    /// trust-store response.
    pub fn with_status(mut self, status: HttpStatus) -> Self {
        self.status_override = Some(status);
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Effective HTTP status: the override if set, otherwise the code's
    /// default mapping.
    pub fn http_status(&self) -> HttpStatus {
        self.status_override.unwrap_or_else(|| self.code.http_status())
    }
}

impl fmt::Debug for ErpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ErpError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for ErpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ErpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::ProfileLoadFailed,
        ErrorCode::ValidationFailed,
        ErrorCode::CadesMissingAttribute,
        ErrorCode::CadesCertHashMismatch,
        ErrorCode::CadesNoSignerCert,
        ErrorCode::CadesPayloadDecode,
        ErrorCode::CadesSignatureInvalid,
        ErrorCode::CadesUnexpectedProfessionOid,
        ErrorCode::TrustStoreRejected,
        ErrorCode::JwtFormat,
        ErrorCode::JwtSignature,
        ErrorCode::JwtExpired,
        ErrorCode::JwtMissingClaim,
        ErrorCode::JwtBadAudience,
        ErrorCode::ConfigInvalid,
        ErrorCode::Internal,
    ];

    #[test]
    fn display_without_context() {
        let err = ErpError::new(ErrorCode::JwtFormat, "bad token");
        assert_eq!(err.to_string(), "[JWT_FORMAT] bad token");
    }

    #[test]
    fn display_with_context() {
        let err = ErpError::new(ErrorCode::JwtExpired, "expired").with_context("exp", 1700000000);
        let s = err.to_string();
        assert!(s.starts_with("[JWT_EXPIRED] expired"));
        assert!(s.contains("1700000000"));
    }

    #[test]
    fn all_codes_have_unique_as_str() {
        let mut seen = HashSet::new();
        for code in ALL_CODES {
            assert!(seen.insert(code.as_str()), "duplicate: {}", code.as_str());
        }
        assert_eq!(seen.len(), ALL_CODES.len());
    }

    #[test]
    fn jwt_codes_are_unauthorized() {
        for code in ALL_CODES {
            if code.category() == ErrorCategory::Jwt {
                assert_eq!(code.http_status(), HttpStatus::UNAUTHORIZED);
            }
        }
    }

    #[test]
    fn cades_codes_map_to_invalid_prescription() {
        assert_eq!(
            ErrorCode::CadesCertHashMismatch.operation_outcome_code(),
            Some("invalid_prescription")
        );
        assert_eq!(
            ErrorCode::CadesCertHashMismatch.http_status(),
            HttpStatus::BAD_REQUEST
        );
    }

    #[test]
    fn status_override_wins() {
        let err = ErpError::new(ErrorCode::TrustStoreRejected, "remote said no")
            .with_status(HttpStatus(502));
        assert_eq!(err.http_status(), HttpStatus(502));
    }

    #[test]
    fn source_chain_preserved() {
        let inner = io::Error::new(io::ErrorKind::InvalidData, "truncated");
        let err = ErpError::new(ErrorCode::CadesPayloadDecode, "decode failed").with_source(inner);
        let src = std::error::Error::source(&err).unwrap();
        assert_eq!(src.to_string(), "truncated");
    }

    #[test]
    fn serde_code_roundtrip() {
        let json = serde_json::to_string(&ErrorCode::CadesUnexpectedProfessionOid).unwrap();
        assert_eq!(json, r#""CADES_UNEXPECTED_PROFESSION_OID""#);
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorCode::CadesUnexpectedProfessionOid);
    }
}
