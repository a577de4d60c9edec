//! CAdES-BES signature processing.
//!
//! [`CadesBesSignature`] parses, verifies, and creates PKCS#7/CMS
//! containers carrying a signed prescription payload: the four mandatory
//! signed attributes, the ESS SigningCertificate (v1/v2) binding, an
//! optionally embedded OCSP response, and counter signatures over
//! receipts. Certificate path and revocation validation is delegated to
//! the [`TrustStore`] collaborator; signature verification itself always
//! happens here, so the trust store runs in its
//! no-signer-cert-verify mode.

#![deny(unsafe_code)]

pub mod asn1;
pub mod ess;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SubsecRound, Utc};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKeyRef, Private};
use rasn::prelude::*;
use rasn_pkix::AlgorithmIdentifier;
use std::collections::BTreeSet;

use asn1::{
    find_attribute, set_items, set_of, Attribute, CertificateChoice, ContentInfo,
    EncapsulatedContentInfo, IssuerAndSerialNumber, OtherRevocationInfoFormat,
    RevocationInfoChoice, SignedData, SignerIdentifier, SignerInfo, ECDSA_WITH_SHA256,
    ID_CONTENT_TYPE, ID_COUNTER_SIGNATURE, ID_DATA, ID_MESSAGE_DIGEST,
    ID_OCSP_REVOCATION_CONTAINER, ID_SIGNED_DATA, ID_SIGNING_TIME, SHA1, SHA256, SHA256_WITH_RSA,
    SHA384, SHA512,
};
use erp_error::{ErpError, ErrorCode, HttpStatus};
use erp_model::profession_oid::QES_PRESCRIPTION_OIDS;
use erp_x509::{CertificateType, TrustStore, TslError, TslMode, X509Certificate, X509Error};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of CAdES-BES processing; all map to `invalid_prescription`
/// at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum CadesError {
    /// A mandatory signed attribute is missing.
    #[error("{0}")]
    MissingAttribute(String),
    /// The ESS certificate hash does not match the signer certificate.
    #[error("The CMS signing certificate hash comparing with signed attributes failed.")]
    CertHashMismatch,
    /// No signer certificate could be located.
    #[error("{0}")]
    NoSignerCert(String),
    /// The payload could not be extracted.
    #[error("cannot decode CMS payload: {0}")]
    PayloadDecode(String),
    /// The cryptographic signature did not verify.
    #[error("CAdES-BES signature verification has failed: {0}")]
    SignatureInvalid(String),
    /// The QES certificate carries none of the admitted profession OIDs.
    #[error("The QES-Certificate does not have expected ProfessionOID.")]
    UnexpectedProfessionOid,
    /// The container violates structural CMS rules.
    #[error("invalid CMS structure: {0}")]
    Structure(String),
    /// Pass-through from the trust store.
    #[error(transparent)]
    TrustStore(#[from] TslError),
    /// An underlying crypto operation failed.
    #[error("crypto failure: {0}")]
    Crypto(String),
}

impl From<X509Error> for CadesError {
    fn from(err: X509Error) -> Self {
        Self::Crypto(err.to_string())
    }
}

impl From<openssl::error::ErrorStack> for CadesError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Self::Crypto(err.to_string())
    }
}

impl CadesError {
    /// Stable taxonomy code of this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingAttribute(_) => ErrorCode::CadesMissingAttribute,
            Self::CertHashMismatch => ErrorCode::CadesCertHashMismatch,
            Self::NoSignerCert(_) => ErrorCode::CadesNoSignerCert,
            Self::PayloadDecode(_) | Self::Structure(_) => ErrorCode::CadesPayloadDecode,
            Self::SignatureInvalid(_) | Self::Crypto(_) => ErrorCode::CadesSignatureInvalid,
            Self::UnexpectedProfessionOid => ErrorCode::CadesUnexpectedProfessionOid,
            Self::TrustStore(_) => ErrorCode::TrustStoreRejected,
        }
    }

    /// Translate into the boundary error type.
    pub fn into_erp_error(self) -> ErpError {
        let code = self.code();
        match self {
            Self::TrustStore(inner) => ErpError::new(code, inner.message.clone())
                .with_status(HttpStatus(inner.http_status)),
            other => ErpError::new(code, other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Verification modes
// ---------------------------------------------------------------------------

/// How signer certificates are validated.
pub enum VerificationMode<'a> {
    /// Full path and revocation validation through the trust store.
    TrustStore(&'a dyn TrustStore),
    /// Offline validation against an explicit set of trust anchors.
    TrustedCertificates(&'a [X509Certificate]),
    /// Structural and cryptographic checks only.
    NoVerify,
}

// ---------------------------------------------------------------------------
// CadesBesSignature
// ---------------------------------------------------------------------------

/// A parsed and verified CAdES-BES container.
#[derive(Debug)]
pub struct CadesBesSignature {
    signed_data: SignedData,
    payload: Vec<u8>,
    signer_certificates: Vec<X509Certificate>,
}

impl CadesBesSignature {
    /// Parse a Base64-encoded CMS container and verify it under the
    /// given mode.
    pub fn from_base64(data: &str, mode: VerificationMode<'_>) -> Result<Self, CadesError> {
        let cleaned: String = data
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let raw = BASE64
            .decode(cleaned.as_bytes())
            .map_err(|e| CadesError::PayloadDecode(format!("invalid base64: {e}")))?;
        let content_info: ContentInfo = rasn::ber::decode(&raw)
            .map_err(|e| CadesError::PayloadDecode(format!("invalid CMS envelope: {e}")))?;
        if *content_info.content_type != *ID_SIGNED_DATA {
            return Err(CadesError::Structure(format!(
                "not a SignedData container: {:?}",
                content_info.content_type
            )));
        }
        let signed_data: SignedData = rasn::ber::decode(content_info.content.as_bytes())
            .map_err(|e| CadesError::PayloadDecode(format!("invalid SignedData: {e}")))?;

        let payload = signed_data
            .encap_content_info
            .content
            .as_ref()
            .map(|octets| octets.to_vec())
            .ok_or_else(|| {
                CadesError::PayloadDecode("no embedded payload in SignedData".to_string())
            })?;

        let mut container = Self {
            signed_data,
            payload,
            signer_certificates: Vec::new(),
        };
        container.verify(mode)?;
        Ok(container)
    }

    fn verify(&mut self, mode: VerificationMode<'_>) -> Result<(), CadesError> {
        let signer_infos = set_items(&self.signed_data.signer_infos);
        if signer_infos.is_empty() {
            return Err(CadesError::NoSignerCert("No signer infos provided.".to_string()));
        }
        let certificates = self.embedded_certificates()?;
        let ocsp = self.ocsp_response()?;
        let mut signer_certificates = Vec::new();
        for signer_info in signer_infos {
            check_required_attributes(signer_info)?;
            let certificate = find_signer_certificate(signer_info, &certificates)?;
            ess::verify_signing_certificate(
                signer_info.signed_attrs.as_ref(),
                &certificate,
            )?;
            verify_signature(signer_info, &certificate, &self.payload)?;
            match &mode {
                VerificationMode::TrustStore(store) => {
                    let usage: BTreeSet<CertificateType> =
                        [CertificateType::Qes, CertificateType::Encryption]
                            .into_iter()
                            .collect();
                    store.verify_certificate(
                        TslMode::Bna,
                        &certificate,
                        &usage,
                        ocsp.as_deref(),
                    )?;
                }
                VerificationMode::TrustedCertificates(anchors) => {
                    verify_against_anchors(&certificate, anchors)?;
                }
                VerificationMode::NoVerify => {}
            }
            signer_certificates.push(certificate);
        }
        self.signer_certificates = signer_certificates;
        Ok(())
    }

    fn embedded_certificates(&self) -> Result<Vec<X509Certificate>, CadesError> {
        let mut certificates = Vec::new();
        if let Some(set) = &self.signed_data.certificates {
            for choice in set_items(set) {
                if let CertificateChoice::Certificate(certificate) = choice {
                    let der = rasn::der::encode(certificate)
                        .map_err(|e| CadesError::Structure(e.to_string()))?;
                    certificates.push(X509Certificate::from_der(&der)?);
                }
            }
        }
        Ok(certificates)
    }

    /// The embedded OCSP response, when exactly one is present.
    pub fn ocsp_response(&self) -> Result<Option<Vec<u8>>, CadesError> {
        let Some(crls) = &self.signed_data.crls else {
            tracing::warn!("No OCSP-response is provided in CMS.");
            return Ok(None);
        };
        let mut responses = Vec::new();
        for choice in set_items(crls) {
            if let RevocationInfoChoice::Other(other) = choice {
                if *other.other_rev_info_format == *ID_OCSP_REVOCATION_CONTAINER {
                    responses.push(other.other_rev_info.as_bytes().to_vec());
                }
            }
        }
        match responses.len() {
            0 => {
                tracing::warn!("No OCSP-response is provided in CMS.");
                Ok(None)
            }
            1 => Ok(Some(responses.remove(0))),
            _ => Err(CadesError::Structure(
                "at most one OCSP revocation container is allowed".to_string(),
            )),
        }
    }

    /// The signed payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The verified signer certificates.
    pub fn signer_certificates(&self) -> &[X509Certificate] {
        &self.signer_certificates
    }

    /// The signing time carried in the signed attributes.
    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        for signer_info in set_items(&self.signed_data.signer_infos) {
            let Some(attribute) =
                find_attribute(signer_info.signed_attrs.as_ref(), ID_SIGNING_TIME)
            else {
                continue;
            };
            let Some(value) = set_items(&attribute.values).into_iter().next() else {
                continue;
            };
            if let Ok(time) = rasn::der::decode::<UtcTime>(value.as_bytes()) {
                return Some(time);
            }
        }
        None
    }

    /// The messageDigest attribute value.
    pub fn message_digest(&self) -> Option<Vec<u8>> {
        for signer_info in set_items(&self.signed_data.signer_infos) {
            let Some(attribute) =
                find_attribute(signer_info.signed_attrs.as_ref(), ID_MESSAGE_DIGEST)
            else {
                continue;
            };
            let Some(value) = set_items(&attribute.values).into_iter().next() else {
                continue;
            };
            if let Ok(digest) = rasn::der::decode::<OctetString>(value.as_bytes()) {
                return Some(digest.to_vec());
            }
        }
        None
    }

    /// Serialize to a Base64-encoded DER container.
    pub fn to_base64(&self) -> Result<String, CadesError> {
        let content = rasn::der::encode(&self.signed_data)
            .map_err(|e| CadesError::Structure(e.to_string()))?;
        let content_info = ContentInfo {
            content_type: ID_SIGNED_DATA.into(),
            content: Any::new(content),
        };
        let der = rasn::der::encode(&content_info)
            .map_err(|e| CadesError::Structure(e.to_string()))?;
        Ok(BASE64.encode(der))
    }

    // -- signing -------------------------------------------------------

    /// Create a CAdES-BES signature over `payload`.
    ///
    /// The ESS SigningCertificate attribute is synthesized to match the
    /// digest algorithm (v1 for SHA-1 signers, v2 otherwise); a supplied
    /// OCSP response is embedded as an otherRevocationInfoChoice.
    pub fn sign(
        certificate: &X509Certificate,
        key: &PKeyRef<Private>,
        payload: &[u8],
        signing_time: Option<DateTime<Utc>>,
        ocsp_response: Option<&[u8]>,
    ) -> Result<Self, CadesError> {
        let digest = MessageDigest::sha256();
        let payload_digest = openssl::hash::hash(digest, payload)?.to_vec();
        let signing_time = signing_time.unwrap_or_else(Utc::now).trunc_subsecs(0);

        let mut attributes = vec![
            Attribute {
                r#type: ID_CONTENT_TYPE.into(),
                values: set_of(vec![Any::new(
                    rasn::der::encode(&ObjectIdentifier::from(ID_DATA))
                        .map_err(|e| CadesError::Structure(e.to_string()))?,
                )]),
            },
            Attribute {
                r#type: ID_SIGNING_TIME.into(),
                values: set_of(vec![Any::new(
                    rasn::der::encode::<UtcTime>(&signing_time)
                        .map_err(|e| CadesError::Structure(e.to_string()))?,
                )]),
            },
            Attribute {
                r#type: ID_MESSAGE_DIGEST.into(),
                values: set_of(vec![Any::new(
                    rasn::der::encode(&OctetString::from(payload_digest))
                        .map_err(|e| CadesError::Structure(e.to_string()))?,
                )]),
            },
        ];
        attributes.push(ess::build_signing_certificate_attribute(certificate, SHA256)?);
        let signed_attrs = set_of(attributes);
        let signature = sign_attributes(&signed_attrs, key)?;

        let is_ec = key.id() == openssl::pkey::Id::EC;
        let signer_info = SignerInfo {
            version: Integer::from(1),
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: certificate.issuer().clone(),
                serial_number: certificate.serial_number().clone(),
            }),
            digest_algorithm: AlgorithmIdentifier {
                algorithm: SHA256.to_owned(),
                parameters: None,
            },
            signed_attrs: Some(signed_attrs),
            signature_algorithm: AlgorithmIdentifier {
                algorithm: if is_ec {
                    ECDSA_WITH_SHA256.to_owned()
                } else {
                    SHA256_WITH_RSA.to_owned()
                },
                parameters: if is_ec {
                    None
                } else {
                    Some(Any::new(
                        rasn::der::encode(&())
                            .map_err(|e| CadesError::Structure(e.to_string()))?,
                    ))
                },
            },
            signature: OctetString::from(signature),
            unsigned_attrs: None,
        };

        let crls = match ocsp_response {
            Some(response) => Some(set_of(vec![RevocationInfoChoice::Other(
                OtherRevocationInfoFormat {
                    other_rev_info_format: ID_OCSP_REVOCATION_CONTAINER.into(),
                    other_rev_info: Any::new(response.to_vec()),
                },
            )])),
            None => None,
        };

        let signed_data = SignedData {
            version: Integer::from(1),
            digest_algorithms: set_of(vec![AlgorithmIdentifier {
                algorithm: SHA256.to_owned(),
                parameters: None,
            }]),
            encap_content_info: EncapsulatedContentInfo {
                content_type: ID_DATA.into(),
                content: Some(OctetString::from(payload.to_vec())),
            },
            certificates: Some(set_of(vec![CertificateChoice::Certificate(
                certificate.decoded().clone(),
            )])),
            crls,
            signer_infos: set_of(vec![signer_info]),
        };
        Ok(Self {
            signed_data,
            payload: payload.to_vec(),
            signer_certificates: vec![certificate.clone()],
        })
    }

    // -- counter signature ---------------------------------------------

    /// Add a counter signature over the first signer's signature value.
    pub fn counter_sign(
        &mut self,
        certificate: &X509Certificate,
        key: &PKeyRef<Private>,
    ) -> Result<(), CadesError> {
        let mut signer_infos = take_signer_infos(&mut self.signed_data);
        let Some(first) = signer_infos.first_mut() else {
            return Err(CadesError::NoSignerCert("No signer infos provided.".to_string()));
        };
        let digest =
            openssl::hash::hash(MessageDigest::sha256(), first.signature.as_ref())?.to_vec();
        let mut attributes = vec![Attribute {
            r#type: ID_MESSAGE_DIGEST.into(),
            values: set_of(vec![Any::new(
                rasn::der::encode(&OctetString::from(digest))
                    .map_err(|e| CadesError::Structure(e.to_string()))?,
            )]),
        }];
        attributes.push(ess::build_signing_certificate_attribute(certificate, SHA256)?);
        let signed_attrs = set_of(attributes);
        let signature = sign_attributes(&signed_attrs, key)?;
        let counter = SignerInfo {
            version: Integer::from(1),
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: certificate.issuer().clone(),
                serial_number: certificate.serial_number().clone(),
            }),
            digest_algorithm: AlgorithmIdentifier {
                algorithm: SHA256.to_owned(),
                parameters: None,
            },
            signed_attrs: Some(signed_attrs),
            signature_algorithm: AlgorithmIdentifier {
                algorithm: ECDSA_WITH_SHA256.to_owned(),
                parameters: None,
            },
            signature: OctetString::from(signature),
            unsigned_attrs: None,
        };
        let counter_attribute = Attribute {
            r#type: ID_COUNTER_SIGNATURE.into(),
            values: set_of(vec![Any::new(
                rasn::der::encode(&counter).map_err(|e| CadesError::Structure(e.to_string()))?,
            )]),
        };
        let mut unsigned = first
            .unsigned_attrs
            .take()
            .map(|set| set_items(&set).into_iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        unsigned.push(counter_attribute);
        first.unsigned_attrs = Some(set_of(unsigned));
        self.signed_data.signer_infos = set_of(signer_infos);
        Ok(())
    }

    /// Verify the counter signature with the separately supplied
    /// fachdienst certificate.
    pub fn verify_counter_signature(
        &self,
        fachdienst: &X509Certificate,
    ) -> Result<(), CadesError> {
        let signer_infos = set_items(&self.signed_data.signer_infos);
        let first = signer_infos
            .first()
            .ok_or_else(|| CadesError::NoSignerCert("No signer infos provided.".to_string()))?;
        let attribute = find_attribute(first.unsigned_attrs.as_ref(), ID_COUNTER_SIGNATURE)
            .ok_or_else(|| {
                CadesError::MissingAttribute("No counterSignature attribute.".to_string())
            })?;
        let value = set_items(&attribute.values)
            .into_iter()
            .next()
            .ok_or_else(|| CadesError::Structure("empty counterSignature".to_string()))?;
        let counter: SignerInfo = rasn::der::decode(value.as_bytes())
            .map_err(|e| CadesError::Structure(e.to_string()))?;
        ess::verify_signing_certificate(counter.signed_attrs.as_ref(), fachdienst)?;
        // the counter signature binds to the inner signature octets
        let digest = digest_for_oid(&counter.digest_algorithm.algorithm)?;
        let expected = openssl::hash::hash(digest, first.signature.as_ref())?;
        let carried = find_attribute(counter.signed_attrs.as_ref(), ID_MESSAGE_DIGEST)
            .and_then(|attribute| set_items(&attribute.values).into_iter().next().cloned())
            .ok_or_else(|| {
                CadesError::MissingAttribute("No message digest in counter signature.".to_string())
            })?;
        let carried: OctetString = rasn::der::decode(carried.as_bytes())
            .map_err(|e| CadesError::Structure(e.to_string()))?;
        if carried.as_ref() != expected.as_ref() {
            return Err(CadesError::SignatureInvalid(
                "counter signature digest does not match inner signature".to_string(),
            ));
        }
        verify_signature_over(&counter, fachdienst, first.signature.as_ref())?;
        Ok(())
    }
}

fn take_signer_infos(signed_data: &mut SignedData) -> Vec<SignerInfo> {
    let existing = std::mem::replace(&mut signed_data.signer_infos, set_of(Vec::new()));
    set_items(&existing).into_iter().cloned().collect()
}

// ---------------------------------------------------------------------------
// Verification helpers
// ---------------------------------------------------------------------------

fn check_required_attributes(signer_info: &SignerInfo) -> Result<(), CadesError> {
    let attrs = signer_info.signed_attrs.as_ref();
    if find_attribute(attrs, ID_CONTENT_TYPE).is_none() {
        return Err(CadesError::MissingAttribute(
            "No content type in signed info.".to_string(),
        ));
    }
    if find_attribute(attrs, ID_SIGNING_TIME).is_none() {
        return Err(CadesError::MissingAttribute(
            "No signing time in signed info.".to_string(),
        ));
    }
    if find_attribute(attrs, ID_MESSAGE_DIGEST).is_none() {
        return Err(CadesError::MissingAttribute(
            "No message digest in signed info.".to_string(),
        ));
    }
    if find_attribute(attrs, asn1::ID_AA_SIGNING_CERTIFICATE).is_none()
        && find_attribute(attrs, asn1::ID_AA_SIGNING_CERTIFICATE_V2).is_none()
    {
        return Err(CadesError::MissingAttribute(
            "No certificate in signed info.".to_string(),
        ));
    }
    Ok(())
}

fn find_signer_certificate(
    signer_info: &SignerInfo,
    certificates: &[X509Certificate],
) -> Result<X509Certificate, CadesError> {
    match &signer_info.sid {
        SignerIdentifier::IssuerAndSerialNumber(issuer_serial) => certificates
            .iter()
            .find(|certificate| {
                certificate
                    .matches_issuer_serial(&issuer_serial.issuer, &issuer_serial.serial_number)
            })
            .cloned()
            .ok_or_else(|| CadesError::NoSignerCert("No signer certificate.".to_string())),
        SignerIdentifier::SubjectKeyIdentifier(_) => Err(CadesError::NoSignerCert(
            "subjectKeyIdentifier signer identification is not supported".to_string(),
        )),
    }
}

fn digest_for_oid(oid: &Oid) -> Result<MessageDigest, CadesError> {
    if oid == SHA1 {
        Ok(MessageDigest::sha1())
    } else if oid == SHA256 {
        Ok(MessageDigest::sha256())
    } else if oid == SHA384 {
        Ok(MessageDigest::sha384())
    } else if oid == SHA512 {
        Ok(MessageDigest::sha512())
    } else {
        Err(CadesError::Structure(format!("unsupported digest algorithm: {oid:?}")))
    }
}

fn verify_signature(
    signer_info: &SignerInfo,
    certificate: &X509Certificate,
    payload: &[u8],
) -> Result<(), CadesError> {
    let digest = digest_for_oid(&signer_info.digest_algorithm.algorithm)?;
    let attribute = find_attribute(signer_info.signed_attrs.as_ref(), ID_MESSAGE_DIGEST)
        .ok_or_else(|| {
            CadesError::MissingAttribute("No message digest in signed info.".to_string())
        })?;
    let value = set_items(&attribute.values)
        .into_iter()
        .next()
        .ok_or_else(|| CadesError::Structure("empty messageDigest attribute".to_string()))?;
    let carried: OctetString = rasn::der::decode(value.as_bytes())
        .map_err(|e| CadesError::Structure(e.to_string()))?;
    let computed = openssl::hash::hash(digest, payload)?;
    if carried.as_ref() != computed.as_ref() {
        return Err(CadesError::SignatureInvalid(
            "message digest does not match payload".to_string(),
        ));
    }
    verify_signature_over(signer_info, certificate, payload)
}

/// Verify a SignerInfo's signature. `content` is only used when the
/// signer carries no signed attributes, which CAdES-BES forbids — the
/// signature input here is always the DER of the signed attributes.
fn verify_signature_over(
    signer_info: &SignerInfo,
    certificate: &X509Certificate,
    content: &[u8],
) -> Result<(), CadesError> {
    let digest = digest_for_oid(&signer_info.digest_algorithm.algorithm)?;
    let input = match &signer_info.signed_attrs {
        Some(attrs) => {
            rasn::der::encode(attrs).map_err(|e| CadesError::Structure(e.to_string()))?
        }
        None => content.to_vec(),
    };
    let key = certificate.public_key()?;
    let mut verifier = openssl::sign::Verifier::new(digest, &key)?;
    verifier.update(&input)?;
    let valid = verifier
        .verify(signer_info.signature.as_ref())
        .unwrap_or(false);
    if !valid {
        return Err(CadesError::SignatureInvalid("invalid signature value".to_string()));
    }
    Ok(())
}

fn verify_against_anchors(
    certificate: &X509Certificate,
    anchors: &[X509Certificate],
) -> Result<(), CadesError> {
    for anchor in anchors {
        if anchor.to_der() == certificate.to_der() {
            return Ok(());
        }
        let issuer_key = anchor.public_key()?;
        if certificate
            .as_openssl()
            .verify(&issuer_key)
            .unwrap_or(false)
        {
            return Ok(());
        }
    }
    Err(CadesError::SignatureInvalid(
        "signer certificate is not issued by a trusted anchor".to_string(),
    ))
}

fn sign_attributes(
    signed_attrs: &SetOf<Attribute>,
    key: &PKeyRef<Private>,
) -> Result<Vec<u8>, CadesError> {
    let input =
        rasn::der::encode(signed_attrs).map_err(|e| CadesError::Structure(e.to_string()))?;
    let mut signer = openssl::sign::Signer::new(MessageDigest::sha256(), key)?;
    signer.update(&input)?;
    Ok(signer.sign_to_vec()?)
}

// ---------------------------------------------------------------------------
// SignedPrescription
// ---------------------------------------------------------------------------

/// A QES-signed prescription: CAdES-BES verification plus the
/// profession-OID policy for prescribing roles.
#[derive(Debug)]
pub struct SignedPrescription {
    inner: CadesBesSignature,
}

impl SignedPrescription {
    /// Verify a prescription signature through the trust store and check
    /// the signer's professional role.
    pub fn from_bin(content: &str, trust_store: &dyn TrustStore) -> Result<Self, ErpError> {
        let inner =
            CadesBesSignature::from_base64(content, VerificationMode::TrustStore(trust_store))
                .map_err(CadesError::into_erp_error)?;
        for certificate in inner.signer_certificates() {
            if !certificate.check_roles(QES_PRESCRIPTION_OIDS) {
                return Err(CadesError::UnexpectedProfessionOid.into_erp_error());
            }
        }
        Ok(Self { inner })
    }

    /// Unpack without certificate validation (internal re-reads of
    /// already verified artifacts).
    pub fn from_bin_no_verify(content: &str) -> Result<Self, ErpError> {
        let inner = CadesBesSignature::from_base64(content, VerificationMode::NoVerify)
            .map_err(CadesError::into_erp_error)?;
        Ok(Self { inner })
    }
}

impl std::ops::Deref for SignedPrescription {
    type Target = CadesBesSignature;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test_support {
    use openssl::asn1::Asn1Time;
    use openssl::bn::{BigNum, MsbOption};
    use openssl::ec::{EcGroup, EcKey};
    use openssl::nid::Nid;
    use openssl::pkey::{PKey, Private};
    use openssl::x509::{X509Builder, X509NameBuilder, X509};

    pub(crate) fn self_signed(common_name: &str) -> (X509, PKey<Private>) {
        let group = EcGroup::from_curve_name(Nid::BRAINPOOL_P256R1).expect("brainpool group");
        let key = EcKey::generate(&group).expect("generate key");
        let pkey = PKey::from_ec_key(key).expect("wrap key");
        let mut name = X509NameBuilder::new().expect("name builder");
        name.append_entry_by_text("CN", common_name).expect("cn");
        let name = name.build();
        let mut builder = X509Builder::new().expect("x509 builder");
        builder.set_version(2).expect("version");
        let mut serial = BigNum::new().expect("bn");
        serial
            .rand(64, MsbOption::MAYBE_ZERO, false)
            .expect("rand serial");
        builder
            .set_serial_number(&serial.to_asn1_integer().expect("serial"))
            .expect("set serial");
        builder.set_subject_name(&name).expect("subject");
        builder.set_issuer_name(&name).expect("issuer");
        builder.set_pubkey(&pkey).expect("pubkey");
        builder
            .set_not_before(&Asn1Time::days_from_now(0).expect("now"))
            .expect("not before");
        builder
            .set_not_after(&Asn1Time::days_from_now(30).expect("later"))
            .expect("not after");
        builder
            .sign(&pkey, openssl::hash::MessageDigest::sha256())
            .expect("sign");
        (builder.build(), pkey)
    }
}
