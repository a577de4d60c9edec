//! ESS SigningCertificate attributes (RFC 2634 / RFC 5035).
//!
//! CAdES-BES binds a signature to its signer certificate by embedding a
//! digest of the certificate in a signed attribute: version 1 carries a
//! SHA-1 hash, version 2 an algorithm-agile hash defaulting to SHA-256.
//! Verification recomputes the digest of the actual signer certificate
//! under the indicated algorithm and accepts when any carried
//! CertificateID matches.

use openssl::hash::MessageDigest;
use rasn::prelude::*;
use rasn_pkix::{AlgorithmIdentifier, GeneralName, PolicyInformation};

use crate::asn1::{
    find_attribute, set_of, Attribute, ID_AA_SIGNING_CERTIFICATE, ID_AA_SIGNING_CERTIFICATE_V2,
    SHA1, SHA256, SHA384, SHA512,
};
use crate::CadesError;
use erp_x509::X509Certificate;

/// IssuerSerial of RFC 5035.
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub struct IssuerSerial {
    /// Issuer as GeneralNames.
    pub issuer: SequenceOf<GeneralName>,
    /// Certificate serial number.
    pub serial_number: Integer,
}

/// ESSCertID (version 1, implicit SHA-1).
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub struct EssCertId {
    /// SHA-1 digest of the certificate.
    pub cert_hash: OctetString,
    /// Issuer and serial of the certificate.
    pub issuer_serial: Option<IssuerSerial>,
}

/// SigningCertificate (version 1).
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub struct SigningCertificate {
    /// Certificate identifiers; the first names the signer certificate.
    pub certs: SequenceOf<EssCertId>,
    /// Signature policies; unused here.
    pub policies: Option<SequenceOf<PolicyInformation>>,
}

/// ESSCertIDv2; `hash_algorithm` omitted means SHA-256.
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub struct EssCertIdV2 {
    /// Digest algorithm; DEFAULT sha256 when absent.
    pub hash_algorithm: Option<AlgorithmIdentifier>,
    /// Digest of the certificate.
    pub cert_hash: OctetString,
    /// Issuer and serial of the certificate.
    pub issuer_serial: Option<IssuerSerial>,
}

/// SigningCertificateV2.
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub struct SigningCertificateV2 {
    /// Certificate identifiers; the first names the signer certificate.
    pub certs: SequenceOf<EssCertIdV2>,
    /// Signature policies; unused here.
    pub policies: Option<SequenceOf<PolicyInformation>>,
}

fn digest_for(oid: &Oid) -> Option<MessageDigest> {
    if oid == SHA1 {
        Some(MessageDigest::sha1())
    } else if oid == SHA256 {
        Some(MessageDigest::sha256())
    } else if oid == SHA384 {
        Some(MessageDigest::sha384())
    } else if oid == SHA512 {
        Some(MessageDigest::sha512())
    } else {
        None
    }
}

fn issuer_serial(certificate: &X509Certificate) -> IssuerSerial {
    IssuerSerial {
        issuer: vec![GeneralName::DirectoryName(certificate.issuer().clone())],
        serial_number: certificate.serial_number().clone(),
    }
}

/// Build the SigningCertificate attribute for a signer: SHA-1 selects
/// the version 1 attribute, anything else version 2. Per DER DEFAULT
/// rules the v2 hash algorithm stays absent for SHA-256.
pub fn build_signing_certificate_attribute(
    certificate: &X509Certificate,
    digest_oid: &Oid,
) -> Result<Attribute, CadesError> {
    if digest_oid == SHA1 {
        let cert_id = EssCertId {
            cert_hash: OctetString::from(certificate.digest(MessageDigest::sha1())?),
            issuer_serial: Some(issuer_serial(certificate)),
        };
        let signing_certificate = SigningCertificate {
            certs: vec![cert_id],
            policies: None,
        };
        let encoded = rasn::der::encode(&signing_certificate)
            .map_err(|e| CadesError::Structure(e.to_string()))?;
        return Ok(Attribute {
            r#type: ID_AA_SIGNING_CERTIFICATE.into(),
            values: set_of(vec![Any::new(encoded)]),
        });
    }
    let digest = digest_for(digest_oid)
        .ok_or_else(|| CadesError::Structure(format!("unsupported digest: {digest_oid:?}")))?;
    let cert_id = EssCertIdV2 {
        hash_algorithm: if digest_oid == SHA256 {
            None
        } else {
            Some(AlgorithmIdentifier {
                algorithm: digest_oid.to_owned(),
                parameters: None,
            })
        },
        cert_hash: OctetString::from(certificate.digest(digest)?),
        issuer_serial: Some(issuer_serial(certificate)),
    };
    let signing_certificate = SigningCertificateV2 {
        certs: vec![cert_id],
        policies: None,
    };
    let encoded = rasn::der::encode(&signing_certificate)
        .map_err(|e| CadesError::Structure(e.to_string()))?;
    Ok(Attribute {
        r#type: ID_AA_SIGNING_CERTIFICATE_V2.into(),
        values: set_of(vec![Any::new(encoded)]),
    })
}

/// Verify the ESS attribute of a signer against the actual signer
/// certificate. Passes when any carried CertificateID hash matches a
/// freshly computed digest of the certificate.
pub fn verify_signing_certificate(
    signed_attrs: Option<&SetOf<Attribute>>,
    certificate: &X509Certificate,
) -> Result<(), CadesError> {
    let v1 = find_attribute(signed_attrs, ID_AA_SIGNING_CERTIFICATE);
    let v2 = find_attribute(signed_attrs, ID_AA_SIGNING_CERTIFICATE_V2);
    if v1.is_none() && v2.is_none() {
        return Err(CadesError::MissingAttribute(
            "No certificate in signed info.".to_string(),
        ));
    }
    if let Some(attribute) = v1 {
        let value = single_value(attribute)?;
        let signing_certificate: SigningCertificate = rasn::der::decode(value.as_bytes())
            .map_err(|e| CadesError::Structure(e.to_string()))?;
        let expected = certificate.digest(MessageDigest::sha1())?;
        verify_hashes(
            signing_certificate
                .certs
                .iter()
                .map(|id| (SHA1, id.cert_hash.as_ref())),
            certificate,
            &expected,
        )?;
    }
    if let Some(attribute) = v2 {
        let value = single_value(attribute)?;
        let signing_certificate: SigningCertificateV2 = rasn::der::decode(value.as_bytes())
            .map_err(|e| CadesError::Structure(e.to_string()))?;
        let ids: Vec<(&Oid, &[u8])> = signing_certificate
            .certs
            .iter()
            .map(|id| {
                let oid: &Oid = id
                    .hash_algorithm
                    .as_ref()
                    .map(|alg| &*alg.algorithm)
                    .unwrap_or(SHA256);
                (oid, id.cert_hash.as_ref())
            })
            .collect();
        verify_hashes(ids.into_iter(), certificate, &[])?;
    }
    Ok(())
}

/// Check that any `(algorithm, hash)` pair matches the certificate.
/// `precomputed` short-circuits the SHA-1 case.
fn verify_hashes<'a>(
    ids: impl Iterator<Item = (&'a Oid, &'a [u8])>,
    certificate: &X509Certificate,
    precomputed_sha1: &[u8],
) -> Result<(), CadesError> {
    let mut any = false;
    for (oid, carried) in ids {
        any = true;
        let computed = if oid == SHA1 && !precomputed_sha1.is_empty() {
            precomputed_sha1.to_vec()
        } else {
            let Some(digest) = digest_for(oid) else {
                continue;
            };
            certificate.digest(digest)?
        };
        if computed == carried {
            return Ok(());
        }
    }
    if !any {
        return Err(CadesError::Structure(
            "At least one certificate is expected in the signed data.".to_string(),
        ));
    }
    Err(CadesError::CertHashMismatch)
}

fn single_value(attribute: &Attribute) -> Result<&Any, CadesError> {
    crate::asn1::set_items(&attribute.values)
        .into_iter()
        .next()
        .ok_or_else(|| CadesError::Structure("empty attribute value set".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asn1::set_items;

    fn test_certificate() -> X509Certificate {
        let (cert, _key) = crate::test_support::self_signed("ess-test");
        X509Certificate::from_der(&cert.to_der().expect("der")).expect("parse")
    }

    #[test]
    fn v2_attribute_roundtrip_and_verify() {
        let certificate = test_certificate();
        let attribute =
            build_signing_certificate_attribute(&certificate, SHA256).expect("builds");
        assert_eq!(*attribute.r#type, *ID_AA_SIGNING_CERTIFICATE_V2);
        let attrs = set_of(vec![attribute]);
        verify_signing_certificate(Some(&attrs), &certificate).expect("verifies");
    }

    #[test]
    fn v1_attribute_uses_sha1() {
        let certificate = test_certificate();
        let attribute = build_signing_certificate_attribute(&certificate, SHA1).expect("builds");
        assert_eq!(*attribute.r#type, *ID_AA_SIGNING_CERTIFICATE);
        let attrs = set_of(vec![attribute]);
        verify_signing_certificate(Some(&attrs), &certificate).expect("verifies");
    }

    #[test]
    fn missing_attribute_is_reported() {
        let certificate = test_certificate();
        let err = verify_signing_certificate(None, &certificate).unwrap_err();
        assert!(matches!(err, CadesError::MissingAttribute(message)
            if message == "No certificate in signed info."));
    }

    #[test]
    fn hash_mismatch_is_detected() {
        let certificate = test_certificate();
        let other = {
            let (cert, _key) = crate::test_support::self_signed("ess-other");
            X509Certificate::from_der(&cert.to_der().expect("der")).expect("parse")
        };
        // attribute built for `other`, verified against `certificate`
        let attribute = build_signing_certificate_attribute(&other, SHA256).expect("builds");
        let attrs = set_of(vec![attribute]);
        let err = verify_signing_certificate(Some(&attrs), &certificate).unwrap_err();
        assert!(matches!(err, CadesError::CertHashMismatch));
    }

    #[test]
    fn v2_default_algorithm_is_omitted() {
        let certificate = test_certificate();
        let attribute =
            build_signing_certificate_attribute(&certificate, SHA256).expect("builds");
        let value = set_items(&attribute.values)[0];
        let decoded: SigningCertificateV2 =
            rasn::der::decode(value.as_bytes()).expect("decodes");
        assert!(decoded.certs[0].hash_algorithm.is_none());
        let explicit =
            build_signing_certificate_attribute(&certificate, SHA384).expect("builds");
        let value = set_items(&explicit.values)[0];
        let decoded: SigningCertificateV2 =
            rasn::der::decode(value.as_bytes()).expect("decodes");
        assert!(decoded.certs[0].hash_algorithm.is_some());
    }
}
