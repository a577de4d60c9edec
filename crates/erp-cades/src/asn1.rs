//! The RFC 5652 structures the engine needs, declared with `rasn`.
//!
//! Only the SignedData branch of CMS is modeled; enveloped and digested
//! data never occur in this service. Certificates and names come from
//! `rasn-pkix`.

use rasn::prelude::*;
use rasn_pkix::{AlgorithmIdentifier, Certificate, CertificateList, Name};

// ---------------------------------------------------------------------------
// Object identifiers
// ---------------------------------------------------------------------------

/// `id-data`
pub const ID_DATA: &Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 7, 1]);
/// `id-signedData`
pub const ID_SIGNED_DATA: &Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 7, 2]);
/// `id-contentType`
pub const ID_CONTENT_TYPE: &Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 9, 3]);
/// `id-messageDigest`
pub const ID_MESSAGE_DIGEST: &Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 9, 4]);
/// `id-signingTime`
pub const ID_SIGNING_TIME: &Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 9, 5]);
/// `id-countersignature`
pub const ID_COUNTER_SIGNATURE: &Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 9, 6]);
/// `id-aa-signingCertificate` (ESS, RFC 2634)
pub const ID_AA_SIGNING_CERTIFICATE: &Oid =
    Oid::const_new(&[1, 2, 840, 113549, 1, 9, 16, 2, 12]);
/// `id-aa-signingCertificateV2` (RFC 5035)
pub const ID_AA_SIGNING_CERTIFICATE_V2: &Oid =
    Oid::const_new(&[1, 2, 840, 113549, 1, 9, 16, 2, 47]);
/// The OCSP revocation-info container (`id-ri-ocsp-response`).
pub const ID_OCSP_REVOCATION_CONTAINER: &Oid = Oid::const_new(&[1, 3, 6, 1, 5, 5, 7, 16, 2]);

/// `sha1`
pub const SHA1: &Oid = Oid::const_new(&[1, 3, 14, 3, 2, 26]);
/// `sha256`
pub const SHA256: &Oid = Oid::const_new(&[2, 16, 840, 1, 101, 3, 4, 2, 1]);
/// `sha384`
pub const SHA384: &Oid = Oid::const_new(&[2, 16, 840, 1, 101, 3, 4, 2, 2]);
/// `sha512`
pub const SHA512: &Oid = Oid::const_new(&[2, 16, 840, 1, 101, 3, 4, 2, 3]);
/// `ecdsa-with-SHA256`
pub const ECDSA_WITH_SHA256: &Oid = Oid::const_new(&[1, 2, 840, 10045, 4, 3, 2]);
/// `sha256WithRSAEncryption`
pub const SHA256_WITH_RSA: &Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 1, 11]);

// ---------------------------------------------------------------------------
// CMS structures
// ---------------------------------------------------------------------------

/// Outermost CMS envelope.
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub struct ContentInfo {
    /// Content type; always `id-signedData` here.
    pub content_type: ObjectIdentifier,
    /// DER of the [`SignedData`].
    #[rasn(tag(explicit(0)))]
    pub content: Any,
}

/// RFC 5652 SignedData.
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub struct SignedData {
    /// CMS version.
    pub version: Integer,
    /// Digest algorithms used by the signers.
    pub digest_algorithms: SetOf<AlgorithmIdentifier>,
    /// The signed payload.
    pub encap_content_info: EncapsulatedContentInfo,
    /// Certificates helping verification.
    #[rasn(tag(0))]
    pub certificates: Option<SetOf<CertificateChoice>>,
    /// Revocation information, including embedded OCSP responses.
    #[rasn(tag(1))]
    pub crls: Option<SetOf<RevocationInfoChoice>>,
    /// Per-signer information.
    pub signer_infos: SetOf<SignerInfo>,
}

/// Embedded (or detached, when `content` is absent) payload.
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub struct EncapsulatedContentInfo {
    /// Payload content type.
    pub content_type: ObjectIdentifier,
    /// Payload bytes; absent for detached signatures.
    #[rasn(tag(explicit(0)))]
    pub content: Option<OctetString>,
}

/// CertificateChoices, reduced to the alternatives that occur.
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq, Eq, Hash)]
#[rasn(choice)]
pub enum CertificateChoice {
    /// A plain X.509 certificate.
    Certificate(Certificate),
    /// Anything else, kept opaque.
    #[rasn(tag(3))]
    Other(OtherCertificateFormat),
}

/// Opaque non-X.509 certificate formats.
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq, Eq, Hash)]
pub struct OtherCertificateFormat {
    /// Format identifier.
    pub other_cert_format: ObjectIdentifier,
    /// Raw value.
    pub other_cert: Any,
}

/// RevocationInfoChoice: CRL or "other" (OCSP container).
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq, Eq, Hash)]
#[rasn(choice)]
pub enum RevocationInfoChoice {
    /// A certificate revocation list.
    Crl(CertificateList),
    /// Other revocation info, identified by format OID.
    #[rasn(tag(1))]
    Other(OtherRevocationInfoFormat),
}

/// Other revocation info; the OCSP container wraps a single
/// `OCSPResponse` value.
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq, Eq, Hash)]
pub struct OtherRevocationInfoFormat {
    /// Format identifier.
    pub other_rev_info_format: ObjectIdentifier,
    /// Raw revocation info.
    pub other_rev_info: Any,
}

/// Per-signer structure.
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq, Eq, Hash)]
pub struct SignerInfo {
    /// Version (1 for issuerAndSerialNumber identification).
    pub version: Integer,
    /// Signer identification.
    pub sid: SignerIdentifier,
    /// Digest algorithm of the signature input.
    pub digest_algorithm: AlgorithmIdentifier,
    /// Signed attributes; mandatory in CAdES-BES.
    #[rasn(tag(0))]
    pub signed_attrs: Option<SetOf<Attribute>>,
    /// Signature algorithm.
    pub signature_algorithm: AlgorithmIdentifier,
    /// The signature value.
    pub signature: OctetString,
    /// Unsigned attributes, e.g. counter signatures.
    #[rasn(tag(1))]
    pub unsigned_attrs: Option<SetOf<Attribute>>,
}

/// SignerIdentifier.
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq, Eq, Hash)]
#[rasn(choice)]
pub enum SignerIdentifier {
    /// Identification by issuer and serial number.
    IssuerAndSerialNumber(IssuerAndSerialNumber),
    /// Identification by subject key identifier.
    #[rasn(tag(0))]
    SubjectKeyIdentifier(OctetString),
}

/// Issuer plus serial number.
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq, Eq, Hash)]
pub struct IssuerAndSerialNumber {
    /// Issuer distinguished name.
    pub issuer: Name,
    /// Certificate serial number.
    pub serial_number: Integer,
}

/// A (signed or unsigned) attribute.
#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq, Eq, Hash)]
pub struct Attribute {
    /// Attribute type.
    pub r#type: ObjectIdentifier,
    /// Attribute values.
    pub values: SetOf<Any>,
}

// ---------------------------------------------------------------------------
// SetOf helpers
// ---------------------------------------------------------------------------

/// Build a `SET OF` from items in order.
pub fn set_of<T: PartialEq + Eq + std::hash::Hash>(items: Vec<T>) -> SetOf<T> {
    SetOf::from_vec(items)
}

/// Borrow the items of a `SET OF`.
pub fn set_items<T: Eq + std::hash::Hash>(set: &SetOf<T>) -> Vec<&T> {
    set.to_vec()
}

/// Find the first attribute with the given type.
pub fn find_attribute<'a>(
    attributes: Option<&'a SetOf<Attribute>>,
    wanted: &Oid,
) -> Option<&'a Attribute> {
    attributes
        .map(set_items)
        .unwrap_or_default()
        .into_iter()
        .find(|attribute| *attribute.r#type == *wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_roundtrip() {
        let attribute = Attribute {
            r#type: ID_CONTENT_TYPE.into(),
            values: set_of(vec![Any::new(rasn::der::encode(
                &ObjectIdentifier::from(ID_DATA),
            )
            .expect("encode oid"))]),
        };
        let encoded = rasn::der::encode(&attribute).expect("encodes");
        let decoded: Attribute = rasn::der::decode(&encoded).expect("decodes");
        assert_eq!(decoded, attribute);
        assert!(find_attribute(
            Some(&set_of(vec![decoded])),
            ID_CONTENT_TYPE
        )
        .is_some());
    }

    #[test]
    fn signer_identifier_choice_roundtrip() {
        let sid = SignerIdentifier::SubjectKeyIdentifier(OctetString::from(
            vec![1u8, 2, 3],
        ));
        let encoded = rasn::der::encode(&sid).expect("encodes");
        let decoded: SignerIdentifier = rasn::der::decode(&encoded).expect("decodes");
        assert_eq!(decoded, sid);
    }
}
