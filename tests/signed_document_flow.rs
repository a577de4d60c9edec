//! End-to-end flow over the three engines: authorize the sender via the
//! access token, verify the CAdES-BES container, validate the extracted
//! FHIR document, and counter-sign the receipt.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use erp_core::cades::{CadesBesSignature, VerificationMode};
use erp_core::config::FixedClock;
use erp_core::fhir::model::Element;
use erp_core::fhir::repository::{load, FhirStructureRepository, ViewSpec};
use erp_core::fhir::validator::{FhirPathValidator, Severity, ValidatorOptions};
use erp_core::jwt::{Jwt, JwtConfig, ACR_CONTENT};
use erp_core::x509::{AcceptAllTrustStore, X509Certificate};
use openssl::ec::{EcGroup, EcKey};
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private, Public};
use serde_json::json;

const AUD: &str = "https://erp.zentral.erp.ti-dienste.de/";

fn brainpool_key() -> (PKey<Private>, PKey<Public>) {
    let group = EcGroup::from_curve_name(Nid::BRAINPOOL_P256R1).expect("group");
    let ec = EcKey::generate(&group).expect("generate");
    let private = PKey::from_ec_key(ec).expect("wrap");
    let spki = private.public_key_to_der().expect("spki");
    let public = PKey::public_key_from_der(&spki).expect("public");
    (private, public)
}

fn self_signed(common_name: &str) -> (X509Certificate, PKey<Private>) {
    use openssl::asn1::Asn1Time;
    use openssl::bn::{BigNum, MsbOption};
    use openssl::x509::{X509Builder, X509NameBuilder};

    let (private, _public) = brainpool_key();
    let mut name = X509NameBuilder::new().expect("name");
    name.append_entry_by_text("CN", common_name).expect("cn");
    let name = name.build();
    let mut builder = X509Builder::new().expect("builder");
    builder.set_version(2).expect("version");
    let mut serial = BigNum::new().expect("bn");
    serial.rand(64, MsbOption::MAYBE_ZERO, false).expect("serial");
    builder
        .set_serial_number(&serial.to_asn1_integer().expect("asn1"))
        .expect("serial");
    builder.set_subject_name(&name).expect("subject");
    builder.set_issuer_name(&name).expect("issuer");
    builder.set_pubkey(&private).expect("pubkey");
    builder
        .set_not_before(&Asn1Time::days_from_now(0).expect("now"))
        .expect("nb");
    builder
        .set_not_after(&Asn1Time::days_from_now(30).expect("later"))
        .expect("na");
    builder.sign(&private, MessageDigest::sha256()).expect("sign");
    let certificate =
        X509Certificate::from_der(&builder.build().to_der().expect("der")).expect("parse");
    (certificate, private)
}

fn token(private: &PKey<Private>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"BP256R1","typ":"JWT"}"#);
    let claims = json!({
        "iat": 1_700_000_000i64,
        "exp": 1_700_003_600i64,
        "iss": "https://idp.example.de",
        "sub": "subject",
        "acr": ACR_CONTENT,
        "aud": AUD,
        "jti": "flow-token",
        "idNummer": "1-2-ARZT",
        "professionOID": "1.2.276.0.76.4.30"
    });
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).expect("claims"));
    let signing_input = format!("{header}.{payload}");
    let digest =
        openssl::hash::hash(MessageDigest::sha256(), signing_input.as_bytes()).expect("hash");
    let signature = EcdsaSig::sign(&digest, &private.ec_key().expect("ec")).expect("sign");
    let mut raw = vec![0u8; 64];
    let r = signature.r().to_vec();
    let s = signature.s().to_vec();
    raw[32 - r.len()..32].copy_from_slice(&r);
    raw[64 - s.len()..].copy_from_slice(&s);
    format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(raw))
}

fn prescription_repo() -> FhirStructureRepository {
    load(
        vec![json!({
            "resourceType": "StructureDefinition",
            "url": "http://example.org/fhir/StructureDefinition/Prescription",
            "version": "1.0",
            "name": "Prescription",
            "type": "Prescription",
            "kind": "resource",
            "snapshot": {"element": [
                {"path": "Prescription", "min": 0, "max": "*"},
                {"path": "Prescription.id", "min": 1, "max": "1", "type": [{"code": "string"}]},
                {"path": "Prescription.medication", "min": 1, "max": "1",
                 "type": [{"code": "string"}]}
            ]}
        })],
        Vec::<ViewSpec>::new(),
    )
    .expect("repository loads")
}

#[test]
fn authorize_verify_validate_and_countersign() {
    // 1. the sender's access token is verified first
    let (idp_private, idp_public) = brainpool_key();
    let jwt = Jwt::parse(&token(&idp_private)).expect("token parses");
    let config = JwtConfig {
        aud_uri: AUD.to_string(),
        iat_tolerance_seconds: 2,
    };
    let clock = FixedClock::at_unix(1_700_000_100);
    jwt.verify(&idp_public, &config, &clock).expect("token verifies");

    // 2. the CAdES-BES container yields the signed document
    let (doctor_cert, doctor_key) = self_signed("doctor");
    let document = json!({
        "resourceType": "Prescription",
        "id": "rx-1",
        "medication": "Ibuprofen 400mg"
    });
    let payload = serde_json::to_vec(&document).expect("payload");
    let signed = CadesBesSignature::sign(&doctor_cert, &doctor_key, &payload, None, None)
        .expect("signs");
    let transported = signed.to_base64().expect("serializes");

    let store = AcceptAllTrustStore::default();
    let verified = CadesBesSignature::from_base64(&transported, VerificationMode::TrustStore(&store))
        .expect("container verifies");
    assert_eq!(verified.payload(), payload.as_slice());

    // 3. the extracted document is validated against its profile
    let repo = prescription_repo();
    let extracted: serde_json::Value =
        serde_json::from_slice(verified.payload()).expect("payload parses");
    let element = Element::resource_root(&repo, &extracted).expect("root");
    let results = FhirPathValidator::validate(&element, "Prescription", ValidatorOptions::default());
    assert!(
        results.highest_severity() < Severity::Error,
        "findings: {}",
        results.summary(Severity::Debug)
    );

    // 4. the receipt is counter-signed by the service
    let (service_cert, service_key) = self_signed("fachdienst");
    let mut receipt =
        CadesBesSignature::sign(&doctor_cert, &doctor_key, b"receipt", None, None)
            .expect("receipt signs");
    receipt
        .counter_sign(&service_cert, &service_key)
        .expect("counter signs");
    let receipt_encoded = receipt.to_base64().expect("serializes");
    let receipt_verified =
        CadesBesSignature::from_base64(&receipt_encoded, VerificationMode::NoVerify)
            .expect("parses");
    receipt_verified
        .verify_counter_signature(&service_cert)
        .expect("counter signature verifies");
}

#[test]
fn invalid_document_is_rejected_after_signature_verification() {
    let (doctor_cert, doctor_key) = self_signed("doctor");
    // medication is mandatory and missing
    let document = json!({"resourceType": "Prescription", "id": "rx-2"});
    let payload = serde_json::to_vec(&document).expect("payload");
    let signed = CadesBesSignature::sign(&doctor_cert, &doctor_key, &payload, None, None)
        .expect("signs");
    let transported = signed.to_base64().expect("serializes");
    let verified = CadesBesSignature::from_base64(&transported, VerificationMode::NoVerify)
        .expect("container verifies");

    let repo = prescription_repo();
    let extracted: serde_json::Value =
        serde_json::from_slice(verified.payload()).expect("payload parses");
    let element = Element::resource_root(&repo, &extracted).expect("root");
    let results = FhirPathValidator::validate(&element, "Prescription", ValidatorOptions::default());
    assert_eq!(results.highest_severity(), Severity::Error);
    assert!(results
        .summary(Severity::Error)
        .contains("missing mandatory element"));
}
