//! Access-token verification.
//!
//! Tokens arrive in RFC 7519 compact serialization and are signed with
//! ECDSA over Brainpool P-256 (`alg: "BP256R1"`), the signature being
//! the concatenation of two 32-byte big-endian integers. Verification is
//! fail-fast: format, algorithm, claim presence and types by role,
//! authentication strength, audience, temporal window, and finally the
//! signature itself.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use erp_config::Clock;
use erp_error::{ErpError, ErrorCode};
use erp_model::profession_oid::OID_VERSICHERTER;
use openssl::bn::BigNum;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKeyRef, Public};
use serde_json::Value as JsonValue;

/// The only authentication strength the service accepts.
pub const ACR_CONTENT: &str = "gematik-ehealth-loa-high";

/// Claim names of the access token.
pub mod claims {
    /// Issued-at.
    pub const IAT: &str = "iat";
    /// Expiry.
    pub const EXP: &str = "exp";
    /// Not-before.
    pub const NBF: &str = "nbf";
    /// Issuer.
    pub const ISS: &str = "iss";
    /// Subject.
    pub const SUB: &str = "sub";
    /// Authentication strength.
    pub const ACR: &str = "acr";
    /// Audience.
    pub const AUD: &str = "aud";
    /// Token id.
    pub const JTI: &str = "jti";
    /// Insured-person or institution identifier.
    pub const ID_NUMMER: &str = "idNummer";
    /// Professional role OID.
    pub const PROFESSION_OID: &str = "professionOID";
    /// Organization display name.
    pub const ORGANIZATION_NAME: &str = "organizationName";
    /// Combined display name of an insured person.
    pub const DISPLAY_NAME: &str = "display_name";
    /// Given name of an insured person.
    pub const GIVEN_NAME: &str = "given_name";
    /// Family name of an insured person.
    pub const FAMILY_NAME: &str = "family_name";
}

/// Verification failures, in the order the pipeline can produce them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JwtError {
    /// The token violates the compact serialization or claim typing.
    #[error("{0}")]
    Format(String),
    /// The algorithm or signature is invalid.
    #[error("{0}")]
    Signature(String),
    /// The token is outside its validity window.
    #[error("{0}")]
    Expired(String),
    /// A required claim is missing.
    #[error("{0}")]
    MissingClaim(String),
    /// The audience does not name this service.
    #[error("{0}")]
    BadAudience(String),
}

impl JwtError {
    /// Stable taxonomy code; all variants refuse authentication (401).
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Format(_) => ErrorCode::JwtFormat,
            Self::Signature(_) => ErrorCode::JwtSignature,
            Self::Expired(_) => ErrorCode::JwtExpired,
            Self::MissingClaim(_) => ErrorCode::JwtMissingClaim,
            Self::BadAudience(_) => ErrorCode::JwtBadAudience,
        }
    }

    /// Translate into the boundary error type.
    pub fn into_erp_error(self) -> ErpError {
        ErpError::new(self.code(), self.to_string())
    }
}

/// Configuration the verifier consumes.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Registered service URI expected in `aud`.
    pub aud_uri: String,
    /// Clock-skew tolerance for `iat`, in seconds.
    pub iat_tolerance_seconds: u64,
}

impl JwtConfig {
    /// Extract the JWT keys from the core configuration.
    pub fn from_core(config: &erp_config::CoreConfig) -> Self {
        Self {
            aud_uri: config.jwt_aud_uri.clone(),
            iat_tolerance_seconds: config.jwt_iat_tolerance_seconds,
        }
    }
}

/// A parsed access token.
#[derive(Debug, Clone)]
pub struct Jwt {
    header: String,
    payload: String,
    signature: String,
    claims: JsonValue,
}

impl Jwt {
    /// Pre-parse the compact serialization: exactly two dots, claims
    /// decode to a JSON object.
    pub fn parse(token: &str) -> Result<Self, JwtError> {
        if token.chars().filter(|c| *c == '.').count() != 2 {
            return Err(JwtError::Format(
                "Pre-verification failed - expecting JWS Compact Serialization.".to_string(),
            ));
        }
        let mut parts = token.split('.');
        let header = parts.next().unwrap_or_default().to_string();
        let payload = parts.next().unwrap_or_default().to_string();
        let signature = parts.next().unwrap_or_default().to_string();
        let claims_raw = URL_SAFE_NO_PAD.decode(payload.as_bytes()).map_err(|_| {
            JwtError::Format(
                "Pre-verification failed - erroneous claims document.".to_string(),
            )
        })?;
        let claims: JsonValue = serde_json::from_slice(&claims_raw).map_err(|_| {
            JwtError::Format(
                "Pre-verification failed - erroneous claims document.".to_string(),
            )
        })?;
        Ok(Self {
            header,
            payload,
            signature,
            claims,
        })
    }

    /// The compact serialization.
    pub fn serialize(&self) -> String {
        format!("{}.{}.{}", self.header, self.payload, self.signature)
    }

    /// Full verification pipeline.
    pub fn verify(
        &self,
        public_key: &PKeyRef<Public>,
        config: &JwtConfig,
        clock: &dyn Clock,
    ) -> Result<(), JwtError> {
        self.check_format()?;
        self.check_required_claims()?;
        self.check_aud_claim(config)?;
        self.check_if_expired(config, clock)?;
        self.verify_signature(public_key)?;
        tracing::debug!(
            jti = self.string_for_claim(claims::JTI).unwrap_or_default(),
            "access token verified"
        );
        Ok(())
    }

    // -- claim access ----------------------------------------------------

    /// A string claim, when present with the right type.
    pub fn string_for_claim(&self, claim: &str) -> Option<String> {
        self.claims
            .get(claim)
            .and_then(JsonValue::as_str)
            .map(str::to_string)
    }

    /// An integer claim, when present with the right type.
    pub fn int_for_claim(&self, claim: &str) -> Option<i64> {
        self.claims.get(claim).and_then(JsonValue::as_i64)
    }

    /// Display name derived from the role: insured persons prefer
    /// `display_name`, then given plus family name; everyone else uses
    /// the organization name.
    pub fn display_name(&self) -> Option<String> {
        let profession = self.string_for_claim(claims::PROFESSION_OID)?;
        if profession == OID_VERSICHERTER {
            if let Some(display) = self.string_for_claim(claims::DISPLAY_NAME) {
                return Some(display);
            }
            let given = self.string_for_claim(claims::GIVEN_NAME)?;
            let family = self.string_for_claim(claims::FAMILY_NAME)?;
            if given.is_empty() {
                return Some(family);
            }
            return Some(format!("{given} {family}"));
        }
        self.string_for_claim(claims::ORGANIZATION_NAME)
    }

    // -- pipeline steps --------------------------------------------------

    fn check_format(&self) -> Result<(), JwtError> {
        if self.header.is_empty() {
            return Err(JwtError::Format(
                "Pre-verification failed - JWT violates RFC 7519.".to_string(),
            ));
        }
        let header_raw = URL_SAFE_NO_PAD
            .decode(self.header.as_bytes())
            .map_err(|_| {
                JwtError::Format("Pre-verification failed - JWT violates RFC 7519.".to_string())
            })?;
        let header: JsonValue = serde_json::from_slice(&header_raw).map_err(|_| {
            JwtError::Format("Pre-verification failed - JWT violates RFC 7519.".to_string())
        })?;
        let Some(alg) = header.get("alg").and_then(JsonValue::as_str) else {
            return Err(JwtError::Format(
                "Pre-verification failed - Missing signature algorithm name.".to_string(),
            ));
        };
        if alg != "BP256R1" {
            return Err(JwtError::Signature(
                "Pre-verification failed - unsupported signature algorithm requested."
                    .to_string(),
            ));
        }
        if self.signature.is_empty() {
            return Err(JwtError::Signature(
                "Pre-verification failed - missing signature.".to_string(),
            ));
        }
        Ok(())
    }

    fn require_claims(&self, required: &[&str]) -> Result<(), JwtError> {
        for claim in required {
            if self.claims.get(*claim).is_none() {
                return Err(JwtError::MissingClaim(
                    "Pre-verification failed - Missing required claims.".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn check_required_claims(&self) -> Result<(), JwtError> {
        if !self.claims.is_object() {
            return Err(JwtError::Format(
                "Pre-verification failed - Problematic claims document.".to_string(),
            ));
        }
        self.require_claims(&[claims::PROFESSION_OID])?;
        let profession = self
            .claims
            .get(claims::PROFESSION_OID)
            .and_then(JsonValue::as_str)
            .ok_or_else(|| {
                JwtError::Format(
                    "Pre-verification failed - invalid data type for professionOID claim."
                        .to_string(),
                )
            })?;

        let typed_string = |claim: &str| self.claims.get(claim).and_then(JsonValue::as_str);
        let typed_int = |claim: &str| self.claims.get(claim).and_then(JsonValue::as_i64);

        if profession == OID_VERSICHERTER {
            self.require_claims(&[
                claims::IAT,
                claims::EXP,
                claims::ISS,
                claims::SUB,
                claims::ACR,
                claims::AUD,
                claims::ORGANIZATION_NAME,
                claims::ID_NUMMER,
                claims::JTI,
            ])?;
            if let Some(display) = self.claims.get(claims::DISPLAY_NAME) {
                if !display.is_string() {
                    return Err(JwtError::Format(
                        "Pre-verification failed - invalid data type for display_name"
                            .to_string(),
                    ));
                }
            } else {
                self.require_claims(&[claims::GIVEN_NAME, claims::FAMILY_NAME])?;
                if typed_string(claims::GIVEN_NAME).is_none()
                    || typed_string(claims::FAMILY_NAME).is_none()
                {
                    return Err(JwtError::Format(
                        "Pre-verification failed - invalid data type for given/family name"
                            .to_string(),
                    ));
                }
            }
            let types_ok = typed_int(claims::IAT).is_some()
                && typed_int(claims::EXP).is_some()
                && typed_string(claims::ISS).is_some()
                && typed_string(claims::SUB).is_some()
                && typed_string(claims::ACR).is_some()
                && typed_string(claims::AUD).is_some()
                && typed_string(claims::ORGANIZATION_NAME).is_some()
                && typed_string(claims::ID_NUMMER).is_some()
                && typed_string(claims::JTI).is_some();
            if !types_ok {
                return Err(JwtError::Format(
                    "Pre-verification failed - invalid data type for claims.".to_string(),
                ));
            }
        } else {
            self.require_claims(&[
                claims::IAT,
                claims::EXP,
                claims::ISS,
                claims::SUB,
                claims::ACR,
                claims::AUD,
                claims::ID_NUMMER,
                claims::JTI,
            ])?;
            let types_ok = typed_int(claims::IAT).is_some()
                && typed_int(claims::EXP).is_some()
                && typed_string(claims::ISS).is_some()
                && typed_string(claims::SUB).is_some()
                && typed_string(claims::ACR).is_some()
                && typed_string(claims::AUD).is_some()
                && typed_string(claims::ID_NUMMER).is_some()
                && typed_string(claims::JTI).is_some();
            if !types_ok {
                return Err(JwtError::Format(
                    "Pre-verification failed - invalid data type for claims.".to_string(),
                ));
            }
        }

        let acr = typed_string(claims::ACR).unwrap_or_default();
        if acr != ACR_CONTENT {
            return Err(JwtError::Format(
                "The provided acr claim is not supported.".to_string(),
            ));
        }
        Ok(())
    }

    fn check_aud_claim(&self, config: &JwtConfig) -> Result<(), JwtError> {
        let aud = self.string_for_claim(claims::AUD).unwrap_or_default();
        if aud != config.aud_uri {
            return Err(JwtError::BadAudience(format!(
                "The provided aud claim does not match. {aud}"
            )));
        }
        Ok(())
    }

    /// Temporal window:
    ///
    /// ```text
    ///   ----+--------------+------+---------+--------+----->
    ///     [iat            nbf*   now     iat+tol)  exp)   t
    /// ```
    ///
    /// Missing `iat`/`exp` default to 0, which counts as expired.
    fn check_if_expired(&self, config: &JwtConfig, clock: &dyn Clock) -> Result<(), JwtError> {
        let now = clock.now_utc().timestamp();
        let iat = self.int_for_claim(claims::IAT).unwrap_or(0);
        let exp = self.int_for_claim(claims::EXP).unwrap_or(0);
        let nbf = self.int_for_claim(claims::NBF).unwrap_or(0);
        if now > exp {
            return Err(JwtError::Expired(format!(
                "Verification failed - Token expired now={now} exp={exp}"
            )));
        }
        if iat > now + config.iat_tolerance_seconds as i64 {
            return Err(JwtError::Expired(
                "Verification failed - Token expired (issued for a later time).".to_string(),
            ));
        }
        if now < nbf {
            return Err(JwtError::Expired(
                "Verification failed - Token nbf violated.".to_string(),
            ));
        }
        Ok(())
    }

    fn verify_signature(&self, public_key: &PKeyRef<Public>) -> Result<(), JwtError> {
        let internal = |message: &str| JwtError::Signature(message.to_string());
        if public_key.id() != openssl::pkey::Id::EC {
            return Err(internal("Wrong pubkey information"));
        }
        if public_key.bits() != 256 {
            return Err(internal("Wrong pubkey bit length"));
        }
        let raw = URL_SAFE_NO_PAD
            .decode(self.signature.as_bytes())
            .map_err(|_| internal("Verification failed - invalid binary signature."))?;
        if raw.len() != 64 {
            return Err(internal("Verification failed - invalid binary signature."));
        }
        let r = BigNum::from_slice(&raw[..32])
            .map_err(|_| internal("Verification failed - invalid binary signature."))?;
        let s = BigNum::from_slice(&raw[32..])
            .map_err(|_| internal("Verification failed - invalid binary signature."))?;
        let signature = EcdsaSig::from_private_components(r, s)
            .map_err(|_| internal("Verification failed - invalid binary signature."))?;
        let der = signature
            .to_der()
            .map_err(|_| internal("Verification failed - invalid binary signature."))?;
        let mut verifier =
            openssl::sign::Verifier::new(MessageDigest::sha256(), public_key)
                .map_err(|_| internal("Can't create digest structure"))?;
        let signing_input = format!("{}.{}", self.header, self.payload);
        verifier
            .update(signing_input.as_bytes())
            .map_err(|_| internal("Can't update digest structure"))?;
        let valid = verifier.verify(&der).unwrap_or(false);
        if !valid {
            return Err(internal(
                "Verification failed - invalid signature or payload.",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erp_config::FixedClock;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::nid::Nid;
    use openssl::pkey::{PKey, Private};
    use serde_json::json;

    const AUD: &str = "https://erp.zentral.erp.ti-dienste.de/";

    fn key_pair() -> (PKey<Private>, PKey<Public>) {
        let group = EcGroup::from_curve_name(Nid::BRAINPOOL_P256R1).expect("group");
        let ec = EcKey::generate(&group).expect("generate");
        let private = PKey::from_ec_key(ec).expect("wrap");
        let spki = private.public_key_to_der().expect("spki");
        let public = PKey::public_key_from_der(&spki).expect("public");
        (private, public)
    }

    fn config() -> JwtConfig {
        JwtConfig {
            aud_uri: AUD.to_string(),
            iat_tolerance_seconds: 2,
        }
    }

    fn insured_claims() -> JsonValue {
        json!({
            "iat": 1_700_000_000i64,
            "exp": 1_700_003_600i64,
            "iss": "https://idp.example.de",
            "sub": "subject",
            "acr": ACR_CONTENT,
            "aud": AUD,
            "jti": "token-1",
            "idNummer": "X123456782",
            "professionOID": "1.2.276.0.76.4.49",
            "organizationName": "AOK",
            "given_name": "Anna",
            "family_name": "Fuchs"
        })
    }

    fn token_for(claims: &JsonValue, key: &PKey<Private>) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"BP256R1","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).expect("claims"));
        let signing_input = format!("{header}.{payload}");
        let digest =
            openssl::hash::hash(MessageDigest::sha256(), signing_input.as_bytes()).expect("hash");
        let ec = key.ec_key().expect("ec key");
        let signature = EcdsaSig::sign(&digest, &ec).expect("sign");
        let mut raw = vec![0u8; 64];
        let r = signature.r().to_vec();
        let s = signature.s().to_vec();
        raw[32 - r.len()..32].copy_from_slice(&r);
        raw[64 - s.len()..].copy_from_slice(&s);
        format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(raw))
    }

    #[test]
    fn valid_insured_token_verifies() {
        let (private, public) = key_pair();
        let token = token_for(&insured_claims(), &private);
        let jwt = Jwt::parse(&token).expect("parses");
        let clock = FixedClock::at_unix(1_700_000_100);
        jwt.verify(&public, &config(), &clock).expect("verifies");
        assert_eq!(jwt.display_name().as_deref(), Some("Anna Fuchs"));
    }

    #[test]
    fn display_name_prefers_display_claim_and_orgs_use_organization() {
        let (private, _public) = key_pair();
        let mut claims = insured_claims();
        claims["display_name"] = json!("A. Fuchs");
        let jwt = Jwt::parse(&token_for(&claims, &private)).expect("parses");
        assert_eq!(jwt.display_name().as_deref(), Some("A. Fuchs"));

        let mut org = insured_claims();
        org["professionOID"] = json!("1.2.276.0.76.4.54");
        let jwt = Jwt::parse(&token_for(&org, &private)).expect("parses");
        assert_eq!(jwt.display_name().as_deref(), Some("AOK"));
    }

    #[test]
    fn expired_token_reports_now_and_exp() {
        let (private, public) = key_pair();
        let mut claims = insured_claims();
        claims["exp"] = json!(1_700_000_000i64);
        let jwt = Jwt::parse(&token_for(&claims, &private)).expect("parses");
        let clock = FixedClock::at_unix(1_700_000_100);
        let err = jwt.verify(&public, &config(), &clock).unwrap_err();
        let JwtError::Expired(message) = err else {
            panic!("expected Expired, got {err:?}");
        };
        assert!(message.contains("now=1700000100 exp=1700000000"), "{message}");
    }

    #[test]
    fn iat_tolerance_boundary() {
        let (private, public) = key_pair();
        let now = 1_700_000_000i64;
        let clock = FixedClock::at_unix(now);

        let mut at_tolerance = insured_claims();
        at_tolerance["iat"] = json!(now + 2);
        at_tolerance["exp"] = json!(now + 3600);
        let jwt = Jwt::parse(&token_for(&at_tolerance, &private)).expect("parses");
        jwt.verify(&public, &config(), &clock).expect("iat = now + 2s passes");

        let mut beyond = insured_claims();
        beyond["iat"] = json!(now + 3);
        beyond["exp"] = json!(now + 3600);
        let jwt = Jwt::parse(&token_for(&beyond, &private)).expect("parses");
        let err = jwt.verify(&public, &config(), &clock).unwrap_err();
        assert!(matches!(err, JwtError::Expired(_)));
    }

    #[test]
    fn nbf_is_honored() {
        let (private, public) = key_pair();
        let mut claims = insured_claims();
        claims["nbf"] = json!(1_700_000_200i64);
        let jwt = Jwt::parse(&token_for(&claims, &private)).expect("parses");
        let clock = FixedClock::at_unix(1_700_000_100);
        let err = jwt.verify(&public, &config(), &clock).unwrap_err();
        assert!(matches!(err, JwtError::Expired(message) if message.contains("nbf")));
    }

    #[test]
    fn missing_claims_are_rejected() {
        let (private, public) = key_pair();
        // exp missing entirely: the claim check rejects before any
        // temporal logic runs
        let claims = json!({"professionOID": "1.2.276.0.76.4.50"});
        let jwt = Jwt::parse(&token_for(&claims, &private)).expect("parses");
        let clock = FixedClock::at_unix(1_700_000_000);
        let err = jwt.verify(&public, &config(), &clock).unwrap_err();
        assert!(matches!(err, JwtError::MissingClaim(_)));
    }

    #[test]
    fn wrong_algorithm_is_a_signature_error() {
        let (private, public) = key_pair();
        let token = token_for(&insured_claims(), &private);
        let parts: Vec<&str> = token.split('.').collect();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"ES256","typ":"JWT"}"#);
        let forged = format!("{header}.{}.{}", parts[1], parts[2]);
        let jwt = Jwt::parse(&forged).expect("parses");
        let clock = FixedClock::at_unix(1_700_000_100);
        let err = jwt.verify(&public, &config(), &clock).unwrap_err();
        assert!(matches!(err, JwtError::Signature(message)
            if message.contains("unsupported signature algorithm")));
    }

    #[test]
    fn wrong_dot_count_is_a_format_error() {
        assert!(matches!(Jwt::parse("a.b"), Err(JwtError::Format(_))));
        assert!(matches!(Jwt::parse("a.b.c.d"), Err(JwtError::Format(_))));
    }

    #[test]
    fn tampered_payload_fails_signature_check() {
        let (private, public) = key_pair();
        let token = token_for(&insured_claims(), &private);
        let parts: Vec<&str> = token.split('.').collect();
        let mut claims = insured_claims();
        claims["idNummer"] = json!("X000000000");
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).expect("claims"));
        let forged = format!("{}.{payload}.{}", parts[0], parts[2]);
        let jwt = Jwt::parse(&forged).expect("parses");
        let clock = FixedClock::at_unix(1_700_000_100);
        let err = jwt.verify(&public, &config(), &clock).unwrap_err();
        assert!(matches!(err, JwtError::Signature(message)
            if message.contains("invalid signature or payload")));
    }

    #[test]
    fn bad_audience_is_rejected() {
        let (private, public) = key_pair();
        let mut claims = insured_claims();
        claims["aud"] = json!("https://somewhere.else/");
        let jwt = Jwt::parse(&token_for(&claims, &private)).expect("parses");
        let clock = FixedClock::at_unix(1_700_000_100);
        let err = jwt.verify(&public, &config(), &clock).unwrap_err();
        assert!(matches!(err, JwtError::BadAudience(_)));
    }

    #[test]
    fn unsupported_acr_is_rejected() {
        let (private, public) = key_pair();
        let mut claims = insured_claims();
        claims["acr"] = json!("gematik-ehealth-loa-low");
        let jwt = Jwt::parse(&token_for(&claims, &private)).expect("parses");
        let clock = FixedClock::at_unix(1_700_000_100);
        let err = jwt.verify(&public, &config(), &clock).unwrap_err();
        assert!(matches!(err, JwtError::Format(message)
            if message.contains("acr claim is not supported")));
    }

    #[test]
    fn insured_without_any_name_claims_is_rejected() {
        let (private, public) = key_pair();
        let mut claims = insured_claims();
        claims.as_object_mut().unwrap().remove("given_name");
        claims.as_object_mut().unwrap().remove("family_name");
        let jwt = Jwt::parse(&token_for(&claims, &private)).expect("parses");
        let clock = FixedClock::at_unix(1_700_000_100);
        let err = jwt.verify(&public, &config(), &clock).unwrap_err();
        assert!(matches!(err, JwtError::MissingClaim(_)));
    }

    #[test]
    fn error_codes_map_to_unauthorized() {
        let err = JwtError::Expired("gone".to_string()).into_erp_error();
        assert_eq!(err.code, ErrorCode::JwtExpired);
        assert_eq!(err.http_status(), erp_error::HttpStatus::UNAUTHORIZED);
    }
}
