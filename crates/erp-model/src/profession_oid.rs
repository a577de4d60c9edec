//! Profession OIDs carried in Telematikinfrastruktur certificates and
//! access-token `professionOID` claims.

/// Physician (Arzt).
pub const OID_ARZT: &str = "1.2.276.0.76.4.30";
/// Dentist (Zahnarzt).
pub const OID_ZAHNARZT: &str = "1.2.276.0.76.4.31";
/// Pharmacist (Apotheker).
pub const OID_APOTHEKER: &str = "1.2.276.0.76.4.32";
/// Psychotherapist.
pub const OID_PSYCHOTHERAPEUT: &str = "1.2.276.0.76.4.45";
/// Insured person (Versicherter).
pub const OID_VERSICHERTER: &str = "1.2.276.0.76.4.49";
/// Medical practice (Praxis Arzt).
pub const OID_PRAXIS_ARZT: &str = "1.2.276.0.76.4.50";
/// Dental practice.
pub const OID_ZAHNARZTPRAXIS: &str = "1.2.276.0.76.4.51";
/// Psychotherapy practice.
pub const OID_PRAXIS_PSYCHOTHERAPEUT: &str = "1.2.276.0.76.4.52";
/// Hospital (Krankenhaus).
pub const OID_KRANKENHAUS: &str = "1.2.276.0.76.4.53";
/// Public pharmacy (öffentliche Apotheke).
pub const OID_OEFFENTLICHE_APOTHEKE: &str = "1.2.276.0.76.4.54";
/// Hospital pharmacy.
pub const OID_KRANKENHAUSAPOTHEKE: &str = "1.2.276.0.76.4.55";
/// Cost bearer (Kostenträger).
pub const OID_KOSTENTRAEGER: &str = "1.2.276.0.76.4.59";
/// Medical chambers (Ärztekammern).
pub const OID_AERZTEKAMMERN: &str = "1.3.6.1.4.1.24796.4.11.1";

/// Role OIDs accepted on the signer certificate of a QES prescription
/// signature: doctors, dentists, and the medical chambers.
pub const QES_PRESCRIPTION_OIDS: &[&str] = &[OID_ARZT, OID_ZAHNARZT, OID_AERZTEKAMMERN];
