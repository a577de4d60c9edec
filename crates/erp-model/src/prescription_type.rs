//! Workflow flow types of a prescription.

use crate::profession_oid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The flow type of a prescription, as carried in the workflow identifier
/// system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum PrescriptionType {
    /// Muster 16, pharmacy-only medicines.
    ApothekenpflichtigeArzneimittel = 160,
    /// Muster 16, digital health applications.
    DigitaleGesundheitsanwendungen = 162,
    /// Muster 16, direct assignment.
    DirekteZuweisung = 169,
    /// Private insurance, pharmacy-only medicines.
    ApothekenpflichtigeArzneimittelPkv = 200,
    /// Private insurance, direct assignment.
    DirekteZuweisungPkv = 209,
}

impl PrescriptionType {
    /// All defined flow types.
    pub const ALL: &'static [Self] = &[
        Self::ApothekenpflichtigeArzneimittel,
        Self::DigitaleGesundheitsanwendungen,
        Self::DirekteZuweisung,
        Self::ApothekenpflichtigeArzneimittelPkv,
        Self::DirekteZuweisungPkv,
    ];

    /// Whether the prescription belongs to the private-insurance workflow.
    pub fn is_pkv(self) -> bool {
        matches!(
            self,
            Self::ApothekenpflichtigeArzneimittelPkv | Self::DirekteZuweisungPkv
        )
    }

    /// Whether the prescription is a digital health application.
    pub fn is_diga(self) -> bool {
        matches!(self, Self::DigitaleGesundheitsanwendungen)
    }

    /// Whether the prescription is directly assigned to a pharmacy.
    pub fn is_direct_assignment(self) -> bool {
        matches!(self, Self::DirekteZuweisung | Self::DirekteZuweisungPkv)
    }

    /// Display text of the flow type.
    pub fn display(self) -> &'static str {
        match self {
            Self::ApothekenpflichtigeArzneimittel => "Muster 16 (Apothekenpflichtige Arzneimittel)",
            Self::DigitaleGesundheitsanwendungen => "Muster 16 (Digitale Gesundheitsanwendungen)",
            Self::DirekteZuweisung => "Muster 16 (Direkte Zuweisung)",
            Self::ApothekenpflichtigeArzneimittelPkv => "PKV (Apothekenpflichtige Arzneimittel)",
            Self::DirekteZuweisungPkv => "PKV (Direkte Zuweisung)",
        }
    }

    /// Profession OID of the expected performer, as a `urn:oid:` value.
    pub fn performer_profession_oid(self) -> String {
        let oid = match self {
            Self::DigitaleGesundheitsanwendungen => profession_oid::OID_KOSTENTRAEGER,
            _ => profession_oid::OID_OEFFENTLICHE_APOTHEKE,
        };
        format!("urn:oid:{oid}")
    }

    /// Display text of the expected performer.
    pub fn performer_display(self) -> &'static str {
        match self {
            Self::DigitaleGesundheitsanwendungen => "Kostenträger",
            _ => "Öffentliche Apotheke",
        }
    }
}

impl TryFrom<u8> for PrescriptionType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            160 => Ok(Self::ApothekenpflichtigeArzneimittel),
            162 => Ok(Self::DigitaleGesundheitsanwendungen),
            169 => Ok(Self::DirekteZuweisung),
            200 => Ok(Self::ApothekenpflichtigeArzneimittelPkv),
            209 => Ok(Self::DirekteZuweisungPkv),
            other => Err(format!("unknown flow type: {other}")),
        }
    }
}

impl From<PrescriptionType> for u8 {
    fn from(value: PrescriptionType) -> Self {
        value as u8
    }
}

impl fmt::Display for PrescriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display())
    }
}
