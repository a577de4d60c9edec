//! The admission extension (ISIS-MTT, OID `1.3.36.8.3.3`).
//!
//! Telematikinfrastruktur certificates carry the holder's professional
//! roles as OBJECT IDENTIFIERs inside this extension. Only the
//! profession OIDs are of interest here; the surrounding naming
//! authorities are decoded but ignored.

use rasn::prelude::*;
use rasn_pkix::{Certificate, DirectoryString, GeneralName};

/// `id-isismtt-at-admission`
pub const ADMISSION_EXTENSION: &Oid = Oid::const_new(&[1, 3, 36, 8, 3, 3]);

#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub(crate) struct AdmissionSyntax {
    pub admission_authority: Option<GeneralName>,
    pub contents_of_admissions: SequenceOf<Admissions>,
}

#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub(crate) struct Admissions {
    #[rasn(tag(explicit(0)))]
    pub admission_authority: Option<GeneralName>,
    #[rasn(tag(explicit(1)))]
    pub naming_authority: Option<NamingAuthority>,
    pub profession_infos: SequenceOf<ProfessionInfo>,
}

#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub(crate) struct NamingAuthority {
    pub naming_authority_id: Option<ObjectIdentifier>,
    pub naming_authority_url: Option<Ia5String>,
    pub naming_authority_text: Option<DirectoryString>,
}

#[derive(AsnType, Clone, Debug, Decode, Encode, PartialEq)]
pub(crate) struct ProfessionInfo {
    #[rasn(tag(explicit(0)))]
    pub naming_authority: Option<NamingAuthority>,
    pub profession_items: SequenceOf<DirectoryString>,
    pub profession_oids: Option<SequenceOf<ObjectIdentifier>>,
    pub registration_number: Option<PrintableString>,
    pub add_profession_info: Option<OctetString>,
}

/// Extract all profession OIDs (dotted notation) from a certificate's
/// admission extension.
pub(crate) fn profession_oids(certificate: &Certificate) -> Vec<String> {
    let Some(extensions) = &certificate.tbs_certificate.extensions else {
        return Vec::new();
    };
    let Some(extension) = extensions
        .iter()
        .find(|e| *e.extn_id == *ADMISSION_EXTENSION)
    else {
        return Vec::new();
    };
    let admission: AdmissionSyntax = match rasn::der::decode(&extension.extn_value) {
        Ok(decoded) => decoded,
        Err(err) => {
            tracing::warn!(error = %err, "cannot decode admission extension");
            return Vec::new();
        }
    };
    let mut oids = Vec::new();
    for admissions in &admission.contents_of_admissions {
        for info in &admissions.profession_infos {
            if let Some(profession_oids) = &info.profession_oids {
                for oid in profession_oids {
                    oids.push(dotted(oid));
                }
            }
        }
    }
    oids
}

fn dotted(oid: &ObjectIdentifier) -> String {
    oid.iter()
        .map(|arc| arc.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_syntax_roundtrip() {
        let syntax = AdmissionSyntax {
            admission_authority: None,
            contents_of_admissions: vec![Admissions {
                admission_authority: None,
                naming_authority: None,
                profession_infos: vec![ProfessionInfo {
                    naming_authority: None,
                    profession_items: Vec::new(),
                    profession_oids: Some(vec![ObjectIdentifier::from(
                        Oid::const_new(&[1, 2, 276, 0, 76, 4, 30]),
                    )]),
                    registration_number: None,
                    add_profession_info: None,
                }],
            }],
        };
        let encoded = rasn::der::encode(&syntax).expect("encodes");
        let decoded: AdmissionSyntax = rasn::der::decode(&encoded).expect("decodes");
        assert_eq!(decoded, syntax);
        let oid = &decoded.contents_of_admissions[0].profession_infos[0]
            .profession_oids
            .as_ref()
            .expect("oids present")[0];
        assert_eq!(dotted(oid), "1.2.276.0.76.4.30");
    }
}
