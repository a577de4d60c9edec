//! The 10-character insured-person identifier (Krankenversichertennummer).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors rejecting a malformed KVNR.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvnrError {
    /// The identifier is not one uppercase letter followed by nine digits.
    #[error("invalid KVNR format: {0}")]
    Format(String),
    /// The trailing check digit does not match.
    #[error("KVNR checksum mismatch: {0}")]
    Checksum(String),
}

/// A validated KVNR: one uppercase letter, eight digits, and a mod-10
/// check digit.
///
/// The check digit is computed over the ten-digit sequence formed by the
/// letter's alphabet position written as two digits (A = 01) followed by
/// the eight payload digits, with alternating weights 1 and 2; two-digit
/// products are reduced by their digit sum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Kvnr(String);

impl Kvnr {
    /// Validate and wrap an identifier.
    pub fn new(value: impl Into<String>) -> Result<Self, KvnrError> {
        let value = value.into();
        let bytes = value.as_bytes();
        if bytes.len() != 10
            || !bytes[0].is_ascii_uppercase()
            || !bytes[1..].iter().all(|b| b.is_ascii_digit())
        {
            return Err(KvnrError::Format(value));
        }
        if Self::check_digit(&value) != bytes[9] - b'0' {
            return Err(KvnrError::Checksum(value));
        }
        Ok(Self(value))
    }

    /// The identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn check_digit(value: &str) -> u8 {
        let bytes = value.as_bytes();
        let letter_number = bytes[0] - b'A' + 1;
        let mut digits = vec![letter_number / 10, letter_number % 10];
        digits.extend(bytes[1..9].iter().map(|b| b - b'0'));
        let mut sum = 0u32;
        for (idx, digit) in digits.iter().enumerate() {
            let weighted = u32::from(*digit) * if idx % 2 == 0 { 1 } else { 2 };
            sum += weighted / 10 + weighted % 10;
        }
        (sum % 10) as u8
    }
}

impl FromStr for Kvnr {
    type Err = KvnrError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl TryFrom<String> for Kvnr {
    type Error = KvnrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Kvnr> for String {
    fn from(value: Kvnr) -> Self {
        value.0
    }
}

impl fmt::Display for Kvnr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn with_check_digit(prefix: &str) -> String {
        let mut candidate = format!("{prefix}0");
        let check = Kvnr::check_digit(&candidate);
        candidate.pop();
        candidate.push((b'0' + check) as char);
        candidate
    }

    #[test]
    fn accepts_valid() {
        let kvnr = with_check_digit("X12345678");
        assert!(Kvnr::new(&kvnr).is_ok(), "{kvnr} should be valid");
    }

    #[test]
    fn rejects_wrong_check_digit() {
        let mut kvnr = with_check_digit("X12345678");
        let last = kvnr.pop().unwrap();
        kvnr.push(if last == '0' { '1' } else { '0' });
        assert!(matches!(Kvnr::new(&kvnr), Err(KvnrError::Checksum(_))));
    }

    #[test]
    fn rejects_bad_shape() {
        assert!(matches!(Kvnr::new("x123456789"), Err(KvnrError::Format(_))));
        assert!(matches!(Kvnr::new("X12345678"), Err(KvnrError::Format(_))));
        assert!(matches!(Kvnr::new("XX23456789"), Err(KvnrError::Format(_))));
        assert!(matches!(Kvnr::new(""), Err(KvnrError::Format(_))));
    }

    #[test]
    fn serde_roundtrip() {
        let kvnr = Kvnr::new(with_check_digit("A00000001")).unwrap();
        let json = serde_json::to_string(&kvnr).unwrap();
        let back: Kvnr = serde_json::from_str(&json).unwrap();
        assert_eq!(kvnr, back);
    }

    proptest! {
        #[test]
        fn generated_identifiers_validate(letter in proptest::char::range('A', 'Z'), number in 0u32..100_000_000) {
            let prefix = format!("{letter}{number:08}");
            let kvnr = with_check_digit(&prefix);
            prop_assert!(Kvnr::new(&kvnr).is_ok());
        }
    }
}
