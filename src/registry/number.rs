//! The canonical registration number value type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// An issued registration number, e.g. `REG-2025-000042`.
///
/// Immutable. The padding width is part of the value so that
/// `parse(s).to_string() == s` for every well-formed `s`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegistrationNumber {
    prefix: String,
    year: i32,
    sequence: u32,
    padding: u8,
}

/// Why a string is not a registration number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseNumberError {
    #[error("'{0}' is not of the form PREFIX-YYYY-NNNNNN")]
    Malformed(String),
    #[error("'{0}' has a non-numeric year")]
    BadYear(String),
    #[error("'{0}' has a non-numeric sequence")]
    BadSequence(String),
}

impl RegistrationNumber {
    pub fn new(prefix: impl Into<String>, year: i32, sequence: u32, padding: u8) -> Self {
        Self {
            prefix: prefix.into(),
            year,
            sequence,
            padding,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn padding(&self) -> u8 {
        self.padding
    }

    /// Parse `PREFIX-YYYY-DIGITS`. The prefix may itself contain `-`; the
    /// last two segments are always year and sequence.
    pub fn parse(s: &str) -> Result<Self, ParseNumberError> {
        let mut parts = s.rsplitn(3, '-');
        let (seq, year, prefix) = match (parts.next(), parts.next(), parts.next()) {
            (Some(seq), Some(year), Some(prefix)) if !prefix.is_empty() => (seq, year, prefix),
            _ => return Err(ParseNumberError::Malformed(s.to_string())),
        };
        if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseNumberError::BadYear(s.to_string()));
        }
        if seq.is_empty() || seq.len() > 10 || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseNumberError::BadSequence(s.to_string()));
        }
        let year: i32 = year
            .parse()
            .map_err(|_| ParseNumberError::BadYear(s.to_string()))?;
        let sequence: u32 = seq
            .parse()
            .map_err(|_| ParseNumberError::BadSequence(s.to_string()))?;
        Ok(Self::new(prefix, year, sequence, seq.len() as u8))
    }
}

impl fmt::Display for RegistrationNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{:0width$}",
            self.prefix,
            self.year,
            self.sequence,
            width = self.padding as usize
        )
    }
}

impl FromStr for RegistrationNumber {
    type Err = ParseNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RegistrationNumber {
    type Error = ParseNumberError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<RegistrationNumber> for String {
    fn from(n: RegistrationNumber) -> Self {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_padding() {
        assert_eq!(
            RegistrationNumber::new("REG", 2025, 42, 6).to_string(),
            "REG-2025-000042"
        );
        assert_eq!(RegistrationNumber::new("X", 2030, 7, 1).to_string(), "X-2030-7");
    }

    #[test]
    fn parse_keeps_dashed_prefix() {
        let n: RegistrationNumber = "PRIM-BV-2024-0012".parse().unwrap();
        assert_eq!(n.prefix(), "PRIM-BV");
        assert_eq!(n.year(), 2024);
        assert_eq!(n.sequence(), 12);
        assert_eq!(n.padding(), 4);
        assert_eq!(n.to_string(), "PRIM-BV-2024-0012");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            RegistrationNumber::parse("REG2025"),
            Err(ParseNumberError::Malformed(_))
        ));
        assert!(matches!(
            RegistrationNumber::parse("REG-25-000001"),
            Err(ParseNumberError::BadYear(_))
        ));
        assert!(matches!(
            RegistrationNumber::parse("REG-2025-00x1"),
            Err(ParseNumberError::BadSequence(_))
        ));
        assert!(RegistrationNumber::parse("-2025-000001").is_err());
    }

    #[test]
    fn serde_uses_canonical_string() {
        let n = RegistrationNumber::new("REG", 2025, 42, 6);
        let json = serde_json::to_string(&n).unwrap();
        assert_eq!(json, "\"REG-2025-000042\"");
        let back: RegistrationNumber = serde_json::from_str(&json).unwrap();
        assert_eq!(back, n);
    }
}
