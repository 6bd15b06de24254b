use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use x509_parser::x509::X509Name;

/// Upper bound for CN/O/OU values (X.520 `ub-common-name`, `ub-organization-name`).
const MAX_NAME_COMPONENT_LEN: usize = 64;

/// ISO 3166-1 alpha-2 country code as carried in the `C` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountryCode(String);

impl CountryCode {
    /// Validates and normalises a country code (two ASCII letters, upper-cased).
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(Self(trimmed.to_ascii_uppercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CountryCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid country code: {value}"))
    }
}

impl From<CountryCode> for String {
    fn from(value: CountryCode) -> Self {
        value.0
    }
}

/// A parsed X.509 distinguished name.
///
/// The common name, organization, organizational unit and country components are
/// extracted and validated independently of each other: an invalid organization
/// never removes the country and vice versa. The country is only ever taken from
/// the `C` attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistinguishedName {
    /// RFC 4514 style string form
    pub text: String,
    /// DER encoding of the Name as found in the certificate or CRL
    #[serde(with = "hex::serde")]
    pub der: Vec<u8>,
    pub common_name: Option<String>,
    pub organization: Option<String>,
    pub organizational_unit: Option<String>,
    pub country: Option<CountryCode>,
}

impl DistinguishedName {
    /// Builds the name from an x509-parser `X509Name`.
    pub fn from_x509_name(name: &X509Name<'_>) -> Self {
        let common_name = name
            .iter_common_name()
            .find_map(|a| a.as_str().ok())
            .and_then(|v| validate_component("CN", v));
        let organization = name
            .iter_organization()
            .find_map(|a| a.as_str().ok())
            .and_then(|v| validate_component("O", v));
        let organizational_unit = name
            .iter_organizational_unit()
            .find_map(|a| a.as_str().ok())
            .and_then(|v| validate_component("OU", v));
        let country = name
            .iter_country()
            .find_map(|a| a.as_str().ok())
            .and_then(|v| {
                let parsed = CountryCode::parse(v);
                if parsed.is_none() {
                    debug!("Ignoring invalid country component: {v:?}");
                }
                parsed
            });

        Self {
            text: name.to_string(),
            der: name.as_raw().to_vec(),
            common_name,
            organization,
            organizational_unit,
            country,
        }
    }

    /// Normalised string form used for lookups: case folded, whitespace collapsed
    /// and spaces around separators removed.
    pub fn normalized(&self) -> String {
        normalize(&self.text)
    }

    /// RFC 5280 name matching: byte equal DER, or equal normalised string forms.
    pub fn matches(&self, other: &DistinguishedName) -> bool {
        self.der == other.der || self.normalized() == other.normalized()
    }
}

impl PartialEq for DistinguishedName {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl Eq for DistinguishedName {}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn validate_component(label: &str, value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.chars().count() > MAX_NAME_COMPONENT_LEN {
        debug!("Ignoring invalid {label} component: {value:?}");
        return None;
    }
    if value.chars().any(|c| c.is_control()) {
        debug!("Ignoring {label} component containing control characters");
        return None;
    }
    Some(value.to_string())
}

pub(crate) fn normalize(text: &str) -> String {
    text.split(',')
        .map(|rdn| {
            rdn.split('=')
                .map(|part| part.split_whitespace().collect::<Vec<_>>().join(" "))
                .collect::<Vec<_>>()
                .join("=")
        })
        .collect::<Vec<_>>()
        .join(",")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_code_validation() {
        assert_eq!(CountryCode::parse("de").unwrap().as_str(), "DE");
        assert_eq!(CountryCode::parse(" KR ").unwrap().as_str(), "KR");
        assert!(CountryCode::parse("DEU").is_none());
        assert!(CountryCode::parse("D1").is_none());
        assert!(CountryCode::parse("").is_none());
    }

    #[test]
    fn test_normalize_collapses_case_and_whitespace() {
        assert_eq!(
            normalize("C=DE,  O=Bundesdruckerei ,CN=CSCA   Germany"),
            normalize("c=de, o=bundesdruckerei, cn=csca germany")
        );
    }

    #[test]
    fn test_validate_component_bounds() {
        assert_eq!(validate_component("CN", "  CSCA  "), Some("CSCA".to_string()));
        assert_eq!(validate_component("CN", "   "), None);
        assert_eq!(validate_component("O", &"x".repeat(65)), None);
        assert_eq!(validate_component("OU", "a\u{0}b"), None);
    }

    #[test]
    fn test_der_serializes_as_hex() {
        let name = DistinguishedName {
            text: "C=DE, CN=CSCA".to_string(),
            der: vec![0x30, 0x0a, 0xff],
            common_name: Some("CSCA".to_string()),
            organization: None,
            organizational_unit: None,
            country: CountryCode::parse("DE"),
        };

        let json = serde_json::to_value(&name).unwrap();
        assert_eq!(json["der"], "300aff");

        let back: DistinguishedName = serde_json::from_value(json).unwrap();
        assert_eq!(back.der, name.der);
    }
}
