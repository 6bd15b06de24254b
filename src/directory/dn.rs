use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{Certificate, CertificateKind, CountryCode, MasterList, RevocationList};

/// Base DN used when none is configured.
pub const DEFAULT_BASE_DN: &str = "dc=icao,dc=int";

/// ISO 3166 user-assigned code used when a record carries no usable country.
const UNKNOWN_COUNTRY: &str = "XX";

/// Distinguished name of an entry in the directory information tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectoryKey(String);

impl DirectoryKey {
    pub fn new(dn: impl Into<String>) -> Self {
        Self(dn.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DirectoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// PKD download tree layout:
///
/// ```text
/// cn=<subject>+sn=<serial>,o=csca|dsc,c=<CC>,dc=data|nc-data,dc=download,dc=pkd,<base>
/// cn=<issuer>,o=crl,c=<CC>,dc=data,dc=download,dc=pkd,<base>
/// cn=<signer>,o=ml,c=<CC>,dc=data,dc=download,dc=pkd,<base>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DitScheme {
    base_dn: String,
}

impl Default for DitScheme {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DN)
    }
}

impl DitScheme {
    pub fn new(base_dn: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
        }
    }

    pub fn base_dn(&self) -> &str {
        &self.base_dn
    }

    pub fn certificate_key(&self, certificate: &Certificate) -> DirectoryKey {
        let (object_class, data_container) = match certificate.kind() {
            CertificateKind::Csca => ("csca", "data"),
            CertificateKind::Dsc => ("dsc", "data"),
            CertificateKind::DscNonConformant => ("dsc", "nc-data"),
        };
        DirectoryKey(format!(
            "cn={}+sn={},{}",
            escape_rdn_value(&certificate.subject().text),
            certificate.serial_number().to_hex(),
            self.container(object_class, certificate.country(), data_container)
        ))
    }

    pub fn crl_key(&self, crl: &RevocationList) -> DirectoryKey {
        DirectoryKey(format!(
            "cn={},{}",
            escape_rdn_value(&crl.issuer().text),
            self.container("crl", crl.country(), "data")
        ))
    }

    pub fn master_list_key(&self, master_list: &MasterList) -> DirectoryKey {
        DirectoryKey(format!(
            "cn={},{}",
            escape_rdn_value(&master_list.signer().text),
            self.container("ml", master_list.country(), "data")
        ))
    }

    fn container(
        &self,
        object_class: &str,
        country: Option<&CountryCode>,
        data_container: &str,
    ) -> String {
        let country = country.map(CountryCode::as_str).unwrap_or(UNKNOWN_COUNTRY);
        format!(
            "o={object_class},c={country},dc={data_container},dc=download,dc=pkd,{}",
            self.base_dn
        )
    }
}

/// Escapes an attribute value for use inside an RDN (RFC 4514 §2.4).
pub fn escape_rdn_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '#' if i == 0 => escaped.push_str("\\#"),
            ' ' if i == 0 || i == last => escaped.push_str("\\ "),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(c),
        }
    }
    escaped
}
