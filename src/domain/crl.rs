use std::{cmp::Ordering, collections::HashMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::certificate::{Fingerprint, RecordError, SerialNumber};
use super::dn::{CountryCode, DistinguishedName};

/// The CRLNumber extension: a monotonically increasing sequence number (RFC 5280 §5.2.3).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrlNumber(Vec<u8>);

impl CrlNumber {
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        Self(bytes[start..].to_vec())
    }

    pub fn from_u64(value: u64) -> Self {
        Self::from_be_bytes(&value.to_be_bytes())
    }

    pub fn to_hex(&self) -> String {
        if self.0.is_empty() {
            return "00".to_string();
        }
        hex::encode(&self.0)
    }
}

impl Ord for CrlNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        // Minimal big-endian encodings: longer means larger.
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for CrlNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CrlNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CrlNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CrlNumber({})", self.to_hex())
    }
}

/// RFC 5280 §5.3.1 reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Unspecified),
            1 => Some(Self::KeyCompromise),
            2 => Some(Self::CaCompromise),
            3 => Some(Self::AffiliationChanged),
            4 => Some(Self::Superseded),
            5 => Some(Self::CessationOfOperation),
            6 => Some(Self::CertificateHold),
            8 => Some(Self::RemoveFromCrl),
            9 => Some(Self::PrivilegeWithdrawn),
            10 => Some(Self::AaCompromise),
            _ => None,
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Unspecified => "unspecified",
            Self::KeyCompromise => "keyCompromise",
            Self::CaCompromise => "cACompromise",
            Self::AffiliationChanged => "affiliationChanged",
            Self::Superseded => "superseded",
            Self::CessationOfOperation => "cessationOfOperation",
            Self::CertificateHold => "certificateHold",
            Self::RemoveFromCrl => "removeFromCRL",
            Self::PrivilegeWithdrawn => "privilegeWithdrawn",
            Self::AaCompromise => "aACompromise",
        };
        f.write_str(text)
    }
}

/// A single revoked certificate entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedEntry {
    pub serial_number: SerialNumber,
    pub revocation_date: DateTime<Utc>,
    pub reason: Option<RevocationReason>,
}

/// Outcome of the CRL signature check recorded with the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrlValidity {
    /// Signature verified against the issuing CSCA
    Valid,
    /// Signature did not verify
    Invalid,
    /// Issuer was not available when the list was processed
    Unverified,
}

/// A certificate revocation list.
#[derive(Debug, Clone, Serialize)]
pub struct RevocationList {
    fingerprint: Fingerprint,
    issuer: DistinguishedName,
    crl_number: Option<CrlNumber>,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
    #[serde(skip)]
    der: Arc<[u8]>,
    #[serde(skip)]
    revoked: Arc<HashMap<SerialNumber, RevokedEntry>>,
    validity: CrlValidity,
}

/// Field set for [`RevocationList::new`].
#[derive(Debug, Clone)]
pub struct RevocationListParts {
    pub der: Vec<u8>,
    pub issuer: DistinguishedName,
    pub crl_number: Option<CrlNumber>,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
    pub revoked: Vec<RevokedEntry>,
}

impl RevocationList {
    /// Validating constructor: `next_update`, when present, must be strictly after
    /// `this_update`.
    pub fn new(parts: RevocationListParts) -> Result<Self, RecordError> {
        if let Some(next_update) = parts.next_update
            && next_update <= parts.this_update
        {
            return Err(RecordError::InvertedUpdateWindow {
                this_update: parts.this_update,
                next_update,
            });
        }

        let revoked = parts
            .revoked
            .into_iter()
            .map(|entry| (entry.serial_number.clone(), entry))
            .collect();

        Ok(Self {
            fingerprint: Fingerprint::of(&parts.der),
            issuer: parts.issuer,
            crl_number: parts.crl_number,
            this_update: parts.this_update,
            next_update: parts.next_update,
            der: parts.der.into(),
            revoked: Arc::new(revoked),
            validity: CrlValidity::Unverified,
        })
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn issuer(&self) -> &DistinguishedName {
        &self.issuer
    }

    /// Country of the issuing CSCA, from the issuer `C` component.
    pub fn country(&self) -> Option<&CountryCode> {
        self.issuer.country.as_ref()
    }

    pub fn crl_number(&self) -> Option<&CrlNumber> {
        self.crl_number.as_ref()
    }

    pub fn this_update(&self) -> DateTime<Utc> {
        self.this_update
    }

    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.next_update
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn validity(&self) -> CrlValidity {
        self.validity
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }

    /// Looks up a serial number in the revoked set.
    pub fn find_revoked(&self, serial: &SerialNumber) -> Option<&RevokedEntry> {
        self.revoked.get(serial)
    }

    /// The list is past its `nextUpdate`. Lists without `nextUpdate` never expire.
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.next_update.is_some_and(|next| at > next)
    }

    pub fn with_validity(self, validity: CrlValidity) -> Self {
        Self { validity, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crl_number_ordering() {
        assert!(CrlNumber::from_u64(2) > CrlNumber::from_u64(1));
        assert!(CrlNumber::from_u64(256) > CrlNumber::from_u64(255));
        assert_eq!(
            CrlNumber::from_be_bytes(&[0x00, 0x00, 0x05]),
            CrlNumber::from_u64(5)
        );
        assert_eq!(CrlNumber::from_u64(0), CrlNumber::from_be_bytes(&[]));
        assert!(CrlNumber::from_u64(1) > CrlNumber::from_u64(0));
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(RevocationReason::from_u8(1), Some(RevocationReason::KeyCompromise));
        assert_eq!(RevocationReason::from_u8(7), None);
        assert_eq!(RevocationReason::KeyCompromise.to_string(), "keyCompromise");
    }
}
