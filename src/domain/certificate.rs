use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::dn::{CountryCode, DistinguishedName};

/// Errors raised by the validating constructors of the domain records.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("notBefore ({not_before}) is after notAfter ({not_after})")]
    InvertedValidity {
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    },

    #[error("nextUpdate ({next_update}) must be strictly after thisUpdate ({this_update})")]
    InvertedUpdateWindow {
        this_update: DateTime<Utc>,
        next_update: DateTime<Utc>,
    },

    #[error("A trust path needs at least one certificate")]
    EmptyPath,

    #[error("Trust path broken at position {0}: issuer does not match the next subject")]
    BrokenPath(usize),
}

/// SHA-256 over the canonical DER encoding. Globally unique identity of a binary record.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(der: &[u8]) -> Self {
        Self(Sha256::digest(der).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.to_hex()
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let bytes = hex::decode(&value).map_err(|e| e.to_string())?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| format!("fingerprint must be 32 bytes: {value}"))?;
        Ok(Self(arr))
    }
}

/// Certificate serial number as minimal big-endian bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SerialNumber(Vec<u8>);

impl SerialNumber {
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        let start = bytes
            .iter()
            .position(|b| *b != 0)
            .unwrap_or(bytes.len().saturating_sub(1));
        Self(bytes[start..].to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerialNumber({})", self.to_hex())
    }
}

/// Validity window of a certificate. `not_before <= not_after` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl Validity {
    pub fn new(not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Result<Self, RecordError> {
        if not_before > not_after {
            return Err(RecordError::InvertedValidity {
                not_before,
                not_after,
            });
        }
        Ok(Self {
            not_before,
            not_after,
        })
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateKind {
    Csca,
    Dsc,
    DscNonConformant,
}

impl CertificateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csca => "CSCA",
            Self::Dsc => "DSC",
            Self::DscNonConformant => "DSC_NON_CONFORMANT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateStatus {
    Valid,
    Expired,
    Revoked,
    Invalid,
}

impl CertificateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::Expired => "EXPIRED",
            Self::Revoked => "REVOKED",
            Self::Invalid => "INVALID",
        }
    }
}

/// Extension facts about a certificate that the chain validator relies on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaConstraints {
    /// `cA` flag of BasicConstraints, `None` when the extension is absent
    pub basic_ca: Option<bool>,
    /// `keyCertSign` bit of KeyUsage, `None` when the extension is absent
    pub key_cert_sign: Option<bool>,
    /// `cRLSign` bit of KeyUsage, `None` when the extension is absent
    pub crl_sign: Option<bool>,
}

impl CaConstraints {
    /// A certificate may act as an issuer unless an extension explicitly forbids it.
    pub fn permits_cert_signing(&self) -> bool {
        self.basic_ca != Some(false) && self.key_cert_sign != Some(false)
    }
}

/// An X.509 certificate as handled by the engine.
///
/// Created by the binary decoder and classified once by the trust chain validator.
/// Status transitions produce a new value; an existing value is never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct Certificate {
    fingerprint: Fingerprint,
    serial_number: SerialNumber,
    subject: DistinguishedName,
    issuer: DistinguishedName,
    validity: Validity,
    #[serde(skip)]
    der: Arc<[u8]>,
    kind: CertificateKind,
    status: CertificateStatus,
    constraints: CaConstraints,
}

/// Field set for [`Certificate::new`].
#[derive(Debug, Clone)]
pub struct CertificateParts {
    pub der: Vec<u8>,
    pub serial_number: SerialNumber,
    pub subject: DistinguishedName,
    pub issuer: DistinguishedName,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub kind: CertificateKind,
    pub constraints: CaConstraints,
}

impl Certificate {
    /// Validating constructor. The fingerprint is derived from `der`; status starts as VALID
    /// until the chain validator says otherwise.
    pub fn new(parts: CertificateParts) -> Result<Self, RecordError> {
        let validity = Validity::new(parts.not_before, parts.not_after)?;
        Ok(Self {
            fingerprint: Fingerprint::of(&parts.der),
            serial_number: parts.serial_number,
            subject: parts.subject,
            issuer: parts.issuer,
            validity,
            der: parts.der.into(),
            kind: parts.kind,
            status: CertificateStatus::Valid,
            constraints: parts.constraints,
        })
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn serial_number(&self) -> &SerialNumber {
        &self.serial_number
    }

    pub fn subject(&self) -> &DistinguishedName {
        &self.subject
    }

    pub fn issuer(&self) -> &DistinguishedName {
        &self.issuer
    }

    pub fn validity(&self) -> Validity {
        self.validity
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn kind(&self) -> CertificateKind {
        self.kind
    }

    pub fn status(&self) -> CertificateStatus {
        self.status
    }

    pub fn constraints(&self) -> CaConstraints {
        self.constraints
    }

    /// Country of the certificate, taken from the subject `C` component only.
    pub fn country(&self) -> Option<&CountryCode> {
        self.subject.country.as_ref()
    }

    /// Subject and issuer name are the same.
    pub fn is_self_issued(&self) -> bool {
        self.subject.matches(&self.issuer)
    }

    pub fn with_status(self, status: CertificateStatus) -> Self {
        Self { status, ..self }
    }

    pub fn with_kind(self, kind: CertificateKind) -> Self {
        Self { kind, ..self }
    }
}
