use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{RevocationReason, SerialNumber};

/// Category a revocation status is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Success,
    Failure,
    Warning,
    Informational,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Warning => "WARNING",
            Self::Informational => "INFORMATIONAL",
        }
    }
}

/// Outcome of a revocation check against the issuer's CRL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevocationStatus {
    Valid,
    Revoked {
        serial_number: SerialNumber,
        revoked_at: DateTime<Utc>,
        reason: Option<RevocationReason>,
    },
    CrlUnavailable,
    CrlExpired {
        next_update: DateTime<Utc>,
    },
    CrlInvalid,
    NotChecked,
}

/// The four externally visible fields of a status, rendered independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusDescriptor {
    pub code: &'static str,
    pub summary: String,
    pub explanation: String,
    pub severity: Severity,
}

impl RevocationStatus {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::Revoked { .. } => "REVOKED",
            Self::CrlUnavailable => "CRL_UNAVAILABLE",
            Self::CrlExpired { .. } => "CRL_EXPIRED",
            Self::CrlInvalid => "CRL_INVALID",
            Self::NotChecked => "NOT_CHECKED",
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Self::Valid => "Not revoked".to_string(),
            Self::Revoked { reason, .. } => match reason {
                Some(reason) => format!("Revoked ({reason})"),
                None => "Revoked".to_string(),
            },
            Self::CrlUnavailable => "CRL not available".to_string(),
            Self::CrlExpired { .. } => "CRL expired".to_string(),
            Self::CrlInvalid => "CRL signature invalid".to_string(),
            Self::NotChecked => "Revocation not checked".to_string(),
        }
    }

    pub fn explanation(&self) -> String {
        match self {
            Self::Valid => {
                "The certificate serial number is not listed in the current CRL of its issuer."
                    .to_string()
            }
            Self::Revoked {
                serial_number,
                revoked_at,
                reason,
            } => {
                let reason = reason
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "unspecified".to_string());
                format!(
                    "Serial number {serial_number} is listed in the issuer CRL as revoked on {} (reason: {reason}).",
                    revoked_at.to_rfc3339()
                )
            }
            Self::CrlUnavailable => {
                "No CRL was found for the issuer, so the revocation state could not be determined."
                    .to_string()
            }
            Self::CrlExpired { next_update } => format!(
                "The issuer CRL passed its nextUpdate time ({}); a newer CRL should be published.",
                next_update.to_rfc3339()
            ),
            Self::CrlInvalid => {
                "The issuer CRL failed signature verification and cannot be relied upon."
                    .to_string()
            }
            Self::NotChecked => {
                "The caller skipped the revocation check for this certificate.".to_string()
            }
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Valid => Severity::Success,
            Self::Revoked { .. } | Self::CrlInvalid => Severity::Failure,
            Self::CrlUnavailable | Self::CrlExpired { .. } => Severity::Warning,
            Self::NotChecked => Severity::Informational,
        }
    }

    pub fn descriptor(&self) -> StatusDescriptor {
        StatusDescriptor {
            code: self.code(),
            summary: self.summary(),
            explanation: self.explanation(),
            severity: self.severity(),
        }
    }

    pub fn is_revoked(&self) -> bool {
        matches!(self, Self::Revoked { .. })
    }
}
