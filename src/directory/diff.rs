use std::{cmp::Ordering, sync::Arc};

use serde::Serialize;
use tracing::debug;

use super::dn::DirectoryKey;
use super::store::{DirectoryEntry, DirectoryError, DirectoryStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateAction {
    Add,
    Modify,
    Skip,
}

/// What the decision was based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComparisonBasis {
    /// No entry under the key
    Absent,
    /// Byte-for-byte comparison of the stored binary (and description for certificates)
    BinaryEquality,
    /// CRLNumber comparison
    SequenceNumber,
    /// `thisUpdate` comparison, for CRLs without a CRLNumber
    IssueTime,
    /// SHA-256 over the raw CMS binary
    ContentHash,
}

/// Advisory outcome of comparing an incoming record with the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryUpdateDecision {
    pub key: DirectoryKey,
    pub action: UpdateAction,
    pub reason: String,
    pub basis: ComparisonBasis,
}

/// Classifies incoming records as ADD, MODIFY or SKIP against a directory.
///
/// Identical means bit-exact: any byte difference yields MODIFY.
pub struct DifferentialUpdater {
    store: Arc<dyn DirectoryStore>,
}

impl DifferentialUpdater {
    pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
        Self { store }
    }

    pub async fn decide(
        &self,
        key: &DirectoryKey,
        incoming: &DirectoryEntry,
    ) -> Result<DirectoryUpdateDecision, DirectoryError> {
        let existing = self.store.fetch(key).await?;
        let decision = classify(key, incoming, existing.as_ref());
        debug!(
            "{:?} {} ({:?}: {})",
            decision.action, key, decision.basis, decision.reason
        );
        Ok(decision)
    }
}

/// Pure comparison step of [`DifferentialUpdater::decide`].
pub fn classify(
    key: &DirectoryKey,
    incoming: &DirectoryEntry,
    existing: Option<&DirectoryEntry>,
) -> DirectoryUpdateDecision {
    let decision = |action, basis, reason: &str| DirectoryUpdateDecision {
        key: key.clone(),
        action,
        reason: reason.to_string(),
        basis,
    };

    let Some(existing) = existing else {
        return decision(
            UpdateAction::Add,
            ComparisonBasis::Absent,
            "not present in directory",
        );
    };

    match (incoming, existing) {
        (
            DirectoryEntry::Certificate {
                certificate: new,
                description: new_description,
            },
            DirectoryEntry::Certificate {
                certificate: old,
                description: old_description,
            },
        ) => {
            if new.der() != old.der() {
                decision(
                    UpdateAction::Modify,
                    ComparisonBasis::BinaryEquality,
                    "certificate binary differs",
                )
            } else if new_description != old_description {
                decision(
                    UpdateAction::Modify,
                    ComparisonBasis::BinaryEquality,
                    "description differs",
                )
            } else {
                decision(
                    UpdateAction::Skip,
                    ComparisonBasis::BinaryEquality,
                    "identical certificate",
                )
            }
        }
        (DirectoryEntry::Crl(new), DirectoryEntry::Crl(old)) => {
            match (new.crl_number(), old.crl_number()) {
                (Some(new_number), Some(old_number)) => {
                    if new_number > old_number {
                        decision(
                            UpdateAction::Modify,
                            ComparisonBasis::SequenceNumber,
                            &format!("CRL number {new_number} is newer than {old_number}"),
                        )
                    } else {
                        decision(
                            UpdateAction::Skip,
                            ComparisonBasis::SequenceNumber,
                            &format!("CRL number {new_number} is not newer than {old_number}"),
                        )
                    }
                }
                _ if new.der() == old.der() => decision(
                    UpdateAction::Skip,
                    ComparisonBasis::BinaryEquality,
                    "identical CRL without CRL number",
                ),
                _ => match new.this_update().cmp(&old.this_update()) {
                    Ordering::Greater => decision(
                        UpdateAction::Modify,
                        ComparisonBasis::IssueTime,
                        "CRL without CRL number has a later thisUpdate",
                    ),
                    _ => decision(
                        UpdateAction::Skip,
                        ComparisonBasis::IssueTime,
                        "CRL without CRL number is not newer",
                    ),
                },
            }
        }
        (DirectoryEntry::MasterList(new), DirectoryEntry::MasterList(old)) => {
            if new.content_hash() == old.content_hash() && new.cms() == old.cms() {
                decision(
                    UpdateAction::Skip,
                    ComparisonBasis::ContentHash,
                    "identical master list",
                )
            } else {
                decision(
                    UpdateAction::Modify,
                    ComparisonBasis::ContentHash,
                    "master list content differs",
                )
            }
        }
        _ => decision(
            UpdateAction::Modify,
            ComparisonBasis::BinaryEquality,
            "stored entry has a different record kind",
        ),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::domain::{
        CaConstraints, Certificate, CertificateKind, CertificateParts, CountryCode, CrlNumber,
        DistinguishedName, RevocationList, RevocationListParts, SerialNumber,
    };

    fn name(text: &str) -> DistinguishedName {
        DistinguishedName {
            text: text.to_string(),
            der: text.as_bytes().to_vec(),
            common_name: Some(text.to_string()),
            organization: None,
            organizational_unit: None,
            country: CountryCode::parse("DE"),
        }
    }

    fn certificate(der: &[u8]) -> Certificate {
        let now = Utc::now();
        Certificate::new(CertificateParts {
            der: der.to_vec(),
            serial_number: SerialNumber::from_be_bytes(&[0x01]),
            subject: name("DSC"),
            issuer: name("CSCA"),
            not_before: now,
            not_after: now + Duration::days(1),
            kind: CertificateKind::Dsc,
            constraints: CaConstraints::default(),
        })
        .unwrap()
    }

    fn cert_entry(der: &[u8], description: &str) -> DirectoryEntry {
        DirectoryEntry::Certificate {
            certificate: certificate(der),
            description: description.to_string(),
        }
    }

    fn crl_entry(der: &[u8], number: Option<u64>) -> DirectoryEntry {
        let now = Utc::now();
        DirectoryEntry::Crl(
            RevocationList::new(RevocationListParts {
                der: der.to_vec(),
                issuer: name("CSCA"),
                crl_number: number.map(CrlNumber::from_u64),
                this_update: now,
                next_update: Some(now + Duration::days(30)),
                revoked: Vec::new(),
            })
            .unwrap(),
        )
    }

    fn key() -> DirectoryKey {
        DirectoryKey::new("cn=test")
    }

    #[test]
    fn test_absent_is_add() {
        let decision = classify(&key(), &cert_entry(b"abc", "VALID"), None);
        assert_eq!(decision.action, UpdateAction::Add);
        assert_eq!(decision.basis, ComparisonBasis::Absent);
    }

    #[test]
    fn test_certificate_single_byte_difference_is_modify() {
        let stored = cert_entry(b"abcdef", "VALID");
        let incoming = cert_entry(b"abcdeg", "VALID");
        assert_eq!(
            classify(&key(), &incoming, Some(&stored)).action,
            UpdateAction::Modify
        );
        assert_eq!(
            classify(&key(), &stored, Some(&stored)).action,
            UpdateAction::Skip
        );
    }

    #[test]
    fn test_certificate_description_change_is_modify() {
        let stored = cert_entry(b"abc", "VALID: ISSUER_NOT_FOUND (chain pending)");
        let incoming = cert_entry(b"abc", "VALID: CHAIN_VALID");
        assert_eq!(
            classify(&key(), &incoming, Some(&stored)).action,
            UpdateAction::Modify
        );
    }

    #[test]
    fn test_crl_sequence_number_comparison() {
        let stored = crl_entry(b"crl-5", Some(5));
        let newer = classify(&key(), &crl_entry(b"crl-6", Some(6)), Some(&stored));
        assert_eq!(newer.action, UpdateAction::Modify);
        assert_eq!(newer.basis, ComparisonBasis::SequenceNumber);

        let same = classify(&key(), &crl_entry(b"crl-5b", Some(5)), Some(&stored));
        assert_eq!(same.action, UpdateAction::Skip);

        let older = classify(&key(), &crl_entry(b"crl-4", Some(4)), Some(&stored));
        assert_eq!(older.action, UpdateAction::Skip);
    }

    #[test]
    fn test_crl_without_number_falls_back_to_bytes() {
        let stored = crl_entry(b"crl", None);
        let decision = classify(&key(), &crl_entry(b"crl", None), Some(&stored));
        assert_eq!(decision.action, UpdateAction::Skip);
        assert_eq!(decision.basis, ComparisonBasis::BinaryEquality);
    }

    #[test]
    fn test_kind_change_is_modify() {
        let stored = crl_entry(b"crl", Some(1));
        let decision = classify(&key(), &cert_entry(b"abc", "VALID"), Some(&stored));
        assert_eq!(decision.action, UpdateAction::Modify);
    }
}
