//! Passive Authentication of an EF.SOD Security Object (ICAO 9303-11 §5.1).

use std::{collections::BTreeMap, sync::Arc};

use der::{Decode, Encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::asn1::oid::ID_LDS_SECURITY_OBJECT;
use crate::domain::{Certificate, DataGroupOutcome, PassportRecord, TrustPath, Verdict};
use crate::pki::{
    chain::{CertificateRepository, ChainFailure, TrustChainValidator},
    cms::{self, LdsSecurityObject, SignedDataParts},
    decoder,
    revocation::{RevocationChecker, RevocationStatus, Severity},
};

/// How a revocation problem with the document signer affects the verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevocationPolicy {
    /// The verdict stays VALID and the problem is reported as a warning
    #[default]
    Advisory,
    /// Any revocation status other than VALID turns the verdict INVALID, including a
    /// requested check that could not run
    Strict,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassiveAuthOptions {
    pub check_revocation: bool,
    pub revocation_policy: RevocationPolicy,
}

/// Why Passive Authentication did not produce a clean VALID verdict.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PassiveAuthFailure {
    #[error("Security Object could not be parsed: {0}")]
    Parse(String),

    #[error("No document signer certificate in the Security Object")]
    SignerCertificateMissing,

    #[error("Issuing CSCA not found: {0}")]
    IssuerNotFound(String),

    #[error("Document signer chain invalid: {0}")]
    Chain(ChainFailure),

    #[error("Security Object signature invalid: {0}")]
    Signature(String),

    #[error("{0} data group hash(es) do not match the Security Object")]
    DataGroupMismatch(usize),

    #[error("Document signer revocation check failed: {0}")]
    Revocation(String),
}

impl PassiveAuthFailure {
    /// ERROR means the document could not be evaluated; everything else was evaluated
    /// and rejected.
    pub fn verdict(&self) -> Verdict {
        match self {
            Self::Parse(_) => Verdict::Error,
            _ => Verdict::Invalid,
        }
    }
}

/// Runs Passive Authentication against a CSCA repository.
pub struct PassiveAuthenticator {
    certificates: Arc<dyn CertificateRepository>,
    validator: TrustChainValidator,
    revocation: Option<Arc<RevocationChecker>>,
}

/// Accumulates what the protocol has learned so far.
struct Progress {
    sod: Arc<[u8]>,
    declared_hashes: BTreeMap<u8, Vec<u8>>,
    signer: Option<Certificate>,
    trust_path: Option<TrustPath>,
    revocation: RevocationStatus,
    data_groups: BTreeMap<u8, DataGroupOutcome>,
    warnings: Vec<String>,
}

impl Progress {
    fn finish(self, failure: Option<PassiveAuthFailure>) -> PassportRecord {
        let verdict = failure
            .as_ref()
            .map(PassiveAuthFailure::verdict)
            .unwrap_or(Verdict::Valid);
        PassportRecord {
            sod: self.sod,
            declared_hashes: self.declared_hashes,
            signer: self.signer,
            trust_path: self.trust_path,
            revocation: self.revocation,
            data_groups: self.data_groups,
            verdict,
            failure,
            warnings: self.warnings,
        }
    }
}

impl PassiveAuthenticator {
    pub fn new(certificates: Arc<dyn CertificateRepository>) -> Self {
        Self {
            certificates,
            validator: TrustChainValidator::new(),
            revocation: None,
        }
    }

    pub fn with_validator(mut self, validator: TrustChainValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_revocation(mut self, checker: Arc<RevocationChecker>) -> Self {
        self.revocation = Some(checker);
        self
    }

    /// Verifies `sod` and the supplied data groups (number to raw file content).
    ///
    /// Always returns a record. Steps run in protocol order and stop at the first hard
    /// failure; data group comparison checks every supplied group before deciding.
    #[instrument(skip_all, fields(sod_len = sod.len(), groups = data_groups.len()))]
    pub async fn verify(
        &self,
        sod: &[u8],
        data_groups: &BTreeMap<u8, Vec<u8>>,
        options: &PassiveAuthOptions,
    ) -> PassportRecord {
        let mut progress = Progress {
            sod: sod.into(),
            declared_hashes: BTreeMap::new(),
            signer: None,
            trust_path: None,
            revocation: RevocationStatus::NotChecked,
            data_groups: BTreeMap::new(),
            warnings: Vec::new(),
        };

        // 1. Unwrap EF.SOD and the signed LDS Security Object
        let (parts, lds) = match parse_security_object(sod) {
            Ok(parsed) => parsed,
            Err(failure) => {
                warn!("Passive authentication could not parse the Security Object: {failure}");
                return progress.finish(Some(failure));
            }
        };
        progress.declared_hashes = lds
            .data_group_hash_values
            .iter()
            .map(|dg| {
                (
                    dg.data_group_number,
                    dg.data_group_hash_value.as_bytes().to_vec(),
                )
            })
            .collect();

        // 2. Document signer certificate from the SignedData certificates field
        let (signer_x509, signer_info) = match parts.find_signer() {
            Ok(found) => found,
            Err(e) => {
                debug!("No signer certificate: {e}");
                return progress.finish(Some(PassiveAuthFailure::SignerCertificateMissing));
            }
        };
        let signer_der = match signer_x509.to_der() {
            Ok(der) => der,
            Err(e) => return progress.finish(Some(PassiveAuthFailure::Parse(e.to_string()))),
        };
        let signer = match decoder::decode_certificate(&signer_der) {
            Ok(cert) => cert,
            Err(e) => return progress.finish(Some(PassiveAuthFailure::Parse(e.to_string()))),
        };
        progress.signer = Some(signer.clone());

        // 3. Issuing CSCA by subject name
        let candidates = self.certificates.find_issuers(signer.issuer());
        if candidates.is_empty() {
            return progress.finish(Some(PassiveAuthFailure::IssuerNotFound(
                signer.issuer().to_string(),
            )));
        }

        // 4. Signer against issuer
        let mut chain_failure = None;
        let mut issuer = None;
        for candidate in candidates {
            match self.validator.validate_against_issuer(&signer, &candidate) {
                Ok(()) => {
                    issuer = Some(candidate);
                    break;
                }
                Err(failure) => chain_failure = Some(failure),
            }
        }
        let Some(issuer) = issuer else {
            let failure = chain_failure.unwrap_or(ChainFailure::IssuerMismatch);
            return progress.finish(Some(PassiveAuthFailure::Chain(failure)));
        };
        match TrustPath::new(vec![signer.clone(), issuer]) {
            Ok(path) => progress.trust_path = Some(path),
            Err(e) => {
                return progress.finish(Some(PassiveAuthFailure::Chain(ChainFailure::Malformed(
                    e.to_string(),
                ))));
            }
        }

        // 5. CMS signature over the signed content
        if let Err(e) = cms::verify_signature(&parts, signer_info, &signer_der) {
            return progress.finish(Some(PassiveAuthFailure::Signature(e.to_string())));
        }

        // 6. Data group hashes; every supplied group is compared
        let digest_alg = match lds.digest_algorithm() {
            Ok(alg) => alg,
            Err(e) => return progress.finish(Some(PassiveAuthFailure::Parse(e.to_string()))),
        };
        for (number, content) in data_groups {
            let outcome = match progress.declared_hashes.get(number) {
                None => DataGroupOutcome::NotDeclared,
                Some(declared) => match digest_alg.digest(content) {
                    Ok(computed) if &computed == declared => DataGroupOutcome::Passed,
                    Ok(computed) => DataGroupOutcome::Mismatch {
                        declared: declared.clone(),
                        computed,
                    },
                    Err(e) => {
                        return progress.finish(Some(PassiveAuthFailure::Parse(e.to_string())));
                    }
                },
            };
            if !outcome.passed() {
                debug!("DG{number} failed hash comparison");
            }
            progress.data_groups.insert(*number, outcome);
        }
        let mismatches = progress
            .data_groups
            .values()
            .filter(|outcome| !outcome.passed())
            .count();

        // 7. Optional revocation check of the document signer
        if options.check_revocation {
            match &self.revocation {
                Some(checker) => progress.revocation = checker.check_revocation(&signer).await,
                None => warn!("Revocation check requested but no checker is attached"),
            }
        }

        if mismatches > 0 {
            return progress.finish(Some(PassiveAuthFailure::DataGroupMismatch(mismatches)));
        }

        // 8. Verdict
        let revocation = progress.revocation.clone();
        let unchecked = options.check_revocation && revocation == RevocationStatus::NotChecked;
        let degraded = unchecked
            || matches!(
                revocation.severity(),
                Severity::Failure | Severity::Warning
            );
        if degraded {
            match options.revocation_policy {
                RevocationPolicy::Strict => {
                    return progress.finish(Some(PassiveAuthFailure::Revocation(
                        revocation.code().to_string(),
                    )));
                }
                RevocationPolicy::Advisory => {
                    progress
                        .warnings
                        .push(format!("{}: {}", revocation.code(), revocation.summary()));
                }
            }
        }

        info!(
            "Passive authentication VALID for signer {} ({} data group(s))",
            signer.subject(),
            progress.data_groups.len()
        );
        progress.finish(None)
    }
}

fn parse_security_object(
    sod: &[u8],
) -> Result<(SignedDataParts, LdsSecurityObject), PassiveAuthFailure> {
    let content_info = cms::unwrap_document_wrapper(sod).map_err(parse_failure)?;
    let parts = SignedDataParts::parse(content_info).map_err(parse_failure)?;
    parts
        .expect_content_type(ID_LDS_SECURITY_OBJECT)
        .map_err(parse_failure)?;
    let lds = LdsSecurityObject::from_der(parts.content().map_err(parse_failure)?)
        .map_err(parse_failure)?;
    Ok((parts, lds))
}

fn parse_failure(err: impl std::fmt::Display) -> PassiveAuthFailure {
    PassiveAuthFailure::Parse(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_verdicts() {
        assert_eq!(
            PassiveAuthFailure::Parse("bad".into()).verdict(),
            Verdict::Error
        );
        assert_eq!(
            PassiveAuthFailure::SignerCertificateMissing.verdict(),
            Verdict::Invalid
        );
        assert_eq!(
            PassiveAuthFailure::DataGroupMismatch(1).verdict(),
            Verdict::Invalid
        );
    }

    #[test]
    fn test_revocation_policy_deserializes_lowercase() {
        let policy: RevocationPolicy = serde_json::from_str("\"strict\"").unwrap();
        assert_eq!(policy, RevocationPolicy::Strict);
        assert_eq!(RevocationPolicy::default(), RevocationPolicy::Advisory);
    }

    #[tokio::test]
    async fn test_garbage_security_object_is_error() {
        let repository = crate::pki::chain::MemoryCertificateRepository::new();
        let authenticator = PassiveAuthenticator::new(Arc::new(repository));
        let record = authenticator
            .verify(&[0x77, 0x03, 0x30, 0x01], &BTreeMap::new(), &PassiveAuthOptions::default())
            .await;
        assert_eq!(record.verdict(), Verdict::Error);
        assert!(matches!(record.failure(), Some(PassiveAuthFailure::Parse(_))));
        assert!(record.signer().is_none());
    }
}
