use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use openssl::x509::{X509, X509Crl};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{Certificate, DistinguishedName, Fingerprint, RevocationList, TrustPath};

/// Upper bound on path length; ICAO hierarchies are two levels plus optional link certificates.
pub const DEFAULT_MAX_PATH_LEN: usize = 8;

/// Reasons a certificate or CRL fails chain validation.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainFailure {
    #[error("Signature does not verify")]
    InvalidSignature,

    #[error("Certificate is not yet valid or has expired")]
    NotYetValidOrExpired,

    #[error("Issuer name does not match the subject of the issuer certificate")]
    IssuerMismatch,

    #[error("Certificate or issuer is outside its validity period")]
    ExpiredCertificate,

    #[error("Issuer is not permitted to sign certificates or CRLs")]
    NotCertificateAuthority,

    #[error("Path exceeds {0} certificates")]
    PathTooLong(usize),

    #[error("Issuer loop detected while building the path")]
    Cycle,

    #[error("Cannot process certificate: {0}")]
    Malformed(String),
}

impl From<openssl::error::ErrorStack> for ChainFailure {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Validation state of a certificate.
#[derive(Debug, Clone)]
pub enum ChainStatus {
    Unvalidated,
    SelfSignedValid,
    SelfSignedInvalid(ChainFailure),
    ChainValid(TrustPath),
    ChainInvalid(ChainFailure),
    /// A link is missing from the repository. Not a hard failure: the certificate may
    /// validate once its issuer is loaded.
    IssuerNotFound(DistinguishedName),
}

impl ChainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unvalidated => "UNVALIDATED",
            Self::SelfSignedValid => "SELF_SIGNED_VALID",
            Self::SelfSignedInvalid(_) => "SELF_SIGNED_INVALID",
            Self::ChainValid(_) => "CHAIN_VALID",
            Self::ChainInvalid(_) => "CHAIN_INVALID",
            Self::IssuerNotFound(_) => "ISSUER_NOT_FOUND",
        }
    }

    pub fn failure(&self) -> Option<&ChainFailure> {
        match self {
            Self::SelfSignedInvalid(f) | Self::ChainInvalid(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::SelfSignedValid | Self::ChainValid(_))
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failure() {
            Some(failure) => write!(f, "{} ({failure})", self.as_str()),
            None => f.write_str(self.as_str()),
        }
    }
}

/// Lookup of candidate issuer certificates by subject name.
pub trait CertificateRepository: Send + Sync {
    fn find_issuers(&self, subject: &DistinguishedName) -> Vec<Certificate>;
}

impl<F> CertificateRepository for F
where
    F: Fn(&DistinguishedName) -> Option<Certificate> + Send + Sync,
{
    fn find_issuers(&self, subject: &DistinguishedName) -> Vec<Certificate> {
        self(subject).into_iter().collect()
    }
}

/// In-memory certificate repository keyed by normalised subject name.
#[derive(Debug, Default, Clone)]
pub struct MemoryCertificateRepository {
    by_subject: Arc<DashMap<String, Vec<Certificate>>>,
}

impl MemoryCertificateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a certificate. Returns `false` when one with the same fingerprint is present.
    pub fn insert(&self, certificate: Certificate) -> bool {
        let mut entry = self
            .by_subject
            .entry(certificate.subject().normalized())
            .or_default();
        if entry
            .iter()
            .any(|c| c.fingerprint() == certificate.fingerprint())
        {
            return false;
        }
        entry.push(certificate);
        true
    }

    pub fn extend(&self, certificates: impl IntoIterator<Item = Certificate>) {
        for certificate in certificates {
            self.insert(certificate);
        }
    }

    pub fn contains(&self, fingerprint: Fingerprint) -> bool {
        self.by_subject
            .iter()
            .any(|entry| entry.value().iter().any(|c| c.fingerprint() == fingerprint))
    }

    pub fn len(&self) -> usize {
        self.by_subject.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CertificateRepository for MemoryCertificateRepository {
    fn find_issuers(&self, subject: &DistinguishedName) -> Vec<Certificate> {
        self.by_subject
            .get(&subject.normalized())
            .map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|c| c.subject().matches(subject))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Looks in `overlay` first, then in `base`; results are merged by fingerprint.
pub struct LayeredRepository<'a> {
    pub overlay: &'a dyn CertificateRepository,
    pub base: &'a dyn CertificateRepository,
}

impl CertificateRepository for LayeredRepository<'_> {
    fn find_issuers(&self, subject: &DistinguishedName) -> Vec<Certificate> {
        let mut found = self.overlay.find_issuers(subject);
        for certificate in self.base.find_issuers(subject) {
            if !found
                .iter()
                .any(|c| c.fingerprint() == certificate.fingerprint())
            {
                found.push(certificate);
            }
        }
        found
    }
}

/// Signature, validity and CA-constraint checks over certificates and CRLs.
#[derive(Debug, Clone)]
pub struct TrustChainValidator {
    reference_time: Option<DateTime<Utc>>,
    max_path_len: usize,
}

impl Default for TrustChainValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustChainValidator {
    pub fn new() -> Self {
        Self {
            reference_time: None,
            max_path_len: DEFAULT_MAX_PATH_LEN,
        }
    }

    /// Evaluates validity periods at a fixed instant instead of the current time.
    pub fn with_reference_time(mut self, at: DateTime<Utc>) -> Self {
        self.reference_time = Some(at);
        self
    }

    pub fn with_max_path_len(mut self, max_path_len: usize) -> Self {
        self.max_path_len = max_path_len.max(1);
        self
    }

    /// Instant validity periods are evaluated at.
    pub fn now(&self) -> DateTime<Utc> {
        self.reference_time.unwrap_or_else(Utc::now)
    }

    /// Checks a self-signed anchor: its own signature, CA constraints and validity period.
    pub fn validate_self_signed(&self, cert: &Certificate) -> ChainStatus {
        match self.check_self_signed(cert) {
            Ok(()) => {
                debug!("Self-signed certificate {} is valid", cert.subject());
                ChainStatus::SelfSignedValid
            }
            Err(failure) => {
                warn!("Self-signed certificate {} rejected: {failure}", cert.subject());
                ChainStatus::SelfSignedInvalid(failure)
            }
        }
    }

    fn check_self_signed(&self, cert: &Certificate) -> Result<(), ChainFailure> {
        if !cert.is_self_issued() {
            return Err(ChainFailure::IssuerMismatch);
        }
        let x509 = X509::from_der(cert.der())?;
        let public_key = x509.public_key()?;
        if !x509.verify(&public_key).unwrap_or(false) {
            return Err(ChainFailure::InvalidSignature);
        }
        if !cert.constraints().permits_cert_signing() {
            return Err(ChainFailure::NotCertificateAuthority);
        }
        if !cert.validity().contains(self.now()) {
            return Err(ChainFailure::NotYetValidOrExpired);
        }
        Ok(())
    }

    /// Checks that `issuer` signed `cert`, that the names link up, that the issuer may
    /// sign certificates and that both are inside their validity periods.
    pub fn validate_against_issuer(
        &self,
        cert: &Certificate,
        issuer: &Certificate,
    ) -> Result<(), ChainFailure> {
        if !cert.issuer().matches(issuer.subject()) {
            return Err(ChainFailure::IssuerMismatch);
        }
        if !issuer.constraints().permits_cert_signing() {
            return Err(ChainFailure::NotCertificateAuthority);
        }

        let issuer_key = X509::from_der(issuer.der())?.public_key()?;
        let x509 = X509::from_der(cert.der())?;
        if !x509.verify(&issuer_key).unwrap_or(false) {
            return Err(ChainFailure::InvalidSignature);
        }

        let now = self.now();
        if !cert.validity().contains(now) || !issuer.validity().contains(now) {
            return Err(ChainFailure::ExpiredCertificate);
        }
        Ok(())
    }

    /// Checks that `issuer` signed `crl` and may sign CRLs.
    pub fn validate_crl(
        &self,
        crl: &RevocationList,
        issuer: &Certificate,
    ) -> Result<(), ChainFailure> {
        if !crl.issuer().matches(issuer.subject()) {
            return Err(ChainFailure::IssuerMismatch);
        }
        if issuer.constraints().crl_sign == Some(false) {
            return Err(ChainFailure::NotCertificateAuthority);
        }
        let issuer_key = X509::from_der(issuer.der())?.public_key()?;
        let x509_crl = X509Crl::from_der(crl.der())?;
        if !x509_crl.verify(&issuer_key).unwrap_or(false) {
            return Err(ChainFailure::InvalidSignature);
        }
        Ok(())
    }

    /// Walks issuer links from `cert` up to a self-signed anchor.
    ///
    /// A missing link yields [`ChainStatus::IssuerNotFound`] instead of a failure. When
    /// several certificates share the issuer name, the first one that validates is used.
    pub fn build_path<R>(&self, cert: &Certificate, repository: &R) -> ChainStatus
    where
        R: CertificateRepository + ?Sized,
    {
        let mut path = vec![cert.clone()];

        loop {
            let Some(current) = path.last() else {
                return ChainStatus::ChainInvalid(ChainFailure::Cycle);
            };

            if current.is_self_issued() {
                if let Err(failure) = self.check_self_signed(current) {
                    return ChainStatus::ChainInvalid(failure);
                }
                return match TrustPath::new(path) {
                    Ok(trust_path) => {
                        debug!("Built path of length {}", trust_path.len());
                        ChainStatus::ChainValid(trust_path)
                    }
                    Err(e) => ChainStatus::ChainInvalid(ChainFailure::Malformed(e.to_string())),
                };
            }

            if path.len() >= self.max_path_len {
                return ChainStatus::ChainInvalid(ChainFailure::PathTooLong(self.max_path_len));
            }

            let candidates = repository.find_issuers(current.issuer());
            if candidates.is_empty() {
                debug!("Issuer {} not found, deferring chain validation", current.issuer());
                return ChainStatus::IssuerNotFound(current.issuer().clone());
            }

            let mut last_failure = None;
            let mut next = None;
            for candidate in candidates {
                if path.iter().any(|c| c.fingerprint() == candidate.fingerprint()) {
                    last_failure = Some(ChainFailure::Cycle);
                    continue;
                }
                match self.validate_against_issuer(current, &candidate) {
                    Ok(()) => {
                        next = Some(candidate);
                        break;
                    }
                    Err(failure) => last_failure = Some(failure),
                }
            }

            match next {
                Some(issuer) => path.push(issuer),
                None => {
                    let failure = last_failure.unwrap_or(ChainFailure::Cycle);
                    warn!("No usable issuer for {}: {failure}", current.subject());
                    return ChainStatus::ChainInvalid(failure);
                }
            }
        }
    }
}
