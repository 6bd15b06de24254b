use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;

use super::certificate::Certificate;
use super::trust_path::TrustPath;
use crate::pki::passive_auth::PassiveAuthFailure;
use crate::pki::revocation::RevocationStatus;

/// Overall outcome of Passive Authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Evaluated and accepted
    Valid,
    /// Evaluated and rejected
    Invalid,
    /// Could not be evaluated
    Error,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::Invalid => "INVALID",
            Self::Error => "ERROR",
        }
    }
}

/// Result of comparing one supplied data group against the Security Object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataGroupOutcome {
    Passed,
    Mismatch {
        #[serde(with = "hex::serde")]
        declared: Vec<u8>,
        #[serde(with = "hex::serde")]
        computed: Vec<u8>,
    },
    /// The group was supplied but the Security Object declares no hash for it
    NotDeclared,
}

impl DataGroupOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// Everything Passive Authentication learned about one document.
#[derive(Debug, Clone, Serialize)]
pub struct PassportRecord {
    #[serde(skip)]
    pub(crate) sod: Arc<[u8]>,
    #[serde(skip)]
    pub(crate) declared_hashes: BTreeMap<u8, Vec<u8>>,
    pub(crate) signer: Option<Certificate>,
    pub(crate) trust_path: Option<TrustPath>,
    pub(crate) revocation: RevocationStatus,
    pub(crate) data_groups: BTreeMap<u8, DataGroupOutcome>,
    pub(crate) verdict: Verdict,
    pub(crate) failure: Option<PassiveAuthFailure>,
    pub(crate) warnings: Vec<String>,
}

impl PassportRecord {
    pub fn sod(&self) -> &[u8] {
        &self.sod
    }

    pub fn declared_hashes(&self) -> &BTreeMap<u8, Vec<u8>> {
        &self.declared_hashes
    }

    pub fn signer(&self) -> Option<&Certificate> {
        self.signer.as_ref()
    }

    pub fn trust_path(&self) -> Option<&TrustPath> {
        self.trust_path.as_ref()
    }

    pub fn revocation(&self) -> &RevocationStatus {
        &self.revocation
    }

    pub fn data_groups(&self) -> &BTreeMap<u8, DataGroupOutcome> {
        &self.data_groups
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    /// The step that stopped evaluation or rejected the document, if any.
    pub fn failure(&self) -> Option<&PassiveAuthFailure> {
        self.failure.as_ref()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn failed_groups(&self) -> impl Iterator<Item = u8> + '_ {
        self.data_groups
            .iter()
            .filter(|(_, outcome)| !outcome.passed())
            .map(|(group, _)| *group)
    }

    pub fn passed_groups(&self) -> impl Iterator<Item = u8> + '_ {
        self.data_groups
            .iter()
            .filter(|(_, outcome)| outcome.passed())
            .map(|(group, _)| *group)
    }
}
