use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::certificate::{Certificate, Fingerprint};
use super::dn::{CountryCode, DistinguishedName};

/// A CMS signed CSCA Master List.
#[derive(Debug, Clone, Serialize)]
pub struct MasterList {
    fingerprint: Fingerprint,
    country: Option<CountryCode>,
    version: u32,
    #[serde(skip)]
    cms: Arc<[u8]>,
    signer: DistinguishedName,
    #[serde(skip)]
    csca_certificates: Vec<Certificate>,
    signature_valid: bool,
}

/// Field set for [`MasterList::new`].
#[derive(Debug, Clone)]
pub struct MasterListParts {
    pub cms: Vec<u8>,
    pub version: u32,
    pub signer: DistinguishedName,
    pub csca_certificates: Vec<Certificate>,
    pub signature_valid: bool,
}

impl MasterList {
    pub fn new(parts: MasterListParts) -> Self {
        Self {
            fingerprint: Fingerprint::of(&parts.cms),
            country: parts.signer.country.clone(),
            version: parts.version,
            cms: parts.cms.into(),
            signer: parts.signer,
            csca_certificates: parts.csca_certificates,
            signature_valid: parts.signature_valid,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Country of the list, from the `C` component of the signer name.
    pub fn country(&self) -> Option<&CountryCode> {
        self.country.as_ref()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn cms(&self) -> &[u8] {
        &self.cms
    }

    pub fn signer(&self) -> &DistinguishedName {
        &self.signer
    }

    pub fn csca_certificates(&self) -> &[Certificate] {
        &self.csca_certificates
    }

    pub fn csca_count(&self) -> usize {
        self.csca_certificates.len()
    }

    pub fn signature_valid(&self) -> bool {
        self.signature_valid
    }

    /// Hex SHA-256 over the raw CMS binary.
    pub fn content_hash(&self) -> String {
        hex::encode(Sha256::digest(&self.cms))
    }
}
