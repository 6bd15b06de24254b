use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Certificate, CountryCode, RevocationList};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation failed: {0}")]
    Backend(String),
}

/// Identity of an issuer's CRL: normalised issuer name and country.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CrlKey {
    pub issuer: String,
    pub country: Option<CountryCode>,
}

impl CrlKey {
    /// Key of the CRL that covers `certificate`.
    pub fn for_certificate(certificate: &Certificate) -> Self {
        Self {
            issuer: certificate.issuer().normalized(),
            country: certificate.issuer().country.clone(),
        }
    }

    pub fn for_crl(crl: &RevocationList) -> Self {
        Self {
            issuer: crl.issuer().normalized(),
            country: crl.country().cloned(),
        }
    }
}

/// Cold tier of the revocation cache.
#[async_trait]
pub trait CrlStore: Send + Sync + 'static {
    /// Returns the most recent CRL stored for `key`, if any.
    async fn fetch_crl(&self, key: &CrlKey) -> Result<Option<RevocationList>, StoreError>;
}
