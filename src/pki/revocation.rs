pub mod status;
pub mod store;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use status::{RevocationStatus, Severity, StatusDescriptor};
pub use store::{CrlKey, CrlStore, StoreError};

use crate::domain::{Certificate, CrlValidity, RevocationList};
use crate::pki::chain::{CertificateRepository, TrustChainValidator};

/// Default lifetime of a hot-tier entry before the cold tier is consulted again.
pub const DEFAULT_HOT_TTL: Duration = Duration::from_secs(300);

/// Which cache tier answered a revocation query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheTier {
    Hot,
    Cold,
    /// Neither tier held a CRL for the issuer
    Miss,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevocationOutcome {
    pub status: RevocationStatus,
    pub tier: CacheTier,
}

#[derive(Debug)]
struct CachedCrl {
    crl: Arc<RevocationList>,
    fetched_at: Instant,
}

/// Revocation checker with a hot in-memory tier in front of a cold [`CrlStore`].
///
/// Reads never block each other. Refills are serialised per CRL key, so at most one
/// task fetches a given issuer's CRL from the cold tier at a time.
pub struct RevocationChecker {
    hot: DashMap<CrlKey, CachedCrl>,
    refill_locks: DashMap<CrlKey, Arc<Mutex<()>>>,
    cold: Arc<dyn CrlStore>,
    issuers: Option<Arc<dyn CertificateRepository>>,
    validator: TrustChainValidator,
    hot_ttl: Duration,
    reference_time: Option<DateTime<Utc>>,
}

impl RevocationChecker {
    pub fn new(cold: Arc<dyn CrlStore>) -> Self {
        Self {
            hot: DashMap::new(),
            refill_locks: DashMap::new(),
            cold,
            issuers: None,
            validator: TrustChainValidator::new(),
            hot_ttl: DEFAULT_HOT_TTL,
            reference_time: None,
        }
    }

    pub fn with_hot_ttl(mut self, ttl: Duration) -> Self {
        self.hot_ttl = ttl;
        self
    }

    /// Repository used to verify CRLs that were stored before their issuer was known.
    pub fn with_issuers(mut self, issuers: Arc<dyn CertificateRepository>) -> Self {
        self.issuers = Some(issuers);
        self
    }

    pub fn with_reference_time(mut self, at: DateTime<Utc>) -> Self {
        self.reference_time = Some(at);
        self.validator = self.validator.with_reference_time(at);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.reference_time.unwrap_or_else(Utc::now)
    }

    pub async fn check_revocation(&self, cert: &Certificate) -> RevocationStatus {
        self.check(cert).await.status
    }

    /// Evaluates `cert` against its issuer's CRL and reports which tier answered.
    pub async fn check(&self, cert: &Certificate) -> RevocationOutcome {
        let key = CrlKey::for_certificate(cert);
        let now = self.now();

        if let Some(crl) = self.hot_hit(&key, now) {
            debug!("Hot tier hit for {}", key.issuer);
            return RevocationOutcome {
                status: evaluate(&crl, cert, now),
                tier: CacheTier::Hot,
            };
        }

        let lock = self
            .refill_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let outcome = {
            let _guard = lock.lock().await;
            self.refill(&key, cert, now).await
        };
        drop(lock);
        // Only the map holds the lock once no other task is waiting on it.
        self.refill_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        outcome
    }

    async fn refill(
        &self,
        key: &CrlKey,
        cert: &Certificate,
        now: DateTime<Utc>,
    ) -> RevocationOutcome {
        // Another task may have refilled the entry while we waited.
        if let Some(crl) = self.hot_hit(key, now) {
            return RevocationOutcome {
                status: evaluate(&crl, cert, now),
                tier: CacheTier::Hot,
            };
        }

        match self.cold.fetch_crl(key).await {
            Ok(Some(crl)) => {
                let crl = Arc::new(self.verify_unverified(crl));
                self.hot.insert(
                    key.clone(),
                    CachedCrl {
                        crl: Arc::clone(&crl),
                        fetched_at: Instant::now(),
                    },
                );
                RevocationOutcome {
                    status: evaluate(&crl, cert, now),
                    tier: CacheTier::Cold,
                }
            }
            Ok(None) => {
                debug!("No CRL stored for issuer {}", key.issuer);
                RevocationOutcome {
                    status: RevocationStatus::CrlUnavailable,
                    tier: CacheTier::Miss,
                }
            }
            Err(e) => {
                warn!("Cold tier lookup for {} failed: {e}", key.issuer);
                RevocationOutcome {
                    status: RevocationStatus::CrlUnavailable,
                    tier: CacheTier::Miss,
                }
            }
        }
    }

    /// Evaluates `cert` against a CRL the caller already holds, bypassing both tiers.
    pub fn evaluate(&self, crl: &RevocationList, cert: &Certificate) -> RevocationStatus {
        evaluate(crl, cert, self.now())
    }

    /// Drops the hot entry for `key`, e.g. after a newer CRL has been stored.
    pub fn invalidate(&self, key: &CrlKey) {
        if self.hot.remove(key).is_some() {
            debug!("Invalidated hot CRL entry for {}", key.issuer);
        }
    }

    pub fn hot_len(&self) -> usize {
        self.hot.len()
    }

    /// Refill locks currently held or awaited.
    pub fn pending_refills(&self) -> usize {
        self.refill_locks.len()
    }

    /// A hot entry counts only while its CRL is current and its TTL has not run out.
    fn hot_hit(&self, key: &CrlKey, now: DateTime<Utc>) -> Option<Arc<RevocationList>> {
        let entry = self.hot.get(key)?;
        if entry.crl.is_expired_at(now) || entry.fetched_at.elapsed() >= self.hot_ttl {
            return None;
        }
        Some(Arc::clone(&entry.crl))
    }

    fn verify_unverified(&self, crl: RevocationList) -> RevocationList {
        if crl.validity() != CrlValidity::Unverified {
            return crl;
        }
        let Some(issuers) = &self.issuers else {
            return crl;
        };
        let candidates = issuers.find_issuers(crl.issuer());
        if candidates.is_empty() {
            return crl;
        }
        let verified = candidates
            .iter()
            .any(|issuer| self.validator.validate_crl(&crl, issuer).is_ok());
        let validity = if verified {
            CrlValidity::Valid
        } else {
            warn!("CRL from {} failed signature verification", crl.issuer());
            CrlValidity::Invalid
        };
        crl.with_validity(validity)
    }
}

/// Invalid signature first, then revocation, then expiry: a serial listed on an expired
/// CRL is still reported as revoked.
fn evaluate(crl: &RevocationList, cert: &Certificate, now: DateTime<Utc>) -> RevocationStatus {
    if crl.validity() == CrlValidity::Invalid {
        return RevocationStatus::CrlInvalid;
    }
    if let Some(entry) = crl.find_revoked(cert.serial_number()) {
        return RevocationStatus::Revoked {
            serial_number: entry.serial_number.clone(),
            revoked_at: entry.revocation_date,
            reason: entry.reason,
        };
    }
    if let Some(next_update) = crl.next_update()
        && crl.is_expired_at(now)
    {
        return RevocationStatus::CrlExpired { next_update };
    }
    RevocationStatus::Valid
}
