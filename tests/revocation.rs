mod common;

use std::sync::Arc;

use async_trait::async_trait;
use mockall::mock;
use pkd_engine::{
    directory::{DirectoryEntry, DirectoryStore, DirectoryWrite, DitScheme, MemoryDirectory, UpdateAction},
    domain::{RevocationList, RevocationReason},
    pki::{
        CacheTier, CertificateRepository, CrlKey, CrlStore, MemoryCertificateRepository,
        RevocationChecker, RevocationStatus, Severity, StoreError, decode_certificate, decode_crl,
    },
};
use time::Duration;

mock! {
    pub Store {}

    #[async_trait]
    impl CrlStore for Store {
        async fn fetch_crl(&self, key: &CrlKey) -> Result<Option<RevocationList>, StoreError>;
    }
}

async fn directory_with(crl: &[u8]) -> MemoryDirectory {
    let crl = decode_crl(crl).unwrap();
    let directory = MemoryDirectory::new();
    directory
        .apply(&[DirectoryWrite {
            key: DitScheme::default().crl_key(&crl),
            action: UpdateAction::Add,
            entry: DirectoryEntry::Crl(crl),
        }])
        .await
        .unwrap();
    directory
}

#[tokio::test]
async fn test_revoked_serial_from_cold_then_hot() {
    let csca = common::csca("CSCA Germany", "DE");
    let revoked = decode_certificate(&common::dsc(&csca, "DS 1", &[0x20, 0x01]).der).unwrap();
    let good = decode_certificate(&common::dsc(&csca, "DS 2", &[0x20, 0x02]).der).unwrap();
    let directory = directory_with(&common::crl(&csca, 1, &[&[0x20, 0x01]], Duration::days(30))).await;
    let checker = RevocationChecker::new(Arc::new(directory));

    let first = checker.check(&revoked).await;
    assert_eq!(first.tier, CacheTier::Cold);
    match &first.status {
        RevocationStatus::Revoked {
            serial_number,
            reason,
            ..
        } => {
            assert_eq!(serial_number, revoked.serial_number());
            assert_eq!(*reason, Some(RevocationReason::KeyCompromise));
        }
        other => panic!("expected REVOKED, got {other:?}"),
    }
    assert_eq!(first.status.severity(), Severity::Failure);
    assert_eq!(checker.hot_len(), 1);

    let second = checker.check(&good).await;
    assert_eq!(second.tier, CacheTier::Hot);
    assert_eq!(second.status, RevocationStatus::Valid);
}

#[tokio::test]
async fn test_expired_crl_is_warning() {
    let csca = common::csca("CSCA Germany", "DE");
    let dsc = decode_certificate(&common::dsc(&csca, "DS 1", &[0x20, 0x03]).der).unwrap();
    let directory = directory_with(&common::crl(&csca, 7, &[], Duration::hours(-1))).await;
    let checker = RevocationChecker::new(Arc::new(directory));

    let status = checker.check_revocation(&dsc).await;
    assert!(matches!(status, RevocationStatus::CrlExpired { .. }));
    assert_eq!(status.code(), "CRL_EXPIRED");
    assert_eq!(status.severity(), Severity::Warning);
    // expired CRLs are never served from the hot tier
    assert_eq!(checker.check(&dsc).await.tier, CacheTier::Cold);
}

#[tokio::test]
async fn test_missing_crl_is_unavailable() {
    let csca = common::csca("CSCA Germany", "DE");
    let dsc = decode_certificate(&common::dsc(&csca, "DS 1", &[0x20, 0x04]).der).unwrap();
    let checker = RevocationChecker::new(Arc::new(MemoryDirectory::new()));

    let outcome = checker.check(&dsc).await;
    assert_eq!(outcome.status, RevocationStatus::CrlUnavailable);
    assert_eq!(outcome.tier, CacheTier::Miss);
}

#[tokio::test]
async fn test_store_error_is_unavailable() {
    let csca = common::csca("CSCA Germany", "DE");
    let dsc = decode_certificate(&common::dsc(&csca, "DS 1", &[0x20, 0x05]).der).unwrap();

    let mut store = MockStore::new();
    store
        .expect_fetch_crl()
        .times(2)
        .returning(|_| Err(StoreError::Unavailable("connection refused".into())));
    let checker = RevocationChecker::new(Arc::new(store));

    assert_eq!(
        checker.check_revocation(&dsc).await,
        RevocationStatus::CrlUnavailable
    );
    // failures are not cached
    assert_eq!(checker.check(&dsc).await.tier, CacheTier::Miss);
}

#[tokio::test]
async fn test_crl_signed_by_impostor_is_invalid() {
    let csca = common::csca("CSCA Germany", "DE");
    let impostor = common::csca("CSCA Germany", "DE");
    let dsc = decode_certificate(&common::dsc(&csca, "DS 1", &[0x20, 0x06]).der).unwrap();
    let directory = directory_with(&common::crl(&impostor, 2, &[], Duration::days(30))).await;

    let issuers = MemoryCertificateRepository::new();
    issuers.insert(decode_certificate(&csca.der).unwrap());
    let checker = RevocationChecker::new(Arc::new(directory))
        .with_issuers(Arc::new(issuers) as Arc<dyn CertificateRepository>);

    let status = checker.check_revocation(&dsc).await;
    assert_eq!(status, RevocationStatus::CrlInvalid);
    assert_eq!(status.severity(), Severity::Failure);
}

#[tokio::test]
async fn test_invalidate_forces_cold_lookup() {
    let csca = common::csca("CSCA Germany", "DE");
    let dsc = decode_certificate(&common::dsc(&csca, "DS 1", &[0x20, 0x07]).der).unwrap();
    let directory = directory_with(&common::crl(&csca, 1, &[], Duration::days(30))).await;
    let checker = RevocationChecker::new(Arc::new(directory));

    assert_eq!(checker.check(&dsc).await.tier, CacheTier::Cold);
    assert_eq!(checker.check(&dsc).await.tier, CacheTier::Hot);
    checker.invalidate(&CrlKey::for_certificate(&dsc));
    assert_eq!(checker.check(&dsc).await.tier, CacheTier::Cold);
}

#[tokio::test]
async fn test_refill_locks_released_after_lookups() {
    let germany = common::csca("CSCA Germany", "DE");
    let france = common::csca("CSCA France", "FR");
    let de = decode_certificate(&common::dsc(&germany, "DS DE", &[0x20, 0x10]).der).unwrap();
    let fr = decode_certificate(&common::dsc(&france, "DS FR", &[0x20, 0x11]).der).unwrap();
    let directory = directory_with(&common::crl(&germany, 1, &[], Duration::days(30))).await;
    let checker = RevocationChecker::new(Arc::new(directory));

    let (a, b, c) = tokio::join!(checker.check(&de), checker.check(&de), checker.check(&fr));
    assert_eq!(a.status, RevocationStatus::Valid);
    assert_eq!(b.status, RevocationStatus::Valid);
    assert_eq!(c.status, RevocationStatus::CrlUnavailable);
    assert_eq!(checker.pending_refills(), 0);
}
