mod common;

use std::sync::Arc;

use pkd_engine::{
    directory::{
        ComparisonBasis, DifferentialUpdater, DirectoryEntry, DirectoryError, DirectoryStore,
        DirectoryWrite, DitScheme, MemoryDirectory, RecordKind, UpdateAction,
    },
    domain::CertificateStatus,
    pki::{decode_certificate, decode_crl},
};
use time::Duration;

fn certificate_entry(der: &[u8], description: &str) -> DirectoryEntry {
    DirectoryEntry::Certificate {
        certificate: decode_certificate(der)
            .unwrap()
            .with_status(CertificateStatus::Valid),
        description: description.to_string(),
    }
}

#[tokio::test]
async fn test_add_then_skip_then_modify() {
    let csca = common::csca("CSCA Germany", "DE");
    let directory = MemoryDirectory::new();
    let updater = DifferentialUpdater::new(Arc::new(directory.clone()));
    let entry = certificate_entry(&csca.der, "VALID: SELF_SIGNED_VALID");
    let key = match &entry {
        DirectoryEntry::Certificate { certificate, .. } => {
            DitScheme::default().certificate_key(certificate)
        }
        _ => unreachable!(),
    };
    // the whole subject is escaped into the cn value
    assert!(key.as_str().contains("CN\\=CSCA Germany+sn="), "{key}");
    assert!(key.as_str().ends_with(",o=csca,c=DE,dc=data,dc=download,dc=pkd,dc=icao,dc=int"));

    let decision = updater.decide(&key, &entry).await.unwrap();
    assert_eq!(decision.action, UpdateAction::Add);
    assert_eq!(decision.basis, ComparisonBasis::Absent);

    directory
        .apply(&[DirectoryWrite {
            key: key.clone(),
            action: decision.action,
            entry: entry.clone(),
        }])
        .await
        .unwrap();
    assert_eq!(directory.count_kind(RecordKind::Certificate).await, 1);

    assert_eq!(
        updater.decide(&key, &entry).await.unwrap().action,
        UpdateAction::Skip
    );

    let redescribed = certificate_entry(&csca.der, "EXPIRED: CHAIN_INVALID");
    assert_eq!(
        updater.decide(&key, &redescribed).await.unwrap().action,
        UpdateAction::Modify
    );
}

#[tokio::test]
async fn test_crl_sequence_numbers() {
    let csca = common::csca("CSCA Germany", "DE");
    let stored = decode_crl(&common::crl(&csca, 5, &[], Duration::days(30))).unwrap();
    let key = DitScheme::default().crl_key(&stored);
    let directory = MemoryDirectory::new();
    directory
        .apply(&[DirectoryWrite {
            key: key.clone(),
            action: UpdateAction::Add,
            entry: DirectoryEntry::Crl(stored),
        }])
        .await
        .unwrap();
    let updater = DifferentialUpdater::new(Arc::new(directory));

    let newer = decode_crl(&common::crl(&csca, 6, &[], Duration::days(30))).unwrap();
    let decision = updater.decide(&key, &DirectoryEntry::Crl(newer)).await.unwrap();
    assert_eq!(decision.action, UpdateAction::Modify);
    assert_eq!(decision.basis, ComparisonBasis::SequenceNumber);

    let older = decode_crl(&common::crl(&csca, 4, &[], Duration::days(30))).unwrap();
    let decision = updater.decide(&key, &DirectoryEntry::Crl(older)).await.unwrap();
    assert_eq!(decision.action, UpdateAction::Skip);
}

#[tokio::test]
async fn test_conflicting_add_applies_nothing() {
    let first = common::csca("CSCA Germany", "DE");
    let second = common::csca("CSCA Austria", "AT");
    let scheme = DitScheme::default();
    let directory = MemoryDirectory::new();

    let write = |der: &[u8], action| {
        let entry = certificate_entry(der, "VALID: SELF_SIGNED_VALID");
        let key = match &entry {
            DirectoryEntry::Certificate { certificate, .. } => scheme.certificate_key(certificate),
            _ => unreachable!(),
        };
        DirectoryWrite { key, action, entry }
    };

    directory
        .apply(&[write(&first.der, UpdateAction::Add)])
        .await
        .unwrap();

    let result = directory
        .apply(&[
            write(&second.der, UpdateAction::Add),
            write(&first.der, UpdateAction::Add),
        ])
        .await;
    match result {
        Err(DirectoryError::Conflict { keys }) => assert_eq!(keys.len(), 1),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(directory.len().await, 1);

    directory
        .apply(&[
            write(&second.der, UpdateAction::Add),
            write(&first.der, UpdateAction::Modify),
        ])
        .await
        .unwrap();
    assert_eq!(directory.len().await, 2);
}
