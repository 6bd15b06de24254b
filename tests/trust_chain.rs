mod common;

use pkd_engine::{
    domain::CertificateKind,
    pki::{
        ChainFailure, ChainStatus, MemoryCertificateRepository, TrustChainValidator,
        decode_certificate,
    },
};

#[test]
fn test_self_signed_csca_is_valid() {
    let csca = common::csca("CSCA Germany", "DE");
    let cert = decode_certificate(&csca.der).unwrap();

    assert_eq!(cert.kind(), CertificateKind::Csca);
    assert!(cert.is_self_issued());
    let status = TrustChainValidator::new().validate_self_signed(&cert);
    assert_eq!(status.as_str(), "SELF_SIGNED_VALID");
}

#[test]
fn test_tampered_signature_is_self_signed_invalid() {
    let csca = common::csca("CSCA Germany", "DE");
    let mut der = csca.der.clone();
    let last = der.len() - 1;
    der[last] ^= 0x01;
    let cert = decode_certificate(&der).unwrap();

    let status = TrustChainValidator::new().validate_self_signed(&cert);
    assert_eq!(status.as_str(), "SELF_SIGNED_INVALID");
    assert_eq!(status.failure(), Some(&ChainFailure::InvalidSignature));
}

#[test]
fn test_expired_csca_is_rejected() {
    let csca = common::expired_csca("CSCA Expired", "DE");
    let cert = decode_certificate(&csca.der).unwrap();

    let status = TrustChainValidator::new().validate_self_signed(&cert);
    assert_eq!(status.failure(), Some(&ChainFailure::NotYetValidOrExpired));
}

#[test]
fn test_issuer_name_mismatch() {
    let issuing = common::csca("CSCA Germany", "DE");
    let unrelated = common::csca("CSCA France", "FR");
    let dsc = common::dsc(&issuing, "DS Germany", &[0x10, 0x01]);

    let result = TrustChainValidator::new().validate_against_issuer(
        &decode_certificate(&dsc.der).unwrap(),
        &decode_certificate(&unrelated.der).unwrap(),
    );
    assert_eq!(result, Err(ChainFailure::IssuerMismatch));
}

#[test]
fn test_same_name_different_key_is_invalid_signature() {
    let issuing = common::csca("CSCA Germany", "DE");
    let impostor = common::csca("CSCA Germany", "DE");
    let dsc = common::dsc(&issuing, "DS Germany", &[0x10, 0x02]);

    let result = TrustChainValidator::new().validate_against_issuer(
        &decode_certificate(&dsc.der).unwrap(),
        &decode_certificate(&impostor.der).unwrap(),
    );
    assert_eq!(result, Err(ChainFailure::InvalidSignature));
}

#[test]
fn test_missing_issuer_then_chain_valid() {
    let csca = common::csca("CSCA Germany", "DE");
    let dsc = decode_certificate(&common::dsc(&csca, "DS Germany", &[0x10, 0x03]).der).unwrap();
    let validator = TrustChainValidator::new();
    let repository = MemoryCertificateRepository::new();

    let status = validator.build_path(&dsc, &repository);
    assert!(matches!(status, ChainStatus::IssuerNotFound(_)));
    assert!(!status.is_valid());

    let anchor = decode_certificate(&csca.der).unwrap();
    assert!(repository.insert(anchor.clone()));
    assert!(!repository.insert(anchor.clone()));

    match validator.build_path(&dsc, &repository) {
        ChainStatus::ChainValid(path) => {
            assert_eq!(path.len(), 2);
            assert_eq!(path.leaf().fingerprint(), dsc.fingerprint());
            assert_eq!(path.anchor().fingerprint(), anchor.fingerprint());
            assert!(path.is_anchored());
        }
        other => panic!("expected CHAIN_VALID, got {other}"),
    }
}

#[test]
fn test_expired_dsc_chain_is_invalid() {
    let csca = common::csca("CSCA Germany", "DE");
    let dsc = decode_certificate(&common::expired_dsc(&csca, "DS Old", &[0x10, 0x04]).der).unwrap();
    let repository = MemoryCertificateRepository::new();
    repository.insert(decode_certificate(&csca.der).unwrap());

    let status = TrustChainValidator::new().build_path(&dsc, &repository);
    assert_eq!(status.failure(), Some(&ChainFailure::ExpiredCertificate));
}
