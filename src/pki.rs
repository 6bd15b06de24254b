pub mod chain;
pub mod cms;
pub mod decoder;
pub mod passive_auth;
pub mod revocation;

pub use chain::{
    CertificateRepository, ChainFailure, ChainStatus, LayeredRepository,
    MemoryCertificateRepository, TrustChainValidator,
};
pub use decoder::{DecodeError, decode_certificate, decode_crl, decode_master_list};
pub use passive_auth::{
    PassiveAuthFailure, PassiveAuthOptions, PassiveAuthenticator, RevocationPolicy,
};
pub use revocation::{
    CacheTier, CrlKey, CrlStore, RevocationChecker, RevocationOutcome, RevocationStatus,
    Severity, StatusDescriptor, StoreError,
};
