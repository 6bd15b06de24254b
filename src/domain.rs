pub mod certificate;
pub mod crl;
pub mod dn;
pub mod master_list;
pub mod passport;
pub mod trust_path;

pub use certificate::{
    CaConstraints, Certificate, CertificateKind, CertificateParts, CertificateStatus, Fingerprint,
    RecordError, SerialNumber, Validity,
};
pub use crl::{CrlNumber, CrlValidity, RevocationList, RevocationListParts, RevocationReason, RevokedEntry};
pub use dn::{CountryCode, DistinguishedName};
pub use master_list::{MasterList, MasterListParts};
pub use passport::{DataGroupOutcome, PassportRecord, Verdict};
pub use trust_path::TrustPath;
