pub mod diff;
pub mod dn;
pub mod store;

pub use diff::{ComparisonBasis, DifferentialUpdater, DirectoryUpdateDecision, UpdateAction, classify};
pub use dn::{DEFAULT_BASE_DN, DirectoryKey, DitScheme, escape_rdn_value};
pub use store::{
    DirectoryEntry, DirectoryError, DirectoryStore, DirectoryWrite, MemoryDirectory, RecordKind,
};
