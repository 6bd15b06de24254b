use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use super::dn::DirectoryKey;
use super::diff::UpdateAction;
use crate::domain::{Certificate, MasterList, RevocationList};
use crate::pki::revocation::{CrlKey, CrlStore, StoreError};

type Result<T> = std::result::Result<T, DirectoryError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// ADD writes whose keys already exist. Nothing from the unit of work was applied.
    #[error("Conflicting ADD for {} existing key(s)", keys.len())]
    Conflict { keys: Vec<DirectoryKey> },

    #[error("Write with action {0:?} cannot be applied")]
    InvalidAction(UpdateAction),

    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

/// Record kinds held by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    Certificate,
    Crl,
    MasterList,
}

/// A stored directory entry.
#[derive(Debug, Clone)]
pub enum DirectoryEntry {
    Certificate {
        certificate: Certificate,
        /// Validation outcome stored alongside the binary
        description: String,
    },
    Crl(RevocationList),
    MasterList(MasterList),
}

impl DirectoryEntry {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Certificate { .. } => RecordKind::Certificate,
            Self::Crl(_) => RecordKind::Crl,
            Self::MasterList(_) => RecordKind::MasterList,
        }
    }

    /// Raw binary as it is stored.
    pub fn content(&self) -> &[u8] {
        match self {
            Self::Certificate { certificate, .. } => certificate.der(),
            Self::Crl(crl) => crl.der(),
            Self::MasterList(ml) => ml.cms(),
        }
    }
}

/// One write of a unit of work.
#[derive(Debug, Clone)]
pub struct DirectoryWrite {
    pub key: DirectoryKey,
    pub action: UpdateAction,
    pub entry: DirectoryEntry,
}

/// External directory the engine keeps in sync.
#[async_trait]
pub trait DirectoryStore: Send + Sync + 'static {
    async fn fetch(&self, key: &DirectoryKey) -> Result<Option<DirectoryEntry>>;

    /// Applies all writes atomically: either every write becomes visible or none does.
    ///
    /// An ADD whose key already exists fails the whole unit with
    /// [`DirectoryError::Conflict`]. A MODIFY replaces the entry, creating it if absent.
    async fn apply(&self, writes: &[DirectoryWrite]) -> Result<()>;
}

/// In-memory directory.
///
/// Also serves as the cold tier of the revocation cache: the CRL for an issuer is the
/// stored one with the matching issuer name and country.
#[derive(Debug, Default, Clone)]
pub struct MemoryDirectory {
    entries: Arc<RwLock<BTreeMap<DirectoryKey, DirectoryEntry>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<DirectoryKey> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn count_kind(&self, kind: RecordKind) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.kind() == kind)
            .count()
    }
}

#[async_trait]
impl DirectoryStore for MemoryDirectory {
    async fn fetch(&self, key: &DirectoryKey) -> Result<Option<DirectoryEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn apply(&self, writes: &[DirectoryWrite]) -> Result<()> {
        let mut entries = self.entries.write().await;

        let conflicts: Vec<DirectoryKey> = writes
            .iter()
            .filter(|w| w.action == UpdateAction::Add && entries.contains_key(&w.key))
            .map(|w| w.key.clone())
            .collect();
        if !conflicts.is_empty() {
            return Err(DirectoryError::Conflict { keys: conflicts });
        }
        if let Some(write) = writes.iter().find(|w| w.action == UpdateAction::Skip) {
            return Err(DirectoryError::InvalidAction(write.action));
        }

        for write in writes {
            entries.insert(write.key.clone(), write.entry.clone());
        }
        debug!("Applied {} directory write(s)", writes.len());
        Ok(())
    }
}

#[async_trait]
impl CrlStore for MemoryDirectory {
    async fn fetch_crl(
        &self,
        key: &CrlKey,
    ) -> std::result::Result<Option<RevocationList>, StoreError> {
        let entries = self.entries.read().await;
        let newest = entries
            .values()
            .filter_map(|entry| match entry {
                DirectoryEntry::Crl(crl) if CrlKey::for_crl(crl) == *key => Some(crl),
                _ => None,
            })
            .max_by(|a, b| {
                a.crl_number()
                    .cmp(&b.crl_number())
                    .then_with(|| a.this_update().cmp(&b.this_update()))
            });
        Ok(newest.cloned())
    }
}
