use serde::Serialize;

use super::certificate::{Certificate, RecordError};

/// Ordered certificates from the leaf up to the anchor.
///
/// Never empty, and the issuer of each element names the subject of the next one.
/// Signature checks are done by the chain validator before a path is assembled.
#[derive(Debug, Clone, Serialize)]
pub struct TrustPath(Vec<Certificate>);

impl TrustPath {
    pub fn new(certificates: Vec<Certificate>) -> Result<Self, RecordError> {
        if certificates.is_empty() {
            return Err(RecordError::EmptyPath);
        }
        if let Some(position) = certificates
            .windows(2)
            .position(|pair| !pair[0].issuer().matches(pair[1].subject()))
        {
            return Err(RecordError::BrokenPath(position));
        }
        Ok(Self(certificates))
    }

    pub fn leaf(&self) -> &Certificate {
        &self.0[0]
    }

    pub fn anchor(&self) -> &Certificate {
        &self.0[self.0.len() - 1]
    }

    /// Whether the last element is self-issued.
    pub fn is_anchored(&self) -> bool {
        self.anchor().is_self_issued()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.0
    }
}
