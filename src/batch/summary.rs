use serde::Serialize;
use uuid::Uuid;

/// Validation outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValidationCounts {
    pub certificates_valid: usize,
    pub certificates_invalid: usize,
    /// Valid so far, issuer not yet loaded
    pub certificates_pending: usize,
    pub crls_valid: usize,
    pub crls_invalid: usize,
    pub crls_unverified: usize,
    pub master_lists: usize,
    pub master_lists_unverified: usize,
}

impl ValidationCounts {
    fn absorb(&mut self, other: &ValidationCounts) {
        self.certificates_valid += other.certificates_valid;
        self.certificates_invalid += other.certificates_invalid;
        self.certificates_pending += other.certificates_pending;
        self.crls_valid += other.crls_valid;
        self.crls_invalid += other.crls_invalid;
        self.crls_unverified += other.crls_unverified;
        self.master_lists += other.master_lists;
        self.master_lists_unverified += other.master_lists_unverified;
    }
}

/// A record that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    /// Position of the record in the file's stream
    pub index: usize,
    pub kind: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub batch_index: usize,
    pub received: usize,
    /// Written to the directory (ADD or MODIFY)
    pub success: usize,
    /// Identical to the stored entry
    pub skipped: usize,
    pub failed: usize,
    /// Dropped within the batch because an identical fingerprint came first
    pub duplicates: usize,
    pub validation: ValidationCounts,
    pub failures: Vec<RecordFailure>,
}

impl BatchSummary {
    pub fn new(batch_index: usize, received: usize) -> Self {
        Self {
            batch_index,
            received,
            ..Self::default()
        }
    }

    pub(crate) fn fail(&mut self, index: usize, kind: &'static str, reason: impl Into<String>) {
        self.failed += 1;
        self.failures.push(RecordFailure {
            index,
            kind,
            reason: reason.into(),
        });
    }
}

/// Cumulative summary of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub file_id: Uuid,
    pub batches: usize,
    pub received: usize,
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duplicates: usize,
    pub validation: ValidationCounts,
    pub failures: Vec<RecordFailure>,
    /// Processing stopped early; committed batches are kept
    pub cancelled: bool,
}

impl FileSummary {
    pub fn new(file_id: Uuid) -> Self {
        Self {
            file_id,
            batches: 0,
            received: 0,
            success: 0,
            skipped: 0,
            failed: 0,
            duplicates: 0,
            validation: ValidationCounts::default(),
            failures: Vec::new(),
            cancelled: false,
        }
    }

    pub fn absorb(&mut self, batch: &BatchSummary) {
        self.batches += 1;
        self.received += batch.received;
        self.success += batch.success;
        self.skipped += batch.skipped;
        self.failed += batch.failed;
        self.duplicates += batch.duplicates;
        self.validation.absorb(&batch.validation);
        self.failures.extend(batch.failures.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_summary_accumulates_batches() {
        let mut file = FileSummary::new(Uuid::new_v4());

        let mut first = BatchSummary::new(0, 3);
        first.success = 2;
        first.fail(2, "certificate", "truncated");
        first.validation.certificates_valid = 2;

        let mut second = BatchSummary::new(1, 2);
        second.skipped = 1;
        second.duplicates = 1;
        second.validation.crls_valid = 1;

        file.absorb(&first);
        file.absorb(&second);

        assert_eq!(file.batches, 2);
        assert_eq!(file.received, 5);
        assert_eq!(file.success, 2);
        assert_eq!(file.skipped, 1);
        assert_eq!(file.failed, 1);
        assert_eq!(file.duplicates, 1);
        assert_eq!(file.validation.certificates_valid, 2);
        assert_eq!(file.validation.crls_valid, 1);
        assert_eq!(file.failures.len(), 1);
    }
}
