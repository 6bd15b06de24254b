//! Batch orchestration of an incoming record stream.
//!
//! Each batch is decoded, deduplicated, validated, diffed against the directory and then
//! written as one unit of work. A batch either commits as a whole or fails as a whole;
//! batches committed before a failure or a cancellation stay committed.

pub mod input;
pub mod summary;

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub use input::{CertificateData, CrlData, IngestRecord, MasterListData};
pub use summary::{BatchSummary, FileSummary, RecordFailure, ValidationCounts};

use crate::directory::{
    DifferentialUpdater, DirectoryEntry, DirectoryError, DirectoryStore, DirectoryWrite,
    DitScheme, UpdateAction,
};
use crate::domain::{
    Certificate, CertificateKind, CertificateStatus, CrlValidity, Fingerprint, MasterList,
    RevocationList,
};
use crate::events::{DeliveryPhase, EventBus, PipelineEvent};
use crate::pki::{
    CertificateRepository, ChainFailure, ChainStatus, CrlKey, LayeredRepository,
    MemoryCertificateRepository, RevocationChecker, RevocationStatus, TrustChainValidator,
    decode_certificate, decode_crl, decode_master_list,
};

/// Records per batch when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Description stored for certificates whose issuer is not loaded yet.
pub const CHAIN_PENDING: &str = "VALID: ISSUER_NOT_FOUND (chain pending)";

/// Retries of a unit of work after an ADD conflict.
const MAX_CONFLICT_RETRIES: usize = 1;

/// Cooperative cancellation, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one batch: its summary and every event emitted for it, in order.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub summary: BatchSummary,
    pub events: Vec<(PipelineEvent, DeliveryPhase)>,
}

#[derive(Debug)]
enum Decoded {
    Certificate(Certificate),
    Crl(RevocationList),
    MasterList(MasterList),
}

impl Decoded {
    fn fingerprint(&self) -> Fingerprint {
        match self {
            Self::Certificate(c) => c.fingerprint(),
            Self::Crl(crl) => crl.fingerprint(),
            Self::MasterList(ml) => ml.fingerprint(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Certificate(_) => "certificate",
            Self::Crl(_) => "CRL",
            Self::MasterList(_) => "master list",
        }
    }
}

/// A decoded record together with its position in the file's stream.
#[derive(Debug)]
struct Item {
    index: usize,
    record: Decoded,
}

/// A validated record ready to be diffed.
struct Prepared {
    index: usize,
    kind: &'static str,
    entry: DirectoryEntry,
}

/// Drives record streams through decode, validation, diff and write.
pub struct BatchOrchestrator {
    directory: Arc<dyn DirectoryStore>,
    updater: DifferentialUpdater,
    trust_anchors: MemoryCertificateRepository,
    revocation: Option<Arc<RevocationChecker>>,
    validator: TrustChainValidator,
    scheme: DitScheme,
    events: Arc<EventBus>,
    batch_size: usize,
}

impl BatchOrchestrator {
    /// `trust_anchors` receives every valid CSCA once its batch has committed, so later
    /// batches and files can chain to it.
    pub fn new(
        directory: Arc<dyn DirectoryStore>,
        trust_anchors: MemoryCertificateRepository,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            updater: DifferentialUpdater::new(Arc::clone(&directory)),
            directory,
            trust_anchors,
            revocation: None,
            validator: TrustChainValidator::new(),
            scheme: DitScheme::default(),
            events,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_revocation(mut self, checker: Arc<RevocationChecker>) -> Self {
        self.revocation = Some(checker);
        self
    }

    pub fn with_validator(mut self, validator: TrustChainValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_scheme(mut self, scheme: DitScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Processes a record stream batch by batch until it is drained or `cancel` is set.
    #[instrument(skip_all)]
    pub async fn process_file<I>(&self, records: I, cancel: &CancellationFlag) -> FileSummary
    where
        I: IntoIterator<Item = IngestRecord>,
        I::IntoIter: Send,
    {
        let file_id = Uuid::new_v4();
        let mut summary = FileSummary::new(file_id);
        let mut records = records.into_iter().enumerate();
        let mut batch_index = 0;

        loop {
            if cancel.is_cancelled() {
                warn!("File {file_id} cancelled after {batch_index} batch(es)");
                summary.cancelled = true;
                break;
            }
            let batch: Vec<(usize, IngestRecord)> =
                records.by_ref().take(self.batch_size).collect();
            if batch.is_empty() {
                break;
            }
            let outcome = self.process_batch(file_id, batch_index, batch).await;
            summary.absorb(&outcome.summary);
            batch_index += 1;
        }

        info!(
            "File {file_id} done: {} received, {} written, {} skipped, {} failed",
            summary.received, summary.success, summary.skipped, summary.failed
        );
        summary
    }

    /// Runs one batch as a single unit of work.
    ///
    /// Revocation events are published before the write; completion events only after
    /// it succeeded.
    #[instrument(skip_all, fields(file_id = %file_id, batch = batch_index))]
    pub async fn process_batch(
        &self,
        file_id: Uuid,
        batch_index: usize,
        records: Vec<(usize, IngestRecord)>,
    ) -> BatchOutcome {
        let mut summary = BatchSummary::new(batch_index, records.len());
        let mut events = Vec::new();

        let items = self.decode(records, &mut summary);
        let prepared = self.validate(items, &mut summary, &mut events).await;

        let mut writes: Vec<(usize, &'static str, DirectoryWrite)> = Vec::new();
        let mut valid_cscas = Vec::new();
        let mut crl_keys = Vec::new();
        for Prepared { index, kind, entry } in prepared {
            let key = match &entry {
                DirectoryEntry::Certificate { certificate, .. } => {
                    if certificate.kind() == CertificateKind::Csca
                        && certificate.status() == CertificateStatus::Valid
                    {
                        valid_cscas.push(certificate.clone());
                    }
                    self.scheme.certificate_key(certificate)
                }
                DirectoryEntry::Crl(crl) => {
                    crl_keys.push(CrlKey::for_crl(crl));
                    self.scheme.crl_key(crl)
                }
                DirectoryEntry::MasterList(ml) => self.scheme.master_list_key(ml),
            };

            let decision = match self.updater.decide(&key, &entry).await {
                Ok(decision) => decision,
                Err(e) => {
                    summary.fail(index, kind, e.to_string());
                    continue;
                }
            };
            if decision.action == UpdateAction::Skip {
                summary.skipped += 1;
                continue;
            }
            // Two records of one batch mapping to the same entry: the later one wins,
            // except that a CRL only supersedes a pending CRL with a lower number.
            if let Some(pos) = writes.iter().position(|(_, _, w)| w.key == key) {
                if let (DirectoryEntry::Crl(pending), DirectoryEntry::Crl(incoming)) =
                    (&writes[pos].2.entry, &entry)
                    && incoming.crl_number() <= pending.crl_number()
                {
                    debug!("{key} not newer than the pending CRL write");
                    summary.skipped += 1;
                    continue;
                }
                let (_, _, superseded) = writes.remove(pos);
                debug!("{} superseded within batch", superseded.key);
                summary.skipped += 1;
            }
            writes.push((
                index,
                kind,
                DirectoryWrite {
                    key,
                    action: decision.action,
                    entry,
                },
            ));
        }

        for (event, phase) in events.iter().filter(|(_, p)| *p == DeliveryPhase::BeforeCommit) {
            self.events.publish(event.clone(), *phase);
        }

        match self.commit(&writes).await {
            Ok(()) => {
                summary.success += writes.len();
                self.trust_anchors.extend(valid_cscas);
                if let Some(checker) = &self.revocation {
                    for key in &crl_keys {
                        checker.invalidate(key);
                    }
                }
            }
            Err(e) => {
                warn!("Batch {batch_index} not committed: {e}");
                for (index, kind, _) in &writes {
                    summary.fail(*index, *kind, e.to_string());
                }
                return BatchOutcome { summary, events };
            }
        }

        let completed = [
            PipelineEvent::BatchCompleted {
                file_id,
                batch_index,
                success: summary.success,
                skipped: summary.skipped,
                failed: summary.failed,
            },
            PipelineEvent::ValidationCompleted {
                file_id,
                certificates_valid: summary.validation.certificates_valid
                    + summary.validation.certificates_pending,
                certificates_invalid: summary.validation.certificates_invalid,
                crls_valid: summary.validation.crls_valid,
                crls_invalid: summary.validation.crls_invalid,
            },
        ];
        for event in completed {
            self.events.publish(event.clone(), DeliveryPhase::AfterCommit);
            events.push((event, DeliveryPhase::AfterCommit));
        }

        info!(
            "Batch {batch_index}: {} written, {} skipped, {} failed, {} duplicate(s)",
            summary.success, summary.skipped, summary.failed, summary.duplicates
        );
        BatchOutcome { summary, events }
    }

    /// Writes the unit of work. ADDs that raced with another writer become MODIFYs and
    /// the whole unit is retried.
    async fn commit(
        &self,
        writes: &[(usize, &'static str, DirectoryWrite)],
    ) -> Result<(), DirectoryError> {
        if writes.is_empty() {
            return Ok(());
        }
        let mut unit: Vec<DirectoryWrite> = writes.iter().map(|(_, _, w)| w.clone()).collect();
        let mut attempt = 0;
        loop {
            match self.directory.apply(&unit).await {
                Ok(()) => return Ok(()),
                Err(DirectoryError::Conflict { keys }) if attempt < MAX_CONFLICT_RETRIES => {
                    debug!("Retrying unit of work with {} conflicting ADD(s)", keys.len());
                    for write in unit.iter_mut().filter(|w| keys.contains(&w.key)) {
                        write.action = UpdateAction::Modify;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Decodes records, expanding master lists into their CSCAs, and drops duplicates.
    fn decode(&self, records: Vec<(usize, IngestRecord)>, summary: &mut BatchSummary) -> Vec<Item> {
        let mut items = Vec::with_capacity(records.len());
        let mut seen: HashSet<Fingerprint> = HashSet::new();
        let mut push = |item: Item, summary: &mut BatchSummary| {
            if seen.insert(item.record.fingerprint()) {
                items.push(item);
            } else {
                debug!("Duplicate {} at record {}", item.record.label(), item.index);
                summary.duplicates += 1;
            }
        };

        for (index, record) in records {
            let kind = record.label();
            if !record.parse_valid() {
                summary.fail(index, kind, "rejected by file parser");
                continue;
            }
            let decoded = match record {
                IngestRecord::Certificate(data) => decode_certificate(&data.der).map(|cert| {
                    match data.declared_kind {
                        Some(declared) => Decoded::Certificate(cert.with_kind(declared)),
                        None => Decoded::Certificate(cert),
                    }
                }),
                IngestRecord::Crl(data) => decode_crl(&data.der).map(Decoded::Crl),
                IngestRecord::MasterList(data) => {
                    decode_master_list(&data.cms).map(Decoded::MasterList)
                }
            };
            match decoded {
                Ok(Decoded::MasterList(ml)) => {
                    let cscas = ml.csca_certificates().to_vec();
                    push(
                        Item {
                            index,
                            record: Decoded::MasterList(ml),
                        },
                        summary,
                    );
                    for csca in cscas {
                        push(
                            Item {
                                index,
                                record: Decoded::Certificate(csca),
                            },
                            summary,
                        );
                    }
                }
                Ok(record) => push(Item { index, record }, summary),
                Err(e) => {
                    warn!("Record {index} ({kind}) failed to decode: {e}");
                    summary.fail(index, kind, e.to_string());
                }
            }
        }
        items
    }

    /// Classifies every decoded record. CSCAs of the batch are visible as issuers to
    /// the other records of the same batch.
    async fn validate(
        &self,
        items: Vec<Item>,
        summary: &mut BatchSummary,
        events: &mut Vec<(PipelineEvent, DeliveryPhase)>,
    ) -> Vec<Prepared> {
        let overlay = MemoryCertificateRepository::new();
        overlay.extend(items.iter().filter_map(|item| match &item.record {
            Decoded::Certificate(c) if c.kind() == CertificateKind::Csca => Some(c.clone()),
            _ => None,
        }));
        let lookup = LayeredRepository {
            overlay: &overlay,
            base: &self.trust_anchors,
        };

        // Signatures are checked before any CRL of the batch is trusted for revocation.
        let mut crl_checks: HashMap<usize, (CrlValidity, Option<RevocationList>)> =
            HashMap::new();
        let mut batch_crls: HashMap<CrlKey, &RevocationList> = HashMap::new();
        for (position, item) in items.iter().enumerate() {
            let Decoded::Crl(crl) = &item.record else {
                continue;
            };
            let validity = self.crl_validity(crl, &lookup);
            let stored = self.stored_crl(crl).await;
            if validity == CrlValidity::Valid
                && stored
                    .as_ref()
                    .is_none_or(|stored| crl.crl_number() > stored.crl_number())
            {
                let key = CrlKey::for_crl(crl);
                let newer = batch_crls
                    .get(&key)
                    .is_none_or(|held| crl.crl_number() > held.crl_number());
                if newer {
                    batch_crls.insert(key, crl);
                }
            }
            crl_checks.insert(position, (validity, stored));
        }

        let mut prepared = Vec::with_capacity(items.len());
        for (position, item) in items.iter().enumerate() {
            let entry = match &item.record {
                Decoded::Certificate(cert) => {
                    let (certificate, description) = self
                        .classify_certificate(cert, &lookup, &batch_crls, summary, events)
                        .await;
                    DirectoryEntry::Certificate {
                        certificate,
                        description,
                    }
                }
                Decoded::Crl(crl) => {
                    let (validity, stored) = crl_checks
                        .remove(&position)
                        .unwrap_or((CrlValidity::Unverified, None));
                    match validity {
                        CrlValidity::Valid => summary.validation.crls_valid += 1,
                        CrlValidity::Invalid => summary.validation.crls_invalid += 1,
                        CrlValidity::Unverified => summary.validation.crls_unverified += 1,
                    }
                    if validity == CrlValidity::Invalid
                        && stored.is_some_and(|stored| stored.validity() != CrlValidity::Invalid)
                    {
                        warn!("Keeping stored CRL of {} over an invalid one", crl.issuer());
                        summary.skipped += 1;
                        continue;
                    }
                    DirectoryEntry::Crl(crl.clone().with_validity(validity))
                }
                Decoded::MasterList(ml) => {
                    summary.validation.master_lists += 1;
                    if !ml.signature_valid() {
                        warn!("Master list from {} has an unverified signature", ml.signer());
                        summary.validation.master_lists_unverified += 1;
                    }
                    DirectoryEntry::MasterList(ml.clone())
                }
            };
            prepared.push(Prepared {
                index: item.index,
                kind: item.record.label(),
                entry,
            });
        }
        prepared
    }

    async fn classify_certificate(
        &self,
        cert: &Certificate,
        lookup: &dyn CertificateRepository,
        batch_crls: &HashMap<CrlKey, &RevocationList>,
        summary: &mut BatchSummary,
        events: &mut Vec<(PipelineEvent, DeliveryPhase)>,
    ) -> (Certificate, String) {
        let chain = if cert.kind() == CertificateKind::Csca && cert.is_self_issued() {
            self.validator.validate_self_signed(cert)
        } else {
            self.validator.build_path(cert, lookup)
        };

        let pending = matches!(chain, ChainStatus::IssuerNotFound(_));
        let mut status = match &chain {
            ChainStatus::SelfSignedValid | ChainStatus::ChainValid(_) => CertificateStatus::Valid,
            ChainStatus::IssuerNotFound(_) if cert.validity().contains(self.validator.now()) => {
                CertificateStatus::Valid
            }
            ChainStatus::IssuerNotFound(_) => CertificateStatus::Expired,
            ChainStatus::SelfSignedInvalid(failure) | ChainStatus::ChainInvalid(failure) => {
                status_for_failure(failure)
            }
            ChainStatus::Unvalidated => CertificateStatus::Invalid,
        };

        let mut description = if pending && status == CertificateStatus::Valid {
            CHAIN_PENDING.to_string()
        } else {
            format!("{}: {chain}", status.as_str())
        };

        if status == CertificateStatus::Valid
            && cert.kind() != CertificateKind::Csca
            && let Some(checker) = &self.revocation
        {
            let revocation = match batch_crls.get(&CrlKey::for_certificate(cert)) {
                Some(crl) => checker.evaluate(crl, cert),
                None => checker.check_revocation(cert).await,
            };
            if let RevocationStatus::Revoked {
                serial_number,
                revoked_at,
                reason,
            } = &revocation
            {
                warn!("Certificate {} is revoked", cert.subject());
                status = CertificateStatus::Revoked;
                description = format!("{}: {chain}", status.as_str());
                events.push((
                    PipelineEvent::RevocationDetected {
                        certificate: cert.fingerprint(),
                        serial_number: serial_number.clone(),
                        reason: *reason,
                        revoked_at: *revoked_at,
                        detected_at: Utc::now(),
                    },
                    DeliveryPhase::BeforeCommit,
                ));
            }
        }

        match status {
            CertificateStatus::Valid if pending => summary.validation.certificates_pending += 1,
            CertificateStatus::Valid => summary.validation.certificates_valid += 1,
            _ => summary.validation.certificates_invalid += 1,
        }
        (cert.clone().with_status(status), description)
    }

    async fn stored_crl(&self, crl: &RevocationList) -> Option<RevocationList> {
        match self.directory.fetch(&self.scheme.crl_key(crl)).await {
            Ok(Some(DirectoryEntry::Crl(stored))) => Some(stored),
            Ok(_) => None,
            Err(e) => {
                warn!("Cannot read stored CRL of {}: {e}", crl.issuer());
                None
            }
        }
    }

    fn crl_validity(&self, crl: &RevocationList, lookup: &dyn CertificateRepository) -> CrlValidity {
        let issuers = lookup.find_issuers(crl.issuer());
        if issuers.is_empty() {
            return CrlValidity::Unverified;
        }
        if issuers
            .iter()
            .any(|issuer| self.validator.validate_crl(crl, issuer).is_ok())
        {
            CrlValidity::Valid
        } else {
            warn!("CRL from {} failed signature verification", crl.issuer());
            CrlValidity::Invalid
        }
    }
}

fn status_for_failure(failure: &ChainFailure) -> CertificateStatus {
    match failure {
        ChainFailure::ExpiredCertificate | ChainFailure::NotYetValidOrExpired => {
            CertificateStatus::Expired
        }
        _ => CertificateStatus::Invalid,
    }
}
