use std::{collections::BTreeMap, path::Path, sync::Arc};

use color_eyre::eyre::{WrapErr, eyre};
use pkd_engine::{
    batch::{BatchOrchestrator, CancellationFlag, CertificateData, CrlData, IngestRecord, MasterListData},
    config::Config,
    directory::{DirectoryStore, DitScheme, MemoryDirectory},
    events::{EventBus, EventEnvelope},
    pki::{
        CertificateRepository, CrlStore, MemoryCertificateRepository, PassiveAuthOptions,
        PassiveAuthenticator, RevocationChecker,
    },
    telemetry,
};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    telemetry::init_tracing();

    let config = Config::load()?;
    info!("Loaded configuration: {:?}", config);

    let records = read_records(&config.ingest.path)
        .await
        .wrap_err_with(|| format!("Cannot read {}", config.ingest.path.display()))?;
    if records.is_empty() {
        return Err(eyre!(
            "No certificate, CRL or master list files in {}",
            config.ingest.path.display()
        ));
    }

    let directory = MemoryDirectory::new();
    let trust_anchors = MemoryCertificateRepository::new();
    let events = Arc::new(EventBus::new());
    events.add_listener(Arc::new(|envelope: &EventEnvelope| {
        debug!("{:?} {:?}", envelope.phase, envelope.event);
    }));

    let mut authenticator = PassiveAuthenticator::new(
        Arc::new(trust_anchors.clone()) as Arc<dyn CertificateRepository>
    );
    let mut orchestrator = BatchOrchestrator::new(
        Arc::new(directory.clone()) as Arc<dyn DirectoryStore>,
        trust_anchors.clone(),
        Arc::clone(&events),
    )
    .with_batch_size(config.engine.batch_size)
    .with_scheme(DitScheme::new(config.engine.base_dn.clone()));
    if config.revocation.enabled {
        let checker = RevocationChecker::new(Arc::new(directory.clone()) as Arc<dyn CrlStore>)
            .with_hot_ttl(config.revocation.hot_ttl())
            .with_issuers(Arc::new(trust_anchors) as Arc<dyn CertificateRepository>);
        let checker = Arc::new(checker);
        authenticator = authenticator.with_revocation(Arc::clone(&checker));
        orchestrator = orchestrator.with_revocation(checker);
    }

    let cancel = CancellationFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current batch");
            on_signal.cancel();
        }
    });

    let summary = orchestrator.process_file(records, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    info!("Directory holds {} entries", directory.len().await);

    verify_documents(
        &config.ingest.path,
        &authenticator,
        &config.passive_auth.options(),
    )
    .await
    .wrap_err("Passive authentication of ingested documents failed")?;
    Ok(())
}

/// Verifies every `<name>.sod` under `dir` against the data groups stored beside it as
/// `<name>.dg1`, `<name>.dg2` and so on.
async fn verify_documents(
    dir: &Path,
    authenticator: &PassiveAuthenticator,
    options: &PassiveAuthOptions,
) -> color_eyre::Result<()> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    for sod_path in files.iter().filter(|p| has_extension(p, "sod")) {
        let Some(stem) = sod_path.file_stem() else {
            continue;
        };
        let mut data_groups = BTreeMap::new();
        for path in files.iter().filter(|p| p.file_stem() == Some(stem)) {
            let number = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(|e| e.to_ascii_lowercase().strip_prefix("dg")?.parse::<u8>().ok());
            if let Some(number) = number {
                data_groups.insert(number, tokio::fs::read(path).await?);
            }
        }

        let sod = tokio::fs::read(sod_path).await?;
        let record = authenticator.verify(&sod, &data_groups, options).await;
        println!(
            "{}: {}",
            sod_path.display(),
            serde_json::to_string(&record)?
        );
    }
    Ok(())
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// Reads every recognised file under `dir`, sorted by name so runs are repeatable.
async fn read_records(dir: &Path) -> color_eyre::Result<Vec<IngestRecord>> {
    let mut paths = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();

    let mut records = Vec::with_capacity(paths.len());
    for path in paths {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let Some(extension) = extension else {
            continue;
        };
        let record = match extension.as_str() {
            "der" | "cer" | "crt" => IngestRecord::Certificate(CertificateData::new(
                tokio::fs::read(&path).await?,
            )),
            "crl" => IngestRecord::Crl(CrlData::new(tokio::fs::read(&path).await?)),
            "ml" | "p7s" | "p7b" => {
                IngestRecord::MasterList(MasterListData::new(tokio::fs::read(&path).await?))
            }
            _ => {
                debug!("Ignoring {}", path.display());
                continue;
            }
        };
        records.push(record);
    }
    info!("Read {} record(s) from {}", records.len(), dir.display());
    Ok(records)
}
