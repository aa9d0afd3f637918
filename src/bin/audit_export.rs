//! Export unexported WORM ranges as signed bundles.
//!
//! Exit codes: 0 success, 1 configuration or export failure.

use std::process::ExitCode;
use std::sync::Arc;

use stampguard_lib::audit::export::{AuditExportJob, ExportOptions, SqliteAuditExportRepository};
use stampguard_lib::audit::signer::ManifestSigner;
use stampguard_lib::audit::storage::{FileSystemObjectStorage, ObjectStorage, S3ObjectStorage};
use stampguard_lib::clock::system_clock;
use stampguard_lib::config::{ExportJobConfig, ExportTarget, GuardConfig, APP_VERSION};
use stampguard_lib::db::Database;

fn main() -> ExitCode {
    stampguard_lib::init_tracing();
    tracing::info!("audit-export starting v{APP_VERSION}");

    match run() {
        Ok(summary) => {
            tracing::info!(
                exported_tenants = summary.exported_tenants,
                exported_runs = summary.exported_runs,
                "Audit export finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Audit export failed");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<stampguard_lib::audit::export::ExportSummary, Box<dyn std::error::Error>> {
    let guard = GuardConfig::from_env()?;
    let config = ExportJobConfig::from_env()?;
    let db = Arc::new(Database::open(&guard.db_path)?);

    let storage: Arc<dyn ObjectStorage> = match config.target {
        ExportTarget::S3(s3) => Arc::new(S3ObjectStorage::new(s3)?),
        ExportTarget::Directory(dir) => Arc::new(FileSystemObjectStorage::new(dir)),
    };
    let signer = ManifestSigner::from_encoded(config.key_id, &config.private_key)?;
    let options = ExportOptions {
        base_prefix: config.base_prefix,
        batch_size: config.batch_size,
        schema_version: config.schema_version,
        tenants: config.tenants,
    };

    let job = AuditExportJob::new(
        Arc::new(SqliteAuditExportRepository::new(db)),
        storage,
        signer,
        system_clock(),
        options,
    );
    Ok(job.run()?)
}
