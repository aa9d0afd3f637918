//! Prune exported WORM rows older than the retention period.
//!
//! Exit codes: 0 success, 1 failure.

use std::process::ExitCode;
use std::sync::Arc;

use stampguard_lib::audit::retention::{AuditRetentionJob, RetentionSummary};
use stampguard_lib::clock::system_clock;
use stampguard_lib::config::{GuardConfig, RetentionConfig, APP_VERSION};
use stampguard_lib::db::Database;

fn main() -> ExitCode {
    stampguard_lib::init_tracing();
    tracing::info!("audit-retention starting v{APP_VERSION}");

    match run() {
        Ok(summary) => {
            tracing::info!(
                tenants_checked = summary.tenants_checked,
                rows_deleted = summary.rows_deleted,
                cutoff = %summary.cutoff,
                "Audit retention finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Audit retention failed");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<RetentionSummary, Box<dyn std::error::Error>> {
    let guard = GuardConfig::from_env()?;
    let config = RetentionConfig::from_env()?;
    let db = Arc::new(Database::open(&guard.db_path)?);
    let job = AuditRetentionJob::new(db, system_clock(), config.retention_days);
    Ok(job.run()?)
}
