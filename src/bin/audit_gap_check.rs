//! Check how long each tenant has gone without a successful export.
//!
//! Exit codes: 0 no gaps, 2 at least one gap over threshold, 1 failure.

use std::process::ExitCode;
use std::sync::Arc;

use stampguard_lib::audit::export::SqliteAuditExportRepository;
use stampguard_lib::audit::monitor::{AuditExportGapMonitor, GapSummary, WebhookAlertHook};
use stampguard_lib::clock::system_clock;
use stampguard_lib::config::{GapCheckConfig, GuardConfig, APP_VERSION};
use stampguard_lib::db::Database;
use stampguard_lib::metrics::GapCounter;

fn main() -> ExitCode {
    stampguard_lib::init_tracing();
    tracing::info!("audit-gap-check starting v{APP_VERSION}");

    match run() {
        Ok(summary) => {
            if let Ok(json) = serde_json::to_string(&summary) {
                println!("{json}");
            }
            if summary.gap_events > 0 {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Audit gap check failed");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<GapSummary, Box<dyn std::error::Error>> {
    let guard = GuardConfig::from_env()?;
    let config = GapCheckConfig::from_env()?;
    let db = Arc::new(Database::open(&guard.db_path)?);

    let mut monitor = AuditExportGapMonitor::new(
        Arc::new(SqliteAuditExportRepository::new(db)),
        system_clock(),
        Arc::new(GapCounter::new()),
        config.gap_minutes,
    )
    .with_tenants(config.tenants);
    if let Some(url) = config.webhook_url {
        monitor = monitor.with_alert_hook(Arc::new(WebhookAlertHook::new(url)?));
    }
    Ok(monitor.check()?)
}
