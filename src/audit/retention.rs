//! Retention pruning of WORM rows.
//!
//! Only rows that are both older than the retention period and covered by the
//! tenant's contiguous export watermark are removed, so rows of a failed range
//! stay even when later ranges were exported. Chain state rows are kept, so
//! appends continue from the same tail after pruning.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;

use super::worm::format_ts;
use super::AuditError;
use crate::clock::Clock;
use crate::db::{repository, Database};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionSummary {
    pub tenants_checked: usize,
    pub rows_deleted: usize,
    pub cutoff: String,
}

pub struct AuditRetentionJob {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    retention_days: i64,
}

impl AuditRetentionJob {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, retention_days: i64) -> Self {
        Self {
            db,
            clock,
            retention_days: retention_days.max(1),
        }
    }

    pub fn run(&self) -> Result<RetentionSummary, AuditError> {
        let cutoff = format_ts(self.clock.now() - Duration::days(self.retention_days));
        let tenants = self.db.with_conn(repository::list_audit_tenants)?;
        let mut summary = RetentionSummary {
            tenants_checked: tenants.len(),
            rows_deleted: 0,
            cutoff: cutoff.clone(),
        };

        for tenant_id in &tenants {
            let exported_to = self
                .db
                .with_conn(|conn| repository::get_export_progress(conn, tenant_id))?
                .exported_through;
            if exported_to == 0 {
                tracing::info!(tenant_id = %tenant_id, "Retention skipped, nothing exported yet");
                continue;
            }
            let deleted = self.db.with_conn(|conn| {
                repository::delete_worm_rows_before(conn, tenant_id, &cutoff, exported_to)
            })?;
            if deleted > 0 {
                tracing::info!(tenant_id = %tenant_id, deleted, exported_to, cutoff = %cutoff, "WORM rows pruned");
            }
            summary.rows_deleted += deleted;
        }

        Ok(summary)
    }
}
