//! Export freshness checks.
//!
//! A tenant with at least one WORM event whose last successful export is
//! older than the threshold (or which was never exported) raises a gap event:
//! the gap counter is incremented, an error is logged and the alert hook is
//! invoked once for that tenant in this check.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::export::{AuditExportRepository, ExportError};
use super::worm::format_ts;
use crate::clock::Clock;
use crate::metrics::GapCounter;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Alert webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Alert webhook returned status {status}")]
    Rejected { status: u16 },
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Alert(#[from] AlertError),
}

/// Payload delivered to the alert hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GapAlert {
    pub tenant_id: String,
    /// `None` when the tenant has never been exported.
    pub gap_seconds: Option<i64>,
    pub last_success_at: Option<String>,
    pub checked_at: String,
    pub correlation_id: String,
}

pub trait AlertHook: Send + Sync {
    fn send(&self, alert: &GapAlert) -> Result<(), AlertError>;
}

/// `POST`s the alert as JSON. Any non-2xx response is an error.
pub struct WebhookAlertHook {
    url: String,
    client: reqwest::blocking::Client,
}

impl WebhookAlertHook {
    pub fn new(url: impl Into<String>) -> Result<Self, AlertError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl AlertHook for WebhookAlertHook {
    fn send(&self, alert: &GapAlert) -> Result<(), AlertError> {
        let response = self.client.post(&self.url).json(alert).send()?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), correlation_id = %alert.correlation_id, "Alert webhook rejected");
            return Err(AlertError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GapSummary {
    pub gap_events: usize,
    /// Largest finite gap among tenants over the threshold.
    pub worst_gap_seconds: Option<i64>,
    pub never_exported: usize,
    pub tenants_checked: usize,
}

pub struct AuditExportGapMonitor {
    repo: Arc<dyn AuditExportRepository>,
    clock: Arc<dyn Clock>,
    counter: Arc<GapCounter>,
    alert_hook: Option<Arc<dyn AlertHook>>,
    threshold_secs: i64,
    tenants: Option<Vec<String>>,
}

impl AuditExportGapMonitor {
    pub fn new(
        repo: Arc<dyn AuditExportRepository>,
        clock: Arc<dyn Clock>,
        counter: Arc<GapCounter>,
        gap_minutes: i64,
    ) -> Self {
        Self {
            repo,
            clock,
            counter,
            alert_hook: None,
            threshold_secs: gap_minutes.saturating_mul(60).max(1),
            tenants: None,
        }
    }

    pub fn with_alert_hook(mut self, hook: Arc<dyn AlertHook>) -> Self {
        self.alert_hook = Some(hook);
        self
    }

    pub fn with_tenants(mut self, tenants: Option<Vec<String>>) -> Self {
        self.tenants = tenants;
        self
    }

    pub fn threshold_secs(&self) -> i64 {
        self.threshold_secs
    }

    /// Check every tenant once. Fails on the first repository or alert error.
    pub fn check(&self) -> Result<GapSummary, MonitorError> {
        let tenants = match &self.tenants {
            Some(tenants) => tenants.clone(),
            None => self.repo.list_tenants()?,
        };
        let mut summary = GapSummary::default();

        for tenant_id in &tenants {
            if self.repo.max_seq(tenant_id)? == 0 {
                continue;
            }
            summary.tenants_checked += 1;

            let checked_at = self.clock.now();
            let last_success_at = self
                .repo
                .progress(tenant_id)?
                .last_exported_at
                .and_then(|ts| parse_ts(&ts));
            let gap_seconds = last_success_at.map(|at| (checked_at - at).num_seconds());

            let over = gap_seconds.map_or(true, |gap| gap > self.threshold_secs);
            if !over {
                tracing::info!(tenant_id = %tenant_id, gap_seconds, "Audit export gap ok");
                continue;
            }

            summary.gap_events += 1;
            match gap_seconds {
                Some(gap) => {
                    summary.worst_gap_seconds = Some(summary.worst_gap_seconds.map_or(gap, |w| w.max(gap)))
                }
                None => summary.never_exported += 1,
            }
            self.counter.increment();

            let alert = GapAlert {
                tenant_id: tenant_id.clone(),
                gap_seconds,
                last_success_at: last_success_at.map(format_ts),
                checked_at: format_ts(checked_at),
                correlation_id: Uuid::new_v4().to_string(),
            };
            tracing::error!(
                tenant_id = %tenant_id,
                gap_seconds,
                threshold_secs = self.threshold_secs,
                correlation_id = %alert.correlation_id,
                "Audit export gap exceeded"
            );
            if let Some(hook) = &self.alert_hook {
                hook.send(&alert)?;
            }
        }

        Ok(summary)
    }
}

fn parse_ts(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::export::{AuditExportJob, ExportOptions, SqliteAuditExportRepository};
    use crate::audit::signer::ManifestSigner;
    use crate::audit::storage::MemoryObjectStorage;
    use crate::audit::{AuditEvent, SqliteWormWriter, WormAuditWriter};
    use crate::clock::FixedClock;
    use crate::db::Database;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use ed25519_dalek::SigningKey;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHook {
        alerts: Mutex<Vec<GapAlert>>,
    }

    impl AlertHook for RecordingHook {
        fn send(&self, alert: &GapAlert) -> Result<(), AlertError> {
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    struct RejectingHook;

    impl AlertHook for RejectingHook {
        fn send(&self, _alert: &GapAlert) -> Result<(), AlertError> {
            Err(AlertError::Rejected { status: 500 })
        }
    }

    struct Fixture {
        db: Arc<Database>,
        clock: FixedClock,
        counter: Arc<GapCounter>,
        hook: Arc<RecordingHook>,
    }

    fn fixture() -> Fixture {
        Fixture {
            db: Arc::new(Database::open_in_memory().unwrap()),
            clock: FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()),
            counter: Arc::new(GapCounter::new()),
            hook: Arc::new(RecordingHook::default()),
        }
    }

    fn repo(f: &Fixture) -> Arc<dyn AuditExportRepository> {
        Arc::new(SqliteAuditExportRepository::new(f.db.clone()))
    }

    fn append_and_export(f: &Fixture, tenant: &str, n: usize) {
        let writer = SqliteWormWriter::new(f.db.clone());
        for _ in 0..n {
            writer
                .append(tenant, &AuditEvent::new(f.clock.now(), "stamp.claim", "ok"))
                .unwrap();
        }
        AuditExportJob::new(
            repo(f),
            Arc::new(MemoryObjectStorage::new()),
            ManifestSigner::new("k1", SigningKey::from_bytes(&[5u8; 32])),
            Arc::new(f.clock.clone()),
            ExportOptions {
                base_prefix: "audit".into(),
                batch_size: 500,
                schema_version: "1".into(),
                tenants: None,
            },
        )
        .run()
        .unwrap();
    }

    fn monitor(f: &Fixture) -> AuditExportGapMonitor {
        AuditExportGapMonitor::new(repo(f), Arc::new(f.clock.clone()), f.counter.clone(), 15)
            .with_alert_hook(f.hook.clone())
    }

    #[test]
    fn fresh_export_has_no_gap_then_stale_export_has_one() {
        let f = fixture();
        append_and_export(&f, "t1", 3);

        let fresh = monitor(&f).check().unwrap();
        assert_eq!(fresh.gap_events, 0);
        assert_eq!(fresh.tenants_checked, 1);

        f.clock.advance(ChronoDuration::minutes(15));
        assert_eq!(monitor(&f).check().unwrap().gap_events, 0);

        f.clock.advance(ChronoDuration::seconds(1));
        let stale = monitor(&f).check().unwrap();
        assert_eq!(stale.gap_events, 1);
        assert_eq!(stale.worst_gap_seconds, Some(15 * 60 + 1));
        assert_eq!(f.counter.value(), 1);

        let alerts = f.hook.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].tenant_id, "t1");
        assert_eq!(alerts[0].gap_seconds, Some(901));
        assert_eq!(alerts[0].last_success_at.as_deref(), Some("2026-03-01T12:00:00.000Z"));
        assert_eq!(alerts[0].checked_at, "2026-03-01T12:15:01.000Z");
    }

    #[test]
    fn never_exported_tenant_is_an_infinite_gap() {
        let f = fixture();
        SqliteWormWriter::new(f.db.clone())
            .append("t2", &AuditEvent::new(f.clock.now(), "stamp.claim", "ok"))
            .unwrap();

        let summary = monitor(&f).check().unwrap();
        assert_eq!(summary.gap_events, 1);
        assert_eq!(summary.never_exported, 1);
        assert_eq!(summary.worst_gap_seconds, None);
        assert_eq!(f.hook.alerts.lock().unwrap()[0].gap_seconds, None);
    }

    #[test]
    fn tenants_without_events_are_skipped() {
        let f = fixture();
        let summary = monitor(&f)
            .with_tenants(Some(vec!["ghost".into()]))
            .check()
            .unwrap();
        assert_eq!(summary, GapSummary::default());
    }

    #[test]
    fn rejected_alert_fails_the_check() {
        let f = fixture();
        SqliteWormWriter::new(f.db.clone())
            .append("t1", &AuditEvent::new(f.clock.now(), "stamp.claim", "ok"))
            .unwrap();
        let result = AuditExportGapMonitor::new(repo(&f), Arc::new(f.clock.clone()), f.counter.clone(), 15)
            .with_alert_hook(Arc::new(RejectingHook))
            .check();
        assert!(matches!(result, Err(MonitorError::Alert(AlertError::Rejected { status: 500 }))));
    }

    #[test]
    fn alert_serializes_camel_case() {
        let alert = GapAlert {
            tenant_id: "t1".into(),
            gap_seconds: Some(901),
            last_success_at: None,
            checked_at: "2026-03-01T12:15:01.000Z".into(),
            correlation_id: "c1".into(),
        };
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["tenantId"], "t1");
        assert_eq!(json["gapSeconds"], 901);
        assert!(json["lastSuccessAt"].is_null());
        assert_eq!(json["correlationId"], "c1");
    }

    #[test]
    fn threshold_has_a_floor_of_one_second() {
        let f = fixture();
        assert_eq!(
            AuditExportGapMonitor::new(repo(&f), Arc::new(f.clock.clone()), f.counter.clone(), 0).threshold_secs(),
            1
        );
    }
}
