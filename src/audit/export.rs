//! Signed, immutable export bundles of WORM chain ranges.
//!
//! Each run covers a contiguous `[from_seq, to_seq]` range of one tenant and
//! writes three objects under
//! `{prefix}/tenant={id}/date={YYYY-MM-DD}/from_{a}_to_{b}/`:
//!
//! - `events.ndjson`: one canonical JSON row per line, no trailing newline
//! - `meta.json`: the canonical [`ExportManifest`]
//! - `meta.sig`: base64 Ed25519 signature over the `meta.json` bytes

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::signer::{ManifestSigner, FINGERPRINT_ALG, SIGNATURE_ALG, SIG_FORMAT};
use super::storage::{ObjectStorage, StorageError};
use super::worm::{format_ts, verify_chain};
use crate::canonical::{sha256_hex, to_canonical_bytes, to_canonical_string};
use crate::clock::Clock;
use crate::config::EXPORT_RUN_STALE_SECS;
use crate::db::repository::{self, ExportProgress, WormRow};
use crate::db::{Database, DatabaseError};

pub const EVENTS_OBJECT: &str = "events.ndjson";
pub const META_OBJECT: &str = "meta.json";
pub const SIG_OBJECT: &str = "meta.sig";
pub const HASH_ALG: &str = "sha256";
pub const EXPORT_FAILED: &str = "EXPORT_FAILED";
pub const EXPORT_ABANDONED: &str = "EXPORT_ABANDONED";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Export database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Export storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Export serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Range {from_seq}..={to_seq} of tenant {tenant_id} is incomplete")]
    IncompleteRange {
        tenant_id: String,
        from_seq: i64,
        to_seq: i64,
    },

    #[error("Chain verification failed for tenant {tenant_id} at seq {seq}")]
    ChainInvalid { tenant_id: String, seq: i64 },
}

impl ExportError {
    /// Fixed message recorded on a failed run. Never carries driver or
    /// storage text, which may include row content.
    pub fn sanitized_message(&self) -> &'static str {
        match self {
            ExportError::Database(_) => "database error while exporting range",
            ExportError::Storage(StorageError::AlreadyExists(_)) => "export object already exists",
            ExportError::Storage(_) => "object storage upload failed",
            ExportError::Serialization(_) => "export serialization failed",
            ExportError::IncompleteRange { .. } => "export range has missing rows",
            ExportError::ChainInvalid { .. } => "export range failed chain verification",
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Manifest
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsArtifact {
    pub sha256: String,
    pub bytes: u64,
    pub lines: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestArtifacts {
    pub events: EventsArtifact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestChain {
    pub start_prev_hash: String,
    pub end_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSignature {
    pub alg: String,
    pub sig_format: String,
    pub key_id: String,
    pub public_key_fingerprint_sha256: String,
    pub fingerprint_alg: String,
}

/// Contents of `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub schema_version: String,
    pub tenant_id: String,
    pub from_seq: i64,
    pub to_seq: i64,
    pub exported_at: String,
    pub record_count: u64,
    pub hash_alg: String,
    pub artifacts: ManifestArtifacts,
    pub chain: ManifestChain,
    pub signature: ManifestSignature,
}

/// `sha256`, byte length and line count of an NDJSON body. An empty body has
/// zero lines; otherwise lines = separators + 1.
pub fn events_artifact(ndjson: &[u8]) -> EventsArtifact {
    let lines = if ndjson.is_empty() {
        0
    } else {
        ndjson.iter().filter(|b| **b == b'\n').count() as u64 + 1
    };
    EventsArtifact {
        sha256: sha256_hex(ndjson),
        bytes: ndjson.len() as u64,
        lines,
    }
}

pub fn build_ndjson(rows: &[WormRow]) -> Result<String, serde_json::Error> {
    let lines = rows
        .iter()
        .map(to_canonical_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines.join("\n"))
}

/// `{prefix}/tenant={id}/date={YYYY-MM-DD}/from_{a}_to_{b}`
pub fn bundle_key(base_prefix: &str, tenant_id: &str, exported_at: &str, from_seq: i64, to_seq: i64) -> String {
    let base = base_prefix.trim_end_matches('/');
    let date = exported_at.get(..10).unwrap_or(exported_at);
    format!("{base}/tenant={tenant_id}/date={date}/from_{from_seq}_to_{to_seq}")
}

// ═══════════════════════════════════════════════════════════
// Repository
// ═══════════════════════════════════════════════════════════

/// Persistence the export job and gap monitor need.
pub trait AuditExportRepository: Send + Sync {
    /// Tenants with at least one appended event.
    fn list_tenants(&self) -> Result<Vec<String>, ExportError>;
    /// Highest appended seq, 0 when the tenant has none.
    fn max_seq(&self, tenant_id: &str) -> Result<i64, ExportError>;
    /// Contiguous watermark of successful runs.
    fn progress(&self, tenant_id: &str) -> Result<ExportProgress, ExportError>;
    /// Move STARTED runs begun before `cutoff` to FAILED.
    fn fail_stale_runs(&self, tenant_id: &str, cutoff: &str) -> Result<usize, ExportError>;
    /// `false` when a STARTED or SUCCESS run for the same range exists.
    fn create_run(
        &self,
        run_id: &str,
        tenant_id: &str,
        from_seq: i64,
        to_seq: i64,
        started_at: &str,
    ) -> Result<bool, ExportError>;
    fn rows(&self, tenant_id: &str, from_seq: i64, to_seq: i64) -> Result<Vec<WormRow>, ExportError>;
    fn mark_success(&self, run_id: &str, exported_at: &str, object_key: &str) -> Result<(), ExportError>;
    fn mark_failed(&self, run_id: &str, error_code: &str, message: &str) -> Result<(), ExportError>;
}

pub struct SqliteAuditExportRepository {
    db: Arc<Database>,
}

impl SqliteAuditExportRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl AuditExportRepository for SqliteAuditExportRepository {
    fn list_tenants(&self) -> Result<Vec<String>, ExportError> {
        Ok(self.db.with_conn(repository::list_audit_tenants)?)
    }

    fn max_seq(&self, tenant_id: &str) -> Result<i64, ExportError> {
        let state = self
            .db
            .with_conn(|conn| repository::get_chain_state(conn, tenant_id))?;
        Ok(state.map(|s| s.last_seq).unwrap_or(0))
    }

    fn progress(&self, tenant_id: &str) -> Result<ExportProgress, ExportError> {
        Ok(self
            .db
            .with_conn(|conn| repository::get_export_progress(conn, tenant_id))?)
    }

    fn fail_stale_runs(&self, tenant_id: &str, cutoff: &str) -> Result<usize, ExportError> {
        Ok(self.db.with_conn(|conn| {
            repository::fail_stale_export_runs(conn, tenant_id, cutoff, EXPORT_ABANDONED, "export run abandoned")
        })?)
    }

    fn create_run(
        &self,
        run_id: &str,
        tenant_id: &str,
        from_seq: i64,
        to_seq: i64,
        started_at: &str,
    ) -> Result<bool, ExportError> {
        Ok(self.db.with_conn(|conn| {
            repository::create_export_run(conn, run_id, tenant_id, from_seq, to_seq, started_at)
        })?)
    }

    fn rows(&self, tenant_id: &str, from_seq: i64, to_seq: i64) -> Result<Vec<WormRow>, ExportError> {
        Ok(self
            .db
            .with_conn(|conn| repository::list_worm_rows(conn, tenant_id, from_seq, to_seq))?)
    }

    fn mark_success(&self, run_id: &str, exported_at: &str, object_key: &str) -> Result<(), ExportError> {
        self.db
            .with_conn(|conn| repository::mark_export_success(conn, run_id, exported_at, object_key))?;
        Ok(())
    }

    fn mark_failed(&self, run_id: &str, error_code: &str, message: &str) -> Result<(), ExportError> {
        self.db
            .with_conn(|conn| repository::mark_export_failed(conn, run_id, error_code, message))?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Job
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub base_prefix: String,
    pub batch_size: i64,
    pub schema_version: String,
    /// Restrict the run to these tenants; `None` exports every tenant.
    pub tenants: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub exported_tenants: usize,
    pub exported_runs: usize,
}

pub struct AuditExportJob {
    repo: Arc<dyn AuditExportRepository>,
    storage: Arc<dyn ObjectStorage>,
    signer: ManifestSigner,
    clock: Arc<dyn Clock>,
    options: ExportOptions,
}

impl AuditExportJob {
    pub fn new(
        repo: Arc<dyn AuditExportRepository>,
        storage: Arc<dyn ObjectStorage>,
        signer: ManifestSigner,
        clock: Arc<dyn Clock>,
        options: ExportOptions,
    ) -> Self {
        Self {
            repo,
            storage,
            signer,
            clock,
            options,
        }
    }

    /// Export every unexported range, starting right after the tenant's
    /// contiguous watermark. FAILED ranges are retried. A range still held
    /// by a fresh STARTED run stops that tenant instead of exporting past
    /// it. Stops at the first failed run, which is recorded as FAILED before
    /// the error is returned.
    pub fn run(&self) -> Result<ExportSummary, ExportError> {
        let tenants = match &self.options.tenants {
            Some(tenants) => tenants.clone(),
            None => self.repo.list_tenants()?,
        };
        let batch_size = self.options.batch_size.max(1);
        let mut summary = ExportSummary {
            exported_tenants: tenants.len(),
            exported_runs: 0,
        };

        for tenant_id in &tenants {
            let max_seq = self.repo.max_seq(tenant_id)?;
            if max_seq == 0 {
                continue;
            }
            let stale_cutoff = format_ts(self.clock.now() - chrono::Duration::seconds(EXPORT_RUN_STALE_SECS));
            let abandoned = self.repo.fail_stale_runs(tenant_id, &stale_cutoff)?;
            if abandoned > 0 {
                tracing::warn!(tenant_id = %tenant_id, abandoned, "Stale export runs marked failed");
            }

            let mut from_seq = self.repo.progress(tenant_id)?.exported_through + 1;

            while from_seq <= max_seq {
                let to_seq = (from_seq + batch_size - 1).min(max_seq);
                let run_id = Uuid::new_v4().to_string();
                let started_at = format_ts(self.clock.now());

                if !self.repo.create_run(&run_id, tenant_id, from_seq, to_seq, &started_at)? {
                    tracing::warn!(tenant_id = %tenant_id, from_seq, to_seq, "Export range held by another run, tenant deferred");
                    break;
                }

                match self.export_range(&run_id, tenant_id, from_seq, to_seq) {
                    Ok(object_key) => {
                        tracing::info!(tenant_id = %tenant_id, from_seq, to_seq, object_key = %object_key, "Export run succeeded");
                        summary.exported_runs += 1;
                    }
                    Err(e) => {
                        if let Err(mark_err) = self.repo.mark_failed(&run_id, EXPORT_FAILED, e.sanitized_message()) {
                            tracing::error!(run_id = %run_id, error = %mark_err, "Failed to record export failure");
                        }
                        tracing::error!(tenant_id = %tenant_id, from_seq, to_seq, error = %e, "Export run failed");
                        return Err(e);
                    }
                }
                from_seq = to_seq + 1;
            }
        }

        Ok(summary)
    }

    fn export_range(&self, run_id: &str, tenant_id: &str, from_seq: i64, to_seq: i64) -> Result<String, ExportError> {
        let rows = self.repo.rows(tenant_id, from_seq, to_seq)?;
        let (first, last) = match (rows.first(), rows.last()) {
            (Some(first), Some(last))
                if first.seq == from_seq && last.seq == to_seq && rows.len() as i64 == to_seq - from_seq + 1 =>
            {
                (first, last)
            }
            _ => {
                return Err(ExportError::IncompleteRange {
                    tenant_id: tenant_id.to_string(),
                    from_seq,
                    to_seq,
                })
            }
        };
        verify_chain(&rows, None).map_err(|violation| ExportError::ChainInvalid {
            tenant_id: tenant_id.to_string(),
            seq: violation_seq(&violation),
        })?;

        let exported_at = format_ts(self.clock.now());
        let key = bundle_key(&self.options.base_prefix, tenant_id, &exported_at, from_seq, to_seq);
        let ndjson = build_ndjson(&rows)?;

        let manifest = ExportManifest {
            schema_version: self.options.schema_version.clone(),
            tenant_id: tenant_id.to_string(),
            from_seq,
            to_seq,
            exported_at: exported_at.clone(),
            record_count: rows.len() as u64,
            hash_alg: HASH_ALG.to_string(),
            artifacts: ManifestArtifacts {
                events: events_artifact(ndjson.as_bytes()),
            },
            chain: ManifestChain {
                start_prev_hash: first.prev_hash.clone(),
                end_hash: last.hash.clone(),
            },
            signature: ManifestSignature {
                alg: SIGNATURE_ALG.to_string(),
                sig_format: SIG_FORMAT.to_string(),
                key_id: self.signer.key_id().to_string(),
                public_key_fingerprint_sha256: self.signer.public_key_fingerprint(),
                fingerprint_alg: FINGERPRINT_ALG.to_string(),
            },
        };
        let meta = to_canonical_bytes(&manifest)?;
        let signature = self.signer.sign(&meta);

        // Event bytes are fully determined by the range, so an earlier
        // attempt's upload is the same object.
        match self
            .storage
            .put_object(&format!("{key}/{EVENTS_OBJECT}"), ndjson.as_bytes(), "application/x-ndjson")
        {
            Ok(()) | Err(StorageError::AlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.storage
            .put_object(&format!("{key}/{META_OBJECT}"), &meta, "application/json")?;
        self.storage
            .put_object(&format!("{key}/{SIG_OBJECT}"), signature.as_bytes(), "application/octet-stream")?;

        self.repo.mark_success(run_id, &exported_at, &key)?;
        Ok(key)
    }
}

fn violation_seq(violation: &super::ChainViolation) -> i64 {
    use super::ChainViolation::*;
    match violation {
        HashMismatch { seq } | BrokenLink { seq } | MixedTenants { seq } => *seq,
        SeqGap { found, .. } => *found,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::signer::verify_detached;
    use crate::audit::storage::MemoryObjectStorage;
    use crate::audit::{AuditEvent, SqliteWormWriter, WormAuditWriter};
    use crate::clock::FixedClock;
    use crate::db::repository::ExportRunStatus;
    use chrono::{TimeZone, Utc};
    use ed25519_dalek::SigningKey;

    struct Fixture {
        db: Arc<Database>,
        writer: SqliteWormWriter,
        storage: Arc<MemoryObjectStorage>,
        clock: FixedClock,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        Fixture {
            writer: SqliteWormWriter::new(db.clone()),
            db,
            storage: Arc::new(MemoryObjectStorage::new()),
            clock: FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()),
        }
    }

    fn append(f: &Fixture, tenant: &str, n: usize) {
        for i in 0..n {
            let mut event = AuditEvent::new(f.clock.now(), "stamp.claim", "ok").with_device("dev-1");
            if i % 2 == 0 {
                event = event.with_jti(format!("jti-{i}"));
            }
            f.writer.append(tenant, &event).unwrap();
        }
    }

    fn signer() -> ManifestSigner {
        ManifestSigner::new("export-key-1", SigningKey::from_bytes(&[3u8; 32]))
    }

    fn job(f: &Fixture, storage: Arc<dyn ObjectStorage>, batch_size: i64) -> AuditExportJob {
        AuditExportJob::new(
            Arc::new(SqliteAuditExportRepository::new(f.db.clone())),
            storage,
            signer(),
            Arc::new(f.clock.clone()),
            ExportOptions {
                base_prefix: "audit/".into(),
                batch_size,
                schema_version: "1".into(),
                tenants: None,
            },
        )
    }

    #[test]
    fn exports_signed_bundle() {
        let f = fixture();
        append(&f, "t1", 3);

        let summary = job(&f, f.storage.clone(), 500).run().unwrap();
        assert_eq!(summary, ExportSummary { exported_tenants: 1, exported_runs: 1 });

        let base = "audit/tenant=t1/date=2026-03-01/from_1_to_3";
        let events = f.storage.get(&format!("{base}/events.ndjson")).unwrap();
        let meta = f.storage.get(&format!("{base}/meta.json")).unwrap();
        let sig = f.storage.get(&format!("{base}/meta.sig")).unwrap();
        assert_eq!(events.content_type, "application/x-ndjson");
        assert_eq!(meta.content_type, "application/json");
        assert_eq!(sig.content_type, "application/octet-stream");
        assert!(!events.body.ends_with(b"\n"));

        let manifest: ExportManifest = serde_json::from_slice(&meta.body).unwrap();
        assert_eq!(manifest.record_count, 3);
        assert_eq!(manifest.artifacts.events.lines, 3);
        assert_eq!(manifest.artifacts.events.sha256, sha256_hex(&events.body));
        assert_eq!(manifest.chain.start_prev_hash, "");
        assert_eq!(manifest.signature.key_id, "export-key-1");

        let sig = String::from_utf8(sig.body).unwrap();
        assert!(verify_detached(&signer().verifying_key(), &meta.body, &sig));

        let rows: Vec<WormRow> = String::from_utf8(events.body)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        verify_chain(&rows, Some("")).unwrap();
        assert_eq!(manifest.chain.end_hash, rows[2].hash);
    }

    #[test]
    fn exports_in_batches_after_last_success() {
        let f = fixture();
        append(&f, "t1", 5);
        assert_eq!(job(&f, f.storage.clone(), 2).run().unwrap().exported_runs, 3);

        append(&f, "t1", 1);
        assert_eq!(job(&f, f.storage.clone(), 2).run().unwrap().exported_runs, 1);
        assert!(f
            .storage
            .get("audit/tenant=t1/date=2026-03-01/from_6_to_6/meta.json")
            .is_some());

        let runs = f.db.with_conn(|c| repository::list_export_runs(c, "t1")).unwrap();
        let ranges: Vec<(i64, i64)> = runs.iter().map(|r| (r.from_seq, r.to_seq)).collect();
        assert_eq!(ranges, vec![(1, 2), (3, 4), (5, 5), (6, 6)]);
        assert!(runs.iter().all(|r| r.status == ExportRunStatus::Success));
    }

    #[test]
    fn nothing_to_export_is_a_noop() {
        let f = fixture();
        append(&f, "t1", 2);
        job(&f, f.storage.clone(), 500).run().unwrap();
        let again = job(&f, f.storage.clone(), 500).run().unwrap();
        assert_eq!(again.exported_runs, 0);
    }

    #[test]
    fn range_held_by_running_export_defers_tenant() {
        let f = fixture();
        append(&f, "t1", 4);
        f.db
            .with_conn(|c| repository::create_export_run(c, "other", "t1", 1, 2, &format_ts(f.clock.now())))
            .unwrap();
        let summary = job(&f, f.storage.clone(), 2).run().unwrap();
        assert_eq!(summary.exported_runs, 0);
        assert!(f.storage.keys().is_empty());
    }

    #[test]
    fn abandoned_run_is_retried() {
        let f = fixture();
        append(&f, "t1", 2);
        f.db
            .with_conn(|c| repository::create_export_run(c, "crashed", "t1", 1, 2, &format_ts(f.clock.now())))
            .unwrap();
        f.clock.advance(chrono::Duration::seconds(EXPORT_RUN_STALE_SECS + 1));

        let summary = job(&f, f.storage.clone(), 500).run().unwrap();
        assert_eq!(summary.exported_runs, 1);
        let crashed = f.db.with_conn(|c| repository::get_export_run(c, "crashed")).unwrap().unwrap();
        assert_eq!(crashed.status, ExportRunStatus::Failed);
        assert_eq!(crashed.error_code.as_deref(), Some(EXPORT_ABANDONED));
    }

    struct BrokenStorage;

    impl ObjectStorage for BrokenStorage {
        fn put_object(&self, _key: &str, _body: &[u8], _content_type: &str) -> Result<(), StorageError> {
            Err(StorageError::Rejected { status: 503 })
        }
    }

    #[test]
    fn failed_upload_marks_run_failed_with_sanitized_message() {
        let f = fixture();
        append(&f, "t1", 2);
        let err = job(&f, Arc::new(BrokenStorage), 500).run().unwrap_err();
        assert!(matches!(err, ExportError::Storage(StorageError::Rejected { status: 503 })));

        let runs = f.db.with_conn(|c| repository::list_export_runs(c, "t1")).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, ExportRunStatus::Failed);
        assert_eq!(runs[0].error_code.as_deref(), Some(EXPORT_FAILED));
        assert_eq!(
            runs[0].error_message_sanitized.as_deref(),
            Some("object storage upload failed")
        );
    }

    #[test]
    fn failed_range_is_retried_before_later_ranges() {
        let f = fixture();
        append(&f, "t1", 4);
        assert!(job(&f, Arc::new(BrokenStorage), 2).run().is_err());

        let summary = job(&f, f.storage.clone(), 2).run().unwrap();
        assert_eq!(summary.exported_runs, 2);
        let base = "audit/tenant=t1/date=2026-03-01";
        assert!(f.storage.get(&format!("{base}/from_1_to_2/meta.json")).is_some());
        assert!(f.storage.get(&format!("{base}/from_3_to_4/meta.json")).is_some());

        let progress = f.db.with_conn(|c| repository::get_export_progress(c, "t1")).unwrap();
        assert_eq!(progress.exported_through, 4);
    }

    /// Storage that accepts events but rejects everything after.
    struct EventsOnlyStorage(Arc<MemoryObjectStorage>);

    impl ObjectStorage for EventsOnlyStorage {
        fn put_object(&self, key: &str, body: &[u8], content_type: &str) -> Result<(), StorageError> {
            if key.ends_with(EVENTS_OBJECT) {
                self.0.put_object(key, body, content_type)
            } else {
                Err(StorageError::Rejected { status: 503 })
            }
        }
    }

    #[test]
    fn retry_tolerates_events_left_by_failed_attempt() {
        let f = fixture();
        append(&f, "t1", 2);
        let partial = Arc::new(EventsOnlyStorage(f.storage.clone()));
        assert!(job(&f, partial, 500).run().is_err());
        assert_eq!(f.storage.keys().len(), 1);

        assert_eq!(job(&f, f.storage.clone(), 500).run().unwrap().exported_runs, 1);
        assert!(f
            .storage
            .get("audit/tenant=t1/date=2026-03-01/from_1_to_2/meta.sig")
            .is_some());
    }

    #[test]
    fn events_artifact_counts_lines() {
        assert_eq!(events_artifact(b"").lines, 0);
        assert_eq!(events_artifact(b"{}").lines, 1);
        assert_eq!(events_artifact(b"{}\n{}").lines, 2);
    }

    #[test]
    fn bundle_key_is_deterministic() {
        assert_eq!(
            bundle_key("audit//", "t1", "2026-03-01T12:00:00.000Z", 1, 500),
            "audit/tenant=t1/date=2026-03-01/from_1_to_500"
        );
    }
}
