//! Offline verification of an exported bundle directory.
//!
//! Checks run in order and stop at the first failure: manifest signature,
//! public key fingerprint, events digest/size/line count, then the hash chain
//! (every row hash recomputed, every link, and the manifest's start/end hashes).

use std::io::ErrorKind;
use std::path::Path;

use ed25519_dalek::VerifyingKey;
use serde::Serialize;

use super::export::{events_artifact, ExportManifest, EVENTS_OBJECT, META_OBJECT, SIG_OBJECT};
use super::signer::{fingerprint, parse_verifying_key, verify_detached};
use super::worm::verify_chain;
use crate::db::repository::WormRow;

pub const EXIT_OK: i32 = 0;
pub const EXIT_IO: i32 = 1;
pub const EXIT_INTEGRITY: i32 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DigestReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events_lines: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifySummary {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub signature_valid: bool,
    pub fingerprint_valid: bool,
    pub ndjson_valid: bool,
    pub chain_valid: bool,
    pub computed: DigestReport,
    pub expected: DigestReport,
}

impl VerifySummary {
    fn failed(reason: &str) -> Self {
        Self {
            reason: Some(reason.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub exit_code: i32,
    pub summary: VerifySummary,
}

impl VerifyOutcome {
    fn io(reason: &str) -> Self {
        Self {
            exit_code: EXIT_IO,
            summary: VerifySummary::failed(reason),
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, VerifyOutcome> {
    std::fs::read(path).map_err(|e| {
        tracing::warn!(path = %path.display(), error = %e, "Bundle file unreadable");
        match e.kind() {
            ErrorKind::NotFound => VerifyOutcome::io("missing_file"),
            _ => VerifyOutcome::io("io_error"),
        }
    })
}

/// Verify `dir` (holding `events.ndjson`, `meta.json`, `meta.sig`) against
/// the public key stored at `public_key_path`.
pub fn verify_bundle_dir(dir: &Path, public_key_path: &Path) -> VerifyOutcome {
    let loaded = (|| {
        let meta = read_file(&dir.join(META_OBJECT))?;
        let sig = read_file(&dir.join(SIG_OBJECT))?;
        let events = read_file(&dir.join(EVENTS_OBJECT))?;
        let key = read_file(public_key_path)?;
        Ok::<_, VerifyOutcome>((meta, sig, events, key))
    })();
    let (meta, sig, events, key) = match loaded {
        Ok(files) => files,
        Err(outcome) => return outcome,
    };

    let key = match std::str::from_utf8(&key).ok().map(parse_verifying_key) {
        Some(Ok(key)) => key,
        _ => return VerifyOutcome::io("public_key_invalid"),
    };
    let sig = String::from_utf8_lossy(&sig);
    let summary = verify_bundle(&meta, &sig, &events, &key);
    VerifyOutcome {
        exit_code: if summary.ok { EXIT_OK } else { EXIT_INTEGRITY },
        summary,
    }
}

/// Verify bundle contents already in memory.
pub fn verify_bundle(meta_bytes: &[u8], signature_b64: &str, events: &[u8], key: &VerifyingKey) -> VerifySummary {
    if !verify_detached(key, meta_bytes, signature_b64) {
        return VerifySummary::failed("signature_invalid");
    }
    let mut summary = VerifySummary {
        signature_valid: true,
        ..VerifySummary::default()
    };

    let meta: ExportManifest = match serde_json::from_slice(meta_bytes) {
        Ok(meta) => meta,
        Err(_) => {
            summary.reason = Some("meta_invalid".into());
            return summary;
        }
    };

    let computed_fp = fingerprint(key);
    summary.computed.fingerprint_sha256 = Some(computed_fp.clone());
    summary.expected.fingerprint_sha256 = Some(meta.signature.public_key_fingerprint_sha256.clone());
    if computed_fp != meta.signature.public_key_fingerprint_sha256 {
        summary.reason = Some("fingerprint_invalid".into());
        return summary;
    }
    summary.fingerprint_valid = true;

    let computed = events_artifact(events);
    let expected = &meta.artifacts.events;
    summary.computed.events_sha256 = Some(computed.sha256.clone());
    summary.computed.events_bytes = Some(computed.bytes);
    summary.computed.events_lines = Some(computed.lines);
    summary.expected.events_sha256 = Some(expected.sha256.clone());
    summary.expected.events_bytes = Some(expected.bytes);
    summary.expected.events_lines = Some(expected.lines);
    if computed != *expected {
        summary.reason = Some("events_invalid".into());
        return summary;
    }
    summary.ndjson_valid = true;

    let rows = match parse_events(events) {
        Some(rows) => rows,
        None => {
            summary.reason = Some("events_parse_invalid".into());
            return summary;
        }
    };
    if let Err(reason) = check_chain(&meta, &rows) {
        tracing::warn!(reason, tenant_id = %meta.tenant_id, "Bundle chain invalid");
        summary.reason = Some("chain_invalid".into());
        return summary;
    }
    summary.chain_valid = true;
    summary.ok = true;
    summary
}

fn parse_events(events: &[u8]) -> Option<Vec<WormRow>> {
    let text = std::str::from_utf8(events).ok()?;
    text.split('\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).ok())
        .collect()
}

fn check_chain(meta: &ExportManifest, rows: &[WormRow]) -> Result<(), &'static str> {
    let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
        return Err("CHAIN_EMPTY");
    };
    if first.prev_hash != meta.chain.start_prev_hash {
        return Err("CHAIN_START_MISMATCH");
    }
    if last.hash != meta.chain.end_hash {
        return Err("CHAIN_END_MISMATCH");
    }
    if first.seq != meta.from_seq || last.seq != meta.to_seq || first.tenant_id != meta.tenant_id {
        return Err("CHAIN_RANGE_MISMATCH");
    }
    verify_chain(rows, Some(&meta.chain.start_prev_hash)).map_err(|_| "CHAIN_LINK_MISMATCH")
}
