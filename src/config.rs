//! Application-level constants and environment-driven configuration.
//!
//! Jobs and the HTTP layer read their settings once at startup through the
//! `from_env()` constructors below. Unset optional variables fall back to the
//! constants; malformed values are rejected instead of silently defaulted.

use std::path::PathBuf;

use thiserror::Error;

pub const APP_NAME: &str = "stampguard";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Idempotency records (locks and cached results) live for 24h.
pub const IDEMPOTENCY_TTL_SECS: u64 = 24 * 60 * 60;
pub const IDEMPOTENCY_KEY_MIN_LEN: usize = 8;
pub const IDEMPOTENCY_KEY_MAX_LEN: usize = 128;
/// Floor for one-time token reservations, whatever the token's own expiry.
pub const TOKEN_RESERVATION_MIN_SECS: u64 = 24 * 60 * 60;

/// Maximum allowed clock skew between device and server.
pub const DEFAULT_SKEW_SECS: i64 = 30;
/// Device nonces stay reserved slightly longer than the skew window on both sides.
pub const DEVICE_NONCE_TTL_SECS: u64 = 90;

pub const DEFAULT_GAP_MINUTES: i64 = 15;
pub const DEFAULT_RETENTION_DAYS: i64 = 180;
pub const DEFAULT_EXPORT_BATCH_SIZE: i64 = 500;
pub const DEFAULT_EXPORT_PREFIX: &str = "audit";
pub const EXPORT_SCHEMA_VERSION: &str = "1";
/// A STARTED export run older than this is considered abandoned.
pub const EXPORT_RUN_STALE_SECS: i64 = 60 * 60;

/// Base URI for the `type` member of problem responses.
pub const PROBLEM_TYPE_BASE: &str = "https://errors.stampguard.dev/";

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "stampguard=info,stampguard_lib=info"
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {reason}")]
    Invalid { name: &'static str, reason: String },
}

// ═══════════════════════════════════════════════════════════
// Env helpers
// ═══════════════════════════════════════════════════════════

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn require_env(name: &'static str) -> Result<String, ConfigError> {
    env_opt(name).ok_or(ConfigError::Missing(name))
}

fn parse_env<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(name) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

fn parse_flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env_opt(name).as_deref() {
        None => Ok(default),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some("0") | Some("false") | Some("no") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            name,
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

/// Split a comma-separated tenant list. Empty input means "all tenants".
pub fn parse_tenant_filter(value: Option<&str>) -> Option<Vec<String>> {
    let tenants: Vec<String> = value?
        .split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if tenants.is_empty() {
        None
    } else {
        Some(tenants)
    }
}

// ═══════════════════════════════════════════════════════════
// Typed configuration
// ═══════════════════════════════════════════════════════════

/// Settings shared by the request path and every job.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub db_path: PathBuf,
    pub skew_secs: i64,
    pub trust_proxy: bool,
}

impl GuardConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let skew_secs = parse_env("DEVICE_PROOF_SKEW_SECS", DEFAULT_SKEW_SECS)?;
        if !(1..=300).contains(&skew_secs) {
            return Err(ConfigError::Invalid {
                name: "DEVICE_PROOF_SKEW_SECS",
                reason: format!("{skew_secs} is outside 1..=300"),
            });
        }
        Ok(Self {
            db_path: PathBuf::from(require_env("STAMPGUARD_DB_PATH")?),
            skew_secs,
            trust_proxy: parse_flag("TRUST_PROXY", false)?,
        })
    }
}

/// S3-compatible object storage settings for audit export.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: Option<String>,
    pub path_style: bool,
}

impl S3Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bucket: require_env("AUDIT_EXPORT_S3_BUCKET")?,
            region: require_env("AUDIT_EXPORT_S3_REGION")?,
            access_key_id: require_env("AUDIT_EXPORT_S3_ACCESS_KEY_ID")?,
            secret_access_key: require_env("AUDIT_EXPORT_S3_SECRET_ACCESS_KEY")?,
            endpoint: env_opt("AUDIT_EXPORT_S3_ENDPOINT"),
            path_style: parse_flag("AUDIT_EXPORT_S3_PATH_STYLE", true)?,
        })
    }
}

/// Where export bundles go: S3 in production, a local directory otherwise.
#[derive(Debug, Clone)]
pub enum ExportTarget {
    S3(S3Config),
    Directory(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ExportJobConfig {
    pub base_prefix: String,
    pub batch_size: i64,
    pub schema_version: String,
    pub tenants: Option<Vec<String>>,
    pub key_id: String,
    pub private_key: String,
    pub target: ExportTarget,
}

impl ExportJobConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let batch_size = parse_env("AUDIT_EXPORT_BATCH_SIZE", DEFAULT_EXPORT_BATCH_SIZE)?;
        if batch_size < 1 {
            return Err(ConfigError::Invalid {
                name: "AUDIT_EXPORT_BATCH_SIZE",
                reason: "must be at least 1".into(),
            });
        }
        let target = match env_opt("AUDIT_EXPORT_DIR") {
            Some(dir) => ExportTarget::Directory(PathBuf::from(dir)),
            None => ExportTarget::S3(S3Config::from_env()?),
        };
        Ok(Self {
            base_prefix: env_opt("AUDIT_EXPORT_PREFIX")
                .unwrap_or_else(|| DEFAULT_EXPORT_PREFIX.to_string()),
            batch_size,
            schema_version: env_opt("AUDIT_EXPORT_SCHEMA_VERSION")
                .unwrap_or_else(|| EXPORT_SCHEMA_VERSION.to_string()),
            tenants: parse_tenant_filter(env_opt("AUDIT_EXPORT_TENANTS").as_deref()),
            key_id: require_env("AUDIT_EXPORT_KEY_ID")?,
            private_key: require_env("AUDIT_EXPORT_PRIVATE_KEY")?,
            target,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GapCheckConfig {
    pub gap_minutes: i64,
    pub tenants: Option<Vec<String>>,
    pub webhook_url: Option<String>,
}

impl GapCheckConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let gap_minutes = parse_env("AUDIT_EXPORT_GAP_MINUTES", DEFAULT_GAP_MINUTES)?;
        Ok(Self {
            gap_minutes: gap_minutes.max(1),
            tenants: parse_tenant_filter(env_opt("AUDIT_EXPORT_TENANTS").as_deref()),
            webhook_url: env_opt("AUDIT_EXPORT_ALERT_WEBHOOK_URL"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub retention_days: i64,
}

impl RetentionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let retention_days = parse_env("AUDIT_RETENTION_DAYS", DEFAULT_RETENTION_DAYS)?;
        if retention_days < 1 {
            return Err(ConfigError::Invalid {
                name: "AUDIT_RETENTION_DAYS",
                reason: "must be at least 1".into(),
            });
        }
        Ok(Self { retention_days })
    }
}
