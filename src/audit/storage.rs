//! Write-once object storage for export bundles.
//!
//! Every backend refuses to overwrite an existing key: an export bundle, once
//! written, is immutable.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::canonical::sha256_hex;
use crate::config::S3Config;

type HmacSha256 = Hmac<Sha256>;

const S3_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage rejected the upload with status {status}")]
    Rejected { status: u16 },

    #[error("Request signing failed")]
    Signing,

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

pub trait ObjectStorage: Send + Sync {
    fn put_object(&self, key: &str, body: &[u8], content_type: &str) -> Result<(), StorageError>;
}

/// Keys are `/`-separated relative paths without empty, `.` or `..` segments.
fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && !key.starts_with('/')
        && !key.contains('\\')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════
// In-memory
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
pub struct MemoryObjectStorage {
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().ok()?.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl ObjectStorage for MemoryObjectStorage {
    fn put_object(&self, key: &str, body: &[u8], content_type: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        let mut objects = self.objects.lock().map_err(|_| StorageError::LockPoisoned)?;
        if objects.contains_key(key) {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }
        objects.insert(
            key.to_string(),
            StoredObject {
                body: body.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Filesystem
// ═══════════════════════════════════════════════════════════

/// Objects as files under a root directory; the key is the relative path.
pub struct FileSystemObjectStorage {
    root: PathBuf,
}

impl FileSystemObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, seg| path.join(seg)))
    }
}

impl ObjectStorage for FileSystemObjectStorage {
    fn put_object(&self, key: &str, body: &[u8], _content_type: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(key.to_string()),
                _ => StorageError::Io(e),
            })?;
        file.write_all(body)?;
        file.sync_all()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// S3-compatible (SigV4)
// ═══════════════════════════════════════════════════════════

/// Percent-encode per SigV4: unreserved characters pass, `/` optionally.
fn uri_encode(input: &str, keep_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if keep_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| StorageError::Signing)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// AWS Signature Version 4 for one request.
pub struct SigV4<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
    pub service: &'a str,
}

impl SigV4<'_> {
    fn signing_key(&self, date: &str) -> Result<Vec<u8>, StorageError> {
        let k_date = hmac_sha256(format!("AWS4{}", self.secret_access_key).as_bytes(), date.as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, self.service.as_bytes())?;
        hmac_sha256(&k_service, b"aws4_request")
    }

    /// The `Authorization` header value. `headers` must hold every header to
    /// sign, lower-cased, including `host` and `x-amz-date`.
    pub fn authorization(
        &self,
        method: &str,
        canonical_uri: &str,
        canonical_query: &str,
        headers: &BTreeMap<String, String>,
        payload_hash: &str,
        amz_date: &str,
    ) -> Result<String, StorageError> {
        let date = amz_date.get(..8).ok_or(StorageError::Signing)?;
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{k}:{}\n", v.trim()))
            .collect();
        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
        let canonical_request = format!(
            "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
        );
        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            sha256_hex(canonical_request.as_bytes())
        );
        let signature = hex::encode(hmac_sha256(&self.signing_key(date)?, string_to_sign.as_bytes())?);
        Ok(format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key_id
        ))
    }
}

pub struct S3ObjectStorage {
    config: S3Config,
    client: reqwest::blocking::Client,
}

impl S3ObjectStorage {
    pub fn new(config: S3Config) -> Result<Self, StorageError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(S3_TIMEOUT)
            .build()?;
        Ok(Self { config, client })
    }

    /// `(url, host, canonical_uri)` for a key.
    fn locate(&self, key: &str) -> (String, String, String) {
        let encoded_key = uri_encode(key, true);
        let endpoint = self
            .config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", self.config.region));
        let endpoint = endpoint.trim_end_matches('/');
        let (scheme, authority) = endpoint.split_once("://").unwrap_or(("https", endpoint));

        if self.config.path_style {
            let uri = format!("/{}/{encoded_key}", uri_encode(&self.config.bucket, false));
            (format!("{scheme}://{authority}{uri}"), authority.to_string(), uri)
        } else {
            let host = format!("{}.{authority}", self.config.bucket);
            let uri = format!("/{encoded_key}");
            (format!("{scheme}://{host}{uri}"), host, uri)
        }
    }

    fn put_at(&self, key: &str, body: &[u8], content_type: &str, now: DateTime<Utc>) -> Result<(), StorageError> {
        validate_key(key)?;
        let (url, host, canonical_uri) = self.locate(key);
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = sha256_hex(body);

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        headers.insert("host".to_string(), host);
        headers.insert("if-none-match".to_string(), "*".to_string());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert("x-amz-date".to_string(), amz_date.clone());

        let signer = SigV4 {
            access_key_id: &self.config.access_key_id,
            secret_access_key: &self.config.secret_access_key,
            region: &self.config.region,
            service: "s3",
        };
        let authorization = signer.authorization("PUT", &canonical_uri, "", &headers, &payload_hash, &amz_date)?;

        let mut request = self.client.put(&url).body(body.to_vec());
        for (name, value) in headers.iter().filter(|(name, _)| name.as_str() != "host") {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.header("authorization", authorization).send()?;

        let status = response.status();
        if status.as_u16() == 412 {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }
        if !status.is_success() {
            return Err(StorageError::Rejected {
                status: status.as_u16(),
            });
        }
        tracing::debug!(key, bytes = body.len(), "Object uploaded");
        Ok(())
    }
}

impl ObjectStorage for S3ObjectStorage {
    fn put_object(&self, key: &str, body: &[u8], content_type: &str) -> Result<(), StorageError> {
        self.put_at(key, body, content_type, Utc::now())
    }
}
