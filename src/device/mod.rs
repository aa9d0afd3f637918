//! Device registry and device-proof verification.
//!
//! A device proof is an Ed25519 signature over `METHOD|PATH|TIMESTAMP|NONCE`,
//! made with the key registered for the device, within a bounded clock skew.

pub mod proof;
pub mod registry;

pub use proof::{
    canonical_message, DeviceProofVerifier, ProofHeaders, ProofRequest, Rejection, RejectReason,
    VerifiedDevice,
};
pub use registry::{
    DeviceAlgorithm, DeviceRecord, DeviceRegistry, MemoryDeviceRegistry, SqliteDeviceRegistry,
};

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device registry database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Device registry unavailable: {0}")]
    Unavailable(String),

    #[error("Public key is not a base64 Ed25519 key")]
    InvalidPublicKey,

    #[error("Unsupported device algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// Decode base64 in any of the encodings devices have been seen to send:
/// standard or URL-safe alphabet, padded or not.
pub(crate) fn decode_base64_lenient(value: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
    use base64::Engine;

    let value = value.trim();
    [STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(value).ok())
}
