//! Ed25519 keys for export manifests.
//!
//! Private keys are accepted as a PKCS#8 PEM block or a base64 32-byte seed;
//! public keys as an SPKI PEM block or base64 raw 32 bytes. Signatures are
//! detached, base64-encoded, over the exact manifest bytes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use thiserror::Error;

use crate::canonical::sha256_hex;
use crate::device::decode_base64_lenient;

pub const SIGNATURE_ALG: &str = "ed25519";
pub const SIG_FORMAT: &str = "base64";
pub const FINGERPRINT_ALG: &str = "sha256(raw-public-key)";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("Private key is neither PKCS#8 PEM nor a base64 32-byte seed")]
    InvalidPrivateKey,

    #[error("Public key is neither SPKI PEM nor base64 raw 32 bytes")]
    InvalidPublicKey,
}

pub struct ManifestSigner {
    key_id: String,
    signing_key: SigningKey,
}

impl ManifestSigner {
    pub fn new(key_id: impl Into<String>, signing_key: SigningKey) -> Self {
        Self {
            key_id: key_id.into(),
            signing_key,
        }
    }

    pub fn from_encoded(key_id: impl Into<String>, encoded: &str) -> Result<Self, KeyError> {
        Ok(Self::new(key_id, parse_signing_key(encoded)?))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_fingerprint(&self) -> String {
        fingerprint(&self.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> String {
        BASE64.encode(self.signing_key.sign(message).to_bytes())
    }
}

pub fn fingerprint(key: &VerifyingKey) -> String {
    sha256_hex(key.as_bytes())
}

pub fn parse_signing_key(encoded: &str) -> Result<SigningKey, KeyError> {
    let trimmed = encoded.trim();
    if trimmed.starts_with("-----BEGIN") {
        return SigningKey::from_pkcs8_pem(trimmed).map_err(|_| KeyError::InvalidPrivateKey);
    }
    let seed: [u8; 32] = decode_base64_lenient(trimmed)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(KeyError::InvalidPrivateKey)?;
    Ok(SigningKey::from_bytes(&seed))
}

pub fn parse_verifying_key(encoded: &str) -> Result<VerifyingKey, KeyError> {
    let trimmed = encoded.trim();
    if trimmed.starts_with("-----BEGIN") {
        return VerifyingKey::from_public_key_pem(trimmed).map_err(|_| KeyError::InvalidPublicKey);
    }
    let raw: [u8; 32] = decode_base64_lenient(trimmed)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(KeyError::InvalidPublicKey)?;
    VerifyingKey::from_bytes(&raw).map_err(|_| KeyError::InvalidPublicKey)
}

/// Check a base64 detached signature. Any decoding problem is `false`.
pub fn verify_detached(key: &VerifyingKey, message: &[u8], signature_b64: &str) -> bool {
    let Some(bytes) = decode_base64_lenient(signature_b64.trim()) else {
        return false;
    };
    let Ok(bytes) = <[u8; 64]>::try_from(bytes.as_slice()) else {
        return false;
    };
    key.verify_strict(message, &Signature::from_bytes(&bytes)).is_ok()
}
