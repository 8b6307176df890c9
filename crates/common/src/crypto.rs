//! Hashing utilities shared across CRMI crates
//!
//! Digests are SHA-256, hex encoded.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the given bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Stable digest of a JSON document.
///
/// Object keys are serialized in sorted order, so two documents with the same
/// content hash identically regardless of how they were built.
pub fn json_digest(value: &serde_json::Value) -> String {
    sha256_hex(value.to_string().as_bytes())
}
