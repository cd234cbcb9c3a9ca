//! Content hashing for generated layouts.
//!
//! A layout's hash covers its serialized form, so two generation passes over
//! the same facts produce the same digest and any reordering changes it.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// A 32-byte SHA-256 content hash.
pub type ContentHash = [u8; 32];

/// Compute the SHA-256 content hash of any serializable value.
pub fn content_hash<T: Serialize>(value: &T) -> Result<ContentHash> {
    let json = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    Ok(hasher.finalize().into())
}

/// Format a content hash as a hex string.
pub fn hash_hex(hash: &ContentHash) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}
