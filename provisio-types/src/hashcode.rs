//! Stable hash codes for set elements.
//!
//! Hash codes end up in persisted attribute keys, so they must not change
//! between releases or platforms. `std::hash` makes no such promise; these
//! helpers hash with SHA-256 instead.

use crate::set::SetHashFn;
use crate::value::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Hashes a string to a non-negative code.
///
/// The code is the first eight bytes of the SHA-256 digest, big-endian, with
/// the sign bit cleared.
#[must_use]
pub fn string(s: &str) -> i64 {
    let digest = Sha256::digest(s.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) & i64::MAX as u64) as i64
}

/// Hash function that uses an integer element as its own code.
#[must_use]
pub fn int_identity() -> SetHashFn {
    Arc::new(|v: &Value| v.as_int().unwrap_or_default())
}

/// Hash function for string elements.
#[must_use]
pub fn string_value() -> SetHashFn {
    Arc::new(|v: &Value| match v {
        Value::String(s) => string(s),
        other => string(&other.to_string()),
    })
}
