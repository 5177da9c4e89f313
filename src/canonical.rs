//! Canonical serialization for deterministic hashing.
//!
//! This module provides the hashing primitives shared by the identity
//! resolver (roster fingerprints) and the attribute set (record digests).
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: Struct fields serialize in declaration order
//! - Stable Vec order: Vectors serialize in index order
//! - No HashMap allowed: Use BTreeMap for maps in hashed data
//! - Stable float format: f32/f64 serialize consistently

use serde::Serialize;
use xxhash_rust::xxh3::xxh3_128;
use xxhash_rust::xxh64::xxh64;

/// Serialize a value to canonical JSON bytes for hashing.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// Compute canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<u64, serde_json::Error> {
    let bytes = to_canonical_bytes(value)?;
    Ok(xxh64(&bytes, 0))
}

/// Compute canonical hash and return as hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(format!("{:016x}", canonical_hash(value)?))
}

/// 128-bit content hash of raw bytes as a 32-character lowercase hex string.
///
/// Not a security primitive; used for grouping keys.
pub fn content_hash_128_hex(bytes: &[u8]) -> String {
    format!("{:032x}", xxh3_128(bytes))
}
