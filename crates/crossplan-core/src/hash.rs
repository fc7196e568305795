//! Content fingerprints.
//!
//! A fingerprint is blake3, in key-derivation mode, over the JSON encoding of
//! a value. The context string keeps fingerprints of different kinds of value
//! apart even when their encodings coincide.

use blake3::Hasher;
use serde::Serialize;
use std::fmt;

use crate::error::Result;

/// Context for whole-plan fingerprints.
pub const PLAN_CONTEXT: &str = "crossplan plan fingerprint v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// First 8 hex digits, for log lines.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(8);
        hex
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

pub fn hash_bytes(context: &str, bytes: &[u8]) -> Hash256 {
    let mut h = Hasher::new_derive_key(context);
    h.update(bytes);
    Hash256(*h.finalize().as_bytes())
}

/// Fingerprint any serializable value.
///
/// Only stable if every map inside `v` iterates in a fixed order (`BTreeMap`,
/// never `HashMap`).
pub fn hash_serde<T: Serialize>(context: &str, v: &T) -> Result<Hash256> {
    let bytes = serde_json::to_vec(v)?;
    Ok(hash_bytes(context, &bytes))
}
