//! Canonical serialization and content hashing.
//!
//! Every entity hash, audit hash and anchor payload goes through
//! [`canonicalize`]: a compact JSON rendering whose object keys are sorted
//! recursively, so two logically equal payloads always produce the same
//! bytes regardless of field or insertion order.
//!
//! Rules:
//! - object members with a `null` value are omitted (an absent optional and
//!   an explicit `None` are the same logical value)
//! - floating point numbers are rejected; amounts travel as decimal strings
//! - array order is significant

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::constants::HASH_PREFIX;
use crate::{MarketError, Result};

/// A scheme-prefixed SHA-256 digest of a canonical payload.
///
/// Opaque: compare by equality only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self(format!("{HASH_PREFIX}{}", hex::encode(digest)))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic string form of any serializable value.
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    let mut out = String::with_capacity(128);
    write_canonical(&value, &mut out)?;
    Ok(out)
}

/// Hash of the canonical form of `value`.
pub fn hash_canonical<T: Serialize + ?Sized>(value: &T) -> Result<ContentHash> {
    let canonical = canonicalize(value)?;
    Ok(ContentHash::of_bytes(canonical.as_bytes()))
}

/// Hash of an already-canonical string (signing messages are hashed as-is).
#[must_use]
pub fn hash_str(message: &str) -> ContentHash {
    ContentHash::of_bytes(message.as_bytes())
}

fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => {
            out.push_str(&serde_json::to_string(value)?);
        }
        Value::Number(n) => {
            if n.is_f64() {
                return Err(MarketError::Canonicalization(format!(
                    "floating point number {n} (use a decimal string)"
                )));
            }
            out.push_str(&n.to_string());
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> =
                map.iter().filter(|(_, v)| !v.is_null()).collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(item, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}
