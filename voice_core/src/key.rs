//! Cache key derivation.
//!
//! A key is a SHA-256 digest over the normalized request fields. Each field is
//! written with a little-endian length prefix, so no two distinct field
//! tuples share a byte stream.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::request::GenerationRequest;

/// Bumped whenever the hashed layout changes, so old disk entries stop matching.
const KEY_DOMAIN: &[u8] = b"voice-cache/v1";

/// Sampling parameters are hashed at this many steps per unit (two decimals).
pub const PARAM_SCALE: f32 = 100.0;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Derive the key for an already-normalized request.
    pub fn derive(request: &GenerationRequest) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DOMAIN);
        write_field(&mut hasher, request.text().as_bytes());
        write_field(&mut hasher, request.voice_description().as_bytes());
        write_field(&mut hasher, &request.temperature_steps().to_le_bytes());
        write_field(&mut hasher, &request.top_p_steps().to_le_bytes());
        CacheKey(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", &self.to_hex()[..12])
    }
}

impl FromStr for CacheKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)
            .map_err(|e| Error::InvalidRequest(format!("invalid cache key '{s}': {e}")))?;
        Ok(CacheKey(out))
    }
}

impl Serialize for CacheKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Trim surrounding whitespace. Case is kept: casing and inline emotion tags
/// reach the model verbatim and can change delivery.
pub fn normalize_text(text: &str) -> &str {
    text.trim()
}

/// Quantize a sampling parameter to hundredths. Non-finite input maps to
/// `None` so callers can reject it.
pub fn quantize(value: f32) -> Option<u32> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let steps = (value * PARAM_SCALE).round();
    if steps > u32::MAX as f32 {
        return None;
    }
    Some(steps as u32)
}
