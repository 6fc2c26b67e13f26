//! # Value Codec
//!
//! Binary encoding for stored field values.
//!
//! Format: 1-byte codec version + postcard-serialized [`Value`].
//!
//! Backends treat the result as opaque bytes. Size and header checks run
//! before the payload is handed to postcard so a corrupt row cannot force a
//! large allocation.

use crate::primitives::{CODEC_VERSION, MAX_VALUE_SIZE};
use crate::types::{Result, SiptrackError, Value};

/// Encode a value for storage.
pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    let payload =
        postcard::to_stdvec(value).map_err(|e| SiptrackError::Serialization(e.to_string()))?;
    if payload.len() >= MAX_VALUE_SIZE {
        return Err(SiptrackError::Serialization(format!(
            "value size {} bytes exceeds maximum allowed {} bytes",
            payload.len(),
            MAX_VALUE_SIZE
        )));
    }

    let mut bytes = Vec::with_capacity(1 + payload.len());
    bytes.push(CODEC_VERSION);
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decode a value read from storage.
pub fn decode_value(bytes: &[u8]) -> Result<Value> {
    let Some((&version, payload)) = bytes.split_first() else {
        return Err(SiptrackError::Serialization(
            "empty value payload".to_string(),
        ));
    };

    if bytes.len() > MAX_VALUE_SIZE {
        return Err(SiptrackError::Serialization(format!(
            "value size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_VALUE_SIZE
        )));
    }

    if version != CODEC_VERSION {
        return Err(SiptrackError::Serialization(format!(
            "unsupported codec version: {} (expected {})",
            version, CODEC_VERSION
        )));
    }

    postcard::from_bytes(payload)
        .map_err(|e| SiptrackError::Serialization(format!("failed to decode value: {}", e)))
}

// =============================================================================
// TESTS
// =============================================================================
