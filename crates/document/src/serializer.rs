//! Document encoding. Thin wrappers over `serde_json` that give the
//! pipeline a single error surface and a compact-bytes round-trip guarantee
//! (`to_bytes(from_bytes(b)) == b` modulo whitespace).

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("failed to encode document: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode document: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Compact encoding, one allocation, no trailing newline.
pub fn to_bytes(document: &Value) -> Result<Vec<u8>, SerializationError> {
    serde_json::to_vec(document).map_err(SerializationError::Encode)
}

/// Pretty encoding for human-facing output files.
pub fn to_bytes_pretty(document: &Value) -> Result<Vec<u8>, SerializationError> {
    serde_json::to_vec_pretty(document).map_err(SerializationError::Encode)
}

pub fn from_bytes(bytes: &[u8]) -> Result<Value, SerializationError> {
    serde_json::from_slice(bytes).map_err(SerializationError::Decode)
}
