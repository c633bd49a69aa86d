//! `CacheEnvelope` (§3): every stored value is wrapped with a timestamp and,
//! above a configurable size threshold, gzip-compressed before it is handed to
//! the underlying `KVStore`/`DocStore`.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{codes, GatewayError, GatewayResult};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEnvelope {
    pub data: Value,
    pub stored_at_millis: i64,
    pub compressed: bool,
    pub original_size: usize,
    pub compressed_size: usize,
    pub metadata: Option<Value>,
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    stored_at_millis: i64,
    compressed: bool,
    original_size: usize,
    compressed_size: usize,
    metadata: Option<Value>,
    payload_b64: String,
}

fn io_err(e: std::io::Error) -> GatewayError {
    GatewayError::new(codes::STORAGE_EXTERNAL_BACKEND_UNAVAILABLE, format!("envelope codec I/O error: {e}"))
        .retryable(true)
}

fn json_err(e: serde_json::Error) -> GatewayError {
    GatewayError::new(
        codes::SYMBOL_TRANSFORMER_VALIDATION_INVALID_DATA_FORMAT,
        format!("envelope payload is malformed: {e}"),
    )
    .retryable(false)
}

/// Serializes `data`, gzip-compressing it first if it's larger than
/// `compression_threshold_bytes`, and wraps the result in a `WireEnvelope`.
pub fn encode(data: &Value, metadata: Option<Value>, stored_at_millis: i64, compression_threshold_bytes: usize) -> GatewayResult<Vec<u8>> {
    let raw = serde_json::to_vec(data).map_err(json_err)?;
    let original_size = raw.len();

    let (compressed, payload, compressed_size) = if original_size > compression_threshold_bytes {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).map_err(io_err)?;
        let bytes = encoder.finish().map_err(io_err)?;
        let size = bytes.len();
        (true, bytes, size)
    } else {
        (false, raw, original_size)
    };

    let wire = WireEnvelope {
        stored_at_millis,
        compressed,
        original_size,
        compressed_size,
        metadata,
        payload_b64: BASE64.encode(payload),
    };
    serde_json::to_vec(&wire).map_err(json_err)
}

pub fn decode(bytes: &[u8]) -> GatewayResult<CacheEnvelope> {
    let wire: WireEnvelope = serde_json::from_slice(bytes).map_err(json_err)?;
    let payload = BASE64.decode(&wire.payload_b64).map_err(|e| {
        GatewayError::new(
            codes::SYMBOL_TRANSFORMER_VALIDATION_INVALID_DATA_FORMAT,
            format!("envelope payload is not valid base64: {e}"),
        )
        .retryable(false)
    })?;

    let raw = if wire.compressed {
        let mut decoder = GzDecoder::new(&payload[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(io_err)?;
        out
    } else {
        payload
    };

    let data: Value = serde_json::from_slice(&raw).map_err(json_err)?;
    Ok(CacheEnvelope {
        data,
        stored_at_millis: wire.stored_at_millis,
        compressed: wire.compressed,
        original_size: wire.original_size,
        compressed_size: wire.compressed_size,
        metadata: wire.metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn small_values_pass_through_uncompressed() {
        let data = json!({"a": 1});
        let bytes = encode(&data, None, 1000, 1024).unwrap();
        let envelope = decode(&bytes).unwrap();
        assert!(!envelope.compressed);
        assert_eq!(envelope.data, data);
        assert_eq!(envelope.stored_at_millis, 1000);
    }

    #[test]
    fn large_values_are_compressed_and_round_trip() {
        let data = json!({"payload": "x".repeat(5000)});
        let bytes = encode(&data, None, 2000, 64).unwrap();
        let envelope = decode(&bytes).unwrap();
        assert!(envelope.compressed);
        assert!(envelope.compressed_size < envelope.original_size);
        assert_eq!(envelope.data, data);
    }
}
