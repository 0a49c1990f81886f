use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use seamgraph_core::{Result, SeamGraphError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

const MARKER_PLAIN: u8 = 0;
const MARKER_GZIP: u8 = 1;

/// Serialize a cache payload. Entries above the threshold are gzipped;
/// a one-byte marker records which form was written. The underlying
/// format is JSON so enum-typed fields keep their canonical string form
/// and consumers can decode without this crate's types.
pub fn encode<T: Serialize>(value: &T, compression_threshold: usize) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(value)?;

    if json.len() > compression_threshold {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .map_err(|e| SeamGraphError::Internal(format!("gzip encode failed: {}", e)))?;
        let compressed = encoder
            .finish()
            .map_err(|e| SeamGraphError::Internal(format!("gzip finish failed: {}", e)))?;
        let mut out = Vec::with_capacity(compressed.len() + 1);
        out.push(MARKER_GZIP);
        out.extend_from_slice(&compressed);
        Ok(out)
    } else {
        let mut out = Vec::with_capacity(json.len() + 1);
        out.push(MARKER_PLAIN);
        out.extend_from_slice(&json);
        Ok(out)
    }
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (marker, body) = bytes
        .split_first()
        .ok_or_else(|| SeamGraphError::Internal("empty cache entry".to_string()))?;

    match *marker {
        MARKER_PLAIN => Ok(serde_json::from_slice(body)?),
        MARKER_GZIP => {
            let mut decoder = GzDecoder::new(body);
            let mut json = Vec::new();
            decoder
                .read_to_end(&mut json)
                .map_err(|e| SeamGraphError::Internal(format!("gzip decode failed: {}", e)))?;
            Ok(serde_json::from_slice(&json)?)
        }
        other => Err(SeamGraphError::Internal(format!(
            "unknown cache entry marker {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seamgraph_core::{Location, NodeType, UniversalNode};

    #[test]
    fn small_entries_stay_plain() {
        let encoded = encode(&serde_json::json!({"k": "v"}), 1024).unwrap();
        assert_eq!(encoded[0], MARKER_PLAIN);
        let decoded: serde_json::Value = decode(&encoded).unwrap();
        assert_eq!(decoded["k"], "v");
    }

    #[test]
    fn large_entries_are_compressed_and_round_trip() {
        let value = serde_json::json!({"payload": "x".repeat(4096)});
        let encoded = encode(&value, 1024).unwrap();
        assert_eq!(encoded[0], MARKER_GZIP);
        assert!(encoded.len() < 4096);
        let decoded: serde_json::Value = decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn node_enums_serialize_as_strings() {
        let node = UniversalNode::new(
            "function:a.py:f:1",
            "f",
            NodeType::Function,
            Location::new("a.py", 1, 1, "Python"),
        );
        let encoded = encode(&vec![node], usize::MAX).unwrap();
        let raw: serde_json::Value = serde_json::from_slice(&encoded[1..]).unwrap();
        assert_eq!(raw[0]["node_type"], "function");
    }
}
