//! Wire format of the `embeddings` hash field: a JSON array of floats,
//! zstd-compressed.
//!
//! Stores written by the older Python ingester hold bzip2-compressed JSON in
//! the same field. Those values are reported as codec errors, never decoded
//! as zstd; they have to be re-encoded before this pipeline can read them.

use harvester_model::Embedding;

use crate::error::{HarvestError, Result};

const COMPRESSION_LEVEL: i32 = 3;

/// Stream header of a bzip2 file.
const BZIP2_MAGIC: &[u8] = b"BZh";

pub fn encode_embedding(embedding: &Embedding) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(embedding)?;
    zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL)
        .map_err(|e| HarvestError::Codec(format!("zstd compression failed: {e}")))
}

pub fn decode_embedding(bytes: &[u8]) -> Result<Embedding> {
    if bytes.starts_with(BZIP2_MAGIC) {
        return Err(HarvestError::Codec(
            "embedding is bzip2-compressed (legacy format); re-encode it as zstd".to_string(),
        ));
    }
    let json = zstd::decode_all(bytes)
        .map_err(|e| HarvestError::Codec(format!("zstd decompression failed: {e}")))?;
    serde_json::from_slice(&json)
        .map_err(|e| HarvestError::Codec(format!("embedding is not a float array: {e}")))
}

#[cfg(test)]
mod tests {
    use harvester_model::DIMENSIONS;

    use super::*;

    #[test]
    fn full_size_embedding_round_trips_and_compresses() {
        let embedding = Embedding::zeros(DIMENSIONS);
        let bytes = encode_embedding(&embedding).expect("encode");

        assert!(bytes.len() < DIMENSIONS);
        assert_eq!(decode_embedding(&bytes).expect("decode"), embedding);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        assert!(matches!(
            decode_embedding(b"definitely not zstd"),
            Err(HarvestError::Codec(_))
        ));
    }

    #[test]
    fn legacy_bzip2_values_are_named_not_misread() {
        let legacy = b"BZh91AY&SY\x00\x01";
        match decode_embedding(legacy) {
            Err(HarvestError::Codec(reason)) => assert!(reason.contains("bzip2")),
            other => panic!("expected codec error, got {other:?}"),
        }
    }
}
