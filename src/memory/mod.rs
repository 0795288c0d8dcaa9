//! Core memory engine — write path, search, and the conflict/duplicate
//! detector.
//!
//! The write path ([`store`]) runs inside the write coordinator's
//! transaction; the read path ([`search`]) runs on per-request reader
//! connections; detection ([`detect`]) runs in the background worker.
//! Type definitions live in [`types`].

pub mod detect;
pub mod search;
pub mod store;
pub mod types;

/// SQL fragment selecting only live memories from a table aliased `m`.
/// Callers bind the current timestamp for the expiry comparison.
pub(crate) const ACTIVE_MEMORY_SQL: &str = "m.retracted_at IS NULL \
     AND m.superseded_at IS NULL \
     AND (m.expires_at IS NULL OR m.expires_at > ?1)";

/// Encode an f32 embedding as a little-endian byte blob.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian byte blob back into an f32 embedding.
/// Returns `None` if the blob length is not a multiple of 4.
pub fn bytes_to_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// Cosine similarity between two vectors. Zero for mismatched lengths or
/// zero-magnitude inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
