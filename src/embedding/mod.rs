//! Text-to-vector embedding seam.
//!
//! Embedding generation is CPU-bound and potentially slow, so it never runs
//! inside a write transaction: the write path records an `embed_memory` job,
//! the background worker computes the vector out of transaction through this
//! trait, and a second small write attaches the result. Model inference
//! itself is an external collaborator behind [`EmbeddingProvider`]; the
//! built-in [`HashEmbedder`] is a deterministic, dependency-free default
//! good enough for duplicate detection on near-identical text.

use anyhow::Result;

/// Produces fixed-dimension vectors for memory content.
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier stored alongside each vector (e.g. `"hash-64"`).
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embed a single text. Must be pure: equal input, equal output.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic bag-of-tokens hashing embedder.
///
/// Each lowercase token is hashed into a bucket with a ±1 sign; the
/// accumulated vector is L2-normalized. Identical texts embed identically
/// (cosine 1.0), token-disjoint texts are near-orthogonal.
pub struct HashEmbedder {
    model_name: String,
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            model_name: format!("hash-{dimensions}"),
            dimensions,
        }
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.split_whitespace() {
            let token = token.to_lowercase();
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }
}

/// FNV-1a, 64-bit. Stable across platforms and releases, unlike
/// `DefaultHasher` — stored embeddings must stay comparable over time.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Build the provider selected by config.
pub fn create_provider(config: &crate::config::EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.model.as_str() {
        model if model.starts_with("hash-") || model.is_empty() => {
            Ok(Box::new(HashEmbedder::new(config.dimensions.max(8))))
        }
        other => anyhow::bail!("unknown embedding model: {other}"),
    }
}
