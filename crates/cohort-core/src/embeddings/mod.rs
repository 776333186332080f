//! Semantic Embeddings
//!
//! Query-time embeddings come from an external provider over HTTP; variable
//! embeddings are pre-computed offline and shipped as a binary sidecar file.
//! This module provides:
//!
//! - The [`EmbeddingProvider`] seam the semantic index calls at query time
//! - The sidecar loader ([`EmbeddingStore`])
//! - Vector math shared by the semantic index

mod remote;
mod store;

pub use remote::RemoteEmbeddingProvider;
pub use store::{read_embedding_store, write_embedding_store, EmbeddingStore, StoreMetadata};

use async_trait::async_trait;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// Provider HTTP call failed
    #[error("Embedding provider request failed: {0}")]
    Provider(String),
    /// Provider returned a malformed payload
    #[error("Malformed embedding response: {0}")]
    Response(String),
    /// Provider vector dimension does not match the index
    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },
    /// Sidecar file problems
    #[error("Embedding store error: {0}")]
    Store(String),
    /// IO error reading the sidecar
    #[error("IO error reading embeddings: {0}")]
    Io(#[from] std::io::Error),
}

/// Embedding result type
pub type Result<T> = std::result::Result<T, EmbeddingError>;

// ============================================================================
// PROVIDER SEAM
// ============================================================================

/// External embedding provider contract.
///
/// Implementations must be cheap to call concurrently; retries, timeouts and
/// cumulative-failure disablement are the caller's job (the service wraps
/// every call in a resource guard).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one query string into a dense vector of `self.dimension()` floats.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Fixed output dimensionality of this provider.
    fn dimension(&self) -> usize;

    /// Model identifier, for stats and logging.
    fn model(&self) -> &str;
}

// ============================================================================
// VECTOR MATH
// ============================================================================

/// Cosine similarity between two vectors. Mismatched lengths and zero
/// vectors score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 { dot / denominator } else { 0.0 }
}

/// Normalize a vector to unit length in place. Zero vectors are left as-is.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector {
            *x /= norm;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
