//! Dense semantic index
//!
//! Holds the subset of catalog variables that have pre-computed embeddings.
//! Brute-force cosine over L2-normalized vectors - exact, cache-friendly,
//! and comfortably fast for catalogs up to ~100k entries.
//!
//! Cosine similarity maps onto [0,1] as `(sim + 1) / 2`: identical vectors
//! score 1.0, orthogonal 0.5, antipodal 0.0.

use tracing::warn;

use crate::catalog::CatalogSnapshot;
use crate::embeddings::{l2_normalize, EmbeddingStore};

use super::Candidate;

/// Default number of nearest neighbors fetched before fusion
pub const DEFAULT_SEMANTIC_TOP_N: usize = 200;

/// Read-only dense index, rebuilt whole alongside every catalog snapshot.
pub struct SemanticIndex {
    dimension: usize,
    /// Flattened row-major matrix of unit vectors
    matrix: Vec<f32>,
    /// Catalog position of each matrix row
    rows: Vec<u32>,
    /// Embeddings dropped for dimension mismatch or unknown code
    skipped: usize,
}

impl SemanticIndex {
    /// Build from the embeddings sidecar. Entries whose code is absent from
    /// the catalog or whose dimension disagrees with the store metadata are
    /// counted and dropped.
    pub fn build(catalog: &CatalogSnapshot, store: &EmbeddingStore) -> Self {
        let dimension = store.dimension();
        let mut matrix = Vec::new();
        let mut rows = Vec::new();
        let mut skipped = 0usize;

        for (code, vector) in store.iter() {
            let Some(ix) = catalog.index_of(code) else {
                skipped += 1;
                continue;
            };
            if vector.len() != dimension {
                skipped += 1;
                continue;
            }
            let mut row = vector.clone();
            l2_normalize(&mut row);
            matrix.extend_from_slice(&row);
            rows.push(ix as u32);
        }

        if skipped > 0 {
            warn!(skipped, "embeddings dropped while building semantic index");
        }

        Self { dimension, matrix, rows, skipped }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Top-N nearest variables for a query vector, as candidates with
    /// `semantic_score` in [0,1]. An empty index or a mis-sized query vector
    /// yields no candidates.
    pub fn search(&self, query_vector: &[f32], top_n: usize) -> Vec<Candidate> {
        if self.is_empty() || query_vector.len() != self.dimension || top_n == 0 {
            return Vec::new();
        }

        let mut unit_query = query_vector.to_vec();
        l2_normalize(&mut unit_query);

        let mut similarities: Vec<(u32, f32)> = self
            .rows
            .iter()
            .enumerate()
            .map(|(row, &ix)| {
                let offset = row * self.dimension;
                let row_slice = &self.matrix[offset..offset + self.dimension];
                let dot: f32 =
                    row_slice.iter().zip(unit_query.iter()).map(|(a, b)| a * b).sum();
                (ix, dot)
            })
            .collect();

        similarities.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
        });
        similarities.truncate(top_n);

        similarities
            .into_iter()
            .map(|(ix, sim)| {
                let score = ((sim + 1.0) / 2.0).clamp(0.0, 1.0);
                Candidate::semantic(ix as usize, score)
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
