//! Placeholder segment clusterer
//!
//! The real K-Medians clusterer is an external collaborator reached over its
//! own deployment; this stub satisfies the same contract so the session
//! workflow is exercisable end-to-end. Segment sizes and centroids are
//! derived deterministically from the confirmed variable codes, and sizes
//! stay within the balance contract (largest <= 2x smallest).

use std::collections::HashMap;

use async_trait::async_trait;
use cohort_core::router::stable_hash;
use cohort_core::{ClusterError, ClusterRequest, Segment, SegmentClusterer};

/// Default segment count when the caller gives no hint
const DEFAULT_SEGMENTS: usize = 4;

/// Base audience size per segment; the hash jitter stays well inside the
/// balance contract.
const BASE_SIZE: u64 = 50_000;
const SIZE_JITTER: u64 = 20_000;

/// Deterministic even-split clusterer.
pub struct EvenSplitClusterer;

#[async_trait]
impl SegmentClusterer for EvenSplitClusterer {
    async fn cluster(&self, request: ClusterRequest) -> Result<Vec<Segment>, ClusterError> {
        if request.variables.is_empty() {
            return Err(ClusterError("no variables to cluster".to_string()));
        }

        let count = request.segment_hint.unwrap_or(DEFAULT_SEGMENTS).clamp(2, 16);
        let seed: u64 = request
            .variables
            .iter()
            .fold(0u64, |acc, v| acc ^ stable_hash(&v.code));

        let segments = (0..count as u32)
            .map(|id| {
                let jitter = stable_hash(&format!("{seed}-{id}")) % SIZE_JITTER;
                let centroid: HashMap<String, f64> = request
                    .variables
                    .iter()
                    .map(|v| {
                        let bucket = stable_hash(&format!("{}-{id}", v.code)) % 1000;
                        (v.code.clone(), bucket as f64 / 1000.0)
                    })
                    .collect();
                Segment {
                    id: id + 1,
                    label: format!("Segment {}", id + 1),
                    size: BASE_SIZE + jitter,
                    centroid,
                }
            })
            .collect();

        Ok(segments)
    }
}

// ============================================================================
// TESTS
// ============================================================================
