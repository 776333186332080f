//! Similarity filter
//!
//! Suppresses near-duplicate results after scoring and before pagination.
//! Candidates are walked in ranked order; one is dropped when at least
//! `max_per_cluster` already-kept names exceed the Jaro-Winkler threshold,
//! so each similarity cluster surfaces at most `max_per_cluster` entries.
//! Relative order of kept candidates is preserved and the top-1 candidate
//! is never removed.

use crate::catalog::CatalogSnapshot;

use super::Candidate;

/// Near-duplicate suppression, configurable per request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityFilter {
    /// Jaro-Winkler similarity above which two names are duplicates
    pub threshold: f64,
    /// Entries surfaced per similarity cluster
    pub max_per_cluster: usize,
    /// Whether the filter runs at all
    pub enabled: bool,
}

impl Default for SimilarityFilter {
    fn default() -> Self {
        Self { threshold: 0.85, max_per_cluster: 2, enabled: true }
    }
}

impl SimilarityFilter {
    /// Apply the filter to a ranked candidate list.
    pub fn apply(&self, candidates: Vec<Candidate>, catalog: &CatalogSnapshot) -> Vec<Candidate> {
        if !self.enabled || candidates.len() <= self.max_per_cluster {
            return candidates;
        }

        let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
        let mut kept_names: Vec<String> = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let Some(variable) = catalog.by_index(candidate.index) else { continue };
            let name = variable.name.to_lowercase();

            let duplicates = kept_names
                .iter()
                .filter(|kept_name| {
                    strsim::jaro_winkler(kept_name, &name) >= self.threshold
                })
                .count();

            if duplicates >= self.max_per_cluster {
                continue;
            }
            kept_names.push(name);
            kept.push(candidate);
        }

        kept
    }
}

// ============================================================================
// TESTS
// ============================================================================
