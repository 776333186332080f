//! Search Module
//!
//! The retrieval half of the engine:
//! - Inverted keyword index with tf-idf field weighting and fuzzy lookup
//! - Dense semantic index over pre-computed embeddings (brute-force cosine)
//! - Hybrid fusion with domain boosts and concept-coverage bonuses
//! - Jaro-Winkler similarity filter for near-duplicate suppression

mod dedupe;
mod hybrid;
mod keyword;
mod semantic;

pub use dedupe::SimilarityFilter;
pub use hybrid::{fuse, FusionWeights};
pub use keyword::{stem_tokens, KeywordIndex};
pub use semantic::{SemanticIndex, DEFAULT_SEMANTIC_TOP_N};

use serde::{Deserialize, Serialize};

// ============================================================================
// CANDIDATES
// ============================================================================

/// Which pipeline produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Keyword,
    Semantic,
    Hybrid,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Keyword => "keyword",
            SearchMethod::Semantic => "semantic",
            SearchMethod::Hybrid => "hybrid",
        }
    }
}

/// A variable surfaced by one or both indexes for a specific query, carrying
/// scores and retrieval provenance. `index` is positional within the catalog
/// snapshot the search ran against.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub index: usize,
    pub keyword_score: f32,
    pub semantic_score: f32,
    pub fused_score: f32,
    pub matched_keywords: Vec<String>,
    pub matched_concepts: Vec<String>,
    pub method: SearchMethod,
}

impl Candidate {
    pub fn keyword(index: usize, score: f32, matched_keywords: Vec<String>) -> Self {
        Self {
            index,
            keyword_score: score,
            semantic_score: 0.0,
            fused_score: score,
            matched_keywords,
            matched_concepts: Vec::new(),
            method: SearchMethod::Keyword,
        }
    }

    pub fn semantic(index: usize, score: f32) -> Self {
        Self {
            index,
            keyword_score: 0.0,
            semantic_score: score,
            fused_score: score,
            matched_keywords: Vec::new(),
            matched_concepts: Vec::new(),
            method: SearchMethod::Semantic,
        }
    }
}
