//! Hybrid score fusion
//!
//! Merges keyword and semantic candidate lists into one ranked list:
//!
//! - Both contributed: `fused = w_sem * sem + w_kw * kw` (default 0.7 / 0.3)
//! - One contributed: fused is the contributing score, unweighted
//! - Domain boost: intent tag matching the variable's category or domain
//!   facet multiplies fused by 1.1
//! - Concept coverage: `0.02 * min(5, distinct concept matches)` added
//! - Fused is capped at 1.0 after boost and bonus
//!
//! Ordering: fused desc, keyword score desc, code asc.

use std::collections::HashMap;

use crate::catalog::{CatalogSnapshot, Variable};
use crate::query::Query;

use super::{Candidate, SearchMethod};

/// Domain-intent multiplier
const DOMAIN_BOOST: f32 = 1.1;

/// Per-concept additive bonus and its cap
const CONCEPT_BONUS: f32 = 0.02;
const CONCEPT_BONUS_CAP: usize = 5;

/// Fusion weights, configurable per request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub semantic: f32,
    pub keyword: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { semantic: 0.7, keyword: 0.3 }
    }
}

/// Fuse the two candidate lists into one ranked list.
pub fn fuse(
    keyword: Vec<Candidate>,
    semantic: Vec<Candidate>,
    query: &Query,
    catalog: &CatalogSnapshot,
    weights: FusionWeights,
) -> Vec<Candidate> {
    let mut merged: HashMap<usize, Candidate> = HashMap::new();

    for candidate in keyword {
        merged.insert(candidate.index, candidate);
    }
    for candidate in semantic {
        match merged.get_mut(&candidate.index) {
            Some(existing) => {
                existing.semantic_score = candidate.semantic_score;
                existing.method = SearchMethod::Hybrid;
            }
            None => {
                merged.insert(candidate.index, candidate);
            }
        }
    }

    let mut fused: Vec<Candidate> = merged
        .into_values()
        .filter_map(|mut candidate| {
            let variable = catalog.by_index(candidate.index)?;

            let base = match (candidate.keyword_score > 0.0, candidate.semantic_score > 0.0) {
                (true, true) => {
                    weights.keyword * candidate.keyword_score
                        + weights.semantic * candidate.semantic_score
                }
                (true, false) => candidate.keyword_score,
                (false, true) => candidate.semantic_score,
                (false, false) => return None,
            };

            candidate.matched_concepts = matched_concepts(query, variable);

            let mut score = base;
            if has_domain_intent(query, variable) {
                score *= DOMAIN_BOOST;
            }
            let coverage = candidate.matched_concepts.len().min(CONCEPT_BONUS_CAP);
            score += CONCEPT_BONUS * coverage as f32;

            candidate.fused_score = score.clamp(0.0, 1.0);
            Some(candidate)
        })
        .collect();

    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.keyword_score
                    .partial_cmp(&a.keyword_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| {
                let code_a = catalog.by_index(a.index).map(|v| v.code.as_str());
                let code_b = catalog.by_index(b.index).map(|v| v.code.as_str());
                code_a.cmp(&code_b)
            })
    });

    fused
}

/// Which of the query's distinct concepts this variable's text covers.
fn matched_concepts(query: &Query, variable: &Variable) -> Vec<String> {
    if query.concepts.is_empty() {
        return Vec::new();
    }
    let text = format!(
        "{} {} {}",
        variable.name.to_lowercase(),
        variable.description.to_lowercase(),
        variable.category.to_lowercase(),
    );
    let mut matched = Vec::new();
    for concept in &query.concepts {
        if text.contains(&concept.term) && !matched.contains(&concept.term) {
            matched.push(concept.term.clone());
        }
    }
    matched
}

/// True when one of the query's intent tags names this variable's category
/// or domain facet.
fn has_domain_intent(query: &Query, variable: &Variable) -> bool {
    if query.intent_tags.is_empty() {
        return false;
    }
    let category = variable.category.to_lowercase();
    let domain = variable.domain.to_lowercase();
    query
        .intent_tags
        .iter()
        .any(|tag| tag.as_str() == category || tag.as_str() == domain)
}

// ============================================================================
// TESTS
// ============================================================================
