//! Concept extraction and intent classification
//!
//! Concepts are labeled extractions from the query ("urban" -> geographic)
//! used for intent classification and the scorer's coverage bonus. The
//! dictionary and the domain rules are data, not logic: the defaults carry
//! the curated built-in tables, and callers (tests included) may supply
//! their own.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// CONCEPT TYPES
// ============================================================================

/// Category label attached to an extracted concept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConceptCategory {
    Demographic,
    Financial,
    Geographic,
    Behavioral,
    Psychographic,
}

impl ConceptCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConceptCategory::Demographic => "demographic",
            ConceptCategory::Financial => "financial",
            ConceptCategory::Geographic => "geographic",
            ConceptCategory::Behavioral => "behavioral",
            ConceptCategory::Psychographic => "psychographic",
        }
    }
}

impl std::fmt::Display for ConceptCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A labeled extraction from the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub term: String,
    pub category: ConceptCategory,
}

// ============================================================================
// CONCEPT DICTIONARY
// ============================================================================

/// Curated term -> category table.
///
/// Multi-word terms are matched as substrings of the normalized query;
/// single words are matched against the token set.
#[derive(Debug, Clone)]
pub struct ConceptDictionary {
    entries: Vec<(String, ConceptCategory)>,
}

impl ConceptDictionary {
    pub fn new(entries: Vec<(String, ConceptCategory)>) -> Self {
        Self { entries }
    }

    /// Extract concepts from a normalized query and its token list.
    pub fn extract(&self, normalized: &str, tokens: &[String]) -> Vec<Concept> {
        let mut found = Vec::new();
        for (term, category) in &self.entries {
            let matched = if term.contains(' ') || term.contains('-') {
                normalized.contains(term.as_str())
            } else {
                tokens.iter().any(|t| t == term)
            };
            if matched {
                found.push(Concept { term: term.clone(), category: *category });
            }
        }
        found
    }
}

impl Default for ConceptDictionary {
    fn default() -> Self {
        use ConceptCategory::*;
        let table: &[(&str, ConceptCategory)] = &[
            // Demographic
            ("millennials", Demographic),
            ("millennial", Demographic),
            ("gen z", Demographic),
            ("gen x", Demographic),
            ("boomers", Demographic),
            ("seniors", Demographic),
            ("adults", Demographic),
            ("teens", Demographic),
            ("young adults", Demographic),
            ("parents", Demographic),
            ("families", Demographic),
            ("women", Demographic),
            ("men", Demographic),
            ("singles", Demographic),
            ("married", Demographic),
            ("retirees", Demographic),
            ("students", Demographic),
            ("homeowners", Demographic),
            ("renters", Demographic),
            ("newcomers", Demographic),
            ("immigrants", Demographic),
            // Financial
            ("income", Financial),
            ("high income", Financial),
            ("disposable income", Financial),
            ("affluent", Financial),
            ("wealthy", Financial),
            ("luxury", Financial),
            ("premium", Financial),
            ("budget", Financial),
            ("investors", Financial),
            ("savings", Financial),
            ("credit", Financial),
            ("insurance", Financial),
            ("banking", Financial),
            ("spending", Financial),
            // Geographic
            ("urban", Geographic),
            ("rural", Geographic),
            ("suburban", Geographic),
            ("city", Geographic),
            ("cities", Geographic),
            ("metro", Geographic),
            ("downtown", Geographic),
            ("coastal", Geographic),
            ("regional", Geographic),
            ("neighbourhood", Geographic),
            ("neighborhood", Geographic),
            // Behavioral
            ("shoppers", Behavioral),
            ("buyers", Behavioral),
            ("online shopping", Behavioral),
            ("frequent", Behavioral),
            ("loyal", Behavioral),
            ("travelers", Behavioral),
            ("travel", Behavioral),
            ("commuters", Behavioral),
            ("streaming", Behavioral),
            ("gamers", Behavioral),
            ("fitness", Behavioral),
            ("organic", Behavioral),
            ("early adopters", Behavioral),
            ("pet owners", Behavioral),
            ("drivers", Behavioral),
            ("vehicle", Behavioral),
            ("grocery", Behavioral),
            // Psychographic
            ("environmentally conscious", Psychographic),
            ("eco-friendly", Psychographic),
            ("eco-conscious", Psychographic),
            ("green", Psychographic),
            ("sustainable", Psychographic),
            ("health conscious", Psychographic),
            ("wellness", Psychographic),
            ("adventurous", Psychographic),
            ("tech-savvy", Psychographic),
            ("socially conscious", Psychographic),
            ("trendy", Psychographic),
            ("family-oriented", Psychographic),
        ];
        Self::new(table.iter().map(|(t, c)| (t.to_string(), *c)).collect())
    }
}

// ============================================================================
// INTENT RULES
// ============================================================================

/// Domain tagging rules: a query is tagged with a domain when at least
/// [`IntentRules::MIN_CONCEPTS`] of its concepts belong to that domain.
#[derive(Debug, Clone)]
pub struct IntentRules {
    domains: Vec<(String, Vec<String>)>,
}

impl IntentRules {
    /// Concepts required before a domain tag attaches
    pub const MIN_CONCEPTS: usize = 2;

    pub fn new(domains: Vec<(String, Vec<String>)>) -> Self {
        Self { domains }
    }

    /// Classify extracted concepts into domain tags.
    pub fn classify(&self, concepts: &[Concept]) -> Vec<String> {
        let mut tags = Vec::new();
        for (domain, terms) in &self.domains {
            let hits = concepts.iter().filter(|c| terms.contains(&c.term)).count();
            if hits >= Self::MIN_CONCEPTS {
                tags.push(domain.clone());
            }
        }
        tags
    }

    /// Domain -> hit count for a concept list, regardless of the tag cutoff.
    pub fn hit_counts(&self, concepts: &[Concept]) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for (domain, terms) in &self.domains {
            let hits = concepts.iter().filter(|c| terms.contains(&c.term)).count();
            if hits > 0 {
                counts.insert(domain.clone(), hits);
            }
        }
        counts
    }
}

impl Default for IntentRules {
    fn default() -> Self {
        let table: &[(&str, &[&str])] = &[
            (
                "automotive",
                &["drivers", "vehicle", "commuters", "luxury", "premium"],
            ),
            (
                "health",
                &["fitness", "wellness", "organic", "health conscious", "adventurous"],
            ),
            (
                "finance",
                &["income", "high income", "investors", "savings", "credit", "insurance",
                  "banking", "affluent", "wealthy"],
            ),
            (
                "travel",
                &["travel", "travelers", "adventurous", "coastal", "frequent"],
            ),
            (
                "retail",
                &["shoppers", "buyers", "online shopping", "grocery", "loyal", "spending"],
            ),
            (
                "immigration",
                &["immigrants", "newcomers"],
            ),
            (
                "sustainability",
                &["environmentally conscious", "eco-friendly", "eco-conscious", "green",
                  "sustainable", "socially conscious"],
            ),
        ];
        Self::new(
            table
                .iter()
                .map(|(d, terms)| {
                    (d.to_string(), terms.iter().map(|t| t.to_string()).collect())
                })
                .collect(),
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
