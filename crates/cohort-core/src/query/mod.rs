//! Query Understanding
//!
//! Turns a free-form audience description into a structured [`Query`]:
//!
//! 1. Normalize (lowercase, NFKC, punctuation stripped, hyphens kept in compounds)
//! 2. Spell-correct against the catalog lexicon
//! 3. Numeric range extraction (age / income / percentage)
//! 4. Concept extraction against the curated dictionary
//! 5. Synonym expansion
//! 6. Rule-based intent classification
//!
//! Every stage is optional and independently disablable. When the
//! NLP-backed stages (3-4) are unavailable the processor still returns a
//! valid query from the remaining stages, flagged `degraded` - it never
//! blocks the request.

mod concepts;
mod numeric;
mod spell;
mod synonyms;

pub use concepts::{Concept, ConceptCategory, ConceptDictionary, IntentRules};
pub use numeric::{extract as extract_numeric_ranges, FieldHint, NumericRange};
pub use spell::{correct as spell_correct, correct_tokens};
pub use synonyms::SynonymMap;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// QUERY
// ============================================================================

/// Structured representation of one user request. Built per request and
/// discarded after scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Original text as submitted
    pub raw: String,
    /// Lowercased, NFKC-normalized, punctuation-stripped, spell-corrected
    pub normalized: String,
    /// Normalized surface tokens after spell correction
    pub tokens: Vec<String>,
    /// Labeled concept extractions
    pub concepts: Vec<Concept>,
    /// Structured numeric constraints
    pub numeric_ranges: Vec<NumericRange>,
    /// Synonyms and related terms
    pub expansions: Vec<String>,
    /// Domain tags from intent classification
    pub intent_tags: Vec<String>,
    /// True when the NLP-backed stages were skipped
    pub degraded: bool,
}

impl Query {
    /// Distinct concept categories present, as wire strings.
    pub fn concept_categories(&self) -> Vec<&'static str> {
        let mut seen = Vec::new();
        for concept in &self.concepts {
            let label = concept.category.as_str();
            if !seen.contains(&label) {
                seen.push(label);
            }
        }
        seen
    }

    /// All searchable terms: surface tokens plus expansions.
    pub fn search_terms(&self) -> Vec<&str> {
        self.tokens
            .iter()
            .map(String::as_str)
            .chain(self.expansions.iter().map(String::as_str))
            .collect()
    }
}

// ============================================================================
// PROCESSOR
// ============================================================================

/// Per-stage switches. Defaults enable everything; the service maps
/// process-wide configuration (e.g. DISABLE_NLP) onto these.
#[derive(Debug, Clone, Copy)]
pub struct StageToggles {
    pub spell_correction: bool,
    pub numeric_extraction: bool,
    pub concept_extraction: bool,
    pub synonym_expansion: bool,
    pub intent_classification: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            spell_correction: true,
            numeric_extraction: true,
            concept_extraction: true,
            synonym_expansion: true,
            intent_classification: true,
        }
    }
}

/// The query-understanding pipeline. Holds the curated data tables; cheap to
/// share behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct QueryProcessor {
    toggles: StageToggles,
    concepts: ConceptDictionary,
    intents: IntentRules,
    synonyms: SynonymMap,
}

impl QueryProcessor {
    pub fn new(toggles: StageToggles) -> Self {
        Self { toggles, ..Self::default() }
    }

    /// Replace the curated tables (tests parameterize over these).
    pub fn with_tables(
        toggles: StageToggles,
        concepts: ConceptDictionary,
        intents: IntentRules,
        synonyms: SynonymMap,
    ) -> Self {
        Self { toggles, concepts, intents, synonyms }
    }

    /// Run the pipeline. `nlp_available` is false when the NLP feature is
    /// disabled by configuration or tripped by its resource guard; the
    /// numeric and concept stages are then skipped and the result flagged.
    pub fn process(&self, raw: &str, lexicon: &HashSet<String>, nlp_available: bool) -> Query {
        let normalized = normalize(raw);
        let mut tokens: Vec<String> =
            normalized.split_whitespace().map(str::to_string).collect();

        if self.toggles.spell_correction {
            let corrected = correct_tokens(&mut tokens, lexicon);
            if corrected > 0 {
                debug!(corrected, "query tokens spell-corrected");
            }
        }
        // Re-join so downstream substring matching sees corrected words
        let normalized = tokens.join(" ");

        let run_numeric = self.toggles.numeric_extraction && nlp_available;
        let run_concepts = self.toggles.concept_extraction && nlp_available;
        let degraded = (self.toggles.numeric_extraction || self.toggles.concept_extraction)
            && !nlp_available;

        let numeric_ranges = if run_numeric {
            extract_numeric_ranges(&raw.to_lowercase())
        } else {
            Vec::new()
        };

        let concepts = if run_concepts {
            self.concepts.extract(&normalized, &tokens)
        } else {
            Vec::new()
        };

        let expansions = if self.toggles.synonym_expansion {
            self.synonyms.expand(&tokens)
        } else {
            Vec::new()
        };

        let intent_tags = if self.toggles.intent_classification && run_concepts {
            self.intents.classify(&concepts)
        } else {
            Vec::new()
        };

        Query {
            raw: raw.to_string(),
            normalized,
            tokens,
            concepts,
            numeric_ranges,
            expansions,
            intent_tags,
            degraded,
        }
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Stage 1: lowercase, Unicode NFKC, collapse whitespace, strip punctuation
/// except hyphens joining alphanumerics.
pub fn normalize(raw: &str) -> String {
    let lowered = raw.nfkc().collect::<String>().to_lowercase();
    let chars: Vec<char> = lowered.chars().collect();

    let mut out = String::with_capacity(lowered.len());
    for (i, &c) in chars.iter().enumerate() {
        if c.is_alphanumeric() {
            out.push(c);
        } else if c == '-'
            && i > 0
            && chars[i - 1].is_alphanumeric()
            && chars.get(i + 1).is_some_and(|n| n.is_alphanumeric())
        {
            out.push('-');
        } else {
            out.push(' ');
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// TESTS
// ============================================================================
