//! Inverted keyword index
//!
//! Stemmed tokens map to posting lists of (variable, weighted term
//! frequency). Scoring is tf-idf with field weights (name 3.0, description
//! 1.0, category 0.5), normalized per query so `kw_score` lands in [0,1].
//! Query tokens with no exact posting fall back to fuzzy matching at
//! Levenshtein distance <= 2 with a 0.5 penalty.

use std::collections::HashMap;

use rust_stemmers::{Algorithm, Stemmer};

use crate::catalog::CatalogSnapshot;
use crate::query::{normalize, Query};

use super::Candidate;

/// Field weights applied when accumulating term frequencies
const NAME_WEIGHT: f32 = 3.0;
const DESCRIPTION_WEIGHT: f32 = 1.0;
const CATEGORY_WEIGHT: f32 = 0.5;

/// Fuzzy matches score at half value
const FUZZY_PENALTY: f32 = 0.5;

/// Maximum edit distance for fuzzy posting lookup
const FUZZY_MAX_DISTANCE: usize = 2;

/// Query tokens shorter than this never fuzzy-match
const FUZZY_MIN_TOKEN_LEN: usize = 4;

#[derive(Debug, Clone)]
struct Posting {
    index: u32,
    weight: f32,
}

#[derive(Debug, Clone)]
struct PostingList {
    postings: Vec<Posting>,
    max_weight: f32,
}

/// Inverted index over the catalog's text fields. Rebuilt whole alongside
/// every catalog snapshot; read-only afterwards.
pub struct KeywordIndex {
    lists: HashMap<String, PostingList>,
    total_docs: usize,
}

/// Stem a list of surface tokens, preserving order, dropping duplicates.
pub fn stem_tokens(tokens: &[&str]) -> Vec<String> {
    let stemmer = Stemmer::create(Algorithm::English);
    let mut stems = Vec::with_capacity(tokens.len());
    for token in tokens {
        let stem = stemmer.stem(token).to_string();
        if !stem.is_empty() && !stems.contains(&stem) {
            stems.push(stem);
        }
    }
    stems
}

impl KeywordIndex {
    /// Build the index from a catalog snapshot.
    pub fn build(catalog: &CatalogSnapshot) -> Self {
        let stemmer = Stemmer::create(Algorithm::English);
        let mut lists: HashMap<String, PostingList> = HashMap::new();

        for (ix, variable) in catalog.iter().enumerate() {
            // token -> accumulated field-weighted tf for this variable
            let mut weights: HashMap<String, f32> = HashMap::new();
            let fields = [
                (variable.name.as_str(), NAME_WEIGHT),
                (variable.description.as_str(), DESCRIPTION_WEIGHT),
                (variable.category.as_str(), CATEGORY_WEIGHT),
            ];
            for (text, field_weight) in fields {
                for token in normalize(text).split_whitespace() {
                    let stem = stemmer.stem(token).to_string();
                    if !stem.is_empty() {
                        *weights.entry(stem).or_default() += field_weight;
                    }
                }
            }

            for (stem, weight) in weights {
                let list = lists.entry(stem).or_insert_with(|| PostingList {
                    postings: Vec::new(),
                    max_weight: 0.0,
                });
                list.postings.push(Posting { index: ix as u32, weight });
                list.max_weight = list.max_weight.max(weight);
            }
        }

        Self { lists, total_docs: catalog.len() }
    }

    /// Distinct indexed terms.
    pub fn term_count(&self) -> usize {
        self.lists.len()
    }

    fn idf(&self, df: usize) -> f32 {
        (1.0 + self.total_docs as f32 / df as f32).ln()
    }

    /// Resolve a query stem to a posting list: exact first, then the closest
    /// indexed term within the fuzzy distance budget.
    fn resolve<'a>(&'a self, stem: &str) -> Option<(&'a PostingList, f32)> {
        if let Some(list) = self.lists.get(stem) {
            return Some((list, 1.0));
        }
        if stem.len() < FUZZY_MIN_TOKEN_LEN {
            return None;
        }

        let mut best: Option<(usize, &str)> = None;
        for term in self.lists.keys() {
            if term.len().abs_diff(stem.len()) > FUZZY_MAX_DISTANCE {
                continue;
            }
            let distance = strsim::levenshtein(stem, term);
            if distance > FUZZY_MAX_DISTANCE {
                continue;
            }
            best = match best {
                None => Some((distance, term)),
                Some((d, t)) if distance < d || (distance == d && term.as_str() < t) => {
                    Some((distance, term))
                }
                keep => keep,
            };
        }

        best.map(|(_, term)| (&self.lists[term], FUZZY_PENALTY))
    }

    /// Score the query against the index. Results carry normalized keyword
    /// scores and the surface terms that matched; ordering is score
    /// descending with the shorter-name-then-code tie-break.
    pub fn search(&self, query: &Query, catalog: &CatalogSnapshot, limit: usize) -> Vec<Candidate> {
        let surface_terms = query.search_terms();
        let stems = stem_tokens(&surface_terms);
        if stems.is_empty() {
            return Vec::new();
        }

        // stem position -> surface term, for matched-keyword reporting
        let stemmer = Stemmer::create(Algorithm::English);
        let surface_for_stem: HashMap<String, &str> = surface_terms
            .iter()
            .map(|term| (stemmer.stem(term).to_string(), *term))
            .collect();

        let mut scores: HashMap<u32, f32> = HashMap::new();
        let mut matched: HashMap<u32, Vec<String>> = HashMap::new();
        let mut max_achievable = 0.0f32;

        for stem in &stems {
            let Some((list, penalty)) = self.resolve(stem) else { continue };
            let idf = self.idf(list.postings.len());
            max_achievable += penalty * idf * list.max_weight;

            let surface = surface_for_stem
                .get(stem.as_str())
                .copied()
                .unwrap_or(stem.as_str());

            for posting in &list.postings {
                *scores.entry(posting.index).or_default() += penalty * idf * posting.weight;
                let terms = matched.entry(posting.index).or_default();
                if !terms.iter().any(|t| t == surface) {
                    terms.push(surface.to_string());
                }
            }
        }

        if max_achievable <= 0.0 {
            return Vec::new();
        }

        let mut candidates: Vec<Candidate> = scores
            .into_iter()
            .map(|(ix, raw)| {
                let score = (raw / max_achievable).clamp(0.0, 1.0);
                let terms = matched.remove(&ix).unwrap_or_default();
                Candidate::keyword(ix as usize, score, terms)
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.keyword_score
                .partial_cmp(&a.keyword_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let name_a = catalog.by_index(a.index).map_or(usize::MAX, |v| v.name.len());
                    let name_b = catalog.by_index(b.index).map_or(usize::MAX, |v| v.name.len());
                    name_a.cmp(&name_b)
                })
                .then_with(|| {
                    let code_a = catalog.by_index(a.index).map(|v| v.code.as_str());
                    let code_b = catalog.by_index(b.index).map(|v| v.code.as_str());
                    code_a.cmp(&code_b)
                })
        });
        candidates.truncate(limit);
        candidates
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_variable;
    use crate::query::QueryProcessor;
    use std::collections::HashSet;

    fn catalog() -> CatalogSnapshot {
        let mut income = test_variable(
            "INCOME_HIGH",
            "High household income",
            "Household income over $100k per year",
        );
        income.category = "Financial".to_string();
        CatalogSnapshot::from_variables(vec![
            test_variable("AGE_25_34", "Age 25-34", "Adults aged 25 to 34"),
            income,
            test_variable("PET_DOG", "Dog owners", "Households with at least one dog"),
        ])
        .unwrap()
    }

    fn query(text: &str) -> Query {
        QueryProcessor::default().process(text, &HashSet::new(), true)
    }

    #[test]
    fn test_exact_match_scores_highest() {
        let catalog = catalog();
        let index = KeywordIndex::build(&catalog);

        let results = index.search(&query("household income"), &catalog, 10);
        assert!(!results.is_empty());
        assert_eq!(catalog.by_index(results[0].index).unwrap().code, "INCOME_HIGH");
        assert!(results[0].keyword_score > 0.5);
    }

    #[test]
    fn test_scores_in_unit_range() {
        let catalog = catalog();
        let index = KeywordIndex::build(&catalog);

        for candidate in index.search(&query("adults dogs income"), &catalog, 10) {
            assert!(candidate.keyword_score >= 0.0);
            assert!(candidate.keyword_score <= 1.0);
        }
    }

    #[test]
    fn test_matched_keywords_reported() {
        let catalog = catalog();
        let index = KeywordIndex::build(&catalog);

        let results = index.search(&query("dog households"), &catalog, 10);
        let dog = results
            .iter()
            .find(|c| catalog.by_index(c.index).unwrap().code == "PET_DOG")
            .unwrap();
        assert!(dog.matched_keywords.iter().any(|k| k == "dog"));
    }

    #[test]
    fn test_fuzzy_match_with_penalty() {
        let catalog = catalog();
        let index = KeywordIndex::build(&catalog);

        // "incume" is distance 1 from "income" after stemming
        let fuzzy = index.search(&query("incume"), &catalog, 10);
        let exact = index.search(&query("income"), &catalog, 10);

        assert!(!fuzzy.is_empty());
        assert_eq!(
            catalog.by_index(fuzzy[0].index).unwrap().code,
            catalog.by_index(exact[0].index).unwrap().code,
        );
    }

    #[test]
    fn test_short_unknown_token_no_fuzzy() {
        let catalog = catalog();
        let index = KeywordIndex::build(&catalog);
        assert!(index.search(&query("zq"), &catalog, 10).is_empty());
    }

    #[test]
    fn test_no_match_returns_empty() {
        let catalog = catalog();
        let index = KeywordIndex::build(&catalog);
        assert!(index.search(&query("qwertyuiop asdfghjkl"), &catalog, 10).is_empty());
    }

    #[test]
    fn test_name_field_outweighs_description() {
        let snapshot = CatalogSnapshot::from_variables(vec![
            test_variable("IN_NAME", "Fishing enthusiasts", "People who like the outdoors"),
            test_variable("IN_DESC", "Outdoor hobbies", "Includes fishing and hunting"),
        ])
        .unwrap();
        let index = KeywordIndex::build(&snapshot);

        let results = index.search(&query("fishing"), &snapshot, 10);
        assert_eq!(snapshot.by_index(results[0].index).unwrap().code, "IN_NAME");
        assert!(results[0].keyword_score > results[1].keyword_score);
    }

    #[test]
    fn test_limit_respected() {
        let catalog = catalog();
        let index = KeywordIndex::build(&catalog);
        let results = index.search(&query("households adults income dog"), &catalog, 1);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_stemming_unifies_variants() {
        let catalog = catalog();
        let index = KeywordIndex::build(&catalog);
        // "dogs" stems to "dog"
        let results = index.search(&query("dogs"), &catalog, 10);
        assert!(results
            .iter()
            .any(|c| catalog.by_index(c.index).unwrap().code == "PET_DOG"));
    }
}
