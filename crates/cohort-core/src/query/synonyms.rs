//! Synonym expansion
//!
//! Static surface-token -> synonym map. Each query token contributes at most
//! [`SynonymMap::MAX_PER_TOKEN`] expansions; the map is data and callers may
//! substitute their own.

use std::collections::HashMap;

/// Static synonym table keyed by surface token.
#[derive(Debug, Clone)]
pub struct SynonymMap {
    map: HashMap<String, Vec<String>>,
}

impl SynonymMap {
    /// Synonyms contributed per query token
    pub const MAX_PER_TOKEN: usize = 5;

    pub fn new(map: HashMap<String, Vec<String>>) -> Self {
        Self { map }
    }

    /// Expand a token list into related terms. Duplicates (and terms already
    /// present in the query) are dropped, order is stable.
    pub fn expand(&self, tokens: &[String]) -> Vec<String> {
        let mut expansions = Vec::new();
        for token in tokens {
            let Some(synonyms) = self.map.get(token) else { continue };
            for synonym in synonyms.iter().take(Self::MAX_PER_TOKEN) {
                if !tokens.contains(synonym) && !expansions.contains(synonym) {
                    expansions.push(synonym.clone());
                }
            }
        }
        expansions
    }
}

impl Default for SynonymMap {
    fn default() -> Self {
        let table: &[(&str, &[&str])] = &[
            ("millennials", &["gen y", "young adults", "digital natives"]),
            ("seniors", &["elderly", "retirees", "65 plus"]),
            ("teens", &["teenagers", "adolescents", "youth"]),
            ("affluent", &["wealthy", "high income", "upscale", "prosperous"]),
            ("wealthy", &["affluent", "rich", "high net worth"]),
            ("income", &["earnings", "salary", "household income"]),
            ("urban", &["city", "metropolitan", "metro", "downtown"]),
            ("rural", &["country", "farming", "small town"]),
            ("suburban", &["suburbs", "commuter belt"]),
            ("eco", &["green", "sustainable", "environmental"]),
            ("green", &["eco-friendly", "sustainable", "environmental"]),
            ("sustainable", &["eco-friendly", "green", "environmentally conscious"]),
            ("shoppers", &["buyers", "consumers", "purchasers"]),
            ("buyers", &["shoppers", "purchasers", "customers"]),
            ("car", &["vehicle", "auto", "automobile"]),
            ("drivers", &["motorists", "commuters", "car owners"]),
            ("fitness", &["exercise", "gym", "wellness", "active"]),
            ("health", &["wellness", "healthy", "medical"]),
            ("travel", &["vacation", "tourism", "trips"]),
            ("families", &["households", "parents", "family"]),
            ("homeowners", &["home owners", "property owners"]),
            ("luxury", &["premium", "high end", "upscale"]),
            ("budget", &["value", "discount", "thrifty"]),
            ("tech", &["technology", "digital", "gadgets"]),
            ("pets", &["pet owners", "dogs", "cats"]),
        ];
        let map = table
            .iter()
            .map(|(k, vs)| {
                (k.to_string(), vs.iter().map(|v| v.to_string()).collect())
            })
            .collect();
        Self::new(map)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_expansion_basic() {
        let map = SynonymMap::default();
        let expansions = map.expand(&tokens("urban millennials"));
        assert!(expansions.contains(&"metropolitan".to_string()));
        assert!(expansions.contains(&"gen y".to_string()));
    }

    #[test]
    fn test_unknown_tokens_expand_to_nothing() {
        let map = SynonymMap::default();
        assert!(map.expand(&tokens("zxqv blorp")).is_empty());
    }

    #[test]
    fn test_cap_per_token() {
        let map = SynonymMap::new(HashMap::from([(
            "many".to_string(),
            vec!["a", "b", "c", "d", "e", "f", "g"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        )]));
        let expansions = map.expand(&tokens("many"));
        assert_eq!(expansions.len(), SynonymMap::MAX_PER_TOKEN);
    }

    #[test]
    fn test_no_duplicate_expansions() {
        let map = SynonymMap::default();
        // "eco" and "sustainable" share the "green" synonym
        let expansions = map.expand(&tokens("eco sustainable"));
        let greens = expansions.iter().filter(|e| e.as_str() == "green").count();
        assert_eq!(greens, 1);
    }

    #[test]
    fn test_query_terms_not_repeated() {
        let map = SynonymMap::default();
        // "affluent" expands to "wealthy", which is already in the query
        let expansions = map.expand(&tokens("wealthy affluent"));
        assert!(!expansions.contains(&"wealthy".to_string()));
        assert!(!expansions.contains(&"affluent".to_string()));
    }
}
