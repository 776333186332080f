//! Retrieval invariants
//!
//! Property-style checks over the contracts every response must honor:
//! result bounds and ordering, score ranges, filter safety, round-trip
//! consistency, and cache idempotence.

use std::sync::Arc;

use cohort_e2e_tests::fixtures::{self, StubEmbedder};
use cohort_core::{
    Config, EngineSnapshot, RetrievalService, SearchRequest, SimilarityFilter,
};

fn hybrid() -> (tempfile::TempDir, RetrievalService) {
    let dir = tempfile::tempdir().unwrap();
    let variables = fixtures::reference_variables();
    let store = fixtures::embedding_store_for(&variables, &dir);
    let snapshot = EngineSnapshot::build(fixtures::catalog(variables), Some(&store));
    let service = RetrievalService::new(
        Config::default(),
        Some(snapshot),
        Some(Arc::new(StubEmbedder::new())),
    );
    (dir, service)
}

const QUERIES: &[&str] = &[
    "urban millennials",
    "high income households",
    "environmentally conscious shoppers",
    "luxury vehicle drivers",
    "adults aged 25 to 34",
    "young families with pets",
];

#[tokio::test]
async fn results_bounded_and_ordered() {
    let (_dir, service) = hybrid();
    let catalog_size = service.stats().unwrap().total_variables;

    for query in QUERIES {
        for top_k in [1usize, 2, 5, 50] {
            let mut request = SearchRequest::new(*query);
            request.top_k = top_k;
            let response = service.search(&request).await.unwrap();

            assert!(
                response.results.len() <= top_k.min(catalog_size),
                "query '{query}' top_k {top_k} returned {}",
                response.results.len()
            );
            for pair in response.results.windows(2) {
                assert!(pair[0].fused_score >= pair[1].fused_score);
            }
        }
    }
}

#[tokio::test]
async fn all_scores_in_unit_interval() {
    let (_dir, service) = hybrid();

    for query in QUERIES {
        let response = service.search(&SearchRequest::new(*query)).await.unwrap();
        for hit in &response.results {
            assert!((0.0..=1.0).contains(&hit.keyword_score), "kw {}", hit.keyword_score);
            assert!((0.0..=1.0).contains(&hit.semantic_score), "sem {}", hit.semantic_score);
            assert!((0.0..=1.0).contains(&hit.fused_score), "fused {}", hit.fused_score);
        }
    }
}

#[tokio::test]
async fn similarity_filter_never_removes_top_candidate() {
    let (_dir, service) = hybrid();

    for query in QUERIES {
        let mut unfiltered = SearchRequest::new(*query);
        unfiltered.similarity = Some(SimilarityFilter { enabled: false, ..Default::default() });
        let full = service.search(&unfiltered).await.unwrap();
        let Some(top) = full.results.first() else { continue };

        let mut filtered = SearchRequest::new(*query);
        filtered.similarity =
            Some(SimilarityFilter { threshold: 0.85, max_per_cluster: 2, enabled: true });
        let kept = service.search(&filtered).await.unwrap();

        assert_eq!(
            kept.results.first().map(|h| h.variable.code.as_str()),
            Some(top.variable.code.as_str()),
            "query '{query}' lost its top candidate"
        );
    }
}

#[tokio::test]
async fn search_results_roundtrip_through_get_variable() {
    let (_dir, service) = hybrid();

    for query in QUERIES {
        let response = service.search(&SearchRequest::new(*query)).await.unwrap();
        for hit in &response.results {
            let fetched = service.get_variable(&hit.variable.code).unwrap();
            assert_eq!(fetched, hit.variable);
        }
    }
}

#[tokio::test]
async fn cached_repeat_search_is_byte_identical() {
    let (_dir, service) = hybrid();
    let request = SearchRequest::new("urban millennials");

    let first = service.search(&request).await.unwrap();
    let second = service.search(&request).await.unwrap();

    // Same Arc back from the cache, so serialization is byte-identical
    assert!(Arc::ptr_eq(&first, &second));
    let a = serde_json::to_vec(first.as_ref()).unwrap();
    let b = serde_json::to_vec(second.as_ref()).unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn filter_reduces_but_preserves_relative_order() {
    let service = fixtures::keyword_service(vec![
        fixtures::variable("AGE_25_34", "Age 25-34", "Adults aged 25 to 34"),
        fixtures::variable("AGE_25_34_A", "Age 25-34 metro", "Adults aged 25 to 34 in metros"),
        fixtures::variable("AGE_25_34_B", "Age 25-34 urban", "Adults aged 25 to 34 in cities"),
        fixtures::variable("AGE_25_34_C", "Age 25-34 rural", "Adults aged 25 to 34 rural"),
        fixtures::variable("PET_DOG", "Dog owners", "Households with a dog"),
    ]);

    let mut unfiltered = SearchRequest::new("adults aged 25 to 34");
    unfiltered.similarity = Some(SimilarityFilter { enabled: false, ..Default::default() });
    let full = service.search(&unfiltered).await.unwrap();

    let mut filtered = SearchRequest::new("adults aged 25 to 34");
    filtered.similarity =
        Some(SimilarityFilter { threshold: 0.85, max_per_cluster: 2, enabled: true });
    let kept = service.search(&filtered).await.unwrap();

    // The cluster of four near-identical names collapses to two
    assert!(kept.results.len() < full.results.len());

    // Kept results appear in the same relative order as unfiltered
    let full_order: Vec<&str> =
        full.results.iter().map(|h| h.variable.code.as_str()).collect();
    let kept_order: Vec<&str> =
        kept.results.iter().map(|h| h.variable.code.as_str()).collect();
    let mut cursor = 0usize;
    for code in &kept_order {
        let position = full_order[cursor..]
            .iter()
            .position(|c| c == code)
            .expect("kept result present in unfiltered order");
        cursor += position + 1;
    }
}

#[tokio::test]
async fn degraded_nlp_still_serves_results() {
    let config = Config { disable_nlp: true, ..Config::default() };
    let snapshot = fixtures::engine(fixtures::reference_variables());
    let service = RetrievalService::new(config, Some(snapshot), None);

    let response = service.search(&SearchRequest::new("high income households")).await.unwrap();
    assert!(response.query_context.degraded);
    assert!(response.query_context.concepts.is_empty());
    assert!(!response.results.is_empty());
    assert!(response.warnings.iter().any(|w| w == "nlp_unavailable"));
}
