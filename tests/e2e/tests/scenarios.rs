//! End-to-end retrieval scenarios
//!
//! Each scenario wires a purpose-built catalog through the real service:
//! happy-path hybrid search, duplicate suppression, provider outage, and
//! catalog snapshot consistency across a mid-request reload.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cohort_e2e_tests::fixtures::{
    self, embed_text, outage_service, variable, variable_in, FailingEmbedder, StubEmbedder, DIM,
};
use cohort_core::{
    Config, EmbeddingError, EmbeddingProvider, EngineSnapshot, RetrievalService, SearchRequest,
    SimilarityFilter,
};

// ============================================================================
// S1 - HAPPY-PATH SEARCH
// ============================================================================

fn s1_variables() -> Vec<cohort_core::Variable> {
    vec![
        variable("AGE_25_34", "Age 25-34", "Adults aged 25 to 34"),
        variable_in(
            "INCOME_HIGH",
            "High household income",
            "Household income over $100k",
            "Financial",
        ),
        variable_in(
            "ECO_SHOPPER",
            "Eco-conscious shoppers",
            "Environmentally conscious urban shoppers",
            "Lifestyle",
        ),
        variable_in(
            "CAR_LUXURY",
            "Luxury vehicle intenders",
            "Drivers planning to buy a premium vehicle",
            "Automotive",
        ),
    ]
}

#[tokio::test]
async fn s1_happy_path_search() {
    let dir = tempfile::tempdir().unwrap();
    let service = fixtures::hybrid_service(s1_variables(), &dir);

    let mut request = SearchRequest::new("millennials with high income");
    request.top_k = 5;
    let response = service.search(&request).await.unwrap();

    let codes: Vec<&str> =
        response.results.iter().map(|hit| hit.variable.code.as_str()).collect();
    assert!(codes.contains(&"AGE_25_34"), "results were {codes:?}");
    assert!(codes.contains(&"INCOME_HIGH"), "results were {codes:?}");

    // Ordered by fused score
    for pair in response.results.windows(2) {
        assert!(pair[0].fused_score >= pair[1].fused_score);
    }

    // The processor understood both audience dimensions
    assert!(response.query_context.concepts.iter().any(|c| c == "demographic"));
    assert!(response.query_context.concepts.iter().any(|c| c == "financial"));

    assert!(response.methods_used.keyword);
    assert!(response.methods_used.semantic);
}

// ============================================================================
// S2 - SIMILARITY FILTER SUPPRESSES DUPLICATES
// ============================================================================

fn s2_variables() -> Vec<cohort_core::Variable> {
    vec![
        variable("AGE_25_34", "Age 25-34", "Adults aged 25 to 34"),
        variable("AGE_25_34_URBAN", "Age 25-34 urban", "Adults aged 25 to 34 living in cities"),
        variable("AGE_25_34_RURAL", "Age 25-34 rural", "Adults aged 25 to 34 in rural areas"),
    ]
}

#[tokio::test]
async fn s2_similarity_filter_suppresses_duplicates() {
    let service = fixtures::keyword_service(s2_variables());

    let mut request = SearchRequest::new("adults 25 to 34");
    request.top_k = 10;
    request.similarity =
        Some(SimilarityFilter { threshold: 0.85, max_per_cluster: 2, enabled: true });
    let response = service.search(&request).await.unwrap();

    // Exactly 2 of the 3 near-identical entries survive
    assert_eq!(response.results.len(), 2);

    // The top-scored candidate is present: with equal scores the shorter
    // name wins the tie-break, so the base variable leads
    assert_eq!(response.results[0].variable.code, "AGE_25_34");

    // Unfiltered, all three come back
    let mut unfiltered = SearchRequest::new("adults 25 to 34");
    unfiltered.top_k = 10;
    unfiltered.similarity = Some(SimilarityFilter { enabled: false, ..Default::default() });
    let full = service.search(&unfiltered).await.unwrap();
    assert_eq!(full.results.len(), 3);
    assert_eq!(full.results[0].variable.code, response.results[0].variable.code);
}

// ============================================================================
// S3 - SEMANTIC PROVIDER OUTAGE
// ============================================================================

#[tokio::test]
async fn s3_semantic_provider_outage_degrades_gracefully() {
    let dir = tempfile::tempdir().unwrap();
    let service = outage_service(s1_variables(), &dir);

    let mut request = SearchRequest::new("millennials with high income");
    request.top_k = 5;
    let response = service.search(&request).await.unwrap();

    assert!(!response.methods_used.semantic);
    assert!(response.methods_used.keyword);
    assert!(response.warnings.iter().any(|w| w == "semantic_unavailable"));
    assert!(!response.results.is_empty());
}

#[tokio::test]
async fn s3_outage_retries_twice_then_degrades() {
    let failing = Arc::new(FailingEmbedder::new());
    let dir = tempfile::tempdir().unwrap();
    let variables = s1_variables();
    let store = fixtures::embedding_store_for(&variables, &dir);
    let snapshot = EngineSnapshot::build(fixtures::catalog(variables), Some(&store));
    let service =
        RetrievalService::new(Config::default(), Some(snapshot), Some(failing.clone()));

    let response = service.search(&SearchRequest::new("high income")).await.unwrap();
    assert!(response.warnings.iter().any(|w| w == "semantic_unavailable"));

    // Initial attempt plus exactly two retries
    assert_eq!(failing.calls(), 3);
}

// ============================================================================
// S6 - CATALOG SNAPSHOT CONSISTENCY
// ============================================================================

/// Stub that answers slowly, holding the request open across a reload.
struct SlowEmbedder {
    delay: Duration,
}

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        tokio::time::sleep(self.delay).await;
        Ok(embed_text(text))
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model(&self) -> &str {
        "slow-stub"
    }
}

#[tokio::test]
async fn s6_snapshot_consistency_across_reload() {
    let dir = tempfile::tempdir().unwrap();
    let variables = s1_variables();
    let store = fixtures::embedding_store_for(&variables, &dir);
    let snapshot = EngineSnapshot::build(fixtures::catalog(variables), Some(&store));
    let service = Arc::new(RetrievalService::new(
        Config::default(),
        Some(snapshot),
        Some(Arc::new(SlowEmbedder { delay: Duration::from_millis(300) })),
    ));

    // Long-running request pinned to the original snapshot
    let long_running = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let mut request = SearchRequest::new("adults aged 25 to 34");
            request.top_k = 10;
            service.search(&request).await
        })
    };

    // Mid-flight, swap in a catalog without AGE_25_34
    tokio::time::sleep(Duration::from_millis(100)).await;
    let replacement: Vec<cohort_core::Variable> = s1_variables()
        .into_iter()
        .filter(|v| v.code != "AGE_25_34")
        .collect();
    service.install_snapshot(EngineSnapshot::build(fixtures::catalog(replacement), None));

    // The in-flight request still sees its starting snapshot
    let old_view = long_running.await.unwrap().unwrap();
    assert!(old_view.results.iter().any(|hit| hit.variable.code == "AGE_25_34"));

    // A request started after the swap does not
    let mut request = SearchRequest::new("adults aged 25 to 34");
    request.top_k = 10;
    let new_view = service.search(&request).await.unwrap();
    assert!(!new_view.results.iter().any(|hit| hit.variable.code == "AGE_25_34"));
}

// ============================================================================
// BOUNDARY BEHAVIORS
// ============================================================================

#[tokio::test]
async fn empty_query_is_invalid() {
    let service = fixtures::keyword_service(s1_variables());
    let result = service.search(&SearchRequest::new("")).await;
    assert!(matches!(result, Err(cohort_core::ServiceError::InvalidQuery)));
}

#[tokio::test]
async fn top_k_bounds_are_clamped_with_warnings() {
    let service = fixtures::keyword_service(s1_variables());

    let mut low = SearchRequest::new("income");
    low.top_k = 0;
    let response = service.search(&low).await.unwrap();
    assert!(response.warnings.iter().any(|w| w.contains("clamped to 1")));
    assert!(response.results.len() <= 1);

    let mut high = SearchRequest::new("income");
    high.top_k = 10_000;
    let response = service.search(&high).await.unwrap();
    assert!(response.warnings.iter().any(|w| w.contains("clamped to 200")));
}

#[tokio::test]
async fn zero_match_query_is_still_ok() {
    let service = fixtures::keyword_service(s1_variables());
    let response = service.search(&SearchRequest::new("quantum chromodynamics")).await.unwrap();
    assert!(response.results.is_empty());
    assert_eq!(response.total_found, 0);
}

#[tokio::test]
async fn semantic_only_search_still_returns() {
    let dir = tempfile::tempdir().unwrap();
    let variables = s1_variables();
    let store = fixtures::embedding_store_for(&variables, &dir);
    let snapshot = EngineSnapshot::build(fixtures::catalog(variables), Some(&store));
    let service = RetrievalService::new(
        Config::default(),
        Some(snapshot),
        Some(Arc::new(StubEmbedder::new())),
    );

    let mut request = SearchRequest::new("adults aged 25 to 34");
    request.use_keyword = false;
    let response = service.search(&request).await.unwrap();
    assert!(response.methods_used.semantic);
    assert!(!response.methods_used.keyword);
    assert!(!response.results.is_empty());
}
