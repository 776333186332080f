//! Test data factory
//!
//! Builds in-memory catalogs, deterministic embedding providers, and wired
//! services so scenario tests never touch the network or real catalog files.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use cohort_core::router::stable_hash;
use cohort_core::{
    CatalogSnapshot, ClusterError, ClusterRequest, Config, EmbeddingError, EmbeddingProvider,
    EngineSnapshot, Operator, RetrievalService, Segment, SegmentClusterer, Variable, VariableType,
};

/// Embedding dimension used across the test suite
pub const DIM: usize = 16;

// ============================================================================
// CATALOG BUILDERS
// ============================================================================

/// A catalog variable with sensible defaults.
pub fn variable(code: &str, name: &str, description: &str) -> Variable {
    Variable {
        code: code.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        category: "Demographics".to_string(),
        theme: "People".to_string(),
        product: "Consumer".to_string(),
        domain: "general".to_string(),
        data_type: VariableType::Categorical,
        operators: Operator::defaults_for(VariableType::Categorical),
    }
}

/// Same, with a category facet.
pub fn variable_in(code: &str, name: &str, description: &str, category: &str) -> Variable {
    let mut v = variable(code, name, description);
    v.category = category.to_string();
    v
}

/// The small reference catalog the scenario tests share.
pub fn reference_variables() -> Vec<Variable> {
    vec![
        variable("AGE_25_34", "Age 25-34", "Adults aged 25 to 34"),
        variable("AGE_25_34_URBAN", "Age 25-34 urban", "Adults aged 25 to 34 living in cities"),
        variable("AGE_25_34_RURAL", "Age 25-34 rural", "Adults aged 25 to 34 in rural areas"),
        variable_in(
            "INCOME_HIGH",
            "High household income",
            "Household income over $100k",
            "Financial",
        ),
        variable_in(
            "ECO_SHOPPER",
            "Eco-conscious shoppers",
            "Environmentally conscious urban shoppers who prefer sustainable brands",
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

pub fn catalog(variables: Vec<Variable>) -> CatalogSnapshot {
    CatalogSnapshot::from_variables(variables).expect("fixture catalog is valid")
}

// ============================================================================
// EMBEDDING PROVIDERS
// ============================================================================

/// Deterministic text embedding: each token flips sign bits taken from its
/// stable hash, so identical texts map to identical vectors and shared
/// vocabulary correlates them.
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIM];
    for token in text.to_lowercase().split_whitespace() {
        let hash = stable_hash(token);
        for (j, value) in vector.iter_mut().enumerate() {
            let bit = (hash >> (j % 64)) & 1;
            *value += if bit == 1 { 1.0 } else { -1.0 };
        }
    }
    vector
}

/// In-process provider backed by [`embed_text`]. Counts calls so tests can
/// assert on retry behavior.
pub struct StubEmbedder {
    calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self { calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StubEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(embed_text(text))
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model(&self) -> &str {
        "stub-hash-16"
    }
}

/// Provider that always fails, for outage scenarios.
pub struct FailingEmbedder {
    calls: AtomicUsize,
}

impl FailingEmbedder {
    pub fn new() -> Self {
        Self { calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for FailingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(EmbeddingError::Provider("simulated outage".to_string()))
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model(&self) -> &str {
        "failing-stub"
    }
}

// ============================================================================
// ENGINE ASSEMBLY
// ============================================================================

/// Write an embeddings sidecar for the variables (vectors derived from name
/// plus description) and read it back as a store.
pub fn embedding_store_for(
    variables: &[Variable],
    dir: &tempfile::TempDir,
) -> cohort_core::EmbeddingStore {
    let path = dir.path().join("embeddings.chev");
    let entries: Vec<(String, Vec<f32>)> = variables
        .iter()
        .map(|v| {
            let text = format!("{} {}", v.name, v.description);
            (v.code.clone(), embed_text(&text))
        })
        .collect();
    cohort_core::write_embedding_store(&path, "stub-hash-16", DIM, &entries)
        .expect("sidecar write");
    cohort_core::read_embedding_store(&path).expect("sidecar read")
}

/// Keyword-only engine snapshot.
pub fn engine(variables: Vec<Variable>) -> EngineSnapshot {
    EngineSnapshot::build(catalog(variables), None)
}

/// Service with no semantic path.
pub fn keyword_service(variables: Vec<Variable>) -> RetrievalService {
    RetrievalService::new(Config::default(), Some(engine(variables)), None)
}

/// Service with the full hybrid path backed by the stub embedder.
pub fn hybrid_service(variables: Vec<Variable>, dir: &tempfile::TempDir) -> RetrievalService {
    let store = embedding_store_for(&variables, dir);
    let snapshot = EngineSnapshot::build(catalog(variables), Some(&store));
    RetrievalService::new(Config::default(), Some(snapshot), Some(Arc::new(StubEmbedder::new())))
}

/// Service whose embedding provider is down.
pub fn outage_service(variables: Vec<Variable>, dir: &tempfile::TempDir) -> RetrievalService {
    let store = embedding_store_for(&variables, dir);
    let snapshot = EngineSnapshot::build(catalog(variables), Some(&store));
    RetrievalService::new(Config::default(), Some(snapshot), Some(Arc::new(FailingEmbedder::new())))
}

// ============================================================================
// CLUSTERER STUB
// ============================================================================

/// Fixed-output clusterer for session journeys.
pub struct FixedClusterer;

#[async_trait]
impl SegmentClusterer for FixedClusterer {
    async fn cluster(&self, request: ClusterRequest) -> Result<Vec<Segment>, ClusterError> {
        if request.variables.is_empty() {
            return Err(ClusterError("no variables".to_string()));
        }
        Ok(vec![
            Segment { id: 1, label: "Core".to_string(), size: 60_000, centroid: HashMap::new() },
            Segment { id: 2, label: "Growth".to_string(), size: 80_000, centroid: HashMap::new() },
        ])
    }
}
