//! Retrieval Façade
//!
//! Single entry point for variable retrieval: search, refine, fetch-by-code,
//! category listing, stats, and the legacy/unified routing decision.
//!
//! Requests load one [`EngineSnapshot`] (catalog + both indexes) and use it
//! for their whole lifetime; catalog reloads build a complete new snapshot
//! and swap the pointer, so in-flight requests keep a consistent view.
//! Keyword and semantic lookups run as a fork-join inside the request's
//! deadline; the semantic path degrades to keyword-only on provider failure
//! instead of failing the request.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{self, CatalogError, CatalogSnapshot, Facet, Operator, Variable, VariableType};
use crate::config::Config;
use crate::embeddings::{
    read_embedding_store, EmbeddingError, EmbeddingProvider, EmbeddingStore,
    RemoteEmbeddingProvider,
};
use crate::guard::{backoff_delay, Outcome, ResourceGuard};
use crate::query::{Query, QueryProcessor, StageToggles};
use crate::router::{RouteDecision, RouterStatus, SearchRouter};
use crate::search::{
    fuse, Candidate, FusionWeights, KeywordIndex, SearchMethod, SemanticIndex,
    SimilarityFilter, DEFAULT_SEMANTIC_TOP_N,
};

/// `top_k` bounds: requests outside [1, MAX_TOP_K] are clamped with a warning.
pub const MAX_TOP_K: usize = 200;
pub const DEFAULT_TOP_K: usize = 50;

/// Backoff schedule for query-time embedding calls: two retries after the
/// initial attempt, 200 ms base doubling up to 2 s.
const EMBED_RETRIES: usize = 2;
const EMBED_BACKOFF_BASE: Duration = Duration::from_millis(200);
const EMBED_BACKOFF_CAP: Duration = Duration::from_secs(2);

/// How many candidates each index contributes before fusion and filtering.
const CANDIDATE_POOL: usize = DEFAULT_SEMANTIC_TOP_N;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Façade error type. `kind()` is the wire identifier the HTTP layer maps
/// to status codes.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Empty or whitespace-only query
    #[error("Query must not be empty")]
    InvalidQuery,
    /// Code lookup missed
    #[error("Variable not found: {0}")]
    NotFound(String),
    /// Public-operation deadline exceeded; partial work discarded
    #[error("Operation deadline exceeded")]
    Timeout,
    /// Catalog not loaded (startup race or failed reload); retryable
    #[error("Catalog is not loaded")]
    ServiceUnavailable,
    /// Catalog load/reload failure
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// Embeddings sidecar failure at boot
    #[error(transparent)]
    Embeddings(#[from] EmbeddingError),
}

impl ServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::InvalidQuery => "invalid_query",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Timeout => "timeout",
            ServiceError::ServiceUnavailable => "service_unavailable",
            ServiceError::Catalog(_) => "catalog_load_error",
            ServiceError::Embeddings(_) => "upstream_failure",
        }
    }
}

/// Façade result type
pub type Result<T> = std::result::Result<T, ServiceError>;

// ============================================================================
// SNAPSHOT BUNDLE
// ============================================================================

/// Catalog plus both indexes, built together and swapped together so every
/// request reads one consistent generation.
pub struct EngineSnapshot {
    pub catalog: Arc<CatalogSnapshot>,
    pub keyword: KeywordIndex,
    pub semantic: Option<SemanticIndex>,
}

impl EngineSnapshot {
    pub fn build(catalog: CatalogSnapshot, store: Option<&EmbeddingStore>) -> Self {
        let catalog = Arc::new(catalog);
        let keyword = KeywordIndex::build(&catalog);
        let semantic = store.map(|s| SemanticIndex::build(&catalog, s));
        Self { catalog, keyword, semantic }
    }
}

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

/// Facet constraints applied after fusion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.theme.is_none() && self.category.is_none()
    }

    fn accepts(&self, variable: &Variable) -> bool {
        let matches = |want: &Option<String>, have: &str| {
            want.as_ref().is_none_or(|w| w.eq_ignore_ascii_case(have))
        };
        matches(&self.theme, &variable.theme) && matches(&self.category, &variable.category)
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_true() -> bool {
    true
}

/// One retrieval request. The JSON shape matches the HTTP search body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_true")]
    pub use_semantic: bool,
    #[serde(default = "default_true")]
    pub use_keyword: bool,
    #[serde(default)]
    pub filters: SearchFilters,
    /// Per-request fusion weight override; bypasses the result cache
    #[serde(skip)]
    pub weights: Option<FusionWeights>,
    /// Per-request similarity filter override; bypasses the result cache
    #[serde(skip)]
    pub similarity: Option<SimilarityFilter>,
    /// Per-request deadline override
    #[serde(skip)]
    pub deadline: Option<Duration>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: DEFAULT_TOP_K,
            use_semantic: true,
            use_keyword: true,
            filters: SearchFilters::default(),
            weights: None,
            similarity: None,
            deadline: None,
        }
    }
}

/// Wire view of a catalog variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableView {
    pub code: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub theme: String,
    pub product: String,
    pub domain: String,
    pub data_type: VariableType,
    pub operators: Vec<Operator>,
}

impl From<&Variable> for VariableView {
    fn from(variable: &Variable) -> Self {
        Self {
            code: variable.code.clone(),
            name: variable.name.clone(),
            description: variable.description.clone(),
            category: variable.category.clone(),
            theme: variable.theme.clone(),
            product: variable.product.clone(),
            domain: variable.domain.clone(),
            data_type: variable.data_type,
            operators: variable.operators.clone(),
        }
    }
}

/// One scored result row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub variable: VariableView,
    pub keyword_score: f32,
    pub semantic_score: f32,
    pub fused_score: f32,
    pub matched_keywords: Vec<String>,
    pub matched_concepts: Vec<String>,
    pub search_method: SearchMethod,
}

/// What the query processor understood, echoed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryContext {
    pub raw: String,
    pub normalized: String,
    /// Distinct concept categories ("demographic", "financial", ...)
    pub concepts: Vec<String>,
    /// The matched concept terms themselves
    pub concept_terms: Vec<String>,
    pub numeric_ranges: Vec<crate::query::NumericRange>,
    pub expansions: Vec<String>,
    pub intent_tags: Vec<String>,
    pub degraded: bool,
}

impl QueryContext {
    fn from_query(query: &Query) -> Self {
        Self {
            raw: query.raw.clone(),
            normalized: query.normalized.clone(),
            concepts: query.concept_categories().iter().map(|s| s.to_string()).collect(),
            concept_terms: query.concepts.iter().map(|c| c.term.clone()).collect(),
            numeric_ranges: query.numeric_ranges.clone(),
            expansions: query.expansions.clone(),
            intent_tags: query.intent_tags.clone(),
            degraded: query.degraded,
        }
    }
}

/// Which retrieval methods actually ran for this response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MethodsUsed {
    pub keyword: bool,
    pub semantic: bool,
}

/// The search/refine response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total_found: usize,
    pub query_context: QueryContext,
    pub methods_used: MethodsUsed,
    pub warnings: Vec<String>,
}

/// Category listing response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryResponse {
    pub results: Vec<VariableView>,
    pub total_found: usize,
    pub warnings: Vec<String>,
}

/// Service statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total_variables: usize,
    pub by_theme: HashMap<String, usize>,
    pub by_product: HashMap<String, usize>,
    pub by_domain: HashMap<String, usize>,
    pub has_embeddings: bool,
    pub embedded_variables: usize,
    pub snapshot_generation: u64,
    pub config: StatsConfig,
}

/// Effective configuration echo inside `stats()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    pub similarity_threshold: f64,
    pub similarity_max_per_cluster: usize,
    pub nlp_enabled: bool,
    pub router: RouterStatus,
}

// ============================================================================
// RESULT CACHE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    query: String,
    top_k: usize,
    use_semantic: bool,
    use_keyword: bool,
    filters: SearchFilters,
}

struct CacheEntry {
    response: Arc<SearchResponse>,
    inserted_at: Instant,
    generation: u64,
}

// ============================================================================
// SERVICE
// ============================================================================

/// The retrieval façade. All dependencies are explicit fields injected at
/// construction; tests build one with stub providers and in-memory catalogs.
pub struct RetrievalService {
    snapshot: ArcSwapOption<EngineSnapshot>,
    processor: QueryProcessor,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    embedding_guard: ResourceGuard,
    nlp_guard: ResourceGuard,
    router: SearchRouter,
    cache: Mutex<LruCache<CacheKey, CacheEntry>>,
    config: Config,
}

impl RetrievalService {
    /// Assemble a service from parts. `snapshot` may be `None` to model a
    /// not-yet-loaded catalog (`ServiceUnavailable` until a reload lands).
    pub fn new(
        config: Config,
        snapshot: Option<EngineSnapshot>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        let embedding_guard = if embedder.is_some() {
            ResourceGuard::new(
                "embedding_provider",
                config.deadlines.embedding,
                config.failure_threshold,
                config.failure_window,
            )
        } else {
            ResourceGuard::disabled("embedding_provider")
        };
        let nlp_guard = if config.disable_nlp {
            ResourceGuard::disabled("nlp")
        } else {
            ResourceGuard::new(
                "nlp",
                config.deadlines.nlp_init,
                config.failure_threshold,
                config.failure_window,
            )
        };

        let cache_capacity = NonZeroUsize::new(config.cache_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);

        Self {
            snapshot: ArcSwapOption::from(snapshot.map(Arc::new)),
            processor: QueryProcessor::new(StageToggles::default()),
            embedder,
            embedding_guard,
            nlp_guard,
            router: SearchRouter::new(config.use_unified, config.rollout_percentage),
            cache: Mutex::new(LruCache::new(cache_capacity)),
            config,
        }
    }

    /// Boot from configuration: load the catalog (columnar preferred), the
    /// embeddings sidecar when configured, and wire the remote provider.
    pub async fn from_config(config: Config) -> Result<Self> {
        let catalog_path = config.catalog_path.clone();
        let snapshot = load_with_deadline(config.deadlines.file_read, move || {
            catalog::load(&catalog_path)
        })
        .await??;

        let store = match (&config.embeddings_path, &config.embedding_api_key) {
            (Some(path), Some(_)) => {
                let path = path.clone();
                match load_with_deadline(config.deadlines.file_read, move || {
                    read_embedding_store(&path)
                })
                .await?
                {
                    Ok(store) => {
                        info!(
                            vectors = store.len(),
                            dimension = store.dimension(),
                            model = %store.metadata().model_name,
                            "embeddings sidecar loaded"
                        );
                        Some(store)
                    }
                    Err(e) => {
                        warn!(error = %e, "embeddings sidecar unavailable; semantic path disabled");
                        None
                    }
                }
            }
            _ => None,
        };

        let embedder: Option<Arc<dyn EmbeddingProvider>> = match (&config.embedding_api_key, &store)
        {
            (Some(key), Some(store)) => Some(Arc::new(RemoteEmbeddingProvider::new(
                config.embedding_endpoint.clone(),
                key.clone(),
                config.embedding_model.clone(),
                store.dimension(),
            ))),
            _ => None,
        };

        let engine = EngineSnapshot::build(snapshot, store.as_ref());
        info!(
            variables = engine.catalog.len(),
            embedded = engine.semantic.as_ref().map_or(0, SemanticIndex::len),
            generation = engine.catalog.generation(),
            "catalog loaded"
        );

        Ok(Self::new(config, Some(engine), embedder))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn router(&self) -> &SearchRouter {
        &self.router
    }

    /// The NLP guard, exposed so operators can reset a tripped flag.
    pub fn nlp_guard(&self) -> &ResourceGuard {
        &self.nlp_guard
    }

    pub fn embedding_guard(&self) -> &ResourceGuard {
        &self.embedding_guard
    }

    fn current_snapshot(&self) -> Result<Arc<EngineSnapshot>> {
        self.snapshot.load_full().ok_or(ServiceError::ServiceUnavailable)
    }

    /// Swap in a freshly loaded catalog. The new snapshot is built completely
    /// before the pointer moves; a load failure leaves the old one serving.
    pub async fn reload(&self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        let catalog = load_with_deadline(self.config.deadlines.file_read, move || {
            catalog::load(&path)
        })
        .await??;

        let store = match &self.config.embeddings_path {
            Some(store_path) => {
                let store_path = store_path.clone();
                load_with_deadline(self.config.deadlines.file_read, move || {
                    read_embedding_store(&store_path)
                })
                .await?
                .ok()
            }
            None => None,
        };

        let engine = EngineSnapshot::build(catalog, store.as_ref());
        info!(
            variables = engine.catalog.len(),
            generation = engine.catalog.generation(),
            "catalog snapshot swapped"
        );
        self.snapshot.store(Some(Arc::new(engine)));
        Ok(())
    }

    /// Replace the snapshot directly (tests and embedded callers).
    pub fn install_snapshot(&self, engine: EngineSnapshot) {
        self.snapshot.store(Some(Arc::new(engine)));
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    /// The per-request routing decision (`/migration/test` dry-runs this).
    pub fn route(&self, user_id: &str) -> RouteDecision {
        self.router.decide(user_id)
    }

    /// Search on behalf of a user, honoring the rollout gate: unified hybrid
    /// pipeline or the legacy keyword-only path.
    pub async fn search_routed(
        &self,
        user_id: &str,
        request: &SearchRequest,
    ) -> Result<Arc<SearchResponse>> {
        let decision = self.route(user_id);
        debug!(user_id, unified = decision.unified, bucket = decision.bucket, "route decided");
        if decision.unified {
            self.search(request).await
        } else {
            self.legacy_search(request).await
        }
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Unified hybrid search. Atomic from the caller's viewpoint: either a
    /// complete response within the deadline or an error.
    pub async fn search(&self, request: &SearchRequest) -> Result<Arc<SearchResponse>> {
        let deadline = request.deadline.unwrap_or(self.config.deadlines.public_operation);
        match tokio::time::timeout(deadline, self.search_inner(request, &[])).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout),
        }
    }

    /// Search enriched with a session's confirmed variables: confirmed codes
    /// always appear in the result set, keeping their ranked position when
    /// they scored and appended otherwise.
    pub async fn refine(
        &self,
        confirmed: &[String],
        request: &SearchRequest,
    ) -> Result<Arc<SearchResponse>> {
        let deadline = request.deadline.unwrap_or(self.config.deadlines.public_operation);
        match tokio::time::timeout(deadline, self.search_inner(request, confirmed)).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout),
        }
    }

    /// The legacy path: raw keyword lookup, no query understanding, no
    /// fusion, no semantic index.
    pub async fn legacy_search(&self, request: &SearchRequest) -> Result<Arc<SearchResponse>> {
        let deadline = request.deadline.unwrap_or(self.config.deadlines.public_operation);
        match tokio::time::timeout(deadline, self.legacy_search_inner(request)).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout),
        }
    }

    async fn legacy_search_inner(&self, request: &SearchRequest) -> Result<Arc<SearchResponse>> {
        let trimmed = request.query.trim();
        if trimmed.is_empty() {
            return Err(ServiceError::InvalidQuery);
        }
        let snapshot = self.current_snapshot()?;

        let mut warnings = Vec::new();
        let top_k = clamp_top_k(request.top_k, &mut warnings);

        let normalized = crate::query::normalize(trimmed);
        let query = Query {
            raw: trimmed.to_string(),
            normalized: normalized.clone(),
            tokens: normalized.split_whitespace().map(str::to_string).collect(),
            concepts: Vec::new(),
            numeric_ranges: Vec::new(),
            expansions: Vec::new(),
            intent_tags: Vec::new(),
            degraded: false,
        };

        let mut candidates = snapshot.keyword.search(&query, &snapshot.catalog, CANDIDATE_POOL);
        candidates.retain(|c| {
            snapshot.catalog.by_index(c.index).is_some_and(|v| request.filters.accepts(v))
        });
        let total_found = candidates.len();
        candidates.truncate(top_k);

        let results = hydrate(&candidates, &snapshot.catalog);
        Ok(Arc::new(SearchResponse {
            results,
            total_found,
            query_context: QueryContext::from_query(&query),
            methods_used: MethodsUsed { keyword: true, semantic: false },
            warnings,
        }))
    }

    async fn search_inner(
        &self,
        request: &SearchRequest,
        confirmed: &[String],
    ) -> Result<Arc<SearchResponse>> {
        let trimmed = request.query.trim();
        if trimmed.is_empty() {
            return Err(ServiceError::InvalidQuery);
        }
        let snapshot = self.current_snapshot()?;
        let generation = snapshot.catalog.generation();

        let mut warnings = Vec::new();
        let top_k = clamp_top_k(request.top_k, &mut warnings);

        // Overrides change scoring, so only vanilla requests are cacheable.
        let cacheable = confirmed.is_empty()
            && request.weights.is_none()
            && request.similarity.is_none();
        let cache_key = CacheKey {
            query: trimmed.to_string(),
            top_k,
            use_semantic: request.use_semantic,
            use_keyword: request.use_keyword,
            filters: request.filters.clone(),
        };
        if cacheable {
            if let Some(hit) = self.cache_lookup(&cache_key, generation) {
                debug!(query = trimmed, "result cache hit");
                return Ok(hit);
            }
        }

        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        let nlp_available = !self.nlp_guard.is_disabled();
        let query = self.processor.process(trimmed, snapshot.catalog.lexicon(), nlp_available);
        if query.degraded {
            warnings.push("nlp_unavailable".to_string());
        }

        // Fork-join: both indexes consulted concurrently, fused afterwards.
        let keyword_task = async {
            if request.use_keyword {
                snapshot.keyword.search(&query, &snapshot.catalog, CANDIDATE_POOL)
            } else {
                Vec::new()
            }
        };
        let semantic_task = self.semantic_candidates(&snapshot, &query, request, &request_id);
        let (keyword_candidates, (semantic_candidates, semantic_ran, semantic_warning)) =
            tokio::join!(keyword_task, semantic_task);

        if let Some(warning) = semantic_warning {
            warnings.push(warning);
        }

        let methods_used = MethodsUsed {
            keyword: request.use_keyword,
            semantic: semantic_ran,
        };

        let weights = request.weights.unwrap_or(self.config.fusion);
        let mut candidates =
            fuse(keyword_candidates, semantic_candidates, &query, &snapshot.catalog, weights);

        candidates.retain(|c| {
            snapshot.catalog.by_index(c.index).is_some_and(|v| request.filters.accepts(v))
        });

        let filter = request.similarity.unwrap_or(SimilarityFilter {
            threshold: self.config.similarity_threshold,
            max_per_cluster: self.config.similarity_max_per_cluster,
            enabled: true,
        });
        let before_filter = candidates.len();
        let mut candidates = filter.apply(candidates, &snapshot.catalog);
        if before_filter > candidates.len() {
            debug!(
                suppressed = before_filter - candidates.len(),
                "similarity filter removed near-duplicates"
            );
        }

        let total_found = candidates.len();
        candidates.truncate(top_k);
        // After the cut, so a confirmed code can never be truncated away
        merge_confirmed(&mut candidates, confirmed, &snapshot.catalog);

        let results = hydrate(&candidates, &snapshot.catalog);
        let response = Arc::new(SearchResponse {
            results,
            total_found,
            query_context: QueryContext::from_query(&query),
            methods_used,
            warnings,
        });

        if cacheable {
            self.cache_store(cache_key, Arc::clone(&response), generation);
        }

        debug!(
            request_id,
            results = response.results.len(),
            total_found,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search complete"
        );
        Ok(response)
    }

    /// The semantic half of the fork-join. Returns candidates, whether the
    /// semantic path actually ran, and an optional degradation warning.
    async fn semantic_candidates(
        &self,
        snapshot: &EngineSnapshot,
        query: &Query,
        request: &SearchRequest,
        request_id: &str,
    ) -> (Vec<Candidate>, bool, Option<String>) {
        if !request.use_semantic {
            return (Vec::new(), false, None);
        }
        let Some(index) = snapshot.semantic.as_ref().filter(|ix| !ix.is_empty()) else {
            return (Vec::new(), false, None);
        };
        let Some(embedder) = self.embedder.as_ref() else {
            return (Vec::new(), false, None);
        };
        if self.embedding_guard.is_disabled() {
            return (Vec::new(), false, Some("semantic_unavailable".to_string()));
        }

        for attempt in 0..=EMBED_RETRIES {
            let delay = backoff_delay(attempt, EMBED_BACKOFF_BASE, EMBED_BACKOFF_CAP);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self
                .embedding_guard
                .call(request_id, embedder.embed(&query.normalized))
                .await
            {
                Outcome::Ok(vector) => {
                    let candidates = index.search(&vector, DEFAULT_SEMANTIC_TOP_N);
                    return (candidates, true, None);
                }
                Outcome::Failed { kind: "disabled", .. } => break,
                Outcome::TimedOut | Outcome::Failed { .. } => continue,
            }
        }

        warn!(request_id, "semantic path degraded after retries");
        (Vec::new(), false, Some("semantic_unavailable".to_string()))
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Fetch one variable by code.
    pub fn get_variable(&self, code: &str) -> Result<VariableView> {
        let snapshot = self.current_snapshot()?;
        snapshot
            .catalog
            .get(code)
            .map(VariableView::from)
            .ok_or_else(|| ServiceError::NotFound(code.to_string()))
    }

    /// List variables in a category, ordered by code.
    pub fn by_category(&self, category: &str, top_k: usize) -> Result<CategoryResponse> {
        let snapshot = self.current_snapshot()?;
        let mut warnings = Vec::new();
        let top_k = clamp_top_k(top_k, &mut warnings);

        let mut matches: Vec<&Variable> = snapshot
            .catalog
            .iter()
            .filter(|v| v.category.eq_ignore_ascii_case(category))
            .collect();
        matches.sort_by(|a, b| a.code.cmp(&b.code));

        let total_found = matches.len();
        let results = matches.into_iter().take(top_k).map(VariableView::from).collect();
        Ok(CategoryResponse { results, total_found, warnings })
    }

    /// Catalog and configuration statistics.
    pub fn stats(&self) -> Result<StatsResponse> {
        let snapshot = self.current_snapshot()?;
        let embedded = snapshot.semantic.as_ref().map_or(0, SemanticIndex::len);
        Ok(StatsResponse {
            total_variables: snapshot.catalog.len(),
            by_theme: snapshot.catalog.count_by(Facet::Theme),
            by_product: snapshot.catalog.count_by(Facet::Product),
            by_domain: snapshot.catalog.count_by(Facet::Domain),
            has_embeddings: embedded > 0,
            embedded_variables: embedded,
            snapshot_generation: snapshot.catalog.generation(),
            config: StatsConfig {
                semantic_weight: self.config.fusion.semantic,
                keyword_weight: self.config.fusion.keyword,
                similarity_threshold: self.config.similarity_threshold,
                similarity_max_per_cluster: self.config.similarity_max_per_cluster,
                nlp_enabled: !self.nlp_guard.is_disabled(),
                router: self.router.status(),
            },
        })
    }

    // ------------------------------------------------------------------
    // Cache plumbing
    // ------------------------------------------------------------------

    fn cache_lookup(&self, key: &CacheKey, generation: u64) -> Option<Arc<SearchResponse>> {
        let mut cache = self.cache.lock().ok()?;
        match cache.get(key) {
            None => return None,
            Some(entry) => {
                let fresh = entry.generation == generation
                    && entry.inserted_at.elapsed() <= self.config.cache_ttl;
                if fresh {
                    return Some(Arc::clone(&entry.response));
                }
            }
        }
        // Stale entry from an older snapshot or past the TTL
        cache.pop(key);
        None
    }

    fn cache_store(&self, key: CacheKey, response: Arc<SearchResponse>, generation: u64) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, CacheEntry { response, inserted_at: Instant::now(), generation });
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Clamp `top_k` into [1, MAX_TOP_K], recording a warning when it moved.
fn clamp_top_k(requested: usize, warnings: &mut Vec<String>) -> usize {
    if requested < 1 {
        warnings.push(format!("top_k {requested} clamped to 1"));
        1
    } else if requested > MAX_TOP_K {
        warnings.push(format!("top_k {requested} clamped to {MAX_TOP_K}"));
        MAX_TOP_K
    } else {
        requested
    }
}

/// Force a session's confirmed codes into the candidate list: already-ranked
/// ones stay put, missing ones are appended with neutral scores.
fn merge_confirmed(candidates: &mut Vec<Candidate>, confirmed: &[String], catalog: &CatalogSnapshot) {
    for code in confirmed {
        let Some(ix) = catalog.index_of(code) else { continue };
        if candidates.iter().any(|c| c.index == ix) {
            continue;
        }
        candidates.push(Candidate {
            index: ix,
            keyword_score: 0.0,
            semantic_score: 0.0,
            fused_score: 0.0,
            matched_keywords: Vec::new(),
            matched_concepts: Vec::new(),
            method: SearchMethod::Keyword,
        });
    }
}

fn hydrate(candidates: &[Candidate], catalog: &CatalogSnapshot) -> Vec<SearchHit> {
    candidates
        .iter()
        .filter_map(|candidate| {
            let variable = catalog.by_index(candidate.index)?;
            Some(SearchHit {
                variable: VariableView::from(variable),
                keyword_score: candidate.keyword_score,
                semantic_score: candidate.semantic_score,
                fused_score: candidate.fused_score,
                matched_keywords: candidate.matched_keywords.clone(),
                matched_concepts: candidate.matched_concepts.clone(),
                search_method: candidate.method,
            })
        })
        .collect()
}

/// Run a blocking loader on the blocking pool under the file-read deadline.
async fn load_with_deadline<T, E, F>(deadline: Duration, load: F) -> Result<std::result::Result<T, E>>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
{
    match tokio::time::timeout(deadline, tokio::task::spawn_blocking(load)).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(join_error)) => {
            warn!(error = %join_error, "catalog loader task failed");
            Err(ServiceError::ServiceUnavailable)
        }
        Err(_) => Err(ServiceError::Timeout),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_variable;

    fn snapshot() -> EngineSnapshot {
        let mut income = test_variable(
            "INCOME_HIGH",
            "High household income",
            "Household income over $100k",
        );
        income.category = "Financial".to_string();
        income.theme = "Money".to_string();
        let catalog = CatalogSnapshot::from_variables(vec![
            test_variable("AGE_25_34", "Age 25-34", "Adults aged 25 to 34"),
            income,
            test_variable("PET_DOG", "Dog owners", "Households with at least one dog"),
        ])
        .unwrap();
        EngineSnapshot::build(catalog, None)
    }

    fn service() -> RetrievalService {
        RetrievalService::new(Config::default(), Some(snapshot()), None)
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let svc = service();
        let result = svc.search(&SearchRequest::new("   ")).await;
        assert!(matches!(result, Err(ServiceError::InvalidQuery)));
    }

    #[tokio::test]
    async fn test_keyword_only_search() {
        let svc = service();
        let response = svc.search(&SearchRequest::new("household income")).await.unwrap();

        assert!(!response.results.is_empty());
        assert_eq!(response.results[0].variable.code, "INCOME_HIGH");
        assert!(response.methods_used.keyword);
        assert!(!response.methods_used.semantic);
    }

    #[tokio::test]
    async fn test_top_k_clamped_with_warning() {
        let svc = service();

        let mut request = SearchRequest::new("income");
        request.top_k = 0;
        let response = svc.search(&request).await.unwrap();
        assert!(response.warnings.iter().any(|w| w.contains("clamped to 1")));

        let mut request = SearchRequest::new("income");
        request.top_k = 10_000;
        let response = svc.search(&request).await.unwrap();
        assert!(response.warnings.iter().any(|w| w.contains("clamped to 200")));
    }

    #[tokio::test]
    async fn test_zero_match_query_is_ok() {
        let svc = service();
        let response = svc.search(&SearchRequest::new("xylophone orchestras")).await.unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.total_found, 0);
    }

    #[tokio::test]
    async fn test_get_variable_roundtrip() {
        let svc = service();
        let response = svc.search(&SearchRequest::new("income")).await.unwrap();
        let hit = &response.results[0];

        let fetched = svc.get_variable(&hit.variable.code).unwrap();
        assert_eq!(fetched, hit.variable);
    }

    #[tokio::test]
    async fn test_get_variable_not_found() {
        let svc = service();
        assert!(matches!(
            svc.get_variable("GHOST"),
            Err(ServiceError::NotFound(code)) if code == "GHOST"
        ));
    }

    #[tokio::test]
    async fn test_category_listing() {
        let svc = service();
        let response = svc.by_category("financial", 10).unwrap();
        assert_eq!(response.total_found, 1);
        assert_eq!(response.results[0].code, "INCOME_HIGH");
    }

    #[tokio::test]
    async fn test_filters_restrict_results() {
        let svc = service();
        let mut request = SearchRequest::new("households");
        request.filters.theme = Some("Money".to_string());
        let response = svc.search(&request).await.unwrap();

        assert!(response
            .results
            .iter()
            .all(|hit| hit.variable.theme.eq_ignore_ascii_case("Money")));
    }

    #[tokio::test]
    async fn test_cache_returns_identical_response() {
        let svc = service();
        let request = SearchRequest::new("income");

        let first = svc.search(&request).await.unwrap();
        let second = svc.search(&request).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_cache_invalidated_on_snapshot_swap() {
        let svc = service();
        let request = SearchRequest::new("income");
        let first = svc.search(&request).await.unwrap();

        svc.install_snapshot(snapshot());
        let second = svc.search(&request).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_refine_includes_confirmed() {
        let svc = service();
        let confirmed = vec!["PET_DOG".to_string()];
        let response = svc.refine(&confirmed, &SearchRequest::new("income")).await.unwrap();

        assert!(response.results.iter().any(|hit| hit.variable.code == "PET_DOG"));
    }

    #[tokio::test]
    async fn test_unloaded_catalog_is_unavailable() {
        let svc = RetrievalService::new(Config::default(), None, None);
        let result = svc.search(&SearchRequest::new("income")).await;
        assert!(matches!(result, Err(ServiceError::ServiceUnavailable)));
        assert!(matches!(svc.stats(), Err(ServiceError::ServiceUnavailable)));
    }

    #[tokio::test]
    async fn test_stats_shape() {
        let svc = service();
        let stats = svc.stats().unwrap();
        assert_eq!(stats.total_variables, 3);
        assert!(!stats.has_embeddings);
        assert_eq!(stats.config.semantic_weight, 0.7);
        assert_eq!(stats.config.keyword_weight, 0.3);
    }

    #[tokio::test]
    async fn test_legacy_search_is_keyword_only() {
        let svc = service();
        let response = svc.legacy_search(&SearchRequest::new("urban income shoppers")).await.unwrap();
        assert!(response.query_context.concepts.is_empty());
        assert!(response.query_context.expansions.is_empty());
        assert!(!response.methods_used.semantic);
    }

    #[tokio::test]
    async fn test_routed_search_dispatches() {
        let config = Config { use_unified: true, ..Config::default() };
        let svc = RetrievalService::new(config, Some(snapshot()), None);
        let response = svc.search_routed("user-1", &SearchRequest::new("urban shoppers")).await.unwrap();
        // Unified path runs the query processor
        assert!(!response.query_context.expansions.is_empty());
    }

    #[tokio::test]
    async fn test_results_ordered_by_fused_score() {
        let svc = service();
        let response = svc.search(&SearchRequest::new("households with income")).await.unwrap();
        for pair in response.results.windows(2) {
            assert!(pair[0].fused_score >= pair[1].fused_score);
        }
    }
}
