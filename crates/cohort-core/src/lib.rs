//! # Cohort Core
//!
//! Natural-language audience segmentation engine. Given a free-form
//! description of a target audience, Cohort discovers the most relevant
//! variables from a catalog of consumer attributes, refines the selection
//! conversationally, and hands the confirmed set to a clustering
//! collaborator for balanced segment generation.
//!
//! The retrieval core:
//!
//! - **Catalog**: immutable snapshots loaded from a columnar binary
//!   container (preferred) or a CSV fallback, swapped atomically on reload
//! - **Query understanding**: normalization, spell correction, numeric range
//!   extraction, concept extraction, synonym expansion, intent tags
//! - **Hybrid search**: inverted keyword index (tf-idf, fuzzy lookup) fused
//!   with a dense semantic index at 0.7 semantic / 0.3 keyword
//! - **Similarity filter**: Jaro-Winkler near-duplicate suppression
//! - **Sessions**: the conversational workflow state machine from data-type
//!   choice through segment distribution
//! - **Degradation**: resource guards with hard timeouts and cumulative
//!   failure disablement; the semantic path degrades to keyword-only
//!   instead of failing requests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cohort_core::{Config, RetrievalService, SearchRequest};
//!
//! let config = Config::from_env()?;
//! let service = RetrievalService::from_config(config).await?;
//!
//! let response = service
//!     .search(&SearchRequest::new("environmentally conscious millennials"))
//!     .await?;
//! for hit in &response.results {
//!     println!("{} {:.3}", hit.variable.code, hit.fused_score);
//! }
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod catalog;
pub mod config;
pub mod embeddings;
pub mod guard;
pub mod query;
pub mod router;
pub mod search;
pub mod service;
pub mod session;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Catalog
pub use catalog::{
    CatalogError, CatalogSnapshot, CatalogSource, Facet, Operator, Variable, VariableType,
};

// Configuration
pub use config::{Config, ConfigError, Deadlines};

// Embeddings
pub use embeddings::{
    cosine_similarity, read_embedding_store, write_embedding_store, EmbeddingError,
    EmbeddingProvider, EmbeddingStore, RemoteEmbeddingProvider,
};

// Query understanding
pub use query::{
    Concept, ConceptCategory, ConceptDictionary, FieldHint, IntentRules, NumericRange, Query,
    QueryProcessor, StageToggles, SynonymMap,
};

// Search
pub use search::{
    Candidate, FusionWeights, KeywordIndex, SearchMethod, SemanticIndex, SimilarityFilter,
};

// Degradation and routing
pub use guard::{Outcome, ResourceGuard};
pub use router::{RouteDecision, RouterStatus, SearchRouter};

// Façade
pub use service::{
    CategoryResponse, EngineSnapshot, MethodsUsed, QueryContext, RetrievalService, SearchFilters,
    SearchHit, SearchRequest, SearchResponse, ServiceError, StatsResponse, VariableView,
    DEFAULT_TOP_K, MAX_TOP_K,
};

// Sessions
pub use session::{
    AudienceSource, ClusterError, ClusterRequest, ClusterVariable, DataTypeChoice, Segment,
    SegmentClusterer, Session, SessionError, SessionManager, SessionState, SessionStore,
    TurnRecord,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Config, RetrievalService, SearchRequest, SearchResponse, ServiceError, SessionManager,
        SessionState, SessionStore, Variable, VariableView,
    };
}
