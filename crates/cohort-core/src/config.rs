//! Engine configuration
//!
//! A `Config` is built once at boot from the environment, validated, and
//! passed into constructors. Nothing reads the environment after startup;
//! tests build configs directly.

use std::path::PathBuf;
use std::time::Duration;

use crate::search::FusionWeights;

/// Default embedding API endpoint when none is configured
const DEFAULT_EMBEDDING_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";

/// Default embedding model and its dimensionality
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

/// Configuration error. Fatal at startup (process exit code 2).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value} ({reason})")]
    Invalid { name: &'static str, value: String, reason: &'static str },
}

/// Hard timeouts for external touchpoints and public operations.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    /// Embedding provider call
    pub embedding: Duration,
    /// NLP table initialization
    pub nlp_init: Duration,
    /// Catalog / embeddings file reads
    pub file_read: Duration,
    /// Default deadline for any public operation
    pub public_operation: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            embedding: Duration::from_secs(3),
            nlp_init: Duration::from_secs(5),
            file_read: Duration::from_secs(30),
            public_operation: Duration::from_secs(10),
        }
    }
}

/// Validated engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Catalog source path (either format; sibling extensions are probed)
    pub catalog_path: PathBuf,
    /// Embeddings sidecar path; absent disables the semantic path
    pub embeddings_path: Option<PathBuf>,
    /// Embedding provider credentials; absent disables the semantic path
    pub embedding_api_key: Option<String>,
    pub embedding_endpoint: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    /// Disable query-processor NLP stages (numeric + concept extraction)
    pub disable_nlp: bool,
    /// Router: global unified-path override
    pub use_unified: bool,
    /// Router: gradual rollout percentage in [0, 100]
    pub rollout_percentage: u8,
    /// Session idle eviction
    pub session_ttl: Duration,
    /// Similarity filter defaults
    pub similarity_threshold: f64,
    pub similarity_max_per_cluster: usize,
    /// Fusion weight defaults
    pub fusion: FusionWeights,
    /// Result cache
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    /// Cumulative-failure disablement: F failures in W seconds
    pub failure_threshold: usize,
    pub failure_window: Duration,
    /// Timeouts
    pub deadlines: Deadlines,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("catalog.csv"),
            embeddings_path: None,
            embedding_api_key: None,
            embedding_endpoint: DEFAULT_EMBEDDING_ENDPOINT.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            disable_nlp: false,
            use_unified: false,
            rollout_percentage: 0,
            session_ttl: Duration::from_secs(1800),
            similarity_threshold: 0.85,
            similarity_max_per_cluster: 2,
            fusion: FusionWeights::default(),
            cache_capacity: 10_000,
            cache_ttl: Duration::from_secs(300),
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            deadlines: Deadlines::default(),
        }
    }
}

impl Config {
    /// Build from the environment. Unset variables keep their defaults; a
    /// malformed value is a startup error, never silently ignored.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(path) = env_string("CATALOG_PATH") {
            config.catalog_path = PathBuf::from(path);
        }
        if let Some(path) = env_string("EMBEDDINGS_PATH") {
            config.embeddings_path = Some(PathBuf::from(path));
        }
        config.embedding_api_key = env_string("EMBEDDING_PROVIDER_API_KEY");
        if let Some(endpoint) = env_string("EMBEDDING_PROVIDER_ENDPOINT") {
            config.embedding_endpoint = endpoint;
        }
        if let Some(model) = env_string("EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        if let Some(raw) = env_string("EMBEDDING_DIMENSION") {
            config.embedding_dimension =
                parse_env("EMBEDDING_DIMENSION", &raw, |v: usize| v > 0, "must be positive")?;
        }

        if let Some(raw) = env_string("DISABLE_NLP") {
            config.disable_nlp = parse_bool("DISABLE_NLP", &raw)?;
        }
        if let Some(raw) = env_string("USE_UNIFIED_SEARCH") {
            config.use_unified = parse_bool("USE_UNIFIED_SEARCH", &raw)?;
        }
        if let Some(raw) = env_string("UNIFIED_ROLLOUT_PERCENTAGE") {
            config.rollout_percentage = parse_env(
                "UNIFIED_ROLLOUT_PERCENTAGE",
                &raw,
                |v: u8| v <= 100,
                "must be in 0..=100",
            )?;
        }

        if let Some(raw) = env_string("SESSION_TTL_SECONDS") {
            let secs =
                parse_env("SESSION_TTL_SECONDS", &raw, |v: u64| v > 0, "must be positive")?;
            config.session_ttl = Duration::from_secs(secs);
        }

        if let Some(raw) = env_string("SIMILARITY_THRESHOLD") {
            config.similarity_threshold = parse_env(
                "SIMILARITY_THRESHOLD",
                &raw,
                |v: f64| (0.0..=1.0).contains(&v),
                "must be in 0.0..=1.0",
            )?;
        }
        if let Some(raw) = env_string("SIMILARITY_MAX_PER_CLUSTER") {
            config.similarity_max_per_cluster = parse_env(
                "SIMILARITY_MAX_PER_CLUSTER",
                &raw,
                |v: usize| v >= 1,
                "must be at least 1",
            )?;
        }

        Ok(config)
    }

    /// True when the semantic path can run at all: credentials plus a
    /// sidecar file are both present.
    pub fn semantic_configured(&self) -> bool {
        self.embedding_api_key.is_some() && self.embeddings_path.is_some()
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(
    name: &'static str,
    raw: &str,
    valid: impl Fn(T) -> bool,
    reason: &'static str,
) -> Result<T, ConfigError>
where
    T: Copy,
{
    let value: T = raw.parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: "not parseable",
    })?;
    if !valid(value) {
        return Err(ConfigError::Invalid { name, value: raw.to_string(), reason });
    }
    Ok(value)
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: raw.to_string(),
            reason: "expected true or false",
        }),
    }
}

// ============================================================================
// TESTS
// ============================================================================
