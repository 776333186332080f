//! Variable Catalog
//!
//! Loads the consumer-attribute catalog from one of two equivalent sources:
//! - Columnar binary container (preferred, roughly 10x faster to parse)
//! - Delimited text fallback (CSV with header row)
//!
//! On success the loader publishes an immutable [`CatalogSnapshot`]. Reloads
//! build a complete new snapshot before the old one is released, so readers
//! always see a consistent catalog.

mod columnar;
mod delimited;

pub use columnar::{read_columnar, write_columnar, COLUMNAR_EXTENSION};
pub use delimited::read_delimited;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Catalog load error. Fatal at startup (process exit code 1); a failed
/// reload leaves the previous snapshot in place.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// IO error reading a catalog source
    #[error("IO error reading catalog: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed columnar container
    #[error("Malformed columnar catalog: {0}")]
    Format(String),
    /// Delimited parse error
    #[error("Delimited catalog parse error: {0}")]
    Delimited(#[from] csv::Error),
    /// A required column is absent from the source
    #[error("Catalog source is missing required column '{0}'")]
    MissingColumn(&'static str),
    /// Two rows share the same code
    #[error("Duplicate variable code '{0}'")]
    DuplicateCode(String),
    /// No catalog source exists at the configured path
    #[error("No catalog source found at {0}")]
    SourceNotFound(PathBuf),
    /// Source parsed but produced zero usable variables
    #[error("Catalog source contained no usable variables")]
    Empty,
}

/// Catalog result type
pub type Result<T> = std::result::Result<T, CatalogError>;

// ============================================================================
// VARIABLE
// ============================================================================

/// Value shape of a catalog variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    /// Continuous or discrete numeric value
    Numeric,
    /// Unordered categorical value
    #[default]
    Categorical,
    /// True/false flag
    Boolean,
    /// Ordered categorical value
    Ordinal,
}

impl VariableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariableType::Numeric => "numeric",
            VariableType::Categorical => "categorical",
            VariableType::Boolean => "boolean",
            VariableType::Ordinal => "ordinal",
        }
    }

    /// Parse from a source-file cell. Unrecognized values fall back to
    /// categorical, the most permissive shape.
    pub fn parse_name(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "numeric" | "number" | "int" | "float" => VariableType::Numeric,
            "boolean" | "bool" | "flag" => VariableType::Boolean,
            "ordinal" | "ordered" => VariableType::Ordinal,
            _ => VariableType::Categorical,
        }
    }
}

impl std::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Predicate operators valid for a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    GreaterThan,
    LessThan,
    Between,
    Contains,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::GreaterThan => "greater_than",
            Operator::LessThan => "less_than",
            Operator::Between => "between",
            Operator::Contains => "contains",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "equals" | "eq" | "=" => Some(Operator::Equals),
            "not_equals" | "neq" | "!=" => Some(Operator::NotEquals),
            "in" => Some(Operator::In),
            "not_in" => Some(Operator::NotIn),
            "greater_than" | "gt" | ">" => Some(Operator::GreaterThan),
            "less_than" | "lt" | "<" => Some(Operator::LessThan),
            "between" | "range" => Some(Operator::Between),
            "contains" | "like" => Some(Operator::Contains),
            _ => None,
        }
    }

    /// The operator set a variable carries when the source omits one.
    pub fn defaults_for(data_type: VariableType) -> Vec<Operator> {
        match data_type {
            VariableType::Numeric | VariableType::Ordinal => vec![
                Operator::Equals,
                Operator::GreaterThan,
                Operator::LessThan,
                Operator::Between,
            ],
            VariableType::Categorical => {
                vec![Operator::Equals, Operator::NotEquals, Operator::In, Operator::NotIn]
            }
            VariableType::Boolean => vec![Operator::Equals],
        }
    }
}

/// A single consumer-attribute entry in the catalog.
///
/// Immutable after load; reloads replace the whole snapshot atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Unique, stable identifier (primary key)
    pub code: String,
    /// Short display label
    pub name: String,
    /// Full natural-language description (never empty)
    pub description: String,
    /// Categorical facets
    pub category: String,
    pub theme: String,
    pub product: String,
    pub domain: String,
    /// Value shape
    pub data_type: VariableType,
    /// Predicate operators valid for this variable
    pub operators: Vec<Operator>,
}

impl Variable {
    /// Searchable text fields with their index weights: name, description,
    /// category.
    pub fn weighted_fields(&self) -> [(&str, f32); 3] {
        [(&self.name, 3.0), (&self.description, 1.0), (&self.category, 0.5)]
    }
}

// ============================================================================
// FACETS
// ============================================================================

/// Categorical facets a snapshot can be counted by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facet {
    Category,
    Theme,
    Product,
    Domain,
}

impl Facet {
    fn value_of<'a>(&self, v: &'a Variable) -> &'a str {
        match self {
            Facet::Category => &v.category,
            Facet::Theme => &v.theme,
            Facet::Product => &v.product,
            Facet::Domain => &v.domain,
        }
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Monotonic snapshot generation counter, shared across reloads so cache
/// epochs can tell snapshots apart.
static GENERATION: AtomicU64 = AtomicU64::new(1);

/// An immutable point-in-time view of the whole catalog.
///
/// Owned behind `Arc`; indexes hold the `Arc` for their lifetime, so a
/// request that started before a reload keeps reading its original snapshot.
#[derive(Debug)]
pub struct CatalogSnapshot {
    variables: Vec<Variable>,
    by_code: HashMap<String, usize>,
    lexicon: HashSet<String>,
    generation: u64,
    skipped_rows: usize,
}

impl CatalogSnapshot {
    /// Build a snapshot from raw variables, enforcing catalog invariants:
    /// unique codes, non-empty descriptions (violators are skipped and
    /// counted, duplicates are fatal).
    pub fn from_variables(raw: Vec<Variable>) -> Result<Self> {
        let mut variables = Vec::with_capacity(raw.len());
        let mut by_code = HashMap::with_capacity(raw.len());
        let mut skipped_rows = 0usize;

        for var in raw {
            if var.code.trim().is_empty() || var.description.trim().is_empty() {
                skipped_rows += 1;
                continue;
            }
            if by_code.contains_key(&var.code) {
                return Err(CatalogError::DuplicateCode(var.code));
            }
            by_code.insert(var.code.clone(), variables.len());
            variables.push(var);
        }

        if variables.is_empty() {
            return Err(CatalogError::Empty);
        }
        if skipped_rows > 0 {
            warn!(skipped_rows, "catalog rows skipped for empty code/description");
        }

        let lexicon = build_lexicon(&variables);
        Ok(Self {
            variables,
            by_code,
            lexicon,
            generation: GENERATION.fetch_add(1, Ordering::Relaxed),
            skipped_rows,
        })
    }

    /// Look up a variable by code.
    pub fn get(&self, code: &str) -> Option<&Variable> {
        self.by_code.get(code).map(|&ix| &self.variables[ix])
    }

    /// Positional lookup used by the indexes.
    pub fn by_index(&self, ix: usize) -> Option<&Variable> {
        self.variables.get(ix)
    }

    /// Positional index of a code, if present.
    pub fn index_of(&self, code: &str) -> Option<usize> {
        self.by_code.get(code).copied()
    }

    /// Iterate all variables in load order.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Count variables grouped by one facet.
    pub fn count_by(&self, facet: Facet) -> HashMap<String, usize> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for var in &self.variables {
            let value = facet.value_of(var);
            if !value.is_empty() {
                *counts.entry(value.to_string()).or_default() += 1;
            }
        }
        counts
    }

    /// The word lexicon derived from catalog text, used by spell correction.
    pub fn lexicon(&self) -> &HashSet<String> {
        &self.lexicon
    }

    /// Monotonic generation, distinct per loaded snapshot.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Rows dropped at load time for violating invariants.
    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }
}

fn build_lexicon(variables: &[Variable]) -> HashSet<String> {
    let mut lexicon = HashSet::new();
    for var in variables {
        for (text, _) in var.weighted_fields() {
            for word in text.split(|c: char| !c.is_alphanumeric() && c != '-') {
                if word.len() >= 3 {
                    lexicon.insert(word.to_lowercase());
                }
            }
        }
    }
    lexicon
}

// ============================================================================
// LOADER
// ============================================================================

/// Resolved catalog source paths, in priority order.
#[derive(Debug, Clone)]
pub struct CatalogSource {
    /// Columnar binary container (preferred)
    pub columnar: Option<PathBuf>,
    /// Delimited text fallback
    pub delimited: Option<PathBuf>,
}

impl CatalogSource {
    /// Resolve sources from a configured catalog path. The path may point at
    /// either format; the sibling with the other extension is picked up
    /// automatically so a columnar cache written next to a CSV is found.
    pub fn resolve(path: &Path) -> Self {
        let columnar_path = path.with_extension(COLUMNAR_EXTENSION);
        let delimited_path = path.with_extension("csv");
        Self {
            columnar: columnar_path.exists().then_some(columnar_path),
            delimited: delimited_path.exists().then_some(delimited_path),
        }
    }
}

/// Load a snapshot, preferring the columnar source. When only the delimited
/// source exists, a columnar cache is written beside it (best effort) so the
/// next load takes the fast path.
pub fn load(path: &Path) -> Result<CatalogSnapshot> {
    let source = CatalogSource::resolve(path);

    if let Some(columnar_path) = &source.columnar {
        debug!(path = %columnar_path.display(), "loading columnar catalog");
        let variables = read_columnar(columnar_path)?;
        return CatalogSnapshot::from_variables(variables);
    }

    let Some(delimited_path) = &source.delimited else {
        return Err(CatalogError::SourceNotFound(path.to_path_buf()));
    };

    debug!(path = %delimited_path.display(), "loading delimited catalog");
    let variables = read_delimited(delimited_path)?;
    let snapshot = CatalogSnapshot::from_variables(variables)?;

    let cache_path = delimited_path.with_extension(COLUMNAR_EXTENSION);
    if let Err(e) = write_columnar(&cache_path, snapshot.iter()) {
        warn!(path = %cache_path.display(), error = %e, "columnar cache write failed");
    }

    Ok(snapshot)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) fn test_variable(code: &str, name: &str, description: &str) -> Variable {
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
