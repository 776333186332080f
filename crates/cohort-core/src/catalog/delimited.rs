//! Delimited catalog fallback
//!
//! CSV with a header row. Quoted fields may contain commas and newlines.
//! Required columns: `code`, `description`. Unknown columns are ignored so
//! catalog exports can carry extra metadata without breaking the loader.

use std::fs::File;
use std::path::Path;

use super::{CatalogError, Operator, Result, Variable, VariableType};

/// Positions of the recognized columns in the header row.
#[derive(Debug, Default)]
struct ColumnMap {
    code: Option<usize>,
    name: Option<usize>,
    description: Option<usize>,
    category: Option<usize>,
    theme: Option<usize>,
    product: Option<usize>,
    domain: Option<usize>,
    data_type: Option<usize>,
    operators: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let mut map = ColumnMap::default();
        for (ix, header) in headers.iter().enumerate() {
            match header.trim().to_lowercase().as_str() {
                "code" | "variable_code" => map.code = Some(ix),
                "name" | "label" => map.name = Some(ix),
                "description" => map.description = Some(ix),
                "category" => map.category = Some(ix),
                "theme" => map.theme = Some(ix),
                "product" => map.product = Some(ix),
                "domain" => map.domain = Some(ix),
                "data_type" | "type" => map.data_type = Some(ix),
                "operators" => map.operators = Some(ix),
                _ => {}
            }
        }
        map
    }
}

fn cell(record: &csv::StringRecord, ix: Option<usize>) -> String {
    ix.and_then(|i| record.get(i)).unwrap_or("").trim().to_string()
}

/// Read the delimited fallback into raw variables.
pub fn read_delimited(path: &Path) -> Result<Vec<Variable>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(File::open(path)?);

    let columns = ColumnMap::from_headers(reader.headers()?);
    if columns.code.is_none() {
        return Err(CatalogError::MissingColumn("code"));
    }
    if columns.description.is_none() {
        return Err(CatalogError::MissingColumn("description"));
    }

    let mut variables = Vec::new();
    for record in reader.records() {
        let record = record?;

        let code = cell(&record, columns.code);
        let description = cell(&record, columns.description);
        let data_type = VariableType::parse_name(&cell(&record, columns.data_type));

        let operators: Vec<Operator> = cell(&record, columns.operators)
            .split(',')
            .filter_map(Operator::parse_name)
            .collect();
        let operators = if operators.is_empty() {
            Operator::defaults_for(data_type)
        } else {
            operators
        };

        let name = {
            let raw = cell(&record, columns.name);
            if raw.is_empty() { code.clone() } else { raw }
        };

        variables.push(Variable {
            code,
            name,
            description,
            category: cell(&record, columns.category),
            theme: cell(&record, columns.theme),
            product: cell(&record, columns.product),
            domain: cell(&record, columns.domain),
            data_type,
            operators,
        });
    }

    Ok(variables)
}

// ============================================================================
// TESTS
// ============================================================================
