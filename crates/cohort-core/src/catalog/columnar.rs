//! Columnar binary catalog container
//!
//! The preferred catalog source: one length-prefixed string column per
//! variable field, loaded without any per-row tokenizing or quoting logic.
//! Also written back as a cache after a delimited load.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic "CHRT" | version u16 | row_count u32
//! then per column: tag u8 | payload_len u32 | payload
//! payload = row_count strings, each: len u32 | utf8 bytes
//! ```
//!
//! Columns with unknown tags are skipped whole via `payload_len`, so readers
//! tolerate containers written by newer versions.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::{CatalogError, Operator, Result, Variable, VariableType};

/// File extension of the columnar container
pub const COLUMNAR_EXTENSION: &str = "chrt";

const MAGIC: [u8; 4] = *b"CHRT";
const VERSION: u16 = 1;

// Column tags. New columns get new tags; readers skip unknown tags.
const COL_CODE: u8 = 1;
const COL_NAME: u8 = 2;
const COL_DESCRIPTION: u8 = 3;
const COL_CATEGORY: u8 = 4;
const COL_THEME: u8 = 5;
const COL_PRODUCT: u8 = 6;
const COL_DOMAIN: u8 = 7;
const COL_DATA_TYPE: u8 = 8;
const COL_OPERATORS: u8 = 9;

// ============================================================================
// READER
// ============================================================================

/// Read a columnar container into raw variables.
pub fn read_columnar(path: &Path) -> Result<Vec<Variable>> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(CatalogError::Format("bad magic".to_string()));
    }

    let version = read_u16(&mut reader)?;
    if version == 0 || version > VERSION {
        return Err(CatalogError::Format(format!("unsupported version {version}")));
    }

    let row_count = read_u32(&mut reader)? as usize;

    let mut codes = None;
    let mut names = None;
    let mut descriptions = None;
    let mut categories = None;
    let mut themes = None;
    let mut products = None;
    let mut domains = None;
    let mut data_types = None;
    let mut operators = None;

    loop {
        let mut tag = [0u8; 1];
        match reader.read_exact(&mut tag) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let payload_len = read_u32(&mut reader)? as usize;

        match tag[0] {
            COL_CODE => codes = Some(read_string_column(&mut reader, row_count)?),
            COL_NAME => names = Some(read_string_column(&mut reader, row_count)?),
            COL_DESCRIPTION => descriptions = Some(read_string_column(&mut reader, row_count)?),
            COL_CATEGORY => categories = Some(read_string_column(&mut reader, row_count)?),
            COL_THEME => themes = Some(read_string_column(&mut reader, row_count)?),
            COL_PRODUCT => products = Some(read_string_column(&mut reader, row_count)?),
            COL_DOMAIN => domains = Some(read_string_column(&mut reader, row_count)?),
            COL_DATA_TYPE => data_types = Some(read_string_column(&mut reader, row_count)?),
            COL_OPERATORS => operators = Some(read_string_column(&mut reader, row_count)?),
            _ => {
                // Unknown column from a newer writer
                std::io::copy(
                    &mut reader.by_ref().take(payload_len as u64),
                    &mut std::io::sink(),
                )?;
            }
        }
    }

    let codes = codes.ok_or(CatalogError::MissingColumn("code"))?;
    let descriptions = descriptions.ok_or(CatalogError::MissingColumn("description"))?;
    let names = names.unwrap_or_else(|| vec![String::new(); row_count]);
    let categories = categories.unwrap_or_else(|| vec![String::new(); row_count]);
    let themes = themes.unwrap_or_else(|| vec![String::new(); row_count]);
    let products = products.unwrap_or_else(|| vec![String::new(); row_count]);
    let domains = domains.unwrap_or_else(|| vec![String::new(); row_count]);
    let data_types = data_types.unwrap_or_else(|| vec![String::new(); row_count]);
    let operators = operators.unwrap_or_else(|| vec![String::new(); row_count]);

    let mut variables = Vec::with_capacity(row_count);
    for i in 0..row_count {
        let data_type = VariableType::parse_name(&data_types[i]);
        let ops = parse_operators(&operators[i], data_type);
        let name = if names[i].is_empty() { codes[i].clone() } else { names[i].clone() };
        variables.push(Variable {
            code: codes[i].clone(),
            name,
            description: descriptions[i].clone(),
            category: categories[i].clone(),
            theme: themes[i].clone(),
            product: products[i].clone(),
            domain: domains[i].clone(),
            data_type,
            operators: ops,
        });
    }

    Ok(variables)
}

fn parse_operators(cell: &str, data_type: VariableType) -> Vec<Operator> {
    let parsed: Vec<Operator> =
        cell.split(',').filter_map(Operator::parse_name).collect();
    if parsed.is_empty() { Operator::defaults_for(data_type) } else { parsed }
}

fn read_u16<R: Read>(reader: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_string_column<R: Read>(reader: &mut R, rows: usize) -> Result<Vec<String>> {
    let mut column = Vec::with_capacity(rows);
    for _ in 0..rows {
        let len = read_u32(reader)? as usize;
        if len > 1 << 24 {
            return Err(CatalogError::Format(format!("string length {len} out of range")));
        }
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        let s = String::from_utf8(buf)
            .map_err(|_| CatalogError::Format("invalid utf-8 in string column".to_string()))?;
        column.push(s);
    }
    Ok(column)
}

// ============================================================================
// WRITER
// ============================================================================

/// Write variables as a columnar container (used for the delimited-load
/// cache and by test fixtures).
pub fn write_columnar<'a, I>(path: &Path, variables: I) -> Result<()>
where
    I: Iterator<Item = &'a Variable>,
{
    let variables: Vec<&Variable> = variables.collect();
    let mut writer = BufWriter::new(File::create(path)?);

    writer.write_all(&MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    writer.write_all(&(variables.len() as u32).to_le_bytes())?;

    write_column(&mut writer, COL_CODE, variables.iter().map(|v| v.code.as_str()))?;
    write_column(&mut writer, COL_NAME, variables.iter().map(|v| v.name.as_str()))?;
    write_column(&mut writer, COL_DESCRIPTION, variables.iter().map(|v| v.description.as_str()))?;
    write_column(&mut writer, COL_CATEGORY, variables.iter().map(|v| v.category.as_str()))?;
    write_column(&mut writer, COL_THEME, variables.iter().map(|v| v.theme.as_str()))?;
    write_column(&mut writer, COL_PRODUCT, variables.iter().map(|v| v.product.as_str()))?;
    write_column(&mut writer, COL_DOMAIN, variables.iter().map(|v| v.domain.as_str()))?;

    let data_types: Vec<String> =
        variables.iter().map(|v| v.data_type.as_str().to_string()).collect();
    write_column(&mut writer, COL_DATA_TYPE, data_types.iter().map(String::as_str))?;

    let operators: Vec<String> = variables
        .iter()
        .map(|v| {
            v.operators.iter().map(Operator::as_str).collect::<Vec<_>>().join(",")
        })
        .collect();
    write_column(&mut writer, COL_OPERATORS, operators.iter().map(String::as_str))?;

    writer.flush()?;
    Ok(())
}

fn write_column<'a, W: Write>(
    writer: &mut W,
    tag: u8,
    values: impl Iterator<Item = &'a str>,
) -> Result<()> {
    let values: Vec<&str> = values.collect();
    let payload_len: usize = values.iter().map(|v| 4 + v.len()).sum();

    writer.write_all(&[tag])?;
    writer.write_all(&(payload_len as u32).to_le_bytes())?;
    for value in values {
        writer.write_all(&(value.len() as u32).to_le_bytes())?;
        writer.write_all(value.as_bytes())?;
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
