//! Embedding sidecar files
//!
//! Pre-computed variable embeddings ship as a binary container keyed by
//! variable code, with a JSON metadata sibling describing the model and
//! dimension. The semantic index is built from this store at catalog load.
//!
//! Vector file layout (little-endian):
//!
//! ```text
//! magic "CHEV" | version u16 | dimension u32 | count u32
//! then per entry: code_len u16 | code utf8 | dimension f32s
//! ```
//!
//! The metadata sibling lives at `<path>.meta.json`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{EmbeddingError, Result};

const MAGIC: [u8; 4] = *b"CHEV";
const VERSION: u16 = 1;

/// Metadata sibling contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub model_name: String,
    pub dimension: usize,
    pub count: usize,
}

/// Loaded variable embeddings, keyed by variable code.
#[derive(Debug)]
pub struct EmbeddingStore {
    metadata: StoreMetadata,
    vectors: HashMap<String, Vec<f32>>,
}

impl EmbeddingStore {
    pub fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    pub fn dimension(&self) -> usize {
        self.metadata.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn get(&self, code: &str) -> Option<&[f32]> {
        self.vectors.get(code).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<f32>)> {
        self.vectors.iter()
    }
}

fn metadata_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".meta.json");
    PathBuf::from(os)
}

// ============================================================================
// READER
// ============================================================================

/// Load an embedding store and validate it against its metadata sibling.
pub fn read_embedding_store(path: &Path) -> Result<EmbeddingStore> {
    let metadata: StoreMetadata = {
        let file = File::open(metadata_path(path))
            .map_err(|e| EmbeddingError::Store(format!("metadata sibling missing: {e}")))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| EmbeddingError::Store(format!("invalid metadata: {e}")))?
    };

    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(EmbeddingError::Store("bad magic".to_string()));
    }

    let version = read_u16(&mut reader)?;
    if version == 0 || version > VERSION {
        return Err(EmbeddingError::Store(format!("unsupported version {version}")));
    }

    let dimension = read_u32(&mut reader)? as usize;
    if dimension != metadata.dimension {
        return Err(EmbeddingError::Dimension {
            expected: metadata.dimension,
            got: dimension,
        });
    }

    let count = read_u32(&mut reader)? as usize;
    let mut vectors = HashMap::with_capacity(count);

    for _ in 0..count {
        let code_len = read_u16(&mut reader)? as usize;
        let mut code_buf = vec![0u8; code_len];
        reader.read_exact(&mut code_buf)?;
        let code = String::from_utf8(code_buf)
            .map_err(|_| EmbeddingError::Store("invalid utf-8 code".to_string()))?;

        let mut raw = vec![0u8; dimension * 4];
        reader.read_exact(&mut raw)?;
        let vector: Vec<f32> = raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        vectors.insert(code, vector);
    }

    Ok(EmbeddingStore { metadata, vectors })
}

// ============================================================================
// WRITER
// ============================================================================

/// Write an embedding store plus its metadata sibling (offline tooling and
/// test fixtures).
pub fn write_embedding_store(
    path: &Path,
    model_name: &str,
    dimension: usize,
    entries: &[(String, Vec<f32>)],
) -> Result<()> {
    for (code, vector) in entries {
        if vector.len() != dimension {
            return Err(EmbeddingError::Store(format!(
                "entry '{code}' has dimension {}, expected {dimension}",
                vector.len()
            )));
        }
    }

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    writer.write_all(&(dimension as u32).to_le_bytes())?;
    writer.write_all(&(entries.len() as u32).to_le_bytes())?;

    for (code, vector) in entries {
        writer.write_all(&(code.len() as u16).to_le_bytes())?;
        writer.write_all(code.as_bytes())?;
        for value in vector {
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    writer.flush()?;

    let metadata = StoreMetadata {
        model_name: model_name.to_string(),
        dimension,
        count: entries.len(),
    };
    let file = File::create(metadata_path(path))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &metadata)
        .map_err(|e| EmbeddingError::Store(format!("metadata write failed: {e}")))?;

    Ok(())
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

// ============================================================================
// TESTS
// ============================================================================
