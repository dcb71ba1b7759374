//! Persistence for the embedded index.
//!
//! The on-disk format is a single JSON manifest line followed by one JSON
//! record per indexed chunk. The manifest pins everything the entries depend
//! on; a file whose manifest disagrees with the current document or settings
//! is treated as absent so stale vectors are never served.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::document::SplitConfig;
use crate::index::{IndexEntry, VectorIndex};

/// Format version written into every manifest.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// First-line header describing how a persisted index was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    /// File format version.
    pub version: u32,
    /// Embedding model identifier used for every entry.
    pub model: String,
    /// Dimension override the entries were requested with, if any.
    pub dimension_override: Option<usize>,
    /// Embedding dimensionality shared by every entry.
    pub dimensions: usize,
    /// Window width used when chunking, in characters.
    pub chunk_size: usize,
    /// Window overlap used when chunking, in characters.
    pub chunk_overlap: usize,
    /// CRC32 of the raw document bytes the index was built from.
    pub document_checksum: u32,
    /// Number of entry lines following the manifest.
    pub chunk_count: usize,
    /// Epoch milliseconds when the index was written.
    pub created_epoch_ms: u64,
}

impl IndexManifest {
    /// True when the persisted index matches the current document and
    /// settings and may be served. The dimension override takes part so
    /// query vectors embedded under a different override are never compared
    /// against these entries.
    pub fn matches(
        &self,
        model: &str,
        dimension_override: Option<usize>,
        document_checksum: u32,
        split: &SplitConfig,
    ) -> bool {
        self.version == INDEX_FORMAT_VERSION
            && self.model == model
            && self.dimension_override == dimension_override
            && self.document_checksum == document_checksum
            && self.chunk_size == split.chunk_size
            && self.chunk_overlap == split.chunk_overlap
    }
}

/// Writes the manifest line followed by one JSON record per index entry.
pub fn save_index(
    path: &Path,
    index: &VectorIndex,
    model: &str,
    dimension_override: Option<usize>,
    document_checksum: u32,
    split: &SplitConfig,
) -> Result<()> {
    let manifest = IndexManifest {
        version: INDEX_FORMAT_VERSION,
        model: model.to_string(),
        dimension_override,
        dimensions: index.dimensions(),
        chunk_size: split.chunk_size,
        chunk_overlap: split.chunk_overlap,
        document_checksum,
        chunk_count: index.len(),
        created_epoch_ms: epoch_ms(),
    };
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &manifest)?;
    writer.write_all(b"\n")?;
    for entry in index.entries() {
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a persisted index, returning `None` when the file is missing or its
/// manifest does not match the current document, model, dimension override,
/// or split settings.
pub fn load_index_if_fresh(
    path: &Path,
    model: &str,
    dimension_override: Option<usize>,
    document_checksum: u32,
    split: &SplitConfig,
) -> Result<Option<VectorIndex>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to open {}", path.display()))
        }
    };
    let mut reader = BufReader::new(file);
    let mut header = String::new();
    reader
        .read_line(&mut header)
        .with_context(|| format!("failed to read manifest line from {}", path.display()))?;
    let manifest: IndexManifest = serde_json::from_str(header.trim())
        .with_context(|| format!("invalid index manifest in {}", path.display()))?;
    if !manifest.matches(model, dimension_override, document_checksum, split) {
        return Ok(None);
    }

    let mut entries = Vec::with_capacity(manifest.chunk_count);
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", line_no + 2))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: IndexEntry = serde_json::from_str(&line)
            .with_context(|| format!("invalid index record at line {}", line_no + 2))?;
        entries.push(entry);
    }
    anyhow::ensure!(
        entries.len() == manifest.chunk_count,
        "index file {} holds {} records, manifest expects {}",
        path.display(),
        entries.len(),
        manifest.chunk_count
    );
    let index = VectorIndex::from_entries(entries)?;
    Ok(Some(index))
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}
