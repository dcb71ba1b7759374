//! Source document loading and fixed-window chunking.

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};

/// Contiguous window of extracted text submitted for embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position of the chunk within the document, assigned in order.
    pub id: usize,
    /// Window text.
    pub text: String,
    /// Byte offset of the window start within the extracted text.
    pub source_offset: usize,
}

/// Extracted text plus the checksum of the raw file it came from.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// Full extracted text, page breaks flattened into the stream.
    pub text: String,
    /// CRC32 of the raw file bytes.
    pub checksum: u32,
}

/// Chunking tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitConfig {
    /// Window width in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive windows.
    pub chunk_overlap: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl SplitConfig {
    /// Window advance per chunk; overlap is clamped below the window width
    /// so the split always makes progress.
    pub fn step(&self) -> usize {
        let chunk_size = self.chunk_size.max(1);
        chunk_size - self.chunk_overlap.min(chunk_size - 1)
    }
}

/// Errors surfaced while loading the source document.
#[derive(Debug)]
pub enum DocumentError {
    /// Reading the file from disk failed.
    Read(PathBuf, std::io::Error),
    /// The PDF parser rejected the file contents.
    Extract(PathBuf, pdf_extract::OutputError),
    /// Extraction succeeded but produced no usable text.
    NoText(PathBuf),
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(path, err) => write!(f, "failed to read document {}: {err}", path.display()),
            Self::Extract(path, err) => {
                write!(f, "failed to extract text from {}: {err}", path.display())
            }
            Self::NoText(path) => {
                write!(f, "document {} contains no extractable text", path.display())
            }
        }
    }
}

impl Error for DocumentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read(_, err) => Some(err),
            Self::Extract(_, err) => Some(err),
            Self::NoText(_) => None,
        }
    }
}

/// Reads a PDF from disk and extracts its text.
pub fn load_document(path: &Path) -> Result<LoadedDocument, DocumentError> {
    let bytes = fs::read(path).map_err(|err| DocumentError::Read(path.to_path_buf(), err))?;

    let mut hasher = Crc32::new();
    hasher.update(&bytes);
    let checksum = hasher.finalize();

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .map_err(|err| DocumentError::Extract(path.to_path_buf(), err))?;
    if text.trim().is_empty() {
        return Err(DocumentError::NoText(path.to_path_buf()));
    }

    Ok(LoadedDocument { text, checksum })
}

/// Splits extracted text into fixed-size overlapping windows.
///
/// Windows are measured in characters; each chunk records the byte offset of
/// its start so callers can slice back into the original text. The final
/// chunk may be shorter than the window width.
pub fn split_text(text: &str, config: &SplitConfig) -> Vec<Chunk> {
    let chunk_size = config.chunk_size.max(1);
    let step = config.step();

    // Byte offset of every char boundary, including the end of the text.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = boundaries.len() - 1;
    if total_chars == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + chunk_size).min(total_chars);
        let byte_start = boundaries[start];
        let byte_end = boundaries[end];
        chunks.push(Chunk {
            id: chunks.len(),
            text: text[byte_start..byte_end].to_string(),
            source_offset: byte_start,
        });
        if end == total_chars {
            break;
        }
        start += step;
    }
    chunks
}
