//! In-memory similarity index over embedded document chunks.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::document::Chunk;
use crate::embedder::Embedder;

/// Embedded chunk held by the index; doubles as the persisted record shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Chunk position within the document.
    pub chunk_id: usize,
    /// Chunk body text submitted to the embedding model.
    pub text: String,
    /// Byte offset of the chunk start within the extracted text.
    pub source_offset: usize,
    /// Model embedding vector.
    pub embedding: Vec<f32>,
}

/// Scored entry returned by similarity queries.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Chunk position within the document.
    pub chunk_id: usize,
    /// Chunk body text.
    pub text: String,
    /// Byte offset of the chunk start within the extracted text.
    pub source_offset: usize,
    /// Cosine similarity against the query vector.
    pub score: f32,
}

/// Read-only brute-force index built once at startup and never mutated.
#[derive(Debug)]
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    dimensions: usize,
}

impl VectorIndex {
    /// Embeds every chunk exactly once, in id order, and assembles the index.
    pub fn build(embedder: &dyn Embedder, chunks: &[Chunk], batch_size: usize) -> Result<Self> {
        let batch_size = batch_size.max(1);
        let mut entries = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size) {
            let inputs: Vec<&str> = batch.iter().map(|chunk| chunk.text.as_str()).collect();
            let embeddings = embedder.embed_batch(&inputs)?;
            anyhow::ensure!(
                embeddings.len() == batch.len(),
                "embedding count {} mismatched batch of {}",
                embeddings.len(),
                batch.len()
            );
            for (chunk, embedding) in batch.iter().zip(embeddings) {
                entries.push(IndexEntry {
                    chunk_id: chunk.id,
                    text: chunk.text.clone(),
                    source_offset: chunk.source_offset,
                    embedding,
                });
            }
        }
        Self::from_entries(entries)
    }

    /// Assembles an index from already-embedded entries.
    pub fn from_entries(mut entries: Vec<IndexEntry>) -> Result<Self> {
        anyhow::ensure!(!entries.is_empty(), "vector index requires at least one entry");
        entries.sort_by_key(|entry| entry.chunk_id);
        let dimensions = entries[0].embedding.len();
        anyhow::ensure!(dimensions > 0, "index entries carry empty embeddings");
        for entry in &entries {
            anyhow::ensure!(
                entry.embedding.len() == dimensions,
                "chunk {} embedding has {} dimensions, index has {}",
                entry.chunk_id,
                entry.embedding.len(),
                dimensions
            );
        }
        Ok(Self {
            entries,
            dimensions,
        })
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding dimensionality shared by every entry.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Indexed entries in ascending chunk-id order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Scores every entry against the query vector and returns the top `k`.
    ///
    /// Hits come back in non-increasing similarity order; equal scores fall
    /// back to ascending chunk id so results are deterministic. Fewer than
    /// `k` hits are returned when the corpus is smaller than `k`.
    pub fn query(&self, vector: &[f32], k: usize) -> Vec<SearchHit> {
        if k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (idx, cosine_similarity(vector, &entry.embedding)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.entries[a.0].chunk_id.cmp(&self.entries[b.0].chunk_id))
        });
        scored.truncate(k);
        scored
            .into_iter()
            .map(|(idx, score)| {
                let entry = &self.entries[idx];
                SearchHit {
                    chunk_id: entry.chunk_id,
                    text: entry.text.clone(),
                    source_offset: entry.source_offset,
                    score,
                }
            })
            .collect()
    }
}

/// Cosine similarity between two vectors; mismatched or zero-norm inputs
/// score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
