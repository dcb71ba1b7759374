use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, ensure, Result};
use askdoc::document::{load_document, split_text, SplitConfig};
use askdoc::embedder::{Embedder, OpenAiEmbedder};
use askdoc::index::{IndexEntry, VectorIndex};
use askdoc::store;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "askdoc-indexer",
    about = "Builds the persisted embedding index for a PDF document"
)]
struct IndexCli {
    /// Path to the PDF document to index.
    #[arg(long, env = "ASKDOC_DOCUMENT", default_value = "document.pdf")]
    document: PathBuf,

    /// Output JSONL containing the manifest line and embedded chunk records.
    #[arg(long, env = "ASKDOC_INDEX_CACHE", default_value = "index.jsonl")]
    output: PathBuf,

    /// Overwrite the output file when it already exists.
    #[arg(long, default_value_t = false)]
    force: bool,

    /// Window width when chunking, in characters.
    #[arg(long, env = "ASKDOC_CHUNK_SIZE", default_value_t = 1000)]
    chunk_size: usize,

    /// Window overlap when chunking, in characters.
    #[arg(long, env = "ASKDOC_CHUNK_OVERLAP", default_value_t = 200)]
    chunk_overlap: usize,

    /// OpenAI API key used for embedding calls.
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Embedding model identifier (e.g. text-embedding-3-small).
    #[arg(
        long,
        env = "ASKDOC_EMBED_MODEL",
        default_value = "text-embedding-3-small"
    )]
    embed_model: String,

    /// Optional dimension override when supported by the model.
    #[arg(long, env = "ASKDOC_EMBED_DIMENSIONS")]
    embed_dimensions: Option<usize>,

    /// Base URL for OpenAI-compatible endpoints.
    #[arg(
        long,
        env = "ASKDOC_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    openai_base_url: String,

    /// Max inputs per embedding request.
    #[arg(long, env = "ASKDOC_EMBED_BATCH", default_value_t = 32)]
    embed_batch_size: usize,

    /// Seconds before embedding requests time out.
    #[arg(long, env = "ASKDOC_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    embed_timeout_secs: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = IndexCli::parse();
    if cli.output.exists() && !cli.force {
        bail!(
            "{} already exists; pass --force to rebuild it",
            cli.output.display()
        );
    }

    let batch_size = cli.embed_batch_size.max(1);
    let embedder = OpenAiEmbedder::new(
        cli.openai_api_key,
        cli.openai_base_url,
        cli.embed_model,
        cli.embed_dimensions,
        Duration::from_secs(cli.embed_timeout_secs.max(1)),
        batch_size,
    )?;

    let document = load_document(&cli.document)?;
    info!(
        document = %cli.document.display(),
        chars = document.text.chars().count(),
        checksum = document.checksum,
        "document loaded"
    );

    let split = SplitConfig {
        chunk_size: cli.chunk_size,
        chunk_overlap: cli.chunk_overlap,
    };
    let chunks = split_text(&document.text, &split);
    ensure!(!chunks.is_empty(), "document produced no chunks");
    info!(chunks = chunks.len(), batch_size, "embedding document chunks");

    let mut entries = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size) {
        let inputs: Vec<&str> = batch.iter().map(|chunk| chunk.text.as_str()).collect();
        let embeddings = embedder.embed_batch(&inputs)?;
        ensure!(
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
        info!(embedded = entries.len(), total = chunks.len(), "embedded batch");
    }

    let index = VectorIndex::from_entries(entries)?;
    store::save_index(
        &cli.output,
        &index,
        embedder.model(),
        embedder.dimensions(),
        document.checksum,
        &split,
    )?;
    info!(
        path = %cli.output.display(),
        chunks = index.len(),
        dimensions = index.dimensions(),
        "index written"
    );
    Ok(())
}
