use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use askdoc::document::{load_document, split_text, LoadedDocument, SplitConfig};
use askdoc::embedder::OpenAiEmbedder;
use askdoc::engine::{AnswerEngine, EngineConfig};
use askdoc::index::VectorIndex;
use askdoc::provider::{AnthropicProvider, LlmProvider, OpenAiProvider};
use askdoc::service::{router, AppState, ServiceInfo};
use askdoc::store;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "askdoc-server",
    about = "HTTP question answering service over a single PDF document"
)]
struct ServerCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "ASKDOC_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Path to the PDF document to serve.
    #[arg(long, env = "ASKDOC_DOCUMENT", default_value = "document.pdf")]
    document: PathBuf,

    /// Human-readable subject used in prompts and the info endpoint.
    #[arg(long, env = "ASKDOC_TITLE", default_value = "the document")]
    document_title: String,

    /// Optional persisted index; loaded when fresh, rebuilt and saved otherwise.
    #[arg(long, env = "ASKDOC_INDEX_CACHE")]
    index_cache: Option<PathBuf>,

    /// Window width when chunking, in characters.
    #[arg(long, env = "ASKDOC_CHUNK_SIZE", default_value_t = 1000)]
    chunk_size: usize,

    /// Window overlap when chunking, in characters.
    #[arg(long, env = "ASKDOC_CHUNK_OVERLAP", default_value_t = 200)]
    chunk_overlap: usize,

    /// Chunks retrieved per question.
    #[arg(long, env = "ASKDOC_TOP_K", default_value_t = 3)]
    top_k: usize,

    /// Character budget for the stitched context block.
    #[arg(long, env = "ASKDOC_MAX_CONTEXT_CHARS", default_value_t = 6000)]
    max_context_chars: usize,

    /// OpenAI API key used for query and corpus embeddings.
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Embedding model identifier.
    #[arg(
        long,
        env = "ASKDOC_EMBED_MODEL",
        default_value = "text-embedding-3-small"
    )]
    embed_model: String,

    /// Optional embedding dimension override.
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

    /// Target LLM provider (openai or anthropic).
    #[arg(long, env = "ASKDOC_LLM_PROVIDER", default_value = "openai")]
    llm_provider: String,

    /// OpenAI chat model used for answer synthesis.
    #[arg(long, env = "ASKDOC_CHAT_MODEL", default_value = "gpt-3.5-turbo")]
    chat_model: String,

    /// Anthropic API key (required when --llm-provider anthropic).
    #[arg(long, env = "ANTHROPIC_API_KEY")]
    anthropic_api_key: Option<String>,

    /// Anthropic model identifier.
    #[arg(
        long,
        env = "ASKDOC_ANTHROPIC_MODEL",
        default_value = "claude-3-sonnet-20240229"
    )]
    anthropic_model: String,

    /// Seconds before completion requests time out.
    #[arg(long, env = "ASKDOC_LLM_TIMEOUT_SECS", default_value_t = 60)]
    llm_timeout_secs: u64,

    /// Sampling temperature for the answer model.
    #[arg(long, default_value_t = 0.0)]
    temperature: f32,

    /// Maximum tokens to request from the completion model.
    #[arg(long, default_value_t = 400)]
    max_completion_tokens: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = ServerCli::parse();
    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;

    let state = AppState::new(ServiceInfo {
        app_name: "askdoc".to_string(),
        description: format!("Question answering over {}", cli.document_title),
        technologies: vec![
            "Rust".to_string(),
            "Axum".to_string(),
            "OpenAI embeddings".to_string(),
            "In-memory cosine index".to_string(),
        ],
        status: "running".to_string(),
    });

    // Bind before ingesting so the health endpoint can report the
    // initializing phase; readiness flips when the background build lands.
    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "askdoc-server listening");

    let init_state = state.clone();
    tokio::task::spawn_blocking(move || match initialize_engine(&cli) {
        Ok(engine) => {
            let indexed_chunks = engine.indexed_chunks();
            if init_state.install_engine(Arc::new(engine)) {
                info!(indexed_chunks, "question answering initialized");
            }
        }
        Err(err) => {
            error!(error = %err, "initialization failed");
            std::process::exit(1);
        }
    });

    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}

fn initialize_engine(cli: &ServerCli) -> Result<AnswerEngine> {
    let split = SplitConfig {
        chunk_size: cli.chunk_size,
        chunk_overlap: cli.chunk_overlap,
    };
    let embedder = OpenAiEmbedder::new(
        cli.openai_api_key.clone(),
        cli.openai_base_url.clone(),
        cli.embed_model.clone(),
        cli.embed_dimensions,
        Duration::from_secs(cli.embed_timeout_secs.max(1)),
        cli.embed_batch_size.max(1),
    )?;

    let document = load_document(&cli.document)?;
    info!(
        chars = document.text.chars().count(),
        checksum = document.checksum,
        "document loaded"
    );

    let index = obtain_index(cli, &embedder, &document, &split)?;
    info!(
        chunks = index.len(),
        dimensions = index.dimensions(),
        "vector index ready"
    );

    let provider = select_provider(cli)?;
    let config = EngineConfig {
        document_title: cli.document_title.clone(),
        top_k: cli.top_k.max(1),
        max_context_chars: cli.max_context_chars.max(1),
        temperature: cli.temperature,
        max_completion_tokens: cli.max_completion_tokens,
        ..EngineConfig::default()
    };
    Ok(AnswerEngine::new(Box::new(embedder), provider, index, config))
}

fn obtain_index(
    cli: &ServerCli,
    embedder: &OpenAiEmbedder,
    document: &LoadedDocument,
    split: &SplitConfig,
) -> Result<VectorIndex> {
    if let Some(cache_path) = &cli.index_cache {
        if let Some(index) = store::load_index_if_fresh(
            cache_path,
            embedder.model(),
            embedder.dimensions(),
            document.checksum,
            split,
        )? {
            info!(path = %cache_path.display(), chunks = index.len(), "loaded persisted index");
            return Ok(index);
        }
        info!(path = %cache_path.display(), "persisted index missing or stale; rebuilding");
    }

    let chunks = split_text(&document.text, split);
    anyhow::ensure!(!chunks.is_empty(), "document produced no chunks");
    info!(chunks = chunks.len(), "embedding document chunks");
    let index = VectorIndex::build(embedder, &chunks, embedder.batch_size())?;

    if let Some(cache_path) = &cli.index_cache {
        store::save_index(
            cache_path,
            &index,
            embedder.model(),
            embedder.dimensions(),
            document.checksum,
            split,
        )?;
        info!(path = %cache_path.display(), "persisted index written");
    }
    Ok(index)
}

fn select_provider(cli: &ServerCli) -> Result<Box<dyn LlmProvider>> {
    let timeout = Duration::from_secs(cli.llm_timeout_secs.max(1));
    match cli.llm_provider.to_lowercase().as_str() {
        "openai" => {
            let provider =
                OpenAiProvider::new(cli.openai_api_key.clone(), cli.chat_model.clone(), timeout)?;
            Ok(Box::new(provider))
        }
        "anthropic" => {
            let key = cli.anthropic_api_key.clone().ok_or_else(|| {
                anyhow!("ANTHROPIC_API_KEY must be set for the Anthropic provider")
            })?;
            let provider = AnthropicProvider::new(key, cli.anthropic_model.clone(), timeout)?;
            Ok(Box::new(provider))
        }
        other => bail!(
            "unsupported llm provider '{}'; use openai or anthropic",
            other
        ),
    }
}
