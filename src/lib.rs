#![warn(missing_docs)]
//! Retrieval-augmented question answering over a single fixed document.
//!
//! The pipeline extracts text from one PDF at startup, splits it into
//! overlapping fixed-size windows, embeds every window once, and serves
//! questions by retrieving the closest windows and asking a hosted LLM to
//! answer from them.

pub mod document;
pub mod embedder;
pub mod engine;
pub mod index;
pub mod provider;
pub mod service;
pub mod store;

pub use document::{load_document, split_text, Chunk, DocumentError, LoadedDocument, SplitConfig};
pub use embedder::{Embedder, OpenAiEmbedder};
pub use engine::{Answer, AnswerEngine, AnswerError, EngineConfig, SourceChunk};
pub use index::{cosine_similarity, IndexEntry, SearchHit, VectorIndex};
pub use provider::{AnthropicProvider, LlmProvider, OpenAiProvider, ProviderRequest};
pub use service::{router, AppState, ServiceInfo};
pub use store::{load_index_if_fresh, save_index, IndexManifest, INDEX_FORMAT_VERSION};
