//! Retrieval and answer synthesis over the indexed document.

use std::fmt;

use crate::embedder::Embedder;
use crate::index::{SearchHit, VectorIndex};
use crate::provider::{LlmProvider, ProviderRequest};

/// Answer pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Human-readable subject of the document, interpolated into the prompt.
    pub document_title: String,
    /// Number of chunks retrieved per question.
    pub top_k: usize,
    /// Character budget for the stitched context block.
    pub max_context_chars: usize,
    /// Characters kept when rendering source snippets.
    pub snippet_chars: usize,
    /// Sampling temperature for the answer model.
    pub temperature: f32,
    /// Maximum tokens requested from the completion model.
    pub max_completion_tokens: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            document_title: "the document".to_string(),
            top_k: 3,
            max_context_chars: 6000,
            snippet_chars: 200,
            temperature: 0.0,
            max_completion_tokens: 400,
        }
    }
}

/// Source chunk reference attached to an answer.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceChunk {
    /// Chunk position within the document.
    pub chunk_id: usize,
    /// Leading slice of the chunk text.
    pub snippet: String,
    /// Cosine similarity between the question and the chunk.
    pub score: f32,
}

/// Synthesized answer plus the chunks that grounded it.
#[derive(Debug, Clone)]
pub struct Answer {
    /// Model-produced answer text.
    pub text: String,
    /// Chunks that entered the prompt context, in retrieval order. Hits
    /// dropped by the context budget are not listed.
    pub sources: Vec<SourceChunk>,
}

/// Failures surfaced while answering a question.
#[derive(Debug)]
pub enum AnswerError {
    /// The question was empty or whitespace-only; nothing was called.
    EmptyQuestion,
    /// The embedding backend failed or timed out.
    Embedding(anyhow::Error),
    /// The completion backend failed or timed out.
    Generation(anyhow::Error),
}

impl fmt::Display for AnswerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyQuestion => write!(f, "question must not be empty"),
            Self::Embedding(err) => write!(f, "embedding service error: {err}"),
            Self::Generation(err) => write!(f, "generation service error: {err}"),
        }
    }
}

impl std::error::Error for AnswerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::EmptyQuestion => None,
            Self::Embedding(err) | Self::Generation(err) => Some(err.as_ref()),
        }
    }
}

/// Question answering pipeline over a fixed, already-indexed document.
///
/// All collaborators are injected at construction; answering a question
/// mutates nothing, so one engine instance is shared across requests.
pub struct AnswerEngine {
    embedder: Box<dyn Embedder>,
    provider: Box<dyn LlmProvider>,
    index: VectorIndex,
    config: EngineConfig,
}

impl AnswerEngine {
    /// Assembles an engine from its collaborators.
    pub fn new(
        embedder: Box<dyn Embedder>,
        provider: Box<dyn LlmProvider>,
        index: VectorIndex,
        config: EngineConfig,
    ) -> Self {
        Self {
            embedder,
            provider,
            index,
            config,
        }
    }

    /// Number of chunks in the underlying index.
    pub fn indexed_chunks(&self) -> usize {
        self.index.len()
    }

    /// Answers one question against the indexed document.
    ///
    /// The question is embedded with the same backend that embedded the
    /// corpus, the closest chunks are stitched into a bounded context, and a
    /// single completion request produces the answer. Sources cover exactly
    /// the chunks that made it into the context. No retries are made;
    /// backend failures surface as [`AnswerError`] variants.
    pub fn answer(&self, question: &str) -> Result<Answer, AnswerError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AnswerError::EmptyQuestion);
        }

        let query_vector = self
            .embedder
            .embed_one(question)
            .map_err(AnswerError::Embedding)?;
        let hits = self.index.query(&query_vector, self.config.top_k);

        let (context, included) = render_context(&hits, self.config.max_context_chars);
        let prompt = build_prompt(&self.config.document_title, &context, question);
        let request = ProviderRequest {
            prompt: &prompt,
            temperature: self.config.temperature,
            max_tokens: self.config.max_completion_tokens,
        };
        let text = self
            .provider
            .answer(&request)
            .map_err(AnswerError::Generation)?;

        let sources = hits[..included]
            .iter()
            .map(|hit| SourceChunk {
                chunk_id: hit.chunk_id,
                snippet: make_snippet(&hit.text, self.config.snippet_chars),
                score: hit.score,
            })
            .collect();
        Ok(Answer { text, sources })
    }
}

/// Stitches hit texts into a context block capped at `max_chars` characters.
/// Whole chunks only; the best hit is always kept even when it alone exceeds
/// the budget. Returns the block and how many leading hits it holds.
fn render_context(hits: &[SearchHit], max_chars: usize) -> (String, usize) {
    let mut context = String::new();
    let mut used = 0usize;
    let mut included = 0usize;
    for (idx, hit) in hits.iter().enumerate() {
        let cost = hit.text.chars().count();
        if idx > 0 && used + cost > max_chars {
            break;
        }
        if idx > 0 {
            context.push_str("\n\n");
        }
        context.push_str(&hit.text);
        used += cost;
        included += 1;
    }
    (context, included)
}

fn build_prompt(document_title: &str, context: &str, question: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are a helpful AI assistant answering questions about ");
    prompt.push_str(document_title);
    prompt.push_str(".\n");
    prompt.push_str(
        "Use the following pieces of context to answer the question at the end. If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n",
    );
    prompt.push_str("Context: ");
    prompt.push_str(context);
    prompt.push_str("\n\nQuestion: ");
    prompt.push_str(question);
    prompt.push_str("\n\nAnswer:");
    prompt
}

fn make_snippet(text: &str, limit: usize) -> String {
    let mut snippet: String = text.chars().take(limit).collect();
    snippet.push_str("...");
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexEntry;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn embed_text(input: &str) -> Vec<f32> {
        if input.contains("beta") {
            vec![0.0, 1.0, 0.0]
        } else {
            vec![1.0, 0.0, 0.0]
        }
    }

    struct StubEmbedder {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Embedder for StubEmbedder {
        fn embed_batch(&self, inputs: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("embedding backend unavailable");
            }
            Ok(inputs.iter().map(|input| embed_text(input)).collect())
        }
    }

    struct StubProvider {
        calls: Arc<AtomicUsize>,
        prompts: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl LlmProvider for StubProvider {
        fn answer(&self, request: &ProviderRequest) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("completion backend unavailable");
            }
            self.prompts
                .lock()
                .expect("prompt log")
                .push(request.prompt.to_string());
            Ok("the mocked answer".to_string())
        }
    }

    struct Harness {
        engine: AnswerEngine,
        embed_calls: Arc<AtomicUsize>,
        provider_calls: Arc<AtomicUsize>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    fn harness(embed_fail: bool, provider_fail: bool, config: EngineConfig) -> Harness {
        let index = VectorIndex::from_entries(vec![
            IndexEntry {
                chunk_id: 0,
                text: "alpha material covering the first topic".to_string(),
                source_offset: 0,
                embedding: vec![1.0, 0.0, 0.0],
            },
            IndexEntry {
                chunk_id: 1,
                text: "beta material covering the second topic".to_string(),
                source_offset: 100,
                embedding: vec![0.0, 1.0, 0.0],
            },
            IndexEntry {
                chunk_id: 2,
                text: "gamma material covering the third topic".to_string(),
                source_offset: 200,
                embedding: vec![0.0, 0.0, 1.0],
            },
        ])
        .expect("index");

        let embed_calls = Arc::new(AtomicUsize::new(0));
        let provider_calls = Arc::new(AtomicUsize::new(0));
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let engine = AnswerEngine::new(
            Box::new(StubEmbedder {
                calls: embed_calls.clone(),
                fail: embed_fail,
            }),
            Box::new(StubProvider {
                calls: provider_calls.clone(),
                prompts: prompts.clone(),
                fail: provider_fail,
            }),
            index,
            config,
        );
        Harness {
            engine,
            embed_calls,
            provider_calls,
            prompts,
        }
    }

    #[test]
    fn empty_question_is_rejected_without_backend_calls() {
        let h = harness(false, false, EngineConfig::default());
        let err = h.engine.answer("   \n\t").expect_err("must reject");
        assert!(matches!(err, AnswerError::EmptyQuestion));
        assert_eq!(h.embed_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.provider_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn answers_with_sources_in_retrieval_order() {
        let h = harness(false, false, EngineConfig::default());
        let answer = h.engine.answer("tell me about beta").expect("answer");
        assert_eq!(answer.text, "the mocked answer");
        assert_eq!(answer.sources.len(), 3);
        assert_eq!(answer.sources[0].chunk_id, 1);
        for pair in answer.sources.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert_eq!(h.embed_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.provider_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn embedding_failure_surfaces_without_generation_call() {
        let h = harness(true, false, EngineConfig::default());
        let err = h.engine.answer("anything").expect_err("must fail");
        assert!(matches!(err, AnswerError::Embedding(_)));
        assert_eq!(h.provider_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn generation_failure_surfaces_after_embedding() {
        let h = harness(false, true, EngineConfig::default());
        let err = h.engine.answer("anything").expect_err("must fail");
        assert!(matches!(err, AnswerError::Generation(_)));
        assert_eq!(h.embed_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prompt_carries_template_context_and_question() {
        let config = EngineConfig {
            document_title: "the operations handbook".to_string(),
            ..EngineConfig::default()
        };
        let h = harness(false, false, config);
        h.engine.answer("tell me about beta").expect("answer");
        let prompts = h.prompts.lock().expect("prompt log");
        let prompt = prompts.last().expect("one prompt");
        assert!(prompt.contains("the operations handbook"));
        assert!(prompt.contains("If you don't know the answer"));
        assert!(prompt.contains("beta material covering the second topic"));
        assert!(prompt.contains("Question: tell me about beta"));
        assert!(prompt.ends_with("Answer:"));
    }

    #[test]
    fn context_budget_keeps_only_the_best_hit() {
        let config = EngineConfig {
            max_context_chars: 10,
            ..EngineConfig::default()
        };
        let h = harness(false, false, config);
        h.engine.answer("tell me about beta").expect("answer");
        let prompts = h.prompts.lock().expect("prompt log");
        let prompt = prompts.last().expect("one prompt");
        assert!(prompt.contains("beta material covering the second topic"));
        assert!(!prompt.contains("alpha material"));
        assert!(!prompt.contains("gamma material"));
    }

    #[test]
    fn budget_dropped_hits_are_not_reported_as_sources() {
        let config = EngineConfig {
            max_context_chars: 10,
            ..EngineConfig::default()
        };
        let h = harness(false, false, config);
        let answer = h.engine.answer("tell me about beta").expect("answer");
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].chunk_id, 1);
    }

    #[test]
    fn snippets_are_bounded_with_ellipsis() {
        let config = EngineConfig {
            snippet_chars: 12,
            ..EngineConfig::default()
        };
        let h = harness(false, false, config);
        let answer = h.engine.answer("tell me about beta").expect("answer");
        let snippet = &answer.sources[0].snippet;
        assert_eq!(snippet, "beta materia...");
        assert_eq!(snippet.chars().count(), 15);
    }
}
