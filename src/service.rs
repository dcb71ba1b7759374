//! HTTP surface for the question answering service.

use std::sync::{Arc, OnceLock};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::engine::{AnswerEngine, AnswerError};

/// Static descriptors returned by the info endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    /// Service name.
    pub app_name: String,
    /// One-line description of the served document.
    pub description: String,
    /// Backing technology labels.
    pub technologies: Vec<String>,
    /// Deployment status label.
    pub status: String,
}

/// Shared application state handed to every handler.
///
/// The engine slot starts empty and is filled exactly once when background
/// initialization completes; until then the service reports `initializing`
/// and questions are turned away with 503. Nothing in here is mutated per
/// request.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<OnceLock<Arc<AnswerEngine>>>,
    info: Arc<ServiceInfo>,
}

impl AppState {
    /// Creates state whose engine slot is still empty.
    pub fn new(info: ServiceInfo) -> Self {
        Self {
            engine: Arc::new(OnceLock::new()),
            info: Arc::new(info),
        }
    }

    /// Installs the engine, flipping readiness. Only the first call wins;
    /// returns false when an engine was already installed.
    pub fn install_engine(&self, engine: Arc<AnswerEngine>) -> bool {
        self.engine.set(engine).is_ok()
    }

    /// Engine accessor; `None` until initialization completes.
    pub fn engine(&self) -> Option<Arc<AnswerEngine>> {
        self.engine.get().cloned()
    }

    /// True once the answer pipeline is ready to serve questions.
    pub fn is_ready(&self) -> bool {
        self.engine.get().is_some()
    }
}

/// Builds the service router; CORS stays permissive so the static frontend
/// can call from any origin.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/info", get(info))
        .route("/api/ask", post(ask))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// A body without the field reads as empty so it gets the same 400 as "".
#[derive(Debug, Deserialize)]
struct AskRequest {
    #[serde(default)]
    question: String,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    question: String,
    answer: String,
    sources: Vec<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    qa_chain_initialized: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let ready = state.is_ready();
    let status = if ready { "healthy" } else { "initializing" };
    Json(HealthResponse {
        status: status.to_string(),
        qa_chain_initialized: ready,
    })
}

async fn info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(state.info.as_ref().clone())
}

async fn ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, (StatusCode, Json<ErrorBody>)> {
    let question = request.question.trim().to_string();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let Some(engine) = state.engine() else {
        return Err(service_unavailable(
            "question answering is still initializing",
        ));
    };

    let asked = question.clone();
    let outcome = tokio::task::spawn_blocking(move || engine.answer(&asked))
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "answer task join error");
            internal_error()
        })?;

    match outcome {
        Ok(answer) => Ok(Json(AskResponse {
            question,
            answer: answer.text,
            sources: answer
                .sources
                .into_iter()
                .map(|source| source.snippet)
                .collect(),
        })),
        Err(AnswerError::EmptyQuestion) => Err(bad_request("question must not be empty")),
        Err(err @ AnswerError::Embedding(_)) => {
            tracing::error!(error = %err, "embedding backend failure");
            Err(bad_gateway("failed to reach the embedding service"))
        }
        Err(err @ AnswerError::Generation(_)) => {
            tracing::error!(error = %err, "generation backend failure");
            Err(bad_gateway("failed to generate an answer"))
        }
    }
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn service_unavailable(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

// Upstream detail goes to the log; callers only ever see the generic message.
fn bad_gateway(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_GATEWAY,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn internal_error() -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: "internal error".to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::Embedder;
    use crate::engine::EngineConfig;
    use crate::index::{IndexEntry, VectorIndex};
    use crate::provider::{LlmProvider, ProviderRequest};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

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
            Ok(inputs.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct StubProvider {
        calls: Arc<AtomicUsize>,
    }

    impl LlmProvider for StubProvider {
        fn answer(&self, _request: &ProviderRequest) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("the mocked answer".to_string())
        }
    }

    fn test_info() -> ServiceInfo {
        ServiceInfo {
            app_name: "askdoc".to_string(),
            description: "question answering over one document".to_string(),
            technologies: vec!["Rust".to_string(), "Axum".to_string()],
            status: "running".to_string(),
        }
    }

    fn ready_state(embed_fail: bool) -> (AppState, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let index = VectorIndex::from_entries(vec![
            IndexEntry {
                chunk_id: 0,
                text: "alpha section of the document".to_string(),
                source_offset: 0,
                embedding: vec![1.0, 0.0],
            },
            IndexEntry {
                chunk_id: 1,
                text: "beta section of the document".to_string(),
                source_offset: 29,
                embedding: vec![0.0, 1.0],
            },
        ])
        .expect("index");
        let embed_calls = Arc::new(AtomicUsize::new(0));
        let provider_calls = Arc::new(AtomicUsize::new(0));
        let engine = AnswerEngine::new(
            Box::new(StubEmbedder {
                calls: embed_calls.clone(),
                fail: embed_fail,
            }),
            Box::new(StubProvider {
                calls: provider_calls.clone(),
            }),
            index,
            EngineConfig::default(),
        );
        let state = AppState::new(test_info());
        assert!(state.install_engine(Arc::new(engine)));
        (state, embed_calls, provider_calls)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn health_reports_initializing_before_ready() {
        let state = AppState::new(test_info());
        let response = health(State(state)).await;
        assert_eq!(response.0.status, "initializing");
        assert!(!response.0.qa_chain_initialized);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn health_reports_healthy_once_engine_installed() {
        let (state, _, _) = ready_state(false);
        let response = health(State(state)).await;
        assert_eq!(response.0.status, "healthy");
        assert!(response.0.qa_chain_initialized);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn info_returns_static_descriptors() {
        let (state, _, _) = ready_state(false);
        let response = info(State(state)).await;
        assert_eq!(response.0.app_name, "askdoc");
        assert_eq!(response.0.status, "running");
        assert_eq!(response.0.technologies.len(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn empty_question_is_rejected_without_backend_calls() {
        let (state, embed_calls, provider_calls) = ready_state(false);
        let result = ask(
            State(state),
            Json(AskRequest {
                question: "   \n".to_string(),
            }),
        )
        .await;
        let (status, body) = result.expect_err("must reject");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.0.message, "question must not be empty");
        assert_eq!(embed_calls.load(Ordering::SeqCst), 0);
        assert_eq!(provider_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn body_without_question_field_reads_as_empty() {
        let request: AskRequest = serde_json::from_str("{}").expect("bare body");
        assert_eq!(request.question, "");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn ask_before_ready_returns_service_unavailable() {
        let state = AppState::new(test_info());
        let result = ask(
            State(state),
            Json(AskRequest {
                question: "anything to report?".to_string(),
            }),
        )
        .await;
        let (status, _) = result.expect_err("must turn the question away");
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn ask_returns_answer_with_ordered_snippets() {
        let (state, embed_calls, provider_calls) = ready_state(false);
        let response = ask(
            State(state),
            Json(AskRequest {
                question: "  what does the document cover?  ".to_string(),
            }),
        )
        .await
        .expect("answer");
        assert_eq!(response.0.question, "what does the document cover?");
        assert_eq!(response.0.answer, "the mocked answer");
        assert_eq!(
            response.0.sources,
            vec![
                "alpha section of the document...".to_string(),
                "beta section of the document...".to_string(),
            ]
        );
        assert_eq!(embed_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn embedding_outage_maps_to_bad_gateway_and_health_stays_healthy() {
        let (state, _, provider_calls) = ready_state(true);
        let result = ask(
            State(state.clone()),
            Json(AskRequest {
                question: "anything".to_string(),
            }),
        )
        .await;
        let (status, body) = result.expect_err("must fail");
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.0.message, "failed to reach the embedding service");
        assert!(!body.0.message.contains("backend unavailable"));
        assert_eq!(provider_calls.load(Ordering::SeqCst), 0);

        let health_response = health(State(state)).await;
        assert_eq!(health_response.0.status, "healthy");
        assert!(health_response.0.qa_chain_initialized);
    }

    #[test]
    fn second_engine_install_is_rejected() {
        let (state, _, _) = ready_state(false);
        let (other, _, _) = ready_state(false);
        let engine = other.engine().expect("installed engine");
        assert!(!state.install_engine(engine));
    }
}
