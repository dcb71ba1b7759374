//! OpenAI-based embedding client implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::Embedder;

/// Blocking embeddings client that talks to OpenAI-compatible endpoints.
///
/// Each call is bounded by the construction-time timeout and made exactly
/// once; failures surface to the caller rather than being retried.
#[derive(Clone, Debug)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    batch_size: usize,
}

impl OpenAiEmbedder {
    /// Builds a new OpenAI embeddings client.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        dimensions: Option<usize>,
        timeout: Duration,
        batch_size: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing OpenAI model name");
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model,
            dimensions,
            batch_size: batch_size.max(1),
        })
    }

    /// Maximum batch size configured for this client.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embedding model identifier sent with every request.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Dimension override sent with every request, if configured.
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        anyhow::ensure!(
            inputs.len() <= self.batch_size,
            "batch of {} exceeds configured max {}",
            inputs.len(),
            self.batch_size
        );

        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.dimensions,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .context("failed to reach the embeddings endpoint")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("OpenAI embeddings request failed ({}): {}", status, body);
        }
        let mut parsed: EmbeddingResponse = resp
            .json()
            .context("failed to parse OpenAI embedding response")?;
        parsed.data.sort_by_key(|entry| entry.index);
        anyhow::ensure!(
            parsed.data.len() == inputs.len(),
            "OpenAI returned {} embeddings for {} inputs",
            parsed.data.len(),
            inputs.len()
        );
        Ok(parsed
            .data
            .into_iter()
            .map(|entry| entry.embedding)
            .collect())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
