//! OpenAI-compatible embedding provider.
//!
//! Calls `{base_url}/embeddings`, which OpenAI, DashScope compatible mode,
//! and most self-hosted servers expose.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::llm::api_error;
use crate::providers::{ProviderKind, ProviderSettings};

/// DashScope rejects embedding requests with more inputs than this.
const DASHSCOPE_MAX_BATCH: usize = 25;

/// An [`EmbeddingProvider`] backed by an OpenAI-compatible embeddings API.
///
/// Uses `reqwest` to call the `/embeddings` endpoint directly.
///
/// # Configuration
///
/// - `model`, `base_url`, `api_key` – from [`ProviderSettings`].
/// - `dimensions` – when set in the settings it is also sent to the API
///   (Matryoshka truncation); otherwise the model default of 1536 is assumed.
///
/// # Example
///
/// ```rust,ignore
/// use ragline::{OpenAIEmbeddingProvider, ProviderKind, ProviderRole, ProviderSettings};
///
/// let settings = ProviderSettings::new(ProviderKind::DashScope, ProviderRole::Embedding, key)?;
/// let provider = OpenAIEmbeddingProvider::new(settings);
/// let embedding = provider.embed("故宫博物院").await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    settings: ProviderSettings,
    label: String,
    dimensions: usize,
    max_batch: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// Create a provider from validated settings.
    pub fn new(settings: ProviderSettings) -> Self {
        Self::with_client(reqwest::Client::new(), settings)
    }

    /// Create a provider sharing an existing `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, settings: ProviderSettings) -> Self {
        let max_batch = match settings.kind {
            ProviderKind::DashScope => Some(DASHSCOPE_MAX_BATCH),
            _ => None,
        };
        Self {
            client,
            label: settings.label(),
            dimensions: settings.embedding_dimensions(),
            settings,
            max_batch,
        }
    }

    async fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let request_body = EmbeddingRequest {
            model: &self.settings.model,
            input: texts.to_vec(),
            dimensions: self.settings.dimensions,
        };

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.settings.base_url))
            .json(&request_body);
        if !self.settings.api_key.is_empty() {
            request = request.bearer_auth(&self.settings.api_key);
        }

        let response = request.send().await.map_err(|e| {
            error!(provider = %self.label, error = %e, "request failed");
            RagError::provider(&self.label, format!("request failed: {e}"))
        })?;

        if !response.status().is_success() {
            return Err(api_error(&self.label, response).await);
        }

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            error!(provider = %self.label, error = %e, "failed to read response");
            RagError::provider(&self.label, format!("failed to read response: {e}"))
        })?;
        let mut embedding_response: EmbeddingResponse =
            serde_json::from_slice(&body).map_err(|e| {
                error!(provider = %self.label, error = %e, "failed to parse response");
                RagError::malformed_response(
                    &self.label,
                    status,
                    format!("failed to parse response: {e}"),
                )
            })?;

        if embedding_response.data.len() != texts.len() {
            return Err(RagError::malformed_response(
                &self.label,
                status,
                format!(
                    "API returned {} embeddings for {} inputs",
                    embedding_response.data.len(),
                    texts.len()
                ),
            ));
        }

        // Responses carry an index; do not rely on array order.
        embedding_response.data.sort_by_key(|d| d.index);
        Ok(embedding_response.data.into_iter().map(|d| d.embedding).collect())
    }
}

// ── Embeddings API request/response types ──────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

// ── EmbeddingProvider implementation ───────────────────────────────

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    fn name(&self) -> &str {
        &self.label
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = %self.label, text_len = text.len(), "embedding single text");

        let results = self.request(&[text]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| RagError::provider(&self.label, "API returned empty response"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            provider = %self.label,
            batch_size = texts.len(),
            model = %self.settings.model,
            "embedding batch"
        );

        let limit = self.max_batch.unwrap_or(texts.len());
        let mut results = Vec::with_capacity(texts.len());
        for part in texts.chunks(limit) {
            results.extend(self.request(part).await?);
        }
        Ok(results)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
