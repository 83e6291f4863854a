//! Language model trait and an OpenAI-compatible chat completions client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{RagError, Result};
use crate::providers::ProviderSettings;

/// A provider that turns a prompt into generated text.
///
/// Implementations must not retry internally; the caller decides whether a
/// failed completion is worth resubmitting.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Generate a completion for a single user prompt.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// A [`LanguageModel`] backed by any `/chat/completions` endpoint.
///
/// Works with DashScope compatible mode, DeepSeek, OpenAI, Moonshot, and
/// self-hosted OpenAI-compatible servers; the backend is chosen by
/// [`ProviderSettings::base_url`].
///
/// # Example
///
/// ```rust,ignore
/// use ragline::{ChatCompletionsModel, ProviderKind, ProviderRole, ProviderSettings};
///
/// let settings = ProviderSettings::new(ProviderKind::DeepSeek, ProviderRole::Chat, key)?;
/// let model = ChatCompletionsModel::new(settings);
/// let text = model.complete("Hello").await?;
/// ```
pub struct ChatCompletionsModel {
    client: reqwest::Client,
    settings: ProviderSettings,
    label: String,
    temperature: Option<f32>,
}

impl ChatCompletionsModel {
    /// Create a client from validated settings.
    pub fn new(settings: ProviderSettings) -> Self {
        Self::with_client(reqwest::Client::new(), settings)
    }

    /// Create a client sharing an existing `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, settings: ProviderSettings) -> Self {
        let label = settings.label();
        Self { client, settings, label, temperature: None }
    }

    /// Set the sampling temperature sent with each request.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url)
    }
}

// ── Chat completions request/response types ────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: ErrorDetail,
}

#[derive(Deserialize)]
pub(crate) struct ErrorDetail {
    pub(crate) message: String,
}

/// Turn a non-success response into a [`RagError::Provider`] carrying the API message.
pub(crate) async fn api_error(provider: &str, response: reqwest::Response) -> RagError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail =
        serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);

    error!(provider, %status, "API error");
    RagError::Provider {
        provider: provider.to_string(),
        status: Some(status.as_u16()),
        message: format!("API returned {status}: {detail}"),
    }
}

// ── LanguageModel implementation ───────────────────────────────────

#[async_trait]
impl LanguageModel for ChatCompletionsModel {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!(provider = %self.label, prompt_len = prompt.len(), "chat completion");

        let request_body = ChatRequest {
            model: &self.settings.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: self.temperature,
        };

        let mut request = self.client.post(self.endpoint()).json(&request_body);
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
        let chat: ChatResponse = serde_json::from_slice(&body).map_err(|e| {
            error!(provider = %self.label, error = %e, "failed to parse response");
            let message = format!("failed to parse response: {e}");
            RagError::malformed_response(&self.label, status, message)
        })?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                RagError::malformed_response(&self.label, status, "API returned no completion")
            })
    }
}
