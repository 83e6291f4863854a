//! Provider selection and credentials.
//!
//! Every supported backend speaks the OpenAI-compatible REST protocol, so a
//! provider is fully described by its kind, credential, model, and base URL.
//! Settings are validated when they are built, never at first use.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Default embedding dimensionality for `text-embedding-v2` and `text-embedding-3-small`.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

/// The role a provider plays in the pipeline; selects default model names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRole {
    /// Chat completions used by the answer synthesizer.
    Chat,
    /// Text embeddings used for indexing and retrieval.
    Embedding,
}

/// A known OpenAI-compatible backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Alibaba Cloud DashScope, compatible mode (Qwen models).
    DashScope,
    /// DeepSeek.
    DeepSeek,
    /// OpenAI.
    OpenAI,
    /// Moonshot AI (Kimi).
    Moonshot,
    /// Any other OpenAI-compatible endpoint; requires an explicit base URL.
    Custom,
}

impl ProviderKind {
    /// Base URL used when no override is configured.
    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::DashScope => Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
            Self::DeepSeek => Some("https://api.deepseek.com/v1"),
            Self::OpenAI => Some("https://api.openai.com/v1"),
            Self::Moonshot => Some("https://api.moonshot.cn/v1"),
            Self::Custom => None,
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            Self::DashScope => Some("DASHSCOPE_API_KEY"),
            Self::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::Moonshot => Some("KIMI_API_KEY"),
            Self::Custom => None,
        }
    }

    /// Whether an API key is mandatory.
    pub fn requires_api_key(self) -> bool {
        self != Self::Custom
    }

    /// Model used for `role` when none is configured.
    pub fn default_model(self, role: ProviderRole) -> Option<&'static str> {
        match (self, role) {
            (Self::DashScope, ProviderRole::Chat) => Some("qwen-turbo"),
            (Self::DashScope, ProviderRole::Embedding) => Some("text-embedding-v2"),
            (Self::DeepSeek, ProviderRole::Chat) => Some("deepseek-chat"),
            (Self::OpenAI, ProviderRole::Chat) => Some("gpt-3.5-turbo"),
            (Self::OpenAI, ProviderRole::Embedding) => Some("text-embedding-3-small"),
            (Self::Moonshot, ProviderRole::Chat) => Some("moonshot-v1-8k"),
            _ => None,
        }
    }

    /// Guess the provider serving `model`. Unknown names map to OpenAI.
    pub fn infer_from_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        if model.starts_with("qwen") || model.starts_with("text-embedding-v") {
            Self::DashScope
        } else if model.starts_with("deepseek") {
            Self::DeepSeek
        } else if model.starts_with("moonshot") || model.starts_with("kimi") {
            Self::Moonshot
        } else {
            Self::OpenAI
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DashScope => "DashScope",
            Self::DeepSeek => "DeepSeek",
            Self::OpenAI => "OpenAI",
            Self::Moonshot => "Moonshot",
            Self::Custom => "Custom",
        })
    }
}

impl FromStr for ProviderKind {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dashscope" | "aliyun" | "qwen" => Ok(Self::DashScope),
            "deepseek" => Ok(Self::DeepSeek),
            "openai" => Ok(Self::OpenAI),
            "moonshot" | "kimi" => Ok(Self::Moonshot),
            "custom" => Ok(Self::Custom),
            other => Err(RagError::InvalidConfiguration(format!("unknown provider '{other}'"))),
        }
    }
}

/// Validated connection settings for one provider.
#[derive(Clone, PartialEq)]
pub struct ProviderSettings {
    /// Which backend this is.
    pub kind: ProviderKind,
    /// Bearer credential. May be empty only for [`ProviderKind::Custom`].
    pub api_key: String,
    /// Model name sent with every request.
    pub model: String,
    /// API root, e.g. `https://api.deepseek.com/v1`.
    pub base_url: String,
    /// Embedding dimensionality override (embedding role only).
    pub dimensions: Option<usize>,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("kind", &self.kind)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl ProviderSettings {
    /// Settings for `kind` in `role` with its default model and base URL.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if the key is required but
    /// empty, or the kind has no default model or base URL for `role`.
    pub fn new(kind: ProviderKind, role: ProviderRole, api_key: impl Into<String>) -> Result<Self> {
        let model = kind.default_model(role).ok_or_else(|| {
            RagError::InvalidConfiguration(format!(
                "{kind} has no default {role:?} model; set one explicitly"
            ))
        })?;
        let base_url = kind.default_base_url().unwrap_or_default();
        Self::from_parts(kind, api_key.into(), model.to_string(), base_url.to_string(), None)
    }

    /// Validate explicit settings.
    pub fn from_parts(
        kind: ProviderKind,
        api_key: String,
        model: String,
        base_url: String,
        dimensions: Option<usize>,
    ) -> Result<Self> {
        if kind.requires_api_key() && api_key.trim().is_empty() {
            let var = kind.api_key_env().unwrap_or("API key");
            return Err(RagError::InvalidConfiguration(format!(
                "missing credential for {kind}: set {var}"
            )));
        }
        if model.trim().is_empty() {
            return Err(RagError::InvalidConfiguration(format!("{kind} model name is empty")));
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(RagError::InvalidConfiguration(format!(
                "{kind} base URL must be an http(s) URL, got '{base_url}'"
            )));
        }
        if dimensions == Some(0) {
            return Err(RagError::InvalidConfiguration(
                "embedding dimensions must be greater than zero".into(),
            ));
        }
        Ok(Self {
            kind,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            dimensions,
        })
    }

    /// Override the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Read settings for `role` from variables starting with `prefix`.
    ///
    /// Keys: `{prefix}PROVIDER`, `{prefix}MODEL`, `{prefix}BASE_URL`,
    /// `{prefix}API_KEY`, `{prefix}DIMENSIONS`. When `{prefix}API_KEY` is unset
    /// the provider's own variable (e.g. `DASHSCOPE_API_KEY`) is used. When
    /// `{prefix}PROVIDER` is unset the kind is inferred from the model name,
    /// and defaults to DashScope when neither is set.
    pub fn from_lookup<F>(prefix: &str, role: ProviderRole, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{prefix}{name}")).filter(|v| !v.trim().is_empty());

        let model = var("MODEL");
        let kind = match (var("PROVIDER"), &model) {
            (Some(kind), _) => kind.parse()?,
            (None, Some(model)) => ProviderKind::infer_from_model(model),
            (None, None) => ProviderKind::DashScope,
        };

        let api_key = var("API_KEY")
            .or_else(|| kind.api_key_env().and_then(&lookup))
            .unwrap_or_default();

        let model = model
            .or_else(|| kind.default_model(role).map(str::to_string))
            .ok_or_else(|| {
                RagError::InvalidConfiguration(format!("{prefix}MODEL must be set for {kind}"))
            })?;

        let base_url = var("BASE_URL")
            .or_else(|| kind.default_base_url().map(str::to_string))
            .ok_or_else(|| {
                RagError::InvalidConfiguration(format!("{prefix}BASE_URL must be set for {kind}"))
            })?;

        let dimensions = var("DIMENSIONS")
            .map(|raw| {
                raw.trim().parse::<usize>().map_err(|_| {
                    RagError::InvalidConfiguration(format!(
                        "{prefix}DIMENSIONS is not a number: '{raw}'"
                    ))
                })
            })
            .transpose()?;

        Self::from_parts(kind, api_key, model, base_url, dimensions)
    }

    /// Embedding dimensionality: the override, or the default for known models.
    pub fn embedding_dimensions(&self) -> usize {
        self.dimensions.unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS)
    }

    /// Label used in logs and errors, e.g. `DeepSeek/deepseek-chat`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.kind, self.model)
    }
}
