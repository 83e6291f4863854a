//! Error types for the `ragline` crate.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Errors that can occur in RAG operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// A configuration value is invalid or a required credential is missing.
    ///
    /// Raised at construction time, before any provider is contacted.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An embedding or language-model provider returned an error.
    #[error("Provider error ({provider}{}): {message}", status_suffix(.status))]
    Provider {
        /// The provider that produced the error.
        provider: String,
        /// HTTP status code, when the failure came from the API.
        status: Option<u16>,
        /// A description of the failure.
        message: String,
    },

    /// A provider call did not complete within the configured timeout.
    #[error("Provider timeout ({provider}): {operation} exceeded {timeout:?}")]
    ProviderTimeout {
        /// The provider that was called.
        provider: String,
        /// The operation that timed out (`embed`, `search`, `complete`).
        operation: &'static str,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The vector index could not be read, written, or is corrupted.
    ///
    /// An empty but reachable index is not an error.
    #[error("Index unavailable ({backend}): {message}")]
    IndexUnavailable {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// A vector does not match the dimension of the index.
    #[error("Dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension recorded by the index.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// A document loader failed to produce documents.
    #[error("Loader error ({source_name}): {message}")]
    Loader {
        /// The source being loaded (URL or path).
        source_name: String,
        /// A description of the failure.
        message: String,
    },
}

impl RagError {
    /// Build a [`RagError::Provider`] without an HTTP status.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), status: None, message: message.into() }
    }

    /// Build a [`RagError::Provider`] for a response that arrived with `status`
    /// but could not be used. A success status marks it as not retryable.
    pub fn malformed_response(
        provider: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider { provider: provider.into(), status: Some(status), message: message.into() }
    }

    /// Build a [`RagError::IndexUnavailable`].
    pub fn index_unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IndexUnavailable { backend: backend.into(), message: message.into() }
    }

    /// Whether the failure came from a provider timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ProviderTimeout { .. })
    }

    /// Whether resubmitting the same request may succeed.
    ///
    /// Transport failures, 429, 5xx, and timeouts are retryable; configuration,
    /// index, and dimension errors are not. Other statuses are never retried:
    /// client errors (4xx other than 429) and successful responses whose body
    /// was unusable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderTimeout { .. } => true,
            Self::Provider { status: Some(status), .. } => *status == 429 || *status >= 500,
            Self::Provider { status: None, .. } => true,
            _ => false,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(", status {s}")).unwrap_or_default()
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Run a provider call under `timeout`, mapping expiry to [`RagError::ProviderTimeout`].
pub(crate) async fn with_timeout<T, F>(
    provider: &str,
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(provider, operation, ?timeout, "provider call timed out");
            Err(RagError::ProviderTimeout { provider: provider.to_string(), operation, timeout })
        }
    }
}
