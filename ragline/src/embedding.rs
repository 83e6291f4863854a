//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::Result;

/// A provider that generates fixed-dimension vector embeddings from text.
///
/// [`embed`](EmbeddingProvider::embed) is used at query time and
/// [`embed_batch`](EmbeddingProvider::embed_batch) during ingestion. The
/// default `embed_batch` calls `embed` sequentially; backends with a native
/// batch endpoint should override it.
///
/// Every returned vector must have exactly
/// [`dimensions`](EmbeddingProvider::dimensions) elements.
///
/// # Example
///
/// ```rust,ignore
/// use ragline::EmbeddingProvider;
///
/// let embedding = provider.embed("When was the Palace Museum founded?").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str {
        "embedding"
    }

    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs, in input order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;
}
