//! Query-time retrieval: embed the question, search the index.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::document::SearchResult;
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, with_timeout};
use crate::vectorstore::VectorStore;

/// Embeds a query and returns the most similar stored chunks.
///
/// Both the embedding call and the search are bounded by the request timeout.
/// Failures are returned immediately; retrieval never retries.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    timeout: Duration,
    threshold: Option<f32>,
}

impl Retriever {
    /// Create a retriever over `store`, embedding queries with `embedder`.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        timeout: Duration,
    ) -> Self {
        Self { embedder, store, timeout, threshold: None }
    }

    /// Drop results scoring below `threshold`.
    pub fn with_threshold(mut self, threshold: Option<f32>) -> Self {
        self.threshold = threshold;
        self
    }

    /// Return up to `top_k` chunks ordered by descending similarity to `query`.
    ///
    /// An empty index yields an empty `Vec`, not an error.
    ///
    /// # Errors
    ///
    /// - [`RagError::Provider`](crate::RagError::Provider) or
    ///   [`RagError::ProviderTimeout`](crate::RagError::ProviderTimeout) from the
    ///   embedding call or the search.
    /// - [`RagError::DimensionMismatch`](crate::RagError::DimensionMismatch) when
    ///   the query embedding does not match the index.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let embedding =
            with_timeout(self.embedder.name(), "embed", self.timeout, self.embedder.embed(query))
                .await?;
        debug!(dimensions = embedding.len(), "query embedded");

        let results = with_timeout(
            self.store.backend(),
            "search",
            self.timeout,
            self.store.search(&embedding, top_k),
        )
        .await?;

        let results: Vec<SearchResult> = match self.threshold {
            Some(threshold) => results.into_iter().filter(|r| r.score >= threshold).collect(),
            None => results,
        };

        info!(top_k, result_count = results.len(), "retrieval completed");
        Ok(results)
    }
}
