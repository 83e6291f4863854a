//! Vector store trait for storing and searching vector embeddings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::{Chunk, SearchResult};
use crate::error::Result;

/// Whether an index exists for the store's location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    /// No index present; questions get ungrounded answers until something is ingested.
    Uninitialized,
    /// An index is present.
    Ready,
}

/// A storage backend for chunk embeddings with similarity search.
///
/// Records are append-only: [`add`](VectorStore::add) never merges or replaces
/// existing chunks, so ingesting the same document twice stores it twice.
/// The only way to remove records is [`truncate`](VectorStore::truncate),
/// which rolls back a failed batch.
///
/// # Example
///
/// ```rust,ignore
/// use ragline::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.add(&chunks).await?;
/// let results = store.search(&query_embedding, 5).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name used in logs and errors.
    fn backend(&self) -> &str;

    /// Append chunks. Every chunk must have an embedding of the index dimension.
    ///
    /// The append is atomic: on error no chunk from `chunks` is stored.
    async fn add(&self, chunks: &[Chunk]) -> Result<()>;

    /// Return the `top_k` chunks most similar to `embedding`.
    ///
    /// Results are ordered by descending score; ties keep insertion order.
    /// An empty index yields an empty `Vec`.
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>>;

    /// Write the current records to durable storage. No-op for volatile stores.
    async fn persist(&self) -> Result<()>;

    /// Number of stored records.
    async fn len(&self) -> Result<usize>;

    /// Whether the store holds no records.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Drop every record after the first `len`, in memory only.
    async fn truncate(&self, len: usize) -> Result<()>;

    /// Dimension fixed by the stored records, if any.
    async fn dimensions(&self) -> Option<usize>;

    /// Whether an index exists.
    async fn state(&self) -> IndexState;
}
