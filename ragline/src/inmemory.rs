//! In-memory vector store using exact cosine similarity.
//!
//! This module provides [`InMemoryVectorStore`], a vector store backed by a
//! `Vec` protected by a `tokio::sync::RwLock`, and the [`RecordSet`] it shares
//! with [`PersistentVectorStore`](crate::persistent::PersistentVectorStore).

use std::cmp::Ordering;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::{IndexState, VectorStore};

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Append-only list of embedded chunks with a fixed dimension.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RecordSet {
    pub(crate) dimensions: Option<usize>,
    pub(crate) records: Vec<Chunk>,
}

impl RecordSet {
    /// Validate every chunk before touching the set, then append all of them.
    pub(crate) fn append(&mut self, chunks: &[Chunk]) -> Result<()> {
        let Some(first) = chunks.first() else {
            return Ok(());
        };
        let expected = self.dimensions.unwrap_or(first.embedding.len());
        if expected == 0 {
            return Err(RagError::DimensionMismatch { expected: 1, actual: 0 });
        }
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != expected) {
            return Err(RagError::DimensionMismatch { expected, actual: bad.embedding.len() });
        }

        self.records.extend_from_slice(chunks);
        self.dimensions = Some(expected);
        Ok(())
    }

    /// Exact scan; stable sort keeps insertion order among equal scores.
    pub(crate) fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        let Some(expected) = self.dimensions else {
            return Ok(Vec::new());
        };
        if embedding.len() != expected {
            return Err(RagError::DimensionMismatch { expected, actual: embedding.len() });
        }

        let mut scored: Vec<(usize, f32)> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, chunk)| (i, cosine_similarity(&chunk.embedding, embedding)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchResult { chunk: self.records[i].clone(), score })
            .collect())
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
        if self.records.is_empty() {
            self.dimensions = None;
        }
    }
}

/// An in-memory vector store using cosine similarity for search.
///
/// Nothing is persisted; [`persist`](VectorStore::persist) is a no-op. The
/// store reports [`IndexState::Ready`] once it holds at least one record.
///
/// # Example
///
/// ```rust,ignore
/// use ragline::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.add(&chunks).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    inner: RwLock<RecordSet>,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn backend(&self) -> &str {
        "InMemory"
    }

    async fn add(&self, chunks: &[Chunk]) -> Result<()> {
        self.inner.write().await.append(chunks)
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        self.inner.read().await.search(embedding, top_k)
    }

    async fn persist(&self) -> Result<()> {
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.inner.read().await.records.len())
    }

    async fn truncate(&self, len: usize) -> Result<()> {
        self.inner.write().await.truncate(len);
        Ok(())
    }

    async fn dimensions(&self) -> Option<usize> {
        self.inner.read().await.dimensions
    }

    async fn state(&self) -> IndexState {
        if self.inner.read().await.records.is_empty() {
            IndexState::Uninitialized
        } else {
            IndexState::Ready
        }
    }
}
