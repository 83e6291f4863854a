//! Data types for documents, chunks, and search results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Metadata key holding a chunk's position within its document.
pub const CHUNK_INDEX_KEY: &str = "chunk_index";

/// Metadata key holding the character offset of a chunk's first character.
pub const OFFSET_KEY: &str = "offset";

/// A source document containing text content and metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document.
    pub id: String,
    /// The text content of the document.
    pub text: String,
    /// Key-value metadata associated with the document (title, source, ...).
    pub metadata: HashMap<String, String>,
    /// Optional URI pointing to the original source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
}

impl Document {
    /// Create a document with empty metadata.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into(), metadata: HashMap::new(), source_uri: None }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the source URI.
    pub fn with_source_uri(mut self, uri: impl Into<String>) -> Self {
        self.source_uri = Some(uri.into());
        self
    }
}

/// A segment of a [`Document`] with its vector embedding.
///
/// Once stored in a vector index a chunk is never mutated; re-ingesting the
/// same document appends a second copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier for the chunk, `{document_id}_{chunk_index}`.
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// The vector embedding for this chunk's text. Empty until the pipeline embeds it.
    pub embedding: Vec<f32>,
    /// Metadata inherited from the parent document plus `chunk_index` and `offset`.
    pub metadata: HashMap<String, String>,
    /// The ID of the parent [`Document`].
    pub document_id: String,
}

impl Chunk {
    /// Position of this chunk within its document, if recorded.
    pub fn chunk_index(&self) -> Option<usize> {
        self.metadata.get(CHUNK_INDEX_KEY).and_then(|v| v.parse().ok())
    }

    /// Character offset of this chunk within its document, if recorded.
    pub fn offset(&self) -> Option<usize> {
        self.metadata.get(OFFSET_KEY).and_then(|v| v.parse().ok())
    }
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The cosine similarity score (higher is more relevant).
    pub score: f32,
}

/// Outcome of an ingestion call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestResult {
    /// Number of chunks appended to the index.
    pub chunks_indexed: usize,
    /// Number of documents that were chunked.
    pub documents: usize,
}

/// A synthesized answer together with the context it was grounded on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    /// The language model output, verbatim.
    pub text: String,
    /// The retrieved context, in ranking order.
    pub sources: Vec<SearchResult>,
}

impl Answer {
    /// Whether any retrieved context was supplied to the model.
    pub fn is_grounded(&self) -> bool {
        !self.sources.is_empty()
    }
}
