//! Configuration for the RAG pipeline.
//!
//! All settings are flat key → value pairs. [`RagConfig::from_env`] reads them
//! from `RAG_*` environment variables; [`RagConfig::from_lookup`] does the same
//! against any lookup function, which keeps parsing testable.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunking::{
    ChunkStrategy, ChunkUnit, Chunker, FixedSizeChunker, RecursiveChunker, validate_sizes,
};
use crate::error::{RagError, Result};
use crate::synthesizer::{DEFAULT_PROMPT_TEMPLATE, PromptTemplate};

/// Configuration parameters for the RAG pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size, in `chunk_unit`s.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks, in `chunk_unit`s.
    pub chunk_overlap: usize,
    /// Unit used to measure chunk sizes.
    pub chunk_unit: ChunkUnit,
    /// Chunker built by the pipeline when none is supplied.
    pub chunk_strategy: ChunkStrategy,
    /// Number of chunks retrieved per question.
    pub top_k: usize,
    /// Minimum similarity score; results below it are dropped. `None` keeps all.
    pub similarity_threshold: Option<f32>,
    /// Timeout applied to every embedding, search, and completion call.
    pub request_timeout: Duration,
    /// Number of chunk texts sent per embedding request.
    pub embed_batch_size: usize,
    /// Maximum number of embedding requests in flight during ingestion.
    pub embed_concurrency: usize,
    /// Retries per embedding batch during ingestion. Never applied to questions.
    pub ingest_retries: u32,
    /// Directory holding the persisted vector index.
    pub persist_directory: PathBuf,
    /// Prompt template with `{context}` and `{question}` placeholders.
    pub prompt_template: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            chunk_unit: ChunkUnit::Characters,
            chunk_strategy: ChunkStrategy::Fixed,
            top_k: 5,
            similarity_threshold: None,
            request_timeout: Duration::from_secs(60),
            embed_batch_size: 16,
            embed_concurrency: 4,
            ingest_retries: 2,
            persist_directory: PathBuf::from("./chroma_db"),
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Read the configuration from `RAG_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if a variable cannot be parsed
    /// or the resulting configuration is inconsistent.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name to its value.
    ///
    /// Recognised keys: `RAG_CHUNK_SIZE`, `RAG_CHUNK_OVERLAP`, `RAG_CHUNK_UNIT`
    /// (`characters` | `tokens`), `RAG_CHUNK_STRATEGY` (`fixed` | `recursive`),
    /// `RAG_TOP_K`, `RAG_SIMILARITY_THRESHOLD`, `RAG_TIMEOUT_SECS`,
    /// `RAG_EMBED_BATCH_SIZE`, `RAG_EMBED_CONCURRENCY`, `RAG_INGEST_RETRIES`,
    /// `RAG_PERSIST_DIR`, `RAG_PROMPT_TEMPLATE`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();
        if let Some(v) = parse_var(&lookup, "RAG_CHUNK_SIZE")? {
            builder = builder.chunk_size(v);
        }
        if let Some(v) = parse_var(&lookup, "RAG_CHUNK_OVERLAP")? {
            builder = builder.chunk_overlap(v);
        }
        if let Some(v) = lookup("RAG_CHUNK_UNIT") {
            builder = builder.chunk_unit(match v.trim().to_ascii_lowercase().as_str() {
                "characters" | "chars" => ChunkUnit::Characters,
                "tokens" | "words" => ChunkUnit::Tokens,
                other => return Err(invalid_var("RAG_CHUNK_UNIT", other)),
            });
        }
        if let Some(v) = lookup("RAG_CHUNK_STRATEGY") {
            builder = builder.chunk_strategy(match v.trim().to_ascii_lowercase().as_str() {
                "fixed" => ChunkStrategy::Fixed,
                "recursive" => ChunkStrategy::Recursive,
                other => return Err(invalid_var("RAG_CHUNK_STRATEGY", other)),
            });
        }
        if let Some(v) = parse_var(&lookup, "RAG_TOP_K")? {
            builder = builder.top_k(v);
        }
        if let Some(v) = parse_var(&lookup, "RAG_SIMILARITY_THRESHOLD")? {
            builder = builder.similarity_threshold(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "RAG_TIMEOUT_SECS")? {
            builder = builder.request_timeout(Duration::from_secs(v));
        }
        if let Some(v) = parse_var(&lookup, "RAG_EMBED_BATCH_SIZE")? {
            builder = builder.embed_batch_size(v);
        }
        if let Some(v) = parse_var(&lookup, "RAG_EMBED_CONCURRENCY")? {
            builder = builder.embed_concurrency(v);
        }
        if let Some(v) = parse_var(&lookup, "RAG_INGEST_RETRIES")? {
            builder = builder.ingest_retries(v);
        }
        if let Some(v) = lookup("RAG_PERSIST_DIR") {
            builder = builder.persist_directory(v);
        }
        if let Some(v) = lookup("RAG_PROMPT_TEMPLATE") {
            builder = builder.prompt_template(v);
        }
        builder.build()
    }

    /// Build the chunker described by `chunk_strategy`, `chunk_size`, and `chunk_overlap`.
    pub fn chunker(&self) -> Result<Arc<dyn Chunker>> {
        Ok(match self.chunk_strategy {
            ChunkStrategy::Fixed => Arc::new(
                FixedSizeChunker::new(self.chunk_size, self.chunk_overlap)?
                    .with_unit(self.chunk_unit),
            ),
            ChunkStrategy::Recursive => {
                if self.chunk_unit != ChunkUnit::Characters {
                    return Err(RagError::InvalidConfiguration(
                        "the recursive chunker measures sizes in characters".to_string(),
                    ));
                }
                Arc::new(RecursiveChunker::new(self.chunk_size, self.chunk_overlap)?)
            }
        })
    }

    /// Check that the parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k`, `embed_batch_size`, or `embed_concurrency` is zero
    /// - `request_timeout` is zero
    /// - `prompt_template` lacks a `{context}` or `{question}` placeholder
    pub fn validate(&self) -> Result<()> {
        validate_sizes(self.chunk_size, self.chunk_overlap)?;
        if self.top_k == 0 {
            return Err(RagError::InvalidConfiguration("top_k must be greater than zero".into()));
        }
        if self.embed_batch_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "embed_batch_size must be greater than zero".into(),
            ));
        }
        if self.embed_concurrency == 0 {
            return Err(RagError::InvalidConfiguration(
                "embed_concurrency must be greater than zero".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(RagError::InvalidConfiguration(
                "request_timeout must be greater than zero".into(),
            ));
        }
        PromptTemplate::new(&self.prompt_template)?;
        Ok(())
    }
}

fn invalid_var(key: &str, value: &str) -> RagError {
    RagError::InvalidConfiguration(format!("{key} has an invalid value: '{value}'"))
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| invalid_var(key, &raw)),
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the unit chunk sizes are measured in.
    pub fn chunk_unit(mut self, unit: ChunkUnit) -> Self {
        self.config.chunk_unit = unit;
        self
    }

    /// Set the chunking strategy.
    pub fn chunk_strategy(mut self, strategy: ChunkStrategy) -> Self {
        self.config.chunk_strategy = strategy;
        self
    }

    /// Set the number of chunks retrieved per question.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = Some(threshold);
        self
    }

    /// Set the timeout applied to each provider call.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the number of texts per embedding request.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Set the maximum number of concurrent embedding requests.
    pub fn embed_concurrency(mut self, concurrency: usize) -> Self {
        self.config.embed_concurrency = concurrency;
        self
    }

    /// Set the number of retries per embedding batch during ingestion.
    pub fn ingest_retries(mut self, retries: u32) -> Self {
        self.config.ingest_retries = retries;
        self
    }

    /// Set the directory holding the persisted index.
    pub fn persist_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.persist_directory = dir.into();
        self
    }

    /// Set the prompt template.
    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.config.prompt_template = template.into();
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
