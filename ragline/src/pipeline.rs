//! RAG pipeline orchestrator.
//!
//! The [`RagPipeline`] coordinates the ingest-and-ask workflow by composing
//! an [`EmbeddingProvider`], a [`VectorStore`], a [`Chunker`], and a
//! [`LanguageModel`].
//!
//! # Example
//!
//! ```rust,ignore
//! use ragline::{InMemoryVectorStore, RagConfig, RagPipeline};
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(my_embedder))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .language_model(Arc::new(my_model))
//!     .build()?;
//!
//! pipeline.ingest(&documents).await?;
//! let answer = pipeline.ask("When was the Palace Museum founded?").await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::chunking::Chunker;
use crate::config::RagConfig;
use crate::document::{Answer, Chunk, Document, IngestResult, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result, with_timeout};
use crate::llm::LanguageModel;
use crate::retriever::Retriever;
use crate::synthesizer::{AnswerSynthesizer, PromptTemplate};
use crate::vectorstore::{IndexState, VectorStore};

/// Delay before the first retry of a failed embedding batch; doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Lifecycle state of a pipeline, derived from its vector store.
pub type PipelineState = IndexState;

/// The RAG pipeline orchestrator.
///
/// Ingestion runs chunk → embed → append → persist under an exclusive lock,
/// and is batch-atomic. Questions run embed → search → synthesize without any
/// retry. Construct one via [`RagPipeline::builder()`].
pub struct RagPipeline {
    config: RagConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    chunker: Arc<dyn Chunker>,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
    ingest_lock: Mutex<()>,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the embedding provider.
    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedding_provider
    }

    /// Return a reference to the vector store.
    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.vector_store
    }

    /// Return the prompt template used for answers.
    pub fn prompt_template(&self) -> &PromptTemplate {
        self.synthesizer.template()
    }

    /// Whether an index is present.
    pub async fn state(&self) -> PipelineState {
        self.vector_store.state().await
    }

    /// Ingest documents: chunk → embed → append → persist.
    ///
    /// The call is batch-atomic. If any embedding batch fails (after retries)
    /// nothing is written; if the append or the persist fails the in-memory
    /// index is rolled back to its previous length. Concurrent calls are
    /// serialized.
    ///
    /// Re-ingesting a document appends its chunks again; records are never
    /// deduplicated.
    ///
    /// # Errors
    ///
    /// - [`RagError::Provider`] or [`RagError::ProviderTimeout`] if an embedding
    ///   batch still fails after `ingest_retries` retries.
    /// - [`RagError::DimensionMismatch`] if the provider's vectors do not match
    ///   the index.
    /// - [`RagError::IndexUnavailable`] if the index cannot be written.
    pub async fn ingest(&self, documents: &[Document]) -> Result<IngestResult> {
        if documents.is_empty() {
            info!(chunks_indexed = 0, "no documents to ingest");
            return Ok(IngestResult::default());
        }

        let _writer = self.ingest_lock.lock().await;
        self.check_dimensions().await?;

        let mut chunks: Vec<Chunk> = documents.iter().flat_map(|d| self.chunker.chunk(d)).collect();
        if chunks.is_empty() {
            info!(documents = documents.len(), chunks_indexed = 0, "documents produced no chunks");
            return Ok(IngestResult { chunks_indexed: 0, documents: documents.len() });
        }

        let embeddings = self.embed_chunks(&chunks).await?;
        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            chunk.embedding = embedding;
        }

        let previous_len = self.vector_store.len().await?;
        self.vector_store
            .add(&chunks)
            .await
            .inspect_err(|e| error!(error = %e, "append failed during ingestion"))?;

        if let Err(e) = self.vector_store.persist().await {
            error!(error = %e, "persist failed, rolling back append");
            if let Err(rollback) = self.vector_store.truncate(previous_len).await {
                error!(error = %rollback, "rollback failed");
            }
            return Err(e);
        }

        let result = IngestResult { chunks_indexed: chunks.len(), documents: documents.len() };
        info!(
            documents = result.documents,
            chunks_indexed = result.chunks_indexed,
            total_records = previous_len + result.chunks_indexed,
            "ingestion completed"
        );
        Ok(result)
    }

    /// Retrieve the `top_k` chunks most relevant to `query`.
    ///
    /// # Errors
    ///
    /// [`RagError::DimensionMismatch`] before any provider call when the
    /// embedding provider does not match the loaded index; otherwise see
    /// [`Retriever::retrieve`].
    pub async fn retrieve(&self, query: &str) -> Result<Vec<SearchResult>> {
        self.check_dimensions().await?;
        self.retriever.retrieve(query, self.config.top_k).await
    }

    /// Answer `query` from the indexed documents.
    ///
    /// When nothing is retrieved (an empty or uninitialized index) the model
    /// is still called, with an empty context, and the returned [`Answer`] has
    /// no sources. Nothing is retried.
    ///
    /// # Errors
    ///
    /// Any error from retrieval or from the language model, unchanged.
    pub async fn ask(&self, query: &str) -> Result<Answer> {
        let context = self.retrieve(query).await?;
        if context.is_empty() {
            warn!("no context retrieved, answering without grounding");
        }
        self.synthesizer.synthesize(query, &context).await
    }

    /// The index dimension is only known once the store is read, so every
    /// ingest and retrieval checks it before contacting the provider.
    async fn check_dimensions(&self) -> Result<()> {
        let expected = self.vector_store.dimensions().await;
        let actual = self.embedding_provider.dimensions();
        match expected {
            Some(expected) if expected != actual => {
                error!(expected, actual, "embedding provider does not match the index");
                Err(RagError::DimensionMismatch { expected, actual })
            }
            _ => Ok(()),
        }
    }

    /// Embed chunk texts in batches with bounded concurrency, preserving chunk order.
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let batches: Vec<Vec<&str>> = chunks
            .chunks(self.config.embed_batch_size)
            .map(|batch| batch.iter().map(|c| c.text.as_str()).collect())
            .collect();
        info!(
            chunks = chunks.len(),
            batches = batches.len(),
            concurrency = self.config.embed_concurrency,
            "embedding chunks"
        );

        let mut slots: Vec<Option<Vec<Vec<f32>>>> = vec![None; batches.len()];
        let mut in_flight = futures::stream::iter(batches.iter().enumerate())
            .map(|(index, texts)| async move { (index, self.embed_with_retry(index, texts).await) })
            .buffer_unordered(self.config.embed_concurrency);

        let dimensions = self.embedding_provider.dimensions();
        while let Some((index, result)) = in_flight.next().await {
            let vectors = result?;
            if vectors.len() != batches[index].len() {
                return Err(RagError::provider(
                    self.embedding_provider.name(),
                    format!(
                        "returned {} embeddings for {} inputs",
                        vectors.len(),
                        batches[index].len()
                    ),
                ));
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
                return Err(RagError::DimensionMismatch { expected: dimensions, actual: bad.len() });
            }
            slots[index] = Some(vectors);
        }

        Ok(slots.into_iter().flatten().flatten().collect())
    }

    async fn embed_with_retry(&self, batch: usize, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let provider = self.embedding_provider.name();
        let timeout = self.config.request_timeout;
        let mut attempt = 0;
        loop {
            let result =
                with_timeout(provider, "embed", timeout, self.embedding_provider.embed_batch(texts))
                    .await;
            match result {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retryable() && attempt < self.config.ingest_retries => {
                    let delay = RETRY_BASE_DELAY.saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    warn!(batch, attempt, error = %e, ?delay, "embedding batch failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(batch, attempts = attempt + 1, error = %e, "embedding batch failed");
                    return Err(e);
                }
            }
        }
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// `config`, `embedding_provider`, `vector_store`, and `language_model` are
/// required. The chunker and prompt template default to the ones described by
/// the config. [`build()`](RagPipelineBuilder::build) validates everything
/// without contacting any provider. The provider's dimension is compared with
/// the index at the start of every ingest and retrieval.
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = RagPipeline::builder()
///     .config(RagConfig::default())
///     .embedding_provider(Arc::new(embedder))
///     .vector_store(Arc::new(store))
///     .language_model(Arc::new(model))
///     .chunker(Arc::new(chunker))  // optional
///     .build()?;
/// ```
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    language_model: Option<Arc<dyn LanguageModel>>,
    chunker: Option<Arc<dyn Chunker>>,
    prompt_template: Option<PromptTemplate>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector store backend.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Set the language model used for answers.
    pub fn language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.language_model = Some(model);
        self
    }

    /// Override the chunker built from the config.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Override the prompt template from the config.
    pub fn prompt_template(mut self, template: PromptTemplate) -> Self {
        self.prompt_template = Some(template);
        self
    }

    /// Build the [`RagPipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if a required field is
    /// missing, the config is inconsistent, or the template lacks a placeholder.
    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.ok_or_else(|| missing("config"))?;
        config.validate()?;

        let embedding_provider =
            self.embedding_provider.ok_or_else(|| missing("embedding_provider"))?;
        let vector_store = self.vector_store.ok_or_else(|| missing("vector_store"))?;
        let language_model = self.language_model.ok_or_else(|| missing("language_model"))?;

        if embedding_provider.dimensions() == 0 {
            return Err(RagError::InvalidConfiguration(format!(
                "embedding provider '{}' reports zero dimensions",
                embedding_provider.name()
            )));
        }

        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => config.chunker()?,
        };
        let template = match self.prompt_template {
            Some(template) => template,
            None => PromptTemplate::new(config.prompt_template.clone())?,
        };

        let retriever = Retriever::new(
            Arc::clone(&embedding_provider),
            Arc::clone(&vector_store),
            config.request_timeout,
        )
        .with_threshold(config.similarity_threshold);
        let synthesizer = AnswerSynthesizer::new(language_model, template, config.request_timeout);

        Ok(RagPipeline {
            config,
            embedding_provider,
            vector_store,
            chunker,
            retriever,
            synthesizer,
            ingest_lock: Mutex::new(()),
        })
    }
}

fn missing(field: &str) -> RagError {
    RagError::InvalidConfiguration(format!("{field} is required"))
}
