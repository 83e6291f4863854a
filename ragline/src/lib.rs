//! # ragline
//!
//! Retrieval-augmented question answering over your own documents.
//!
//! A [`RagPipeline`] splits [`Document`]s into overlapping [`Chunk`]s, embeds
//! them with an [`EmbeddingProvider`], and appends them to a [`VectorStore`].
//! Questions are embedded, matched against the index by cosine similarity, and
//! answered by a [`LanguageModel`] prompted with the retrieved context.
//!
//! ## Components
//!
//! - [`FixedSizeChunker`] / [`RecursiveChunker`] split text losslessly with overlap
//! - [`OpenAIEmbeddingProvider`] and [`ChatCompletionsModel`] talk to any
//!   OpenAI-compatible endpoint ([`ProviderKind`] picks DashScope, DeepSeek,
//!   OpenAI, Moonshot, or a custom base URL)
//! - [`InMemoryVectorStore`] and [`PersistentVectorStore`] hold the index
//! - [`WebPageLoader`] and [`FileLoader`] produce documents
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ragline::*;
//!
//! let config = RagConfig::from_env()?;
//! let embedder = OpenAIEmbeddingProvider::new(ProviderSettings::from_lookup(
//!     "RAG_EMBEDDING_",
//!     ProviderRole::Embedding,
//!     |k| std::env::var(k).ok(),
//! )?);
//! let model = ChatCompletionsModel::new(ProviderSettings::from_lookup(
//!     "RAG_LLM_",
//!     ProviderRole::Chat,
//!     |k| std::env::var(k).ok(),
//! )?);
//!
//! let pipeline = RagPipeline::builder()
//!     .vector_store(Arc::new(PersistentVectorStore::open(&config.persist_directory)?))
//!     .config(config)
//!     .embedding_provider(Arc::new(embedder))
//!     .language_model(Arc::new(model))
//!     .build()?;
//!
//! pipeline.ingest(&WebPageLoader::new(url).load().await?).await?;
//! let answer = pipeline.ask("When was the Palace Museum founded?").await?;
//! println!("{}", answer.text);
//! ```

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod inmemory;
pub mod llm;
pub mod loader;
pub mod openai;
pub mod persistent;
pub mod pipeline;
pub mod providers;
pub mod retriever;
pub mod synthesizer;
pub mod vectorstore;

pub use chunking::{ChunkStrategy, ChunkUnit, Chunker, FixedSizeChunker, RecursiveChunker, split};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{Answer, Chunk, Document, IngestResult, SearchResult};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use inmemory::{InMemoryVectorStore, cosine_similarity};
pub use llm::{ChatCompletionsModel, LanguageModel};
pub use loader::{DocumentLoader, FileLoader, WebPageLoader};
pub use openai::OpenAIEmbeddingProvider;
pub use persistent::{Manifest, PersistentVectorStore};
pub use pipeline::{PipelineState, RagPipeline, RagPipelineBuilder};
pub use providers::{ProviderKind, ProviderRole, ProviderSettings};
pub use retriever::Retriever;
pub use synthesizer::{AnswerSynthesizer, DEFAULT_PROMPT_TEMPLATE, PromptTemplate};
pub use vectorstore::{IndexState, VectorStore};
