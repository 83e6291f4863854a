//! End-to-end pipeline tests with stub providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ragline::chunking::ChunkUnit;
use ragline::config::RagConfig;
use ragline::document::{Chunk, Document, SearchResult};
use ragline::embedding::EmbeddingProvider;
use ragline::error::{RagError, Result};
use ragline::inmemory::InMemoryVectorStore;
use ragline::llm::LanguageModel;
use ragline::persistent::PersistentVectorStore;
use ragline::pipeline::{PipelineState, RagPipeline};
use ragline::synthesizer::PromptTemplate;
use ragline::vectorstore::{IndexState, VectorStore};

// ── Stub providers ─────────────────────────────────────────────────

/// Embeds every text as the same vector, so all scores tie.
struct ConstantEmbedder {
    dims: usize,
    calls: AtomicUsize,
}

impl ConstantEmbedder {
    fn new(dims: usize) -> Arc<Self> {
        Arc::new(Self { dims, calls: AtomicUsize::new(0) })
    }
}

#[async_trait]
impl EmbeddingProvider for ConstantEmbedder {
    fn name(&self) -> &str {
        "constant"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![1.0; self.dims])
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Letter histogram embedding; batches sleep so later batches can finish first.
struct LetterEmbedder {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    batches: AtomicUsize,
}

impl LetterEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
        })
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; 27];
        v[26] = 1.0;
        for c in text.chars().filter(char::is_ascii_lowercase) {
            v[(c as u8 - b'a') as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for LetterEmbedder {
    fn name(&self) -> &str {
        "letters"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::vector(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let batch = self.batches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        // Earlier batches take longer, so completion order is reversed.
        tokio::time::sleep(Duration::from_millis(100 - 10 * batch.min(9) as u64)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        27
    }
}

/// Fails the first `failures` batch calls with the given HTTP status.
struct FlakyEmbedder {
    failures: AtomicUsize,
    status: u16,
    calls: AtomicUsize,
}

impl FlakyEmbedder {
    fn new(failures: usize, status: u16) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(failures),
            status,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RagError::Provider {
                provider: "flaky".to_string(),
                status: Some(self.status),
                message: "stub failure".to_string(),
            });
        }
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }

    fn dimensions(&self) -> usize {
        2
    }
}

/// Records every prompt and answers with a fixed string.
#[derive(Default)]
struct RecordingModel {
    prompts: Mutex<Vec<String>>,
}

impl RecordingModel {
    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for RecordingModel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("stub answer".to_string())
    }
}

/// Never answers.
struct HangingModel;

#[async_trait]
impl LanguageModel for HangingModel {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("too late".to_string())
    }
}

/// Delegates to an in-memory store but fails every persist.
#[derive(Default)]
struct UnwritableStore {
    inner: InMemoryVectorStore,
}

#[async_trait]
impl VectorStore for UnwritableStore {
    fn backend(&self) -> &str {
        "unwritable"
    }

    async fn add(&self, chunks: &[Chunk]) -> Result<()> {
        self.inner.add(chunks).await
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        self.inner.search(embedding, top_k).await
    }

    async fn persist(&self) -> Result<()> {
        Err(RagError::index_unavailable("unwritable", "disk full"))
    }

    async fn len(&self) -> Result<usize> {
        self.inner.len().await
    }

    async fn truncate(&self, len: usize) -> Result<()> {
        self.inner.truncate(len).await
    }

    async fn dimensions(&self) -> Option<usize> {
        self.inner.dimensions().await
    }

    async fn state(&self) -> IndexState {
        self.inner.state().await
    }
}

fn stub_model() -> Arc<dyn LanguageModel> {
    Arc::new(RecordingModel::default())
}

fn token_config(size: usize, overlap: usize) -> RagConfig {
    RagConfig::builder()
        .chunk_size(size)
        .chunk_overlap(overlap)
        .chunk_unit(ChunkUnit::Tokens)
        .build()
        .unwrap()
}

fn pipeline(
    config: RagConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    model: Arc<dyn LanguageModel>,
) -> RagPipeline {
    RagPipeline::builder()
        .config(config)
        .embedding_provider(embedder)
        .vector_store(store)
        .language_model(model)
        .build()
        .unwrap()
}

// ── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn five_tokens_are_indexed_and_answered_in_order() {
    let model = Arc::new(RecordingModel::default());
    let pipeline = RagPipeline::builder()
        .config(token_config(2, 1))
        .embedding_provider(ConstantEmbedder::new(3))
        .vector_store(Arc::new(InMemoryVectorStore::new()))
        .language_model(model.clone())
        .prompt_template(PromptTemplate::new("CONTEXT:\n{context}\nQ: {question}").unwrap())
        .build()
        .unwrap();

    let result = pipeline.ingest(&[Document::new("doc", "A B C D E")]).await.unwrap();
    assert_eq!(result.chunks_indexed, 4);
    assert_eq!(result.documents, 1);

    let answer = pipeline.ask("what is A?").await.unwrap();

    assert_eq!(answer.text, "stub answer");
    let sources: Vec<&str> = answer.sources.iter().map(|s| s.chunk.text.as_str()).collect();
    assert_eq!(sources, ["A B", "B C", "C D", "D E"]);
    assert_eq!(model.prompts(), ["CONTEXT:\nA B\n\nB C\n\nC D\n\nD E\nQ: what is A?"]);
}

#[tokio::test]
async fn overlap_not_below_size_fails_before_any_provider_call() {
    let embedder = ConstantEmbedder::new(3);
    let model = Arc::new(RecordingModel::default());
    let config = RagConfig { chunk_size: 3, chunk_overlap: 5, ..RagConfig::default() };

    let err = RagPipeline::builder()
        .config(config)
        .embedding_provider(embedder.clone())
        .vector_store(Arc::new(InMemoryVectorStore::new()))
        .language_model(model.clone())
        .build()
        .err()
        .unwrap();

    assert!(matches!(err, RagError::InvalidConfiguration(_)), "{err}");
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    assert!(model.prompts().is_empty());
}

#[tokio::test]
async fn template_without_question_placeholder_is_rejected() {
    let config =
        RagConfig { prompt_template: "only {context}".to_string(), ..RagConfig::default() };

    let err = RagPipeline::builder()
        .config(config)
        .embedding_provider(ConstantEmbedder::new(3))
        .vector_store(Arc::new(InMemoryVectorStore::new()))
        .language_model(Arc::new(RecordingModel::default()))
        .build()
        .err()
        .unwrap();

    assert!(matches!(err, RagError::InvalidConfiguration(_)));
}

#[tokio::test(start_paused = true)]
async fn hanging_model_times_out_without_partial_answer() {
    let config = RagConfig::builder().request_timeout(Duration::from_secs(5)).build().unwrap();
    let pipeline = pipeline(
        config,
        ConstantEmbedder::new(3),
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(HangingModel),
    );
    pipeline.ingest(&[Document::new("doc", "Palace Museum")]).await.unwrap();

    let err = pipeline.ask("When?").await.unwrap_err();

    assert!(
        matches!(err, RagError::ProviderTimeout { operation: "complete", .. }),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn empty_ingest_leaves_index_unchanged() {
    let embedder = ConstantEmbedder::new(3);
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline =
        pipeline(token_config(2, 1), embedder.clone(), store.clone(), stub_model());
    pipeline.ingest(&[Document::new("doc", "A B C")]).await.unwrap();
    let calls = embedder.calls.load(Ordering::SeqCst);

    let result = pipeline.ingest(&[]).await.unwrap();

    assert_eq!(result.chunks_indexed, 0);
    assert_eq!(store.len().await.unwrap(), 2);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn reingesting_a_document_duplicates_its_chunks() {
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = pipeline(
        token_config(2, 1),
        ConstantEmbedder::new(3),
        store.clone(),
        Arc::new(RecordingModel::default()),
    );
    let doc = Document::new("doc", "A B C D E");

    pipeline.ingest(std::slice::from_ref(&doc)).await.unwrap();
    pipeline.ingest(std::slice::from_ref(&doc)).await.unwrap();

    assert_eq!(store.len().await.unwrap(), 8);
}

#[tokio::test]
async fn empty_retrieval_still_asks_the_model() {
    let model = Arc::new(RecordingModel::default());
    let pipeline = pipeline(
        RagConfig::default(),
        ConstantEmbedder::new(3),
        Arc::new(InMemoryVectorStore::new()),
        model.clone(),
    );
    assert_eq!(pipeline.state().await, PipelineState::Uninitialized);

    let answer = pipeline.ask("故宫博物院是在哪一年成立的？").await.unwrap();

    assert_eq!(answer.text, "stub answer");
    assert!(!answer.is_grounded());
    let prompts = model.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("故宫博物院是在哪一年成立的？"));
}

#[tokio::test]
async fn rejected_embedding_writes_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("index");
    let store = Arc::new(PersistentVectorStore::open(&dir).unwrap());
    let embedder = FlakyEmbedder::new(1, 400);
    let pipeline =
        pipeline(token_config(2, 1), embedder.clone(), store.clone(), stub_model());

    let err = pipeline.ingest(&[Document::new("doc", "A B C D E")]).await.unwrap_err();

    assert!(matches!(err, RagError::Provider { status: Some(400), .. }));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1, "client errors are not retried");
    assert_eq!(store.len().await.unwrap(), 0);
    assert_eq!(pipeline.state().await, PipelineState::Uninitialized);
    assert!(!dir.exists());
}

#[tokio::test(start_paused = true)]
async fn transient_embedding_failures_are_retried() {
    let store = Arc::new(InMemoryVectorStore::new());
    let embedder = FlakyEmbedder::new(2, 503);
    let config = RagConfig::builder().ingest_retries(2).build().unwrap();
    let pipeline = pipeline(config, embedder.clone(), store.clone(), stub_model());

    let result = pipeline.ingest(&[Document::new("doc", "Forbidden City")]).await.unwrap();

    assert_eq!(result.chunks_indexed, 1);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.len().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn retries_are_bounded() {
    let store = Arc::new(InMemoryVectorStore::new());
    let embedder = FlakyEmbedder::new(10, 500);
    let config = RagConfig::builder().ingest_retries(1).build().unwrap();
    let pipeline = pipeline(config, embedder.clone(), store.clone(), stub_model());

    let err = pipeline.ingest(&[Document::new("doc", "Forbidden City")]).await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    assert!(store.is_empty().await.unwrap());
}

#[tokio::test]
async fn failed_persist_rolls_back_the_append() {
    let store = Arc::new(UnwritableStore::default());
    store
        .inner
        .add(&[Chunk {
            id: "existing_0".to_string(),
            text: "existing".to_string(),
            embedding: vec![1.0, 1.0, 1.0],
            metadata: HashMap::new(),
            document_id: "existing".to_string(),
        }])
        .await
        .unwrap();
    let pipeline = pipeline(
        token_config(2, 1),
        ConstantEmbedder::new(3),
        store.clone(),
        Arc::new(RecordingModel::default()),
    );

    let err = pipeline.ingest(&[Document::new("doc", "A B C D E")]).await.unwrap_err();

    assert!(matches!(err, RagError::IndexUnavailable { .. }));
    assert_eq!(store.len().await.unwrap(), 1);
}

#[tokio::test]
async fn provider_dimension_must_match_the_index() {
    let store = Arc::new(InMemoryVectorStore::new());
    store
        .add(&[Chunk {
            id: "x_0".to_string(),
            text: "x".to_string(),
            embedding: vec![1.0, 0.0],
            metadata: HashMap::new(),
            document_id: "x".to_string(),
        }])
        .await
        .unwrap();
    let embedder = ConstantEmbedder::new(3);
    let pipeline =
        pipeline(RagConfig::default(), embedder.clone(), store.clone(), stub_model());

    let err = pipeline.ingest(&[Document::new("doc", "text")]).await.unwrap_err();

    assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 3 }));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.len().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn embedding_fan_out_is_bounded_and_keeps_document_then_chunk_order() {
    let store = Arc::new(InMemoryVectorStore::new());
    let embedder = LetterEmbedder::new();
    let config = RagConfig::builder()
        .chunk_size(1)
        .chunk_overlap(0)
        .chunk_unit(ChunkUnit::Tokens)
        .embed_batch_size(2)
        .embed_concurrency(2)
        .top_k(10)
        .build()
        .unwrap();
    let pipeline = pipeline(config, embedder.clone(), store.clone(), stub_model());

    let docs = [
        Document::new("doc0", "jade bronze silk porcelain"),
        Document::new("doc1", "scroll lacquer enamel"),
    ];
    let result = pipeline.ingest(&docs).await.unwrap();

    assert_eq!(result.chunks_indexed, 7);
    assert_eq!(embedder.batches.load(Ordering::SeqCst), 4);
    assert!(embedder.max_in_flight.load(Ordering::SeqCst) <= 2);

    // A zero query scores every record 0.0, so the stable sort yields insertion order.
    let stored = store.search(&[0.0; 27], 10).await.unwrap();
    let ids: Vec<&str> = stored.iter().map(|r| r.chunk.id.as_str()).collect();
    assert_eq!(ids, ["doc0_0", "doc0_1", "doc0_2", "doc0_3", "doc1_0", "doc1_1", "doc1_2"]);
    for record in &stored {
        assert_eq!(record.chunk.embedding, LetterEmbedder::vector(&record.chunk.text));
    }
}

#[tokio::test]
async fn ask_with_mismatched_provider_fails_before_embedding() {
    let store = Arc::new(InMemoryVectorStore::new());
    store
        .add(&[Chunk {
            id: "x_0".to_string(),
            text: "x".to_string(),
            embedding: vec![1.0, 0.0],
            metadata: HashMap::new(),
            document_id: "x".to_string(),
        }])
        .await
        .unwrap();
    let embedder = ConstantEmbedder::new(3);
    let model = Arc::new(RecordingModel::default());
    let pipeline = pipeline(RagConfig::default(), embedder.clone(), store, model.clone());

    let err = pipeline.ask("what is x?").await.unwrap_err();

    assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 3 }), "{err}");
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    assert!(model.prompts().is_empty());
}

#[tokio::test]
async fn failed_manifest_write_leaves_previous_index_loadable() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("index");
    let store = Arc::new(PersistentVectorStore::open(&dir).unwrap());
    let pipeline =
        pipeline(token_config(2, 1), ConstantEmbedder::new(3), store.clone(), stub_model());
    pipeline.ingest(&[Document::new("seed", "A B")]).await.unwrap();

    std::fs::create_dir(dir.join("manifest.json.tmp")).unwrap();
    let err = pipeline.ingest(&[Document::new("doc", "A B C D E")]).await.unwrap_err();

    assert!(matches!(err, RagError::IndexUnavailable { .. }), "{err}");
    assert_eq!(store.len().await.unwrap(), 1);
    let reopened = PersistentVectorStore::open(&dir).unwrap();
    assert_eq!(reopened.len().await.unwrap(), 1);
}

#[tokio::test]
async fn two_pipelines_on_one_directory_keep_both_batches() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("index");
    let first = pipeline(
        token_config(2, 1),
        ConstantEmbedder::new(3),
        Arc::new(PersistentVectorStore::open(&dir).unwrap()),
        stub_model(),
    );
    let second = pipeline(
        token_config(2, 1),
        ConstantEmbedder::new(3),
        Arc::new(PersistentVectorStore::open(&dir).unwrap()),
        stub_model(),
    );

    let a = first.ingest(&[Document::new("a", "A B C")]).await.unwrap();
    let b = second.ingest(&[Document::new("b", "D E F")]).await.unwrap();

    let reopened = PersistentVectorStore::open(&dir).unwrap();
    assert_eq!(reopened.len().await.unwrap(), a.chunks_indexed + b.chunks_indexed);
    assert_eq!(reopened.len().await.unwrap(), 4);
}

#[tokio::test]
async fn persisted_pipeline_survives_restart() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("chroma_db");
    let model = Arc::new(RecordingModel::default());

    {
        let store = Arc::new(PersistentVectorStore::open(&dir).unwrap());
        let first = pipeline(token_config(2, 1), ConstantEmbedder::new(3), store, model.clone());
        assert_eq!(first.state().await, PipelineState::Uninitialized);
        first.ingest(&[Document::new("doc", "A B C D E")]).await.unwrap();
        assert_eq!(first.state().await, PipelineState::Ready);
    }

    let store = Arc::new(PersistentVectorStore::open(&dir).unwrap());
    let second = pipeline(token_config(2, 1), ConstantEmbedder::new(3), store, model.clone());
    assert_eq!(second.state().await, PipelineState::Ready);

    let answer = second.ask("what is A?").await.unwrap();
    assert_eq!(answer.sources.len(), 4);
    assert_eq!(answer.sources[0].chunk.text, "A B");
}
