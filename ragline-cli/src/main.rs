//! `ragline` command-line front end.
//!
//! Settings come from the environment (and a `.env` file): `RAG_*` for the
//! pipeline, `RAG_LLM_*` for the chat model, and `RAG_EMBEDDING_*` for the
//! embedding model. Provider keys fall back to `DASHSCOPE_API_KEY`,
//! `DEEPSEEK_API_KEY`, `OPENAI_API_KEY`, or `KIMI_API_KEY`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use ragline::loader::SOURCE_KEY;
use ragline::{
    Answer, ChatCompletionsModel, Document, DocumentLoader, FileLoader, OpenAIEmbeddingProvider,
    PersistentVectorStore, PipelineState, ProviderRole, ProviderSettings, RagConfig, RagPipeline,
    VectorStore, WebPageLoader,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Characters of each source chunk shown with `--sources`.
const SOURCE_PREVIEW_CHARS: usize = 160;

#[derive(Parser)]
#[command(name = "ragline", version)]
#[command(about = "Ask questions about web pages and local documents")]
struct Cli {
    /// Directory holding the vector index
    #[arg(long, global = true, env = "RAG_PERSIST_DIR")]
    persist_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load documents and append them to the index
    Ingest {
        /// Web page to ingest (repeatable)
        #[arg(long = "url")]
        urls: Vec<String>,

        /// File, or directory of .txt/.md files, to ingest (repeatable)
        #[arg(long = "path")]
        paths: Vec<PathBuf>,
    },

    /// Answer a question from the index
    Ask {
        question: String,

        /// Print the retrieved chunks after the answer
        #[arg(long)]
        sources: bool,
    },

    /// Ingest a web page if no index exists yet, then answer a question
    Run {
        /// Page to ingest when the index is missing
        #[arg(long)]
        url: String,

        question: String,

        /// Print the retrieved chunks after the answer
        #[arg(long)]
        sources: bool,
    },

    /// Show index state, record count, and dimension
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config()?;
    if let Some(dir) = cli.persist_dir {
        config.persist_directory = dir;
    }

    match cli.command {
        Command::Status => status(&config).await,
        Command::Ingest { urls, paths } => {
            if urls.is_empty() && paths.is_empty() {
                bail!("nothing to ingest: pass --url and/or --path");
            }
            let pipeline = build_pipeline(config)?;
            let documents = load_documents(&urls, &paths).await?;
            let result = pipeline.ingest(&documents).await?;
            println!(
                "Indexed {} chunks from {} documents into {}",
                result.chunks_indexed,
                result.documents,
                pipeline.config().persist_directory.display()
            );
            Ok(())
        }
        Command::Ask { question, sources } => {
            let pipeline = build_pipeline(config)?;
            let answer = pipeline.ask(&question).await?;
            print_answer(&answer, sources);
            Ok(())
        }
        Command::Run { url, question, sources } => {
            let pipeline = build_pipeline(config)?;
            if pipeline.state().await == PipelineState::Uninitialized {
                info!(%url, "no index found, ingesting");
                let documents = WebPageLoader::new(&url).load().await?;
                let result = pipeline.ingest(&documents).await?;
                info!(chunks_indexed = result.chunks_indexed, "index built");
            } else {
                info!(
                    dir = %pipeline.config().persist_directory.display(),
                    "index found, skipping ingestion"
                );
            }
            let answer = pipeline.ask(&question).await?;
            print_answer(&answer, sources);
            Ok(())
        }
    }
}

/// Pipeline settings from `RAG_*` variables; the CLI splits recursively unless told otherwise.
fn load_config() -> anyhow::Result<RagConfig> {
    let config = RagConfig::from_lookup(|key| {
        std::env::var(key)
            .ok()
            .or_else(|| (key == "RAG_CHUNK_STRATEGY").then(|| "recursive".to_string()))
    })?;
    Ok(config)
}

fn build_pipeline(config: RagConfig) -> anyhow::Result<RagPipeline> {
    let lookup = |key: &str| std::env::var(key).ok();
    let embedding =
        ProviderSettings::from_lookup("RAG_EMBEDDING_", ProviderRole::Embedding, lookup)
            .context("embedding provider")?;
    let chat = ProviderSettings::from_lookup("RAG_LLM_", ProviderRole::Chat, lookup)
        .context("chat provider")?;
    info!(embedding = %embedding.label(), chat = %chat.label(), "providers configured");

    let store = PersistentVectorStore::open(&config.persist_directory)?
        .with_embedding_model(embedding.model.clone());

    let pipeline = RagPipeline::builder()
        .config(config)
        .embedding_provider(Arc::new(OpenAIEmbeddingProvider::new(embedding)))
        .vector_store(Arc::new(store))
        .language_model(Arc::new(ChatCompletionsModel::new(chat)))
        .build()?;
    Ok(pipeline)
}

async fn load_documents(urls: &[String], paths: &[PathBuf]) -> anyhow::Result<Vec<Document>> {
    let mut loaders: Vec<Box<dyn DocumentLoader>> = Vec::new();
    for url in urls {
        loaders.push(Box::new(WebPageLoader::new(url)));
    }
    for path in paths {
        loaders.push(Box::new(FileLoader::new(path)));
    }

    let mut documents = Vec::new();
    for loader in &loaders {
        let loaded = loader.load().await?;
        info!(source = loader.source(), documents = loaded.len(), "loaded");
        documents.extend(loaded);
    }
    Ok(documents)
}

async fn status(config: &RagConfig) -> anyhow::Result<()> {
    let dir = &config.persist_directory;
    let store = PersistentVectorStore::open(dir)?;
    let state = store.state().await;

    println!("index:      {}", dir.display());
    println!("state:      {state:?}");
    println!("records:    {}", store.len().await?);
    match store.dimensions().await {
        Some(dimensions) => println!("dimensions: {dimensions}"),
        None => println!("dimensions: -"),
    }
    if let Some(manifest) = PersistentVectorStore::read_manifest(dir)? {
        println!("generation: {}", manifest.generation);
        if let Some(model) = manifest.embedding_model {
            println!("model:      {model}");
        }
        println!("updated:    {}", manifest.updated_at.to_rfc3339());
    }
    Ok(())
}

fn print_answer(answer: &Answer, show_sources: bool) {
    println!("{}", answer.text);
    if !show_sources {
        return;
    }

    println!();
    if answer.sources.is_empty() {
        println!("(no context retrieved; the answer is not grounded in the index)");
        return;
    }
    for (idx, source) in answer.sources.iter().enumerate() {
        let origin = source.chunk.metadata.get(SOURCE_KEY).map_or("-", String::as_str);
        println!("{}. score: {:.3} | source: {origin}", idx + 1, source.score);
        println!("   {}", preview(&source.chunk.text, SOURCE_PREVIEW_CHARS));
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}
