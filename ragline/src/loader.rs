//! Document loaders: web pages and local text files.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::document::Document;
use crate::error::{RagError, Result};

/// Metadata key for the URL or path a document was loaded from.
pub const SOURCE_KEY: &str = "source";

/// Metadata key for the document title.
pub const TITLE_KEY: &str = "title";

/// A source of [`Document`]s.
///
/// Loaders report failures as [`RagError::Loader`] and never retry.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// The URL or path being loaded, for logs and errors.
    fn source(&self) -> &str;

    /// Load every document from the source.
    async fn load(&self) -> Result<Vec<Document>>;
}

fn loader_error(source: &str, message: impl Into<String>) -> RagError {
    RagError::Loader { source_name: source.to_string(), message: message.into() }
}

// ── HTML extraction ────────────────────────────────────────────────

static HIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>",
        r"|<noscript\b.*?</noscript\s*>|<head\b.*?</head\s*>|<!--.*?-->",
    ))
    .expect("unreachable error: invalid hidden-content pattern")
});

static BLOCK_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*(br|/p|/div|/li|/h[1-6]|/tr|/section|/article|/header|/footer)\b[^>]*>")
        .expect("unreachable error: invalid block pattern")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("unreachable error: invalid tag pattern"));

static TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<title\b[^>]*>(.*?)</title\s*>")
        .expect("unreachable error: invalid title pattern")
});

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);")
        .expect("unreachable error: invalid entity pattern")
});

fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let decoded = match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => {
                    let code = name
                        .strip_prefix("#x")
                        .or_else(|| name.strip_prefix("#X"))
                        .map(|hex| u32::from_str_radix(hex, 16))
                        .or_else(|| name.strip_prefix('#').map(str::parse));
                    code.and_then(|c| c.ok()).and_then(char::from_u32)
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// Extract the `<title>` of an HTML page.
pub fn extract_title(html: &str) -> Option<String> {
    TITLE
        .captures(html)
        .map(|caps| decode_entities(caps[1].trim()))
        .filter(|title| !title.is_empty())
}

/// Extract the visible text of an HTML page.
///
/// Scripts, styles, comments, and the `<head>` are dropped; block-level
/// closing tags become line breaks. Blank lines are removed and runs of
/// whitespace inside a line collapse to one space.
pub fn extract_text(html: &str) -> String {
    let visible = HIDDEN.replace_all(html, "");
    let broken = BLOCK_BREAK.replace_all(&visible, "\n");
    let stripped = TAG.replace_all(&broken, "");
    let decoded = decode_entities(&stripped);

    decoded
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── WebPageLoader ──────────────────────────────────────────────────

/// Fetches one web page and turns its visible text into a [`Document`].
///
/// The document carries `source` (the URL) and, when present, `title`
/// metadata. A page without visible text is an error.
///
/// # Example
///
/// ```rust,ignore
/// use ragline::{DocumentLoader, WebPageLoader};
///
/// let docs = WebPageLoader::new("https://www.dpm.org.cn/about/introduction.html")
///     .load()
///     .await?;
/// ```
pub struct WebPageLoader {
    client: reqwest::Client,
    url: String,
}

impl WebPageLoader {
    /// Create a loader for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Create a loader sharing an existing `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl DocumentLoader for WebPageLoader {
    fn source(&self) -> &str {
        &self.url
    }

    async fn load(&self) -> Result<Vec<Document>> {
        debug!(url = %self.url, "fetching page");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| loader_error(&self.url, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(loader_error(&self.url, format!("server returned {status}")));
        }

        let html = response
            .text()
            .await
            .map_err(|e| loader_error(&self.url, format!("failed to read body: {e}")))?;

        let text = extract_text(&html);
        if text.is_empty() {
            return Err(loader_error(&self.url, "page has no text content"));
        }

        let mut document = Document::new(Uuid::new_v4().to_string(), text)
            .with_source_uri(&self.url)
            .with_metadata(SOURCE_KEY, &self.url);
        if let Some(title) = extract_title(&html) {
            document = document.with_metadata(TITLE_KEY, title);
        }

        info!(url = %self.url, text_len = document.text.len(), "page loaded");
        Ok(vec![document])
    }
}

// ── FileLoader ─────────────────────────────────────────────────────

/// Reads a text file, or every `.txt` and `.md` file under a directory.
///
/// Files are returned in path order. Each document's id and `source` are the
/// file path and its `title` is the file stem. Empty files are skipped.
pub struct FileLoader {
    path: PathBuf,
    source: String,
}

impl FileLoader {
    /// Create a loader for a file or directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let source = path.display().to_string();
        Self { path, source }
    }

    fn discover(&self) -> Result<Vec<PathBuf>> {
        if self.path.is_file() {
            return Ok(vec![self.path.clone()]);
        }
        if !self.path.is_dir() {
            return Err(loader_error(&self.source, "no such file or directory"));
        }

        let mut files = WalkDir::new(&self.path)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| is_text_file(entry.path()))
            .map(|entry| entry.into_path())
            .collect::<Vec<_>>();

        files.sort();
        Ok(files)
    }
}

fn is_text_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "txt" || ext == "md")
}

#[async_trait]
impl DocumentLoader for FileLoader {
    fn source(&self) -> &str {
        &self.source
    }

    async fn load(&self) -> Result<Vec<Document>> {
        let files = self.discover()?;
        let mut documents = Vec::with_capacity(files.len());

        for file in files {
            let source = file.display().to_string();
            let text = tokio::fs::read_to_string(&file)
                .await
                .map_err(|e| loader_error(&source, e.to_string()))?;
            if text.trim().is_empty() {
                warn!(path = %source, "skipping empty file");
                continue;
            }

            let mut document = Document::new(&source, text).with_metadata(SOURCE_KEY, &source);
            if let Some(stem) = file.file_stem().and_then(|s| s.to_str()) {
                document = document.with_metadata(TITLE_KEY, stem);
            }
            documents.push(document);
        }

        info!(path = %self.source, documents = documents.len(), "files loaded");
        Ok(documents)
    }
}
