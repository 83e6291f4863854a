//! File-backed vector store.
//!
//! [`PersistentVectorStore`] keeps records in memory (same search as
//! [`InMemoryVectorStore`](crate::InMemoryVectorStore)) and writes them to a
//! directory on [`persist`](VectorStore::persist):
//!
//! ```text
//! <dir>/manifest.json       format version, generation, records file, dimensions,
//!                           model, record count, updated_at
//! <dir>/records-<gen>.json  every record in insertion order
//! <dir>/.lock               advisory writer lock
//! ```
//!
//! Every persist writes a new generation of the records file and then
//! replaces `manifest.json` by rename. The manifest rename is the commit
//! point: until it happens readers keep seeing the previous generation.
//! Older generations are removed after the commit.
//!
//! Writers hold an exclusive `fs2` lock on `.lock` for the whole commit. If
//! the generation on disk moved since this store loaded or last committed it,
//! the store's uncommitted records are appended on top of the newer index
//! rather than overwriting it.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};
use crate::inmemory::RecordSet;
use crate::vectorstore::{IndexState, VectorStore};

const BACKEND: &str = "Persistent";
const FORMAT_VERSION: u32 = 2;
const MANIFEST_FILE: &str = "manifest.json";
const RECORDS_PREFIX: &str = "records-";
const LOCK_FILE: &str = ".lock";

/// Metadata describing a persisted index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// On-disk format version.
    pub format_version: u32,
    /// Incremented by every successful persist.
    pub generation: u64,
    /// Name of the records file holding this generation, relative to the index directory.
    pub records_file: String,
    /// Embedding dimension shared by every record.
    pub dimensions: Option<usize>,
    /// Embedding model that produced the vectors, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    /// Number of records in the records file.
    pub record_count: usize,
    /// Time of the last successful persist.
    pub updated_at: DateTime<Utc>,
}

/// The in-memory index plus what is known about its on-disk counterpart.
#[derive(Debug, Clone, Default)]
struct View {
    set: RecordSet,
    /// Generation loaded or last committed; 0 when nothing was on disk.
    generation: u64,
    /// Leading records already stored in `generation`.
    committed: usize,
    /// Set when a truncate removed committed records.
    rewritten: bool,
}

/// A vector store persisted as JSON files in a directory.
///
/// Opening a directory is the `load` operation: an existing index is read
/// into memory, a missing directory yields an empty, uninitialized store.
/// Nothing is written until [`persist`](VectorStore::persist) is called.
///
/// Several stores (or processes) may write to the same directory. Commits
/// are serialized by the directory lock, and records appended by one writer
/// are never dropped by another.
///
/// # Example
///
/// ```rust,ignore
/// use ragline::{PersistentVectorStore, VectorStore};
///
/// let store = PersistentVectorStore::open("./chroma_db")?
///     .with_embedding_model("text-embedding-v4");
/// store.add(&chunks).await?;
/// store.persist().await?;
/// ```
#[derive(Debug)]
pub struct PersistentVectorStore {
    dir: PathBuf,
    embedding_model: Option<String>,
    inner: RwLock<View>,
}

impl PersistentVectorStore {
    /// Open the index stored in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexUnavailable`] when the files cannot be read or
    /// are corrupted, and [`RagError::DimensionMismatch`] when a record does not
    /// match the manifest's dimension.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let (view, embedding_model) = load(&dir)?;
        Ok(Self { dir, embedding_model, inner: RwLock::new(view) })
    }

    /// Record the embedding model name in the manifest on the next persist.
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if let Some(previous) = self.embedding_model.as_deref().filter(|p| *p != model) {
            warn!(
                dir = %self.dir.display(),
                previous,
                current = %model,
                "index was built with a different embedding model"
            );
        }
        self.embedding_model = Some(model);
        self
    }

    /// Directory holding the index files.
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Read the manifest of the index in `dir`, if one exists.
    pub fn read_manifest(dir: &Path) -> Result<Option<Manifest>> {
        read_json(&dir.join(MANIFEST_FILE))
    }
}

fn unavailable(path: &Path, message: impl std::fmt::Display) -> RagError {
    RagError::index_unavailable(BACKEND, format!("{}: {message}", path.display()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(unavailable(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| unavailable(path, format!("corrupted: {e}")))
}

/// Read the committed generation, validating it against its manifest.
fn read_index(dir: &Path) -> Result<Option<(Manifest, RecordSet)>> {
    let Some(manifest) = PersistentVectorStore::read_manifest(dir)? else {
        return Ok(None);
    };

    if manifest.format_version != FORMAT_VERSION {
        return Err(unavailable(
            dir,
            format!("unsupported format version {}", manifest.format_version),
        ));
    }
    if manifest.records_file.contains(['/', '\\']) {
        return Err(unavailable(
            dir,
            format!("invalid records file name {:?}", manifest.records_file),
        ));
    }

    let records_path = dir.join(&manifest.records_file);
    let records: Vec<Chunk> =
        read_json(&records_path)?.ok_or_else(|| unavailable(&records_path, "missing"))?;
    if records.len() != manifest.record_count {
        return Err(unavailable(
            &records_path,
            format!("manifest lists {} records, found {}", manifest.record_count, records.len()),
        ));
    }

    let mut set = RecordSet { dimensions: manifest.dimensions, records: Vec::new() };
    set.append(&records)?;
    Ok(Some((manifest, set)))
}

fn load(dir: &Path) -> Result<(View, Option<String>)> {
    // A shared lock keeps a concurrent commit from removing the generation being read.
    let lock = File::open(dir.join(LOCK_FILE)).ok();
    if let Some(lock) = &lock {
        FileExt::lock_shared(lock).map_err(|e| unavailable(&dir.join(LOCK_FILE), e))?;
    }
    let loaded = read_index(dir);
    if let Some(lock) = &lock {
        release(lock, dir);
    }

    let Some((manifest, set)) = loaded? else {
        debug!(dir = %dir.display(), "no persisted index");
        return Ok((View::default(), None));
    };

    info!(
        dir = %dir.display(),
        generation = manifest.generation,
        records = set.records.len(),
        dimensions = ?set.dimensions,
        "loaded persisted index"
    );
    let view = View {
        committed: set.records.len(),
        set,
        generation: manifest.generation,
        rewritten: false,
    };
    Ok((view, manifest.embedding_model))
}

fn release(lock: &File, dir: &Path) {
    if let Err(e) = FileExt::unlock(lock) {
        warn!(path = %dir.join(LOCK_FILE).display(), error = %e, "failed to release index lock");
    }
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let target = dir.join(name);
    let tmp = dir.join(format!("{name}.tmp"));

    let mut file = File::create(&tmp).map_err(|e| unavailable(&tmp, e))?;
    file.write_all(bytes).map_err(|e| unavailable(&tmp, e))?;
    file.sync_all().map_err(|e| unavailable(&tmp, e))?;
    fs::rename(&tmp, &target).map_err(|e| unavailable(&target, e))
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove index file"),
    }
}

/// Remove records files of superseded generations.
fn remove_stale_records(dir: &Path, current: &str) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "failed to list index directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(RECORDS_PREFIX) && name != current {
            remove_quietly(&entry.path());
        }
    }
}

/// Commit `view` as the next generation of the index in `dir`.
fn commit(dir: &Path, view: View, embedding_model: Option<String>) -> Result<View> {
    fs::create_dir_all(dir).map_err(|e| unavailable(dir, e))?;

    let lock_path = dir.join(LOCK_FILE);
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| unavailable(&lock_path, e))?;
    FileExt::lock_exclusive(&lock).map_err(|e| unavailable(&lock_path, e))?;

    let committed = commit_locked(dir, view, embedding_model);
    release(&lock, dir);
    committed
}

fn commit_locked(dir: &Path, view: View, embedding_model: Option<String>) -> Result<View> {
    let on_disk = read_index(dir)?;
    let disk_generation = on_disk.as_ref().map_or(0, |(manifest, _)| manifest.generation);
    let set = if disk_generation == view.generation {
        view.set
    } else {
        rebase(dir, on_disk.map(|(_, set)| set), view, disk_generation)?
    };

    let generation = disk_generation + 1;
    let records_file = format!("{RECORDS_PREFIX}{generation}.json");
    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        generation,
        records_file: records_file.clone(),
        dimensions: set.dimensions,
        embedding_model,
        record_count: set.records.len(),
        updated_at: Utc::now(),
    };
    let records = serde_json::to_vec(&set.records)
        .map_err(|e| unavailable(dir, format!("failed to encode records: {e}")))?;
    let manifest = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| unavailable(dir, format!("failed to encode manifest: {e}")))?;

    write_atomic(dir, &records_file, &records)?;
    if let Err(e) = write_atomic(dir, MANIFEST_FILE, &manifest) {
        remove_quietly(&dir.join(&records_file));
        remove_quietly(&dir.join(format!("{MANIFEST_FILE}.tmp")));
        return Err(e);
    }
    remove_stale_records(dir, &records_file);

    Ok(View { committed: set.records.len(), set, generation, rewritten: false })
}

/// Another writer committed since `view` was loaded: append the records only
/// this view holds on top of the newer index.
fn rebase(
    dir: &Path,
    on_disk: Option<RecordSet>,
    view: View,
    disk_generation: u64,
) -> Result<RecordSet> {
    if view.rewritten {
        return Err(unavailable(
            dir,
            format!(
                "index moved to generation {disk_generation} while this store removed records \
                 from generation {}; reopen the index",
                view.generation
            ),
        ));
    }

    let pending = &view.set.records[view.committed..];
    let mut set = on_disk.unwrap_or_default();
    set.append(pending)?;
    warn!(
        dir = %dir.display(),
        expected_generation = view.generation,
        disk_generation,
        appended = pending.len(),
        "index changed on disk, appending on top of it"
    );
    Ok(set)
}

#[async_trait]
impl VectorStore for PersistentVectorStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn add(&self, chunks: &[Chunk]) -> Result<()> {
        self.inner.write().await.set.append(chunks)
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        self.inner.read().await.set.search(embedding, top_k)
    }

    async fn persist(&self) -> Result<()> {
        let mut view = self.inner.write().await;
        let snapshot = (*view).clone();
        let dir = self.dir.clone();
        let model = self.embedding_model.clone();

        let committed = tokio::task::spawn_blocking(move || commit(&dir, snapshot, model))
            .await
            .map_err(|e| unavailable(&self.dir, format!("persist task failed: {e}")))??;

        debug!(
            dir = %self.dir.display(),
            generation = committed.generation,
            records = committed.committed,
            "persisted index"
        );
        *view = committed;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.inner.read().await.set.records.len())
    }

    async fn truncate(&self, len: usize) -> Result<()> {
        let mut view = self.inner.write().await;
        view.set.truncate(len);
        if len < view.committed {
            view.committed = len;
            view.rewritten = true;
        }
        Ok(())
    }

    async fn dimensions(&self) -> Option<usize> {
        self.inner.read().await.set.dimensions
    }

    async fn state(&self) -> IndexState {
        match tokio::fs::metadata(&self.dir).await {
            Ok(meta) if meta.is_dir() => IndexState::Ready,
            _ => IndexState::Uninitialized,
        }
    }
}
