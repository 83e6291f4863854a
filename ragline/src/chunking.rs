//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`FixedSizeChunker`] — sliding window over characters or whitespace tokens
//! - [`RecursiveChunker`] — splits by paragraphs, lines, sentences, then words,
//!   and merges the pieces back up to the size limit
//!
//! Both record `chunk_index` and `offset` (character offset of the chunk's
//! first character) in each chunk's metadata. Dropping from every chunk after
//! the first the characters it shares with its predecessor reproduces the
//! document text exactly.

use std::iter;

use serde::{Deserialize, Serialize};

use crate::document::{CHUNK_INDEX_KEY, Chunk, Document, OFFSET_KEY};
use crate::error::{RagError, Result};

/// A strategy for splitting documents into chunks.
///
/// Implementations produce [`Chunk`]s with text and metadata but no embeddings.
/// Embeddings are attached later by the pipeline.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has no content.
    /// Each returned chunk has an empty embedding vector.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// The unit in which chunk sizes and overlaps are measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkUnit {
    /// Unicode scalar values.
    #[default]
    Characters,
    /// Whitespace-delimited words.
    Tokens,
}

/// Which [`Chunker`] implementation the pipeline builds from its config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// [`FixedSizeChunker`].
    #[default]
    Fixed,
    /// [`RecursiveChunker`].
    Recursive,
}

/// Split `document` into character windows of `max_size` overlapping by `overlap`.
///
/// # Errors
///
/// Returns [`RagError::InvalidConfiguration`] if `max_size == 0` or
/// `overlap >= max_size`.
pub fn split(document: &Document, max_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    Ok(FixedSizeChunker::new(max_size, overlap)?.chunk(document))
}

pub(crate) fn validate_sizes(max_size: usize, overlap: usize) -> Result<()> {
    if max_size == 0 {
        return Err(RagError::InvalidConfiguration(
            "chunk_size must be greater than zero".to_string(),
        ));
    }
    if overlap >= max_size {
        return Err(RagError::InvalidConfiguration(format!(
            "chunk_overlap ({overlap}) must be less than chunk_size ({max_size})"
        )));
    }
    Ok(())
}

/// Sliding window over `len` units. The last window always ends at `len`.
fn windows(len: usize, size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    if len == 0 {
        return out;
    }
    let step = size - overlap;
    let mut start = 0;
    loop {
        let end = (start + size).min(len);
        out.push((start, end));
        if end == len {
            break;
        }
        start += step;
    }
    out
}

/// Byte spans of the whitespace-delimited tokens in `text`.
fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

fn char_offset(text: &str, byte: usize) -> usize {
    text[..byte].chars().count()
}

fn make_chunk(document: &Document, chunk_index: usize, text: &str, offset: usize) -> Chunk {
    let mut metadata = document.metadata.clone();
    metadata.insert(CHUNK_INDEX_KEY.to_string(), chunk_index.to_string());
    metadata.insert(OFFSET_KEY.to_string(), offset.to_string());

    Chunk {
        id: format!("{}_{chunk_index}", document.id),
        text: text.to_string(),
        embedding: Vec::new(),
        metadata,
        document_id: document.id.clone(),
    }
}

/// Splits text into fixed-size windows with configurable overlap.
///
/// The window advances by `chunk_size - chunk_overlap` units until it reaches
/// the end of the text; the final chunk may be shorter. A document of `L`
/// units yields `ceil((L - O) / (M - O))` chunks, or one chunk when `L <= M`.
///
/// In [`ChunkUnit::Tokens`] mode each chunk is the exact source substring from
/// its first token to its last. The first chunk also covers leading whitespace
/// and the last chunk trailing whitespace; with zero overlap the whitespace
/// between two chunks belongs to the earlier one.
///
/// # Example
///
/// ```rust,ignore
/// use ragline::{ChunkUnit, FixedSizeChunker};
///
/// let chunker = FixedSizeChunker::new(2, 1)?.with_unit(ChunkUnit::Tokens);
/// let chunks = chunker.chunk(&Document::new("doc", "A B C D E"));
/// // ["A B", "B C", "C D", "D E"]
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    unit: ChunkUnit,
}

impl FixedSizeChunker {
    /// Create a new character-based `FixedSizeChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if `chunk_size == 0` or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_sizes(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap, unit: ChunkUnit::Characters })
    }

    /// Measure sizes in the given unit.
    pub fn with_unit(mut self, unit: ChunkUnit) -> Self {
        self.unit = unit;
        self
    }

    fn byte_spans(&self, text: &str) -> Vec<(usize, usize)> {
        match self.unit {
            ChunkUnit::Characters => {
                let bounds: Vec<usize> =
                    text.char_indices().map(|(i, _)| i).chain(iter::once(text.len())).collect();
                windows(bounds.len() - 1, self.chunk_size, self.chunk_overlap)
                    .into_iter()
                    .map(|(s, e)| (bounds[s], bounds[e]))
                    .collect()
            }
            ChunkUnit::Tokens => {
                let spans = token_spans(text);
                let n = spans.len();
                windows(n, self.chunk_size, self.chunk_overlap)
                    .into_iter()
                    .map(|(s, e)| {
                        let start = if s == 0 { 0 } else { spans[s].0 };
                        let end = if e == n {
                            text.len()
                        } else if self.chunk_overlap == 0 {
                            spans[e].0
                        } else {
                            spans[e - 1].1
                        };
                        (start, end)
                    })
                    .collect()
            }
        }
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = &document.text;
        self.byte_spans(text)
            .into_iter()
            .enumerate()
            .map(|(i, (start, end))| {
                make_chunk(document, i, &text[start..end], char_offset(text, start))
            })
            .collect()
    }
}

/// Separators tried in order, coarsest first. `。` covers CJK sentence ends.
const SEPARATORS: [&str; 7] = ["\n\n", "\n", "。", ". ", "! ", "? ", " "];

/// Splits text hierarchically: paragraphs → lines → sentences → words → characters.
///
/// Each separator stays attached to the segment before it, so no text is
/// lost. Segments are merged greedily up to `chunk_size` characters; the next
/// chunk starts with as many trailing segments of the previous one as fit in
/// `chunk_overlap`.
///
/// # Example
///
/// ```rust,ignore
/// use ragline::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(1000, 100)?;
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker` measuring sizes in characters.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if `chunk_size == 0` or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_sizes(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }
}

/// Cut `text[start..end]` into contiguous byte ranges of at most `size` characters.
fn collect_pieces(
    text: &str,
    start: usize,
    end: usize,
    size: usize,
    separators: &[&str],
    out: &mut Vec<(usize, usize)>,
) {
    let segment = &text[start..end];
    if segment.chars().count() <= size {
        out.push((start, end));
        return;
    }

    let Some((separator, rest)) = separators.split_first() else {
        // No separator left: hard split on character boundaries.
        let bounds: Vec<usize> =
            segment.char_indices().map(|(i, _)| start + i).chain(iter::once(end)).collect();
        let chars = bounds.len() - 1;
        for s in (0..chars).step_by(size) {
            out.push((bounds[s], bounds[(s + size).min(chars)]));
        }
        return;
    };

    let mut piece_start = start;
    for (pos, _) in segment.match_indices(separator) {
        let piece_end = start + pos + separator.len();
        collect_pieces(text, piece_start, piece_end, size, rest, out);
        piece_start = piece_end;
    }
    if piece_start < end {
        collect_pieces(text, piece_start, end, size, rest, out);
    }
}

/// Greedily merge contiguous pieces into windows of at most `size` characters.
fn merge_pieces(
    text: &str,
    pieces: &[(usize, usize)],
    size: usize,
    overlap: usize,
) -> Vec<(usize, usize)> {
    let lens: Vec<usize> = pieces.iter().map(|&(s, e)| text[s..e].chars().count()).collect();
    let mut windows = Vec::new();
    let mut lo = 0;
    let mut total = 0;

    for hi in 0..pieces.len() {
        let len = lens[hi];
        if total + len > size && hi > lo {
            windows.push((pieces[lo].0, pieces[hi - 1].1));
            while lo < hi && (total > overlap || total + len > size) {
                total -= lens[lo];
                lo += 1;
            }
        }
        total += len;
    }
    if let Some(last) = pieces.last() {
        windows.push((pieces[lo].0, last.1));
    }
    windows
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = &document.text;
        if text.is_empty() {
            return Vec::new();
        }

        let mut pieces = Vec::new();
        collect_pieces(text, 0, text.len(), self.chunk_size, &SEPARATORS, &mut pieces);

        merge_pieces(text, &pieces, self.chunk_size, self.chunk_overlap)
            .into_iter()
            .enumerate()
            .map(|(i, (start, end))| {
                make_chunk(document, i, &text[start..end], char_offset(text, start))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    /// Drop each chunk's overlap with its predecessor and concatenate.
    fn reassemble(chunks: &[Chunk]) -> String {
        let mut out = String::new();
        let mut covered: usize = 0;
        for chunk in chunks {
            let offset = chunk.offset().unwrap();
            let len = chunk.text.chars().count();
            let skip = covered.saturating_sub(offset);
            out.extend(chunk.text.chars().skip(skip));
            covered = offset + len;
        }
        out
    }

    #[test]
    fn token_windows_overlap_by_one_word() {
        let doc = Document::new("doc", "A B C D E");
        let chunks =
            FixedSizeChunker::new(2, 1).unwrap().with_unit(ChunkUnit::Tokens).chunk(&doc);

        assert_eq!(texts(&chunks), ["A B", "B C", "C D", "D E"]);
        assert_eq!(chunks[2].id, "doc_2");
        assert_eq!(chunks[2].chunk_index(), Some(2));
        assert_eq!(chunks[2].offset(), Some(4));
        assert_eq!(reassemble(&chunks), doc.text);
    }

    #[test]
    fn token_windows_without_overlap_keep_whitespace() {
        let doc = Document::new("doc", "  alpha beta\n\ngamma  delta ");
        let chunks =
            FixedSizeChunker::new(2, 0).unwrap().with_unit(ChunkUnit::Tokens).chunk(&doc);

        assert_eq!(texts(&chunks), ["  alpha beta\n\n", "gamma  delta "]);
        assert_eq!(reassemble(&chunks), doc.text);
    }

    #[test]
    fn character_windows_respect_utf8_boundaries() {
        let doc = Document::new("palace", "故宫博物院成立于一九二五年");
        let chunks = FixedSizeChunker::new(5, 2).unwrap().chunk(&doc);

        assert_eq!(texts(&chunks), ["故宫博物院", "物院成立于", "立于一九二", "九二五年"]);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 5));
        assert_eq!(reassemble(&chunks), doc.text);
    }

    #[test]
    fn short_document_yields_single_chunk() {
        let doc = Document::new("d", "short").with_metadata("title", "T");
        let chunks = FixedSizeChunker::new(100, 10).unwrap().chunk(&doc);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "short");
        assert_eq!(chunks[0].metadata.get("title").map(String::as_str), Some("T"));
        assert_eq!(chunks[0].document_id, "d");
    }

    #[test]
    fn empty_document_yields_no_chunks() {
        let doc = Document::new("d", "");
        assert!(FixedSizeChunker::new(10, 2).unwrap().chunk(&doc).is_empty());
        assert!(RecursiveChunker::new(10, 2).unwrap().chunk(&doc).is_empty());

        let blank = Document::new("d", "   \n ");
        let tokens = FixedSizeChunker::new(3, 1).unwrap().with_unit(ChunkUnit::Tokens);
        assert!(tokens.chunk(&blank).is_empty());
    }

    #[test]
    fn invalid_sizes_are_rejected() {
        let doc = Document::new("d", "text");
        assert!(matches!(split(&doc, 3, 5), Err(RagError::InvalidConfiguration(_))));
        assert!(matches!(split(&doc, 3, 3), Err(RagError::InvalidConfiguration(_))));
        assert!(matches!(split(&doc, 0, 0), Err(RagError::InvalidConfiguration(_))));
        assert!(RecursiveChunker::new(4, 4).is_err());
    }

    #[test]
    fn recursive_prefers_paragraph_boundaries() {
        let text = "First paragraph here.\n\nSecond paragraph is here.\n\nThird one.";
        let doc = Document::new("d", text);
        let chunks = RecursiveChunker::new(30, 0).unwrap().chunk(&doc);

        assert_eq!(
            texts(&chunks),
            ["First paragraph here.\n\n", "Second paragraph is here.\n\n", "Third one."]
        );
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn recursive_carries_overlap_and_bounds_size() {
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let doc = Document::new("d", text);
        let chunks = RecursiveChunker::new(16, 6).unwrap().chunk(&doc);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 16));
        assert!(chunks[1].offset().unwrap() < chunks[0].text.chars().count());
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn recursive_hard_splits_unbroken_text() {
        let text = "x".repeat(25);
        let doc = Document::new("d", text.as_str());
        let chunks = RecursiveChunker::new(10, 0).unwrap().chunk(&doc);

        assert_eq!(chunks.iter().map(|c| c.text.len()).collect::<Vec<_>>(), [10, 10, 5]);
        assert_eq!(reassemble(&chunks), text);
    }
}
