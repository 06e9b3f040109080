use crate::config::ChunkerConfig;
use crate::error::Result;
use crate::types::{Chunk, ChunkId, Document};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Number of windows a text of `len` characters splits into.
///
/// `ceil(max(0, len - overlap) / (size - overlap))`; callers guarantee `overlap < size`.
#[must_use]
pub const fn window_count(len: usize, size: usize, overlap: usize) -> usize {
    let stride = size - overlap;
    len.saturating_sub(overlap).div_ceil(stride)
}

/// Hands out monotonically increasing chunk ids.
#[derive(Debug, Default)]
pub struct ChunkIdAllocator {
    next: AtomicU64,
}

impl ChunkIdAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Resume after ids that are already taken (e.g. a loaded index).
    #[must_use]
    pub const fn starting_at(next: ChunkId) -> Self {
        Self {
            next: AtomicU64::new(next),
        }
    }

    /// Reserve `count` consecutive ids and return the first one.
    pub fn reserve(&self, count: usize) -> ChunkId {
        self.next.fetch_add(count as u64, Ordering::Relaxed)
    }

    #[must_use]
    pub fn peek(&self) -> ChunkId {
        self.next.load(Ordering::Relaxed)
    }
}

/// Main chunker interface
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a new chunker, rejecting `size == 0` or `overlap >= size`
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Number of chunks `document` will produce.
    #[must_use]
    pub fn count(&self, document: &Document) -> usize {
        window_count(document.char_len(), self.config.size, self.config.overlap)
    }

    /// Lazily chunk a document.
    ///
    /// The id range for every window is reserved up front, so the returned sequence can be
    /// restarted and always yields the same chunks with the same ids.
    pub fn chunk<'a>(&self, document: &'a Document, ids: &ChunkIdAllocator) -> Chunks<'a> {
        let total = self.count(document);
        let first_id = ids.reserve(total);
        log::trace!(
            "Chunking document {} into {} windows starting at id {}",
            document.id,
            total,
            first_id
        );
        Chunks {
            text: &document.text,
            document_id: Arc::from(document.id.as_str()),
            size: self.config.size,
            stride: self.config.stride(),
            first_id,
            total,
            next: 0,
            cursor_byte: 0,
        }
    }
}

/// Lazy, finite, restartable sequence of chunks for one document.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    document_id: Arc<str>,
    size: usize,
    stride: usize,
    first_id: ChunkId,
    total: usize,
    next: usize,
    cursor_byte: usize,
}

impl<'a> Chunks<'a> {
    /// A fresh sequence over the same windows and ids.
    #[must_use]
    pub fn restart(&self) -> Self {
        Self {
            next: 0,
            cursor_byte: 0,
            ..self.clone()
        }
    }

    #[must_use]
    pub const fn first_id(&self) -> ChunkId {
        self.first_id
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    fn advance_chars(&self, from_byte: usize, chars: usize) -> usize {
        self.text[from_byte..]
            .char_indices()
            .nth(chars)
            .map_or(self.text.len(), |(offset, _)| from_byte + offset)
    }
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.next >= self.total {
            return None;
        }

        let start_char = self.next * self.stride;
        let start_byte = self.cursor_byte;
        let end_byte = self.advance_chars(start_byte, self.size);
        let text = &self.text[start_byte..end_byte];
        let end_char = start_char + text.chars().count();

        let chunk = Chunk {
            id: self.first_id + self.next as u64,
            document_id: Arc::clone(&self.document_id),
            text: text.to_string(),
            start_offset: start_char,
            end_offset: end_char,
            sequence_index: self.next,
        };

        self.next += 1;
        if self.next < self.total {
            self.cursor_byte = self.advance_chars(start_byte, self.stride);
        }

        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks<'_> {}
