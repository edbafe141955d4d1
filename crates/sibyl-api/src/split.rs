//! Plain-text splitter for uploaded documents.
//!
//! Fixed-size character windows with overlap, so context spanning a chunk
//! boundary still appears whole in at least one chunk. Operates on character
//! counts, never raw byte offsets, so multibyte text cannot be split
//! mid-codepoint.

use sibyl_core::types::DocumentChunk;

/// Characters per chunk.
pub const CHUNK_SIZE: usize = 1536;
/// Characters shared between consecutive chunks.
pub const CHUNK_OVERLAP: usize = 200;

/// Split text into overlapping chunks tagged with their source and the
/// character offset where each chunk starts.
pub fn split_text(text: &str, source: &str) -> Vec<DocumentChunk> {
    split_with(text, source, CHUNK_SIZE, CHUNK_OVERLAP)
}

fn split_with(text: &str, source: &str, size: usize, overlap: usize) -> Vec<DocumentChunk> {
    assert!(overlap < size, "overlap must be smaller than chunk size");

    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let step = size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + size).min(chars.len());
        let chunk_text: String = chars[start..end].iter().collect();
        chunks.push(DocumentChunk::new(chunk_text, source, start));

        if end == chars.len() {
            break;
        }
        start += step;
    }

    chunks
}
