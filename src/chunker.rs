//! Boundary-aware text chunking.
//!
//! Documents are split into chunks of at most `chunk_size` bytes, preferring
//! to break at paragraph boundaries, then sentence boundaries, then
//! whitespace. Consecutive chunks overlap by roughly `chunk_overlap` bytes so
//! retrieval does not lose context that straddles a boundary. Every chunk is
//! an exact substring of its source document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;

/// One retrievable unit of text. `id` is its position in the index, and
/// metadata carries the source document fields plus the chunk's byte offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: usize,
    pub text: String,
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    /// `chunk_overlap` must be smaller than `chunk_size`; config validation
    /// enforces this before a chunker is ever constructed.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    /// Split a corpus into chunks with ids sequential across all documents.
    pub fn split(&self, documents: &[Document]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for document in documents {
            for (start, text) in self.split_text(&document.text) {
                let mut metadata = document.metadata.clone();
                metadata.insert("start_offset".to_string(), Value::from(start));
                chunks.push(Chunk {
                    id: chunks.len(),
                    text,
                    metadata,
                });
            }
        }
        chunks
    }

    /// Split one text into `(byte_offset, substring)` pairs.
    fn split_text(&self, text: &str) -> Vec<(usize, String)> {
        let mut pieces = Vec::new();
        if text.trim().is_empty() {
            return pieces;
        }

        let mut pos = 0;
        while pos < text.len() {
            let end = self.find_break(text, pos);
            let piece = &text[pos..end];
            if !piece.trim().is_empty() {
                pieces.push((pos, piece.to_string()));
            }
            if end >= text.len() {
                break;
            }
            let mut next = floor_char_boundary(text, end.saturating_sub(self.chunk_overlap));
            // The window must always advance.
            if next <= pos {
                next = end;
            }
            pos = next;
        }
        pieces
    }

    /// Pick the end of the chunk starting at `pos`: the best natural break
    /// within the size window, or a hard cut at a char boundary.
    fn find_break(&self, text: &str, pos: usize) -> usize {
        let limit = pos + self.chunk_size;
        if limit >= text.len() {
            return text.len();
        }
        let window = &text[pos..floor_char_boundary(text, limit)];

        // Paragraph break, then sentence end, then any whitespace.
        if let Some(at) = window.rfind("\n\n") {
            if at > 0 {
                return pos + at + 2;
            }
        }
        for pat in [". ", "! ", "? ", "\n"] {
            if let Some(at) = window.rfind(pat) {
                if at > 0 {
                    return pos + at + pat.len();
                }
            }
        }
        if let Some(at) = window.rfind(' ') {
            if at > 0 {
                return pos + at + 1;
            }
        }
        if window.is_empty() {
            // chunk_size smaller than one char: advance by a single char.
            let step = text[pos..].chars().next().map(char::len_utf8).unwrap_or(1);
            return pos + step;
        }
        pos + window.len()
    }
}

/// Largest char boundary at or below `index`.
fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}
