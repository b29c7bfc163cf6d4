//! Top-k retrieval over the vector index.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::chunker::Chunk;
use crate::embedding::TextEmbedder;
use crate::error::EmbeddingError;
use crate::index::VectorIndex;

/// A retrieved chunk with its similarity score in `(0, 1]`, where 1 means an
/// exact embedding match. Derived from Euclidean distance as `1 / (1 + d)`.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn TextEmbedder>,
    top_k: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn TextEmbedder>, top_k: usize) -> Self {
        Self { embedder, top_k }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Embed the query and return up to `top_k` distinct chunks, most similar
    /// first. Ties are broken by chunk id so results are stable.
    pub fn retrieve(
        &self,
        index: &VectorIndex,
        query: &str,
    ) -> Result<Vec<ScoredChunk>, EmbeddingError> {
        if index.is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query)?;

        let mut hits = index.search(&vector, self.top_k);
        hits.sort_by(|(a_id, a_dist), (b_id, b_dist)| {
            a_dist
                .partial_cmp(b_dist)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a_id.cmp(b_id))
        });

        let mut results = Vec::with_capacity(self.top_k.min(hits.len()));
        let mut seen = std::collections::HashSet::new();
        for (id, distance) in hits {
            if !seen.insert(id) {
                continue;
            }
            if let Some(chunk) = index.chunk(id) {
                results.push(ScoredChunk {
                    chunk: chunk.clone(),
                    score: 1.0 / (1.0 + distance),
                });
            }
            if results.len() == self.top_k {
                break;
            }
        }
        Ok(results)
    }
}
