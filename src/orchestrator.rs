//! Query orchestration.
//!
//! Ties retrieval and synthesis together behind a single `answer` call and
//! collapses every pipeline failure into a [`QueryError`] with a message safe
//! to show to the client.

use std::sync::Arc;

use tracing::debug;

use crate::error::QueryError;
use crate::index::VectorIndex;
use crate::retriever::Retriever;
use crate::synthesizer::Synthesizer;

pub struct QueryOrchestrator {
    index: Arc<VectorIndex>,
    retriever: Retriever,
    synthesizer: Synthesizer,
}

impl QueryOrchestrator {
    pub fn new(index: Arc<VectorIndex>, retriever: Retriever, synthesizer: Synthesizer) -> Self {
        Self {
            index,
            retriever,
            synthesizer,
        }
    }

    pub fn model(&self) -> &str {
        self.synthesizer.model()
    }

    pub fn top_k(&self) -> usize {
        self.retriever.top_k()
    }

    /// Retrieve context for `query` and synthesize an answer.
    ///
    /// Query embedding is CPU-bound, so retrieval runs on the blocking pool.
    pub async fn answer(&self, query: &str) -> Result<String, QueryError> {
        let retriever = self.retriever.clone();
        let index = Arc::clone(&self.index);
        let owned_query = query.to_string();
        let chunks = tokio::task::spawn_blocking(move || retriever.retrieve(&index, &owned_query))
            .await
            .map_err(|_| QueryError {
                message: "retrieval task failed".to_string(),
            })??;

        debug!(retrieved = chunks.len(), "retrieved context");
        Ok(self.synthesizer.synthesize(query, &chunks).await?)
    }
}
