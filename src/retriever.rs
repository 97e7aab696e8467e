//! Vector retriever: query embedding + nearest-neighbor lookup.

use crate::embedding::EmbeddingProvider;
use crate::error::CopilotError;
use crate::index::VectorIndex;
use crate::models::DocChunk;

/// Owns the loaded index and the embedding provider for the lifetime of
/// the process. Queries embed once and scan the index.
pub struct Retriever {
    index: VectorIndex,
    embedder: Box<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(index: VectorIndex, embedder: Box<dyn EmbeddingProvider>) -> Self {
        Self { index, embedder }
    }

    /// Top-`k` chunks by descending similarity, with provenance. An empty
    /// result is a valid outcome, not an error.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<DocChunk>, CopilotError> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed_query(query).await?;

        Ok(self
            .index
            .search(&query_vec, k)
            .into_iter()
            .map(|(chunk, _score)| DocChunk {
                content: chunk.content.clone(),
                source: chunk.source_url.clone(),
            })
            .collect())
    }
}
