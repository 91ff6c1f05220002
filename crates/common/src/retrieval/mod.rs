//! Similarity retrieval over a document index

use crate::embeddings::Embedder;
use crate::errors::Result;
use crate::index::{ScoredChunk, VectorIndex};
use std::sync::Arc;

/// Retrieved chunk with relevance score
pub type RetrievedChunk = ScoredChunk;

/// Common trait for all retrievers
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve chunks relevant to the query, most relevant first
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>>;
}

/// Embeds the query and searches a vector index
pub struct VectorRetriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    score_threshold: Option<f32>,
}

impl VectorRetriever {
    /// Create a new vector retriever
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>, top_k: usize) -> Self {
        Self {
            index,
            embedder,
            top_k,
            score_threshold: None,
        }
    }

    pub fn with_score_threshold(mut self, threshold: Option<f32>) -> Self {
        self.score_threshold = threshold;
        self
    }
}

#[async_trait::async_trait]
impl Retriever for VectorRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        let embedding = self.embedder.embed(query).await?;
        let hits = self.index.search(&embedding, self.top_k, self.score_threshold)?;

        tracing::debug!(
            query_len = query.len(),
            hits = hits.len(),
            top_relevance = hits.first().map(|h| h.relevance),
            "Retrieved chunks"
        );

        Ok(hits)
    }
}
