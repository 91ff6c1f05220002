//! In-memory vector index
//!
//! Exact (flat) nearest-neighbour search over the chunks of one document.
//! An index is built once per uploaded document and then shared read-only.

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Distance used to rank chunks
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Squared euclidean distance
    #[default]
    L2,
    /// One minus cosine similarity
    Cosine,
}

/// A chunk of document text together with its embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    /// Position of the chunk in its document
    pub chunk_index: usize,

    /// Chunk content
    pub content: String,

    /// File the chunk was taken from
    pub source: String,

    /// Embedding vector
    pub embedding: Vec<f32>,
}

/// A search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_index: usize,
    pub content: String,
    pub source: String,

    /// Raw distance under the index metric (lower is closer)
    pub distance: f32,

    /// Distance mapped to a relevance score, 1.0 is an exact match
    pub relevance: f32,
}

/// Flat vector index
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    metric: DistanceMetric,
    entries: Vec<IndexedChunk>,
    norms: Vec<f32>,
}

impl VectorIndex {
    /// Create an empty index
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            dimension,
            metric,
            entries: Vec::new(),
            norms: Vec::new(),
        }
    }

    /// Build an index from chunks in one go
    pub fn from_chunks(
        dimension: usize,
        metric: DistanceMetric,
        chunks: impl IntoIterator<Item = IndexedChunk>,
    ) -> Result<Self> {
        let mut index = Self::new(dimension, metric);
        for chunk in chunks {
            index.add(chunk)?;
        }
        Ok(index)
    }

    /// Add a chunk; its embedding must match the index dimension
    pub fn add(&mut self, chunk: IndexedChunk) -> Result<()> {
        if chunk.embedding.len() != self.dimension {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension,
                actual: chunk.embedding.len(),
            });
        }
        if chunk.embedding.iter().any(|v| !v.is_finite()) {
            return Err(AppError::EmbeddingError {
                message: format!("Chunk {} has a non-finite embedding", chunk.chunk_index),
            });
        }

        self.norms.push(norm(&chunk.embedding));
        self.entries.push(chunk);
        Ok(())
    }

    /// Return up to `k` chunks closest to `query`, closest first.
    ///
    /// Ties keep insertion order. Hits whose relevance falls below
    /// `score_threshold` are dropped.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredChunk>> {
        if query.len() != self.dimension {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if query.iter().any(|v| !v.is_finite()) {
            return Err(AppError::EmbeddingError {
                message: "Query has a non-finite embedding".to_string(),
            });
        }
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_norm = norm(query);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, self.distance(query, query_norm, entry, self.norms[i])))
            .collect();

        // Stable sort keeps insertion order for equal distances
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

        let hits = scored
            .into_iter()
            .map(|(i, distance)| {
                let entry = &self.entries[i];
                ScoredChunk {
                    chunk_index: entry.chunk_index,
                    content: entry.content.clone(),
                    source: entry.source.clone(),
                    distance,
                    relevance: self.relevance(distance),
                }
            })
            .filter(|hit| score_threshold.map_or(true, |t| hit.relevance >= t))
            .take(k)
            .collect();

        Ok(hits)
    }

    fn distance(&self, query: &[f32], query_norm: f32, entry: &IndexedChunk, entry_norm: f32) -> f32 {
        match self.metric {
            DistanceMetric::L2 => query
                .iter()
                .zip(&entry.embedding)
                .map(|(a, b)| (a - b) * (a - b))
                .sum(),
            DistanceMetric::Cosine => {
                if query_norm == 0.0 || entry_norm == 0.0 {
                    return 1.0;
                }
                let dot: f32 = query.iter().zip(&entry.embedding).map(|(a, b)| a * b).sum();
                1.0 - dot / (query_norm * entry_norm)
            }
        }
    }

    fn relevance(&self, distance: f32) -> f32 {
        match self.metric {
            // Unit vectors are at most sqrt(2) apart when they are not opposed
            DistanceMetric::L2 => 1.0 - distance.sqrt() / std::f32::consts::SQRT_2,
            DistanceMetric::Cosine => 1.0 - distance,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Indexed chunks in insertion order
    pub fn chunks(&self) -> &[IndexedChunk] {
        &self.entries
    }
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(i: usize, embedding: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            chunk_index: i,
            content: format!("chunk {}", i),
            source: "doc.pdf".to_string(),
            embedding,
        }
    }

    fn sample(metric: DistanceMetric) -> VectorIndex {
        VectorIndex::from_chunks(
            2,
            metric,
            vec![
                chunk(0, vec![1.0, 0.0]),
                chunk(1, vec![0.0, 1.0]),
                chunk(2, vec![0.7, 0.7]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_l2_ordering() {
        let index = sample(DistanceMetric::L2);
        let hits = index.search(&[0.9, 0.1], 3, None).unwrap();

        let order: Vec<usize> = hits.iter().map(|h| h.chunk_index).collect();
        assert_eq!(order, vec![0, 2, 1]);
        assert!(hits[0].distance < hits[1].distance);
        assert!(hits[0].relevance > hits[2].relevance);
    }

    #[test]
    fn test_cosine_ignores_magnitude() {
        let index = sample(DistanceMetric::Cosine);
        let hits = index.search(&[10.0, 10.0], 1, None).unwrap();
        assert_eq!(hits[0].chunk_index, 2);
        assert!(hits[0].relevance > 0.99);
    }

    #[test]
    fn test_k_limits_results() {
        let index = sample(DistanceMetric::L2);
        assert_eq!(index.search(&[1.0, 0.0], 2, None).unwrap().len(), 2);
        assert_eq!(index.search(&[1.0, 0.0], 10, None).unwrap().len(), 3);
        assert!(index.search(&[1.0, 0.0], 0, None).unwrap().is_empty());
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let index = VectorIndex::from_chunks(
            1,
            DistanceMetric::L2,
            vec![chunk(0, vec![1.0]), chunk(1, vec![-1.0]), chunk(2, vec![1.0])],
        )
        .unwrap();

        let hits = index.search(&[0.0], 3, None).unwrap();
        let order: Vec<usize> = hits.iter().map(|h| h.chunk_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_score_threshold() {
        let index = sample(DistanceMetric::Cosine);
        let hits = index.search(&[1.0, 0.0], 3, Some(0.5)).unwrap();
        let order: Vec<usize> = hits.iter().map(|h| h.chunk_index).collect();
        assert_eq!(order, vec![0, 2]);
    }

    #[test]
    fn test_empty_index() {
        let index = VectorIndex::new(4, DistanceMetric::L2);
        assert!(index.is_empty());
        assert!(index.search(&[0.0; 4], 4, None).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = VectorIndex::new(3, DistanceMetric::L2);
        assert!(matches!(
            index.add(chunk(0, vec![1.0, 2.0])),
            Err(AppError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(
            index.search(&[1.0], 1, None),
            Err(AppError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_nan() {
        let mut index = VectorIndex::new(2, DistanceMetric::L2);
        assert!(index.add(chunk(0, vec![f32::NAN, 0.0])).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn test_rejects_non_finite_query() {
        let index = sample(DistanceMetric::L2);
        assert!(matches!(
            index.search(&[f32::NAN, 0.0], 3, None),
            Err(AppError::EmbeddingError { .. })
        ));
        assert!(index.search(&[f32::INFINITY, 0.0], 3, None).is_err());
    }
}
