//! Document ingestion pipeline
//!
//! extract -> chunk -> embed -> index, producing the vector index a session
//! answers questions from.

use crate::chunker::{chunk_text, ChunkingConfig};
use crate::errors::IngestionError;
use crate::pdf::extract_text_from_bytes;
use chrono::Utc;
use doctalk_common::embeddings::Embedder;
use doctalk_common::index::{DistanceMetric, IndexedChunk, VectorIndex};
use doctalk_common::metrics;
use doctalk_common::session::{DocumentInfo, SessionDocument};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// An indexed document, ready to attach to a session
#[derive(Debug, Clone)]
pub struct IndexedDocument {
    pub info: DocumentInfo,
    pub index: Arc<VectorIndex>,
}

impl From<IndexedDocument> for SessionDocument {
    fn from(doc: IndexedDocument) -> Self {
        SessionDocument {
            info: doc.info,
            index: doc.index,
        }
    }
}

pub struct Ingestor {
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
    metric: DistanceMetric,
}

impl Ingestor {
    pub fn new(embedder: Arc<dyn Embedder>, chunking: ChunkingConfig) -> Result<Self, IngestionError> {
        chunking.validate()?;
        Ok(Self {
            embedder,
            chunking,
            metric: DistanceMetric::default(),
        })
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn chunking(&self) -> &ChunkingConfig {
        &self.chunking
    }

    /// Index the PDF at `path`
    pub async fn ingest_file(&self, path: &Path) -> Result<IndexedDocument, IngestionError> {
        let start = Instant::now();

        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IngestionError::FileNotFound(path.display().to_string()),
            _ => IngestionError::IoError(e),
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let sha256 = hex::encode(Sha256::digest(&bytes));

        // lopdf is synchronous and can be slow on large files
        let name = file_name.clone();
        let extracted = tokio::task::spawn_blocking(move || extract_text_from_bytes(&bytes, &name))
            .await
            .map_err(|e| IngestionError::IoError(std::io::Error::other(e)))??;

        let chunks = chunk_text(&extracted.text, &self.chunking)?;
        if chunks.is_empty() {
            return Err(IngestionError::EmptyDocument(file_name));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embedding_start = Instant::now();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        let embedding_duration = embedding_start.elapsed();

        let index = VectorIndex::from_chunks(
            self.embedder.dimension(),
            self.metric,
            chunks
                .into_iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| IndexedChunk {
                    chunk_index: chunk.index,
                    content: chunk.content,
                    source: file_name.clone(),
                    embedding,
                }),
        )?;
        let chunk_count = index.len();

        let total_duration = start.elapsed();
        metrics::record_ingestion(total_duration.as_secs_f64(), chunk_count);

        tracing::info!(
            file = %file_name,
            pages = extracted.page_count,
            chunks = chunk_count,
            embedding_ms = embedding_duration.as_millis(),
            total_ms = total_duration.as_millis(),
            "Document indexed"
        );

        Ok(IndexedDocument {
            info: DocumentInfo {
                file_name,
                path: path.to_path_buf(),
                sha256,
                page_count: extracted.page_count,
                chunk_count,
                indexed_at: Utc::now(),
            },
            index: Arc::new(index),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::build_pdf;
    use doctalk_common::embeddings::MockEmbedder;

    fn ingestor(chunk_size: usize, chunk_overlap: usize) -> Ingestor {
        Ingestor::new(
            Arc::new(MockEmbedder::new(64)),
            ChunkingConfig {
                chunk_size,
                chunk_overlap,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.pdf");
        let bytes = build_pdf(&[
            "Refunds are accepted within thirty days of purchase.",
            "Sale items can be returned within fourteen days.",
        ]);
        std::fs::write(&path, &bytes).unwrap();

        let doc = ingestor(60, 0).ingest_file(&path).await.unwrap();

        assert_eq!(doc.info.file_name, "policy.pdf");
        assert_eq!(doc.info.page_count, 2);
        assert_eq!(doc.info.sha256, hex::encode(Sha256::digest(&bytes)));
        assert_eq!(doc.info.chunk_count, doc.index.len());
        assert!(doc.index.len() >= 2);
        assert_eq!(doc.index.dimension(), 64);
        assert!(doc.index.chunks().iter().all(|c| c.source == "policy.pdf"));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let result = ingestor(100, 10)
            .ingest_file(Path::new("/nonexistent/upload.pdf"))
            .await;
        assert!(matches!(result, Err(IngestionError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"%PDF-1.4 but not really").unwrap();

        let result = ingestor(100, 10).ingest_file(&path).await;
        assert!(matches!(result, Err(IngestionError::PdfParseError { .. })));
    }

    #[test]
    fn test_rejects_invalid_chunking() {
        let result = Ingestor::new(
            Arc::new(MockEmbedder::new(8)),
            ChunkingConfig {
                chunk_size: 10,
                chunk_overlap: 10,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(IngestionError::ChunkingError(_))));
    }
}
