//! Ingestion error types

use doctalk_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("PDF parse error for {path}: {message}")]
    PdfParseError { path: String, message: String },

    #[error("Chunking error: {0}")]
    ChunkingError(String),

    #[error("Document {0} contains no text to index")]
    EmptyDocument(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Embedding(#[from] AppError),
}

impl From<IngestionError> for AppError {
    fn from(e: IngestionError) -> Self {
        match e {
            IngestionError::PdfParseError { .. } | IngestionError::EmptyDocument(_) => {
                AppError::DocumentUnreadable {
                    message: e.to_string(),
                }
            }
            IngestionError::ChunkingError(message) => AppError::Configuration { message },
            IngestionError::FileNotFound(path) => AppError::NotFound {
                resource_type: "file".to_string(),
                id: path,
            },
            IngestionError::IoError(e) => AppError::from(e),
            IngestionError::Embedding(e) => e,
        }
    }
}
