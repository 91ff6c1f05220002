//! Doc-Talk ingestion
//!
//! Turns an uploaded PDF into a searchable, session-owned vector index:
//! text extraction, chunking and embedding.

pub mod chunker;
pub mod errors;
pub mod pdf;
pub mod pipeline;

pub use chunker::{chunk_text, ChunkingConfig, TextChunk};
pub use errors::IngestionError;
pub use pdf::{extract_text_from_bytes, extract_text_from_pdf, ExtractedText};
pub use pipeline::{IndexedDocument, Ingestor};

#[cfg(any(test, feature = "test-fixtures"))]
pub mod testing;
