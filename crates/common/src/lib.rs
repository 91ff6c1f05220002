//! Doc-Talk Common Library
//!
//! Shared code for the Doc-Talk services including:
//! - Configuration management
//! - Error types and handling
//! - Tracing setup and metrics
//! - Embedding and chat model clients
//! - The in-memory vector index and retriever
//! - Conversational memory and the retrieval chain
//! - Per-session state

pub mod chain;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod http;
pub mod index;
pub mod llm;
pub mod memory;
pub mod metrics;
pub mod retrieval;
pub mod session;
pub mod telemetry;

// Re-export commonly used types
pub use chain::{ChainResponse, ConversationalRetrievalChain};
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use index::VectorIndex;
pub use llm::ChatModel;
pub use memory::ConversationMemory;
pub use session::SessionStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-mpnet-base-v2";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;

/// Default chat model
pub const DEFAULT_CHAT_MODEL: &str = "llama-3.1-70b-versatile";
