//! Embedding service abstraction
//!
//! Provides a unified interface for multiple embedding providers:
//! - HuggingFace text-embeddings-inference (sentence-transformers models)
//! - OpenAI-compatible `/embeddings` endpoints
//! - A deterministic offline embedder for development and tests

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::http::{
    build_client, is_transient_send_error, is_transient_status, join_url, with_retry,
    RequestError, RequestResult,
};
use crate::metrics;
use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Check a provider response against the request
fn validate_embeddings(
    embeddings: Vec<Vec<f32>>,
    expected_count: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    if embeddings.len() != expected_count {
        return Err(AppError::EmbeddingError {
            message: format!(
                "Expected {} embeddings, provider returned {}",
                expected_count,
                embeddings.len()
            ),
        });
    }
    if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
        return Err(AppError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }
    Ok(embeddings)
}

/// Split `texts` into provider-sized batches and embed each with retries
async fn embed_in_batches<'a, F, Fut>(
    texts: &'a [String],
    batch_size: usize,
    max_retries: u32,
    model: &str,
    request: F,
) -> Result<Vec<Vec<f32>>>
where
    F: Fn(&'a [String]) -> Fut,
    Fut: Future<Output = RequestResult<Vec<Vec<f32>>>>,
{
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size) {
        let start = Instant::now();
        let result = with_retry(max_retries, "embedding", || request(batch)).await;
        metrics::record_embedding(start.elapsed().as_secs_f64(), model, batch.len(), result.is_ok());
        all_embeddings.extend(result?);
    }

    Ok(all_embeddings)
}

fn first_embedding(embeddings: Vec<Vec<f32>>) -> Result<Vec<f32>> {
    embeddings
        .into_iter()
        .next()
        .ok_or_else(|| AppError::EmbeddingError {
            message: "Empty response".to_string(),
        })
}

/// Send an embedding request and turn non-2xx answers into classified errors
async fn send_embedding_request(request: reqwest::RequestBuilder) -> RequestResult<reqwest::Response> {
    let response = request.send().await.map_err(|e| {
        let transient = is_transient_send_error(&e);
        let error = AppError::EmbeddingError {
            message: format!("Request failed: {}", e),
        };
        RequestError { error, transient }
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let error = AppError::EmbeddingError {
            message: format!("API error {}: {}", status, body),
        };
        return Err(RequestError {
            error,
            transient: is_transient_status(status),
        });
    }

    Ok(response)
}

/// HuggingFace text-embeddings-inference client
pub struct TeiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    batch_size: usize,
    max_retries: u32,
}

#[derive(Serialize)]
struct TeiRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
}

impl TeiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "http://localhost:8081".to_string()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }

    async fn make_request(&self, texts: &[String]) -> RequestResult<Vec<Vec<f32>>> {
        let url = join_url(&self.base_url, "embed");

        let mut request = self.client.post(&url).json(&TeiRequest {
            inputs: texts,
            truncate: true,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = send_embedding_request(request).await?;
        let embeddings: Vec<Vec<f32>> =
            response.json().await.map_err(|e| AppError::EmbeddingError {
                message: format!("Failed to parse response: {}", e),
            })?;

        Ok(validate_embeddings(embeddings, texts.len(), self.dimension)?)
    }
}

#[async_trait]
impl Embedder for TeiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        first_embedding(self.embed_batch(&[text.to_string()]).await?)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        embed_in_batches(texts, self.batch_size, self.max_retries, &self.model, move |batch| {
            self.make_request(batch)
        })
        .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// OpenAI-compatible embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    batch_size: usize,
    max_retries: u32,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| AppError::Configuration {
                message: "OpenAI embedding provider requires an API key".to_string(),
            })?;

        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            batch_size: config.batch_size.clamp(1, 2048),
            max_retries: config.max_retries,
        })
    }

    async fn make_request(&self, texts: &[String]) -> RequestResult<Vec<Vec<f32>>> {
        let url = join_url(&self.base_url, "embeddings");

        let request = self.client.post(&url).bearer_auth(&self.api_key).json(&OpenAIRequest {
            input: texts,
            model: &self.model,
        });

        let response = send_embedding_request(request).await?;
        let mut result: OpenAIResponse =
            response.json().await.map_err(|e| AppError::EmbeddingError {
                message: format!("Failed to parse response: {}", e),
            })?;

        // Order is documented but not guaranteed by every compatible server
        result.data.sort_by_key(|e| e.index);
        let embeddings = result.data.into_iter().map(|e| e.embedding).collect();

        Ok(validate_embeddings(embeddings, texts.len(), self.dimension)?)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        first_embedding(self.embed_batch(&[text.to_string()]).await?)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        embed_in_batches(texts, self.batch_size, self.max_retries, &self.model, move |batch| {
            self.make_request(batch)
        })
        .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic offline embedder.
///
/// Every lowercase word maps to a pseudo-random direction seeded by its hash;
/// a text is the normalised sum of its words. Identical texts embed
/// identically and texts sharing vocabulary land close together.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let mut rng = StdRng::seed_from_u64(hasher.finish());
            for value in vector.iter_mut() {
                *value += rng.gen_range(-1.0f32..1.0);
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.provider.as_str() {
        "tei" | "huggingface" => Arc::new(TeiEmbedder::new(config)?),
        "openai" => Arc::new(OpenAIEmbedder::new(config)?),
        "mock" => Arc::new(MockEmbedder::new(config.dimension)),
        other => {
            return Err(AppError::Configuration {
                message: format!("Unknown embedding provider: {}", other),
            })
        }
    };

    tracing::info!(
        provider = %config.provider,
        model = %embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedder initialized"
    );

    Ok(embedder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::stub::StubServer;

    fn remote_config(provider: &str, url: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            api_key: Some("sk-test".to_string()),
            api_base: Some(url.to_string()),
            dimension: 3,
            timeout_secs: 5,
            max_retries: 2,
            batch_size: 2,
            ..EmbeddingConfig::default()
        }
    }

    fn openai_body(rows: &[(usize, [f32; 3])]) -> String {
        let data: Vec<_> = rows
            .iter()
            .map(|(index, embedding)| serde_json::json!({"index": index, "embedding": embedding}))
            .collect();
        serde_json::json!({ "data": data }).to_string()
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_mock_embedder() {
        let embedder = MockEmbedder::new(768);
        let embedding = embedder.embed("test text").await.unwrap();
        assert_eq!(embedding.len(), 768);

        let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_mock_is_deterministic() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("The invoice is due in March").await.unwrap();
        let b = embedder.embed("the INVOICE is due in march").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_mock_shared_words_are_closer() {
        let embedder = MockEmbedder::new(256);
        let query = embedder.embed("refund policy").await.unwrap();
        let related = embedder.embed("our refund policy lasts thirty days").await.unwrap();
        let unrelated = embedder.embed("the engine uses diesel fuel").await.unwrap();
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_mock_batch() {
        let embedder = MockEmbedder::new(768);
        let texts = vec!["text1".to_string(), "text2".to_string()];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 768);
    }

    #[test]
    fn test_validate_embeddings() {
        assert!(validate_embeddings(vec![vec![0.0; 3]], 1, 3).is_ok());
        assert!(matches!(
            validate_embeddings(vec![vec![0.0; 3]], 2, 3),
            Err(AppError::EmbeddingError { .. })
        ));
        assert!(matches!(
            validate_embeddings(vec![vec![0.0; 4]], 1, 3),
            Err(AppError::DimensionMismatch { expected: 3, actual: 4 })
        ));
    }

    #[test]
    fn test_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "word2vec".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            create_embedder(&config),
            Err(AppError::Configuration { .. })
        ));
    }

    #[test]
    fn test_mock_provider() {
        let config = EmbeddingConfig {
            provider: "mock".to_string(),
            dimension: 32,
            ..EmbeddingConfig::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dimension(), 32);
        assert_eq!(embedder.model_name(), "mock-embedding");
    }

    #[tokio::test]
    async fn test_tei_batches_requests() {
        let server = StubServer::start(vec![
            (200, "[[1,0,0],[0,1,0]]".to_string()),
            (200, "[[0,0,1]]".to_string()),
        ])
        .await;
        let embedder = TeiEmbedder::new(&remote_config("tei", &server.url)).unwrap();

        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();

        assert_eq!(embeddings, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]]);
        assert_eq!(server.hits(), 2);
        let first: serde_json::Value = serde_json::from_str(&server.bodies()[0]).unwrap();
        assert_eq!(first["inputs"], serde_json::json!(["a", "b"]));
        assert_eq!(first["truncate"], true);
    }

    #[tokio::test]
    async fn test_tei_retries_unavailable() {
        let server = StubServer::start(vec![
            (503, "loading".to_string()),
            (200, "[[0.5,0.5,0]]".to_string()),
        ])
        .await;
        let embedder = TeiEmbedder::new(&remote_config("tei", &server.url)).unwrap();

        let embedding = embedder.embed("hello").await.unwrap();
        assert_eq!(embedding, vec![0.5, 0.5, 0.0]);
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_not_retried() {
        let server = StubServer::start(vec![(200, "[[1,0]]".to_string())]).await;
        let embedder = TeiEmbedder::new(&remote_config("tei", &server.url)).unwrap();

        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, AppError::DimensionMismatch { expected: 3, actual: 2 }));
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_wrong_count_is_not_retried() {
        let server = StubServer::start(vec![(200, "[[1,0,0],[0,1,0]]".to_string())]).await;
        let embedder = TeiEmbedder::new(&remote_config("tei", &server.url)).unwrap();

        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingError { .. }));
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_openai_restores_input_order() {
        let server = StubServer::start(vec![(
            200,
            openai_body(&[(1, [0.0, 1.0, 0.0]), (0, [1.0, 0.0, 0.0])]),
        )])
        .await;
        let embedder = OpenAIEmbedder::new(&remote_config("openai", &server.url)).unwrap();

        let texts = vec!["first".to_string(), "second".to_string()];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();

        assert_eq!(embeddings[0], vec![1.0, 0.0, 0.0]);
        assert_eq!(embeddings[1], vec![0.0, 1.0, 0.0]);
        let body: serde_json::Value = serde_json::from_str(&server.bodies()[0]).unwrap();
        assert_eq!(body["model"], embedder.model_name());
    }

    #[tokio::test]
    async fn test_openai_rejected_key_is_not_retried() {
        let server = StubServer::start(vec![(401, r#"{"error":"invalid api key"}"#.to_string())]).await;
        let embedder = OpenAIEmbedder::new(&remote_config("openai", &server.url)).unwrap();

        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingError { .. }));
        assert!(err.to_string().contains("401"));
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_exhausts_retries() {
        let server = StubServer::start(vec![(429, "slow down".to_string())]).await;
        let embedder = OpenAIEmbedder::new(&remote_config("openai", &server.url)).unwrap();

        assert!(embedder.embed("hello").await.is_err());
        assert_eq!(server.hits(), 3);
    }
}
