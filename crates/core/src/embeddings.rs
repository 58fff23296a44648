use crate::config::{EmbeddingConfig, EmbeddingProvider, HttpConfig, DEFAULT_OPENAI_URL};
use crate::error::EmbeddingError;
use crate::http::{build_client, send_with_retry};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;
pub const CHARACTER_NGRAM_MODEL: &str = "char-trigram";

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;
    fn dimensions(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model(&self) -> &str {
        CHARACTER_NGRAM_MODEL
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        Ok(self.encode(text))
    }
}

/// Client for OpenAI-compatible `POST {base_url}/embeddings` endpoints.
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
    max_retries: u32,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig, http: &HttpConfig) -> Result<Self, EmbeddingError> {
        if config.model.trim().is_empty() {
            return Err(EmbeddingError::Config("embedding model is required".to_string()));
        }
        if config.dimensions == 0 {
            return Err(EmbeddingError::Config(
                "embedding dimensions must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            client: build_client(http)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            model: config.model.clone(),
            dimensions: config.dimensions,
            api_key: config.api_key.clone(),
            max_retries: http.max_retries,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let endpoint = self.endpoint();
        let body = json!({
            "model": self.model,
            "input": text,
        });

        let response = send_with_retry("embeddings", self.max_retries, || {
            let request = self.client.post(&endpoint).json(&body);
            match &self.api_key {
                Some(key) => request.bearer_auth(key),
                None => request,
            }
        })
        .await?;

        let parsed: Value = response.json().await?;
        let vector = parse_embedding_response(&parsed)?;

        if vector.len() != self.dimensions {
            return Err(EmbeddingError::Dimension {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }

        debug!(model = %self.model, dimensions = vector.len(), "embedded text");
        Ok(vector)
    }
}

fn parse_embedding_response(parsed: &Value) -> Result<Vec<f32>, EmbeddingError> {
    let values = parsed
        .pointer("/data/0/embedding")
        .and_then(Value::as_array)
        .ok_or_else(|| EmbeddingError::BackendResponse {
            backend: "embeddings".to_string(),
            details: "missing data[0].embedding".to_string(),
        })?;

    values
        .iter()
        .map(|value| {
            value
                .as_f64()
                .map(|number| number as f32)
                .ok_or_else(|| EmbeddingError::BackendResponse {
                    backend: "embeddings".to_string(),
                    details: format!("non-numeric embedding component: {value}"),
                })
        })
        .collect()
}

pub fn build_embedder(
    config: &EmbeddingConfig,
    http: &HttpConfig,
) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    match config.provider {
        EmbeddingProvider::Local => Ok(Arc::new(CharacterNgramEmbedder {
            dimensions: config.dimensions.max(1),
        })),
        EmbeddingProvider::OpenAi => Ok(Arc::new(HttpEmbedder::new(config, http)?)),
    }
}

/// Cosine similarity; 0.0 when lengths differ or either vector is zero.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }

    dot / (left_norm * right_norm)
}
