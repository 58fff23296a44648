use crate::chunking::ChunkingConfig;
use std::str::FromStr;

pub const DEFAULT_HF_INFERENCE_URL: &str = "https://api-inference.huggingface.co/models";
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub answering: AnsweringConfig,
    pub http: HttpConfig,
    pub worker: WorkerConfig,
    /// Base used to derive a download URL when a document's URL is not absolute.
    pub storage_base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Hashed character trigrams computed in-process.
    Local,
    /// Any OpenAI-compatible `/embeddings` endpoint.
    OpenAi,
}

impl FromStr for EmbeddingProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "openai" => Ok(Self::OpenAi),
            other => Err(format!("unknown embedding provider: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub dimensions: usize,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Local,
            model: crate::embeddings::CHARACTER_NGRAM_MODEL.to_string(),
            dimensions: crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS,
            base_url: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationProvider {
    None,
    HuggingFace,
    Ollama,
}

impl FromStr for GenerationProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "huggingface" | "hf" => Ok(Self::HuggingFace),
            "ollama" => Ok(Self::Ollama),
            other => Err(format!("unknown generation provider: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub provider: GenerationProvider,
    pub model: String,
    /// Full endpoint override; provider defaults apply when absent.
    pub endpoint: Option<String>,
    pub api_token: Option<String>,
    pub max_new_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: GenerationProvider::None,
            model: "mistralai/Mixtral-8x7B-Instruct-v0.1".to_string(),
            endpoint: None,
            api_token: None,
            max_new_tokens: 150,
            temperature: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnsweringConfig {
    pub top_k: usize,
    /// Characters of each retrieved chunk forwarded to a generation backend.
    pub context_chars: usize,
    pub timeout_secs: u64,
}

impl Default for AnsweringConfig {
    fn default() -> Self {
        Self {
            top_k: 2,
            context_chars: 250,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 2,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn providers_parse_case_insensitively() {
        assert_eq!("OpenAI".parse::<EmbeddingProvider>(), Ok(EmbeddingProvider::OpenAi));
        assert_eq!("hf".parse::<GenerationProvider>(), Ok(GenerationProvider::HuggingFace));
        assert_eq!("none".parse::<GenerationProvider>(), Ok(GenerationProvider::None));
        assert!("faiss".parse::<EmbeddingProvider>().is_err());
    }

    #[test]
    fn defaults_match_pipeline_limits() {
        let config = PipelineConfig::default();
        assert_eq!(config.chunking.max_chars, 1_000);
        assert_eq!(config.chunking.overlap_chars, 200);
        assert_eq!(config.answering.top_k, 2);
        assert_eq!(config.answering.context_chars, 250);
        assert_eq!(config.generation.provider, GenerationProvider::None);
    }
}
