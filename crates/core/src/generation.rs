use crate::config::{
    GenerationConfig, GenerationProvider, HttpConfig, DEFAULT_HF_INFERENCE_URL, DEFAULT_OLLAMA_URL,
};
use crate::error::GenerationError;
use crate::http::{build_client, send_with_retry};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Hosted Hugging Face inference endpoint.
pub struct HuggingFaceGenerator {
    client: Client,
    endpoint: String,
    api_token: String,
    max_new_tokens: u32,
    temperature: f32,
    max_retries: u32,
}

impl HuggingFaceGenerator {
    pub fn new(
        config: &GenerationConfig,
        api_token: String,
        http: &HttpConfig,
    ) -> Result<Self, GenerationError> {
        let endpoint = config.endpoint.clone().unwrap_or_else(|| {
            format!(
                "{}/{}",
                DEFAULT_HF_INFERENCE_URL.trim_end_matches('/'),
                config.model
            )
        });

        Ok(Self {
            client: build_client(http)?,
            endpoint,
            api_token,
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
            max_retries: http.max_retries,
        })
    }
}

#[async_trait]
impl TextGenerator for HuggingFaceGenerator {
    fn name(&self) -> &str {
        "huggingface"
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let payload = json!({
            "inputs": prompt,
            "parameters": {
                "max_new_tokens": self.max_new_tokens,
                "temperature": self.temperature,
                "return_full_text": false,
            }
        });

        let response = send_with_retry(self.name(), self.max_retries, || {
            self.client
                .post(&self.endpoint)
                .bearer_auth(&self.api_token)
                .json(&payload)
        })
        .await?;

        let body: Value = response.json().await?;
        let text = parse_generated_text(&body).ok_or_else(|| GenerationError::BackendResponse {
            backend: self.name().to_string(),
            details: "missing generated_text".to_string(),
        })?;

        non_empty(self.name(), text)
    }
}

/// Accepts both `[{"generated_text": ..}]` and `{"generated_text": ..}`.
fn parse_generated_text(body: &Value) -> Option<&str> {
    body.pointer("/0/generated_text")
        .or_else(|| body.get("generated_text"))
        .and_then(Value::as_str)
}

/// Local Ollama runtime, non-streaming `/api/generate`.
pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    model: String,
    max_new_tokens: u32,
    temperature: f32,
    max_retries: u32,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig, http: &HttpConfig) -> Result<Self, GenerationError> {
        Ok(Self {
            client: build_client(http)?,
            base_url: config
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            model: config.model.clone(),
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
            max_retries: http.max_retries,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let endpoint = self.endpoint();
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_new_tokens,
            }
        });

        let response = send_with_retry(self.name(), self.max_retries, || {
            self.client.post(&endpoint).json(&payload)
        })
        .await?;

        let body: OllamaResponse = response.json().await?;
        if !body.done {
            return Err(GenerationError::BackendResponse {
                backend: self.name().to_string(),
                details: "response incomplete (streaming not supported)".to_string(),
            });
        }

        non_empty(self.name(), &body.response)
    }
}

fn non_empty(backend: &str, text: &str) -> Result<String, GenerationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(GenerationError::EmptyCompletion(backend.to_string()));
    }
    debug!(backend, chars = trimmed.len(), "generated completion");
    Ok(trimmed.to_string())
}

/// Builds the configured generator, or `None` when answers should be
/// assembled from excerpts only.
pub fn build_generator(
    config: &GenerationConfig,
    http: &HttpConfig,
) -> Result<Option<Arc<dyn TextGenerator>>, GenerationError> {
    match config.provider {
        GenerationProvider::None => Ok(None),
        GenerationProvider::HuggingFace => {
            let token = config
                .api_token
                .as_deref()
                .map(str::trim)
                .filter(|token| !token.is_empty());

            match token {
                Some(token) => {
                    info!(model = %config.model, "using hugging face generation");
                    Ok(Some(Arc::new(HuggingFaceGenerator::new(
                        config,
                        token.to_string(),
                        http,
                    )?)))
                }
                None => {
                    warn!("hugging face generation selected without an api token; answers will use excerpts");
                    Ok(None)
                }
            }
        }
        GenerationProvider::Ollama => {
            info!(model = %config.model, "using ollama generation");
            Ok(Some(Arc::new(OllamaGenerator::new(config, http)?)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn http_config() -> HttpConfig {
        HttpConfig {
            max_retries: 0,
            ..HttpConfig::default()
        }
    }

    fn config(provider: GenerationProvider, endpoint: String) -> GenerationConfig {
        GenerationConfig {
            provider,
            model: "tiny".to_string(),
            endpoint: Some(endpoint),
            api_token: Some("hf_token".to_string()),
            ..GenerationConfig::default()
        }
    }

    #[tokio::test]
    async fn hugging_face_list_payload_is_parsed() -> Result<(), GenerationError> {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/models/tiny")
                    .header("authorization", "Bearer hf_token")
                    .json_body_partial(r#"{"parameters": {"max_new_tokens": 150}}"#);
                then.status(200)
                    .json_body(json!([{ "generated_text": "  The pump runs at 250 bar. " }]));
            })
            .await;

        let generator = HuggingFaceGenerator::new(
            &config(GenerationProvider::HuggingFace, server.url("/models/tiny")),
            "hf_token".to_string(),
            &http_config(),
        )?;
        let text = generator.generate("Question: pressure?").await?;

        mock.assert_async().await;
        assert_eq!(text, "The pump runs at 250 bar.");
        Ok(())
    }

    #[tokio::test]
    async fn blank_completion_is_an_error() -> Result<(), GenerationError> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/models/tiny");
                then.status(200).json_body(json!({ "generated_text": "   " }));
            })
            .await;

        let generator = HuggingFaceGenerator::new(
            &config(GenerationProvider::HuggingFace, server.url("/models/tiny")),
            "hf_token".to_string(),
            &http_config(),
        )?;

        assert!(matches!(
            generator.generate("prompt").await,
            Err(GenerationError::EmptyCompletion(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn ollama_response_is_trimmed() -> Result<(), GenerationError> {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"stream": false, "model": "tiny"}"#);
                then.status(200)
                    .json_body(json!({ "response": "Two years.\n", "done": true }));
            })
            .await;

        let generator =
            OllamaGenerator::new(&config(GenerationProvider::Ollama, server.base_url()), &http_config())?;
        let text = generator.generate("How long is the warranty?").await?;

        mock.assert_async().await;
        assert_eq!(text, "Two years.");
        Ok(())
    }

    #[tokio::test]
    async fn ollama_error_status_surfaces() -> Result<(), GenerationError> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(400).body("model not found");
            })
            .await;

        let generator =
            OllamaGenerator::new(&config(GenerationProvider::Ollama, server.base_url()), &http_config())?;
        let error = generator.generate("prompt").await.expect_err("bad request");

        assert!(error.to_string().contains("model not found"));
        Ok(())
    }

    #[test]
    fn missing_token_disables_hugging_face() -> Result<(), GenerationError> {
        let config = GenerationConfig {
            provider: GenerationProvider::HuggingFace,
            api_token: Some("  ".to_string()),
            ..GenerationConfig::default()
        };
        assert!(build_generator(&config, &http_config())?.is_none());
        assert!(build_generator(&GenerationConfig::default(), &http_config())?.is_none());
        Ok(())
    }
}
