use crate::config::HttpConfig;
use crate::error::TransportError;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::warn;

const RETRY_BASE_MS: u64 = 500;
const MAX_ERROR_BODY_CHARS: usize = 512;

pub(crate) fn build_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.as_str())
        .build()
}

/// Sends the request built by `request`, retrying 429, 5xx and transport
/// errors with exponential backoff. Other client errors fail immediately.
pub(crate) async fn send_with_retry<F>(
    backend: &str,
    max_retries: u32,
    mut request: F,
) -> Result<Response, TransportError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut last_error = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_millis(RETRY_BASE_MS << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match request().send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error = TransportError::Status {
                    backend: backend.to_string(),
                    status: status.as_u16(),
                    body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
                };

                if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    warn!(backend, attempt, %status, "retryable response");
                    last_error = Some(error);
                    continue;
                }

                return Err(error);
            }
            Err(error) => {
                warn!(backend, attempt, error = %error, "request failed");
                last_error = Some(TransportError::Http(error));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| TransportError::Exhausted(backend.to_string())))
}
