use super::types::{ChatRequest, ChatResponse, RawStreamEvent};
use crate::error::{QuillError, Result};
use async_stream::stream;
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API request failed with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Failed to parse API response: {0}")]
    Parse(#[from] serde_json::Error),
}

impl BackendError {
    /// Network errors, timeouts, rate limits, and server-side failures are
    /// worth retrying; everything else fails the call immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            BackendError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            BackendError::Parse(_) => false,
        }
    }

    /// Credential rejections, reported without retrying.
    pub fn auth_status(&self) -> Option<u16> {
        match self {
            BackendError::Status { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN =>
            {
                Some(status.as_u16())
            }
            BackendError::Http(e) => e
                .status()
                .filter(|s| *s == StatusCode::UNAUTHORIZED || *s == StatusCode::FORBIDDEN)
                .map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Where one request goes. Computed per call from the current config
/// snapshot and the credential store, so settings changes between calls
/// take effect without rebuilding the backend.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub base_url: String,
    pub api_key: String,
}

pub type EventStream =
    Pin<Box<dyn Stream<Item = std::result::Result<RawStreamEvent, BackendError>> + Send>>;

/// The chat-completion transport. Abstracted behind a trait so generation
/// logic can be exercised against scripted backends in tests.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(
        &self,
        endpoint: &Endpoint,
        request: &ChatRequest,
    ) -> std::result::Result<ChatResponse, BackendError>;

    async fn complete_stream(
        &self,
        endpoint: &Endpoint,
        request: &ChatRequest,
    ) -> std::result::Result<EventStream, BackendError>;
}

/// reqwest-backed implementation speaking the OpenAI-compatible
/// `/chat/completions` protocol, with SSE parsing for streamed responses.
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(|e| QuillError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn completions_url(endpoint: &Endpoint) -> String {
        format!("{}/chat/completions", endpoint.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn complete(
        &self,
        endpoint: &Endpoint,
        request: &ChatRequest,
    ) -> std::result::Result<ChatResponse, BackendError> {
        let response = self
            .client
            .post(Self::completions_url(endpoint))
            .bearer_auth(&endpoint.api_key)
            .json(request)
            .send()
            .await?;

        let response = check_response_status(response).await?;
        let body = response.text().await?;
        let parsed = serde_json::from_str::<ChatResponse>(&body)?;
        Ok(parsed)
    }

    async fn complete_stream(
        &self,
        endpoint: &Endpoint,
        request: &ChatRequest,
    ) -> std::result::Result<EventStream, BackendError> {
        let response = self
            .client
            .post(Self::completions_url(endpoint))
            .bearer_auth(&endpoint.api_key)
            .json(request)
            .send()
            .await?;

        let response = check_response_status(response).await?;

        let events = stream! {
            let mut body = response.bytes_stream();
            let mut buffer = String::new();
            let mut done = false;

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(BackendError::Http(e));
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..newline + 1);

                    for event in parse_sse_line(&line, &mut done) {
                        yield Ok(event);
                    }
                    if done {
                        return;
                    }
                }
            }

            // Trailing payload without a final newline.
            if !done {
                for event in parse_sse_line(buffer.trim(), &mut done) {
                    yield Ok(event);
                }
            }
        };

        Ok(Box::pin(events))
    }
}

fn parse_sse_line(line: &str, done: &mut bool) -> Option<RawStreamEvent> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        *done = true;
        return None;
    }

    match serde_json::from_str::<RawStreamEvent>(data) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("Failed to parse SSE event: {} - {}", e, data);
            None
        }
    }
}

async fn check_response_status(
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, BackendError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = %status, error = %body, "API request failed");
        return Err(BackendError::Status { status, body });
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_creation() {
        let backend = HttpBackend::new(Duration::from_secs(30));
        assert!(backend.is_ok());
    }

    #[test]
    fn test_completions_url() {
        let endpoint = Endpoint {
            base_url: "https://api.deepseek.com/v1/".to_string(),
            api_key: "sk-test".to_string(),
        };
        assert_eq!(
            HttpBackend::completions_url(&endpoint),
            "https://api.deepseek.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_parse_sse_line() {
        let mut done = false;

        let event = parse_sse_line(
            r#"data: {"choices":[{"delta":{"content":"hi"}}]}"#,
            &mut done,
        );
        let event = event.unwrap();
        assert_eq!(event.choices[0].delta.content.as_deref(), Some("hi"));
        assert!(!done);

        assert!(parse_sse_line("data: [DONE]", &mut done).is_none());
        assert!(done);

        let mut done = false;
        assert!(parse_sse_line(": keep-alive", &mut done).is_none());
        assert!(parse_sse_line("", &mut done).is_none());
        assert!(parse_sse_line("data: not-json", &mut done).is_none());
    }

    #[test]
    fn test_retryable_classification() {
        let err = BackendError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        assert!(err.is_retryable());
        assert!(err.auth_status().is_none());

        let err = BackendError::Status {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: String::new(),
        };
        assert!(err.is_retryable());

        let err = BackendError::Status {
            status: StatusCode::UNAUTHORIZED,
            body: String::new(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.auth_status(), Some(401));

        let err = BackendError::Status {
            status: StatusCode::BAD_REQUEST,
            body: String::new(),
        };
        assert!(!err.is_retryable());
    }
}
