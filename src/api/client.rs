use super::backend::{BackendError, ChatBackend, Endpoint};
use super::types::{
    ChatMessage, ChatRequest, GenerationError, ResponseFormat, StreamChunk, StreamDelta,
};
use super::utils::RetryPolicy;
use crate::config::{GenerationConfig, SharedConfig};
use crate::credentials::CredentialStore;
use async_stream::stream;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Safety margin applied to the remaining context window when clamping
/// `max_tokens`, as numerator/denominator of the fixed 0.8 factor.
const CONTEXT_SAFETY_NUM: u64 = 4;
const CONTEXT_SAFETY_DEN: u64 = 5;

/// Invoked once per emitted unit: every content delta, every reasoning
/// delta, and the one-time thinking-finished marker.
pub type ChunkCallback = Arc<dyn Fn(StreamChunk) + Send + Sync>;

/// Cooperative cancellation handle. Cloneable; tripping it from another
/// task is observed before the next stream event is processed. There is no
/// hard interrupt: an in-flight network read may deliver one more buffered
/// chunk, which is then discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Cheap character-count heuristic for prompt size, not a real tokenizer.
fn estimate_prompt_tokens(messages: &[ChatMessage]) -> u32 {
    messages
        .iter()
        .map(|message| (message.content.chars().count() / 4) as u32)
        .sum()
}

/// Clamp the configured `max_tokens` so the request never asks for more
/// than 80% of what remains in the context window after the prompt.
pub fn effective_max_tokens(config: &GenerationConfig, messages: &[ChatMessage]) -> u32 {
    let used = estimate_prompt_tokens(messages);
    let available = config.context_window.saturating_sub(used) as u64;
    let budget = (available * CONTEXT_SAFETY_NUM / CONTEXT_SAFETY_DEN) as u32;
    config.max_tokens.min(budget)
}

/// Mediates all calls to the chat-completion backend: applies the current
/// configuration and token budget, retries transient HTTP failures with
/// backoff, and demultiplexes reasoning from answer content in streams.
///
/// Failures of the public operations are carried in-band (error strings
/// via [`GenerationError`]), never raised, because callers typically
/// render the result directly into an output pane.
pub struct GenerationClient {
    backend: Arc<dyn ChatBackend>,
    config: SharedConfig,
    credentials: Arc<CredentialStore>,
    retry: RetryPolicy,
}

impl GenerationClient {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        config: SharedConfig,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            backend,
            config,
            credentials,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Config snapshot for one call; settings mutations between calls take
    /// effect here.
    fn snapshot(&self) -> GenerationConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn endpoint_for(&self, config: &GenerationConfig) -> Result<Endpoint, GenerationError> {
        let api_key = self
            .credentials
            .key_for(&config.provider)
            .ok_or_else(|| GenerationError::missing_credential(&config.provider))?;

        Ok(Endpoint {
            base_url: config.base_url.clone(),
            api_key,
        })
    }

    fn build_request(
        config: &GenerationConfig,
        messages: &[ChatMessage],
        stream: bool,
    ) -> ChatRequest {
        // Omit response_format for families that would reject it.
        let response_format = config
            .response_format
            .as_deref()
            .filter(|format| config.accepts_response_format(format))
            .map(|format| ResponseFormat {
                format_type: format.to_string(),
            });

        ChatRequest {
            model: config.model.clone(),
            messages: messages.to_vec(),
            temperature: config.temperature,
            top_p: config.top_p,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
            max_tokens: effective_max_tokens(config, messages),
            stream,
            response_format,
        }
    }

    /// Blocking (non-streaming) generation. Returns the completion text,
    /// which may be empty, or a tagged error whose `Display` is the
    /// user-facing failure string.
    pub async fn generate(
        &self,
        messages: &[ChatMessage],
    ) -> Result<String, GenerationError> {
        let config = self.snapshot();
        let endpoint = self.endpoint_for(&config)?;
        let request = Self::build_request(&config, messages, false);

        let mut attempt = 1u32;
        loop {
            if attempt > 1 {
                let delay = self.retry.jittered_delay(attempt);
                tracing::warn!(
                    attempt,
                    max_retries = self.retry.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying generation request"
                );
                tokio::time::sleep(delay).await;
            }

            match self.backend.complete(&endpoint, &request).await {
                Ok(response) => return Ok(response.text()),
                Err(e) => {
                    if let Some(status) = e.auth_status() {
                        return Err(GenerationError::auth(
                            status,
                            &config.provider,
                            &config.model,
                            &config.base_url,
                        ));
                    }
                    if matches!(e, BackendError::Parse(_)) {
                        return Err(GenerationError::parse(e));
                    }
                    if e.is_retryable() && attempt < self.retry.max_retries {
                        attempt += 1;
                        continue;
                    }
                    tracing::error!(attempts = attempt, error = %e, "Generation request failed permanently");
                    return Err(GenerationError::transient(attempt, e));
                }
            }
        }
    }

    /// [`generate`](Self::generate) flattened to the display string, for
    /// callers that only render text.
    pub async fn generate_text(&self, messages: &[ChatMessage]) -> String {
        match self.generate(messages).await {
            Ok(text) => text,
            Err(e) => e.to_string(),
        }
    }

    /// Streaming generation. Lazy and forward-only: polling the returned
    /// stream drives the network read, the demultiplexing, and the
    /// callback; nothing is buffered ahead of consumption.
    ///
    /// Content deltas are yielded in arrival order after de-duplication of
    /// consecutive identical chunks. Reasoning deltas reach only the
    /// callback. A transient failure restarts the whole stream (no offset
    /// resumption); once retries are exhausted, the final item is the
    /// failure string. Cancellation ends the stream early with no error
    /// item.
    pub fn stream_generate(
        &self,
        messages: Vec<ChatMessage>,
        callback: Option<ChunkCallback>,
        cancel: CancelToken,
    ) -> Pin<Box<dyn Stream<Item = String> + Send>> {
        let config = self.snapshot();
        let prepared = self.endpoint_for(&config).map(|endpoint| {
            let request = Self::build_request(&config, &messages, true);
            (endpoint, request)
        });
        let reasoning_model = config.is_reasoning_model();
        let backend = Arc::clone(&self.backend);
        let retry = self.retry;

        Box::pin(stream! {
            let (endpoint, request) = match prepared {
                Ok(prepared) => prepared,
                Err(e) => {
                    yield e.to_string();
                    return;
                }
            };

            let emit = move |chunk: StreamChunk| {
                if let Some(cb) = &callback {
                    cb(chunk);
                }
            };

            let mut saw_reasoning = false;
            let mut thinking_finished_sent = false;
            let mut attempt = 1u32;

            loop {
                if attempt > 1 {
                    let delay = retry.jittered_delay(attempt);
                    tracing::warn!(
                        attempt,
                        max_retries = retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying streaming generation"
                    );
                    tokio::time::sleep(delay).await;
                }

                let mut events = match backend.complete_stream(&endpoint, &request).await {
                    Ok(events) => events,
                    Err(e) => {
                        if let Some(status) = e.auth_status() {
                            yield GenerationError::auth(
                                status,
                                &config.provider,
                                &config.model,
                                &config.base_url,
                            )
                            .to_string();
                            return;
                        }
                        if e.is_retryable() && attempt < retry.max_retries {
                            attempt += 1;
                            continue;
                        }
                        yield GenerationError::transient(attempt, e).to_string();
                        return;
                    }
                };

                // De-duplication state restarts with the stream; the
                // once-per-call thinking-finished guard does not.
                let mut last_content: Option<String> = None;
                let mut stream_error: Option<BackendError> = None;

                while let Some(event) = events.next().await {
                    if cancel.is_cancelled() {
                        tracing::debug!("Generation cancelled by caller");
                        return;
                    }

                    let event = match event {
                        Ok(event) => event,
                        Err(e) => {
                            stream_error = Some(e);
                            break;
                        }
                    };

                    match StreamDelta::classify(event, reasoning_model) {
                        StreamDelta::Reasoning(text) => {
                            saw_reasoning = true;
                            emit(StreamChunk::Reasoning(text));
                        }
                        StreamDelta::Content(text) => {
                            if saw_reasoning && !thinking_finished_sent {
                                thinking_finished_sent = true;
                                emit(StreamChunk::ThinkingFinished);
                            }
                            // Backends may repeat the final chunk.
                            if last_content.as_deref() == Some(text.as_str()) {
                                continue;
                            }
                            emit(StreamChunk::Content(text.clone()));
                            last_content = Some(text.clone());
                            yield text;
                        }
                        StreamDelta::Empty => {}
                    }
                }

                match stream_error {
                    None => return,
                    Some(e) if e.is_retryable() && attempt < retry.max_retries => {
                        tracing::warn!(error = %e, "Stream interrupted, restarting from the beginning");
                        attempt += 1;
                    }
                    Some(e) => {
                        yield GenerationError::transient(attempt, e).to_string();
                        return;
                    }
                }
            }
        })
    }
}
