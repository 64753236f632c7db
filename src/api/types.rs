use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    #[allow(dead_code)]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub max_tokens: u32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
    #[serde(rename = "finish_reason", default)]
    pub _finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatResponse {
    /// Completion text of the first choice. Empty when the backend returned
    /// no choices or a null content; never panics.
    pub fn text(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default()
    }
}

/// One parsed SSE payload from a streaming completion.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStreamEvent {
    #[serde(default)]
    pub choices: Vec<RawStreamChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStreamChoice {
    #[serde(default)]
    pub delta: RawDelta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

/// Classified stream delta, produced at the boundary from the backend's
/// loosely-typed events so the demux loop only sees tagged variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    Reasoning(String),
    Content(String),
    Empty,
}

impl StreamDelta {
    /// Classify one raw event. Reasoning is recognized only when the
    /// configured model belongs to a reasoning family; other models may
    /// reuse the field for unrelated payloads and it is ignored for them.
    pub fn classify(event: RawStreamEvent, reasoning_model: bool) -> Self {
        let Some(choice) = event.choices.into_iter().next() else {
            return StreamDelta::Empty;
        };

        if reasoning_model {
            if let Some(reasoning) = choice.delta.reasoning_content {
                if !reasoning.is_empty() {
                    return StreamDelta::Reasoning(reasoning);
                }
            }
        }

        match choice.delta.content {
            Some(content) if !content.is_empty() => StreamDelta::Content(content),
            _ => StreamDelta::Empty,
        }
    }
}

/// Payload delivered to the caller's per-chunk callback.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Incremental fragment of the final answer.
    Content(String),
    /// Chain-of-thought fragment; never part of the yielded answer.
    Reasoning(String),
    /// Emitted once when the model transitions from reasoning to answer.
    ThinkingFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    MissingCredential,
    Auth,
    Transient,
    Parse,
}

/// Failure of a generation call, carried in-band rather than raised: the
/// message is written to be rendered directly in an output pane, while
/// `kind` lets programmatic callers branch without string matching.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn missing_credential(provider: &str) -> Self {
        let var = format!("{}_API_KEY", provider.to_uppercase().replace('-', "_"));
        Self {
            kind: GenerationErrorKind::MissingCredential,
            message: format!(
                "No API key configured for provider '{}'. \
                 Add one to the [providers] table in quillgen.toml or set {}.",
                provider, var
            ),
        }
    }

    pub fn auth(status: u16, provider: &str, model: &str, base_url: &str) -> Self {
        Self {
            kind: GenerationErrorKind::Auth,
            message: format!(
                "Authentication failed (HTTP {}). Please check:\n  \
                 1. The API key for '{}' is valid and has not expired\n  \
                 2. The key matches the configured provider and model ({})\n  \
                 3. The base URL is correct for this provider: {}",
                status, provider, model, base_url
            ),
        }
    }

    pub fn transient(attempts: u32, detail: impl std::fmt::Display) -> Self {
        Self {
            kind: GenerationErrorKind::Transient,
            message: format!(
                "Request failed after {} attempt(s): {}. \
                 This is usually a temporary network issue; please try again.",
                attempts, detail
            ),
        }
    }

    pub fn parse(detail: impl std::fmt::Display) -> Self {
        Self {
            kind: GenerationErrorKind::Parse,
            message: format!("Failed to parse the API response: {}", detail),
        }
    }
}

impl std::fmt::Display for GenerationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for GenerationError {}
