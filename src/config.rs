use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Model-name markers for families that stream chain-of-thought
/// ("reasoning") deltas alongside the final answer.
const REASONING_MARKERS: &[&str] = &["R1", "reasoner"];

/// Model-name markers for families that reject the `response_format`
/// parameter unless it requests JSON output.
const JSON_ONLY_RESPONSE_FORMAT_MARKERS: &[&str] = &["glm"];

/// Configuration for one model profile.
///
/// Owned by the composition root and shared with the client as
/// [`SharedConfig`]; a settings panel may mutate it between calls and the
/// change takes effect on the next generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub provider: String,
    /// Display name, e.g. "DeepSeek-R1". Family detection checks this
    /// first because providers reuse generic model ids across families.
    pub name: String,
    pub base_url: String,
    pub model: String,
    pub context_window: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    1.0
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            name: "DeepSeek-V3".to_string(),
            base_url: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            context_window: 65_536,
            temperature: default_temperature(),
            top_p: default_top_p(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_tokens: default_max_tokens(),
            response_format: None,
            stream: true,
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    /// Whether the configured model emits reasoning deltas that must be
    /// kept out of the final answer. Substring match against known family
    /// markers; checks the display name first, then the model id.
    pub fn is_reasoning_model(&self) -> bool {
        REASONING_MARKERS
            .iter()
            .any(|marker| self.name.contains(marker) || self.model.contains(marker))
    }

    /// Whether the configured model accepts the given `response_format`
    /// value. Some families reject the parameter outright unless it
    /// requests JSON, so the client omits it for them otherwise.
    pub fn accepts_response_format(&self, format: &str) -> bool {
        let json_only = JSON_ONLY_RESPONSE_FORMAT_MARKERS.iter().any(|marker| {
            self.name.to_lowercase().contains(marker) || self.model.to_lowercase().contains(marker)
        });

        !json_only || format == "json_object"
    }
}

/// Configuration shared between the composition root (which may mutate it
/// via a settings surface) and the client (which snapshots it per call).
pub type SharedConfig = Arc<RwLock<GenerationConfig>>;

pub fn shared(config: GenerationConfig) -> SharedConfig {
    Arc::new(RwLock::new(config))
}

/// On-disk settings: named model profiles plus per-provider API keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub active_profile: Option<String>,

    #[serde(default)]
    pub profiles: HashMap<String, GenerationConfig>,

    /// Provider name -> API key.
    #[serde(default)]
    pub providers: HashMap<String, String>,

    #[serde(default)]
    pub retry: RetrySettings,
}

/// Retry knobs for transient HTTP failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub initial_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Resolve the profile to use: an explicit override, the file's
    /// `active_profile`, or defaults when neither names a known profile.
    pub fn resolve_profile(&self, override_name: Option<&str>) -> GenerationConfig {
        override_name
            .or(self.active_profile.as_deref())
            .and_then(|name| self.profiles.get(name))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = GenerationConfig::default();
        assert_eq!(config.provider, "deepseek");
        assert_eq!(config.context_window, 65_536);
        assert_eq!(config.max_tokens, 4096);
        assert!(config.stream);
        assert!(config.response_format.is_none());
    }

    #[test]
    fn test_reasoning_family_detection() {
        let mut config = GenerationConfig::default();
        assert!(!config.is_reasoning_model());

        config.name = "DeepSeek-R1".to_string();
        assert!(config.is_reasoning_model());

        config.name = "Custom".to_string();
        config.model = "deepseek-reasoner".to_string();
        assert!(config.is_reasoning_model());

        config.model = "qwen-max".to_string();
        assert!(!config.is_reasoning_model());
    }

    #[test]
    fn test_response_format_compatibility() {
        let mut config = GenerationConfig::default();
        assert!(config.accepts_response_format("text"));
        assert!(config.accepts_response_format("json_object"));

        config.model = "glm-4-plus".to_string();
        assert!(!config.accepts_response_format("text"));
        assert!(config.accepts_response_format("json_object"));
    }

    #[test]
    fn test_load_settings() {
        let toml_content = r#"
active_profile = "chat"

[profiles.chat]
provider = "deepseek"
name = "DeepSeek-V3"
base_url = "https://api.deepseek.com/v1"
model = "deepseek-chat"
context_window = 65536
temperature = 0.8

[profiles.reasoner]
provider = "deepseek"
name = "DeepSeek-R1"
base_url = "https://api.deepseek.com/v1"
model = "deepseek-reasoner"
context_window = 65536

[providers]
deepseek = "sk-test"

[retry]
max_retries = 2
"#;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.profiles.len(), 2);
        assert_eq!(settings.providers.get("deepseek").unwrap(), "sk-test");
        assert_eq!(settings.retry.max_retries, 2);
        assert_eq!(settings.retry.initial_delay_ms, 1000);

        let active = settings.resolve_profile(None);
        assert_eq!(active.model, "deepseek-chat");
        assert_eq!(active.temperature, 0.8);

        let reasoner = settings.resolve_profile(Some("reasoner"));
        assert!(reasoner.is_reasoning_model());

        let fallback = settings.resolve_profile(Some("missing"));
        assert_eq!(fallback.model, GenerationConfig::default().model);
    }
}
