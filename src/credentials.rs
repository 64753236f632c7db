use std::collections::HashMap;

/// Provider -> API key lookup, sourced from the settings file's
/// `[providers]` table with an environment-variable fallback.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    providers: HashMap<String, String>,
}

impl CredentialStore {
    pub fn new(providers: HashMap<String, String>) -> Self {
        Self { providers }
    }

    /// API key for the given provider, or `None` when no non-empty key is
    /// configured. The fallback environment variable is the provider name
    /// upper-cased with an `_API_KEY` suffix, e.g. `DEEPSEEK_API_KEY`.
    pub fn key_for(&self, provider: &str) -> Option<String> {
        let configured = self
            .providers
            .get(provider)
            .map(|key| key.trim())
            .filter(|key| !key.is_empty())
            .map(str::to_string);

        configured.or_else(|| {
            let var = format!("{}_API_KEY", provider.to_uppercase().replace('-', "_"));
            std::env::var(var).ok().filter(|key| !key.trim().is_empty())
        })
    }
}
