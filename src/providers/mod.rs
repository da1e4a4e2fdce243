//! Providers module - LLM completion capability
//!
//! The agent loop talks to models only through the [`LLMProvider`] trait.
//! The bundled adapter speaks the OpenAI Chat Completions API, which also
//! covers OpenAI-compatible vendors through `providers.openai.api_base`.

pub mod openai;
mod types;

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;

pub use openai::OpenAIProvider;
pub use types::{LLMProvider, LLMResponse, LLMToolCall, ToolDefinition};

/// Builds the configured provider, if any.
///
/// Returns `None` when no API key is configured; the agent loop then answers
/// every request with a "No LLM provider configured" error string.
pub fn from_config(config: &Config) -> Option<Arc<dyn LLMProvider>> {
    let openai = config.providers.openai.as_ref()?;
    let api_key = openai.api_key.as_deref().filter(|k| !k.trim().is_empty());
    let Some(api_key) = api_key else {
        warn!("providers.openai is present but has no api_key");
        return None;
    };

    let provider = match openai.api_base.as_deref() {
        Some(base) if !base.trim().is_empty() => OpenAIProvider::with_base_url(api_key, base),
        _ => OpenAIProvider::new(api_key),
    };
    info!(provider = "openai", api_base = %provider.api_base(), "LLM provider configured");
    Some(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    #[test]
    fn test_from_config_without_provider() {
        assert!(from_config(&Config::default()).is_none());
    }

    #[test]
    fn test_from_config_requires_key() {
        let mut config = Config::default();
        config.providers.openai = Some(ProviderConfig {
            api_key: Some("  ".into()),
            api_base: None,
        });
        assert!(from_config(&config).is_none());
    }

    #[test]
    fn test_from_config_with_key() {
        let mut config = Config::default();
        config.providers.openai = Some(ProviderConfig {
            api_key: Some("sk-test".into()),
            api_base: Some("http://localhost:11434/v1".into()),
        });
        let provider = from_config(&config).unwrap();
        assert_eq!(provider.name(), "openai");
    }
}
