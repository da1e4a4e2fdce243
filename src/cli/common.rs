//! Shared helpers for CLI commands.

use anyhow::{Context, Result};

use nanoclaw::config::Config;
use nanoclaw::Orchestrator;

/// Loads the configuration file (or defaults) with env overrides applied.
pub(crate) fn load_config() -> Result<Config> {
    Config::load().with_context(|| format!("Failed to load configuration from {:?}", Config::path()))
}

/// Builds the runtime and warns when no LLM provider is configured.
pub(crate) async fn build_orchestrator(config: Config) -> Result<Orchestrator> {
    let orchestrator = Orchestrator::new(config)
        .await
        .with_context(|| "Failed to assemble runtime")?;

    if !orchestrator.agent().has_provider().await {
        eprintln!("Warning: No LLM provider configured. Set NANOCLAW_PROVIDERS_OPENAI_API_KEY");
        eprintln!("or add providers.openai.api_key to {:?}", Config::path());
        eprintln!();
    }
    Ok(orchestrator)
}
