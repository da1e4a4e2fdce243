//! Configuration management for NanoClaw
//!
//! Configuration is loaded from `~/.nanoclaw/config.json` with environment
//! variable overrides. There is no global instance: the loaded `Config` is
//! handed to the orchestrator, which passes sections down explicitly.

mod types;

pub use types::*;

use std::path::{Path, PathBuf};

use crate::error::{NanoError, Result};

impl Config {
    /// Returns the NanoClaw configuration directory path (~/.nanoclaw)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".nanoclaw")
    }

    /// Returns the path to the config file (~/.nanoclaw/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    /// Environment variables can override config values using the pattern:
    /// `NANOCLAW_SECTION_KEY`
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to the given path as pretty JSON.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NANOCLAW_AGENT_MODEL") {
            self.agent.model = val;
        }
        if let Ok(val) = std::env::var("NANOCLAW_AGENT_WORKSPACE") {
            self.agent.workspace = val;
        }
        if let Ok(val) = std::env::var("NANOCLAW_AGENT_MAX_ITERATIONS") {
            if let Ok(v) = val.parse() {
                self.agent.max_iterations = v;
            }
        }
        if let Ok(val) = std::env::var("NANOCLAW_CONTEXT_MAX_MESSAGES") {
            if let Ok(v) = val.parse() {
                self.context.max_messages_per_session = v;
            }
        }
        if let Ok(val) = std::env::var("NANOCLAW_CONTEXT_MAX_TOKENS") {
            if let Ok(v) = val.parse() {
                self.context.max_tokens_per_session = v;
            }
        }
        if let Ok(val) = std::env::var("NANOCLAW_DATA_DIR") {
            self.data_dir = val;
        }
        if let Ok(val) = std::env::var("NANOCLAW_LOG_LEVEL") {
            self.logging.level = val;
        }

        // Provider
        if let Ok(val) = std::env::var("NANOCLAW_PROVIDERS_OPENAI_API_KEY") {
            let provider = self
                .providers
                .openai
                .get_or_insert_with(ProviderConfig::default);
            provider.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("NANOCLAW_PROVIDERS_OPENAI_API_BASE") {
            let provider = self
                .providers
                .openai
                .get_or_insert_with(ProviderConfig::default);
            provider.api_base = Some(val);
        }
    }

    /// Reject settings the runtime cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_iterations == 0 {
            return Err(NanoError::Config(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if self.context.max_messages_per_session == 0 || self.context.max_tokens_per_session == 0
        {
            return Err(NanoError::Config(
                "context limits must be greater than zero".into(),
            ));
        }
        if self.bus.poll_interval_ms == 0 || self.subagents.poll_interval_ms == 0 {
            return Err(NanoError::Config(
                "poll intervals must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Workspace directory with `~` expanded.
    pub fn workspace_path(&self) -> PathBuf {
        expand_home(&self.agent.workspace)
    }

    /// Data directory with `~` expanded.
    pub fn data_path(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    /// Location of the persisted cron job list.
    pub fn cron_store_path(&self) -> PathBuf {
        match &self.cron.store_path {
            Some(path) => expand_home(path),
            None => self.data_path().join("cron").join("jobs.json"),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
