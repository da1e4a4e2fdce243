//! Configuration type definitions for NanoClaw
//!
//! This module defines all configuration structs used throughout the runtime.
//! All types implement serde traits for JSON serialization and have sensible defaults.

use serde::{Deserialize, Serialize};

/// Main configuration struct for NanoClaw
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent loop settings (model, iteration cap, prompt, workspace)
    pub agent: AgentDefaults,
    /// Per-session context limits and sweep cadence
    pub context: ContextConfig,
    /// Message bus and event bus settings
    pub bus: BusConfig,
    /// Subagent manager settings
    pub subagents: SubagentConfig,
    /// Cron service settings
    pub cron: CronConfig,
    /// LLM provider configurations
    pub providers: ProvidersConfig,
    /// Logging output settings
    pub logging: LoggingConfig,
    /// Directory for runtime data (cron store, etc.)
    pub data_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent: AgentDefaults::default(),
            context: ContextConfig::default(),
            bus: BusConfig::default(),
            subagents: SubagentConfig::default(),
            cron: CronConfig::default(),
            providers: ProvidersConfig::default(),
            logging: LoggingConfig::default(),
            data_dir: "~/.nanoclaw/data".to_string(),
        }
    }
}

// ============================================================================
// Agent Configuration
// ============================================================================

/// Default system prompt handed to the model on every call.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are NanoClaw, a helpful AI assistant.\n\
You have access to various tools to help answer user questions.\n\
Use tools when appropriate, but explain your thinking clearly.\n\
Be concise and direct in your responses.";

/// Default agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefaults {
    /// Default model to use
    pub model: String,
    /// Maximum model-call rounds per `process` invocation
    pub max_iterations: u32,
    /// System prompt sent with every model call
    pub system_prompt: String,
    /// Workspace directory path
    pub workspace: String,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            max_iterations: 20,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            workspace: "~/.nanoclaw/workspace".to_string(),
        }
    }
}

// ============================================================================
// Context Configuration
// ============================================================================

/// Bounded conversation memory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Maximum messages kept per session
    pub max_messages_per_session: usize,
    /// Maximum estimated tokens kept per session
    pub max_tokens_per_session: usize,
    /// Seconds between idle-session sweeps
    pub sweep_interval_secs: u64,
    /// Sessions idle longer than this are evicted by the sweep
    pub max_session_age_secs: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_messages_per_session: 50,
            max_tokens_per_session: 8000,
            sweep_interval_secs: 600,
            max_session_age_secs: 3600,
        }
    }
}

// ============================================================================
// Bus Configuration
// ============================================================================

/// Message bus and event bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Dispatcher poll timeout in milliseconds
    pub poll_interval_ms: u64,
    /// Event ring log capacity
    pub event_log_capacity: usize,
    /// Events older than this are pruned from the ring log
    pub event_max_age_secs: u64,
    /// Seconds between event log prunes
    pub event_cleanup_interval_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            event_log_capacity: 1000,
            event_max_age_secs: 3600,
            event_cleanup_interval_secs: 300,
        }
    }
}

// ============================================================================
// Subagent Configuration
// ============================================================================

/// Subagent manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubagentConfig {
    /// Status poll interval for `wait_for_subagent`
    pub poll_interval_ms: u64,
    /// Finished subagents older than this are dropped by cleanup
    pub cleanup_max_age_secs: u64,
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            cleanup_max_age_secs: 3600,
        }
    }
}

// ============================================================================
// Cron Configuration
// ============================================================================

/// Cron service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    /// Whether the orchestrator starts the cron service
    pub enabled: bool,
    /// Job store path. Defaults to `<data_dir>/cron/jobs.json`.
    pub store_path: Option<String>,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_path: None,
        }
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// LLM provider configurations
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    /// OpenAI or any OpenAI-compatible endpoint
    pub openai: Option<ProviderConfig>,
}

/// Generic provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key
    pub api_key: Option<String>,
    /// Base URL override
    pub api_base: Option<String>,
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log output format
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable tracing output
    Pretty,
    /// Compact single-line output, filterable by `component`
    #[default]
    Component,
    /// JSON lines
    Json,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Default filter level when `RUST_LOG` is unset
    pub level: String,
    /// Optional file to append logs to
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: "info".to_string(),
            file: None,
        }
    }
}
