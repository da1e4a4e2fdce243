//! Error types for NanoClaw
//!
//! This module defines the error taxonomy used throughout the runtime.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.
//!
//! Propagation rules:
//! - `Tool` errors are recovered by the agent loop and shown to the model.
//! - `Provider` errors and `ResourceExhausted` end a single `process` call,
//!   which turns them into its string result.
//! - Bus handler errors are logged at the dispatch site.

use thiserror::Error;

/// The primary error type for NanoClaw operations.
#[derive(Error, Debug)]
pub enum NanoError {
    /// Configuration-related errors (invalid config, bad schedule expressions, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A lookup by identifier found nothing (tool, subagent, thought, job).
    #[error("Unknown {kind}: {id}")]
    UnknownEntity {
        /// Entity kind, e.g. "tool" or "subagent"
        kind: &'static str,
        /// The identifier that was looked up
        id: String,
    },

    /// The entity exists but is in the wrong lifecycle state for the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// LLM provider or external API failures.
    #[error("Provider error: {0}")]
    Provider(String),

    /// A tool's own reported failure. The message is passed through verbatim.
    #[error("{0}")]
    Tool(String),

    /// A cap was reached (iteration cap, thinking step cap).
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A wait exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A subagent finished in the failed state; carries the recorded error.
    #[error("Subagent failed: {0}")]
    SubagentFailed(String),

    /// Message bus queue closed unexpectedly
    #[error("Bus error: channel closed")]
    BusClosed,

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl NanoError {
    /// Shorthand for an [`NanoError::UnknownEntity`] error.
    pub fn unknown(kind: &'static str, id: impl Into<String>) -> Self {
        NanoError::UnknownEntity {
            kind,
            id: id.into(),
        }
    }
}

/// A specialized `Result` type for NanoClaw operations.
pub type Result<T> = std::result::Result<T, NanoError>;
