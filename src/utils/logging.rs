//! Logging initialization for NanoClaw.
//!
//! Supports three formats:
//! - `pretty`: default tracing pretty-print (human-readable, coloured)
//! - `component`: compact `[timestamp] [LEVEL] target message {fields}` lines;
//!   use the [`log_component!`] macro to add a `component` field for per-subsystem filtering
//! - `json`: structured JSON lines for log aggregators

use std::fs::{File, OpenOptions};
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{NanoError, Result};

/// Initialize the global tracing subscriber from config.
///
/// Call this once at startup before any tracing events are emitted. Without a
/// log file, output goes to stderr so command output on stdout stays clean.
/// `RUST_LOG` wins over `cfg.level` when set. Fails if the log file cannot
/// be opened or a global subscriber is already installed.
pub fn init_logging(cfg: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));
    let file = cfg.file.as_deref().map(open_log_file).transpose()?;

    let installed = match (&cfg.format, file) {
        (LogFormat::Json, Some(file)) => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(file)
            .try_init(),
        (LogFormat::Json, None) => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
        (LogFormat::Pretty, Some(file)) => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(file)
            .try_init(),
        (LogFormat::Pretty, None) => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
        // Component-tagged events come from `log_component!`, no custom layer needed.
        (LogFormat::Component, Some(file)) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_ansi(false)
            .compact()
            .with_writer(file)
            .try_init(),
        (LogFormat::Component, None) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .compact()
            .with_writer(std::io::stderr)
            .try_init(),
    };

    installed.map_err(|e| NanoError::Config(format!("failed to install logger: {}", e)))
}

fn open_log_file(path: &str) -> Result<Arc<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Arc::new(file))
}

/// Emit a component-tagged tracing event.
///
/// Works with any tracing level (`trace`, `debug`, `info`, `warn`, `error`).
/// The `component` field makes it easy to grep logs by subsystem:
///
/// ```
/// # use nanoclaw::log_component;
/// log_component!(info, "bus", "dispatcher started");
/// log_component!(warn, "context", "session pruned", session = "chat-1", dropped = 3usize);
/// ```
#[macro_export]
macro_rules! log_component {
    ($level:ident, $component:expr, $msg:expr) => {
        tracing::$level!(component = $component, $msg)
    };
    ($level:ident, $component:expr, $msg:expr, $($key:ident = $val:expr),+ $(,)?) => {
        tracing::$level!(component = $component, $($key = $val,)+ $msg)
    };
}
