//! Shell tool for NanoClaw
//!
//! The `exec` tool runs a command through `sh -c` inside the workspace, with a
//! timeout, an output cap and a regex blocklist of destructive commands.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::process::Command;
use tracing::warn;

use crate::error::{NanoError, Result};

use super::{required_str, ToolContext, ToolDescriptor, ToolExecutor};

/// Default command timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Output beyond this many bytes is cut off.
pub const MAX_OUTPUT_BYTES: usize = 100_000;

const DEFAULT_BLOCKED_PATTERNS: &[&str] = &[
    // Recursive deletes of the filesystem root
    r"\brm\s+(-[a-zA-Z]*\s+)*-[a-zA-Z]*[rR][a-zA-Z]*\s+(-[a-zA-Z]*\s+)*/(\*|\s|$)",
    r"\bmkfs(\.|\s)",
    r"\bdd\s+if=/dev/",
    r">\s*/dev/sd",
    r"\bchmod\s+(-R\s+)?777\s+/(\s|$)",
    // Piping downloads into a shell
    r"\b(curl|wget)\b[^|]*\|\s*(ba|z)?sh\b",
    r"\bnc\s+-e\b",
    r"/dev/tcp/",
    // Credentials
    r"/etc/shadow",
    r"\.ssh/id_",
    r"\bsudo\b",
    // Fork bomb
    r":\(\)\s*\{\s*:\|:&\s*\};\s*:",
];

static DEFAULT_BLOCKLIST: Lazy<Vec<Regex>> = Lazy::new(|| {
    DEFAULT_BLOCKED_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

/// Runs shell commands in the workspace.
///
/// # Example
/// ```rust
/// use nanoclaw::tools::{ToolContext, ToolExecutor};
/// use nanoclaw::tools::shell::ExecTool;
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let tool = ExecTool::new();
/// let result = tool.execute(json!({"command": "echo hello"}), &ToolContext::new()).await;
/// assert_eq!(result.unwrap().trim(), "hello");
/// # });
/// ```
pub struct ExecTool {
    blocklist: Vec<Regex>,
    default_timeout: Duration,
}

impl ExecTool {
    /// Tool with the default blocklist and a 60 second timeout.
    pub fn new() -> Self {
        Self {
            blocklist: DEFAULT_BLOCKLIST.clone(),
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Adds a blocked pattern.
    ///
    /// # Errors
    /// Returns `NanoError::Config` if the pattern is not a valid regex.
    pub fn with_blocked_pattern(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| NanoError::Config(format!("Invalid blocked pattern '{}': {}", pattern, e)))?;
        self.blocklist.push(regex);
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new("exec", "Execute a shell command and return its output")
            .param("command", "string", "The shell command to execute", true)
            .param(
                "timeout",
                "integer",
                "Timeout in seconds (default: 60)",
                false,
            )
    }

    /// Rejects commands matching the blocklist.
    pub fn validate_command(&self, command: &str) -> Result<()> {
        match self.blocklist.iter().find(|re| re.is_match(command)) {
            Some(re) => {
                warn!(pattern = %re.as_str(), "Blocked shell command");
                Err(NanoError::Tool(
                    "Command blocked: matches a prohibited pattern".to_string(),
                ))
            }
            None => Ok(()),
        }
    }
}

impl Default for ExecTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Cuts `output` to [`MAX_OUTPUT_BYTES`] on a character boundary.
fn truncate_output(mut output: String) -> String {
    if output.len() <= MAX_OUTPUT_BYTES {
        return output;
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    output.truncate(end);
    output.push_str("\n\n[Output truncated - too large]");
    output
}

#[async_trait]
impl ToolExecutor for ExecTool {
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let command = required_str(&args, "command")?;
        self.validate_command(command)?;

        let timeout = args
            .get("timeout")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(workspace) = &ctx.workspace {
            cmd.current_dir(workspace);
        }

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                NanoError::Tool(format!("Command timed out after {}s", timeout.as_secs()))
            })?
            .map_err(|e| NanoError::Tool(format!("Command failed: {}", e)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            text.push_str(&stderr);
        }

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            if text.is_empty() {
                text = format!("[Command failed with exit code {}]", code);
            } else {
                text.push_str(&format!("\n[exit code: {}]", code));
            }
        }

        Ok(truncate_output(text))
    }
}
