//! Tool types for NanoClaw
//!
//! A tool is split into a declarative [`ToolDescriptor`] (what the model sees)
//! and a [`ToolExecutor`] capability (what runs). The registry stores the two
//! together under the tool's name.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{NanoError, Result};

/// One named parameter in a tool's schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolParam {
    pub name: String,
    /// JSON schema type ("string", "integer", "boolean", ...)
    pub param_type: String,
    pub description: String,
    pub required: bool,
}

/// Declarative description of a tool.
///
/// # Example
/// ```
/// use nanoclaw::tools::ToolDescriptor;
///
/// let desc = ToolDescriptor::new("read_file", "Read a file from the workspace")
///     .param("path", "string", "Path relative to the workspace", true)
///     .requires_workspace();
///
/// assert_eq!(desc.required_params(), vec!["path"]);
/// assert!(desc.requires_workspace);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// Parameters in declaration order
    pub params: Vec<ToolParam>,
    pub requires_workspace: bool,
}

impl ToolDescriptor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params: Vec::new(),
            requires_workspace: false,
        }
    }

    /// Appends a parameter (builder pattern).
    pub fn param(mut self, name: &str, param_type: &str, description: &str, required: bool) -> Self {
        self.params.push(ToolParam {
            name: name.to_string(),
            param_type: param_type.to_string(),
            description: description.to_string(),
            required,
        });
        self
    }

    /// Marks the tool as needing a workspace directory.
    pub fn requires_workspace(mut self) -> Self {
        self.requires_workspace = true;
        self
    }

    pub fn required_params(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect()
    }

    /// JSON-schema object for the parameters.
    pub fn parameters_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    json!({"type": p.param_type, "description": p.description}),
                )
            })
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required_params(),
        })
    }
}

/// Execution context handed to every executor.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Workspace directory for file and shell operations
    pub workspace: Option<PathBuf>,
    /// Session key of the calling conversation
    pub session_id: Option<String>,
    /// Originating channel (e.g. "telegram", "cli")
    pub channel: Option<String>,
    pub chat_id: Option<String>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the workspace directory.
    ///
    /// # Example
    /// ```
    /// use nanoclaw::tools::ToolContext;
    ///
    /// let ctx = ToolContext::new().with_workspace("/home/user/project");
    /// assert!(ctx.workspace.is_some());
    /// ```
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn with_channel(mut self, channel: &str, chat_id: &str) -> Self {
        self.channel = Some(channel.to_string());
        self.chat_id = Some(chat_id.to_string());
        self
    }
}

/// The runnable half of a tool.
///
/// Failures are reported with [`NanoError::Tool`]; the registry passes them
/// through untouched.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String>;
}

/// Adapter turning an async closure into a [`ToolExecutor`].
pub struct FnExecutor<F>(F);

#[async_trait]
impl<F, Fut> ToolExecutor for FnExecutor<F>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send,
{
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        (self.0)(args, ctx.clone()).await
    }
}

/// Wraps an async closure as a shareable executor.
///
/// # Example
/// ```
/// use nanoclaw::tools::{executor_fn, ToolContext};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let echo = executor_fn(|args, _ctx| async move {
///     Ok(args["message"].as_str().unwrap_or_default().to_string())
/// });
/// let out = echo.execute(json!({"message": "hi"}), &ToolContext::new()).await;
/// assert_eq!(out.unwrap(), "hi");
/// # });
/// ```
pub fn executor_fn<F, Fut>(f: F) -> Arc<dyn ToolExecutor>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    Arc::new(FnExecutor(f))
}

/// Reads a required string argument.
pub fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| NanoError::Tool(format!("Missing required argument: {}", key)))
}
