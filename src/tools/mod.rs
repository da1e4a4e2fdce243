//! Tools module - Tool definitions and execution for LLM function calling
//!
//! This module provides the catalog and dispatcher for the capabilities the
//! model can invoke during a conversation.
//!
//! # Overview
//!
//! - `ToolDescriptor`: what the model sees (name, description, parameters)
//! - `ToolExecutor` trait: what runs when the model calls the tool
//! - `ToolContext`: execution context (workspace, session, channel, chat_id)
//! - `ToolRegistry`: name-keyed catalog that dispatches calls
//!
//! # Built-in Tools
//!
//! - `EchoTool`: Simple echo tool for testing
//! - `ReadFileTool`, `WriteFileTool`, `EditFileTool`, `ListDirTool`: workspace files
//! - `ExecTool`: Execute shell commands
//! - `SpawnTool`, `SubagentStatusTool`: background subagents
//!
//! # Example
//!
//! ```rust
//! use nanoclaw::tools::{register_builtin_tools, ToolContext, ToolRegistry};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let registry = ToolRegistry::new();
//! register_builtin_tools(&registry);
//!
//! let result = registry
//!     .execute("echo", json!({"message": "Hello!"}), &ToolContext::new())
//!     .await;
//! assert_eq!(result.unwrap(), "Hello!");
//! assert!(registry.has("exec"));
//! # });
//! ```

pub mod filesystem;
mod registry;
pub mod shell;
pub mod spawn;
mod types;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::SubagentManager;
use crate::error::Result;

pub use registry::ToolRegistry;
pub use types::{
    executor_fn, required_str, FnExecutor, ToolContext, ToolDescriptor, ToolExecutor, ToolParam,
};

/// Echoes back the provided message. Useful for exercising the tool path.
pub struct EchoTool;

impl EchoTool {
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new("echo", "Echoes back the provided message").param(
            "message",
            "string",
            "The message to echo",
            true,
        )
    }
}

#[async_trait]
impl ToolExecutor for EchoTool {
    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String> {
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)");
        Ok(message.to_string())
    }
}

/// Registers the echo, filesystem and shell tools.
pub fn register_builtin_tools(registry: &ToolRegistry) {
    registry.register(EchoTool::descriptor(), Arc::new(EchoTool));
    registry.register(
        filesystem::ReadFileTool::descriptor(),
        Arc::new(filesystem::ReadFileTool),
    );
    registry.register(
        filesystem::WriteFileTool::descriptor(),
        Arc::new(filesystem::WriteFileTool),
    );
    registry.register(
        filesystem::EditFileTool::descriptor(),
        Arc::new(filesystem::EditFileTool),
    );
    registry.register(
        filesystem::ListDirTool::descriptor(),
        Arc::new(filesystem::ListDirTool),
    );
    registry.register(shell::ExecTool::descriptor(), Arc::new(shell::ExecTool::new()));
}

/// Registers `spawn` and `subagent_status` backed by `manager`.
pub fn register_subagent_tools(
    registry: &ToolRegistry,
    manager: &Arc<SubagentManager>,
    default_model: &str,
) {
    registry.register(
        spawn::SpawnTool::descriptor(),
        Arc::new(spawn::SpawnTool::new(Arc::clone(manager), default_model)),
    );
    registry.register(
        spawn::SubagentStatusTool::descriptor(),
        Arc::new(spawn::SubagentStatusTool::new(Arc::clone(manager))),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo_tool() {
        let result = EchoTool
            .execute(json!({"message": "Hello"}), &ToolContext::new())
            .await;
        assert_eq!(result.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn test_echo_tool_no_message() {
        let result = EchoTool.execute(json!({}), &ToolContext::new()).await;
        assert_eq!(result.unwrap(), "(no message)");
    }

    #[test]
    fn test_register_builtin_tools() {
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry);
        assert_eq!(
            registry.names(),
            vec!["echo", "edit_file", "exec", "list_dir", "read_file", "write_file"]
        );
        assert!(registry.descriptor("read_file").unwrap().requires_workspace);
        assert!(!registry.descriptor("exec").unwrap().requires_workspace);
    }
}
