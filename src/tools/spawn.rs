//! Background sub-task tools.
//!
//! `spawn` hands a task to the [`SubagentManager`] and returns at once with
//! the subagent id; `subagent_status` lets the model check on it later.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::{IsolationLevel, SubagentManager, SubagentStatus};
use crate::error::{NanoError, Result};

use super::{required_str, ToolContext, ToolDescriptor, ToolExecutor};

/// System prompt used when the model does not supply one.
pub const SUBAGENT_SYSTEM_PROMPT: &str = "You are a focused background worker. \
Complete the task you are given and reply with the result only.";

/// Tool to spawn a background delegated task.
pub struct SpawnTool {
    manager: Arc<SubagentManager>,
    default_model: String,
}

impl SpawnTool {
    pub fn new(manager: Arc<SubagentManager>, default_model: &str) -> Self {
        Self {
            manager,
            default_model: default_model.to_string(),
        }
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            "spawn",
            "Delegate a task to a background subagent. Returns the subagent id immediately.",
        )
        .param("task", "string", "Task description for delegated execution", true)
        .param("system_prompt", "string", "Optional system prompt for the subagent", false)
        .param("model", "string", "Optional model override", false)
        .param(
            "isolated",
            "boolean",
            "Run without access to shared state (default: false)",
            false,
        )
    }
}

#[async_trait]
impl ToolExecutor for SpawnTool {
    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String> {
        let task = required_str(&args, "task")?;
        if task.trim().is_empty() {
            return Err(NanoError::Tool("Task must not be empty".into()));
        }
        let system_prompt = args
            .get("system_prompt")
            .and_then(Value::as_str)
            .unwrap_or(SUBAGENT_SYSTEM_PROMPT);
        let model = args
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.default_model);
        let isolation = if args.get("isolated").and_then(Value::as_bool).unwrap_or(false) {
            IsolationLevel::Isolated
        } else {
            IsolationLevel::Shared
        };

        let id = self
            .manager
            .create_subagent(task, system_prompt, model, isolation);
        Ok(json!({"subagent_id": id, "status": "pending"}).to_string())
    }
}

/// Reports a subagent's status and, once finished, its result or error.
pub struct SubagentStatusTool {
    manager: Arc<SubagentManager>,
}

impl SubagentStatusTool {
    pub fn new(manager: Arc<SubagentManager>) -> Self {
        Self { manager }
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new("subagent_status", "Check the status of a background subagent")
            .param("subagent_id", "string", "Id returned by spawn", true)
    }
}

#[async_trait]
impl ToolExecutor for SubagentStatusTool {
    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String> {
        let id = required_str(&args, "subagent_id")?;
        let subagent = self
            .manager
            .get_subagent(id)
            .ok_or_else(|| NanoError::Tool(format!("Unknown subagent: {}", id)))?;

        let mut report = json!({
            "subagent_id": subagent.id,
            "status": subagent.status,
            "duration_ms": subagent.duration_ms(),
        });
        match subagent.status {
            SubagentStatus::Completed => report["result"] = json!(subagent.result),
            SubagentStatus::Failed => report["error"] = json!(subagent.error),
            _ => {}
        }
        Ok(report.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::SubagentExecutor;
    use std::time::Duration;

    struct Upper;

    #[async_trait]
    impl SubagentExecutor for Upper {
        async fn execute(&self, task: &str, _sp: &str, model: &str) -> Result<String> {
            Ok(format!("{}:{}", model, task.to_uppercase()))
        }
    }

    fn manager() -> Arc<SubagentManager> {
        Arc::new(SubagentManager::new(Arc::new(Upper)).with_poll_interval(Duration::from_millis(5)))
    }

    #[tokio::test]
    async fn test_spawn_returns_id_and_runs() {
        let manager = manager();
        let tool = SpawnTool::new(manager.clone(), "gpt-4");

        let out = tool
            .execute(json!({"task": "summarize"}), &ToolContext::new())
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        let id = parsed["subagent_id"].as_str().unwrap();
        assert_eq!(id, "sub_1");

        let result = manager
            .wait_for_subagent(id, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result, "gpt-4:SUMMARIZE");
    }

    #[tokio::test]
    async fn test_spawn_requires_task() {
        let tool = SpawnTool::new(manager(), "gpt-4");
        let err = tool.execute(json!({}), &ToolContext::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing required argument: task");
    }

    #[tokio::test]
    async fn test_status_reports_result() {
        let manager = manager();
        let id = manager.create_subagent("x", "sp", "m", IsolationLevel::Isolated);
        manager
            .wait_for_subagent(&id, Duration::from_secs(1))
            .await
            .unwrap();

        let tool = SubagentStatusTool::new(manager);
        let out = tool
            .execute(json!({"subagent_id": id}), &ToolContext::new())
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["status"], "completed");
        assert_eq!(parsed["result"], "m:X");

        let err = tool
            .execute(json!({"subagent_id": "sub_42"}), &ToolContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown subagent: sub_42");
    }
}
