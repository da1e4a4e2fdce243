//! Tool registry for NanoClaw
//!
//! This module provides the `ToolRegistry`: a name-keyed catalog of tool
//! descriptors and executors plus the dispatcher the agent loop calls.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{error, info};

use crate::error::{NanoError, Result};
use crate::providers::ToolDefinition;

use super::{ToolContext, ToolDescriptor, ToolExecutor};

/// Descriptor and executor stored as one entry, so a lookup never sees one
/// without the other.
struct RegisteredTool {
    descriptor: ToolDescriptor,
    executor: Arc<dyn ToolExecutor>,
}

/// A registry that holds and dispatches tools.
///
/// The registry is shared behind an `Arc`; registration and lookup take
/// `&self`.
///
/// # Example
///
/// ```rust
/// use nanoclaw::tools::{executor_fn, ToolContext, ToolDescriptor, ToolRegistry};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let registry = ToolRegistry::new();
/// registry.register(
///     ToolDescriptor::new("echo", "Echo a message").param("message", "string", "Text", true),
///     executor_fn(|args, _ctx| async move {
///         Ok(args["message"].as_str().unwrap_or_default().to_string())
///     }),
/// );
///
/// let result = registry
///     .execute("echo", json!({"message": "hello"}), &ToolContext::new())
///     .await;
/// assert_eq!(result.unwrap(), "hello");
/// # });
/// ```
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<RegisteredTool>>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool, replacing any previous registration of the same name.
    pub fn register(&self, descriptor: ToolDescriptor, executor: Arc<dyn ToolExecutor>) {
        let name = descriptor.name.clone();
        info!(tool = %name, "Registering tool");
        let entry = Arc::new(RegisteredTool {
            descriptor,
            executor,
        });
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, entry);
    }

    /// Remove a tool. Returns whether it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    fn entry(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Execute a tool by name.
    ///
    /// # Errors
    /// - `UnknownEntity` if no tool has this name
    /// - `InvalidState` if the tool needs a workspace and `ctx` has none
    /// - whatever the executor returns, unchanged
    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> Result<String> {
        let tool = self
            .entry(name)
            .ok_or_else(|| NanoError::unknown("tool", name))?;

        if tool.descriptor.requires_workspace && ctx.workspace.is_none() {
            return Err(NanoError::InvalidState(format!(
                "Tool '{}' requires a workspace",
                name
            )));
        }

        let start = Instant::now();
        match tool.executor.execute(args, ctx).await {
            Ok(output) => {
                info!(
                    tool = name,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Tool executed successfully"
                );
                Ok(output)
            }
            Err(e) => {
                error!(
                    tool = name,
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Tool execution failed"
                );
                Err(e)
            }
        }
    }

    /// Descriptor of one tool.
    pub fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.entry(name).map(|t| t.descriptor.clone())
    }

    /// All descriptors, sorted by name.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut list: Vec<ToolDescriptor> = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|t| t.descriptor.clone())
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Provider-facing definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.descriptors()
            .into_iter()
            .map(|d| ToolDefinition {
                parameters: d.parameters_schema(),
                name: d.name,
                description: d.description,
            })
            .collect()
    }

    /// The catalog in function-calling form:
    /// `[{"type": "function", "function": {name, description, parameters}}]`.
    pub fn tools_for_llm(&self) -> Value {
        Value::Array(
            self.definitions()
                .into_iter()
                .map(|d| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": d.name,
                            "description": d.description,
                            "parameters": d.parameters,
                        }
                    })
                })
                .collect(),
        )
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
