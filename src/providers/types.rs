//! Provider types for NanoClaw
//!
//! This module defines the `LLMProvider` capability consumed by the agent loop
//! and the provider-neutral request/response types it exchanges.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::ContextMessage;
use crate::error::Result;

/// Definition of a tool that can be called by the LLM.
///
/// Tool definitions describe the available tools, their parameters,
/// and how the LLM should invoke them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// The name of the tool (must be unique)
    pub name: String,
    /// Human-readable description of what the tool does
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    ///
    /// # Example
    /// ```
    /// use nanoclaw::providers::ToolDefinition;
    /// use serde_json::json;
    ///
    /// let tool = ToolDefinition::new(
    ///     "web_search",
    ///     "Search the web for information",
    ///     json!({
    ///         "type": "object",
    ///         "properties": {
    ///             "query": { "type": "string", "description": "Search query" }
    ///         },
    ///         "required": ["query"]
    ///     }),
    /// );
    /// assert_eq!(tool.name, "web_search");
    /// ```
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// A tool call requested by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LLMToolCall {
    /// Provider-assigned call id (may be empty)
    pub id: String,
    /// Name of the tool to call
    pub name: String,
    /// Parsed arguments object
    pub arguments: Value,
}

impl LLMToolCall {
    pub fn new(id: &str, name: &str, arguments: Value) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }
}

/// Response from an LLM completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LLMResponse {
    /// The text content of the response
    pub content: String,
    /// Tool calls the LLM wants to make (empty for a final answer)
    pub tool_calls: Vec<LLMToolCall>,
    /// Total tokens reported by the provider, if any
    pub usage_tokens: Option<u32>,
}

impl LLMResponse {
    /// Create a text-only response.
    ///
    /// # Example
    /// ```
    /// use nanoclaw::providers::LLMResponse;
    ///
    /// let response = LLMResponse::text("Hello!");
    /// assert!(!response.has_tool_calls());
    /// ```
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            ..Self::default()
        }
    }

    /// Create a response carrying tool calls.
    pub fn with_tools(content: &str, tool_calls: Vec<LLMToolCall>) -> Self {
        Self {
            content: content.to_string(),
            tool_calls,
            usage_tokens: None,
        }
    }

    /// Attach a usage count.
    pub fn with_usage(mut self, tokens: u32) -> Self {
        self.usage_tokens = Some(tokens);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Capability for LLM providers (OpenAI-compatible endpoints, test doubles).
///
/// A provider is a stateless translator between the context transcript and a
/// vendor API. Any failure is reported as [`crate::error::NanoError::Provider`].
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Provider name for logs (e.g. "openai").
    fn name(&self) -> &str;

    /// Complete a conversation with tools available to the model.
    async fn complete_with_tools(
        &self,
        model: &str,
        history: &[ContextMessage],
        system_prompt: &str,
        tools: &[ToolDefinition],
    ) -> Result<LLMResponse>;

    /// Complete a conversation without tools.
    async fn complete(
        &self,
        model: &str,
        history: &[ContextMessage],
        system_prompt: &str,
    ) -> Result<LLMResponse> {
        self.complete_with_tools(model, history, system_prompt, &[])
            .await
    }

    /// Whether this provider can serve `model`.
    fn supports_model(&self, _model: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed;

    #[async_trait]
    impl LLMProvider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete_with_tools(
            &self,
            _model: &str,
            history: &[ContextMessage],
            _system_prompt: &str,
            tools: &[ToolDefinition],
        ) -> Result<LLMResponse> {
            Ok(LLMResponse::text(&format!(
                "{} messages, {} tools",
                history.len(),
                tools.len()
            )))
        }
    }

    #[tokio::test]
    async fn test_complete_defaults_to_no_tools() {
        let provider = Fixed;
        let history = vec![ContextMessage::user("hi")];
        let response = provider.complete("gpt-4", &history, "sys").await.unwrap();
        assert_eq!(response.content, "1 messages, 0 tools");
        assert!(provider.supports_model("anything"));
    }

    #[test]
    fn test_response_builders() {
        let call = LLMToolCall::new("call_1", "read_file", json!({"path": "a.txt"}));
        let response = LLMResponse::with_tools("", vec![call.clone()]).with_usage(42);
        assert!(response.has_tool_calls());
        assert_eq!(response.tool_calls[0], call);
        assert_eq!(response.usage_tokens, Some(42));
        assert!(!LLMResponse::text("done").has_tool_calls());
    }
}
