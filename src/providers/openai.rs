//! OpenAI Provider Implementation
//!
//! This module implements the `LLMProvider` trait for the Chat Completions API
//! and any OpenAI-compatible endpoint (DeepSeek, Qwen, local servers) reachable
//! through a custom base URL.
//!
//! # Example
//!
//! ```rust,ignore
//! use nanoclaw::agent::ContextMessage;
//! use nanoclaw::providers::{openai::OpenAIProvider, LLMProvider};
//!
//! async fn example() {
//!     let provider = OpenAIProvider::new("your-api-key");
//!     let history = vec![ContextMessage::user("Hello!")];
//!
//!     let response = provider
//!         .complete("gpt-4", &history, "You are a helpful assistant.")
//!         .await
//!         .unwrap();
//!
//!     println!("OpenAI: {}", response.content);
//! }
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::agent::{ContextMessage, Role};
use crate::error::{NanoError, Result};

use super::{LLMProvider, LLMResponse, LLMToolCall, ToolDefinition};

/// The OpenAI API endpoint URL.
const OPENAI_API_URL: &str = "https://api.openai.com/v1";

// ============================================================================
// OpenAI API Request Types
// ============================================================================

/// OpenAI API request body.
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    /// Model identifier
    model: String,
    /// Conversation messages (system prompt first)
    messages: Vec<OpenAIMessage>,
    /// Available tools
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    /// "auto" whenever tools are offered
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

/// A message in OpenAI's format.
#[derive(Debug, Serialize, PartialEq)]
struct OpenAIMessage {
    /// Role: "system", "user" or "assistant"
    role: String,
    content: String,
}

/// OpenAI tool definition.
#[derive(Debug, Serialize)]
struct OpenAITool {
    /// Type of tool (always "function")
    r#type: String,
    function: OpenAIFunctionDef,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

// ============================================================================
// OpenAI API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    /// Text content (may be null if tool_calls present)
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCallResponse>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCallResponse {
    #[serde(default)]
    id: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    /// JSON-encoded arguments
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
    #[serde(default)]
    r#type: String,
}

// ============================================================================
// OpenAI Provider
// ============================================================================

/// OpenAI-compatible LLM provider.
pub struct OpenAIProvider {
    /// API key for authentication
    api_key: String,
    /// API base URL without trailing slash
    api_base: String,
    client: Client,
}

impl OpenAIProvider {
    /// Create a provider for the default OpenAI endpoint.
    ///
    /// # Example
    /// ```
    /// use nanoclaw::providers::openai::OpenAIProvider;
    /// use nanoclaw::providers::LLMProvider;
    ///
    /// let provider = OpenAIProvider::new("sk-xxx");
    /// assert_eq!(provider.name(), "openai");
    /// ```
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, OPENAI_API_URL)
    }

    /// Create a provider for an OpenAI-compatible endpoint.
    ///
    /// # Example
    /// ```
    /// use nanoclaw::providers::openai::OpenAIProvider;
    ///
    /// let provider = OpenAIProvider::with_base_url("sk-xxx", "https://api.deepseek.com/v1/");
    /// assert_eq!(provider.api_base(), "https://api.deepseek.com/v1");
    /// ```
    pub fn with_base_url(api_key: &str, api_base: &str) -> Self {
        Self::with_client(api_key, api_base, Client::new())
    }

    /// Create a provider with a preconfigured HTTP client (timeouts, proxies).
    pub fn with_client(api_key: &str, api_base: &str, client: Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

// ============================================================================
// Conversion Functions
// ============================================================================

/// Build the message list: system prompt first, then the transcript.
///
/// Context `tool` messages carry no call id, so they are sent as user
/// messages prefixed with `Tool result:`.
fn convert_messages(system_prompt: &str, history: &[ContextMessage]) -> Vec<OpenAIMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if !system_prompt.is_empty() {
        messages.push(OpenAIMessage {
            role: "system".to_string(),
            content: system_prompt.to_string(),
        });
    }
    for msg in history {
        let (role, content) = match msg.role {
            Role::System => ("system", msg.content.clone()),
            Role::User => ("user", msg.content.clone()),
            Role::Assistant => ("assistant", msg.content.clone()),
            Role::Tool => ("user", format!("Tool result: {}", msg.content)),
        };
        messages.push(OpenAIMessage {
            role: role.to_string(),
            content,
        });
    }
    messages
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<OpenAITool> {
    tools
        .iter()
        .map(|t| OpenAITool {
            r#type: "function".to_string(),
            function: OpenAIFunctionDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        })
        .collect()
}

/// Malformed argument strings are passed through as a JSON string so the
/// tool reports the problem to the model.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn convert_response(response: OpenAIResponse) -> LLMResponse {
    let (content, tool_calls) = match response.choices.into_iter().next() {
        Some(c) => {
            let tool_calls = c
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| {
                    LLMToolCall::new(
                        &tc.id,
                        &tc.function.name,
                        parse_arguments(&tc.function.arguments),
                    )
                })
                .collect();
            (c.message.content.unwrap_or_default(), tool_calls)
        }
        None => (String::new(), Vec::new()),
    };

    LLMResponse {
        content,
        tool_calls,
        usage_tokens: response.usage.map(|u| u.total_tokens),
    }
}

// ============================================================================
// LLMProvider Implementation
// ============================================================================

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete_with_tools(
        &self,
        model: &str,
        history: &[ContextMessage],
        system_prompt: &str,
        tools: &[ToolDefinition],
    ) -> Result<LLMResponse> {
        let (tools, tool_choice) = if tools.is_empty() {
            (None, None)
        } else {
            (Some(convert_tools(tools)), Some("auto".to_string()))
        };
        let request = OpenAIRequest {
            model: model.to_string(),
            messages: convert_messages(system_prompt, history),
            tools,
            tool_choice,
        };

        debug!(model = %model, messages = request.messages.len(), "OpenAI request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| NanoError::Provider(format!("OpenAI request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if let Ok(error_response) = serde_json::from_str::<OpenAIErrorResponse>(&error_text) {
                return Err(NanoError::Provider(format!(
                    "OpenAI API error ({}): {} - {}",
                    status, error_response.error.r#type, error_response.error.message
                )));
            }

            return Err(NanoError::Provider(format!(
                "OpenAI API error ({}): {}",
                status, error_text
            )));
        }

        let openai_response: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| NanoError::Provider(format!("Failed to parse OpenAI response: {}", e)))?;

        let converted = convert_response(openai_response);
        info!(
            model = %model,
            tool_calls = converted.tool_calls.len(),
            usage_tokens = converted.usage_tokens.unwrap_or(0),
            "OpenAI response received"
        );
        Ok(converted)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base_url_trailing_slash_removed() {
        let provider = OpenAIProvider::with_base_url("k", "http://localhost:8080/v1/");
        assert_eq!(provider.api_base(), "http://localhost:8080/v1");
        assert_eq!(OpenAIProvider::new("k").api_base(), OPENAI_API_URL);
    }

    #[test]
    fn test_convert_messages_puts_system_first() {
        let history = vec![
            ContextMessage::user("hi"),
            ContextMessage::assistant("hello"),
        ];
        let messages = convert_messages("be brief", &history);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, "be brief");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[2].role, "assistant");
    }

    #[test]
    fn test_convert_messages_maps_tool_role_to_user() {
        let history = vec![ContextMessage::tool(r#"{"tool":"echo","success":true}"#)];
        let messages = convert_messages("", &history);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
        assert!(messages[0].content.starts_with("Tool result: "));
    }

    #[test]
    fn test_request_with_tools_sets_tool_choice() {
        let defs = vec![ToolDefinition::new(
            "read_file",
            "Read a file",
            json!({"type": "object", "properties": {}, "required": []}),
        )];
        let request = OpenAIRequest {
            model: "gpt-4".into(),
            messages: convert_messages("sys", &[]),
            tools: Some(convert_tools(&defs)),
            tool_choice: Some("auto".into()),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "read_file");
    }

    #[test]
    fn test_request_without_tools_omits_fields() {
        let request = OpenAIRequest {
            model: "gpt-4".into(),
            messages: vec![],
            tools: None,
            tool_choice: None,
        };
        let body = serde_json::to_string(&request).unwrap();
        assert!(!body.contains("tools"));
        assert!(!body.contains("tool_choice"));
    }

    #[test]
    fn test_convert_response_text_only() {
        let raw = json!({
            "choices": [{"message": {"content": "Hello there"}}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        });
        let response: OpenAIResponse = serde_json::from_value(raw).unwrap();
        let converted = convert_response(response);
        assert_eq!(converted.content, "Hello there");
        assert!(converted.tool_calls.is_empty());
        assert_eq!(converted.usage_tokens, Some(7));
    }

    #[test]
    fn test_convert_response_with_tool_calls() {
        let raw = json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [
                    {"id": "call_1", "type": "function",
                     "function": {"name": "read_file", "arguments": "{\"path\":\"a.txt\"}"}},
                    {"id": "call_2", "type": "function",
                     "function": {"name": "exec", "arguments": "not json"}}
                ]
            }}]
        });
        let response: OpenAIResponse = serde_json::from_value(raw).unwrap();
        let converted = convert_response(response);
        assert_eq!(converted.content, "");
        assert_eq!(converted.tool_calls.len(), 2);
        assert_eq!(converted.tool_calls[0].arguments, json!({"path": "a.txt"}));
        assert_eq!(converted.tool_calls[1].arguments, json!("not json"));
        assert!(converted.usage_tokens.is_none());
    }

    #[test]
    fn test_convert_response_empty_choices() {
        let response: OpenAIResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        let converted = convert_response(response);
        assert!(converted.content.is_empty());
        assert!(!converted.has_tool_calls());
    }

    #[test]
    fn test_parse_empty_arguments() {
        assert_eq!(parse_arguments(""), json!({}));
    }
}
