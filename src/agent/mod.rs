//! Agent module - Core AI agent logic and conversation handling
//!
//! This module provides the agent loop and everything it keeps per request:
//!
//! - Bounded per-session conversation memory (`ContextManager`)
//! - The tool-calling loop that drives the LLM provider (`AgentLoop`)
//! - Background subagents for delegated work (`SubagentManager`)
//! - Optional reasoning traces (`ThinkingTracker`)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  MessageBus │────>│  AgentLoop  │────>│ LLMProvider │
//! │ agent/direct│<────│             │     │             │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!              ┌─────────────┼─────────────┐
//!              ▼             ▼             ▼
//!       ┌─────────────┐ ┌─────────┐ ┌─────────────┐
//!       │   Context   │ │  Tools  │ │  Subagent   │
//!       │   Manager   │ │Registry │ │  Manager    │
//!       └─────────────┘ └─────────┘ └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nanoclaw::agent::{AgentLoop, AgentSettings, ContextManager};
//! use nanoclaw::bus::MessageBus;
//! use nanoclaw::providers::OpenAIProvider;
//! use nanoclaw::tools::{register_builtin_tools, ToolRegistry};
//!
//! async fn run_agent() {
//!     let tools = Arc::new(ToolRegistry::new());
//!     register_builtin_tools(&tools);
//!
//!     let bus = MessageBus::new();
//!     let agent = Arc::new(AgentLoop::new(
//!         AgentSettings::default(),
//!         ContextManager::new(50, 8000),
//!         tools,
//!         bus.clone(),
//!     ));
//!     agent.set_provider(Arc::new(OpenAIProvider::new("your-api-key"))).await;
//!
//!     agent.start().await.unwrap();
//!     bus.start().await;
//! }
//! ```

mod context;
mod r#loop;
pub mod subagent;
pub mod thinking;

pub use context::{ContextManager, ContextMessage, Role, SessionInfo};
pub use r#loop::{AgentLoop, AgentSettings, AGENT_CHANNELS, MAX_ITERATIONS_MESSAGE, REPLY_SENDER};
pub use subagent::{
    AgentSubagentExecutor, IsolationLevel, Subagent, SubagentExecutor, SubagentManager,
    SubagentStats, SubagentStatus,
};
pub use thinking::{ThinkingStats, ThinkingTracker, Thought, ThoughtListener, ThoughtStatus};
