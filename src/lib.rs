//! NanoClaw - Lightweight agent orchestration runtime
//!
//! A message bus feeds an agent loop that keeps bounded per-session context,
//! calls an LLM provider and executes the tools it asks for. Background work
//! runs as subagents; recurring prompts run through the cron service. The
//! [`Orchestrator`] owns and wires every component.

pub mod agent;
pub mod bus;
pub mod config;
pub mod cron;
pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod tools;
pub mod utils;

pub use agent::{AgentLoop, AgentSettings, ContextManager, SubagentManager, ThinkingTracker};
pub use bus::{BusMessage, Event, EventBus, EventType, MessageBus, MessageType};
pub use config::Config;
pub use cron::{CronJob, CronSchedule, CronService, JobRunner};
pub use error::{NanoError, Result};
pub use orchestrator::Orchestrator;
pub use providers::{LLMProvider, LLMResponse, LLMToolCall, ToolDefinition};
pub use tools::{ToolContext, ToolDescriptor, ToolExecutor, ToolRegistry};
