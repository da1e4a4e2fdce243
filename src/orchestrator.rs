//! Orchestrator - owns and wires every runtime component
//!
//! There is no global state: the binary builds one [`Orchestrator`] from a
//! [`Config`] and everything else hangs off it.
//!
//! ```text
//!   Config ──> MessageBus ──┐
//!              EventBus ────┤
//!              Context ─────┼──> AgentLoop <── Weak ── SubagentManager
//!              Tools ───────┤        ▲
//!              Thinking ────┘        │
//!                                CronService
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::agent::{
    AgentLoop, AgentSettings, AgentSubagentExecutor, ContextManager, SubagentManager,
    ThinkingTracker,
};
use crate::bus::{EventBus, MessageBus};
use crate::config::Config;
use crate::cron::CronService;
use crate::error::{NanoError, Result};
use crate::providers;
use crate::tools::{register_builtin_tools, register_subagent_tools, ToolRegistry};

/// Interval between finished-subagent and finished-thought sweeps.
const RECORD_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// The assembled runtime.
pub struct Orchestrator {
    config: Config,
    bus: Arc<MessageBus>,
    events: Arc<EventBus>,
    context: Arc<ContextManager>,
    tools: Arc<ToolRegistry>,
    thinking: Arc<ThinkingTracker>,
    agent: Arc<AgentLoop>,
    subagents: Arc<SubagentManager>,
    cron: Arc<CronService>,
    running: AtomicBool,
}

impl Orchestrator {
    /// Validates `config` and builds every component.
    ///
    /// The LLM provider comes from `providers.openai`; without one the agent
    /// still runs and answers with a "No LLM provider configured" error.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let bus = MessageBus::with_poll_interval(Duration::from_millis(config.bus.poll_interval_ms));
        let events = EventBus::with_capacity(config.bus.event_log_capacity);
        let context = ContextManager::from_config(&config.context);

        let tools = Arc::new(ToolRegistry::new());
        register_builtin_tools(&tools);

        let thinking = Arc::new(ThinkingTracker::new());
        let agent = Arc::new(
            AgentLoop::new(
                AgentSettings::from_config(&config),
                Arc::clone(&context),
                Arc::clone(&tools),
                Arc::clone(&bus),
            )
            .with_events(Arc::clone(&events))
            .with_thinking(Arc::clone(&thinking)),
        );
        if let Some(provider) = providers::from_config(&config) {
            agent.set_provider(provider).await;
        }

        let subagents = Arc::new(SubagentManager::from_config(
            Arc::new(AgentSubagentExecutor::new(Arc::downgrade(&agent))),
            &config.subagents,
        ));
        register_subagent_tools(&tools, &subagents, &config.agent.model);

        let cron = Arc::new(
            CronService::new(config.cron_store_path(), agent.clone()).with_bus(Arc::clone(&bus)),
        );

        info!(
            model = %config.agent.model,
            tools = tools.len(),
            "Orchestrator assembled"
        );

        Ok(Self {
            config,
            bus,
            events,
            context,
            tools,
            thinking,
            agent,
            subagents,
            cron,
            running: AtomicBool::new(false),
        })
    }

    /// Starts the bus dispatchers, background sweeps, the agent subscriptions
    /// and, when enabled, the cron service.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(NanoError::InvalidState("Orchestrator already running".into()));
        }

        self.bus.start().await;
        self.context.start_sweeper(
            Duration::from_secs(self.config.context.sweep_interval_secs),
            Duration::from_secs(self.config.context.max_session_age_secs),
        );
        self.events.start_cleanup(
            Duration::from_secs(self.config.bus.event_cleanup_interval_secs),
            Duration::from_secs(self.config.bus.event_max_age_secs),
        );
        self.subagents.start_cleanup(
            RECORD_CLEANUP_INTERVAL,
            Duration::from_secs(self.config.subagents.cleanup_max_age_secs),
        );
        // Thoughts belong to requests, so they age out with idle sessions.
        self.thinking.start_cleanup(
            RECORD_CLEANUP_INTERVAL,
            Duration::from_secs(self.config.context.max_session_age_secs),
        );

        if let Err(e) = self.agent.start().await {
            self.halt_background().await;
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        if self.config.cron.enabled {
            if let Err(e) = self.cron.start().await {
                warn!(error = %e, "Cron service failed to start; continuing without it");
            }
        }

        info!("Orchestrator started");
        Ok(())
    }

    /// Stops everything `start` started, in reverse order.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cron.stop().await;
        self.agent.stop().await;
        self.halt_background().await;
        info!("Orchestrator stopped");
    }

    async fn halt_background(&self) {
        self.thinking.stop_cleanup();
        self.subagents.stop_cleanup();
        self.events.stop_cleanup();
        self.context.stop_sweeper();
        self.bus.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// One JSON snapshot of every component.
    pub async fn stats(&self) -> Value {
        json!({
            "running": self.is_running(),
            "agent": {
                "running": self.agent.is_running(),
                "model": self.agent.settings().model,
                "max_iterations": self.agent.settings().max_iterations,
                "provider": self.agent.has_provider().await,
            },
            "bus": self.bus.stats().await,
            "events": self.events.stats(),
            "context": {
                "sessions": self.context.session_count(),
                "total_messages": self.context.total_messages(),
                "max_messages": self.context.max_messages(),
                "max_tokens": self.context.max_tokens(),
            },
            "tools": self.tools.names(),
            "subagents": self.subagents.stats(),
            "thinking": self.thinking.stats(),
            "cron": self.cron.stats().await,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn context(&self) -> &Arc<ContextManager> {
        &self.context
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn thinking(&self) -> &Arc<ThinkingTracker> {
        &self.thinking
    }

    pub fn agent(&self) -> &Arc<AgentLoop> {
        &self.agent
    }

    pub fn subagents(&self) -> &Arc<SubagentManager> {
        &self.subagents
    }

    pub fn cron(&self) -> &Arc<CronService> {
        &self.cron
    }
}
