//! Agent loop implementation
//!
//! This module provides the tool-calling state machine at the heart of the
//! runtime:
//!
//! ```text
//! Start ──> CallModel ──(no tool calls)──> Done
//!               │  ▲
//!   tool calls  ▼  │
//!             ToolPhase        (at most `max_iterations` model calls)
//! ```
//!
//! `process` always returns a string: the model's answer, an error
//! description, or the iteration-cap notice.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::bus::{
    handler_fn, BusMessage, Event, EventBus, EventType, MessageBus, MessageType, SubscriptionId,
};
use crate::config::Config;
use crate::cron::JobRunner;
use crate::error::{NanoError, Result};
use crate::providers::{LLMProvider, LLMToolCall};
use crate::tools::{ToolContext, ToolRegistry};

use super::{ContextManager, Role, ThinkingTracker};

/// Bus channels the agent answers on.
pub const AGENT_CHANNELS: [&str; 2] = ["agent", "direct"];

/// Sender id stamped on every reply.
pub const REPLY_SENDER: &str = "nanoclaw";

/// Returned when the iteration cap is hit without a final answer.
pub const MAX_ITERATIONS_MESSAGE: &str = "Max iterations reached without completion";

/// Settings the loop reads on every call.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub max_iterations: u32,
    pub system_prompt: String,
    /// Workspace handed to tools; `None` disables workspace-bound tools
    pub workspace: Option<PathBuf>,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.agent.model.clone(),
            max_iterations: config.agent.max_iterations,
            system_prompt: config.agent.system_prompt.clone(),
            workspace: Some(config.workspace_path()),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        let defaults = crate::config::AgentDefaults::default();
        Self {
            model: defaults.model,
            max_iterations: defaults.max_iterations,
            system_prompt: defaults.system_prompt,
            workspace: None,
        }
    }
}

/// The agent loop: drives the model through tool calls for one session at a
/// time.
///
/// Calls for the same session key are serialized; different sessions run
/// concurrently.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use nanoclaw::agent::{AgentLoop, AgentSettings, ContextManager};
/// use nanoclaw::bus::MessageBus;
/// use nanoclaw::tools::ToolRegistry;
///
/// # tokio_test::block_on(async {
/// let agent = AgentLoop::new(
///     AgentSettings::default(),
///     ContextManager::new(50, 8000),
///     Arc::new(ToolRegistry::new()),
///     MessageBus::new(),
/// );
/// let reply = agent.process("chat1", "Hello").await;
/// assert_eq!(reply, "Error processing request: No LLM provider configured");
/// # });
/// ```
pub struct AgentLoop {
    settings: AgentSettings,
    context: Arc<ContextManager>,
    tools: Arc<ToolRegistry>,
    bus: Arc<MessageBus>,
    /// Cloned out before each call so the lock is never held across awaits
    provider: RwLock<Option<Arc<dyn LLMProvider>>>,
    events: Option<Arc<EventBus>>,
    thinking: Option<Arc<ThinkingTracker>>,
    running: AtomicBool,
    subscriptions: Mutex<Vec<(String, SubscriptionId)>>,
    /// Per-session locks to serialize concurrent calls for the same session
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AgentLoop {
    pub fn new(
        settings: AgentSettings,
        context: Arc<ContextManager>,
        tools: Arc<ToolRegistry>,
        bus: Arc<MessageBus>,
    ) -> Self {
        Self {
            settings,
            context,
            tools,
            bus,
            provider: RwLock::new(None),
            events: None,
            thinking: None,
            running: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Emit lifecycle events on `events`.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Record one thought per request on `thinking`.
    pub fn with_thinking(mut self, thinking: Arc<ThinkingTracker>) -> Self {
        self.thinking = Some(thinking);
        self
    }

    pub async fn set_provider(&self, provider: Arc<dyn LLMProvider>) {
        info!(provider = %provider.name(), "LLM provider set");
        *self.provider.write().await = Some(provider);
    }

    pub async fn has_provider(&self) -> bool {
        self.provider.read().await.is_some()
    }

    // ========================================================================
    // Processing
    // ========================================================================

    /// Processes `message` for `session_key` with the configured prompt and
    /// model. Never fails: errors come back as text.
    pub async fn process(&self, session_key: &str, message: &str) -> String {
        render(self.try_process(session_key, message).await)
    }

    /// Like [`AgentLoop::process`] with an explicit prompt and model.
    pub async fn process_with(
        &self,
        session_key: &str,
        message: &str,
        system_prompt: &str,
        model: &str,
    ) -> String {
        render(
            self.try_process_with(session_key, message, system_prompt, model)
                .await,
        )
    }

    /// Runs [`AgentLoop::process`] on its own task.
    pub fn process_async(self: &Arc<Self>, session_key: &str, message: &str) -> JoinHandle<String> {
        let agent = Arc::clone(self);
        let (key, message) = (session_key.to_string(), message.to_string());
        tokio::spawn(async move { agent.process(&key, &message).await })
    }

    /// Fallible form of [`AgentLoop::process`].
    ///
    /// # Errors
    /// - `Provider` when no provider is set or the model call fails
    /// - `ResourceExhausted` when the iteration cap is reached
    pub async fn try_process(&self, session_key: &str, message: &str) -> Result<String> {
        let ctx = self.tool_context(session_key);
        self.run_request(
            session_key,
            message,
            &self.settings.system_prompt,
            &self.settings.model,
            ctx,
        )
        .await
    }

    /// Fallible form of [`AgentLoop::process_with`].
    pub async fn try_process_with(
        &self,
        session_key: &str,
        message: &str,
        system_prompt: &str,
        model: &str,
    ) -> Result<String> {
        let ctx = self.tool_context(session_key);
        self.run_request(session_key, message, system_prompt, model, ctx)
            .await
    }

    fn tool_context(&self, session_key: &str) -> ToolContext {
        let ctx = ToolContext::new().with_session(session_key);
        match &self.settings.workspace {
            Some(workspace) => ctx.with_workspace(workspace.clone()),
            None => ctx,
        }
    }

    async fn session_lock(&self, session_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        Arc::clone(
            locks
                .entry(session_key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    async fn run_request(
        &self,
        session_key: &str,
        message: &str,
        system_prompt: &str,
        model: &str,
        ctx: ToolContext,
    ) -> Result<String> {
        let session_lock = self.session_lock(session_key).await;
        let result = {
            let _session_guard = session_lock.lock().await;
            self.run_locked(session_key, message, system_prompt, model, ctx)
                .await
        };
        self.release_session_lock(session_key, session_lock).await;
        result
    }

    /// Drops the session's lock entry once no other request holds or awaits it.
    async fn release_session_lock(&self, session_key: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.session_locks.lock().await;
        // One reference in the map, one in `lock`: nobody else is queued.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(session_key);
        }
    }

    async fn run_locked(
        &self,
        session_key: &str,
        message: &str,
        system_prompt: &str,
        model: &str,
        ctx: ToolContext,
    ) -> Result<String> {
        let thought = self
            .thinking
            .as_ref()
            .map(|t| t.start_thinking(message, Some(model)));

        let result = self
            .run_iterations(session_key, message, system_prompt, model, &ctx, thought.as_deref())
            .await;

        if let (Some(tracker), Some(id)) = (&self.thinking, thought.as_deref()) {
            let outcome = match &result {
                Ok(answer) => tracker.complete_thinking(id, answer),
                Err(e) => tracker.fail_thinking(id, &e.to_string()),
            };
            if let Err(e) = outcome {
                debug!(thought_id = %id, error = %e, "Could not close thought");
            }
        }

        match &result {
            Ok(answer) => self.emit(Event::agent_response(session_key, answer)),
            Err(e) => {
                error!(session = %session_key, error = %e, "Request failed");
                self.emit(Event::error_occurred("agent", &e.to_string()).with_session(session_key));
            }
        }
        result
    }

    async fn run_iterations(
        &self,
        session_key: &str,
        message: &str,
        system_prompt: &str,
        model: &str,
        ctx: &ToolContext,
        thought: Option<&str>,
    ) -> Result<String> {
        self.context.add_message(session_key, Role::User, message);

        let provider = self
            .provider
            .read()
            .await
            .clone()
            .ok_or_else(|| NanoError::Provider("No LLM provider configured".into()))?;

        let max_iterations = self.settings.max_iterations;
        for iteration in 1..=max_iterations {
            debug!(iteration, max_iterations, "Calling model");
            let history = self.context.get_messages(session_key);
            let definitions = self.tools.definitions();

            let response = provider
                .complete_with_tools(model, &history, system_prompt, &definitions)
                .await?;
            if let Some(tokens) = response.usage_tokens {
                debug!(tokens, "Model usage");
            }

            if !response.has_tool_calls() {
                self.context
                    .add_message(session_key, Role::Assistant, &response.content);
                info!(iterations = iteration, "Request completed");
                return Ok(response.content);
            }

            let mut records = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                records.push(self.execute_tool_call(call, ctx, thought).await);
            }

            self.context
                .add_message(session_key, Role::Assistant, &response.content);
            for record in records {
                self.context.add_message(session_key, Role::Tool, &record);
            }
        }

        warn!(max_iterations, "Tool loop reached maximum iterations");
        Err(NanoError::ResourceExhausted(MAX_ITERATIONS_MESSAGE.into()))
    }

    /// Runs one tool call and renders its result record. Failures are
    /// recorded, not raised.
    async fn execute_tool_call(
        &self,
        call: &LLMToolCall,
        ctx: &ToolContext,
        thought: Option<&str>,
    ) -> String {
        info!(tool = %call.name, id = %call.id, "Executing tool");
        if let (Some(tracker), Some(id)) = (&self.thinking, thought) {
            if let Err(e) = tracker.add_step(id, &format!("Calling tool {}", call.name)) {
                debug!(thought_id = %id, error = %e, "Step not recorded");
            }
        }

        let session = ctx.session_id.as_deref().unwrap_or_default();
        self.emit(Event::tool_called(&call.name, &call.arguments).with_session(session));

        let record = match self.tools.execute(&call.name, call.arguments.clone(), ctx).await {
            Ok(output) => {
                self.emit(Event::tool_completed(&call.name, &output).with_session(session));
                json!({"tool": call.name, "success": true, "result": output})
            }
            Err(e) => {
                let error = e.to_string();
                self.emit(Event::tool_failed(&call.name, &error).with_session(session));
                json!({"tool": call.name, "success": false, "error": error})
            }
        };
        record.to_string()
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    // ========================================================================
    // Bus integration
    // ========================================================================

    /// Subscribes the loop to the `agent` and `direct` bus channels.
    ///
    /// # Errors
    /// Returns `InvalidState` if the loop is already running.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(NanoError::InvalidState("Agent loop already running".into()));
        }
        info!("Starting agent loop");

        let mut subscriptions = self.subscriptions.lock().await;
        for channel in AGENT_CHANNELS {
            let weak = Arc::downgrade(self);
            let handler = handler_fn(move |msg: BusMessage| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(agent) => agent.handle_bus_message(msg).await,
                        None => Ok(()),
                    }
                }
            });
            let id = self.bus.subscribe(channel, handler).await;
            subscriptions.push((channel.to_string(), id));
        }

        self.emit(Event::new(EventType::AgentStarted, "agent"));
        Ok(())
    }

    /// Unsubscribes from the bus. In-flight requests still finish and reply.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping agent loop");
        let mut subscriptions = self.subscriptions.lock().await;
        for (channel, id) in subscriptions.drain(..) {
            self.bus.unsubscribe(&channel, id).await;
        }
        self.emit(Event::new(EventType::AgentStopped, "agent"));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn handle_bus_message(&self, msg: BusMessage) -> Result<()> {
        if !matches!(msg.message_type, MessageType::Inbound | MessageType::Command) {
            return Ok(());
        }

        let request_span = info_span!(
            "request",
            request_id = %Uuid::new_v4(),
            channel = %msg.channel,
            chat_id = %msg.chat_id,
            session_id = %msg.session_key(),
            sender = %msg.sender_id,
        );

        async {
            info!("Processing message");
            let start = Instant::now();
            self.emit(
                Event::message_received(&msg.channel, &msg.chat_id, &msg.sender_id, &msg.content)
                    .with_session(msg.session_key()),
            );

            let reply = match AssertUnwindSafe(self.process_message(&msg))
                .catch_unwind()
                .await
            {
                Ok(response) => {
                    info!(
                        latency_ms = start.elapsed().as_millis() as u64,
                        response_len = response.len(),
                        "Reply ready"
                    );
                    response
                }
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "agent panicked".to_string());
                    error!(error = %reason, "Request panicked");
                    format!("Error: {}", reason)
                }
            };

            self.bus
                .publish_outbound(msg.reply(REPLY_SENDER, &reply))
                .await
        }
        .instrument(request_span)
        .await
    }

    async fn process_message(&self, msg: &BusMessage) -> String {
        let session_key = msg.session_key();
        let ctx = self
            .tool_context(session_key)
            .with_channel(&msg.channel, &msg.chat_id);
        render(
            self.run_request(
                session_key,
                &msg.content,
                &self.settings.system_prompt,
                &self.settings.model,
                ctx,
            )
            .await,
        )
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn context(&self) -> &Arc<ContextManager> {
        &self.context
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }
}

/// Turns a processing outcome into the caller-facing string.
fn render(result: Result<String>) -> String {
    match result {
        Ok(answer) => answer,
        Err(NanoError::ResourceExhausted(msg)) => msg,
        Err(NanoError::Provider(msg)) => format!("Error processing request: {}", msg),
        Err(e) => format!("Error processing request: {}", e),
    }
}

#[async_trait]
impl JobRunner for AgentLoop {
    async fn run(&self, session_key: &str, message: &str) -> Result<String> {
        self.try_process(session_key, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ContextMessage;
    use crate::providers::{LLMResponse, ToolDefinition};
    use crate::tools::{executor_fn, ToolDescriptor};
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// Replays queued responses; repeats the last one when the queue runs dry.
    struct ScriptedProvider {
        responses: std::sync::Mutex<VecDeque<LLMResponse>>,
        calls: Arc<AtomicU32>,
        histories: std::sync::Mutex<Vec<Vec<ContextMessage>>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<LLMResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: std::sync::Mutex::new(responses.into()),
                calls: Arc::new(AtomicU32::new(0)),
                histories: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete_with_tools(
            &self,
            _model: &str,
            history: &[ContextMessage],
            _system_prompt: &str,
            _tools: &[ToolDefinition],
        ) -> Result<LLMResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.histories.lock().unwrap().push(history.to_vec());
            let mut queue = self.responses.lock().unwrap();
            let next = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            next.ok_or_else(|| NanoError::Provider("script exhausted".into()))
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LLMProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn complete_with_tools(
            &self,
            _model: &str,
            _history: &[ContextMessage],
            _system_prompt: &str,
            _tools: &[ToolDefinition],
        ) -> Result<LLMResponse> {
            Err(NanoError::Provider("service unavailable".into()))
        }
    }

    fn settings(max_iterations: u32) -> AgentSettings {
        AgentSettings {
            max_iterations,
            ..AgentSettings::default()
        }
    }

    fn agent_with(max_iterations: u32) -> AgentLoop {
        let tools = Arc::new(ToolRegistry::new());
        tools.register(
            ToolDescriptor::new("echo", "Echo").param("message", "string", "Text", true),
            executor_fn(|args: Value, _ctx| async move {
                Ok(args["message"].as_str().unwrap_or_default().to_string())
            }),
        );
        tools.register(
            ToolDescriptor::new("broken", "Always fails"),
            executor_fn(|_args, _ctx| async move { Err(NanoError::Tool("disk on fire".into())) }),
        );
        AgentLoop::new(
            settings(max_iterations),
            ContextManager::new(100, 100_000),
            tools,
            MessageBus::new(),
        )
    }

    fn tool_call(name: &str, args: Value) -> LLMResponse {
        LLMResponse::with_tools("", vec![LLMToolCall::new("call_1", name, args)])
    }

    #[tokio::test]
    async fn test_no_provider() {
        let agent = agent_with(5);
        assert_eq!(
            agent.process("s", "hi").await,
            "Error processing request: No LLM provider configured"
        );
    }

    #[tokio::test]
    async fn test_plain_answer_takes_one_iteration() {
        let agent = agent_with(5);
        let provider = ScriptedProvider::new(vec![LLMResponse::text("Hello there")]);
        agent.set_provider(provider.clone()).await;

        assert_eq!(agent.process("s", "hi").await, "Hello there");
        assert_eq!(provider.calls(), 1);

        let history = agent.context().get_messages("s");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, "Hello there");
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let agent = agent_with(5);
        let provider = ScriptedProvider::new(vec![
            tool_call("echo", json!({"message": "ping"})),
            LLMResponse::text("done"),
        ]);
        agent.set_provider(provider.clone()).await;

        assert_eq!(agent.process("s", "echo ping").await, "done");
        assert_eq!(provider.calls(), 2);

        let second = &provider.histories.lock().unwrap()[1];
        let record: Value = serde_json::from_str(&second.last().unwrap().content).unwrap();
        assert_eq!(second.last().unwrap().role, Role::Tool);
        assert_eq!(record["tool"], "echo");
        assert_eq!(record["success"], true);
        assert_eq!(record["result"], "ping");
    }

    #[tokio::test]
    async fn test_failing_tool_does_not_abort() {
        let agent = agent_with(5);
        let provider = ScriptedProvider::new(vec![
            tool_call("broken", json!({})),
            LLMResponse::text("recovered"),
        ]);
        agent.set_provider(provider.clone()).await;

        assert_eq!(agent.process("s", "try it").await, "recovered");

        let second = &provider.histories.lock().unwrap()[1];
        let record: Value = serde_json::from_str(&second.last().unwrap().content).unwrap();
        assert_eq!(record["success"], false);
        assert_eq!(record["error"], "disk on fire");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_recorded() {
        let agent = agent_with(5);
        let provider = ScriptedProvider::new(vec![
            tool_call("missing", json!({})),
            LLMResponse::text("ok"),
        ]);
        agent.set_provider(provider.clone()).await;

        assert_eq!(agent.process("s", "x").await, "ok");
        let second = &provider.histories.lock().unwrap()[1];
        assert!(second.last().unwrap().content.contains("Unknown tool: missing"));
    }

    #[tokio::test]
    async fn test_iteration_cap() {
        let agent = agent_with(3);
        let provider = ScriptedProvider::new(vec![tool_call("echo", json!({"message": "again"}))]);
        agent.set_provider(provider.clone()).await;

        assert_eq!(agent.process("s", "loop").await, MAX_ITERATIONS_MESSAGE);
        assert_eq!(provider.calls(), 3);
        assert!(matches!(
            agent.try_process("s2", "loop").await,
            Err(NanoError::ResourceExhausted(_))
        ));
    }

    #[tokio::test]
    async fn test_provider_failure_is_terminal() {
        let agent = agent_with(5);
        agent.set_provider(Arc::new(FailingProvider)).await;
        assert_eq!(
            agent.process("s", "hi").await,
            "Error processing request: service unavailable"
        );
    }

    #[tokio::test]
    async fn test_events_and_thinking() {
        let events = EventBus::new();
        let thinking = Arc::new(ThinkingTracker::new());
        let agent = agent_with(5)
            .with_events(events.clone())
            .with_thinking(thinking.clone());
        agent
            .set_provider(ScriptedProvider::new(vec![
                tool_call("echo", json!({"message": "x"})),
                LLMResponse::text("fin"),
            ]))
            .await;

        agent.process("s", "go").await;

        assert_eq!(events.events_by_type(&EventType::ToolCalled).len(), 1);
        assert_eq!(events.events_by_type(&EventType::ToolCompleted).len(), 1);
        assert_eq!(events.events_by_type(&EventType::AgentResponse).len(), 1);

        let thought = thinking.get_thought("thought_1").unwrap();
        assert_eq!(thought.steps.len(), 1);
        assert_eq!(thought.summary.as_deref(), Some("fin"));
    }

    /// Slow provider that answers with the last user message.
    struct EchoProvider;

    #[async_trait]
    impl LLMProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete_with_tools(
            &self,
            _model: &str,
            history: &[ContextMessage],
            _system_prompt: &str,
            _tools: &[ToolDefinition],
        ) -> Result<LLMResponse> {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let last = history.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(LLMResponse::text(&format!("re: {}", last)))
        }
    }

    #[tokio::test]
    async fn test_same_session_calls_are_serialized() {
        let agent = Arc::new(agent_with(5));
        agent.set_provider(Arc::new(EchoProvider)).await;

        let a = agent.process_async("shared", "one");
        let b = agent.process_async("shared", "two");
        let (ra, rb) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(ra, "re: one");
        assert_eq!(rb, "re: two");

        let history = agent.context().get_messages("shared");
        assert_eq!(history.len(), 4);
        for pair in history.chunks(2) {
            assert_eq!(pair[1].content, format!("re: {}", pair[0].content));
        }
        assert!(agent.session_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_session_locks_released_after_requests() {
        let agent = agent_with(5);
        agent
            .set_provider(ScriptedProvider::new(vec![LLMResponse::text("ok")]))
            .await;

        for i in 0..200 {
            let key = format!("subagent:{}", i);
            agent.process(&key, "task").await;
            agent.context().clear_session(&key);
        }
        // Failed requests release their lock too.
        agent.set_provider(Arc::new(FailingProvider)).await;
        agent.process("failing", "x").await;

        assert_eq!(agent.context().session_count(), 1);
        assert!(agent.session_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_bus_round_trip() {
        let agent = Arc::new(agent_with(5));
        agent
            .set_provider(ScriptedProvider::new(vec![LLMResponse::text("pong")]))
            .await;
        let bus = Arc::clone(agent.bus());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        bus.subscribe(
            "agent",
            handler_fn(move |msg: BusMessage| {
                let tx = tx.clone();
                async move {
                    if msg.message_type == MessageType::Outbound {
                        let _ = tx.send(msg);
                    }
                    Ok(())
                }
            }),
        )
        .await;

        agent.start().await.unwrap();
        assert!(agent.start().await.is_err());
        bus.start().await;

        bus.publish_inbound(BusMessage::inbound("agent", "user1", "chat9", "ping"))
            .await
            .unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.content, "pong");
        assert_eq!(reply.sender_id, REPLY_SENDER);
        assert_eq!(reply.chat_id, "chat9");
        assert_eq!(agent.context().get_messages("chat9").len(), 2);

        agent.stop().await;
        assert!(!agent.is_running());
        bus.stop().await;
    }
}
