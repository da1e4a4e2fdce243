//! Integration tests for NanoClaw
//!
//! These tests assemble the full runtime through the `Orchestrator` and drive
//! it with mock providers: bus round trips, tool calls, subagent delegation,
//! cron execution and the aggregated stats surface.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::sync::mpsc;

use nanoclaw::agent::{ContextMessage, Role, MAX_ITERATIONS_MESSAGE, REPLY_SENDER};
use nanoclaw::bus::{handler_fn, BusMessage, EventType, MessageType};
use nanoclaw::config::Config;
use nanoclaw::cron::CronSchedule;
use nanoclaw::error::{NanoError, Result};
use nanoclaw::providers::{LLMProvider, LLMResponse, LLMToolCall, ToolDefinition};
use nanoclaw::tools::spawn::SUBAGENT_SYSTEM_PROMPT;
use nanoclaw::Orchestrator;

// ============================================================================
// Mock Providers
// ============================================================================

/// Replays scripted responses in order; the last one repeats forever.
struct ScriptedProvider {
    script: Mutex<VecDeque<LLMResponse>>,
    calls: Arc<AtomicU32>,
    histories: Mutex<Vec<Vec<ContextMessage>>>,
}

impl ScriptedProvider {
    fn new(script: Vec<LLMResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Arc::new(AtomicU32::new(0)),
            histories: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_history(&self) -> Vec<ContextMessage> {
        self.histories.lock().unwrap().last().cloned().unwrap_or_default()
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
        let mut script = self.script.lock().unwrap();
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        next.ok_or_else(|| NanoError::Provider("script exhausted".into()))
    }
}

/// Delegates to a subagent on the main session and answers subagent tasks
/// directly, telling the two apart by system prompt.
struct DelegatingProvider {
    main_calls: AtomicU32,
}

#[async_trait]
impl LLMProvider for DelegatingProvider {
    fn name(&self) -> &str {
        "delegating"
    }

    async fn complete_with_tools(
        &self,
        _model: &str,
        history: &[ContextMessage],
        system_prompt: &str,
        _tools: &[ToolDefinition],
    ) -> Result<LLMResponse> {
        if system_prompt == SUBAGENT_SYSTEM_PROMPT {
            let task = history.first().map(|m| m.content.clone()).unwrap_or_default();
            return Ok(LLMResponse::text(&format!("done: {}", task)));
        }
        if self.main_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(LLMResponse::with_tools(
                "Delegating.",
                vec![LLMToolCall::new(
                    "call_1",
                    "spawn",
                    json!({"task": "count the files"}),
                )],
            ))
        } else {
            Ok(LLMResponse::text("Started a background task."))
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.agent.workspace = dir.join("workspace").display().to_string();
    config.data_dir = dir.join("data").display().to_string();
    config.bus.poll_interval_ms = 10;
    config.subagents.poll_interval_ms = 10;
    config
}

async fn orchestrator_with(config: Config, provider: Arc<dyn LLMProvider>) -> Orchestrator {
    let orch = Orchestrator::new(config).await.unwrap();
    orch.agent().set_provider(provider).await;
    orch
}

/// Forwards outbound messages on `channel` into a receiver.
async fn collect_outbound(orch: &Orchestrator, channel: &str) -> mpsc::UnboundedReceiver<BusMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    orch.bus()
        .subscribe(
            channel,
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
    rx
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<BusMessage>) -> BusMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for outbound message")
        .expect("channel closed")
}

// ============================================================================
// Bus <-> Agent
// ============================================================================

#[tokio::test]
async fn test_bus_request_gets_reply_on_same_channel() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![LLMResponse::text("Hello human!")]);
    let orch = orchestrator_with(test_config(dir.path()), provider.clone()).await;
    let mut replies = collect_outbound(&orch, "agent").await;
    orch.start().await.unwrap();

    orch.bus()
        .publish_inbound(BusMessage::inbound("agent", "user1", "chat42", "Hi"))
        .await
        .unwrap();

    let reply = recv(&mut replies).await;
    assert_eq!(reply.content, "Hello human!");
    assert_eq!(reply.channel, "agent");
    assert_eq!(reply.chat_id, "chat42");
    assert_eq!(reply.sender_id, REPLY_SENDER);
    assert_eq!(provider.calls(), 1);

    // Session key falls back to the chat id.
    let history = orch.context().get_messages("chat42");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role, Role::Assistant);

    orch.stop().await;
}

#[tokio::test]
async fn test_session_key_metadata_is_honoured() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![LLMResponse::text("ok")]);
    let orch = orchestrator_with(test_config(dir.path()), provider).await;
    let mut replies = collect_outbound(&orch, "direct").await;
    orch.start().await.unwrap();

    orch.bus()
        .publish_inbound(
            BusMessage::inbound("direct", "u", "c1", "hello")
                .with_metadata("session_key", "telegram:c1"),
        )
        .await
        .unwrap();
    recv(&mut replies).await;

    assert_eq!(orch.context().get_messages("telegram:c1").len(), 2);
    assert!(orch.context().get_messages("c1").is_empty());
    orch.stop().await;
}

#[tokio::test]
async fn test_provider_missing_reply_is_error_text() {
    let dir = tempdir().unwrap();
    let orch = Orchestrator::new(test_config(dir.path())).await.unwrap();
    let mut replies = collect_outbound(&orch, "agent").await;
    orch.start().await.unwrap();

    orch.bus()
        .publish_inbound(BusMessage::inbound("agent", "u", "c", "ping"))
        .await
        .unwrap();

    let reply = recv(&mut replies).await;
    assert_eq!(
        reply.content,
        "Error processing request: No LLM provider configured"
    );
    orch.stop().await;
}

#[tokio::test]
async fn test_stopped_agent_ignores_bus() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![LLMResponse::text("ok")]);
    let orch = orchestrator_with(test_config(dir.path()), provider.clone()).await;
    orch.start().await.unwrap();
    orch.agent().stop().await;

    let delivered = orch
        .bus()
        .publish(BusMessage::inbound("agent", "u", "c", "anyone?"))
        .await;
    assert_eq!(delivered, 0);
    assert_eq!(provider.calls(), 0);
    orch.stop().await;
}

// ============================================================================
// Tool Loop
// ============================================================================

#[tokio::test]
async fn test_tool_results_reach_next_model_call() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![
        LLMResponse::with_tools(
            "Let me check.",
            vec![
                LLMToolCall::new("c1", "echo", json!({"message": "pong"})),
                LLMToolCall::new("c2", "no_such_tool", json!({})),
            ],
        ),
        LLMResponse::text("All done"),
    ]);
    let orch = orchestrator_with(test_config(dir.path()), provider.clone()).await;

    let answer = orch.agent().process("s1", "run tools").await;
    assert_eq!(answer, "All done");
    assert_eq!(provider.calls(), 2);

    let history = provider.last_history();
    // user, assistant pre-tool text, two tool records
    assert_eq!(history.len(), 4);
    assert_eq!(history[1].content, "Let me check.");

    let echo: Value = serde_json::from_str(&history[2].content).unwrap();
    assert_eq!(echo["tool"], "echo");
    assert_eq!(echo["success"], true);
    assert_eq!(echo["result"], "pong");

    let unknown: Value = serde_json::from_str(&history[3].content).unwrap();
    assert_eq!(unknown["success"], false);
    assert_eq!(unknown["error"], "Unknown tool: no_such_tool");
}

#[tokio::test]
async fn test_iteration_cap_from_config() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.agent.max_iterations = 3;
    let provider = ScriptedProvider::new(vec![LLMResponse::with_tools(
        "",
        vec![LLMToolCall::new("c", "echo", json!({"message": "again"}))],
    )]);
    let orch = orchestrator_with(config, provider.clone()).await;

    let answer = orch.agent().process("loop", "never finish").await;
    assert_eq!(answer, MAX_ITERATIONS_MESSAGE);
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn test_filesystem_tools_use_configured_workspace() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::create_dir_all(config.workspace_path()).unwrap();
    let provider = ScriptedProvider::new(vec![
        LLMResponse::with_tools(
            "",
            vec![LLMToolCall::new(
                "w",
                "write_file",
                json!({"path": "notes.txt", "content": "remember this"}),
            )],
        ),
        LLMResponse::text("saved"),
    ]);
    let orch = orchestrator_with(config, provider).await;

    assert_eq!(orch.agent().process("fs", "save a note").await, "saved");
    let written =
        std::fs::read_to_string(orch.config().workspace_path().join("notes.txt")).unwrap();
    assert_eq!(written, "remember this");
}

#[tokio::test]
async fn test_context_limit_applies_to_agent_sessions() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.context.max_messages_per_session = 4;
    let provider = ScriptedProvider::new(vec![LLMResponse::text("ack")]);
    let orch = orchestrator_with(config, provider).await;

    for i in 0..5 {
        orch.agent().process("bounded", &format!("message {}", i)).await;
    }

    let history = orch.context().get_messages("bounded");
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].content, "message 3");
    assert_eq!(history[3].content, "ack");
}

// ============================================================================
// Events & Thinking
// ============================================================================

#[tokio::test]
async fn test_events_and_thoughts_are_recorded() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![
        LLMResponse::with_tools("", vec![LLMToolCall::new("c", "echo", json!({"message": "x"}))]),
        LLMResponse::text("finished"),
    ]);
    let orch = orchestrator_with(test_config(dir.path()), provider).await;

    orch.agent().process("ev", "go").await;

    let events = orch.events();
    assert_eq!(events.events_by_type(&EventType::ToolCalled).len(), 1);
    assert_eq!(events.events_by_type(&EventType::ToolCompleted).len(), 1);
    assert_eq!(events.events_by_type(&EventType::AgentResponse).len(), 1);
    assert!(!events.events_by_session("ev").is_empty());

    let stats = orch.thinking().stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.completed, 1);
}

// ============================================================================
// Subagents
// ============================================================================

#[tokio::test]
async fn test_spawn_tool_runs_subagent_through_agent() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(DelegatingProvider {
        main_calls: AtomicU32::new(0),
    });
    let orch = orchestrator_with(test_config(dir.path()), provider).await;

    let answer = orch.agent().process("boss", "please delegate").await;
    assert_eq!(answer, "Started a background task.");

    let result = orch
        .subagents()
        .wait_for_subagent("sub_1", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result, "done: count the files");

    // The throwaway subagent session is cleared afterwards.
    assert_eq!(orch.context().session_keys(), vec!["boss".to_string()]);
    assert_eq!(orch.subagents().stats().completed, 1);
}

// ============================================================================
// Cron
// ============================================================================

#[tokio::test]
async fn test_cron_job_runs_through_agent_and_delivers() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![LLMResponse::text("daily summary")]);
    let orch = orchestrator_with(test_config(dir.path()), provider).await;
    let mut delivered = collect_outbound(&orch, "cron").await;
    orch.start().await.unwrap();

    orch.cron()
        .add_job(
            "digest",
            CronSchedule::Every { every_ms: 3_600_000 },
            "summarize today",
            true,
        )
        .await
        .unwrap();

    let executed = orch.cron().run_job("digest").await.unwrap();
    assert!(executed.success);
    assert_eq!(executed.result, "daily summary");

    let msg = recv(&mut delivered).await;
    assert_eq!(msg.chat_id, "digest");
    assert_eq!(msg.content, "daily summary");

    let session = format!("cron:{}", executed.job_id);
    assert_eq!(orch.context().get_messages(&session).len(), 2);

    // The store survives a fresh runtime.
    orch.stop().await;
    let reloaded = Orchestrator::new(test_config(dir.path())).await.unwrap();
    let jobs = reloaded.cron().load_jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].last_run_at.is_some());
}

#[tokio::test]
async fn test_cron_rejects_unsupported_expression() {
    let dir = tempdir().unwrap();
    let orch = Orchestrator::new(test_config(dir.path())).await.unwrap();
    let err = orch
        .cron()
        .add_job(
            "bad",
            CronSchedule::Cron {
                expr: "0 9 * * *".into(),
            },
            "x",
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, NanoError::Config(_)));
    assert!(orch.cron().jobs().await.is_empty());
}

// ============================================================================
// Stats
// ============================================================================

#[tokio::test]
async fn test_stats_reflect_activity() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![LLMResponse::text("hi")]);
    let orch = orchestrator_with(test_config(dir.path()), provider).await;
    orch.start().await.unwrap();

    orch.agent().process("a", "one").await;
    orch.agent().process("b", "two").await;

    let stats = orch.stats().await;
    assert_eq!(stats["running"], true);
    assert_eq!(stats["agent"]["provider"], true);
    assert_eq!(stats["context"]["sessions"], 2);
    assert_eq!(stats["context"]["total_messages"], 4);
    assert_eq!(stats["thinking"]["completed"], 2);
    assert!(stats["tools"]
        .as_array()
        .unwrap()
        .iter()
        .any(|t| t == "spawn"));

    orch.stop().await;
}
