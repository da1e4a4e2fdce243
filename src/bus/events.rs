//! Typed lifecycle events
//!
//! The [`EventBus`] is a second, lighter pub/sub surface beside the message
//! bus. It carries runtime observations (a tool was called, a response was
//! produced) rather than conversation traffic, and keeps a bounded ring log of
//! recent events for inspection.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::Result;

/// Default ring log capacity
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Kinds of runtime events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MessageReceived,
    MessageSent,
    MessageError,
    AgentStarted,
    AgentStopped,
    AgentThinking,
    AgentResponse,
    ToolCalled,
    ToolStarted,
    ToolCompleted,
    ToolFailed,
    SessionCreated,
    SessionCleared,
    ErrorOccurred,
    RateLimited,
    /// Application-defined event kind
    Custom(String),
}

impl EventType {
    /// Stable label used for per-type counters.
    pub fn label(&self) -> String {
        match self {
            EventType::Custom(name) => format!("custom:{}", name),
            other => serde_json::to_value(other)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
        }
    }
}

/// One observed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub event_type: EventType,
    /// Component that emitted the event
    pub source: String,
    pub data: Map<String, Value>,
    /// Epoch milliseconds
    pub timestamp: i64,
    /// Empty when the event is not tied to a session
    pub session_id: String,
}

impl Event {
    /// Creates an event with no payload.
    pub fn new(event_type: EventType, source: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type,
            source: source.to_string(),
            data: Map::new(),
            timestamp: Utc::now().timestamp_millis(),
            session_id: String::new(),
        }
    }

    /// Attaches a session id.
    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = session_id.to_string();
        self
    }

    /// Adds one payload entry.
    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn message_received(channel: &str, chat_id: &str, sender_id: &str, content: &str) -> Self {
        Self::new(EventType::MessageReceived, channel)
            .with_data("chat_id", chat_id)
            .with_data("sender_id", sender_id)
            .with_data("content", content)
    }

    pub fn agent_response(session_id: &str, response: &str) -> Self {
        Self::new(EventType::AgentResponse, "agent")
            .with_session(session_id)
            .with_data("response", response)
    }

    pub fn tool_called(tool: &str, arguments: &Value) -> Self {
        Self::new(EventType::ToolCalled, "tools")
            .with_data("tool", tool)
            .with_data("arguments", arguments.clone())
    }

    pub fn tool_completed(tool: &str, result: &str) -> Self {
        Self::new(EventType::ToolCompleted, "tools")
            .with_data("tool", tool)
            .with_data("result", result)
    }

    pub fn tool_failed(tool: &str, error: &str) -> Self {
        Self::new(EventType::ToolFailed, "tools")
            .with_data("tool", tool)
            .with_data("error", error)
    }

    pub fn error_occurred(source: &str, error: &str) -> Self {
        Self::new(EventType::ErrorOccurred, source).with_data("error", error)
    }
}

/// Synchronous event callback.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event) -> Result<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&Event) -> Result<()> + Send + Sync,
{
    fn handle(&self, event: &Event) -> Result<()> {
        self(event)
    }
}

/// Snapshot of event bus counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventStats {
    pub total_published: u64,
    pub log_size: usize,
    pub subscriber_count: usize,
    /// Logged events per type label
    pub events_by_type: HashMap<String, usize>,
}

struct Subscriber {
    id: u64,
    /// `None` subscribes to every type
    filter: Option<EventType>,
    handler: Arc<dyn EventHandler>,
}

/// Typed pub/sub with a bounded event log.
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    log: Mutex<VecDeque<Event>>,
    capacity: usize,
    next_id: AtomicU64,
    total_published: AtomicU64,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    /// Creates an event bus whose ring log holds at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            subscribers: RwLock::new(Vec::new()),
            log: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY))),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            total_published: AtomicU64::new(0),
            cleanup: Mutex::new(None),
        })
    }

    /// Subscribe to one event type. Returns the subscription id.
    pub fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> u64 {
        self.add_subscriber(Some(event_type), handler)
    }

    /// Subscribe to every event type.
    pub fn subscribe_all(&self, handler: Arc<dyn EventHandler>) -> u64 {
        self.add_subscriber(None, handler)
    }

    fn add_subscriber(&self, filter: Option<EventType>, handler: Arc<dyn EventHandler>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                id,
                filter,
                handler,
            });
        id
    }

    /// Removes a subscription. Returns `false` if the id was unknown.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Logs the event and runs matching handlers inline.
    ///
    /// A failing or panicking handler is logged and the remaining handlers
    /// still run.
    pub fn publish(&self, event: Event) {
        self.total_published.fetch_add(1, Ordering::Relaxed);
        {
            let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
            log.push_back(event.clone());
            while log.len() > self.capacity {
                log.pop_front();
            }
        }

        let targets: Vec<Arc<dyn EventHandler>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| match &s.filter {
                Some(t) => *t == event.event_type,
                None => true,
            })
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in targets {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(event_type = %event.event_type.label(), error = %e, "Event handler failed");
                }
                Err(_) => {
                    error!(event_type = %event.event_type.label(), "Event handler panicked");
                }
            }
        }
    }

    /// Publishes on a spawned task.
    pub fn publish_async(self: &Arc<Self>, event: Event) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move { bus.publish(event) })
    }

    /// Publishes after `delay`. Aborting the handle cancels the publish.
    pub fn publish_delayed(self: &Arc<Self>, event: Event, delay: Duration) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            bus.publish(event);
        })
    }

    /// The `n` most recent events, oldest first.
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = log.len().saturating_sub(n);
        log.iter().skip(skip).cloned().collect()
    }

    pub fn events_by_type(&self, event_type: &EventType) -> Vec<Event> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type == *event_type)
            .cloned()
            .collect()
    }

    pub fn events_by_session(&self, session_id: &str) -> Vec<Event> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Drops logged events older than `max_age`. Returns how many were removed.
    pub fn cleanup_older_than(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now().timestamp_millis() - max_age.as_millis() as i64;
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        let before = log.len();
        log.retain(|e| e.timestamp >= cutoff);
        before - log.len()
    }

    /// Runs [`EventBus::cleanup_older_than`] every `interval` until
    /// [`EventBus::stop_cleanup`] is called or the bus is dropped.
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration, max_age: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(bus) = weak.upgrade() else { break };
                let removed = bus.cleanup_older_than(max_age);
                if removed > 0 {
                    debug!(removed = removed, "Pruned old events");
                }
            }
        });
        let mut slot = self.cleanup.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    pub fn stop_cleanup(&self) {
        if let Some(handle) = self
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    pub fn stats(&self) -> EventStats {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        let mut events_by_type: HashMap<String, usize> = HashMap::new();
        for event in log.iter() {
            *events_by_type.entry(event.event_type.label()).or_default() += 1;
        }
        EventStats {
            total_published: self.total_published.load(Ordering::Relaxed),
            log_size: log.len(),
            subscriber_count: self
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            events_by_type,
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.stop_cleanup();
    }
}
