//! Reasoning trace tracking
//!
//! A [`ThinkingTracker`] records the steps an agent takes while answering a
//! request: one "thought" per request, one step per action. Traces can be
//! rendered back into the model's context or shown to a user.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{NanoError, Result};

/// Default cap on steps per thought.
pub const DEFAULT_MAX_STEPS: usize = 50;

/// Lifecycle of a thought.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThoughtStep {
    /// 1-based position within the thought
    pub number: usize,
    pub content: String,
    pub timestamp: i64,
}

/// One recorded reasoning process.
#[derive(Debug, Clone, Serialize)]
pub struct Thought {
    pub id: String,
    pub prompt: String,
    pub model: Option<String>,
    pub status: ThoughtStatus,
    pub steps: Vec<ThoughtStep>,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl Thought {
    /// Elapsed time, up to now for active thoughts.
    pub fn duration_ms(&self) -> i64 {
        self.completed_at
            .unwrap_or_else(|| Utc::now().timestamp_millis())
            - self.created_at
    }
}

/// Observer of thought changes. All methods default to no-ops.
pub trait ThoughtListener: Send + Sync {
    fn on_started(&self, _thought_id: &str, _prompt: &str) {}
    fn on_step(&self, _thought_id: &str, _step: usize, _content: &str) {}
    fn on_completed(&self, _thought_id: &str, _summary: &str) {}
    fn on_failed(&self, _thought_id: &str, _error: &str) {}
    fn on_cancelled(&self, _thought_id: &str) {}
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ThinkingStats {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Tracks thoughts by id (`thought_<n>`).
pub struct ThinkingTracker {
    thoughts: RwLock<HashMap<String, Thought>>,
    listeners: RwLock<Vec<Arc<dyn ThoughtListener>>>,
    counter: AtomicU64,
    max_steps: usize,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ThinkingTracker {
    pub fn new() -> Self {
        Self::with_max_steps(DEFAULT_MAX_STEPS)
    }

    pub fn with_max_steps(max_steps: usize) -> Self {
        Self {
            thoughts: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            counter: AtomicU64::new(0),
            max_steps,
            sweeper: Mutex::new(None),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ThoughtListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn notify(&self, f: impl Fn(&dyn ThoughtListener)) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            f(listener.as_ref());
        }
    }

    /// Opens a new active thought and returns its id.
    pub fn start_thinking(&self, prompt: &str, model: Option<&str>) -> String {
        let id = format!("thought_{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        let thought = Thought {
            id: id.clone(),
            prompt: prompt.to_string(),
            model: model.map(str::to_string),
            status: ThoughtStatus::Active,
            steps: Vec::new(),
            summary: None,
            error: None,
            created_at: Utc::now().timestamp_millis(),
            completed_at: None,
        };
        self.thoughts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), thought);

        debug!(thought_id = %id, "Thought started");
        self.notify(|l| l.on_started(&id, prompt));
        id
    }

    /// Applies `f` to an active thought under the write lock.
    fn with_active<T>(&self, id: &str, f: impl FnOnce(&mut Thought) -> Result<T>) -> Result<T> {
        let mut thoughts = self.thoughts.write().unwrap_or_else(PoisonError::into_inner);
        let thought = thoughts
            .get_mut(id)
            .ok_or_else(|| NanoError::unknown("thought", id))?;
        if thought.status != ThoughtStatus::Active {
            return Err(NanoError::InvalidState(format!(
                "Thought {} is not active",
                id
            )));
        }
        f(thought)
    }

    /// Appends a step and returns its number.
    ///
    /// # Errors
    /// - `UnknownEntity` for an unknown id
    /// - `InvalidState` if the thought is no longer active
    /// - `ResourceExhausted` once the step cap is reached
    pub fn add_step(&self, id: &str, content: &str) -> Result<usize> {
        let max_steps = self.max_steps;
        let number = self.with_active(id, |thought| {
            if thought.steps.len() >= max_steps {
                return Err(NanoError::ResourceExhausted("Max steps exceeded".into()));
            }
            let number = thought.steps.len() + 1;
            thought.steps.push(ThoughtStep {
                number,
                content: content.to_string(),
                timestamp: Utc::now().timestamp_millis(),
            });
            Ok(number)
        })?;
        self.notify(|l| l.on_step(id, number, content));
        Ok(number)
    }

    pub fn complete_thinking(&self, id: &str, summary: &str) -> Result<()> {
        self.with_active(id, |thought| {
            thought.status = ThoughtStatus::Completed;
            thought.summary = Some(summary.to_string());
            thought.completed_at = Some(Utc::now().timestamp_millis());
            Ok(())
        })?;
        self.notify(|l| l.on_completed(id, summary));
        Ok(())
    }

    pub fn fail_thinking(&self, id: &str, error: &str) -> Result<()> {
        self.with_active(id, |thought| {
            thought.status = ThoughtStatus::Failed;
            thought.error = Some(error.to_string());
            thought.completed_at = Some(Utc::now().timestamp_millis());
            Ok(())
        })?;
        self.notify(|l| l.on_failed(id, error));
        Ok(())
    }

    pub fn cancel_thinking(&self, id: &str) -> Result<()> {
        self.with_active(id, |thought| {
            thought.status = ThoughtStatus::Cancelled;
            thought.completed_at = Some(Utc::now().timestamp_millis());
            Ok(())
        })?;
        self.notify(|l| l.on_cancelled(id));
        Ok(())
    }

    pub fn get_thought(&self, id: &str) -> Option<Thought> {
        self.thoughts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Renders a thought as a `<thinking>` block for the model's context.
    /// Unknown ids render as an empty string.
    pub fn format_for_context(&self, id: &str) -> String {
        let Some(thought) = self.get_thought(id) else {
            return String::new();
        };
        let mut out = String::from("<thinking>\n");
        for step in &thought.steps {
            out.push_str(&format!("[Step {}] {}\n", step.number, step.content));
        }
        if let Some(summary) = &thought.summary {
            out.push_str(&format!("Conclusion: {}\n", summary));
        }
        out.push_str("</thinking>");
        out
    }

    /// Human-readable trace with status and timing.
    pub fn format_trace(&self, id: &str) -> String {
        let Some(thought) = self.get_thought(id) else {
            return format!("Unknown thought: {}", id);
        };
        let mut out = format!(
            "Thought {} ({})\nStatus: {:?} | Duration: {}ms\n\n",
            id,
            thought.model.as_deref().unwrap_or("default"),
            thought.status,
            thought.duration_ms()
        );
        for step in &thought.steps {
            out.push_str(&format!("{}. {}\n", step.number, step.content));
        }
        if let Some(summary) = &thought.summary {
            out.push_str(&format!("\n=> {}\n", summary));
        }
        if let Some(error) = &thought.error {
            out.push_str(&format!("\nError: {}\n", error));
        }
        out
    }

    pub fn stats(&self) -> ThinkingStats {
        let thoughts = self.thoughts.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats = ThinkingStats {
            total: thoughts.len(),
            ..Default::default()
        };
        for thought in thoughts.values() {
            match thought.status {
                ThoughtStatus::Active => stats.active += 1,
                ThoughtStatus::Completed => stats.completed += 1,
                ThoughtStatus::Failed => stats.failed += 1,
                ThoughtStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Drops finished thoughts that ended more than `max_age` ago.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now().timestamp_millis() - max_age.as_millis() as i64;
        let mut thoughts = self.thoughts.write().unwrap_or_else(PoisonError::into_inner);
        let before = thoughts.len();
        thoughts.retain(|_, t| t.completed_at.map_or(true, |done| done >= cutoff));
        before - thoughts.len()
    }

    /// Runs [`ThinkingTracker::cleanup`] every `interval` until stopped or
    /// the tracker is dropped.
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration, max_age: Duration) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(tracker) = weak.upgrade() else { break };
                let removed = tracker.cleanup(max_age);
                if removed > 0 {
                    debug!(removed = removed, "Dropped finished thoughts");
                }
            }
        });
        if let Some(previous) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle)
        {
            previous.abort();
        }
    }

    pub fn stop_cleanup(&self) {
        if let Some(handle) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for ThinkingTracker {
    fn drop(&mut self) {
        self.stop_cleanup();
    }
}

impl Default for ThinkingTracker {
    fn default() -> Self {
        Self::new()
    }
}
