//! Background subagents
//!
//! A subagent is a reasoning task that runs on its own tokio task while the
//! caller carries on. [`SubagentManager::create_subagent`] returns an id
//! immediately; the caller can later poll, wait on or cancel it.
//!
//! ```text
//! create_subagent ──> Pending ──> Running ──┬──> Completed
//!                                           ├──> Failed
//!                                           └──> Cancelled (advisory)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SubagentConfig;
use crate::error::{NanoError, Result};

use super::AgentLoop;

/// Default status poll interval for [`SubagentManager::wait_for_subagent`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubagentStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SubagentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubagentStatus::Completed | SubagentStatus::Failed | SubagentStatus::Cancelled
        )
    }
}

/// How much of the parent's state a subagent may see.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    #[default]
    Shared,
    Isolated,
}

/// Snapshot of one subagent.
#[derive(Debug, Clone, Serialize)]
pub struct Subagent {
    pub id: String,
    pub task: String,
    pub system_prompt: String,
    pub model: String,
    pub isolation: IsolationLevel,
    pub status: SubagentStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    /// Set on every terminal transition
    pub completed_at: Option<i64>,
}

impl Subagent {
    /// Run time so far, or total run time once finished.
    pub fn duration_ms(&self) -> i64 {
        self.completed_at
            .unwrap_or_else(|| Utc::now().timestamp_millis())
            - self.created_at
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SubagentStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// The work a subagent performs.
#[async_trait]
pub trait SubagentExecutor: Send + Sync {
    async fn execute(&self, task: &str, system_prompt: &str, model: &str) -> Result<String>;
}

/// Runs subagent tasks through an [`AgentLoop`] on a throwaway session.
///
/// Holds a weak reference so the agent loop, whose tool registry holds the
/// subagent manager, can still be dropped.
pub struct AgentSubagentExecutor {
    agent: Weak<AgentLoop>,
}

impl AgentSubagentExecutor {
    pub fn new(agent: Weak<AgentLoop>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl SubagentExecutor for AgentSubagentExecutor {
    async fn execute(&self, task: &str, system_prompt: &str, model: &str) -> Result<String> {
        let agent = self
            .agent
            .upgrade()
            .ok_or_else(|| NanoError::InvalidState("Agent loop is no longer available".into()))?;

        let session_key = format!("subagent:{}", Uuid::new_v4());
        let result = agent
            .try_process_with(&session_key, task, system_prompt, model)
            .await;
        agent.context().clear_session(&session_key);
        result
    }
}

type SubagentMap = Arc<RwLock<HashMap<String, Subagent>>>;

/// Creates, tracks and reaps subagents.
pub struct SubagentManager {
    subagents: SubagentMap,
    executor: Arc<dyn SubagentExecutor>,
    counter: AtomicU64,
    poll_interval: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SubagentManager {
    pub fn new(executor: Arc<dyn SubagentExecutor>) -> Self {
        Self {
            subagents: Arc::new(RwLock::new(HashMap::new())),
            executor,
            counter: AtomicU64::new(0),
            poll_interval: DEFAULT_POLL_INTERVAL,
            sweeper: Mutex::new(None),
        }
    }

    pub fn from_config(executor: Arc<dyn SubagentExecutor>, config: &SubagentConfig) -> Self {
        Self::new(executor).with_poll_interval(Duration::from_millis(config.poll_interval_ms))
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Registers a subagent and schedules it on its own task.
    ///
    /// Returns the id (`sub_<n>`) without waiting for the work to start.
    /// Must be called from within a tokio runtime.
    pub fn create_subagent(
        &self,
        task: &str,
        system_prompt: &str,
        model: &str,
        isolation: IsolationLevel,
    ) -> String {
        let id = format!("sub_{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        let subagent = Subagent {
            id: id.clone(),
            task: task.to_string(),
            system_prompt: system_prompt.to_string(),
            model: model.to_string(),
            isolation,
            status: SubagentStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now().timestamp_millis(),
            completed_at: None,
        };
        self.subagents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), subagent);

        info!(subagent_id = %id, model = %model, "Subagent created");

        let subagents = Arc::clone(&self.subagents);
        let executor = Arc::clone(&self.executor);
        let run_id = id.clone();
        let (task, system_prompt, model) =
            (task.to_string(), system_prompt.to_string(), model.to_string());

        tokio::spawn(async move {
            update(&subagents, &run_id, |s| {
                if s.status == SubagentStatus::Pending {
                    s.status = SubagentStatus::Running;
                }
            });

            let outcome = executor.execute(&task, &system_prompt, &model).await;

            update(&subagents, &run_id, |s| {
                if s.status != SubagentStatus::Running {
                    debug!(subagent_id = %s.id, status = ?s.status, "Dropping late subagent result");
                    return;
                }
                match outcome {
                    Ok(result) => {
                        s.status = SubagentStatus::Completed;
                        s.result = Some(result);
                    }
                    Err(e) => {
                        warn!(subagent_id = %s.id, error = %e, "Subagent failed");
                        s.status = SubagentStatus::Failed;
                        s.error = Some(e.to_string());
                    }
                }
                s.completed_at = Some(Utc::now().timestamp_millis());
            });
        });

        id
    }

    pub fn get_subagent(&self, id: &str) -> Option<Subagent> {
        self.subagents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Marks a running subagent as cancelled. The underlying task is not
    /// interrupted; its eventual result is discarded.
    pub fn cancel_subagent(&self, id: &str) -> bool {
        let mut cancelled = false;
        update(&self.subagents, id, |s| {
            if s.status == SubagentStatus::Running {
                s.status = SubagentStatus::Cancelled;
                s.completed_at = Some(Utc::now().timestamp_millis());
                cancelled = true;
            }
        });
        if cancelled {
            info!(subagent_id = %id, "Subagent cancelled");
        }
        cancelled
    }

    /// Result of a finished subagent.
    ///
    /// # Errors
    /// - `UnknownEntity` for an unknown id
    /// - `SubagentFailed` if it failed
    /// - `InvalidState` if it is still pending or running, or was cancelled
    pub fn subagent_result(&self, id: &str) -> Result<String> {
        let subagent = self
            .get_subagent(id)
            .ok_or_else(|| NanoError::unknown("subagent", id))?;
        match subagent.status {
            SubagentStatus::Completed => Ok(subagent.result.unwrap_or_default()),
            SubagentStatus::Failed => Err(NanoError::SubagentFailed(
                subagent.error.unwrap_or_default(),
            )),
            SubagentStatus::Cancelled => {
                Err(NanoError::InvalidState("Subagent was cancelled".into()))
            }
            SubagentStatus::Pending | SubagentStatus::Running => {
                Err(NanoError::InvalidState("Subagent still running".into()))
            }
        }
    }

    /// Polls until the subagent finishes or `timeout` elapses.
    ///
    /// # Errors
    /// - `UnknownEntity` if the id is unknown (or was cleaned up meanwhile)
    /// - `SubagentFailed` carrying the recorded error
    /// - `InvalidState` if it was cancelled
    /// - `Timeout` if it is still pending or running at the deadline
    pub async fn wait_for_subagent(&self, id: &str, timeout: Duration) -> Result<String> {
        let start = Instant::now();
        loop {
            let subagent = self
                .get_subagent(id)
                .ok_or_else(|| NanoError::unknown("subagent", id))?;
            if subagent.status.is_terminal() {
                return self.subagent_result(id);
            }
            if start.elapsed() >= timeout {
                return Err(NanoError::Timeout(format!(
                    "Subagent {} did not finish within {}ms",
                    id,
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Subagents that are pending or running.
    pub fn active_subagents(&self) -> Vec<Subagent> {
        let mut active: Vec<Subagent> = self
            .subagents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| !s.status.is_terminal())
            .cloned()
            .collect();
        active.sort_by_key(|s| s.created_at);
        active
    }

    pub fn stats(&self) -> SubagentStats {
        let subagents = self.subagents.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats = SubagentStats {
            total: subagents.len(),
            ..Default::default()
        };
        for s in subagents.values() {
            match s.status {
                SubagentStatus::Pending => stats.pending += 1,
                SubagentStatus::Running => stats.running += 1,
                SubagentStatus::Completed => stats.completed += 1,
                SubagentStatus::Failed => stats.failed += 1,
                SubagentStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Removes finished subagents that completed more than `max_age` ago.
    /// Pending and running subagents are never removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now().timestamp_millis() - max_age.as_millis() as i64;
        let mut subagents = self.subagents.write().unwrap_or_else(PoisonError::into_inner);
        let before = subagents.len();
        subagents.retain(|_, s| s.completed_at.map_or(true, |done| done >= cutoff));
        before - subagents.len()
    }

    /// Runs [`SubagentManager::cleanup`] every `interval` until stopped or
    /// the manager is dropped.
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration, max_age: Duration) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else { break };
                let removed = manager.cleanup(max_age);
                if removed > 0 {
                    debug!(removed = removed, "Reaped finished subagents");
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

impl Drop for SubagentManager {
    fn drop(&mut self) {
        self.stop_cleanup();
    }
}

/// Single-writer update of one subagent record.
fn update(subagents: &SubagentMap, id: &str, f: impl FnOnce(&mut Subagent)) {
    let mut map = subagents.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(subagent) = map.get_mut(id) {
        f(subagent);
    }
}
