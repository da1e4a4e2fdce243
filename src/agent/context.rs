//! Bounded per-session conversation memory
//!
//! The [`ContextManager`] keeps an ordered transcript per session key and
//! prunes it on every append so that it never exceeds the configured message
//! count or estimated token budget. Pruning always evicts from the front, so
//! the most recent turns survive.
//!
//! ```text
//! add_message ──> append ──> drop oldest while count > max_messages
//!                                  │
//!                                  ▼
//!                        drop oldest while tokens > max_tokens
//! ```
//!
//! Token counts are an approximation (`chars / 4`) used only for sizing.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ContextConfig;

/// Speaker of a context message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
    /// Epoch milliseconds at append time
    pub created_at: i64,
}

impl ContextMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }

    /// Estimated token count of this message's content.
    pub fn estimated_tokens(&self) -> usize {
        ContextManager::estimate_tokens(&self.content)
    }
}

/// Summary of a single session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionInfo {
    pub message_count: usize,
    pub estimated_tokens: usize,
    /// Timestamp of the oldest surviving message
    pub oldest_message: Option<i64>,
    /// Timestamp of the newest message
    pub latest_message: Option<i64>,
}

type Transcript = Arc<Mutex<VecDeque<ContextMessage>>>;

/// Thread-safe store of bounded session transcripts.
///
/// The session map tolerates concurrent creation; each transcript has its own
/// lock so appends to one session never block another.
pub struct ContextManager {
    sessions: RwLock<HashMap<String, Transcript>>,
    max_messages: usize,
    max_tokens: usize,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ContextManager {
    /// Creates a manager with explicit limits.
    ///
    /// # Example
    /// ```
    /// use nanoclaw::agent::{ContextManager, Role};
    ///
    /// let ctx = ContextManager::new(2, 8000);
    /// ctx.add_message("s1", Role::User, "one");
    /// ctx.add_message("s1", Role::Assistant, "two");
    /// ctx.add_message("s1", Role::User, "three");
    ///
    /// let history = ctx.get_messages("s1");
    /// assert_eq!(history.len(), 2);
    /// assert_eq!(history[0].content, "two");
    /// ```
    pub fn new(max_messages: usize, max_tokens: usize) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            max_messages,
            max_tokens,
            sweeper: Mutex::new(None),
        })
    }

    /// Creates a manager from the `context` config section.
    pub fn from_config(config: &ContextConfig) -> Arc<Self> {
        Self::new(
            config.max_messages_per_session,
            config.max_tokens_per_session,
        )
    }

    /// Fixed approximation: character count divided by four.
    pub fn estimate_tokens(text: &str) -> usize {
        text.chars().count() / 4
    }

    fn transcript(&self, session_key: &str) -> Option<Transcript> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_key)
            .cloned()
    }

    fn transcript_or_create(&self, session_key: &str) -> Transcript {
        if let Some(existing) = self.transcript(session_key) {
            return existing;
        }
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            sessions
                .entry(session_key.to_string())
                .or_insert_with(|| {
                    debug!(session = %session_key, "Creating session");
                    Arc::new(Mutex::new(VecDeque::new()))
                }),
        )
    }

    /// Appends a message to the session and prunes it to the limits.
    pub fn add_message(&self, session_key: &str, role: Role, content: &str) {
        self.push(session_key, ContextMessage::new(role, content));
    }

    /// Appends a prebuilt message and prunes.
    pub fn push(&self, session_key: &str, message: ContextMessage) {
        let transcript = self.transcript_or_create(session_key);
        let mut messages = transcript.lock().unwrap_or_else(PoisonError::into_inner);
        messages.push_back(message);
        self.prune(&mut messages);
    }

    fn prune(&self, messages: &mut VecDeque<ContextMessage>) {
        while messages.len() > self.max_messages {
            messages.pop_front();
        }

        let mut total: usize = messages.iter().map(ContextMessage::estimated_tokens).sum();
        while total > self.max_tokens {
            match messages.pop_front() {
                Some(evicted) => total -= evicted.estimated_tokens(),
                None => break,
            }
        }
    }

    /// Snapshot of the session's messages in insertion order.
    ///
    /// An unknown session yields an empty vector.
    pub fn get_messages(&self, session_key: &str) -> Vec<ContextMessage> {
        self.transcript(session_key)
            .map(|t| {
                t.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Creates an empty session if it does not exist yet.
    pub fn ensure_session(&self, session_key: &str) {
        self.transcript_or_create(session_key);
    }

    /// Removes a session. Returns whether it existed.
    pub fn clear_session(&self, session_key: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_key)
            .is_some()
    }

    pub fn session_info(&self, session_key: &str) -> Option<SessionInfo> {
        let transcript = self.transcript(session_key)?;
        let messages = transcript.lock().unwrap_or_else(PoisonError::into_inner);
        Some(SessionInfo {
            message_count: messages.len(),
            estimated_tokens: messages.iter().map(ContextMessage::estimated_tokens).sum(),
            oldest_message: messages.front().map(|m| m.created_at),
            latest_message: messages.back().map(|m| m.created_at),
        })
    }

    pub fn session_keys(&self) -> Vec<String> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Messages held across all sessions.
    pub fn total_messages(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|t| t.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Removes sessions that are empty or whose latest message is older than
    /// `max_age`. Returns the number removed.
    pub fn cleanup_old_sessions(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now().timestamp_millis() - max_age.as_millis() as i64;
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, transcript| {
            let messages = transcript.lock().unwrap_or_else(PoisonError::into_inner);
            messages.back().is_some_and(|last| last.created_at >= cutoff)
        });
        before - sessions.len()
    }

    /// Starts a background sweep calling [`cleanup_old_sessions`] every
    /// `interval`. The task holds only a weak reference and ends when the
    /// manager is dropped.
    ///
    /// [`cleanup_old_sessions`]: ContextManager::cleanup_old_sessions
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration, max_age: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else { break };
                let removed = manager.cleanup_old_sessions(max_age);
                if removed > 0 {
                    info!(removed = removed, "Evicted idle sessions");
                }
            }
        });
        let mut slot = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    pub fn stop_sweeper(&self) {
        if let Some(handle) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }
}

impl Drop for ContextManager {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(ctx: &ContextManager, key: &str) -> Vec<String> {
        ctx.get_messages(key).into_iter().map(|m| m.content).collect()
    }

    // ========================================================================
    // Pruning
    // ========================================================================

    #[test]
    fn test_count_pruning_keeps_newest_in_order() {
        let ctx = ContextManager::new(7, 100_000);
        for i in 1..=10 {
            ctx.add_message("s", Role::User, &format!("m{}", i));
        }
        assert_eq!(
            contents(&ctx, "s"),
            vec!["m4", "m5", "m6", "m7", "m8", "m9", "m10"]
        );
    }

    #[test]
    fn test_token_pruning_after_count_pruning() {
        // Each message is 40 chars = 10 tokens; budget is 25 tokens.
        let ctx = ContextManager::new(50, 25);
        for c in ['a', 'b', 'c', 'd'] {
            ctx.add_message("s", Role::User, &c.to_string().repeat(40));
        }
        let msgs = ctx.get_messages("s");
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].content.starts_with('c'));
        assert!(msgs[1].content.starts_with('d'));
    }

    #[test]
    fn test_limits_hold_after_many_appends() {
        let ctx = ContextManager::new(5, 30);
        for i in 0..200 {
            let body = "x".repeat(i % 60);
            ctx.add_message("s", Role::Assistant, &body);
            let info = ctx.session_info("s").unwrap();
            assert!(info.message_count <= 5);
            assert!(info.estimated_tokens <= 30);
        }
    }

    #[test]
    fn test_single_oversized_message_is_evicted() {
        let ctx = ContextManager::new(10, 5);
        ctx.add_message("s", Role::User, &"y".repeat(100));
        assert!(ctx.get_messages("s").is_empty());
        assert_eq!(ctx.session_count(), 1);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(ContextManager::estimate_tokens(""), 0);
        assert_eq!(ContextManager::estimate_tokens("abc"), 0);
        assert_eq!(ContextManager::estimate_tokens("abcdefgh"), 2);
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    #[test]
    fn test_unknown_session_is_empty() {
        let ctx = ContextManager::new(50, 8000);
        assert!(ctx.get_messages("missing").is_empty());
        assert!(ctx.session_info("missing").is_none());
    }

    #[test]
    fn test_roles_preserved() {
        let ctx = ContextManager::new(50, 8000);
        ctx.add_message("s", Role::User, "q");
        ctx.add_message("s", Role::Assistant, "a");
        ctx.add_message("s", Role::Tool, "{}");
        let roles: Vec<Role> = ctx.get_messages("s").iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool]);
    }

    #[test]
    fn test_clear_and_keys() {
        let ctx = ContextManager::new(50, 8000);
        ctx.add_message("a", Role::User, "1");
        ctx.add_message("b", Role::User, "2");
        ctx.ensure_session("c");

        let mut keys = ctx.session_keys();
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(ctx.total_messages(), 2);

        assert!(ctx.clear_session("a"));
        assert!(!ctx.clear_session("a"));
        assert_eq!(ctx.session_count(), 2);
    }

    #[test]
    fn test_session_info() {
        let ctx = ContextManager::new(50, 8000);
        ctx.add_message("s", Role::User, "12345678");
        ctx.add_message("s", Role::Assistant, "1234");
        let info = ctx.session_info("s").unwrap();
        assert_eq!(info.message_count, 2);
        assert_eq!(info.estimated_tokens, 3);
        assert!(info.oldest_message.unwrap() <= info.latest_message.unwrap());
    }

    #[test]
    fn test_cleanup_removes_stale_and_empty() {
        let ctx = ContextManager::new(50, 8000);
        ctx.ensure_session("empty");
        ctx.add_message("fresh", Role::User, "hi");
        let mut old = ContextMessage::user("old");
        old.created_at -= 2 * 3600 * 1000;
        ctx.push("stale", old);

        let removed = ctx.cleanup_old_sessions(Duration::from_secs(3600));
        assert_eq!(removed, 2);
        assert_eq!(ctx.session_keys(), vec!["fresh".to_string()]);
    }

    #[test]
    fn test_concurrent_session_creation() {
        let ctx = ContextManager::new(1000, 1_000_000);
        std::thread::scope(|scope| {
            for t in 0..8 {
                let ctx = &ctx;
                scope.spawn(move || {
                    for i in 0..50 {
                        ctx.add_message(&format!("s{}", i % 4), Role::User, &format!("{}-{}", t, i));
                    }
                });
            }
        });
        assert_eq!(ctx.session_count(), 4);
        assert_eq!(ctx.total_messages(), 400);
    }

    #[tokio::test]
    async fn test_sweeper_evicts_in_background() {
        let ctx = ContextManager::new(50, 8000);
        ctx.ensure_session("idle");
        ctx.start_sweeper(Duration::from_millis(20), Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ctx.session_count(), 0);
        ctx.stop_sweeper();
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Tool.to_string(), "tool");
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
    }
}
