//! Message types for the NanoClaw message bus
//!
//! A single envelope type travels over the bus. Its `message_type` says which
//! direction it is heading; its `channel` names the topic whose subscribers
//! receive it.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a bus message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// From a producer (channel, CLI, cron) toward the agent
    Inbound,
    /// From the agent back toward a channel adapter
    Outbound,
    /// Runtime notices
    System,
    /// Control commands
    Command,
    /// Direct replies
    Response,
}

/// Bus envelope.
///
/// Everything except `metadata` is fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    /// Unique id (UUID v4)
    pub id: String,
    /// The topic this message is routed on (e.g. "agent", "telegram")
    pub channel: String,
    /// Unique identifier of the sender
    pub sender_id: String,
    /// Unique identifier of the chat/conversation
    pub chat_id: String,
    /// The text content of the message
    pub content: String,
    /// Direction / kind of the message
    pub message_type: MessageType,
    /// Additional metadata key-value pairs
    pub metadata: HashMap<String, String>,
    /// Creation time in epoch milliseconds
    pub timestamp: i64,
}

impl BusMessage {
    /// Creates a new message of the given type.
    ///
    /// # Example
    /// ```
    /// use nanoclaw::bus::{BusMessage, MessageType};
    ///
    /// let msg = BusMessage::new("agent", "user1", "chat1", "hi", MessageType::Command);
    /// assert_eq!(msg.message_type, MessageType::Command);
    /// assert!(!msg.id.is_empty());
    /// ```
    pub fn new(
        channel: &str,
        sender_id: &str,
        chat_id: &str,
        content: &str,
        message_type: MessageType,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel: channel.to_string(),
            sender_id: sender_id.to_string(),
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            message_type,
            metadata: HashMap::new(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Creates an inbound message.
    ///
    /// # Example
    /// ```
    /// use nanoclaw::bus::{BusMessage, MessageType};
    ///
    /// let msg = BusMessage::inbound("agent", "user123", "chat456", "Hello, bot!");
    /// assert_eq!(msg.message_type, MessageType::Inbound);
    /// assert_eq!(msg.chat_id, "chat456");
    /// ```
    pub fn inbound(channel: &str, sender_id: &str, chat_id: &str, content: &str) -> Self {
        Self::new(channel, sender_id, chat_id, content, MessageType::Inbound)
    }

    /// Creates an outbound message.
    pub fn outbound(channel: &str, sender_id: &str, chat_id: &str, content: &str) -> Self {
        Self::new(channel, sender_id, chat_id, content, MessageType::Outbound)
    }

    /// Adds a metadata key-value pair to the message (builder pattern).
    ///
    /// # Example
    /// ```
    /// use nanoclaw::bus::BusMessage;
    ///
    /// let msg = BusMessage::inbound("agent", "user123", "chat456", "Hello")
    ///     .with_metadata("session_key", "telegram:chat456");
    /// assert_eq!(msg.metadata.get("session_key").map(String::as_str), Some("telegram:chat456"));
    /// ```
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Session key used by the agent: `session_key` metadata, else the chat id.
    pub fn session_key(&self) -> &str {
        self.metadata
            .get("session_key")
            .filter(|v| !v.is_empty())
            .map(String::as_str)
            .unwrap_or(&self.chat_id)
    }

    /// Builds an outbound reply addressed to this message's channel and chat.
    pub fn reply(&self, sender_id: &str, content: &str) -> Self {
        Self::outbound(&self.channel, sender_id, &self.chat_id, content)
    }
}
