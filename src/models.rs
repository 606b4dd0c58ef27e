// Data model for the chat reliability layer
// Wire-facing shapes mirror the server's JSON payloads (camelCase fields)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix used for locally-generated temporary message IDs. A message whose
/// ID carries this prefix has not been acknowledged by the server yet.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Generate a fresh local temporary message ID.
pub fn new_local_id() -> String {
    format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4())
}

/// Whether an ID is a client-side temporary identifier (as opposed to a
/// canonical server-assigned one).
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    /// Locally originated, not yet acknowledged by the server.
    Pending,
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    /// Empty on optimistic local inserts, filled in by reconciliation.
    pub sender_id: String,
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Build the optimistic placeholder inserted at submit time. The sender
    /// ID is left empty and filled in when the canonical message arrives.
    pub fn pending(conversation_id: &str, content: &str, message_type: MessageType) -> Self {
        let now = Utc::now();
        Message {
            id: new_local_id(),
            conversation_id: conversation_id.to_string(),
            sender_id: String::new(),
            content: content.to_string(),
            message_type,
            status: MessageStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_local(&self) -> bool {
        is_local_id(&self.id)
    }
}

/// A remote user currently showing a typing indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUser {
    pub user_id: String,
    pub user_name: String,
}

// Outbound `send-message` payload. Retries re-publish this verbatim so the
// server sees an identical envelope for every attempt of one logical send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub conversation_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub metadata: SendMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMetadata {
    pub local_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAsReadPayload {
    pub conversation_id: String,
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesMarkedReadPayload {
    pub user_id: String,
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStopTypingPayload {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}
