use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConversationId, MessageId, UserId};

/// Delivery status stored with each message.
///
/// Only `Sent` is ever written by this service; the other states exist so rows
/// written by other components still decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

impl MessageStatus {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "seen" => Some(Self::Seen),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Seen => "seen",
        }
    }
}

/// Persisted message, as returned by the message store.
///
/// `sender_name` is the sender's display name resolved when the row is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender_name: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
}

/// Message about to be appended. Identity and timestamp are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub status: MessageStatus,
}

impl NewMessage {
    pub fn sent(conversation_id: ConversationId, sender_id: UserId, content: String) -> Self {
        Self {
            conversation_id,
            sender_id,
            content,
            status: MessageStatus::Sent,
        }
    }
}

/// Read-back order: `created_at` ascending, ties broken by id.
pub fn sort_chronologically(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}
