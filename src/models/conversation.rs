use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConversationId, UserId};

/// Conversation row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub is_group: bool,
    pub title: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// Entry of the caller's conversation list, also returned by 1:1 start and
/// group creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub is_group: bool,
    pub title: Option<String>,
    pub display_name: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl ConversationSummary {
    pub fn group_display_name(id: ConversationId, title: Option<&str>) -> String {
        match title {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => format!("Group {id}"),
        }
    }
}

/// Key enforcing at most one 1:1 conversation per unordered user pair.
pub fn direct_key(a: UserId, b: UserId) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{low}:{high}")
}
