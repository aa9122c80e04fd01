pub mod conversation;
pub mod member;
pub mod message;
pub mod user;

pub use conversation::{Conversation, ConversationSummary};
pub use member::{MemberRole, Participant};
pub use message::{Message, MessageStatus, NewMessage};
pub use user::UserSummary;

pub type UserId = i64;
pub type ConversationId = i64;
pub type MessageId = i64;

/// Authenticated identity attached to a request or a live connection.
///
/// Derived from a verified token and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Principal {
    pub user_id: UserId,
}

impl Principal {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }
}
