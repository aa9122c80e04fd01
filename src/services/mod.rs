//! Service layer and the interfaces it consumes.
//!
//! Token verification, membership lookup and message/conversation storage are
//! owned elsewhere; the realtime core only talks to them through the traits
//! below. Postgres-backed implementations live in [`crate::db`].

pub mod conversation_service;
pub mod delivery;

use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::error::AppResult;
use crate::models::{
    Conversation, ConversationId, ConversationSummary, MemberRole, Message, NewMessage,
    Participant, Principal, UserId, UserSummary,
};

pub use conversation_service::ConversationService;
pub use delivery::{DeliveryError, MessageDelivery};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Maps an opaque bearer credential to a principal.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Principal, TokenError>;
}

/// Answers "is user U a participant of conversation C".
#[async_trait]
pub trait MembershipOracle: Send + Sync {
    async fn is_member(&self, conversation_id: ConversationId, user_id: UserId) -> AppResult<bool>;
}

/// Durable append and ordered read of messages per conversation.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning `id` and `created_at`.
    async fn append(&self, message: NewMessage) -> AppResult<Message>;

    /// All messages of a conversation, `created_at` ascending with ties broken by id.
    async fn list(&self, conversation_id: ConversationId) -> AppResult<Vec<Message>>;
}

/// Conversation, participant and user directory storage.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find_user(&self, user_id: UserId) -> AppResult<Option<UserSummary>>;

    /// Case-insensitive substring match on name or email.
    async fn search_users(&self, query: Option<&str>, limit: i64) -> AppResult<Vec<UserSummary>>;

    /// Return the 1:1 conversation of the unordered pair, creating it together
    /// with both participant rows if absent. Concurrent calls for the same
    /// pair converge on one conversation.
    async fn find_or_create_direct(&self, initiator: UserId, other: UserId)
        -> AppResult<Conversation>;

    async fn create_group(
        &self,
        creator: UserId,
        title: &str,
        participants: &[(UserId, MemberRole)],
    ) -> AppResult<Conversation>;

    async fn conversation(&self, conversation_id: ConversationId)
        -> AppResult<Option<Conversation>>;

    async fn member_role(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> AppResult<Option<MemberRole>>;

    /// Insert users as members, skipping those already present. Returns the
    /// number of rows added.
    async fn add_participants(
        &self,
        conversation_id: ConversationId,
        user_ids: &BTreeSet<UserId>,
    ) -> AppResult<usize>;

    async fn participants(&self, conversation_id: ConversationId) -> AppResult<Vec<Participant>>;

    async fn list_for_user(&self, user_id: UserId) -> AppResult<Vec<ConversationSummary>>;
}
